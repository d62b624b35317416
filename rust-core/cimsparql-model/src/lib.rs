// SPDX-License-Identifier: PMPL-1.0-or-later
//! # CIMSparql Model
//!
//! Typed tables of CIM power-grid data on top of [`cimsparql_client`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cimsparql_client::{RestClient, ServiceConfig};
//! use cimsparql_model::{Model, ModelConfig};
//!
//! #[tokio::main]
//! async fn main() -> cimsparql_model::error::Result<()> {
//!     let client = Arc::new(RestClient::new(ServiceConfig::from_env()?)?);
//!     let model = Model::single_client(client, ModelConfig::default());
//!     let _scope = model.correlation_scope();
//!     let buses = model.bus_data(Some("NO")).await?;
//!     println!("{} buses", buses.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`model`]: Query routing, conversion and the data operations.
//! - [`type_mapper`]: SPARQL type map and column coercion.
//! - [`templates`]: Stored queries.
//! - [`schema`]: Column contracts of returned tables.
//! - [`value_mapper`]: Post-processing steps.
//! - [`network`]: Connected components of an edge list.

pub mod error;
pub mod model;
pub mod network;
pub mod schema;
pub mod templates;
pub mod type_mapper;
pub mod value_mapper;

pub use error::ModelError;
pub use model::{ClientRouter, CorrelationScope, Model, ModelConfig, FEDERATED_QUERIES};
pub use network::Islands;
pub use schema::{FieldKind, FieldSpec, TableSchema};
pub use templates::QueryTemplate;
pub use type_mapper::{build_type_map, Converter, MapOptions, TypeMapper};
pub use value_mapper::{MridMapper, ValueMapper};
