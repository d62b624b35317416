// SPDX-License-Identifier: PMPL-1.0-or-later
//! # CIMSparql Client
//!
//! SPARQL clients for triple stores holding CIM power-grid models.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cimsparql_client::{RestClient, ServiceConfig, SparqlClient};
//!
//! #[tokio::main]
//! async fn main() -> cimsparql_client::error::Result<()> {
//!     let client = RestClient::new(ServiceConfig::from_env()?)?;
//!     let (table, _sample) = client
//!         .get_table("select * where { ?s ?p ?o } limit 10")
//!         .await?;
//!     println!("{} rows", table.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Endpoint configuration, retry policy, request parameters.
//! - [`result`]: SPARQL JSON results and sample-row extraction.
//! - [`retry`]: Retry loop and retry observers.
//! - [`client`]: The [`SparqlClient`] capability trait and upload types.
//! - [`rest`]: HTTP client for RDF4J, Blazegraph and direct endpoints.
//! - `local`: Embedded Oxigraph client (feature `oxigraph-backend`).
//! - [`table`]: Column-oriented result tables.
//! - [`namespaces`]: Built-in prefix table.
//! - [`error`]: Error types and the crate-level `Result` alias.

pub mod client;
pub mod config;
pub mod error;
#[cfg(feature = "oxigraph-backend")]
pub mod local;
pub mod namespaces;
pub mod rest;
pub mod result;
pub mod retry;
pub mod table;

pub use client::{RdfContent, RdfFormat, SparqlClient, UploadParams, CORRELATION_HEADER};
pub use config::{Auth, BackendKind, RequestParams, RetryPolicy, ServiceConfig};
pub use error::{ErrorCategory, SparqlError};
#[cfg(feature = "oxigraph-backend")]
pub use local::LocalClient;
pub use rest::{RepoInfo, RestClient};
pub use result::{sample_row, Binding, ResultModel, ResultValue, ValueType};
pub use retry::{query_name, AttemptOutcome, RetryCallback, RetryCallbackFactory};
pub use table::{Table, Value};
