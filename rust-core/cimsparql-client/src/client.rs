// SPDX-License-Identifier: PMPL-1.0-or-later
//! The client capability set shared by every backend.
//!
//! [`SparqlClient`] is implemented by the remote REST client
//! ([`crate::rest::RestClient`]) and the embedded store client
//! ([`crate::local::LocalClient`]). Callers hold `Arc<dyn SparqlClient>` and
//! never need to know which one they got.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, SparqlError};
use crate::result::{Binding, ResultModel};
use crate::table::Table;

/// Header carrying the batch correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

// ---------------------------------------------------------------------------
// RDF serialisations
// ---------------------------------------------------------------------------

/// Serialisations accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RdfFormat {
    RdfXml,
    NTriples,
    Turtle,
    N3,
    NQuads,
    JsonLd,
    RdfJson,
    TriX,
    TriG,
    Rdf4jBinary,
}

impl RdfFormat {
    pub const ALL: [RdfFormat; 10] = [
        RdfFormat::RdfXml,
        RdfFormat::NTriples,
        RdfFormat::Turtle,
        RdfFormat::N3,
        RdfFormat::NQuads,
        RdfFormat::JsonLd,
        RdfFormat::RdfJson,
        RdfFormat::TriX,
        RdfFormat::TriG,
        RdfFormat::Rdf4jBinary,
    ];

    /// Logical format name.
    pub fn name(self) -> &'static str {
        match self {
            RdfFormat::RdfXml => "rdf/xml",
            RdfFormat::NTriples => "n-triples",
            RdfFormat::Turtle => "turtle",
            RdfFormat::N3 => "n3",
            RdfFormat::NQuads => "n-quads",
            RdfFormat::JsonLd => "json-ld",
            RdfFormat::RdfJson => "rdf/json",
            RdfFormat::TriX => "trix",
            RdfFormat::TriG => "trig",
            RdfFormat::Rdf4jBinary => "rdf4j binary rdf",
        }
    }

    /// `Content-Type` used when posting this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            RdfFormat::RdfXml => "application/rdf+xml",
            RdfFormat::NTriples => "text/plain",
            RdfFormat::Turtle => "text/turtle",
            RdfFormat::N3 => "text/rdf+n3",
            RdfFormat::NQuads => "text/x-nquads",
            RdfFormat::JsonLd => "application/ld+json",
            RdfFormat::RdfJson => "application/rdf+json",
            RdfFormat::TriX => "application/trix",
            RdfFormat::TriG => "application/x-trig",
            RdfFormat::Rdf4jBinary => "application/x-binary-rdf",
        }
    }
}

impl fmt::Display for RdfFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RdfFormat {
    type Err = SparqlError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        RdfFormat::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| {
                let names: Vec<_> = RdfFormat::ALL.iter().map(|f| f.name()).collect();
                SparqlError::Configuration(format!(
                    "format must be one of {}, got '{s}'",
                    names.join(", ")
                ))
            })
    }
}

/// Data to upload: in memory or on disk.
#[derive(Debug, Clone)]
pub enum RdfContent {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl RdfContent {
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            RdfContent::Bytes(bytes) => Ok(bytes),
            RdfContent::File(path) => Ok(tokio::fs::read(path).await?),
        }
    }
}

impl From<Vec<u8>> for RdfContent {
    fn from(bytes: Vec<u8>) -> Self {
        RdfContent::Bytes(bytes)
    }
}

impl From<&str> for RdfContent {
    fn from(text: &str) -> Self {
        RdfContent::Bytes(text.as_bytes().to_vec())
    }
}

impl From<PathBuf> for RdfContent {
    fn from(path: PathBuf) -> Self {
        RdfContent::File(path)
    }
}

/// Options for [`SparqlClient::upload_rdf`].
#[derive(Debug, Clone, Default)]
pub struct UploadParams {
    /// Target named graph; the default graph when unset.
    pub graph: Option<String>,
    /// Base IRI for resolving relative IRIs in the content.
    pub base_iri: Option<String>,
    /// Extra request parameters passed through to REST backends.
    pub extra: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Prefix cache
// ---------------------------------------------------------------------------

/// Prefix map fetched on first use and kept for the client's lifetime.
///
/// Not guarded against concurrent first access: two callers may both fetch,
/// the first one to finish wins.
#[derive(Debug, Default)]
pub struct PrefixCache {
    inner: RwLock<Option<HashMap<String, String>>>,
}

impl PrefixCache {
    pub async fn get(&self) -> Option<HashMap<String, String>> {
        self.inner.read().await.clone()
    }

    /// Store `fresh` unless another caller already did; return the cached map.
    pub async fn fill(&self, fresh: HashMap<String, String>) -> HashMap<String, String> {
        let mut guard = self.inner.write().await;
        guard.get_or_insert(fresh).clone()
    }

    /// Merge `extra` into an already filled cache.
    pub async fn extend(&self, extra: HashMap<String, String>) {
        if let Some(map) = self.inner.write().await.as_mut() {
            map.extend(extra);
        }
    }

    pub async fn insert(&self, prefix: &str, uri: &str) {
        if let Some(map) = self.inner.write().await.as_mut() {
            map.insert(prefix.to_string(), uri.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// SparqlClient
// ---------------------------------------------------------------------------

/// Operations every SPARQL backend offers.
///
/// Administrative operations fail fast (no retry) and return
/// [`SparqlError::Unsupported`] when a backend lacks them.
#[async_trait]
pub trait SparqlClient: Send + Sync {
    /// Backend label for logs and errors (`RDF4J`, `BLAZEGRAPH`, `local`, ...).
    fn backend_name(&self) -> String;

    /// URL or description of the service queried.
    fn service_url(&self) -> String;

    fn prefix_cache(&self) -> &PrefixCache;

    /// Run a SELECT query and return its bindings.
    async fn execute_query(&self, query: &str) -> Result<ResultModel>;

    /// Fetch prefixes from the backend, bypassing the cache.
    async fn get_prefixes(&self) -> Result<HashMap<String, String>>;

    async fn upload_rdf(
        &self,
        content: RdfContent,
        format: RdfFormat,
        params: &UploadParams,
    ) -> Result<()>;

    /// Run a SPARQL UPDATE.
    async fn update_query(&self, query: &str) -> Result<()>;

    async fn delete_repo(&self) -> Result<()>;

    async fn get_namespace(&self, prefix: &str) -> Result<String>;

    async fn set_namespace(&self, prefix: &str, value: &str) -> Result<()>;

    /// Tag every following request with `id` until cleared.
    fn set_correlation_id(&self, id: &str);

    fn clear_correlation_id(&self);

    /// Query result as a raw table plus a sample row for type inference.
    async fn get_table(&self, query: &str) -> Result<(Table, Binding)> {
        let result = self.execute_query(query).await?;
        Ok((Table::from_result(&result), result.sample_row()))
    }

    /// Whether the repository holds no triples at all.
    async fn is_empty(&self) -> Result<bool> {
        let (table, _) = self.get_table("select * where {?s ?p ?o} limit 1").await?;
        Ok(table.is_empty())
    }

    /// Cached prefix map, fetched on first use.
    async fn prefixes(&self) -> Result<HashMap<String, String>> {
        if let Some(cached) = self.prefix_cache().get().await {
            return Ok(cached);
        }
        let fresh = self.get_prefixes().await?;
        Ok(self.prefix_cache().fill(fresh).await)
    }

    /// Add or override prefixes in the cache.
    async fn update_prefixes(&self, extra: HashMap<String, String>) -> Result<()> {
        self.prefixes().await?;
        self.prefix_cache().extend(extra).await;
        Ok(())
    }
}
