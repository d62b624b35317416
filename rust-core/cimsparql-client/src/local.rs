// SPDX-License-Identifier: PMPL-1.0-or-later
//! In-process client backed by an Oxigraph store.
//!
//! This module is only compiled when the `oxigraph-backend` feature is enabled.
//! Queries run on the blocking pool against a cloned store handle. Results go
//! through SPARQL JSON so both clients share one parser. Local failures are
//! not retried.

use std::collections::HashMap;

use async_trait::async_trait;
use oxigraph::io::{RdfFormat as OxiFormat, RdfParser};
use oxigraph::model::NamedNode;
use oxigraph::sparql::results::QueryResultsFormat;
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;
use regex::Regex;

use crate::client::{PrefixCache, RdfContent, RdfFormat, SparqlClient, UploadParams};
use crate::error::{Result, SparqlError};
use crate::namespaces::{default_namespaces, sparql_prefix_block};
use crate::result::ResultModel;

/// Client running queries against an embedded store.
pub struct LocalClient {
    store: Store,
    strip_service: Option<Regex>,
    prefixes: PrefixCache,
}

impl LocalClient {
    /// Client over a fresh in-memory store.
    pub fn new() -> Result<Self> {
        let store = Store::new().map_err(|e| SparqlError::Store(e.to_string()))?;
        Ok(Self::with_store(store))
    }

    /// Client over an existing store handle.
    pub fn with_store(store: Store) -> Self {
        Self {
            store,
            strip_service: None,
            prefixes: PrefixCache::default(),
        }
    }

    /// Remove `SERVICE <...>` specifiers before running a query, so federated
    /// queries run against the local data instead.
    pub fn strip_service_specifier(mut self, strip: bool) -> Result<Self> {
        self.strip_service = if strip {
            Some(Regex::new(r"SERVICE[^{]+").map_err(|e| SparqlError::Configuration(e.to_string()))?)
        } else {
            None
        };
        Ok(self)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    async fn with_prefixes(&self, query: &str) -> Result<String> {
        let prefixes = self.prefixes().await?;
        Ok(format!("{}{}", sparql_prefix_block(&prefixes), query))
    }
}

fn oxigraph_format(format: RdfFormat) -> Result<OxiFormat> {
    match format {
        RdfFormat::RdfXml => Ok(OxiFormat::RdfXml),
        RdfFormat::NTriples => Ok(OxiFormat::NTriples),
        RdfFormat::Turtle => Ok(OxiFormat::Turtle),
        RdfFormat::N3 => Ok(OxiFormat::N3),
        RdfFormat::NQuads => Ok(OxiFormat::NQuads),
        RdfFormat::TriG => Ok(OxiFormat::TriG),
        other => Err(SparqlError::Configuration(format!(
            "format must be one of rdf/xml, n-triples, turtle, n3, n-quads, trig; got {other}"
        ))),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SparqlError::Store(format!("store task failed: {e}")))?
}

#[async_trait]
impl SparqlClient for LocalClient {
    fn backend_name(&self) -> String {
        "local".to_string()
    }

    fn service_url(&self) -> String {
        "oxigraph://memory".to_string()
    }

    fn prefix_cache(&self) -> &PrefixCache {
        &self.prefixes
    }

    async fn execute_query(&self, query: &str) -> Result<ResultModel> {
        let query = match &self.strip_service {
            Some(re) => re.replace_all(query, "").into_owned(),
            None => query.to_string(),
        };
        let text = self.with_prefixes(&query).await?;
        let store = self.store.clone();

        let json = blocking(move || {
            let results = store
                .query(text.as_str())
                .map_err(|e| SparqlError::Store(e.to_string()))?;
            match &results {
                QueryResults::Solutions(_) => {}
                QueryResults::Boolean(_) => {
                    return Err(SparqlError::InvalidResultShape {
                        expected: "solutions",
                        found: "boolean",
                    })
                }
                QueryResults::Graph(_) => {
                    return Err(SparqlError::InvalidResultShape {
                        expected: "solutions",
                        found: "graph",
                    })
                }
            }
            results
                .write(Vec::new(), QueryResultsFormat::Json)
                .map_err(|e| SparqlError::Store(e.to_string()))
        })
        .await?;

        ResultModel::from_slice(&json)
    }

    async fn get_prefixes(&self) -> Result<HashMap<String, String>> {
        Ok(default_namespaces())
    }

    async fn upload_rdf(
        &self,
        content: RdfContent,
        format: RdfFormat,
        params: &UploadParams,
    ) -> Result<()> {
        let mut parser = RdfParser::from_format(oxigraph_format(format)?);
        if let Some(base) = &params.base_iri {
            parser = parser
                .with_base_iri(base.as_str())
                .map_err(|e| SparqlError::Configuration(format!("invalid base IRI: {e}")))?;
        }
        if let Some(graph) = &params.graph {
            let graph = NamedNode::new(graph.as_str())
                .map_err(|e| SparqlError::Configuration(format!("invalid graph IRI: {e}")))?;
            parser = parser.with_default_graph(graph);
        }

        let bytes = content.into_bytes().await?;
        let store = self.store.clone();
        blocking(move || {
            store
                .load_from_read(parser, bytes.as_slice())
                .map_err(|e| SparqlError::Store(e.to_string()))
        })
        .await
    }

    async fn update_query(&self, query: &str) -> Result<()> {
        let text = self.with_prefixes(query).await?;
        let store = self.store.clone();
        blocking(move || {
            store
                .update(text.as_str())
                .map_err(|e| SparqlError::Store(e.to_string()))
        })
        .await
    }

    async fn delete_repo(&self) -> Result<()> {
        Err(SparqlError::Unsupported {
            operation: "delete_repo",
            backend: self.backend_name(),
        })
    }

    async fn get_namespace(&self, prefix: &str) -> Result<String> {
        self.prefixes()
            .await?
            .remove(prefix)
            .ok_or_else(|| SparqlError::Configuration(format!("unknown prefix '{prefix}'")))
    }

    async fn set_namespace(&self, prefix: &str, value: &str) -> Result<()> {
        self.prefixes().await?;
        self.prefixes.insert(prefix, value).await;
        Ok(())
    }

    fn set_correlation_id(&self, _id: &str) {}

    fn clear_correlation_id(&self) {}
}
