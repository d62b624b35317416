// SPDX-License-Identifier: PMPL-1.0-or-later
//! Remote client for RDF4J, Blazegraph and plain SPARQL endpoints.
//!
//! Queries are POSTed as `application/x-www-form-urlencoded` with
//! `Accept: application/sparql-results+json` and go through the retry loop.
//! Administrative calls (uploads, updates, namespaces, repositories) are
//! single attempts with a short timeout.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, instrument};

use crate::client::{
    PrefixCache, RdfContent, RdfFormat, SparqlClient, UploadParams, CORRELATION_HEADER,
};
use crate::config::{Auth, BackendKind, ServiceConfig, ADMIN_TIMEOUT};
use crate::error::{Result, SparqlError};
use crate::namespaces::{default_namespaces, parse_rdf4j_namespaces};
use crate::result::ResultModel;
use crate::retry::{logging_callback_factory, query_name, retry, RetryCallbackFactory};

const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Namespace definition posted to Blazegraph by [`create_blazegraph_namespace`].
pub const BLAZEGRAPH_NAMESPACE_TEMPLATE: &str = include_str!("../resources/blazegraph_namespace.xml");

// ---------------------------------------------------------------------------
// RestClient
// ---------------------------------------------------------------------------

/// SPARQL client talking to a remote triple store over HTTP.
pub struct RestClient {
    config: ServiceConfig,
    http: reqwest::Client,
    /// Custom headers; copied per request so concurrent queries never share state.
    headers: RwLock<HashMap<String, String>>,
    prefixes: PrefixCache,
    callback_factory: RetryCallbackFactory,
}

impl RestClient {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Self::with_headers(config, HashMap::new())
    }

    /// Client that sends `headers` with every request.
    pub fn with_headers(config: ServiceConfig, headers: HashMap<String, String>) -> Result<Self> {
        config.validate()?;
        let http = http_client(&config)?;
        Ok(Self {
            config,
            http,
            headers: RwLock::new(headers),
            prefixes: PrefixCache::default(),
            callback_factory: logging_callback_factory(),
        })
    }

    /// Replace the retry observer.
    pub fn with_callback_factory(mut self, factory: RetryCallbackFactory) -> Self {
        self.callback_factory = factory;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn header_snapshot(&self) -> HashMap<String, String> {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_rdf4j(&self, operation: &'static str) -> Result<()> {
        if self.config.backend == BackendKind::Rdf4j {
            Ok(())
        } else {
            Err(SparqlError::Unsupported {
                operation,
                backend: self.config.backend.to_string(),
            })
        }
    }

    fn prepare(
        &self,
        builder: reqwest::RequestBuilder,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let builder = headers
            .iter()
            .fold(apply_auth(builder, &self.config.auth()), |b, (k, v)| {
                b.header(k.as_str(), v.as_str())
            });
        builder.timeout(timeout)
    }

    async fn query_once(
        &self,
        query: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ResultModel> {
        let mut form: Vec<(&str, String)> = vec![("query", query.to_string())];
        form.extend(self.config.params.pairs());

        let request = self
            .http
            .post(self.config.url())
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .form(&form);
        let response = self
            .prepare(request, headers, self.config.request_timeout())
            .send()
            .await?;
        let body = check_status(response).await?.bytes().await?;
        let result = ResultModel::from_slice(&body)?;
        if self.config.validate {
            result.validate_column_consistency()?;
        }
        Ok(result)
    }
}

#[async_trait]
impl SparqlClient for RestClient {
    fn backend_name(&self) -> String {
        self.config.backend.to_string()
    }

    fn service_url(&self) -> String {
        self.config.url()
    }

    fn prefix_cache(&self) -> &PrefixCache {
        &self.prefixes
    }

    #[instrument(skip(self, query), fields(query = query_name(query), backend = %self.config.backend))]
    async fn execute_query(&self, query: &str) -> Result<ResultModel> {
        let headers = self.header_snapshot();
        let mut callback = (self.callback_factory)();
        callback.pre_call(query);

        let headers = &headers;
        retry(&self.config.retry, callback.as_mut(), move |_| {
            self.query_once(query, headers)
        })
        .await
    }

    async fn get_prefixes(&self) -> Result<HashMap<String, String>> {
        let mut prefixes = default_namespaces();
        if self.config.backend != BackendKind::Rdf4j {
            return Ok(prefixes);
        }

        let request = self
            .http
            .get(format!("{}/namespaces", self.config.url()))
            .header(ACCEPT, "text/csv");
        let response = self
            .prepare(request, &self.header_snapshot(), ADMIN_TIMEOUT)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(SparqlError::Status {
                status: response.status().as_u16(),
                message: "could not fetch namespaces; verify that GRAPHDB_USER and \
                          GRAPHDB_USER_PASSWD are set correctly"
                    .to_string(),
            });
        }
        prefixes.extend(parse_rdf4j_namespaces(&response.text().await?));
        Ok(prefixes)
    }

    async fn upload_rdf(
        &self,
        content: RdfContent,
        format: RdfFormat,
        params: &UploadParams,
    ) -> Result<()> {
        let body = content.into_bytes().await?;
        let mut query: Vec<(String, String)> = params.extra.clone();
        match self.config.backend {
            BackendKind::Blazegraph => {
                if let Some(graph) = &params.graph {
                    query.push(("context-uri".into(), graph.clone()));
                }
            }
            _ => {
                if let Some(graph) = &params.graph {
                    query.push(("context".into(), format!("<{graph}>")));
                }
                if let Some(base) = &params.base_iri {
                    query.push(("baseURI".into(), format!("<{base}>")));
                }
            }
        }

        debug!(format = %format, bytes = body.len(), "uploading rdf");
        let request = self
            .http
            .post(self.config.upload_url())
            .query(&query)
            .header(CONTENT_TYPE, format.mime_type())
            .body(body);
        let response = self
            .prepare(request, &self.header_snapshot(), ADMIN_TIMEOUT)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update_query(&self, query: &str) -> Result<()> {
        let request = self
            .http
            .post(self.config.upload_url())
            .form(&[("update", query)]);
        let response = self
            .prepare(request, &self.header_snapshot(), ADMIN_TIMEOUT)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_repo(&self) -> Result<()> {
        let request = self.http.delete(self.config.delete_repo_url());
        let response = self
            .prepare(request, &self.header_snapshot(), ADMIN_TIMEOUT)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_namespace(&self, prefix: &str) -> Result<String> {
        self.require_rdf4j("get_namespace")?;
        let request = self
            .http
            .get(format!("{}/namespaces/{prefix}", self.config.url()));
        let response = self
            .prepare(request, &self.header_snapshot(), ADMIN_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.text().await?)
    }

    async fn set_namespace(&self, prefix: &str, value: &str) -> Result<()> {
        self.require_rdf4j("set_namespace")?;
        let request = self
            .http
            .put(format!("{}/namespaces/{prefix}", self.config.url()))
            .header(CONTENT_TYPE, "text/plain")
            .body(value.to_string());
        let response = self
            .prepare(request, &self.header_snapshot(), ADMIN_TIMEOUT)
            .send()
            .await?;
        check_status(response).await?;
        self.prefixes.insert(prefix, value).await;
        Ok(())
    }

    fn set_correlation_id(&self, id: &str) {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(CORRELATION_HEADER.to_string(), id.to_string());
    }

    fn clear_correlation_id(&self) {
        self.headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(CORRELATION_HEADER);
    }
}

impl std::fmt::Display for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<RestClient service: {}>", self.config.url())
    }
}

// ---------------------------------------------------------------------------
// Repository administration
// ---------------------------------------------------------------------------

/// One entry of an RDF4J repository listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoInfo {
    pub uri: String,
    pub repo_id: String,
    pub title: String,
    pub readable: bool,
    pub writable: bool,
}

/// List the repositories on an RDF4J server.
pub async fn list_repositories(config: &ServiceConfig) -> Result<Vec<RepoInfo>> {
    let http = http_client(config)?;
    let url = format!("{}://{}/repositories", config.protocol, config.server);
    let request = http
        .get(url)
        .header(ACCEPT, SPARQL_RESULTS_JSON)
        .timeout(ADMIN_TIMEOUT);
    let response = apply_auth(request, &config.auth()).send().await?;
    let body = check_status(response).await?.bytes().await?;
    let result = ResultModel::from_slice(&body)?;

    let infos = result
        .bindings()
        .iter()
        .map(|binding| {
            let get = |key: &str| binding.get(key).map(|v| v.value.clone()).unwrap_or_default();
            RepoInfo {
                uri: get("uri"),
                repo_id: get("id"),
                title: get("title"),
                readable: get("readable") == "true",
                writable: get("writable") == "true",
            }
        })
        .collect();
    Ok(infos)
}

/// Create an RDF4J repository from a Turtle repository configuration.
///
/// With `allow_exist`, a `409 Conflict` (repository already present) is
/// accepted.
pub async fn create_repository(
    config: &ServiceConfig,
    repo_config: Vec<u8>,
    allow_exist: bool,
) -> Result<RestClient> {
    let http = http_client(config)?;
    let request = http
        .put(config.url())
        .header(CONTENT_TYPE, "text/turtle")
        .body(repo_config)
        .timeout(config.timeout.unwrap_or(ADMIN_TIMEOUT));
    let response = apply_auth(request, &config.auth()).send().await?;
    if !(allow_exist && response.status() == StatusCode::CONFLICT) {
        check_status(response).await?;
    }
    RestClient::new(config.clone())
}

/// Create a Blazegraph namespace and return a client for it.
///
/// `server` is the namespace collection, e.g. `host:9999/blazegraph/namespace`.
pub async fn create_blazegraph_namespace(
    server: &str,
    repo: &str,
    protocol: &str,
    token: Option<String>,
) -> Result<RestClient> {
    let config = ServiceConfig {
        repo: repo.to_string(),
        protocol: protocol.to_string(),
        server: server.to_string(),
        backend: BackendKind::Blazegraph,
        token,
        ..ServiceConfig::default()
    };
    let params = HashMap::from([("repo", repo)]);
    let body = config_from_template(BLAZEGRAPH_NAMESPACE_TEMPLATE, &params);

    let http = http_client(&config)?;
    let request = http
        .post(format!("{protocol}://{server}"))
        .header(CONTENT_TYPE, "application/xml")
        .body(body)
        .timeout(ADMIN_TIMEOUT);
    let response = apply_auth(request, &config.auth()).send().await?;
    check_status(response).await?;
    RestClient::new(config)
}

/// Replace every `{{key}}` in `template` with its value from `params`.
pub fn config_from_template(template: &str, params: &HashMap<&str, &str>) -> String {
    params.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{{{key}}}}}"), value)
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn http_client(config: &ServiceConfig) -> Result<reqwest::Client> {
    // Already installed by an earlier client: that is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut builder = reqwest::Client::builder().timeout(config.request_timeout());
    if let Some(path) = &config.ca_bundle {
        let pem = std::fs::read(path)?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
            SparqlError::Configuration(format!("invalid CA bundle {}: {e}", path.display()))
        })?;
        builder = builder.add_root_certificate(cert);
    }
    builder
        .build()
        .map_err(|e| SparqlError::Configuration(format!("cannot build HTTP client: {e}")))
}

fn apply_auth(builder: reqwest::RequestBuilder, auth: &Auth) -> reqwest::RequestBuilder {
    match auth {
        Auth::None => builder,
        Auth::Token(token) => builder.header(AUTHORIZATION, token.as_str()),
        Auth::Basic { user, password } => builder.basic_auth(user, Some(password)),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .ok()
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
    Err(SparqlError::Status {
        status: status.as_u16(),
        message,
    })
}
