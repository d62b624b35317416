// SPDX-License-Identifier: PMPL-1.0-or-later
//! Service configuration.
//!
//! A [`ServiceConfig`] describes one SPARQL endpoint: where it lives, which
//! REST flavour it speaks, how to authenticate and how hard to retry. The
//! request URL and credentials are derived from it without any network I/O.
//!
//! Environment defaults (see [`ServiceConfig::from_env`]):
//! - `GRAPHDB_REPO`: repository id, default `LATEST`
//! - `GRAPHDB_SERVER`: host and port, default `127.0.0.1:7200`
//! - `GRAPHDB_USER` / `GRAPHDB_USER_PASSWD`: basic-auth credentials
//! - `GRAPHDB_TOKEN`: value of the `Authorization` header, wins over basic auth
//! - `SPARQL_REST_API`: `RDF4J`, `BLAZEGRAPH` or `DIRECT_SPARQL_ENDPOINT`
//! - `SPARQL_RETRY_ATTEMPTS`: total attempts per query, default 1

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SparqlError};

/// Timeout for queries when the configuration does not set one.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for administrative calls (uploads, namespaces, repositories).
pub const ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Backend kind
// ---------------------------------------------------------------------------

/// REST dialect spoken by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    /// RDF4J REST API (GraphDB and friends). Exposes namespaces.
    Rdf4j,
    /// Blazegraph namespace endpoints.
    Blazegraph,
    /// A bare SPARQL endpoint; the server address is the full URL.
    DirectSparqlEndpoint,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Rdf4j => "RDF4J",
            BackendKind::Blazegraph => "BLAZEGRAPH",
            BackendKind::DirectSparqlEndpoint => "DIRECT_SPARQL_ENDPOINT",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SparqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RDF4J" => Ok(BackendKind::Rdf4j),
            "BLAZEGRAPH" => Ok(BackendKind::Blazegraph),
            "DIRECT_SPARQL_ENDPOINT" => Ok(BackendKind::DirectSparqlEndpoint),
            other => Err(SparqlError::Configuration(format!(
                "unknown backend '{other}', expected one of RDF4J, BLAZEGRAPH, DIRECT_SPARQL_ENDPOINT"
            ))),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = SparqlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. At least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that makes `max_attempts` attempts with default delays.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// Extra parameters sent with every query (RDF4J REST API names).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    pub distinct: bool,
    pub infer: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl RequestParams {
    /// The parameters that carry a value, as `(name, value)` pairs.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("distinct", self.distinct.to_string()),
            ("infer", self.infer.to_string()),
        ];
        if let Some(limit) = self.limit {
            out.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            out.push(("offset", offset.to_string()));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Credentials derived from a [`ServiceConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    /// Sent verbatim as the `Authorization` header.
    Token(String),
    Basic { user: String, password: String },
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Configuration of one SPARQL endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Repository (RDF4J) or namespace (Blazegraph) id.
    pub repo: String,
    /// `http` or `https`.
    pub protocol: String,
    /// Host and port, or the complete URL for a direct endpoint.
    pub server: String,
    /// Mount prefix in front of `repositories/` on RDF4J servers.
    pub path: String,
    pub user: Option<String>,
    pub passwd: Option<String>,
    pub token: Option<String>,
    pub backend: BackendKind,
    /// Extra PEM root certificate to trust.
    pub ca_bundle: Option<PathBuf>,
    pub retry: RetryPolicy,
    pub params: RequestParams,
    /// Per-request timeout for queries.
    pub timeout: Option<Duration>,
    /// Check that every row binds exactly the header variables.
    pub validate: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            repo: "LATEST".to_string(),
            protocol: "https".to_string(),
            server: "127.0.0.1:7200".to_string(),
            path: String::new(),
            user: None,
            passwd: None,
            token: None,
            backend: BackendKind::Rdf4j,
            ca_bundle: None,
            retry: RetryPolicy::default(),
            params: RequestParams::default(),
            timeout: None,
            validate: false,
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(repo) = lookup("GRAPHDB_REPO") {
            config.repo = repo;
        }
        if let Some(server) = lookup("GRAPHDB_SERVER") {
            config.server = server;
        }
        config.user = lookup("GRAPHDB_USER").filter(|v| !v.is_empty());
        config.passwd = lookup("GRAPHDB_USER_PASSWD").filter(|v| !v.is_empty());
        config.token = lookup("GRAPHDB_TOKEN").filter(|v| !v.is_empty());
        if let Some(api) = lookup("SPARQL_REST_API") {
            config.backend = api.parse()?;
        }
        if let Some(attempts) = lookup("SPARQL_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts.trim().parse().map_err(|_| {
                SparqlError::Configuration(format!(
                    "SPARQL_RETRY_ATTEMPTS must be a positive integer, got '{attempts}'"
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Same configuration pointing at another repository.
    pub fn with_repo(&self, repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            ..self.clone()
        }
    }

    /// Reject configurations no client can work with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SparqlError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.server.is_empty() {
            return Err(SparqlError::Configuration("server must not be empty".to_string()));
        }
        if self.backend != BackendKind::DirectSparqlEndpoint
            && !matches!(self.protocol.as_str(), "http" | "https")
        {
            return Err(SparqlError::Configuration(format!(
                "protocol must be http or https, got '{}'",
                self.protocol
            )));
        }
        if self.user.is_some() != self.passwd.is_some() && self.token.is_none() {
            return Err(SparqlError::Configuration(
                "user and password must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Query endpoint URL.
    pub fn url(&self) -> String {
        match self.backend {
            BackendKind::Rdf4j => {
                let mut mount = self.path.trim_matches('/').to_string();
                if !mount.is_empty() {
                    mount.push('/');
                }
                let mut url = format!("{}://{}/{}repositories", self.protocol, self.server, mount);
                if !self.repo.is_empty() {
                    url.push('/');
                    url.push_str(&self.repo);
                }
                url
            }
            BackendKind::Blazegraph => {
                format!("{}://{}/{}/sparql", self.protocol, self.server, self.repo)
            }
            BackendKind::DirectSparqlEndpoint => self.server.clone(),
        }
    }

    /// Endpoint for RDF uploads and SPARQL updates.
    pub fn upload_url(&self) -> String {
        match self.backend {
            BackendKind::Rdf4j => format!("{}/statements", self.url()),
            _ => self.url(),
        }
    }

    /// Endpoint that deletes the repository (Blazegraph drops the `/sparql` suffix).
    pub fn delete_repo_url(&self) -> String {
        let url = self.url();
        match self.backend {
            BackendKind::Blazegraph => match url.rsplit_once('/') {
                Some((base, _)) => base.to_string(),
                None => url,
            },
            _ => url,
        }
    }

    /// Credentials to attach. A token always wins over basic auth.
    pub fn auth(&self) -> Auth {
        if let Some(token) = &self.token {
            return Auth::Token(token.clone());
        }
        match (&self.user, &self.passwd) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Auth::Basic {
                    user: user.clone(),
                    password: password.clone(),
                }
            }
            _ => Auth::None,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_QUERY_TIMEOUT)
    }
}
