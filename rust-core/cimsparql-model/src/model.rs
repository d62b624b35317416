// SPDX-License-Identifier: PMPL-1.0-or-later
//! Typed access to a CIM model held in one or more repositories.
//!
//! A [`Model`] routes every query by the name on its `# Name:` line. A single
//! client model sends everything to one client. A federated model sends the
//! topology, state variable and steady state hypothesis queries to a second
//! client and everything else to the equipment client.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use cimsparql_client::{query_name, SparqlClient, Table, Value};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::schema::{self, TableSchema};
use crate::templates::{self, QueryTemplate};
use crate::type_mapper::{convert_column, Converter, MapOptions, TypeMapper};
use crate::value_mapper::ValueMapper;

/// Query names served by the topology/state client of a federated model.
pub const FEDERATED_QUERIES: &[&str] = &[
    "AC Lines",
    "Base voltage",
    "Branch node withdraw",
    "Bus",
    "Converters",
    "DC Active Power Flow",
    "Disconnected",
    "Exchange",
    "Full model",
    "Loads",
    "Phase tap changer",
    "Power flow",
    "SV branch",
    "Series compensators",
    "SvInjection",
    "Switches",
    "Synchronous machines",
    "Sv power deviation",
    "Transformer branches loss",
    "Transformer branches",
    "Transformer center nodes",
    "Winding transformer angle",
    "Windings",
];

// ---------------------------------------------------------------------------
// Configuration and routing
// ---------------------------------------------------------------------------

/// Repository overrides and post-processing for a [`Model`].
///
/// Value mappers are not serialised.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Repository substituted for `${repo}`; the routed client's URL if unset.
    pub system_state_repo: Option<String>,
    /// Repository substituted for `${eq_repo}`; the routed client's URL if unset.
    pub eq_repo: Option<String>,
    /// Applied in order to every converted table.
    #[serde(skip)]
    pub value_mappers: Vec<Arc<dyn ValueMapper>>,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("system_state_repo", &self.system_state_repo)
            .field("eq_repo", &self.eq_repo)
            .field("value_mappers", &self.value_mappers.len())
            .finish()
    }
}

/// Query name to client table with a default.
#[derive(Clone)]
pub struct ClientRouter {
    default: Arc<dyn SparqlClient>,
    routes: HashMap<String, Arc<dyn SparqlClient>>,
}

impl ClientRouter {
    /// Every query goes to `client`.
    pub fn single(client: Arc<dyn SparqlClient>) -> Self {
        Self {
            default: client,
            routes: HashMap::new(),
        }
    }

    /// Send queries named `name` to `client`.
    pub fn with_route(mut self, name: impl Into<String>, client: Arc<dyn SparqlClient>) -> Self {
        self.routes.insert(name.into(), client);
        self
    }

    pub fn route(&self, name: &str) -> &Arc<dyn SparqlClient> {
        self.routes.get(name).unwrap_or(&self.default)
    }

    pub fn default_client(&self) -> &Arc<dyn SparqlClient> {
        &self.default
    }

    /// Each client once, default first.
    pub fn distinct(&self) -> Vec<Arc<dyn SparqlClient>> {
        let mut out: Vec<Arc<dyn SparqlClient>> = vec![self.default.clone()];
        let mut routed: Vec<_> = self.routes.iter().collect();
        routed.sort_by(|a, b| a.0.cmp(b.0));
        for (_, client) in routed {
            if !out.iter().any(|c| Arc::ptr_eq(c, client)) {
                out.push(client.clone());
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Correlation scope
// ---------------------------------------------------------------------------

/// Tags every request of every client with one correlation id while alive.
///
/// The id is cleared on drop; finish in-flight queries before dropping.
pub struct CorrelationScope<'a> {
    model: &'a Model,
    id: String,
}

impl CorrelationScope<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for CorrelationScope<'_> {
    fn drop(&mut self) {
        for client in self.model.distinct_clients() {
            client.clear_correlation_id();
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

pub struct Model {
    router: ClientRouter,
    config: ModelConfig,
    mapper: TypeMapper,
    cim_version: OnceCell<u32>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("default", &self.router.default.service_url())
            .field("routes", &self.router.routes.len())
            .field("config", &self.config)
            .finish()
    }
}

fn substitutions(pairs: &[(&str, Option<&str>)]) -> HashMap<String, String> {
    pairs
        .iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.to_string())))
        .collect()
}

async fn timed<T, F>(operation: &str, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed().as_secs_f64();
    debug!(operation, elapsed_s = elapsed, "{} took {:.6} seconds", operation, elapsed);
    out
}

impl Model {
    /// Model over `router`. Without a `mapper`, one is built on the client
    /// that serves the type mapper query.
    pub fn new(router: ClientRouter, config: ModelConfig, mapper: Option<TypeMapper>) -> Self {
        let mapper = mapper
            .unwrap_or_else(|| TypeMapper::new(router.route(templates::TYPE_MAPPER.name()).clone()));
        Self {
            router,
            config,
            mapper,
            cim_version: OnceCell::new(),
        }
    }

    pub fn single_client(client: Arc<dyn SparqlClient>, config: ModelConfig) -> Self {
        Self::new(ClientRouter::single(client), config, None)
    }

    /// Equipment queries on `eq_client`, [`FEDERATED_QUERIES`] on `tpsvssh_client`.
    pub fn federated(
        eq_client: Arc<dyn SparqlClient>,
        tpsvssh_client: Arc<dyn SparqlClient>,
        config: ModelConfig,
    ) -> Self {
        let router = FEDERATED_QUERIES
            .iter()
            .fold(ClientRouter::single(eq_client), |router, name| {
                router.with_route(*name, tpsvssh_client.clone())
            });
        Self::new(router, config, None)
    }

    /// Client serving the query named `name`.
    pub fn route(&self, name: &str) -> &Arc<dyn SparqlClient> {
        self.router.route(name)
    }

    pub fn client(&self) -> &Arc<dyn SparqlClient> {
        self.router.default_client()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn mapper(&self) -> &TypeMapper {
        &self.mapper
    }

    pub fn distinct_clients(&self) -> Vec<Arc<dyn SparqlClient>> {
        self.router.distinct()
    }

    /// Set a fresh correlation id on every client until the guard drops.
    pub fn correlation_scope(&self) -> CorrelationScope<'_> {
        let id = Uuid::new_v4().to_string();
        for client in self.distinct_clients() {
            client.set_correlation_id(&id);
        }
        debug!(correlation_id = %id, "entered correlation scope");
        CorrelationScope { model: self, id }
    }

    /// Render `template` for the client it routes to.
    ///
    /// Precedence, lowest first: template defaults, `substitutes`, the
    /// `repo`/`eq_repo` identifiers, the client's prefixes. Unknown
    /// placeholders are left in place.
    pub async fn template_to_query(
        &self,
        template: &QueryTemplate,
        substitutes: &HashMap<String, String>,
    ) -> Result<String> {
        let client = self.route(template.name());
        let url = client.service_url();
        let mut values = substitutes.clone();
        values.insert(
            "repo".to_string(),
            self.config.system_state_repo.clone().unwrap_or_else(|| url.clone()),
        );
        values.insert(
            "eq_repo".to_string(),
            self.config.eq_repo.clone().unwrap_or(url),
        );
        values.extend(client.prefixes().await?);
        Ok(template.safe_substitute(&values))
    }

    /// Run `query` on its client, convert types, apply value mappers and
    /// optionally set `index`. `columns` overrides type ids per column.
    #[instrument(skip(self, query, columns), fields(query = query_name(query)))]
    pub async fn get_table_and_convert(
        &self,
        query: &str,
        index: Option<&str>,
        columns: &HashMap<String, String>,
    ) -> Result<Table> {
        let client = self.route(query_name(query));
        let (table, sample) = client.get_table(query).await?;

        let mut col_map: HashMap<String, String> = sample
            .iter()
            .map(|(column, value)| (column.clone(), value.type_id().to_string()))
            .collect();
        col_map.extend(columns.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut table = self
            .mapper
            .map_data_types(table, &col_map, &MapOptions::default())
            .await?;
        for mapper in &self.config.value_mappers {
            table = mapper.map(table);
        }
        if let Some(index) = index {
            table.set_index(index)?;
        }
        Ok(table)
    }

    async fn fetch(
        &self,
        query: String,
        index: Option<&str>,
        schema: &TableSchema,
    ) -> Result<Table> {
        let table = self
            .get_table_and_convert(&query, index, &HashMap::new())
            .await?;
        schema.validate(table)
    }

    /// CIM schema version from the `cim` prefix (`...cim16#` is 16), 0 if none.
    pub async fn cim_version(&self) -> Result<u32> {
        self.cim_version
            .get_or_try_init(|| async {
                let prefixes = self.client().prefixes().await?;
                Ok::<_, ModelError>(prefixes.get("cim").map_or(0, |cim| parse_cim_version(cim)))
            })
            .await
            .copied()
    }

    /// Whether the type map knows types from the client's `cim` namespace.
    pub async fn maps_data_types(&self) -> Result<bool> {
        let prefixes = self.client().prefixes().await?;
        match prefixes.get("cim") {
            Some(cim) => self.mapper.have_cim_version(cim).await,
            None => Ok(false),
        }
    }

    // -----------------------------------------------------------------------
    // Data operations
    // -----------------------------------------------------------------------

    pub async fn full_model_query(&self) -> Result<String> {
        self.template_to_query(&templates::FULL_MODEL, &HashMap::new()).await
    }

    /// Model headers of the profiles available to the state client.
    pub async fn full_model(&self) -> Result<Table> {
        timed("full_model", async {
            self.fetch(self.full_model_query().await?, None, &schema::FULL_MODEL)
                .await
        })
        .await
    }

    pub async fn market_dates_query(&self) -> Result<String> {
        self.template_to_query(&templates::MARKET_DATES, &HashMap::new()).await
    }

    pub async fn market_dates(&self) -> Result<Table> {
        timed("market_dates", async {
            self.fetch(self.market_dates_query().await?, Some("mrid"), &schema::MARKET_DATES)
                .await
        })
        .await
    }

    pub async fn bus_data_query(&self, region: Option<&str>) -> Result<String> {
        self.template_to_query(&templates::BUS, &substitutions(&[("region", region)]))
            .await
    }

    pub async fn transformer_center_nodes_query(&self, region: Option<&str>) -> Result<String> {
        self.template_to_query(
            &templates::TRANSFORMER_CENTER_NODES,
            &substitutions(&[("region", region)]),
        )
        .await
    }

    /// Center nodes of three-winding transformers, shaped like bus data.
    pub async fn transformer_center_nodes(&self, region: Option<&str>) -> Result<Table> {
        timed("transformer_center_nodes", async {
            self.fetch(
                self.transformer_center_nodes_query(region).await?,
                Some("node"),
                &schema::BUS,
            )
            .await
        })
        .await
    }

    /// Topological nodes, plus transformer center nodes, indexed by node.
    ///
    /// `region` is a regular expression on the region name; all regions if unset.
    pub async fn bus_data(&self, region: Option<&str>) -> Result<Table> {
        timed("bus_data", async {
            let query = self.bus_data_query(region).await?;
            let buses = self
                .get_table_and_convert(&query, Some("node"), &HashMap::new())
                .await?;
            let centers = self.transformer_center_nodes(region).await?;
            schema::BUS.validate(Table::concat(&[buses, centers])?)
        })
        .await
    }

    pub async fn loads_query(&self, region: Option<&str>) -> Result<String> {
        self.template_to_query(&templates::LOADS, &substitutions(&[("region", region)]))
            .await
    }

    /// Loads indexed by mrid.
    pub async fn loads(&self, region: Option<&str>) -> Result<Table> {
        timed("loads", async {
            self.fetch(self.loads_query(region).await?, Some("mrid"), &schema::LOADS)
                .await
        })
        .await
    }

    pub async fn base_voltage_query(&self) -> Result<String> {
        self.template_to_query(&templates::BASE_VOLTAGE, &HashMap::new()).await
    }

    pub async fn base_voltage(&self) -> Result<Table> {
        timed("base_voltage", async {
            self.fetch(self.base_voltage_query().await?, None, &schema::BASE_VOLTAGE)
                .await
        })
        .await
    }

    pub async fn substation_voltage_level_query(&self) -> Result<String> {
        self.template_to_query(&templates::SUBSTATION_VOLTAGE_LEVEL, &HashMap::new())
            .await
    }

    pub async fn substation_voltage_level(&self) -> Result<Table> {
        timed("substation_voltage_level", async {
            self.fetch(
                self.substation_voltage_level_query().await?,
                Some("substation"),
                &schema::SUBSTATION_VOLTAGE,
            )
            .await
        })
        .await
    }

    pub async fn connectivity_nodes_query(&self, region: Option<&str>) -> Result<String> {
        self.template_to_query(
            &templates::CONNECTIVITY_NODES,
            &substitutions(&[("region", region)]),
        )
        .await
    }

    pub async fn connectivity_nodes(&self, region: Option<&str>) -> Result<Table> {
        timed("connectivity_nodes", async {
            self.fetch(
                self.connectivity_nodes_query(region).await?,
                Some("mrid"),
                &schema::CONNECTIVITY_NODE,
            )
            .await
        })
        .await
    }

    pub async fn regions_query(&self) -> Result<String> {
        self.template_to_query(&templates::REGIONS, &HashMap::new()).await
    }

    pub async fn regions(&self) -> Result<Table> {
        timed("regions", async {
            self.fetch(self.regions_query().await?, Some("mrid"), &schema::REGIONS)
                .await
        })
        .await
    }

    pub async fn dc_active_flow_query(&self, region: Option<&str>) -> Result<String> {
        self.template_to_query(
            &templates::DC_ACTIVE_POWER_FLOW,
            &substitutions(&[("region", region)]),
        )
        .await
    }

    /// Active power flow per DC converter, signed by terminal direction.
    ///
    /// Keeps the row with the largest `p` per mrid (the first one on ties).
    pub async fn dc_active_flow(&self, region: Option<&str>) -> Result<Table> {
        timed("dc_active_flow", async {
            let query = self.dc_active_flow_query(region).await?;
            let table = self
                .get_table_and_convert(&query, None, &HashMap::new())
                .await?;
            schema::DC_ACTIVE_FLOW.validate(signed_max_flow(table)?)
        })
        .await
    }

    pub async fn add_mrid_query(&self, rdf_type: Option<&str>, graph: Option<&str>) -> Result<String> {
        self.template_to_query(
            &templates::ADD_MRID,
            &substitutions(&[("rdf_type", rdf_type), ("g", graph)]),
        )
        .await
    }

    /// Add `cim:IdentifiedObject.mRID` to resources lacking one, derived from
    /// the resource IRI.
    ///
    /// `rdf_type` and `graph` are SPARQL terms (`cim:ACLineSegment`,
    /// `<urn:graph>`); unset means any type and any named graph. Runs on
    /// `client`, or the default client.
    #[instrument(skip(self, client))]
    pub async fn add_mrid(
        &self,
        rdf_type: Option<&str>,
        graph: Option<&str>,
        client: Option<&dyn SparqlClient>,
    ) -> Result<()> {
        let query = self.add_mrid_query(rdf_type, graph).await?;
        let client = client.unwrap_or_else(|| self.client().as_ref());
        client.update_query(&query).await?;
        Ok(())
    }
}

fn parse_cim_version(cim: &str) -> u32 {
    cim.match_indices("cim")
        .find_map(|(pos, _)| {
            let digits: String = cim[pos + 3..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        })
        .unwrap_or(0)
}

/// Per mrid keep the row with maximal `p`, multiply `p` by `direction` and
/// drop `direction`. Rows come out ordered by mrid.
fn signed_max_flow(mut table: Table) -> Result<Table> {
    convert_column(&mut table, "p", &Converter::Float)?;
    convert_column(&mut table, "direction", &Converter::Float)?;

    let mrids = table
        .column("mrid")
        .ok_or_else(|| ModelError::Schema {
            schema: schema::DC_ACTIVE_FLOW.name,
            reason: "missing column 'mrid'".to_string(),
        })?;
    let p = table.column("p").unwrap_or_default();

    let mut best: BTreeMap<String, usize> = BTreeMap::new();
    for (row, mrid) in mrids.iter().enumerate() {
        let value = p.get(row).and_then(Value::as_f64);
        best.entry(mrid.key())
            .and_modify(|current| {
                let current_p = p.get(*current).and_then(Value::as_f64);
                if let Some(value) = value {
                    if current_p.map_or(true, |c| value > c) {
                        *current = row;
                    }
                }
            })
            .or_insert(row);
    }
    let rows: Vec<usize> = best.into_values().collect();
    let mut table = table.take_rows(&rows);

    let direction = table.drop_column("direction").unwrap_or_default();
    if let Some(p) = table.column_mut("p") {
        for (value, sign) in p.iter_mut().zip(direction.iter().chain(std::iter::repeat(&Value::Float(1.0)))) {
            if let (Some(v), Some(s)) = (value.as_f64(), sign.as_f64()) {
                *value = Value::Float(v * s);
            }
        }
    }
    table.set_index("mrid")?;
    Ok(table)
}
