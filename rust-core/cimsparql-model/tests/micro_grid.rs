// SPDX-License-Identifier: PMPL-1.0-or-later
//! Model operations against the embedded store loaded with a small grid.

#![cfg(feature = "oxigraph-backend")]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cimsparql_client::client::PrefixCache;
use cimsparql_client::error::Result as ClientResult;
use cimsparql_client::{
    LocalClient, RdfContent, RdfFormat, ResultModel, SparqlClient, UploadParams, Value,
};
use cimsparql_model::{Model, ModelConfig, MridMapper, ValueMapper, FEDERATED_QUERIES};

const MICRO_GRID: &str = include_str!("data/micro_grid.ttl");

async fn local_client() -> Arc<LocalClient> {
    let client = LocalClient::new()
        .unwrap()
        .strip_service_specifier(true)
        .unwrap();
    client
        .upload_rdf(MICRO_GRID.into(), RdfFormat::Turtle, &UploadParams::default())
        .await
        .unwrap();
    Arc::new(client)
}

async fn micro_grid_model() -> Model {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("cimsparql_model=debug")
        .try_init();
    Model::single_client(local_client().await, ModelConfig::default())
}

fn strings(values: &[Value]) -> HashSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_bus_data_has_two_nodes() {
    let model = micro_grid_model().await;
    let bus = model.bus_data(None).await.unwrap();
    assert_eq!(bus.len(), 2);

    let index = bus.index().unwrap();
    assert_eq!(index.name, "node");
    assert_eq!(strings(&index.values), HashSet::from(["tn1".to_string(), "tn2".to_string()]));

    assert!(bus.column("un").unwrap().iter().all(|v| *v == Value::Float(380.0)));
    let swing: Vec<_> = bus.column("is_swing_bus").unwrap().to_vec();
    assert_eq!(swing.iter().filter(|v| **v == Value::Bool(true)).count(), 1);
    assert!(bus.column("bidzone").unwrap().iter().all(Value::is_null));
}

#[tokio::test]
async fn test_bus_data_region_filter() {
    let model = micro_grid_model().await;
    assert_eq!(model.bus_data(Some("NL")).await.unwrap().len(), 2);
    assert!(model.bus_data(Some("^NO$")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_loads() {
    let model = micro_grid_model().await;
    let loads = model.loads(None).await.unwrap();
    assert_eq!(loads.len(), 3);
    assert_eq!(
        strings(loads.column("name").unwrap()),
        HashSet::from(["NL-Load_1".to_string(), "NL-Load_2".to_string(), "NL-Load_3".to_string()])
    );

    let index = &loads.index().unwrap().values;
    let row = |mrid: &str| index.iter().position(|v| v.as_str() == Some(mrid)).unwrap();
    assert_eq!(loads.get(row("load1"), "p"), Some(&Value::Float(120.5)));
    assert_eq!(loads.get(row("load1"), "station_group"), Some(&Value::from("Residential")));
    assert_eq!(loads.get(row("load2"), "status"), Some(&Value::Bool(false)));
    assert_eq!(loads.get(row("load3"), "status"), Some(&Value::Bool(true)));
    assert_eq!(loads.get(row("load3"), "p"), Some(&Value::Null));
}

#[tokio::test]
async fn test_reference_tables() {
    let model = micro_grid_model().await;

    let full_model = model.full_model().await.unwrap();
    assert_eq!(full_model.len(), 1);
    assert_eq!(full_model.get(0, "version"), Some(&Value::from("1")));

    let base_voltage = model.base_voltage().await.unwrap();
    assert_eq!(base_voltage.len(), 1);
    assert_eq!(base_voltage.get(0, "un"), Some(&Value::Float(380.0)));
    let operating = base_voltage.get(0, "operating_voltage").and_then(Value::as_f64).unwrap();
    assert!((operating - 381.2).abs() < 1e-3);

    let levels = model.substation_voltage_level().await.unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels.index().unwrap().name, "substation");

    let nodes = model.connectivity_nodes(None).await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes
        .column("container_type")
        .unwrap()
        .iter()
        .all(|v| v.as_str() == Some("VoltageLevel")));

    let regions = model.regions().await.unwrap();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions.get(0, "region"), Some(&Value::from("NL")));
    assert_eq!(regions.get(0, "short_name"), Some(&Value::from("NLW")));
    assert_eq!(regions.get(0, "alias_name"), Some(&Value::Null));

    let markets = model.market_dates().await.unwrap();
    assert_eq!(markets.len(), 1);
    assert!(matches!(markets.get(0, "activation_date"), Some(Value::DateTime(_))));
}

#[tokio::test]
async fn test_dc_active_flow_keeps_max_and_signs() {
    let model = micro_grid_model().await;
    let flow = model.dc_active_flow(None).await.unwrap();
    assert_eq!(flow.len(), 1);
    assert_eq!(flow.index().unwrap().values, vec![Value::from("conv1")]);
    assert_eq!(flow.column("p").unwrap(), &[Value::Float(50.0)]);
    assert!(!flow.has_column("direction"));
}

#[tokio::test]
async fn test_cim_version_and_type_map() {
    let model = micro_grid_model().await;
    assert_eq!(model.cim_version().await.unwrap(), 16);
    assert!(model.maps_data_types().await.unwrap());
}

#[tokio::test]
async fn test_template_to_query_substitutes_repos_and_prefixes() {
    let client = local_client().await;
    let config = ModelConfig {
        eq_repo: Some("http://eq.example.org/repo".into()),
        ..Default::default()
    };
    let model = Model::single_client(client, config);
    let query = model.bus_data_query(Some("NO")).await.unwrap();
    assert!(query.starts_with("# Name: Bus\n"));
    assert!(query.contains("SERVICE <http://eq.example.org/repo>"));
    assert!(query.contains("PREFIX cim:<http://iec.ch/TC57/2013/CIM-schema-cim16#>"));
    assert!(query.contains("regex(?region_name, \"NO\")"));
    assert!(!query.contains("${"));
}

#[tokio::test]
async fn test_add_mrid_on_named_graph() {
    let client = LocalClient::new().unwrap();
    let params = UploadParams {
        graph: Some("urn:graph:eq".into()),
        ..Default::default()
    };
    let data = r#"
        @prefix cim: <http://iec.ch/TC57/2013/CIM-schema-cim16#> .
        <http://example.org/grid#_line1> a cim:ACLineSegment .
        <urn:uuid:line2> a cim:ACLineSegment .
        <http://example.org/grid#_sw1> a cim:Breaker .
    "#;
    client
        .upload_rdf(RdfContent::from(data), RdfFormat::Turtle, &params)
        .await
        .unwrap();
    let model = Model::single_client(Arc::new(client), ModelConfig::default());

    model
        .add_mrid(Some("cim:ACLineSegment"), Some("<urn:graph:eq>"), None)
        .await
        .unwrap();

    let (table, _) = model
        .client()
        .get_table(
            "select ?mrid where { graph <urn:graph:eq> { ?s cim:IdentifiedObject.mRID ?mrid } } order by ?mrid",
        )
        .await
        .unwrap();
    assert_eq!(
        table.column("mrid").unwrap(),
        &[Value::from("line1"), Value::from("line2")]
    );
}

#[tokio::test]
async fn test_mrid_mapper_runs_before_index() {
    let client = local_client().await;
    let config = ModelConfig {
        value_mappers: vec![Arc::new(MridMapper::new().unwrap()) as Arc<dyn ValueMapper>],
        ..Default::default()
    };
    let model = Model::single_client(client, config);
    let query = "# Name: Island members\nselect ?node_mrid ?name where { ?node_mrid a cim:TopologicalNode ; cim:IdentifiedObject.name ?name }";
    let table = model
        .get_table_and_convert(query, Some("node_mrid"), &HashMap::new())
        .await
        .unwrap();
    assert_eq!(
        strings(&table.index().unwrap().values),
        HashSet::from(["tn1".to_string(), "tn2".to_string()])
    );
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Records the queries it receives and answers with an empty table.
struct Recording {
    label: &'static str,
    seen: Arc<Mutex<Vec<(String, String)>>>,
    correlation: Mutex<Option<String>>,
    prefixes: PrefixCache,
}

impl Recording {
    fn new(label: &'static str, seen: Arc<Mutex<Vec<(String, String)>>>) -> Self {
        Self {
            label,
            seen,
            correlation: Mutex::new(None),
            prefixes: PrefixCache::default(),
        }
    }
}

#[async_trait]
impl SparqlClient for Recording {
    fn backend_name(&self) -> String {
        "recording".into()
    }

    fn service_url(&self) -> String {
        format!("http://{}.example.org/repo", self.label)
    }

    fn prefix_cache(&self) -> &PrefixCache {
        &self.prefixes
    }

    async fn execute_query(&self, query: &str) -> ClientResult<ResultModel> {
        let name = cimsparql_client::query_name(query).to_string();
        self.seen.lock().unwrap().push((self.label.to_string(), name));
        Ok(ResultModel::empty())
    }

    async fn get_prefixes(&self) -> ClientResult<HashMap<String, String>> {
        Ok(cimsparql_client::namespaces::default_namespaces())
    }

    async fn upload_rdf(&self, _: RdfContent, _: RdfFormat, _: &UploadParams) -> ClientResult<()> {
        Ok(())
    }

    async fn update_query(&self, query: &str) -> ClientResult<()> {
        self.execute_query(query).await.map(|_| ())
    }

    async fn delete_repo(&self) -> ClientResult<()> {
        Ok(())
    }

    async fn get_namespace(&self, prefix: &str) -> ClientResult<String> {
        Ok(prefix.to_string())
    }

    async fn set_namespace(&self, _: &str, _: &str) -> ClientResult<()> {
        Ok(())
    }

    fn set_correlation_id(&self, id: &str) {
        *self.correlation.lock().unwrap() = Some(id.to_string());
    }

    fn clear_correlation_id(&self) {
        *self.correlation.lock().unwrap() = None;
    }
}

#[tokio::test]
async fn test_federated_routing() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let eq = Arc::new(Recording::new("eq", seen.clone()));
    let tp = Arc::new(Recording::new("tp", seen.clone()));
    let model = Model::federated(eq.clone(), tp.clone(), ModelConfig::default());

    assert_eq!(model.route("Loads").service_url(), tp.service_url());
    assert_eq!(model.route("Regions").service_url(), eq.service_url());
    assert_eq!(model.route("Type mapper").service_url(), eq.service_url());
    assert_eq!(model.distinct_clients().len(), 2);
    assert!(FEDERATED_QUERIES.contains(&"Bus"));

    // Empty answers fail index checks; only the routing matters here.
    let _ = model.loads(None).await;
    let _ = model.regions().await;
    let seen = seen.lock().unwrap().clone();
    assert!(seen.contains(&("tp".to_string(), "Loads".to_string())));
    assert!(seen.contains(&("eq".to_string(), "Regions".to_string())));
    assert!(!seen.iter().any(|(label, name)| label == "eq" && name == "Loads"));
}

#[tokio::test]
async fn test_federated_query_uses_routed_client_url() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let eq = Arc::new(Recording::new("eq", seen.clone()));
    let tp = Arc::new(Recording::new("tp", seen));
    let config = ModelConfig {
        eq_repo: Some(eq.service_url()),
        ..Default::default()
    };
    let model = Model::federated(eq, tp, config);
    let query = model.loads_query(None).await.unwrap();
    assert!(query.contains("SERVICE <http://eq.example.org/repo>"));
}

#[tokio::test]
async fn test_correlation_scope_sets_and_clears() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let eq = Arc::new(Recording::new("eq", seen.clone()));
    let tp = Arc::new(Recording::new("tp", seen));
    let model = Model::federated(eq.clone(), tp.clone(), ModelConfig::default());

    {
        let scope = model.correlation_scope();
        let id = scope.id().to_string();
        assert_eq!(id.len(), 36);
        assert_eq!(eq.correlation.lock().unwrap().as_deref(), Some(id.as_str()));
        assert_eq!(tp.correlation.lock().unwrap().as_deref(), Some(id.as_str()));
    }
    assert!(eq.correlation.lock().unwrap().is_none());
    assert!(tp.correlation.lock().unwrap().is_none());
}
