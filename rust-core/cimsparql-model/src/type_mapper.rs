// SPDX-License-Identifier: PMPL-1.0-or-later
//! SPARQL datatype resolution and column coercion.
//!
//! The [`TypeMapper`] owns a map from SPARQL type identifiers (binding kinds
//! such as `literal`, datatype URIs such as `xsd:float`, and CIM value types
//! read from the backend ontology) to a [`Converter`]. The map is built once,
//! on first use, and then only read.
//!
//! Coercion runs in two passes. Castable columns (integers and floats) are
//! converted first and fail hard on bad input. Every other converter is then
//! applied element by element.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use cimsparql_client::{SparqlClient, Table, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{ModelError, Result};
use crate::templates;

/// Textual null marker some backends emit for unbound numeric values.
pub const NONE_SENTINEL: &str = "None";

/// Element-wise converter for [`Converter::Custom`].
pub type ConvertFn = Arc<dyn Fn(&str) -> std::result::Result<Value, String> + Send + Sync>;

/// Native target of a column.
#[derive(Clone)]
pub enum Converter {
    /// Keep the text, nulls stay null.
    Str,
    Int,
    Float,
    /// `true`/`1` in any case is true, everything else false.
    Bool,
    /// Decimals are read as floats.
    Decimal,
    Date,
    DateTime,
    Time,
    /// ISO-8601 duration without years or months.
    Duration,
    Custom(&'static str, ConvertFn),
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PartialEq for Converter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Converter::Custom(a, f), Converter::Custom(b, g)) => a == b && Arc::ptr_eq(f, g),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Converter {
    pub fn name(&self) -> &'static str {
        match self {
            Converter::Str => "string",
            Converter::Int => "integer",
            Converter::Float => "float",
            Converter::Bool => "boolean",
            Converter::Decimal => "decimal",
            Converter::Date => "date",
            Converter::DateTime => "dateTime",
            Converter::Time => "time",
            Converter::Duration => "duration",
            Converter::Custom(name, _) => name,
        }
    }

    /// Whether the column is converted in the bulk pass.
    pub fn is_castable(&self) -> bool {
        matches!(self, Converter::Int | Converter::Float)
    }

    /// Custom converter from a closure.
    pub fn custom<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Converter::Custom(name, Arc::new(f))
    }

    /// Convert one cell. Nulls stay null; cells that are not text pass through.
    pub fn convert(&self, value: Value) -> std::result::Result<Value, String> {
        let text = match value {
            Value::Str(text) => text,
            other => return Ok(other),
        };
        if text == NONE_SENTINEL && !matches!(self, Converter::Str) {
            return Ok(Value::Null);
        }
        let trimmed = text.trim();
        match self {
            Converter::Str => Ok(Value::Str(text)),
            Converter::Int => trimmed
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| text.clone()),
            Converter::Float | Converter::Decimal => parse_float(trimmed)
                .map(Value::Float)
                .ok_or_else(|| text.clone()),
            Converter::Bool => Ok(Value::Bool(parse_bool(trimmed))),
            Converter::Date => parse_date(trimmed).map(Value::Date).ok_or_else(|| text.clone()),
            Converter::DateTime => parse_datetime(trimmed)
                .map(Value::DateTime)
                .ok_or_else(|| text.clone()),
            Converter::Time => parse_time(trimmed).map(Value::Time).ok_or_else(|| text.clone()),
            Converter::Duration => parse_duration(trimmed)
                .map(Value::Duration)
                .ok_or_else(|| text.clone()),
            Converter::Custom(_, f) => f(&text),
        }
    }
}

// ---------------------------------------------------------------------------
// Literal parsers
// ---------------------------------------------------------------------------

/// XSD `INF`/`-INF`/`NaN` are accepted along with the usual decimal forms.
pub fn parse_float(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        _ => s.parse().ok(),
    }
}

pub fn parse_bool(s: &str) -> bool {
    s.eq_ignore_ascii_case("true") || s == "1"
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| s.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Timestamps without an offset are taken as UTC. A bare date is midnight.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Time of day; a trailing `Z` or numeric offset is dropped.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = match s.rfind(['+', '-']) {
        Some(pos) if pos >= 8 => &s[..pos],
        _ => s,
    };
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// ISO-8601 duration such as `P3DT5H20M30.123S` or `-P365D`.
///
/// Years and months have no fixed length and are rejected.
pub fn parse_duration(s: &str) -> Option<chrono::Duration> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let rest = rest.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };
    if date_part.is_empty() && time_part.map_or(true, str::is_empty) {
        return None;
    }

    let mut seconds = 0.0;
    for (amount, unit) in duration_components(date_part)? {
        seconds += amount
            * match unit {
                'W' => 7.0 * 86_400.0,
                'D' => 86_400.0,
                _ => return None,
            };
    }
    if let Some(time) = time_part {
        if time.is_empty() {
            return None;
        }
        for (amount, unit) in duration_components(time)? {
            seconds += amount
                * match unit {
                    'H' => 3_600.0,
                    'M' => 60.0,
                    'S' => 1.0,
                    _ => return None,
                };
        }
    }

    let micros = (seconds * 1_000_000.0).round() as i64;
    let duration = chrono::Duration::microseconds(micros);
    Some(if negative { -duration } else { duration })
}

fn duration_components(s: &str) -> Option<Vec<(f64, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (pos, c) in s.char_indices() {
        if c.is_ascii_digit() || c == '.' {
            continue;
        }
        let amount: f64 = s[start..pos].parse().ok()?;
        out.push((amount, c));
        start = pos + c.len_utf8();
    }
    (start == s.len()).then_some(out)
}

// ---------------------------------------------------------------------------
// Type tables
// ---------------------------------------------------------------------------

/// XSD primitive types by local name.
pub fn xsd_types() -> Vec<(&'static str, Converter)> {
    vec![
        ("string", Converter::Str),
        ("boolean", Converter::Bool),
        ("date", Converter::Date),
        ("dateTime", Converter::DateTime),
        ("decimal", Converter::Decimal),
        ("double", Converter::Float),
        ("duration", Converter::Duration),
        ("float", Converter::Float),
        ("integer", Converter::Int),
        ("time", Converter::Time),
    ]
}

/// CIM primitive types by local name.
pub fn cim_types() -> Vec<(&'static str, Converter)> {
    vec![
        ("String", Converter::Str),
        ("Integer", Converter::Int),
        ("Boolean", Converter::Bool),
        ("Float", Converter::Float),
        ("Date", Converter::Date),
    ]
}

/// Binding kinds reported in SPARQL JSON results.
pub fn sparql_kinds() -> HashMap<String, Converter> {
    ["literal", "uri"]
        .into_iter()
        .map(|kind| (kind.to_string(), Converter::Str))
        .collect()
}

/// Primitive type map keyed by full URI, for the `xsd` and `cim` namespaces
/// present in `prefixes`.
pub fn build_type_map(prefixes: &HashMap<String, String>) -> HashMap<String, Converter> {
    let mut map = HashMap::new();
    for (prefix, types) in [("xsd", xsd_types()), ("cim", cim_types())] {
        let Some(uri) = prefixes.get(prefix) else {
            continue;
        };
        for (name, converter) in types {
            map.insert(format!("{uri}{name}"), converter);
        }
    }
    map
}

/// Resolve the ontology query rows `(sparql_type, range, prefix)` against the
/// primitive map.
///
/// The range is looked up directly first, then as `prefix + local name` for
/// ontologies that declare ranges in their own namespace. The first row wins
/// for a repeated type; unknown ranges become strings.
fn ontology_map(
    table: &Table,
    prim: &HashMap<String, Converter>,
) -> HashMap<String, Converter> {
    let (Some(types), Some(ranges)) = (table.column("sparql_type"), table.column("range")) else {
        return HashMap::new();
    };
    let prefixes = table.column("prefix");

    let mut map = HashMap::new();
    for (row, (sparql_type, range)) in types.iter().zip(ranges).enumerate() {
        let (Some(sparql_type), Some(range)) = (sparql_type.as_str(), range.as_str()) else {
            continue;
        };
        if map.contains_key(sparql_type) {
            continue;
        }
        let qualified = prefixes
            .and_then(|p| p[row].as_str())
            .filter(|p| !p.is_empty())
            .map(|p| format!("{p}{}", local_name(range)));
        let converter = prim
            .get(range)
            .or_else(|| qualified.as_ref().and_then(|q| prim.get(q)))
            .cloned()
            .unwrap_or(Converter::Str);
        map.insert(sparql_type.to_string(), converter);
    }
    map
}

fn local_name(uri: &str) -> &str {
    uri.rsplit(['#', '/']).next().unwrap_or(uri)
}

// ---------------------------------------------------------------------------
// TypeMapper
// ---------------------------------------------------------------------------

/// Per-call coercion options.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    /// Converters forced for given columns, ahead of the type map.
    pub overrides: HashMap<String, Converter>,
    /// Leave columns with an unknown type id untouched without a warning.
    pub drop_missing: bool,
}

/// Lazily built SPARQL type map plus the coercion routine using it.
pub struct TypeMapper {
    client: Arc<dyn SparqlClient>,
    custom_additions: HashMap<String, Converter>,
    map: OnceCell<HashMap<String, Converter>>,
}

impl fmt::Debug for TypeMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapper")
            .field("backend", &self.client.backend_name())
            .field("custom_additions", &self.custom_additions)
            .field("built", &self.map.initialized())
            .finish()
    }
}

impl TypeMapper {
    pub fn new(client: Arc<dyn SparqlClient>) -> Self {
        Self::with_additions(client, HashMap::new())
    }

    /// Mapper whose `additions` override everything read from the backend.
    pub fn with_additions(
        client: Arc<dyn SparqlClient>,
        additions: HashMap<String, Converter>,
    ) -> Self {
        Self {
            client,
            custom_additions: additions,
            map: OnceCell::new(),
        }
    }

    /// The merged type map, built on first call.
    pub async fn map(&self) -> Result<&HashMap<String, Converter>> {
        self.map.get_or_try_init(|| self.build()).await
    }

    async fn build(&self) -> Result<HashMap<String, Converter>> {
        let prefixes = self.client.prefixes().await?;
        let prim = build_type_map(&prefixes);
        let query = templates::TYPE_MAPPER.safe_substitute(&prefixes);
        let (table, _) = self.client.get_table(&query).await?;
        let ontology = ontology_map(&table, &prim);
        debug!(
            ontology_types = ontology.len(),
            primitive_types = prim.len(),
            "built type map"
        );

        let mut map = sparql_kinds();
        map.extend(ontology);
        map.extend(prim);
        map.extend(self.custom_additions.clone());
        Ok(map)
    }

    /// Whether any known type lives in the `cim` namespace `cim`.
    pub async fn have_cim_version(&self, cim: &str) -> Result<bool> {
        Ok(self.map().await?.keys().any(|key| key.contains(cim)))
    }

    /// Coerce `table` columns according to `col_map` (column to type id).
    pub async fn map_data_types(
        &self,
        mut table: Table,
        col_map: &HashMap<String, String>,
        options: &MapOptions,
    ) -> Result<Table> {
        if table.is_empty() {
            return Ok(table);
        }
        let map = self.map().await?;

        let mut casters: Vec<(&str, Converter)> = Vec::new();
        let mut columns: Vec<&String> = col_map.keys().collect();
        columns.sort();
        for column in columns {
            if let Some(converter) = options.overrides.get(column) {
                casters.push((column, converter.clone()));
                continue;
            }
            let type_id = &col_map[column];
            match map.get(type_id) {
                Some(converter) => casters.push((column, converter.clone())),
                None if options.drop_missing => {}
                None => warn!(column = %column, type_id = %type_id, "no converter for column type"),
            }
        }
        casters.sort_by_key(|(_, converter)| !converter.is_castable());

        for (column, converter) in casters {
            convert_column(&mut table, column, &converter)?;
        }
        Ok(table)
    }
}

/// Apply `converter` to every cell of `column`; missing columns are skipped.
pub fn convert_column(table: &mut Table, column: &str, converter: &Converter) -> Result<()> {
    let Some(values) = table.column_mut(column) else {
        return Ok(());
    };
    for cell in values.iter_mut() {
        let value = std::mem::replace(cell, Value::Null);
        *cell = converter
            .convert(value)
            .map_err(|value| ModelError::TypeCoercion {
                column: column.to_string(),
                value,
                target: converter.name(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cimsparql_client::namespaces::{default_namespaces, CIM16, XSD};

    fn table(column: &str, values: &[&str]) -> Table {
        Table::from_columns(vec![(
            column.to_string(),
            values.iter().map(|v| Value::from(*v)).collect(),
        )])
        .unwrap()
    }

    #[test]
    fn test_bool_case_variants() {
        let mut t = table("flag", &["true", "false", "True", "1"]);
        convert_column(&mut t, "flag", &Converter::Bool).unwrap();
        assert_eq!(
            t.column("flag").unwrap(),
            &[
                Value::Bool(true),
                Value::Bool(false),
                Value::Bool(true),
                Value::Bool(true)
            ]
        );
    }

    #[test]
    fn test_none_sentinel_is_null_for_numbers() {
        let mut t = table("p", &["1.5", "None", "-2"]);
        convert_column(&mut t, "p", &Converter::Float).unwrap();
        assert_eq!(
            t.column("p").unwrap(),
            &[Value::Float(1.5), Value::Null, Value::Float(-2.0)]
        );

        let mut t = table("name", &["None"]);
        convert_column(&mut t, "name", &Converter::Str).unwrap();
        assert_eq!(t.column("name").unwrap(), &[Value::from("None")]);
    }

    #[test]
    fn test_castable_failure_names_column() {
        let mut t = table("p", &["1.0", "abc"]);
        let err = convert_column(&mut t, "p", &Converter::Float).unwrap_err();
        match err {
            ModelError::TypeCoercion { column, value, target } => {
                assert_eq!(column, "p");
                assert_eq!(value, "abc");
                assert_eq!(target, "float");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_durations() {
        let d = parse_duration("P3DT5H20M30.123S").unwrap();
        assert_eq!(
            d,
            chrono::Duration::days(3)
                + chrono::Duration::hours(5)
                + chrono::Duration::minutes(20)
                + chrono::Duration::milliseconds(30_123)
        );
        assert_eq!(parse_duration("-P365D").unwrap(), -chrono::Duration::days(365));
        assert_eq!(parse_duration("PT15M").unwrap(), chrono::Duration::minutes(15));
        assert!(parse_duration("P1Y").is_none());
        assert!(parse_duration("P2M").is_none());
        assert!(parse_duration("P").is_none());
        assert!(parse_duration("PT").is_none());
        assert!(parse_duration("P3").is_none());
    }

    #[test]
    fn test_dates_and_times() {
        let dt = parse_datetime("2022-02-21T10:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2022-02-21T10:00:00+00:00");
        let naive = parse_datetime("2022-02-21T10:00:00.5").unwrap();
        assert_eq!(naive.timestamp_millis() % 1000, 500);
        assert!(parse_datetime("2022-02-21").is_some());
        assert_eq!(
            parse_date("2022-02-21T00:00:00Z"),
            NaiveDate::from_ymd_opt(2022, 2, 21)
        );
        assert_eq!(parse_time("12:30:00Z"), NaiveTime::from_hms_opt(12, 30, 0));
        assert_eq!(parse_time("12:30:00+01:00"), NaiveTime::from_hms_opt(12, 30, 0));
        assert!(parse_time("noon").is_none());
    }

    #[test]
    fn test_build_type_map_uses_declared_namespaces() {
        let map = build_type_map(&default_namespaces());
        assert_eq!(map[&format!("{XSD}boolean")], Converter::Bool);
        assert_eq!(map[&format!("{CIM16}Float")], Converter::Float);
        assert_eq!(map[&format!("{CIM16}Boolean")], Converter::Bool);

        let only_xsd: HashMap<_, _> = [("xsd".to_string(), XSD.to_string())].into();
        let map = build_type_map(&only_xsd);
        assert_eq!(map.len(), xsd_types().len());
        assert!(map.keys().all(|k| k.starts_with(XSD)));
    }

    #[test]
    fn test_ontology_rows() {
        let prim = build_type_map(&default_namespaces());
        let t = Table::from_columns(vec![
            (
                "sparql_type".into(),
                vec![
                    Value::from(format!("{CIM16}ActivePower").as_str()),
                    Value::from(format!("{CIM16}Voltage").as_str()),
                    Value::from(format!("{CIM16}ActivePower").as_str()),
                    Value::from("http://example.org/ext#Code"),
                ],
            ),
            (
                "range".into(),
                vec![
                    Value::from(format!("{CIM16}Float").as_str()),
                    Value::from("http://other.org/schema#Float"),
                    Value::from(format!("{XSD}string").as_str()),
                    Value::from("http://example.org/ext#Unknown"),
                ],
            ),
            (
                "prefix".into(),
                vec![
                    Value::from(CIM16),
                    Value::from(CIM16),
                    Value::from(CIM16),
                    Value::Null,
                ],
            ),
        ])
        .unwrap();
        let map = ontology_map(&t, &prim);
        assert_eq!(map[&format!("{CIM16}ActivePower")], Converter::Float);
        assert_eq!(map[&format!("{CIM16}Voltage")], Converter::Float);
        assert_eq!(map["http://example.org/ext#Code"], Converter::Str);
    }

    #[test]
    fn test_custom_converter() {
        let upper = Converter::custom("upper", |s| Ok(Value::Str(s.to_uppercase())));
        assert!(!upper.is_castable());
        assert_eq!(upper.convert(Value::from("ab")).unwrap(), Value::from("AB"));
        assert_eq!(upper.convert(Value::Null).unwrap(), Value::Null);
    }
}
