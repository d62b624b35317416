// SPDX-License-Identifier: PMPL-1.0-or-later
//! Column contracts for the tables returned by [`crate::Model`].
//!
//! Validation coerces each declared column to its kind, then checks presence,
//! nullability and uniqueness. Undeclared columns are kept as they are.

use std::collections::HashSet;

use cimsparql_client::{Table, Value};

use crate::error::{ModelError, Result};
use crate::type_mapper::{parse_datetime, parse_float};

/// Target kind of a schema column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Float,
    Int,
    Bool,
    DateTime,
}

/// One column of a [`TableSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            unique: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Shape contract of a returned table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    /// Expected index, if the table is indexed.
    pub index: Option<FieldSpec>,
    pub fields: &'static [FieldSpec],
}

impl TableSchema {
    /// Coerce and check `table` against this schema.
    pub fn validate(&self, mut table: Table) -> Result<Table> {
        if let Some(spec) = &self.index {
            let index = match table.index_mut() {
                Some(index) if index.name == spec.name => index,
                Some(index) => {
                    return Err(self.error(format!(
                        "expected index '{}', found '{}'",
                        spec.name, index.name
                    )))
                }
                None => return Err(self.error(format!("expected index '{}'", spec.name))),
            };
            let coerced = self.coerce(spec, std::mem::take(&mut index.values))?;
            self.check(spec, &coerced)?;
            index.values = coerced;
        }

        for spec in self.fields {
            let Some(values) = table.column_mut(spec.name) else {
                return Err(self.error(format!("missing column '{}'", spec.name)));
            };
            let coerced = self.coerce(spec, std::mem::take(values))?;
            self.check(spec, &coerced)?;
            *values = coerced;
        }
        Ok(table)
    }

    fn error(&self, reason: String) -> ModelError {
        ModelError::Schema {
            schema: self.name,
            reason,
        }
    }

    fn coerce(&self, spec: &FieldSpec, values: Vec<Value>) -> Result<Vec<Value>> {
        values
            .into_iter()
            .map(|value| {
                coerce_value(spec.kind, value).map_err(|value| ModelError::TypeCoercion {
                    column: spec.name.to_string(),
                    value,
                    target: kind_name(spec.kind),
                })
            })
            .collect()
    }

    fn check(&self, spec: &FieldSpec, values: &[Value]) -> Result<()> {
        if !spec.nullable {
            if let Some(row) = values.iter().position(Value::is_null) {
                return Err(self.error(format!("null in non-nullable column '{}' at row {row}", spec.name)));
            }
        }
        if spec.unique {
            let mut seen = HashSet::new();
            for value in values.iter().filter(|v| !v.is_null()) {
                if !seen.insert(value.key()) {
                    return Err(self.error(format!(
                        "duplicate value '{value}' in unique column '{}'",
                        spec.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Str => "string",
        FieldKind::Float => "float",
        FieldKind::Int => "integer",
        FieldKind::Bool => "boolean",
        FieldKind::DateTime => "dateTime",
    }
}

/// Coerce one cell; the error carries the offending text.
fn coerce_value(kind: FieldKind, value: Value) -> std::result::Result<Value, String> {
    match (kind, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldKind::Str, Value::Str(s)) => Ok(Value::Str(s)),
        (FieldKind::Str, other) => Ok(Value::Str(other.to_string())),

        (FieldKind::Float, Value::Float(v)) => Ok(Value::Float(v)),
        (FieldKind::Float, Value::Int(v)) => Ok(Value::Float(v as f64)),
        (FieldKind::Float, Value::Str(s)) => parse_float(s.trim()).map(Value::Float).ok_or(s),

        (FieldKind::Int, Value::Int(v)) => Ok(Value::Int(v)),
        (FieldKind::Int, Value::Float(v)) if v.fract() == 0.0 => Ok(Value::Int(v as i64)),
        (FieldKind::Int, Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| s),

        (FieldKind::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
        (FieldKind::Bool, Value::Int(v)) => Ok(Value::Bool(v != 0)),
        (FieldKind::Bool, Value::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(s),
        },

        (FieldKind::DateTime, Value::DateTime(v)) => Ok(Value::DateTime(v)),
        (FieldKind::DateTime, Value::Date(d)) => d
            .and_hms_opt(0, 0, 0)
            .map(|naive| Value::DateTime(naive.and_utc()))
            .ok_or_else(|| d.to_string()),
        (FieldKind::DateTime, Value::Str(s)) => parse_datetime(s.trim()).map(Value::DateTime).ok_or(s),

        (_, other) => Err(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Predefined schemas
// ---------------------------------------------------------------------------

use FieldKind::{Bool, DateTime, Float, Str};

pub const FULL_MODEL: TableSchema = TableSchema {
    name: "FullModel",
    index: None,
    fields: &[
        FieldSpec::new("model", Str),
        FieldSpec::new("time", Str),
        FieldSpec::new("profile", Str),
        FieldSpec::new("version", Str),
        FieldSpec::new("description", Str),
    ],
};

pub const MARKET_DATES: TableSchema = TableSchema {
    name: "MarketDates",
    index: Some(FieldSpec::new("mrid", Str).unique()),
    fields: &[
        FieldSpec::new("name", Str),
        FieldSpec::new("activation_date", DateTime),
    ],
};

pub const BUS: TableSchema = TableSchema {
    name: "Bus",
    index: Some(FieldSpec::new("node", Str).unique()),
    fields: &[
        FieldSpec::new("busname", Str),
        FieldSpec::new("substation", Str),
        FieldSpec::new("un", Float),
        FieldSpec::new("substation_mrid", Str),
        FieldSpec::new("bidzone", Str).nullable(),
        FieldSpec::new("sv_voltage", Float),
        FieldSpec::new("island", Str),
        FieldSpec::new("is_swing_bus", Bool),
        FieldSpec::new("base_voltage_mrid", Str),
    ],
};

pub const LOADS: TableSchema = TableSchema {
    name: "Loads",
    index: Some(FieldSpec::new("mrid", Str).unique()),
    fields: &[
        FieldSpec::new("name", Str),
        FieldSpec::new("substation_mrid", Str),
        FieldSpec::new("status", Bool),
        FieldSpec::new("p", Float).nullable(),
        FieldSpec::new("q", Float).nullable(),
        FieldSpec::new("station_group", Str).nullable(),
        FieldSpec::new("connectivity_node", Str),
    ],
};

pub const SUBSTATION_VOLTAGE: TableSchema = TableSchema {
    name: "SubstationVoltage",
    index: Some(FieldSpec::new("substation", Str)),
    fields: &[FieldSpec::new("container", Str), FieldSpec::new("v", Float)],
};

pub const DC_ACTIVE_FLOW: TableSchema = TableSchema {
    name: "DcActiveFlow",
    index: Some(FieldSpec::new("mrid", Str).unique()),
    fields: &[FieldSpec::new("p", Float)],
};

pub const REGIONS: TableSchema = TableSchema {
    name: "Regions",
    index: Some(FieldSpec::new("mrid", Str).unique()),
    fields: &[
        FieldSpec::new("region", Str),
        FieldSpec::new("short_name", Str).nullable(),
        FieldSpec::new("name", Str),
        FieldSpec::new("alias_name", Str).nullable(),
        FieldSpec::new("region_name", Str).nullable(),
    ],
};

pub const CONNECTIVITY_NODE: TableSchema = TableSchema {
    name: "ConnectivityNode",
    index: Some(FieldSpec::new("mrid", Str).unique()),
    fields: &[
        FieldSpec::new("container", Str),
        FieldSpec::new("container_name", Str),
        FieldSpec::new("un", Float).nullable(),
        FieldSpec::new("bidzone", Str).nullable(),
        FieldSpec::new("container_type", Str),
        FieldSpec::new("base_voltage_mrid", Str),
    ],
};

pub const BASE_VOLTAGE: TableSchema = TableSchema {
    name: "BaseVoltage",
    index: None,
    fields: &[
        FieldSpec::new("mrid", Str).unique(),
        FieldSpec::new("un", Float),
        FieldSpec::new("operating_voltage", Float),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_table(nodes: &[&str], un: &[&str]) -> Table {
        let n = nodes.len();
        let text = |v: &str| vec![Value::from(v); n];
        let mut table = Table::from_columns(vec![
            ("node".into(), nodes.iter().map(|v| Value::from(*v)).collect()),
            ("busname".into(), text("bus")),
            ("substation".into(), text("sub")),
            ("un".into(), un.iter().map(|v| Value::from(*v)).collect()),
            ("substation_mrid".into(), text("s1")),
            ("bidzone".into(), vec![Value::Null; n]),
            ("sv_voltage".into(), vec![Value::Float(400.0); n]),
            ("island".into(), text("i1")),
            ("is_swing_bus".into(), text("false")),
            ("base_voltage_mrid".into(), text("bv")),
        ])
        .unwrap();
        table.set_index("node").unwrap();
        table
    }

    #[test]
    fn test_coerces_strings() {
        let table = BUS.validate(bus_table(&["n1", "n2"], &["300", "420.5"])).unwrap();
        assert_eq!(table.column("un").unwrap(), &[Value::Float(300.0), Value::Float(420.5)]);
        assert_eq!(table.column("is_swing_bus").unwrap()[0], Value::Bool(false));
        assert_eq!(table.index().unwrap().name, "node");
        assert_eq!(table.columns()[0], "busname");
    }

    #[test]
    fn test_unique_index() {
        let err = BUS.validate(bus_table(&["n1", "n1"], &["1", "2"])).unwrap_err();
        assert!(matches!(err, ModelError::Schema { schema: "Bus", .. }), "{err}");
    }

    #[test]
    fn test_bad_number_is_coercion_error() {
        let err = BUS.validate(bus_table(&["n1"], &["high"])).unwrap_err();
        assert!(matches!(err, ModelError::TypeCoercion { target: "float", .. }));
    }

    #[test]
    fn test_missing_column_and_index() {
        let table = Table::from_columns(vec![("p".into(), vec![Value::Float(1.0)])]).unwrap();
        let err = DC_ACTIVE_FLOW.validate(table).unwrap_err();
        assert!(err.to_string().contains("expected index 'mrid'"));

        let table = Table::from_columns(vec![("mrid".into(), vec![Value::from("a")])]).unwrap();
        let err = BASE_VOLTAGE.validate(table).unwrap_err();
        assert!(err.to_string().contains("missing column 'un'"));
    }

    #[test]
    fn test_nullability() {
        let table = Table::from_columns(vec![
            ("mrid".into(), vec![Value::from("a"), Value::from("b")]),
            ("un".into(), vec![Value::Float(1.0), Value::Null]),
            ("operating_voltage".into(), vec![Value::Float(1.0), Value::Float(2.0)]),
        ])
        .unwrap();
        assert!(BASE_VOLTAGE.validate(table).is_err());
    }

    #[test]
    fn test_coerce_value_kinds() {
        assert_eq!(coerce_value(Bool, Value::from("True")), Ok(Value::Bool(true)));
        assert_eq!(coerce_value(Bool, Value::from("0")), Ok(Value::Bool(false)));
        assert!(coerce_value(Bool, Value::from("maybe")).is_err());
        assert_eq!(coerce_value(FieldKind::Int, Value::Float(3.0)), Ok(Value::Int(3)));
        assert_eq!(coerce_value(Str, Value::Float(1.5)), Ok(Value::from("1.5")));
        assert!(matches!(
            coerce_value(DateTime, Value::from("2023-01-01T00:00:00Z")),
            Ok(Value::DateTime(_))
        ));
    }
}
