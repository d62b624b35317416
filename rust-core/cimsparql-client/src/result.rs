// SPDX-License-Identifier: PMPL-1.0-or-later
//! SPARQL 1.1 query results in JSON form.
//!
//! ```json
//! { "head": { "vars": ["s"], "link": [] },
//!   "results": { "bindings": [ { "s": { "type": "uri", "value": "urn:x" } } ] } }
//! ```
//!
//! Rows may leave variables unbound; that is tolerated unless
//! [`ResultModel::validate_column_consistency`] is called.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SparqlError};

/// Kind tag of a bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "typed-literal")]
    Literal,
    Uri,
    Bnode,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Literal => "literal",
            ValueType::Uri => "uri",
            ValueType::Bnode => "bnode",
        }
    }
}

/// One bound cell of a result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultValue {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl ResultValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value_type: ValueType::Literal,
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            datatype: Some(datatype.into()),
            ..Self::literal(value)
        }
    }

    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            value_type: ValueType::Uri,
            ..Self::literal(value)
        }
    }

    /// Type identifier used for conversion lookup: the datatype URI when
    /// present, otherwise the kind tag (`literal`, `uri`, `bnode`).
    pub fn type_id(&self) -> &str {
        match self.datatype.as_deref() {
            Some(dt) if !dt.is_empty() => dt,
            _ => self.value_type.as_str(),
        }
    }
}

/// A result row: variable name to bound value.
pub type Binding = HashMap<String, ResultValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultHead {
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default)]
    pub link: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultBindings {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// A complete SELECT result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultModel {
    pub head: ResultHead,
    pub results: ResultBindings,
}

/// Wire form that also admits ASK results so they can be told apart.
#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    head: ResultHead,
    results: Option<ResultBindings>,
    boolean: Option<bool>,
}

impl ResultModel {
    /// Parse a SPARQL results JSON document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawResult = serde_json::from_slice(bytes)?;
        match (raw.results, raw.boolean) {
            (Some(results), _) => Ok(Self {
                head: raw.head,
                results,
            }),
            (None, Some(_)) => Err(SparqlError::InvalidResultShape {
                expected: "solutions",
                found: "boolean",
            }),
            (None, None) => Err(SparqlError::MalformedResult(
                "document has neither 'results' nor 'boolean'".to_string(),
            )),
        }
    }

    /// An empty result (no columns, no rows).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn variables(&self) -> &[String] {
        &self.head.vars
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.results.bindings
    }

    pub fn len(&self) -> usize {
        self.results.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.bindings.is_empty()
    }

    /// Fail if any row binds a different variable set than the header.
    pub fn validate_column_consistency(&self) -> Result<()> {
        let expected: BTreeSet<&str> = self.head.vars.iter().map(String::as_str).collect();
        for (row, binding) in self.results.bindings.iter().enumerate() {
            let found: BTreeSet<&str> = binding.keys().map(String::as_str).collect();
            if found != expected {
                return Err(SparqlError::ColumnConsistency {
                    row,
                    expected: expected.iter().map(|s| s.to_string()).collect(),
                    found: found.iter().map(|s| s.to_string()).collect(),
                });
            }
        }
        Ok(())
    }

    /// Rows in header order; unbound cells are `None`.
    pub fn values_as_rows(&self) -> Vec<Vec<Option<&ResultValue>>> {
        self.results
            .bindings
            .iter()
            .map(|binding| self.head.vars.iter().map(|var| binding.get(var)).collect())
            .collect()
    }

    /// Representative row for type inference, see [`sample_row`].
    pub fn sample_row(&self) -> Binding {
        sample_row(&self.head.vars, &self.results.bindings)
    }
}

/// Collect, for every column, the first bound value found scanning rows in
/// order. Stops as soon as every column has a value.
pub fn sample_row(columns: &[String], rows: &[Binding]) -> Binding {
    let mut sample = Binding::new();
    for row in rows {
        if columns.iter().all(|c| sample.contains_key(c)) {
            break;
        }
        for (key, value) in row {
            sample.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    sample
}
