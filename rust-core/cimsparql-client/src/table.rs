// SPDX-License-Identifier: PMPL-1.0-or-later
//! Column-oriented result tables.
//!
//! A [`Table`] is what a query returns once bindings are flattened: one
//! column per SELECT variable, in SELECT order, and an optional index column
//! pulled out of the data. Raw tables hold strings and nulls; type conversion
//! turns columns into their native [`Value`] variants in place.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use thiserror::Error;

use crate::result::ResultModel;

/// A single table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Time(NaiveTime),
    Duration(chrono::Duration),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Stable textual key for hashing and uniqueness checks.
    pub fn key(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Str(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Time(v) => write!(f, "{v}"),
            Value::Duration(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("No such column: {0}")]
    MissingColumn(String),

    #[error("Column '{column}' has {found} rows, table has {expected}")]
    Length {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Cannot concatenate tables with columns {left:?} and {right:?}")]
    Mismatch { left: Vec<String>, right: Vec<String> },
}

/// Named index column taken out of the data by [`Table::set_index`].
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub values: Vec<Value>,
}

/// Column-major table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
    rows: usize,
    index: Option<Index>,
}

impl Table {
    /// Empty table with the given column names.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let data = vec![Vec::new(); columns.len()];
        Self {
            columns,
            data,
            rows: 0,
            index: None,
        }
    }

    /// Build from `(name, values)` pairs; all columns must be equally long.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Self, TableError> {
        let rows = columns.first().map_or(0, |(_, v)| v.len());
        let mut table = Self::with_columns(Vec::<String>::new());
        table.rows = rows;
        for (name, values) in columns {
            table.insert_column(name, values)?;
        }
        Ok(table)
    }

    /// Flatten a query result; unbound cells become [`Value::Null`].
    pub fn from_result(result: &ResultModel) -> Self {
        let vars = result.variables();
        let mut data: Vec<Vec<Value>> = vec![Vec::with_capacity(result.len()); vars.len()];
        for binding in result.bindings() {
            for (col, var) in vars.iter().enumerate() {
                data[col].push(match binding.get(var) {
                    Some(v) => Value::Str(v.value.clone()),
                    None => Value::Null,
                });
            }
        }
        Self {
            columns: vars.to_vec(),
            data,
            rows: result.len(),
            index: None,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.position(name).map(|i| self.data[i].as_slice())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        let i = self.position(name)?;
        Some(&mut self.data[i])
    }

    /// Add a column, or replace an existing one with the same name.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if self.columns.is_empty() && self.index.is_none() {
            self.rows = values.len();
        }
        if values.len() != self.rows {
            return Err(TableError::Length {
                column: name,
                expected: self.rows,
                found: values.len(),
            });
        }
        match self.position(&name) {
            Some(i) => self.data[i] = values,
            None => {
                self.columns.push(name);
                self.data.push(values);
            }
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let i = self.position(name)?;
        self.columns.remove(i);
        Some(self.data.remove(i))
    }

    /// Value at (`row`, `column`).
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.column(column).and_then(|c| c.get(row))
    }

    /// Cells of one row in column order.
    pub fn row(&self, row: usize) -> Option<Vec<&Value>> {
        (row < self.rows).then(|| self.data.iter().map(|c| &c[row]).collect())
    }

    /// Move `name` out of the data and make it the index.
    pub fn set_index(&mut self, name: &str) -> Result<(), TableError> {
        let values = self
            .drop_column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        if let Some(old) = self.index.take() {
            self.columns.insert(0, old.name);
            self.data.insert(0, old.values);
        }
        self.index = Some(Index {
            name: name.to_string(),
            values,
        });
        Ok(())
    }

    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    /// Mutable index; replacement values must keep the row count.
    pub fn index_mut(&mut self) -> Option<&mut Index> {
        self.index.as_mut()
    }

    /// Values of the index if set, else of the named column.
    pub fn index_or_column(&self, name: &str) -> Option<&[Value]> {
        match &self.index {
            Some(index) if index.name == name => Some(&index.values),
            _ => self.column(name),
        }
    }

    /// Keep only the given rows, in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        let pick = |col: &Vec<Value>| -> Vec<Value> { rows.iter().map(|&r| col[r].clone()).collect() };
        Self {
            columns: self.columns.clone(),
            data: self.data.iter().map(pick).collect(),
            rows: rows.len(),
            index: self.index.as_ref().map(|idx| Index {
                name: idx.name.clone(),
                values: pick(&idx.values),
            }),
        }
    }

    /// Stack tables with identical columns on top of each other.
    pub fn concat(tables: &[Table]) -> Result<Self, TableError> {
        let Some(first) = tables.first() else {
            return Ok(Self::default());
        };
        let mut out = first.clone();
        for table in &tables[1..] {
            if table.columns != out.columns
                || table.index.as_ref().map(|i| &i.name) != out.index.as_ref().map(|i| &i.name)
            {
                return Err(TableError::Mismatch {
                    left: out.columns.clone(),
                    right: table.columns.clone(),
                });
            }
            for (dst, src) in out.data.iter_mut().zip(&table.data) {
                dst.extend(src.iter().cloned());
            }
            if let (Some(dst), Some(src)) = (out.index.as_mut(), table.index.as_ref()) {
                dst.values.extend(src.values.iter().cloned());
            }
            out.rows += table.rows;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultModel;

    fn sample_result() -> ResultModel {
        ResultModel::from_slice(
            br#"{"head": {"vars": ["mrid", "name", "p"]},
                 "results": {"bindings": [
                    {"mrid": {"type": "literal", "value": "a"}, "name": {"type": "literal", "value": "A"}},
                    {"mrid": {"type": "literal", "value": "b"}, "p": {"type": "literal", "value": "1.5"}}
                 ]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_result_fills_nulls() {
        let table = Table::from_result(&sample_result());
        assert_eq!(table.columns(), &["mrid", "name", "p"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "p"), Some(&Value::Null));
        assert_eq!(table.get(1, "p"), Some(&Value::from("1.5")));
    }

    #[test]
    fn test_from_empty_result_keeps_columns() {
        let model = ResultModel::from_slice(
            br#"{"head": {"vars": ["x"]}, "results": {"bindings": []}}"#,
        )
        .unwrap();
        let table = Table::from_result(&model);
        assert!(table.is_empty());
        assert_eq!(table.columns(), &["x"]);
    }

    #[test]
    fn test_set_index_moves_column() {
        let mut table = Table::from_result(&sample_result());
        table.set_index("mrid").unwrap();
        assert_eq!(table.columns(), &["name", "p"]);
        let index = table.index().unwrap();
        assert_eq!(index.name, "mrid");
        assert_eq!(index.values, vec![Value::from("a"), Value::from("b")]);
        assert!(matches!(
            table.set_index("nope"),
            Err(TableError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_insert_column_length_check() {
        let mut table = Table::from_result(&sample_result());
        let err = table.insert_column("q", vec![Value::Null]).unwrap_err();
        assert!(matches!(err, TableError::Length { expected: 2, found: 1, .. }));
        table
            .insert_column("q", vec![Value::Float(1.0), Value::Float(2.0)])
            .unwrap();
        assert_eq!(table.row(1).unwrap().last(), Some(&&Value::Float(2.0)));
    }

    #[test]
    fn test_concat_and_take_rows() {
        let table = Table::from_result(&sample_result());
        let both = Table::concat(&[table.clone(), table.clone()]).unwrap();
        assert_eq!(both.len(), 4);
        let picked = both.take_rows(&[3, 0]);
        assert_eq!(picked.get(0, "mrid"), Some(&Value::from("b")));
        assert_eq!(picked.get(1, "mrid"), Some(&Value::from("a")));

        let other = Table::with_columns(["x"]);
        assert!(Table::concat(&[table, other]).is_err());
    }

    #[test]
    fn test_from_columns() {
        let table = Table::from_columns(vec![
            ("a".into(), vec![Value::Int(1), Value::Int(2)]),
            ("b".into(), vec![Value::Bool(true), Value::Null]),
        ])
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("b").unwrap()[0].as_bool(), Some(true));
        assert!(Table::from_columns(vec![
            ("a".into(), vec![Value::Int(1)]),
            ("b".into(), vec![]),
        ])
        .is_err());
    }
}
