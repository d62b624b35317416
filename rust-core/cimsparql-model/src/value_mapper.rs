// SPDX-License-Identifier: PMPL-1.0-or-later
//! Post-processing steps applied to converted tables.

use cimsparql_client::{Table, Value};
use regex::Regex;

use crate::error::{ModelError, Result};

/// A pure `table -> table` step run after type conversion.
pub trait ValueMapper: Send + Sync {
    fn map(&self, table: Table) -> Table;
}

/// Default pattern matching the namespace part of a CIM resource URI.
pub const MRID_URI_PATTERN: &str = "^([^#_|^#]+)(#_|#)";

/// Strips URI prefixes from every column whose name contains `mrid`.
#[derive(Debug, Clone)]
pub struct MridMapper {
    uri_regex: Regex,
}

impl MridMapper {
    pub fn new() -> Result<Self> {
        Self::with_pattern(MRID_URI_PATTERN)
    }

    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let uri_regex = Regex::new(pattern).map_err(|source| ModelError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { uri_regex })
    }
}

impl ValueMapper for MridMapper {
    fn map(&self, mut table: Table) -> Table {
        let columns: Vec<String> = table
            .columns()
            .iter()
            .filter(|c| c.contains("mrid"))
            .cloned()
            .collect();
        for column in columns {
            let Some(values) = table.column_mut(&column) else {
                continue;
            };
            for value in values.iter_mut() {
                if let Value::Str(text) = value {
                    let stripped = self.uri_regex.replace_all(text, "").into_owned();
                    *text = stripped;
                }
            }
        }
        table
    }
}
