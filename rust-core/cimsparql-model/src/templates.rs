// SPDX-License-Identifier: PMPL-1.0-or-later
//! Stored SPARQL query templates.
//!
//! Placeholders use `$name` or `${name}`; `$$` is a literal dollar sign.
//! Every template starts with a `# Name: <name>` line, which is also the key
//! used to route it to a client.

use std::collections::HashMap;

use cimsparql_client::query_name;

use crate::error::{ModelError, Result};

/// A query text with placeholder defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTemplate {
    pub text: &'static str,
    /// Values used for placeholders the caller leaves unset.
    pub defaults: &'static [(&'static str, &'static str)],
}

const REGION_DEFAULT: &[(&str, &str)] = &[("region", ".*")];

pub const TYPE_MAPPER: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/type_mapper.sparql"),
    defaults: &[],
};

pub const FULL_MODEL: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/full_model.sparql"),
    defaults: &[],
};

pub const MARKET_DATES: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/market_dates.sparql"),
    defaults: &[],
};

pub const BUS: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/bus.sparql"),
    defaults: REGION_DEFAULT,
};

pub const TRANSFORMER_CENTER_NODES: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/transformer_center_nodes.sparql"),
    defaults: REGION_DEFAULT,
};

pub const LOADS: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/loads.sparql"),
    defaults: REGION_DEFAULT,
};

pub const BASE_VOLTAGE: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/base_voltage.sparql"),
    defaults: &[],
};

pub const SUBSTATION_VOLTAGE_LEVEL: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/substation_voltage_level.sparql"),
    defaults: &[],
};

pub const CONNECTIVITY_NODES: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/connectivity_nodes.sparql"),
    defaults: REGION_DEFAULT,
};

pub const REGIONS: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/regions.sparql"),
    defaults: &[],
};

pub const DC_ACTIVE_POWER_FLOW: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/dc_active_power_flow.sparql"),
    defaults: REGION_DEFAULT,
};

pub const ADD_MRID: QueryTemplate = QueryTemplate {
    text: include_str!("../sparql/add_mrid.sparql"),
    defaults: &[("rdf_type", "?rdf_type"), ("g", "?g")],
};

/// Every stored template.
pub const ALL: &[QueryTemplate] = &[
    TYPE_MAPPER,
    FULL_MODEL,
    MARKET_DATES,
    BUS,
    TRANSFORMER_CENTER_NODES,
    LOADS,
    BASE_VOLTAGE,
    SUBSTATION_VOLTAGE_LEVEL,
    CONNECTIVITY_NODES,
    REGIONS,
    DC_ACTIVE_POWER_FLOW,
    ADD_MRID,
];

impl QueryTemplate {
    /// Name from the template's `# Name:` line.
    pub fn name(&self) -> &'static str {
        query_name(self.text)
    }

    /// Substitute what is known, leave other placeholders in place.
    pub fn safe_substitute(&self, values: &HashMap<String, String>) -> String {
        // Unresolved placeholders are kept, so this cannot fail.
        render(self.text, |key| self.lookup(values, key), false).unwrap_or_default()
    }

    /// Substitute every placeholder or fail naming the first unresolved one.
    pub fn substitute(&self, values: &HashMap<String, String>) -> Result<String> {
        render(self.text, |key| self.lookup(values, key), true)
    }

    fn lookup<'a>(&self, values: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
        values.get(key).map(String::as_str).or_else(|| {
            self.defaults
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value)
        })
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn render<'a, F>(text: &str, lookup: F, strict: bool) -> Result<String>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let (key, raw_len) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if end > 0 && braced[..end].chars().all(is_ident) => {
                    (&braced[..end], end + 2)
                }
                _ => ("", 0),
            }
        } else if after.starts_with(is_ident_start) {
            let end = after.find(|c: char| !is_ident(c)).unwrap_or(after.len());
            (&after[..end], end)
        } else {
            ("", 0)
        };

        if key.is_empty() {
            if strict {
                return Err(ModelError::Template(format!(
                    "invalid placeholder at byte {}",
                    text.len() - rest.len() + pos
                )));
            }
            out.push('$');
            rest = after;
            continue;
        }

        match lookup(key) {
            Some(value) => out.push_str(value),
            None if strict => {
                return Err(ModelError::Template(format!("no value for placeholder '{key}'")))
            }
            None => out.push_str(&rest[pos..pos + 1 + raw_len]),
        }
        rest = &after[raw_len..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const SAMPLE: QueryTemplate = QueryTemplate {
        text: "# Name: Sample\nselect * where { ?s ?p \"$$${region}\" . $other $ ${missing} }",
        defaults: &[("region", ".*")],
    };

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_every_template_has_unique_name() {
        let mut seen = HashSet::new();
        for template in ALL {
            let name = template.name();
            assert!(!name.is_empty(), "template without name: {}", template.text);
            assert!(template.text.starts_with("# Name: "));
            assert!(seen.insert(name), "duplicate template name: {name}");
        }
        assert_eq!(seen.len(), ALL.len());
    }

    #[test]
    fn test_safe_substitute_keeps_unknown() {
        let text = SAMPLE.safe_substitute(&values(&[("other", "?o")]));
        assert_eq!(
            text,
            "# Name: Sample\nselect * where { ?s ?p \"$.*\" . ?o $ ${missing} }"
        );
    }

    #[test]
    fn test_caller_values_beat_defaults() {
        let text = SAMPLE.safe_substitute(&values(&[("region", "NO")]));
        assert!(text.contains("\"$NO\""));
    }

    #[test]
    fn test_strict_substitute_reports_missing() {
        let err = SAMPLE
            .substitute(&values(&[("other", "?o"), ("missing", "x")]))
            .unwrap_err();
        assert!(matches!(err, ModelError::Template(_)));

        let template = QueryTemplate {
            text: "# Name: T\n${a} $b",
            defaults: &[],
        };
        assert!(template.substitute(&values(&[("a", "1")])).is_err());
        assert_eq!(
            template.substitute(&values(&[("a", "1"), ("b", "2")])).unwrap(),
            "# Name: T\n1 2"
        );
    }

    #[test]
    fn test_name_survives_partial_substitution() {
        assert_eq!(BUS.name(), "Bus");
        assert_eq!(DC_ACTIVE_POWER_FLOW.name(), "DC Active Power Flow");
        let text = LOADS.safe_substitute(&HashMap::new());
        assert_eq!(query_name(&text), "Loads");
        assert!(text.contains("regex(?region_name, \".*\")"));
        assert!(text.contains("${cim}"));
    }

    proptest! {
        #[test]
        fn prop_substitution_inserts_value_verbatim(value in "[a-zA-Z0-9 ._$-]{0,16}") {
            let template = QueryTemplate { text: "# Name: P\n<${region}>", defaults: &[] };
            let text = template.safe_substitute(&values(&[("region", value.as_str())]));
            prop_assert_eq!(text, format!("# Name: P\n<{value}>"));
        }

        #[test]
        fn prop_text_without_placeholders_is_unchanged(text in "[a-zA-Z0-9 ?{}.\n]{0,40}") {
            let template = QueryTemplate { text: Box::leak(text.clone().into_boxed_str()), defaults: &[] };
            prop_assert_eq!(template.safe_substitute(&HashMap::new()), text);
        }
    }
}
