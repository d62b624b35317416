// SPDX-License-Identifier: PMPL-1.0-or-later
//! Built-in namespace table.
//!
//! Used by backends that cannot report their own prefixes (Blazegraph, direct
//! endpoints, the embedded store) and as the base that RDF4J prefixes extend.

use std::collections::HashMap;

/// CIM 16 schema namespace.
pub const CIM16: &str = "http://iec.ch/TC57/2013/CIM-schema-cim16#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";

const DEFAULT_NAMESPACES: &[(&str, &str)] = &[
    ("cim", CIM16),
    ("rdf", RDF),
    ("rdfs", RDFS),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("xsd", XSD),
    ("md", "http://iec.ch/TC57/61970-552/ModelDescription/1#"),
    ("dcterms", "http://purl.org/dc/terms/#"),
    ("dm", "http://iec.ch/2002/schema/CIM_difference_model#"),
    ("entsoe", "http://entsoe.eu/CIM/SchemaExtension/3/1#"),
    ("eu", "http://iec.ch/TC57/CIM100-European#"),
    ("ALG", "http://www.alstom.com/grid/CIM-schema-cim15-extension#"),
    ("SN", "http://www.statnett.no/CIM-schema-cim15-extension#"),
    ("pti", "http://www.pti-us.com/PTI_CIM-schema-cim16#"),
];

/// Fresh copy of the built-in prefix to namespace map.
pub fn default_namespaces() -> HashMap<String, String> {
    DEFAULT_NAMESPACES
        .iter()
        .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
        .collect()
}

/// Parse the RDF4J `/namespaces` CSV body (`prefix,namespace` header, then
/// one `prefix,uri` pair per line).
pub fn parse_rdf4j_namespaces(body: &str) -> HashMap<String, String> {
    body.split_whitespace()
        .skip(1)
        .filter_map(|line| line.split_once(','))
        .map(|(prefix, uri)| (prefix.to_string(), uri.to_string()))
        .collect()
}

/// Render a prefix map as SPARQL `PREFIX` declarations, sorted by prefix.
pub fn sparql_prefix_block(prefixes: &HashMap<String, String>) -> String {
    let mut entries: Vec<_> = prefixes.iter().collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(prefix, uri)| format!("PREFIX {prefix}:<{uri}>\n"))
        .collect()
}
