//! Content reference construction for the signing path
//!
//! Builds the single SAML-profile Reference (fragment or whole-document,
//! enveloped + exclusive-c14n transforms) and pins namespace prefixes that
//! are referenced without being visibly used, so exclusive canonicalization
//! keeps them in scope.

use std::collections::BTreeSet;

use crate::model::consts;
use crate::model::xmlsec;
use crate::xml::XmlNode;

/// Sentinel prefix naming the default namespace in an inclusive prefix list.
pub const DEFAULT_PREFIX_SENTINEL: &str = "#default";

/// Reference shape for a signature under construction.
#[derive(Debug, Clone)]
pub struct ContentReference {
    /// "#" + object id, or None for a whole-document reference.
    pub uri: Option<String>,
    pub digest_algorithm: String,
    pub canonicalization_method: String,
    pub transforms: Vec<String>,
    prefixes: BTreeSet<String>,
}

impl ContentReference {
    /// Reference to the object identified by `id`, or the whole document
    /// when the object has no identifier.
    pub fn for_object(id: Option<&str>) -> Self {
        Self {
            uri: id.map(|i| format!("#{}", i)),
            digest_algorithm: xmlsec::default_digest_algorithm().to_string(),
            canonicalization_method: consts::TRANSFORM_C14N_EXCL.to_string(),
            transforms: vec![
                consts::TRANSFORM_ENVELOPED_SIGNATURE.to_string(),
                consts::TRANSFORM_C14N_EXCL.to_string(),
            ],
            prefixes: BTreeSet::new(),
        }
    }

    pub fn set_digest_algorithm(&mut self, algorithm: impl Into<String>) {
        self.digest_algorithm = algorithm.into();
    }

    /// Add a prefix to the canonicalization transform's inclusive list. The
    /// empty prefix stands for the default namespace declaration.
    pub fn add_inclusive_prefix(&mut self, prefix: &str) {
        self.prefixes.insert(if prefix.is_empty() {
            DEFAULT_PREFIX_SENTINEL.to_string()
        } else {
            prefix.to_string()
        });
    }

    /// Space-separated inclusive prefix list, empty when nothing is pinned.
    pub fn inclusive_prefix_list(&self) -> String {
        self.prefixes.iter().cloned().collect::<Vec<_>>().join(" ")
    }

    pub fn inclusive_prefixes(&self) -> Vec<String> {
        self.prefixes.iter().cloned().collect()
    }
}

/// Compute the prefixes declared on (or under) `node` that are referenced by
/// non-visibly-used content: xsi:type values, QName-shaped attribute values
/// and QName-shaped text content.
///
/// A prefix is visibly used when it appears as an element or attribute name
/// prefix, which canonicalization already preserves.
pub fn non_visibly_used_prefixes(node: &XmlNode) -> Vec<String> {
    let mut declared = BTreeSet::new();
    collect_declared_prefixes(node, &mut declared);

    let mut referenced = BTreeSet::new();
    collect_referenced_prefixes(node, &declared, &mut referenced);

    let mut visible = BTreeSet::new();
    collect_visible_prefixes(node, &mut visible);

    referenced
        .into_iter()
        .filter(|p| !visible.contains(p))
        .collect()
}

fn collect_declared_prefixes(node: &XmlNode, out: &mut BTreeSet<String>) {
    for (prefix, _) in &node.namespace_decls {
        out.insert(prefix.clone());
    }
    for child in &node.children {
        collect_declared_prefixes(child, out);
    }
}

fn collect_referenced_prefixes(
    node: &XmlNode,
    declared: &BTreeSet<String>,
    out: &mut BTreeSet<String>,
) {
    for (_, value) in &node.attributes {
        if let Some(prefix) = qname_prefix(value) {
            if declared.contains(prefix) {
                out.insert(prefix.to_string());
            }
        }
    }
    if let Some(prefix) = qname_prefix(node.text.trim()) {
        if declared.contains(prefix) {
            out.insert(prefix.to_string());
        }
    }
    for child in &node.children {
        collect_referenced_prefixes(child, declared, out);
    }
}

fn collect_visible_prefixes(node: &XmlNode, out: &mut BTreeSet<String>) {
    // Attribute names carry their prefix verbatim; element prefixes are
    // recovered from the raw serialized form.
    for (key, _) in &node.attributes {
        if let Some((prefix, _)) = key.split_once(':') {
            out.insert(prefix.to_string());
        }
    }
    if let Some(rest) = node.raw.strip_prefix(b"<") {
        if let Some(end) = rest.iter().position(|b| *b == b' ' || *b == b'>' || *b == b'/') {
            if let Ok(name) = std::str::from_utf8(&rest[..end]) {
                if let Some((prefix, _)) = name.split_once(':') {
                    out.insert(prefix.to_string());
                }
            }
        }
    }
    for child in &node.children {
        collect_visible_prefixes(child, out);
    }
}

/// The prefix of a QName-shaped token, if the token looks like one.
fn qname_prefix(value: &str) -> Option<&str> {
    let (prefix, local) = value.split_once(':')?;
    if prefix.is_empty()
        || local.is_empty()
        || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        || !local.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        || local.contains('/')
    {
        return None;
    }
    Some(prefix)
}
