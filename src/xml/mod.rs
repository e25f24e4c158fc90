//! XML reading layer
//!
//! A small namespace-aware tree loader on top of quick-xml, plus the bean
//! readers for metadata trees and protocol messages. Only the subset of the
//! SAML schemas the core consumes is interpreted; unrecognized content is
//! retained as opaque nodes so filters and matchers can still see it.

pub mod message;
pub mod metadata;

use chrono::{DateTime, Duration, Utc};
use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::error::SamlError;

/// A parsed XML element with resolved namespace, attributes, children and
/// the raw byte span it occupied in the source document.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub namespace: Option<String>,
    pub local_name: String,
    /// Attributes keyed by their raw (possibly prefixed) name.
    pub attributes: Vec<(String, String)>,
    /// Namespace declarations on this element: (prefix, URI), the default
    /// namespace as an empty prefix.
    pub namespace_decls: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
    /// Raw bytes of this element as serialized in the source.
    pub raw: Vec<u8>,
}

impl XmlNode {
    /// Attribute lookup by local name, tolerating a namespace prefix.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name || k.rsplit(':').next() == Some(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    pub fn child(&self, namespace: &str, local_name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.is(namespace, local_name))
    }

    pub fn children_named<'a>(
        &'a self,
        namespace: &'a str,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.is(namespace, local_name))
    }

    /// Trimmed text content of a named child.
    pub fn child_text(&self, namespace: &str, local_name: &str) -> Option<String> {
        self.child(namespace, local_name)
            .map(|c| c.text.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Parse a complete document into a tree rooted at its document element.
pub fn parse_document(input: &[u8]) -> Result<XmlNode, SamlError> {
    let mut reader = NsReader::from_reader(input);

    let mut stack: Vec<(XmlNode, usize)> = Vec::new();
    let mut root: Option<XmlNode> = None;
    let mut buf = Vec::new();

    loop {
        let start_pos = reader.buffer_position();
        let event = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| SamlError::Binding(format!("XML parse error: {}", e)))?;
        match event {
            (ns, Event::Start(e)) => {
                let node = element_node(&ns, &e)?;
                stack.push((node, start_pos));
            }
            (ns, Event::Empty(e)) => {
                let mut node = element_node(&ns, &e)?;
                node.raw = input[start_pos..reader.buffer_position()].to_vec();
                attach(&mut stack, &mut root, node)?;
            }
            (_, Event::Text(t)) => {
                if let Some((node, _)) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| SamlError::Binding(format!("XML text error: {}", e)))?;
                    // Inter-element whitespace is noise; real content keeps
                    // its internal spacing.
                    if !text.trim().is_empty() || !node.text.is_empty() {
                        node.text.push_str(&text);
                    }
                }
            }
            (_, Event::End(_)) => {
                let (mut node, start) = stack
                    .pop()
                    .ok_or_else(|| SamlError::Binding("unbalanced XML document".to_string()))?;
                node.raw = input[start..reader.buffer_position()].to_vec();
                attach(&mut stack, &mut root, node)?;
            }
            (_, Event::Eof) => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(SamlError::Binding("truncated XML document".to_string()));
    }
    root.ok_or_else(|| SamlError::Binding("empty XML document".to_string()))
}

fn element_node(
    ns: &ResolveResult<'_>,
    e: &quick_xml::events::BytesStart<'_>,
) -> Result<XmlNode, SamlError> {
    let namespace = match ns {
        ResolveResult::Bound(namespace) => Some(
            String::from_utf8(namespace.0.to_vec())
                .map_err(|_| SamlError::Binding("non-UTF8 namespace".to_string()))?,
        ),
        _ => None,
    };
    let local_name = String::from_utf8(e.local_name().as_ref().to_vec())
        .map_err(|_| SamlError::Binding("non-UTF8 element name".to_string()))?;

    let mut attributes = Vec::new();
    let mut namespace_decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| SamlError::Binding(format!("XML attribute error: {}", e)))?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())
            .map_err(|_| SamlError::Binding("non-UTF8 attribute name".to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| SamlError::Binding(format!("XML attribute error: {}", e)))?
            .into_owned();
        if key == "xmlns" {
            namespace_decls.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            namespace_decls.push((prefix.to_string(), value));
        } else {
            attributes.push((key, value));
        }
    }

    Ok(XmlNode {
        namespace,
        local_name,
        attributes,
        namespace_decls,
        children: Vec::new(),
        text: String::new(),
        raw: Vec::new(),
    })
}

fn attach(
    stack: &mut [(XmlNode, usize)],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), SamlError> {
    if let Some((parent, _)) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(SamlError::Binding(
            "multiple root elements in XML document".to_string(),
        ))
    }
}

/// Collect every non-empty ID-typed attribute value in the tree.
pub fn collect_ids(node: &XmlNode, out: &mut Vec<String>) {
    for name in ["ID", "AssertionID", "RequestID", "ResponseID", "Id"] {
        if let Some(id) = node.attr(name) {
            if !id.is_empty() {
                out.push(id.to_string());
                break;
            }
        }
    }
    for child in &node.children {
        collect_ids(child, out);
    }
}

/// Enforce the signed-document invariant: every non-empty identifier is
/// unique within the document.
pub fn check_id_uniqueness(root: &XmlNode) -> Result<(), SamlError> {
    let mut ids = Vec::new();
    collect_ids(root, &mut ids);
    let mut seen = std::collections::HashSet::new();
    for id in &ids {
        if !seen.insert(id.as_str()) {
            return Err(SamlError::Binding(format!(
                "duplicate identifier ({}) within document",
                id
            )));
        }
    }
    Ok(())
}

/// Parse an xs:dateTime value.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an xs:duration of the PnYnMnDTnHnMnS shape into seconds.
/// Years and months use the 365/30 day conventions.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, rest) = match value.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, value),
    };
    let rest = rest.strip_prefix('P')?;

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut seconds: i64 = 0;
    let mut num = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
        } else {
            let n: i64 = num.parse().ok()?;
            num.clear();
            seconds += match ch {
                'Y' => n * 365 * 86_400,
                'M' => n * 30 * 86_400,
                'D' => n * 86_400,
                'W' => n * 7 * 86_400,
                _ => return None,
            };
        }
    }
    if !num.is_empty() {
        return None;
    }

    if let Some(time_part) = time_part {
        let mut num = String::new();
        for ch in time_part.chars() {
            if ch.is_ascii_digit() || ch == '.' {
                num.push(ch);
            } else {
                let n: f64 = num.parse().ok()?;
                num.clear();
                seconds += match ch {
                    'H' => (n * 3600.0) as i64,
                    'M' => (n * 60.0) as i64,
                    'S' => n as i64,
                    _ => return None,
                };
            }
        }
        if !num.is_empty() {
            return None;
        }
    }

    Some(if negative {
        Duration::seconds(-seconds)
    } else {
        Duration::seconds(seconds)
    })
}
