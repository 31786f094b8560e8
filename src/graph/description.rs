//! XML graph description reader.
//!
//! ```xml
//! <graph id="Graph">
//!   <node id="Read">
//!     <operator>Read</operator>
//!     <parameters><file>${input}</file></parameters>
//!   </node>
//!   <node id="Filter">
//!     <operator>Image-Filter</operator>
//!     <sources><sourceProduct refid="Read"/></sources>
//!     <parameters><filterSize>3</filterSize></parameters>
//!   </node>
//! </graph>
//! ```
//!
//! `${name}` placeholders are substituted in the raw text before parsing.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use super::GraphError;
use super::model::{Config, ConfigValue, Graph, Node, Source};
use crate::error::Result;

/// Generic element tree built from the event stream before interpretation.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn open_element(e: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element {
        name: String::from_utf8_lossy(e.name().as_ref()).to_string(),
        ..Default::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => stack.push(open_element(e)?),
            Event::Empty(ref e) => {
                let element = open_element(e)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| GraphError::Malformed("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(GraphError::Malformed("unterminated element".into()).into());
    }
    root.ok_or_else(|| GraphError::Malformed("document has no root element".into()).into())
}

fn element_to_config(element: &Element) -> Config {
    let mut config = Config::new();
    for child in &element.children {
        let value = if child.children.is_empty() {
            ConfigValue::Text(child.text.trim().to_string())
        } else {
            ConfigValue::Group(element_to_config(child))
        };
        config.push(&child.name, value);
    }
    config
}

fn element_to_node(element: &Element) -> Result<Node> {
    let id = element
        .attr("id")
        .ok_or_else(|| GraphError::Malformed("node without id attribute".into()))?;
    let operator = element
        .child("operator")
        .map(|e| e.text.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GraphError::Malformed(format!("node '{id}' has no operator")))?;

    let mut node = Node::new(id, operator);

    if let Some(sources) = element.child("sources") {
        for source in &sources.children {
            let refid = source
                .attr("refid")
                .map(str::to_string)
                .unwrap_or_else(|| source.text.trim().to_string());
            if refid.is_empty() {
                continue;
            }
            node.sources.push(Source::new(&source.name, &refid));
        }
    }

    if let Some(parameters) = element.child("parameters") {
        node.config = element_to_config(parameters);
    }

    Ok(node)
}

/// Parses a graph description into a [`Graph`].
pub fn parse_graph(xml: &str) -> Result<Graph> {
    let root = parse_tree(xml)?;
    if root.name != "graph" {
        return Err(GraphError::Malformed(format!("expected <graph>, found <{}>", root.name)).into());
    }

    let mut graph = Graph::new();
    for element in root.children.iter().filter(|c| c.name == "node") {
        let node = element_to_node(element)?;
        debug!(id = %node.id, operator = %node.operator, "Parsed graph node");
        graph.add_node(node)?;
    }
    Ok(graph)
}

/// Reads a graph file, applying `${name}` substitutions first.
pub fn read_graph_file(path: &Path, variables: &BTreeMap<String, String>) -> Result<Graph> {
    let template = fs::read_to_string(path)?;
    parse_graph(&substitute(&template, variables))
}

/// Replaces every `${name}` whose name is in `variables` with the value,
/// XML-escaped; unknown placeholders are left untouched.
pub fn substitute(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(value) => out.push_str(&escape(value)),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Distinct `${name}` placeholders in order of first appearance.
pub fn template_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let name = after[..end].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
        rest = &after[end + 1..];
    }
    names
}
