//! XPath-subset extraction for `XML` output transforms.
//!
//! The evaluator supports the path shapes upstream tool definitions actually
//! use: absolute child steps (`/root/item/name`), descendant steps
//! (`//name`), attribute selection (`.../@attr`) and explicit `text()`.
//! Documents are materialized into a small DOM from the quick-xml event
//! stream once per response.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

fn parse_document(body: &[u8]) -> Result<XmlNode> {
    let text = String::from_utf8_lossy(body);
    let mut reader = Reader::from_str(&text);

    let mut root = XmlNode::default();
    let mut stack: Vec<XmlNode> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let mut node = XmlNode {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in start.attributes().flatten() {
                    node.attributes.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        String::from_utf8_lossy(&attr.value).into_owned(),
                    ));
                }
                stack.push(node);
            }
            Ok(Event::Empty(start)) => {
                let mut node = XmlNode {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    ..Default::default()
                };
                for attr in start.attributes().flatten() {
                    node.attributes.push((
                        String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                        String::from_utf8_lossy(&attr.value).into_owned(),
                    ));
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root.children.push(node),
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&text.decode().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or_else(|| Error::ResponseParseFailed {
                    reason: "unbalanced XML end tag".into(),
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root.children.push(node),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(Error::ResponseParseFailed {
                    reason: format!("invalid XML: {err}"),
                })
            }
        }
    }

    if !stack.is_empty() {
        return Err(Error::ResponseParseFailed {
            reason: "unterminated XML element".into(),
        });
    }
    Ok(root)
}

#[derive(Debug)]
enum Step<'a> {
    Child(&'a str),
    Descendant(&'a str),
    Attribute(&'a str),
    Text,
}

fn parse_expression(expression: &str) -> Result<Vec<Step<'_>>> {
    let mut steps = Vec::new();
    let mut rest = expression.trim();
    if rest.is_empty() {
        return Err(Error::TransformFailed {
            reason: "empty XPath expression".into(),
        });
    }

    while !rest.is_empty() {
        let descendant = if let Some(stripped) = rest.strip_prefix("//") {
            rest = stripped;
            true
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
            false
        } else {
            false
        };

        let end = rest.find('/').unwrap_or(rest.len());
        let token = &rest[..end];
        rest = &rest[end..];

        if token.is_empty() {
            continue;
        }
        if let Some(attr) = token.strip_prefix('@') {
            steps.push(Step::Attribute(attr));
        } else if token == "text()" {
            steps.push(Step::Text);
        } else if descendant {
            steps.push(Step::Descendant(token));
        } else {
            steps.push(Step::Child(token));
        }
    }
    Ok(steps)
}

fn collect_descendants<'a>(node: &'a XmlNode, name: &str, out: &mut Vec<&'a XmlNode>) {
    for child in &node.children {
        if child.name == name {
            out.push(child);
        }
        collect_descendants(child, name, out);
    }
}

fn evaluate<'a>(root: &'a XmlNode, steps: &[Step<'_>]) -> Vec<String> {
    let mut nodes: Vec<&XmlNode> = vec![root];

    for (index, step) in steps.iter().enumerate() {
        match step {
            Step::Child(name) => {
                nodes = nodes
                    .iter()
                    .flat_map(|node| node.children.iter().filter(|c| c.name == *name))
                    .collect();
            }
            Step::Descendant(name) => {
                let mut found = Vec::new();
                for node in &nodes {
                    collect_descendants(node, name, &mut found);
                }
                nodes = found;
            }
            Step::Attribute(name) => {
                debug_assert_eq!(index, steps.len() - 1);
                return nodes
                    .iter()
                    .filter_map(|node| {
                        node.attributes
                            .iter()
                            .find(|(key, _)| key == name)
                            .map(|(_, value)| value.clone())
                    })
                    .collect();
            }
            Step::Text => {
                return nodes.iter().map(|node| node.text.trim().to_string()).collect();
            }
        }
    }

    nodes.iter().map(|node| node.text.trim().to_string()).collect()
}

pub fn extract(body: &[u8], rules: &std::collections::BTreeMap<String, String>) -> Result<Value> {
    let document = parse_document(body)?;

    let mut out = Map::new();
    for (field, expression) in rules {
        let steps = parse_expression(expression)?;
        let matches = evaluate(&document, &steps);
        let value = match matches.len() {
            0 => Value::Null,
            1 => Value::String(matches.into_iter().next().unwrap()),
            _ => Value::Array(matches.into_iter().map(Value::String).collect()),
        };
        out.insert(field.clone(), value);
    }
    Ok(super::map_to_value(out))
}
