//! Serializers for [`XmlTree`].
//!
//! * [`OutputFormat::Pretty`] - one tag or text per line, two-space indent.
//! * [`OutputFormat::Compact`] - the same document on a single line.
//! * [`OutputFormat::Flattened`] - `name: text` and `name.attribute: value` lines, depth first.
//!
//! Values typed `NullType` are never emitted.

use std::fmt::Write;

use quick_xml::escape::{escape, partial_escape};

use crate::err::Result;
use crate::model::xml_tree::{NodeId, XmlElement, XmlTree};

const INDENT: &str = "  ";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
    Flattened,
}

impl OutputFormat {
    /// Parses the names accepted on the command line.
    pub fn from_name(name: &str) -> Option<OutputFormat> {
        match name {
            "pretty" | "xml" => Some(OutputFormat::Pretty),
            "compact" => Some(OutputFormat::Compact),
            "flat" | "flattened" => Some(OutputFormat::Flattened),
            _ => None,
        }
    }
}

/// Serializes every root of `tree`, separated by a newline.
pub fn serialize(tree: &XmlTree, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Pretty => to_pretty(tree),
        OutputFormat::Compact => to_compact(tree),
        OutputFormat::Flattened => to_flattened(tree),
    }
}

pub fn to_pretty(tree: &XmlTree) -> Result<String> {
    let mut lines = Vec::new();
    for &root in tree.roots() {
        write_pretty(tree, root, 0, &mut lines)?;
    }
    Ok(lines.join("\n"))
}

pub fn to_compact(tree: &XmlTree) -> Result<String> {
    let mut out = String::new();
    for (i, &root) in tree.roots().iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_compact(tree, root, &mut out)?;
    }
    Ok(out)
}

pub fn to_flattened(tree: &XmlTree) -> Result<String> {
    let mut lines = Vec::new();
    for &root in tree.roots() {
        write_flattened(tree, root, &mut lines)?;
    }
    Ok(lines.join("\n"))
}

fn write_start_tag(element: &XmlElement, out: &mut String) -> Result<()> {
    write!(out, "<{}", element.name)?;
    for attribute in element.attributes.iter().filter(|a| a.has_value()) {
        let value = attribute.value.as_deref().unwrap_or_default();
        write!(out, " {}=\"{}\"", attribute.name, escape(value))?;
    }
    Ok(())
}

fn write_pretty(tree: &XmlTree, node: NodeId, depth: usize, lines: &mut Vec<String>) -> Result<()> {
    let element = tree.element(node);
    let indent = INDENT.repeat(depth);

    let mut line = indent.clone();
    write_start_tag(element, &mut line)?;

    let text = element.visible_text();
    if element.children.is_empty() {
        match text {
            None => {
                line.push_str(" />");
                lines.push(line);
                return Ok(());
            }
            Some("") => {
                write!(line, "></{}>", element.name)?;
                lines.push(line);
                return Ok(());
            }
            Some(_) => {}
        }
    }

    line.push('>');
    lines.push(line);

    if let Some(text) = text.filter(|t| !t.is_empty()) {
        lines.push(format!("{indent}{INDENT}{}", partial_escape(text)));
    }
    for &child in &element.children {
        write_pretty(tree, child, depth + 1, lines)?;
    }
    lines.push(format!("{indent}</{}>", element.name));
    Ok(())
}

fn write_compact(tree: &XmlTree, node: NodeId, out: &mut String) -> Result<()> {
    let element = tree.element(node);
    write_start_tag(element, out)?;

    let text = element.visible_text();
    if element.children.is_empty() && text.is_none() {
        out.push_str("/>");
        return Ok(());
    }

    out.push('>');
    if let Some(text) = text {
        out.push_str(&partial_escape(text));
    }
    for &child in &element.children {
        write_compact(tree, child, out)?;
    }
    write!(out, "</{}>", element.name)?;
    Ok(())
}

fn write_flattened(tree: &XmlTree, node: NodeId, lines: &mut Vec<String>) -> Result<()> {
    let element = tree.element(node);

    if let Some(text) = element.visible_text().filter(|t| !t.is_empty()) {
        lines.push(format!("{}: {text}", element.name));
    }
    for attribute in element.attributes.iter().filter(|a| a.has_value()) {
        let mut line = String::new();
        write!(
            line,
            "{}.{}: {}",
            element.name,
            attribute.name,
            attribute.value.as_deref().unwrap_or_default()
        )?;
        lines.push(line);
    }
    for &child in &element.children {
        write_flattened(tree, child, lines)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::value_variant::BinXmlValueType;
    use pretty_assertions::assert_eq;

    fn sample_tree() -> XmlTree {
        let mut tree = XmlTree::new();
        let event = tree.new_element("Event");
        tree.add_root(event);

        let system = tree.new_element("System");
        tree.add_child(event, system);
        let provider = tree.new_element("Provider");
        tree.add_child(system, provider);
        tree.add_attribute(provider, "Name", "A&B", BinXmlValueType::StringType);

        let event_id = tree.new_element("EventID");
        tree.add_child(system, event_id);
        tree.set_text(event_id, "4624", BinXmlValueType::UInt16Type);

        let correlation = tree.new_element("Correlation");
        tree.add_child(system, correlation);
        tree.add_attribute(correlation, "ActivityID", "", BinXmlValueType::NullType);

        let data = tree.new_element("Data");
        tree.add_child(event, data);
        tree.set_text(data, "<x>", BinXmlValueType::StringType);

        tree
    }

    #[test]
    fn test_pretty_output() {
        assert_eq!(
            to_pretty(&sample_tree()).unwrap(),
            "<Event>\n  <System>\n    <Provider Name=\"A&amp;B\" />\n    <EventID>\n      4624\n    </EventID>\n    <Correlation />\n  </System>\n  <Data>\n    &lt;x&gt;\n  </Data>\n</Event>"
        );
    }

    #[test]
    fn test_compact_output() {
        assert_eq!(
            to_compact(&sample_tree()).unwrap(),
            "<Event><System><Provider Name=\"A&amp;B\"/><EventID>4624</EventID><Correlation/></System><Data>&lt;x&gt;</Data></Event>"
        );
    }

    #[test]
    fn test_flattened_output() {
        assert_eq!(
            to_flattened(&sample_tree()).unwrap(),
            "Provider.Name: A&B\nEventID: 4624\nData: <x>"
        );
    }

    #[test]
    fn test_empty_text_keeps_both_tags() {
        let mut tree = XmlTree::new();
        let data = tree.new_element("Data");
        tree.add_root(data);
        tree.set_text(data, "", BinXmlValueType::StringType);

        assert_eq!(to_pretty(&tree).unwrap(), "<Data></Data>");
        assert_eq!(to_compact(&tree).unwrap(), "<Data></Data>");
        assert_eq!(to_flattened(&tree).unwrap(), "");
    }

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::from_name("flat"), Some(OutputFormat::Flattened));
        assert_eq!(OutputFormat::from_name("pretty"), Some(OutputFormat::Pretty));
        assert_eq!(OutputFormat::from_name("json"), None);
    }
}
