// JSON support built on the character lexer: a token stream, a recursive
// descent parser, and a tree of ordered-children nodes with a configurable
// pretty printer. Numbers keep their source text so round-trips never lose
// precision.

use std::fmt::Write;

use crate::keypoint::Keypoint;
use crate::strings;

pub mod lexer;
pub mod parser;

pub use self::lexer::{JsonLexer, JsonToken};
pub use self::parser::JsonParser;

const TAG: &str = "json";

const JSON_TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum JsonNode {
    /// Key/value pairs in document order.
    Object(Vec<(String, JsonNode)>),
    Array(Vec<JsonNode>),
    String(String),
    /// Integer literal, kept as source text.
    Integer(String),
    /// Floating-point literal, kept as source text.
    FpNumber(String),
    True,
    False,
    Null,
}

impl JsonNode {
    /// Parses a JSON document (array or object at the root). Malformed
    /// input is fatal with the offending token named.
    #[must_use]
    pub fn from_str(text: &str) -> Self {
        let mut parser = JsonParser::new(JsonLexer::new(text));
        parser.parse()
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::FpNumber(_) => "fpnumber",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
        }
    }

    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    /// Child count: pairs for objects, elements for arrays, zero otherwise.
    #[must_use]
    pub fn n_children(&self) -> usize {
        match self {
            Self::Object(members) => members.len(),
            Self::Array(elements) => elements.len(),
            _ => 0,
        }
    }

    /// Element at `position` of an array node.
    #[must_use]
    pub fn array_get(&self, position: usize) -> Option<&Self> {
        match self {
            Self::Array(elements) => elements.get(position),
            _ => None,
        }
    }

    /// Value of the first member named `name` of an object node.
    #[must_use]
    pub fn object_get(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Object(members) => {
                members.iter().find(|(key, _)| key == name).map(|(_, value)| value)
            }
            _ => None,
        }
    }

    /// Like [`Self::array_get`] but fatal when the element is missing.
    #[must_use]
    pub fn array_fget(&self, position: usize) -> &Self {
        self.array_get(position).unwrap_or_else(|| {
            fatal!(TAG, "JSON array has no element at position {position}!")
        })
    }

    /// Like [`Self::object_get`] but fatal when the member is missing.
    #[must_use]
    pub fn object_fget(&self, name: &str) -> &Self {
        self.object_get(name)
            .unwrap_or_else(|| fatal!(TAG, "JSON object has no element with name '{name}'!"))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(text) => text.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(text) | Self::FpNumber(text) => text.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            _ => None,
        }
    }

    /// Serialises the tree. Composites nested deeper than
    /// `pretty_print_level` are emitted on a single line.
    #[must_use]
    pub fn to_string_pretty(&self, pretty_print_level: i32) -> String {
        let mut out = String::new();
        self.print_recursive(&mut out, pretty_print_level, 0);
        out.push('\n');
        out
    }

    fn print_recursive(&self, out: &mut String, pretty_level: i32, tab_width: usize) {
        let pp = if pretty_level > 0 { "\n" } else { " " };
        let child_tab = if pretty_level > 0 { tab_width + JSON_TAB_WIDTH } else { 0 };

        match self {
            Self::Null => out.push_str("null"),
            Self::True => out.push_str("true"),
            Self::False => out.push_str("false"),
            Self::Integer(text) | Self::FpNumber(text) => out.push_str(text),
            Self::String(s) => {
                strings::write_readable(out, s).expect("writing to a String can not fail");
            }
            Self::Array(elements) => {
                out.push('[');
                out.push_str(pp);
                push_tab(out, child_tab);
                for (i, element) in elements.iter().enumerate() {
                    element.print_recursive(out, pretty_level - 1, tab_width + JSON_TAB_WIDTH);
                    if i + 1 < elements.len() {
                        out.push(',');
                        out.push_str(pp);
                        push_tab(out, child_tab);
                    }
                }
                out.push_str(pp);
                push_tab(out, child_tab.saturating_sub(JSON_TAB_WIDTH));
                out.push(']');
            }
            Self::Object(members) => {
                out.push('{');
                out.push_str(pp);
                push_tab(out, child_tab);
                for (i, (key, value)) in members.iter().enumerate() {
                    strings::write_readable(out, key).expect("writing to a String can not fail");
                    out.push_str(" : ");
                    value.print_recursive(out, pretty_level - 1, tab_width + JSON_TAB_WIDTH);
                    if i + 1 < members.len() {
                        out.push(',');
                        out.push_str(pp);
                        push_tab(out, child_tab);
                    }
                }
                out.push_str(pp);
                push_tab(out, child_tab.saturating_sub(JSON_TAB_WIDTH));
                out.push('}');
            }
        }
    }
}

fn push_tab(out: &mut String, width: usize) {
    for _ in 0..width {
        out.push(' ');
    }
}

fn f32_node(value: f32) -> JsonNode {
    let mut text = String::new();
    write!(text, "{value}").expect("writing to a String can not fail");
    if text.contains(['.', 'e', 'E']) || text == "NaN" || text.contains("inf") {
        JsonNode::FpNumber(text)
    } else {
        // Whole-valued floats print without a fraction; keep them fp.
        text.push_str(".0");
        JsonNode::FpNumber(text)
    }
}

/// Bundles a keypoint into a JSON object with one member per field.
#[must_use]
pub fn keypoint_to_json(key: &Keypoint) -> JsonNode {
    JsonNode::Object(vec![
        ("x".to_string(), JsonNode::Integer(key.x.to_string())),
        ("y".to_string(), JsonNode::Integer(key.y.to_string())),
        ("xs".to_string(), f32_node(key.xs)),
        ("ys".to_string(), f32_node(key.ys)),
        ("level".to_string(), JsonNode::Integer(key.level.to_string())),
        ("scale".to_string(), f32_node(key.scale)),
        ("sigma".to_string(), f32_node(key.sigma)),
        ("score".to_string(), f32_node(key.score)),
        ("ori".to_string(), f32_node(key.ori)),
        ("id".to_string(), JsonNode::Integer(key.id.to_string())),
    ])
}

/// Bundles a keypoint slice into a JSON array of keypoint objects.
#[must_use]
pub fn keypoints_to_json(keys: &[Keypoint]) -> JsonNode {
    JsonNode::Array(keys.iter().map(keypoint_to_json).collect())
}

/// Rebuilds a keypoint from an object produced by [`keypoint_to_json`].
/// Missing or mistyped members are fatal.
#[must_use]
pub fn keypoint_from_json(node: &JsonNode) -> Keypoint {
    fn int(node: &JsonNode, name: &str) -> i64 {
        node.object_fget(name)
            .as_i64()
            .unwrap_or_else(|| fatal!(TAG, "keypoint member '{name}' is not an integer"))
    }
    fn num(node: &JsonNode, name: &str) -> f32 {
        node.object_fget(name)
            .as_f64()
            .unwrap_or_else(|| fatal!(TAG, "keypoint member '{name}' is not a number"))
            as f32
    }

    Keypoint {
        x: int(node, "x") as i32,
        y: int(node, "y") as i32,
        xs: num(node, "xs"),
        ys: num(node, "ys"),
        level: int(node, "level") as i32,
        scale: num(node, "scale"),
        sigma: num(node, "sigma"),
        score: num(node, "score"),
        ori: num(node, "ori"),
        id: int(node, "id") as u64,
    }
}
