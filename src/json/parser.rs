// Recursive descent over the JSON token stream, building ordered-children
// trees. The grammar admits an array or object at the root; failures are
// fatal and name the unexpected token.

use super::lexer::{JsonLexer, JsonToken};
use super::JsonNode;

const TAG: &str = "json-parser";

#[derive(Debug)]
pub struct JsonParser<'a> {
    jlex: JsonLexer<'a>,
    token: JsonToken,
}

impl<'a> JsonParser<'a> {
    #[must_use]
    pub fn new(mut jlex: JsonLexer<'a>) -> Self {
        let token = jlex.next_token();
        Self { jlex, token }
    }

    /// Parses the whole document and returns the root node.
    pub fn parse(&mut self) -> JsonNode {
        let root = match self.token {
            JsonToken::LSBrac => self.parse_array(),
            JsonToken::LCBrac => self.parse_object(),
            _ => fatal!(
                TAG,
                "Expecting array or object; found {}",
                self.token.describe()
            ),
        };

        root
    }

    fn consume(&mut self) -> JsonToken {
        std::mem::replace(&mut self.token, self.jlex.next_token())
    }

    fn expect(&mut self, expected: &JsonToken) {
        if self.token == *expected {
            self.consume();
        } else {
            fatal!(TAG, "Expecting {}, found {}", expected.name(), self.token.name());
        }
    }

    fn parse_value(&mut self) -> JsonNode {
        match &self.token {
            JsonToken::String(_) => match self.consume() {
                JsonToken::String(s) => JsonNode::String(s),
                _ => unreachable!(),
            },
            JsonToken::Integer(_) => match self.consume() {
                JsonToken::Integer(text) => JsonNode::Integer(text),
                _ => unreachable!(),
            },
            JsonToken::FpNum(_) => match self.consume() {
                JsonToken::FpNum(text) => JsonNode::FpNumber(text),
                _ => unreachable!(),
            },
            JsonToken::True => {
                self.consume();
                JsonNode::True
            }
            JsonToken::False => {
                self.consume();
                JsonNode::False
            }
            JsonToken::Null => {
                self.consume();
                JsonNode::Null
            }
            JsonToken::LSBrac => self.parse_array(),
            JsonToken::LCBrac => self.parse_object(),
            _ => fatal!(
                TAG,
                "Expecting number, string, true, false, null, object or array, found {}",
                self.token.describe()
            ),
        }
    }

    fn parse_array(&mut self) -> JsonNode {
        self.expect(&JsonToken::LSBrac);

        let mut elements = Vec::new();
        if self.token != JsonToken::RSBrac {
            elements.push(self.parse_value());
            while self.token == JsonToken::Comma {
                self.consume();
                elements.push(self.parse_value());
            }
        }

        self.expect(&JsonToken::RSBrac);
        JsonNode::Array(elements)
    }

    fn parse_pair(&mut self) -> (String, JsonNode) {
        let key = match &self.token {
            JsonToken::String(_) => match self.consume() {
                JsonToken::String(s) => s,
                _ => unreachable!(),
            },
            other => fatal!(TAG, "Expecting STRING, found {}", other.name()),
        };
        self.expect(&JsonToken::Colon);
        (key, self.parse_value())
    }

    fn parse_object(&mut self) -> JsonNode {
        self.expect(&JsonToken::LCBrac);

        let mut members = Vec::new();
        if self.token != JsonToken::RCBrac {
            members.push(self.parse_pair());
            while self.token == JsonToken::Comma {
                self.consume();
                members.push(self.parse_pair());
            }
        }

        self.expect(&JsonToken::RCBrac);
        JsonNode::Object(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> JsonNode {
        JsonParser::new(JsonLexer::new(text)).parse()
    }

    #[test]
    fn nested_composites() {
        let node = parse(r#"{"points" : [{"x" : 1}, {"x" : 2}], "empty" : {}}"#);
        let points = node.object_fget("points");
        assert_eq!(2, points.n_children());
        assert_eq!(Some(2), points.array_fget(1).object_fget("x").as_i64());
        assert_eq!(0, node.object_fget("empty").n_children());
    }

    #[test]
    fn root_array_with_scalars() {
        let node = parse(r#"[null, true, false, "s", 7, -1.25]"#);
        assert_eq!(6, node.n_children());
        assert_eq!(Some(false), node.array_fget(2).as_bool());
        assert_eq!(Some(-1.25), node.array_fget(5).as_f64());
    }

    #[test]
    #[should_panic(expected = "Expecting array or object")]
    fn scalar_root_is_fatal() {
        let _ = parse("42");
    }

    #[test]
    #[should_panic(expected = "Expecting ]")]
    fn missing_bracket_is_fatal() {
        let _ = parse("[1, 2");
    }

    #[test]
    #[should_panic(expected = "Expecting STRING")]
    fn non_string_object_key_is_fatal() {
        let _ = parse("{1 : 2}");
    }
}
