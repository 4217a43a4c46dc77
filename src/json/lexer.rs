// JSON token stream over the character lexer. Keyword literals are matched
// exactly; STRING tokens are unescaped here so the parser only ever sees
// decoded text.

use crate::lexer::{Lexer, NumberType};
use crate::strings;

const TAG: &str = "json-lexer";

macro_rules! json_lexer_fatal {
    ($jlex:expr, $($arg:tt)*) => {
        fatal!(
            TAG,
            "Line {}, Column {}: {}",
            $jlex.lex.line_no(),
            $jlex.lex.col_no(),
            format_args!($($arg)*)
        )
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonToken {
    Eof,
    LSBrac,
    RSBrac,
    LCBrac,
    RCBrac,
    Comma,
    Colon,
    True,
    False,
    Null,
    Integer(String),
    FpNum(String),
    String(String),
}

impl JsonToken {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Eof => "EOF",
            Self::LSBrac => "[",
            Self::RSBrac => "]",
            Self::LCBrac => "{",
            Self::RCBrac => "}",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Integer(_) => "INTEGER",
            Self::FpNum(_) => "FPNUM",
            Self::String(_) => "STRING",
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Integer(text) | Self::FpNum(text) | Self::String(text) => {
                format!("<{}:'{}'>", self.name(), text)
            }
            _ => format!("<{}>", self.name()),
        }
    }
}

#[derive(Debug)]
pub struct JsonLexer<'a> {
    lex: Lexer<'a>,
}

impl<'a> JsonLexer<'a> {
    #[must_use]
    pub fn new(json_text: &'a str) -> Self {
        Self { lex: Lexer::new(json_text) }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.lex.current_char(), Some(b'\n' | b'\r' | b'\t' | b' ')) {
            self.lex.consume();
        }
    }

    fn match_keyword(&mut self, rest: &str, token: JsonToken) -> JsonToken {
        self.lex.consume();
        if !self.lex.match_prefix(rest) {
            json_lexer_fatal!(self, "Expecting '{rest}'!");
        }
        token
    }

    fn number(&mut self) -> JsonToken {
        let (text, typ) = self.lex.number();
        match typ {
            NumberType::Integer => JsonToken::Integer(text.to_string()),
            NumberType::FloatingPoint => JsonToken::FpNum(text.to_string()),
        }
    }

    pub fn next_token(&mut self) -> JsonToken {
        loop {
            let Some(c) = self.lex.current_char() else {
                return JsonToken::Eof;
            };

            match c {
                b'\n' | b'\r' | b'\t' | b' ' => self.skip_whitespace(),
                b'[' => {
                    self.lex.consume();
                    return JsonToken::LSBrac;
                }
                b']' => {
                    self.lex.consume();
                    return JsonToken::RSBrac;
                }
                b'{' => {
                    self.lex.consume();
                    return JsonToken::LCBrac;
                }
                b'}' => {
                    self.lex.consume();
                    return JsonToken::RCBrac;
                }
                b',' => {
                    self.lex.consume();
                    return JsonToken::Comma;
                }
                b':' => {
                    self.lex.consume();
                    return JsonToken::Colon;
                }
                b't' => return self.match_keyword("rue", JsonToken::True),
                b'f' => return self.match_keyword("alse", JsonToken::False),
                b'n' => return self.match_keyword("ull", JsonToken::Null),
                b'"' => {
                    let raw = self.lex.quoted_string();
                    return JsonToken::String(strings::from_readable(raw));
                }
                b'-' | b'0'..=b'9' => return self.number(),
                c => {
                    json_lexer_fatal!(
                        self,
                        "Unexpected character while parsing JSON: '{}'",
                        char::from(c)
                    );
                }
            }
        }
    }
}
