// Character lexer over a byte-oriented source string: line/column tracking,
// greedy literal prefix matching with state restore, and the NUMBER and
// QUOTED_STRING recognisers shared by the JSON and CSV lexers. Errors are
// fatal and carry a "Line L, Column C:" prefix.

const TAG: &str = "lexer";

const TAB_WIDTH: u32 = 8;

macro_rules! lexer_fatal {
    ($lex:expr, $($arg:tt)*) => {
        fatal!(
            TAG,
            "Line {}, Column {}: {}",
            $lex.line_no,
            $lex.col_no,
            format_args!($($arg)*)
        )
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberType {
    Integer,
    FloatingPoint,
}

#[derive(Clone, Copy)]
struct LexerState {
    pos: usize,
    c: Option<u8>,
    line_no: u32,
    col_no: u32,
}

#[derive(Debug)]
pub struct Lexer<'a> {
    text: &'a str,
    pos: usize,
    c: Option<u8>,

    line_no: u32,
    col_no: u32,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(text: &'a str) -> Self {
        let mut lex = Self {
            text,
            pos: 0,
            c: text.as_bytes().first().copied(),
            line_no: 1,
            col_no: 0,
        };
        lex.bump_counters();
        lex
    }

    #[must_use]
    pub const fn text(&self) -> &'a str {
        self.text
    }

    /// Byte offset of the current character (the text length at EOF).
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Current character, `None` at end of input.
    #[must_use]
    pub const fn current_char(&self) -> Option<u8> {
        self.c
    }

    #[must_use]
    pub const fn line_no(&self) -> u32 {
        self.line_no
    }

    #[must_use]
    pub const fn col_no(&self) -> u32 {
        self.col_no
    }

    fn bump_counters(&mut self) {
        match self.c {
            Some(b'\n') => {
                self.line_no += 1;
                self.col_no = 0;
            }
            Some(b'\r') => self.col_no = 0,
            Some(b'\t') => self.col_no += TAB_WIDTH,
            // Plain characters and EOF both advance one column.
            _ => self.col_no += 1,
        }
    }

    /// Advances one character and returns the new current character.
    pub fn consume(&mut self) -> Option<u8> {
        if self.pos < self.text.len() {
            self.pos += 1;
        }
        self.c = self.text.as_bytes().get(self.pos).copied();
        self.bump_counters();
        self.c
    }

    fn save(&self) -> LexerState {
        LexerState { pos: self.pos, c: self.c, line_no: self.line_no, col_no: self.col_no }
    }

    fn restore(&mut self, state: LexerState) {
        self.pos = state.pos;
        self.c = state.c;
        self.line_no = state.line_no;
        self.col_no = state.col_no;
    }

    /// Greedy literal prefix match. Consumes `s` entirely on success; on any
    /// mismatch the position and line/column state are restored and nothing
    /// is consumed.
    pub fn match_prefix(&mut self, s: &str) -> bool {
        let start = self.save();
        for &b in s.as_bytes() {
            if self.c == Some(b) {
                self.consume();
            } else {
                self.restore(start);
                return false;
            }
        }
        true
    }

    /// Recognises a number: optional leading `-`, digits, optional fraction
    /// and exponent. Returns the matched slice and whether it is an integer
    /// or a floating-point literal. Malformed numbers are fatal.
    pub fn number(&mut self) -> (&'a str, NumberType) {
        let start = self.pos;
        let bytes = self.text.as_bytes();

        if self.c == Some(b'-') {
            self.consume();
        }
        while self.c.is_some_and(|c| c.is_ascii_digit()) {
            self.consume();
        }

        let len = self.pos - start;
        if bytes[start] == b'-' && len == 1 {
            lexer_fatal!(self, "- should be followed by at least one digit");
        } else if bytes[start] == b'0' && len > 1 {
            lexer_fatal!(self, "Multi-digit numbers can not start with 0");
        } else if len > 2 && bytes[start] == b'-' && bytes[start + 1] == b'0' {
            lexer_fatal!(self, "Multi-digit numbers can not start with -0");
        }

        if self.c != Some(b'.') && self.c != Some(b'e') && self.c != Some(b'E') {
            return (&self.text[start..self.pos], NumberType::Integer);
        }

        if self.c == Some(b'.') {
            self.consume();
            if !self.c.is_some_and(|c| c.is_ascii_digit()) {
                lexer_fatal!(self, "Floating-point fraction should have at least one digit!");
            }
            while self.c.is_some_and(|c| c.is_ascii_digit()) {
                self.consume();
            }
        }

        if self.c == Some(b'e') || self.c == Some(b'E') {
            self.consume();
            if self.c == Some(b'+') || self.c == Some(b'-') {
                self.consume();
            }
            if !self.c.is_some_and(|c| c.is_ascii_digit()) {
                lexer_fatal!(self, "Floating-point exponent should have at least one digit!");
            }
            while self.c.is_some_and(|c| c.is_ascii_digit()) {
                self.consume();
            }
        }

        (&self.text[start..self.pos], NumberType::FloatingPoint)
    }

    /// Recognises a quoted string starting at the current `"`. Escape
    /// sequences are validated but not decoded; the returned slice is the
    /// raw text between the quotes. A missing closing quote is fatal.
    pub fn quoted_string(&mut self) -> &'a str {
        let start = self.pos + 1; // skip "
        loop {
            if self.c == Some(b'\\') {
                self.consume();
                match self.c {
                    Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => {
                        self.consume();
                    }
                    _ => lexer_fatal!(
                        self,
                        "Unknown control character in string: \\{}",
                        self.c.map_or(String::from("<eof>"), |c| char::from(c).to_string())
                    ),
                }
            } else {
                self.consume();
            }

            if self.c.is_none() || self.c == Some(b'"') {
                break;
            }
        }

        if self.c != Some(b'"') {
            lexer_fatal!(self, "Missing closing \" for string");
        }
        self.consume();

        let end = self.pos - 1; // omit "
        &self.text[start..end]
    }
}
