// CSV front-end: a token stream over the character lexer and a parser that
// materialises a data frame. Column types are inferred in a second pass over
// the parsed records, promoting along Int < Double, with Bool mixed into any
// numeric collapsing to String and String dominating everything.

use crate::data_frame::{ColumnType, DataFrame};
use crate::lexer::Lexer;
use crate::strings;

const TAG: &str = "csv";

macro_rules! csv_lexer_fatal {
    ($clex:expr, $($arg:tt)*) => {
        fatal!(
            TAG,
            "Line {}, Column {}: {}",
            $clex.lex.line_no(),
            $clex.lex.col_no(),
            format_args!($($arg)*)
        )
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvToken {
    Eof,
    /// End of record.
    Eor,
    Comma,
    Field(String),
    QuotedField(String),
}

impl CsvToken {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Eof => "EOF",
            Self::Eor => "EOR",
            Self::Comma => ",",
            Self::Field(_) => "FIELD",
            Self::QuotedField(_) => "QFIELD",
        }
    }
}

#[derive(Debug)]
pub struct CsvLexer<'a> {
    lex: Lexer<'a>,
}

impl<'a> CsvLexer<'a> {
    #[must_use]
    pub fn new(csv_text: &'a str) -> Self {
        Self { lex: Lexer::new(csv_text) }
    }

    pub fn next_token(&mut self) -> CsvToken {
        match self.lex.current_char() {
            None => CsvToken::Eof,
            Some(b',') => {
                self.lex.consume();
                CsvToken::Comma
            }
            Some(b'\n') => {
                self.lex.consume();
                CsvToken::Eor
            }
            Some(b'"') => self.quoted_field(),
            Some(_) => self.field(),
        }
    }

    // Unquoted field: runs to comma, newline or EOF; quotes are not allowed.
    fn field(&mut self) -> CsvToken {
        let start = self.lex.position();

        loop {
            match self.lex.current_char() {
                Some(b'"') => {
                    csv_lexer_fatal!(self, "Unquoted fields can not contain \"");
                }
                Some(c) if c != b'\n' && c != b',' => {
                    self.lex.consume();
                }
                _ => break,
            }
        }

        let end = self.lex.position();
        CsvToken::Field(self.lex.text()[start..end].to_string())
    }

    // Quoted field: "" is an embedded quote, newlines are admitted, and the
    // body is decoded on the fly.
    fn quoted_field(&mut self) -> CsvToken {
        self.lex.consume(); // skip "
        let start = self.lex.position();

        let mut has_closing_dquote = false;
        while let Some(c) = self.lex.current_char() {
            if c == b'"' {
                if self.lex.consume() != Some(b'"') {
                    has_closing_dquote = true;
                    break;
                }
            }
            self.lex.consume();
        }

        if !has_closing_dquote {
            csv_lexer_fatal!(self, "Missing closing \" for string");
        }

        let end = self.lex.position() - 1;
        CsvToken::QuotedField(strings::from_double_quoted(&self.lex.text()[start..end]))
    }
}

// One parsed cell: NA, or text plus the type its unquoted form classifies
// to. Quoted fields are always strings.
#[derive(Debug, Clone)]
struct CsvField {
    text: Option<String>,
    typ: ColumnType,
}

impl CsvField {
    fn na() -> Self {
        Self { text: None, typ: ColumnType::String }
    }

    fn from_token(token: CsvToken) -> Self {
        match token {
            CsvToken::Field(text) => {
                let typ = field_type_from_text(&text);
                Self { text: Some(text), typ }
            }
            CsvToken::QuotedField(text) => Self { text: Some(text), typ: ColumnType::String },
            _ => fatal!(TAG, "token {} does not carry field text", token.name()),
        }
    }
}

fn field_type_from_text(text: &str) -> ColumnType {
    if text == "true" || text == "false" {
        return ColumnType::Bool;
    }
    if text.parse::<i32>().is_ok() {
        return ColumnType::Int;
    }
    if text.parse::<f64>().is_ok() {
        return ColumnType::Double;
    }
    ColumnType::String
}

// STRING > BOOL > DOUBLE > INT, BOOL mixed with a numeric becomes STRING.
fn pick_larger_type(t0: ColumnType, t1: ColumnType) -> ColumnType {
    use ColumnType::{Bool, Double, Int, String};

    if t0 == String || t1 == String {
        return String;
    }

    if t0 == Bool && t1 == Bool {
        return Bool;
    } else if t0 == Bool || t1 == Bool {
        return String;
    }

    if t0 == Double || t1 == Double {
        return Double;
    }

    Int
}

#[derive(Debug)]
pub struct CsvParser<'a> {
    clex: CsvLexer<'a>,
    token: CsvToken,
}

impl<'a> CsvParser<'a> {
    #[must_use]
    pub fn new(mut clex: CsvLexer<'a>) -> Self {
        let token = clex.next_token();
        Self { clex, token }
    }

    /// Parses the whole input into a data frame. The first record is the
    /// header; every record must have as many fields as the first.
    /// An empty input is fatal.
    pub fn parse(&mut self) -> DataFrame {
        let records = self.parse_csv();
        records_to_data_frame(&records)
    }

    fn consume(&mut self) -> CsvToken {
        std::mem::replace(&mut self.token, self.clex.next_token())
    }

    fn parse_csv(&mut self) -> Vec<Vec<CsvField>> {
        if self.token == CsvToken::Eof {
            fatal!(TAG, "Can not parse empty CSV!");
        }

        let mut records = Vec::new();
        let mut n_columns = 0usize;
        while self.token != CsvToken::Eof {
            let record = self.parse_record(records.len());
            if n_columns == 0 {
                n_columns = record.len();
            } else if record.len() != n_columns {
                fatal!(
                    TAG,
                    "Error parsing CSV: Number of fields {} of record {} does not match the previous columns {}",
                    record.len(),
                    records.len(),
                    n_columns
                );
            }
            records.push(record);
        }
        records
    }

    // One record: fields separated by commas, ended by EOR or EOF. Missing
    // fields around commas become NA.
    fn parse_record(&mut self, record_no: usize) -> Vec<CsvField> {
        let mut fields = Vec::new();

        match &self.token {
            CsvToken::Eor => {
                fatal!(TAG, "Empty record {record_no} while parsing CSV");
            }
            CsvToken::Comma => fields.push(CsvField::na()),
            _ => fields.push(CsvField::from_token(self.consume())),
        }

        while self.token == CsvToken::Comma {
            self.consume();
            match &self.token {
                CsvToken::Comma | CsvToken::Eor | CsvToken::Eof => fields.push(CsvField::na()),
                _ => fields.push(CsvField::from_token(self.consume())),
            }
        }

        match &self.token {
            CsvToken::Eor => {
                self.consume();
            }
            CsvToken::Eof => {}
            other => fatal!(TAG, "Expecting comma, found {}", other.name()),
        }

        fields
    }
}

// Second pass: infer each column's type over the data rows (the header row
// is excluded, NA cells do not vote), then fill the frame.
fn records_to_data_frame(records: &[Vec<CsvField>]) -> DataFrame {
    let n_columns = records[0].len();

    let mut types: Vec<Option<ColumnType>> = vec![None; n_columns];
    for record in &records[1..] {
        for (c, field) in record.iter().enumerate() {
            if field.text.is_none() {
                continue;
            }
            types[c] = Some(match types[c] {
                None => field.typ,
                Some(t) => pick_larger_type(t, field.typ),
            });
        }
    }

    let mut df = DataFrame::new();
    for (c, typ) in types.iter().enumerate() {
        let label = records[0][c].text.as_deref().unwrap_or("");
        df.add_column(typ.unwrap_or(ColumnType::String), label);
    }

    for record in &records[1..] {
        let row = df.add_row();
        for (c, field) in record.iter().enumerate() {
            let Some(text) = &field.text else {
                continue;
            };
            match df.column(c).typ() {
                ColumnType::String => df.set_string(row, c, text.clone()),
                ColumnType::Bool => df.set_bool(row, c, text == "true"),
                ColumnType::Int => df.set_int(row, c, text.parse().unwrap_or(0)),
                ColumnType::Double => df.set_double(row, c, text.parse().unwrap_or(0.0)),
                ColumnType::Factor => df.set_factor(row, c, text),
            }
        }
    }

    df
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<CsvToken> {
        let mut clex = CsvLexer::new(text);
        let mut out = Vec::new();
        loop {
            let t = clex.next_token();
            let eof = t == CsvToken::Eof;
            out.push(t);
            if eof {
                return out;
            }
        }
    }

    fn parse(text: &str) -> DataFrame {
        CsvParser::new(CsvLexer::new(text)).parse()
    }

    #[test]
    fn single_record_tokens() {
        assert_eq!(
            vec![
                CsvToken::Field("123".to_string()),
                CsvToken::Comma,
                CsvToken::Field("abcd".to_string()),
                CsvToken::Comma,
                CsvToken::Comma,
                CsvToken::QuotedField("abcd".to_string()),
                CsvToken::Comma,
                CsvToken::Field("123.0".to_string()),
                CsvToken::Eof,
            ],
            tokens("123,abcd,,\"abcd\",123.0")
        );
    }

    #[test]
    fn embedded_quotes_and_newlines_in_quoted_fields() {
        assert_eq!(
            vec![CsvToken::QuotedField("ab\"cd".to_string()), CsvToken::Eof],
            tokens("\"ab\"\"cd\"")
        );
        assert_eq!(
            vec![CsvToken::QuotedField("ab\ncd".to_string()), CsvToken::Eof],
            tokens("\"ab\ncd\"")
        );
    }

    #[test]
    fn two_records_with_missing_fields() {
        // Missing fields at (0,1) and (1,2).
        let df = parse("abcd,,\"abcd\"\nabcd,\"abcd\",\n");
        assert_eq!(3, df.n_columns());
        assert_eq!(1, df.n_rows());
        assert!(!df.is_na(0, 0));
        assert!(!df.is_na(0, 1));
        assert!(df.is_na(0, 2));
    }

    #[test]
    fn header_becomes_labels_and_rows_follow() {
        let df = parse("name,count\nalpha,3\nbeta,5\n");
        assert_eq!(2, df.n_columns());
        assert_eq!(2, df.n_rows());
        assert_eq!("name", df.column(0).label());
        assert_eq!("count", df.column(1).label());
        assert_eq!(ColumnType::Int, df.column(1).typ());
        assert_eq!(5, df.get_int(1, 1));
    }

    #[test]
    fn int_and_double_promote_to_double() {
        let df = parse("v\n1\n1.5\n");
        assert_eq!(ColumnType::Double, df.column(0).typ());
        assert_eq!(1.0, df.get_double(0, 0));
        assert_eq!(1.5, df.get_double(1, 0));
    }

    #[test]
    fn bool_mixed_with_numeric_promotes_to_string() {
        let df = parse("v\n1\n1.5\ntrue\n");
        assert_eq!(ColumnType::String, df.column(0).typ());
        assert_eq!("true", df.get_string(2, 0));
    }

    #[test]
    fn na_cells_do_not_affect_inference() {
        let df = parse("a,b\n1,\n2,true\n");
        assert_eq!(ColumnType::Int, df.column(0).typ());
        assert_eq!(ColumnType::Bool, df.column(1).typ());
        assert!(df.is_na(0, 1));
        assert!(df.get_bool(1, 1));
    }

    #[test]
    fn quoted_numbers_stay_strings() {
        let df = parse("v\n\"1\"\n\"2\"\n");
        assert_eq!(ColumnType::String, df.column(0).typ());
        assert_eq!("1", df.get_string(0, 0));
    }

    #[test]
    fn all_na_column_defaults_to_string() {
        let df = parse("a,b\n1,\n2,\n");
        assert_eq!(ColumnType::String, df.column(1).typ());
    }

    #[test]
    fn csv_round_trip_through_data_frame() {
        let df = parse("name,n,ok\n\"a,b\",3,true\nplain,,false\n");
        let mut out = Vec::new();
        df.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let back = parse(&text);
        assert_eq!(df.n_rows(), back.n_rows());
        assert_eq!(df.n_columns(), back.n_columns());
        assert_eq!("a,b", back.get_string(0, 0));
        assert!(back.is_na(1, 1));
        assert!(!back.get_bool(1, 2));
    }

    #[test]
    #[should_panic(expected = "Can not parse empty CSV")]
    fn empty_input_is_fatal() {
        let _ = parse("");
    }

    #[test]
    #[should_panic(expected = "does not match the previous columns")]
    fn ragged_records_are_fatal() {
        let _ = parse("a,b\n1,2,3\n");
    }

    #[test]
    #[should_panic(expected = "Unquoted fields can not contain")]
    fn quote_inside_unquoted_field_is_fatal() {
        let _ = tokens("ab\"cd");
    }
}
