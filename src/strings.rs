// Escape handling shared by the JSON and CSV front-ends: decoding of
// backslash escapes ("readable" strings), decoding of doubled quotes in CSV
// fields, and re-escaping for serialisation.

use std::fmt::{self, Write};

const TAG: &str = "strings";

/// Decodes the escapes `\" \\ \/ \b \f \n \r \t` of a readable string.
/// Unknown escapes and a trailing lone backslash are fatal.
#[must_use]
pub fn from_readable(readable: &str) -> String {
    let mut out = String::with_capacity(readable.len());
    let mut chars = readable.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('f') => out.push('\u{000C}'),
            Some('b') => out.push('\u{0008}'),
            Some('"') => out.push('"'),
            Some(c) => fatal!(TAG, "Unexpected control character '{c}' in readable string!"),
            None => fatal!(TAG, "Missing control character after \\ in readable string!"),
        }
    }
    out
}

/// Decodes `""` pairs of a double-quoted CSV field body to single quotes.
/// A quote that is not part of a pair is fatal.
#[must_use]
pub fn from_double_quoted(dquoted: &str) -> String {
    let mut out = String::with_capacity(dquoted.len());
    let mut chars = dquoted.chars();
    while let Some(c) = chars.next() {
        if c != '"' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('"') => out.push('"'),
            Some(c) => fatal!(TAG, "Expected \" found '{c}' in double quoted string!"),
            None => fatal!(TAG, "Missing double quote in double quoted string!"),
        }
    }
    out
}

/// Writes `s` surrounded by quotes with the readable escapes applied.
pub fn write_readable<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            '\u{0008}' => out.write_str("\\b")?,
            '\u{000C}' => out.write_str("\\f")?,
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}
