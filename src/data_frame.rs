// Column-major table with per-column element types and per-cell NA holes.
// Factor columns intern their labels through an append-only map so repeated
// values share one level id.

use std::io::{self, Write};

use ahash::AHashMap;
use derive_more::Display;

const TAG: &str = "data-frame";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    #[display(fmt = "bool")]
    Bool,
    #[display(fmt = "int")]
    Int,
    #[display(fmt = "double")]
    Double,
    #[display(fmt = "string")]
    String,
    #[display(fmt = "factor")]
    Factor,
}

#[derive(Debug, Clone, Default)]
struct FactorLevels {
    labels: Vec<String>,
    index: AHashMap<String, usize>,
}

impl FactorLevels {
    // Existing level id or a freshly appended one.
    fn intern(&mut self, value: &str) -> usize {
        if let Some(&id) = self.index.get(value) {
            return id;
        }
        let id = self.labels.len();
        self.labels.push(value.to_string());
        self.index.insert(value.to_string(), id);
        id
    }
}

#[derive(Debug, Clone)]
enum ColumnData {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i32>>),
    Double(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Factor { levels: FactorLevels, codes: Vec<Option<usize>> },
}

impl ColumnData {
    fn new(typ: ColumnType, n_rows: usize) -> Self {
        match typ {
            ColumnType::Bool => Self::Bool(vec![None; n_rows]),
            ColumnType::Int => Self::Int(vec![None; n_rows]),
            ColumnType::Double => Self::Double(vec![None; n_rows]),
            ColumnType::String => Self::Str(vec![None; n_rows]),
            ColumnType::Factor => {
                Self::Factor { levels: FactorLevels::default(), codes: vec![None; n_rows] }
            }
        }
    }

    const fn typ(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::Int(_) => ColumnType::Int,
            Self::Double(_) => ColumnType::Double,
            Self::Str(_) => ColumnType::String,
            Self::Factor { .. } => ColumnType::Factor,
        }
    }

    fn push_na(&mut self) {
        match self {
            Self::Bool(v) => v.push(None),
            Self::Int(v) => v.push(None),
            Self::Double(v) => v.push(None),
            Self::Str(v) => v.push(None),
            Self::Factor { codes, .. } => codes.push(None),
        }
    }

    fn set_na(&mut self, row: usize) {
        match self {
            Self::Bool(v) => v[row] = None,
            Self::Int(v) => v[row] = None,
            Self::Double(v) => v[row] = None,
            Self::Str(v) => v[row] = None,
            Self::Factor { codes, .. } => codes[row] = None,
        }
    }

    fn is_na(&self, row: usize) -> bool {
        match self {
            Self::Bool(v) => v[row].is_none(),
            Self::Int(v) => v[row].is_none(),
            Self::Double(v) => v[row].is_none(),
            Self::Str(v) => v[row].is_none(),
            Self::Factor { codes, .. } => codes[row].is_none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataColumn {
    label: String,
    data: ColumnData,
}

impl DataColumn {
    #[must_use]
    pub const fn typ(&self) -> ColumnType {
        self.data.typ()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn n_factor_levels(&self) -> usize {
        match &self.data {
            ColumnData::Factor { levels, .. } => levels.labels.len(),
            _ => 0,
        }
    }

    #[must_use]
    pub fn factor_level(&self, level_id: usize) -> &str {
        match &self.data {
            ColumnData::Factor { levels, .. } => &levels.labels[level_id],
            _ => fatal!(TAG, "column {} is not a factor", self.label),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    n_rows: usize,
    columns: Vec<DataColumn>,
}

macro_rules! cell_accessors {
    ($get:ident, $set:ident, $variant:ident, $t:ty, $typename:expr) => {
        #[must_use]
        pub fn $get(&self, row: usize, col: usize) -> $t {
            self.check_indices(row, col);
            match &self.columns[col].data {
                ColumnData::$variant(v) => match &v[row] {
                    Some(value) => value.clone(),
                    None => fatal!(TAG, "data frame element at {row},{col} is N/A!"),
                },
                _ => fatal!(TAG, "data frame column {col} is not of type {}!", $typename),
            }
        }

        pub fn $set(&mut self, row: usize, col: usize, value: $t) {
            self.check_indices(row, col);
            match &mut self.columns[col].data {
                ColumnData::$variant(v) => v[row] = Some(value),
                _ => fatal!(TAG, "data frame column {col} is not of type {}!", $typename),
            }
        }
    };
}

impl DataFrame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column(&self, col: usize) -> &DataColumn {
        &self.columns[col]
    }

    pub fn add_column(&mut self, typ: ColumnType, label: &str) {
        self.columns.push(DataColumn {
            label: label.to_string(),
            data: ColumnData::new(typ, self.n_rows),
        });
    }

    /// Appends an all-NA row and returns its index.
    pub fn add_row(&mut self) -> usize {
        for column in &mut self.columns {
            column.data.push_na();
        }
        let row = self.n_rows;
        self.n_rows += 1;
        row
    }

    #[must_use]
    pub fn is_na(&self, row: usize, col: usize) -> bool {
        self.check_indices(row, col);
        self.columns[col].data.is_na(row)
    }

    pub fn set_na(&mut self, row: usize, col: usize) {
        self.check_indices(row, col);
        self.columns[col].data.set_na(row);
    }

    cell_accessors!(get_bool, set_bool, Bool, bool, "bool");
    cell_accessors!(get_int, set_int, Int, i32, "int");
    cell_accessors!(get_double, set_double, Double, f64, "double");
    cell_accessors!(get_string, set_string, Str, String, "string");

    #[must_use]
    pub fn get_factor(&self, row: usize, col: usize) -> &str {
        self.check_indices(row, col);
        match &self.columns[col].data {
            ColumnData::Factor { levels, codes } => match codes[row] {
                Some(code) => &levels.labels[code],
                None => fatal!(TAG, "data frame element at {row},{col} is N/A!"),
            },
            _ => fatal!(TAG, "data frame column {col} is not of type factor!"),
        }
    }

    pub fn set_factor(&mut self, row: usize, col: usize, value: &str) {
        self.check_indices(row, col);
        match &mut self.columns[col].data {
            ColumnData::Factor { levels, codes } => codes[row] = Some(levels.intern(value)),
            _ => fatal!(TAG, "data frame column {col} is not of type factor!"),
        }
    }

    /// Converts a column to a factor, interning its current values as
    /// levels in first-appearance order. NA cells stay NA; a factor column
    /// is left unchanged.
    pub fn make_factor(&mut self, col: usize) {
        if col >= self.n_columns() {
            fatal!(TAG, "column index {col} out of range");
        }
        if self.columns[col].typ() == ColumnType::Factor {
            return;
        }

        let old = std::mem::replace(
            &mut self.columns[col].data,
            ColumnData::new(ColumnType::Factor, self.n_rows),
        );

        for row in 0..self.n_rows {
            let text = match &old {
                ColumnData::Bool(v) => v[row].map(|b| if b { "true".to_string() } else { "false".to_string() }),
                ColumnData::Int(v) => v[row].map(|i| i.to_string()),
                ColumnData::Double(v) => v[row].map(|d| format_double(d)),
                ColumnData::Str(v) => v[row].clone(),
                ColumnData::Factor { .. } => unreachable!("factor handled above"),
            };
            if let Some(text) = text {
                self.set_factor(row, col, &text);
            }
        }
    }

    /// Writes the frame as CSV: a header row of quoted labels, then one
    /// line per row with strings and factor labels quoted (internal quotes
    /// doubled), booleans as `true`/`false`, and NA cells left empty.
    pub fn write_csv<W: Write>(&self, stream: &mut W) -> io::Result<()> {
        for (c, column) in self.columns.iter().enumerate() {
            if c > 0 {
                stream.write_all(b",")?;
            }
            write_quoted(stream, &column.label)?;
        }
        stream.write_all(b"\n")?;

        for row in 0..self.n_rows {
            for (c, column) in self.columns.iter().enumerate() {
                if c > 0 {
                    stream.write_all(b",")?;
                }
                if self.is_na(row, c) {
                    continue;
                }
                match &column.data {
                    ColumnData::Bool(v) => {
                        let s = if v[row] == Some(true) { "true" } else { "false" };
                        stream.write_all(s.as_bytes())?;
                    }
                    ColumnData::Int(v) => {
                        write!(stream, "{}", v[row].expect("checked by is_na"))?;
                    }
                    ColumnData::Double(v) => {
                        let d = v[row].expect("checked by is_na");
                        stream.write_all(format_double(d).as_bytes())?;
                    }
                    ColumnData::Str(v) => {
                        write_quoted(stream, v[row].as_deref().expect("checked by is_na"))?;
                    }
                    ColumnData::Factor { levels, codes } => {
                        let code = codes[row].expect("checked by is_na");
                        write_quoted(stream, &levels.labels[code])?;
                    }
                }
            }
            stream.write_all(b"\n")?;
        }
        Ok(())
    }

    fn check_indices(&self, row: usize, col: usize) {
        if row >= self.n_rows || col >= self.n_columns() {
            fatal!(
                TAG,
                "data frame index {row},{col} out of range for {}x{}",
                self.n_rows,
                self.n_columns()
            );
        }
    }
}

// Up to 15 significant digits, trailing fraction zeros trimmed.
fn format_double(d: f64) -> String {
    let mut s = format!("{d:.15e}");
    if let Some(epos) = s.find('e') {
        let exp: i32 = s[epos + 1..].parse().unwrap_or(0);
        if (-4..15).contains(&exp) {
            s = format!("{d:.*}", (15 - 1 - exp).max(0) as usize);
            if s.contains('.') {
                while s.ends_with('0') {
                    s.pop();
                }
                if s.ends_with('.') {
                    s.pop();
                }
            }
            return s;
        }
        let mantissa = &s[..epos];
        let mut mantissa = mantissa.to_string();
        if mantissa.contains('.') {
            while mantissa.ends_with('0') {
                mantissa.pop();
            }
            if mantissa.ends_with('.') {
                mantissa.pop();
            }
        }
        return format!("{mantissa}e{exp:+03}");
    }
    s
}

fn write_quoted<W: Write>(stream: &mut W, s: &str) -> io::Result<()> {
    stream.write_all(b"\"")?;
    for c in s.chars() {
        if c == '"' {
            stream.write_all(b"\"\"")?;
        } else {
            write!(stream, "{c}")?;
        }
    }
    stream.write_all(b"\"")
}
