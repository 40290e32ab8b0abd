//! Result assembly and type normalization.
//!
//! Reconciled pages are merged into one [`ResultTable`] whose column set is the
//! union of every page's columns. Cells are then cleaned up: line breaks are
//! stripped from strings and date-like columns are coerced to UTC timestamps.
//! Coercion is best effort; a value that doesn't parse becomes `Null`.

use crate::error::{Result, RetrievalError};
use crate::fetcher::ReconciledPage;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};

/// A single normalized cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(strip_line_breaks(s)),
            // Nested values are not expected from tabular endpoints; keep them as text.
            other => Value::String(other.to_string()),
        }
    }
}

/// Column type assigned after assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Numeric,
    Boolean,
    Timestamp,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Uniform table produced by a retrieval. Owned by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl ResultTable {
    /// Empty table with no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c.name == name)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Iterate over rows as `(column, value)` pairs.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &Value)>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .map(|c| c.name.as_str())
                .zip(row.iter())
                .collect()
        })
    }
}

/// Serializes as a JSON array of objects, one per row.
impl Serialize for ResultTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Record<'a>(&'a [Column], &'a [Value]);

        impl Serialize for Record<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (column, value) in self.0.iter().zip(self.1) {
                    map.serialize_entry(&column.name, value)?;
                }
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&Record(&self.columns, row))?;
        }
        seq.end()
    }
}

/// Returns true for names following a date naming convention.
///
/// The date word must sit on a camelCase or snake_case boundary: names ending
/// in `Date`, `DateTime` or `Timestamp` (`declarationDate`, `DateTime`), names
/// starting with `dateOf`, snake_case `_date` suffixes, and `lastRefresh`.
/// `candidate` and `lastUpdate` do not match.
pub fn is_date_like(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if matches!(
        lower.as_str(),
        "date" | "datetime" | "timestamp" | "lastrefresh"
    ) {
        return true;
    }
    ["Date", "DateTime", "Timestamp"]
        .iter()
        .any(|suffix| name.ends_with(suffix))
        || ["_date", "_datetime", "_timestamp"]
            .iter()
            .any(|suffix| lower.ends_with(suffix))
        || name.starts_with("dateOf")
        || name.starts_with("DateOf")
}

/// Parse the API's textual date formats into a UTC timestamp.
///
/// Accepts RFC 3339 (`2021-07-25T00:00:00.000Z`), naive date-times taken as
/// UTC, and plain dates at midnight UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn strip_line_breaks(s: String) -> String {
    if s.contains(['\r', '\n']) {
        s.replace(['\r', '\n'], "")
    } else {
        s
    }
}

/// Assembles reconciled pages into a [`ResultTable`].
pub struct Normalizer {
    identifier: String,
    date_fields: BTreeSet<String>,
}

impl Normalizer {
    /// `identifier` is moved to the front and kept once; `date_fields` are
    /// coerced in addition to the naming convention.
    pub fn new(identifier: impl Into<String>, date_fields: BTreeSet<String>) -> Self {
        Self {
            identifier: identifier.into(),
            date_fields,
        }
    }

    fn is_date_column(&self, name: &str) -> bool {
        self.date_fields
            .iter()
            .any(|field| field.eq_ignore_ascii_case(name))
            || is_date_like(name)
    }

    /// Merge `pages` into one table.
    pub fn assemble(&self, pages: Vec<ReconciledPage>) -> Result<ResultTable> {
        let expected_rows: usize = pages.iter().map(ReconciledPage::len).sum();

        // Union of column names, identifier first, case-insensitive for the identifier.
        let mut names: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let identifier_seen = pages
            .iter()
            .flat_map(|p| p.columns.iter())
            .find(|c| c.eq_ignore_ascii_case(&self.identifier));
        if let Some(id) = identifier_seen {
            positions.insert(id.clone(), 0);
            names.push(id.clone());
        }
        for page in &pages {
            for column in &page.columns {
                if positions.contains_key(column) {
                    continue;
                }
                if column.eq_ignore_ascii_case(&self.identifier) {
                    positions.insert(column.clone(), 0);
                    continue;
                }
                positions.insert(column.clone(), names.len());
                names.push(column.clone());
            }
        }

        let date_columns: Vec<bool> = names.iter().map(|n| self.is_date_column(n)).collect();
        let mut rows = Vec::with_capacity(expected_rows);

        for (page_index, page) in pages.into_iter().enumerate() {
            let targets: Vec<usize> = page.columns.iter().map(|c| positions[c]).collect();
            for cells in page.rows {
                if cells.len() != targets.len() {
                    return Err(RetrievalError::ResultAssembly(format!(
                        "page {} has a row with {} cells for {} columns",
                        page_index,
                        cells.len(),
                        targets.len()
                    )));
                }
                let mut row = vec![Value::Null; names.len()];
                for (cell, &target) in cells.into_iter().zip(&targets) {
                    let value = Value::from_json(cell);
                    // The identifier may arrive under two spellings; keep the first non-null.
                    if !row[target].is_null() && value.is_null() {
                        continue;
                    }
                    row[target] = if date_columns[target] {
                        coerce_date(value)
                    } else {
                        value
                    };
                }
                rows.push(row);
            }
        }

        if rows.len() != expected_rows {
            return Err(RetrievalError::ResultAssembly(format!(
                "assembled {} rows from pages holding {}",
                rows.len(),
                expected_rows
            )));
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column {
                column_type: infer_type(rows.iter().map(|r| &r[i])),
                name,
            })
            .collect();

        Ok(ResultTable { columns, rows })
    }
}

fn coerce_date(value: Value) -> Value {
    match value {
        Value::String(s) => parse_timestamp(&s).map_or(Value::Null, Value::Timestamp),
        Value::Timestamp(ts) => Value::Timestamp(ts),
        Value::Null => Value::Null,
        // Numbers and booleans in a date column are not dates.
        _ => Value::Null,
    }
}

fn infer_type<'a>(cells: impl Iterator<Item = &'a Value>) -> ColumnType {
    let mut seen: Option<ColumnType> = None;
    for cell in cells {
        let ty = match cell {
            Value::Null => continue,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(_) => ColumnType::Numeric,
            Value::String(_) => ColumnType::String,
            Value::Timestamp(_) => ColumnType::Timestamp,
        };
        match seen {
            None => seen = Some(ty),
            Some(prev) if prev == ty => {}
            Some(_) => return ColumnType::String,
        }
    }
    seen.unwrap_or(ColumnType::String)
}
