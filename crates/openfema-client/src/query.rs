//! Query planning: filters, field selection and page descriptors.
//!
//! A [`FilterSpec`] maps field names to predicate strings in the form users
//! type them (`"= 01001"`, `">= 2010"`, or a bare value meaning equality).
//! [`QueryBuilder`] resolves the dataset, translates the predicates into an
//! OData `$filter` expression and produces the [`QueryDescriptor`] for the
//! first page. Later pages are derived with [`QueryDescriptor::page`].
//!
//! Clause shape, per field:
//!
//! - equality predicates are OR-joined (`state eq 'TX' or state eq 'LA'`)
//! - every other comparison is AND-joined (`yearOfLoss ge 2010 and yearOfLoss le 2020`)
//! - a field with more than one predicate is parenthesized
//!
//! Fields are then AND-joined, so the expression always has exactly one
//! top-level clause per field.

use crate::catalog::{DatasetCatalog, DatasetEntry};
use crate::config::MAX_PAGE_SIZE;
use crate::error::{Result, RetrievalError};

/// Comparison operators accepted in predicate strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    /// Operator prefixes, longest first so `>=` wins over `>`.
    const PREFIXES: [(&'static str, Comparison); 7] = [
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        ("!=", Comparison::Ne),
        ("<>", Comparison::Ne),
        ("=", Comparison::Eq),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ];

    /// OData keyword for this operator.
    pub fn as_odata(&self) -> &'static str {
        match self {
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Gt => "gt",
            Comparison::Ge => "ge",
            Comparison::Lt => "lt",
            Comparison::Le => "le",
        }
    }
}

/// A parsed predicate: operator plus raw (unescaped) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub op: Comparison,
    pub value: String,
}

impl Predicate {
    /// Parse `">= 2010"`, `"= 01001"` or a bare `"TX"` (implied equality).
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (op, rest) = Comparison::PREFIXES
            .iter()
            .find_map(|(prefix, op)| trimmed.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Comparison::Eq, trimmed));

        let value = rest.trim();
        if value.is_empty() {
            return Err(RetrievalError::InvalidQuery(format!(
                "predicate '{}' has no value",
                raw
            )));
        }

        Ok(Self {
            op,
            value: value.to_string(),
        })
    }

    fn render(&self, field: &str) -> String {
        format!("{} {} {}", field, self.op.as_odata(), escape_value(&self.value))
    }
}

/// Ordered mapping from field name to one or more predicate strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    fields: Vec<(String, Vec<String>)>,
}

impl FilterSpec {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add predicates for a field. Repeated calls for the same field append.
    pub fn field<I, S>(mut self, name: impl Into<String>, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(name, predicates);
        self
    }

    /// In-place variant of [`FilterSpec::field`].
    pub fn push<I, S>(&mut self, name: impl Into<String>, predicates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let predicates = predicates.into_iter().map(Into::into);
        match self.fields.iter_mut().find(|(f, _)| *f == name) {
            Some((_, existing)) => existing.extend(predicates),
            None => self.fields.push((name, predicates.collect())),
        }
    }

    /// Returns true if no field has been added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of distinct fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Render the OData `$filter` expression, or `None` for an empty filter.
    pub fn to_odata(&self) -> Result<Option<String>> {
        if self.fields.is_empty() {
            return Ok(None);
        }

        let clauses = self
            .fields
            .iter()
            .map(|(field, predicates)| field_clause(field, predicates))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(clauses.join(" and ")))
    }
}

fn field_clause(field: &str, raw_predicates: &[String]) -> Result<String> {
    validate_field_name(field)?;
    if raw_predicates.is_empty() {
        return Err(RetrievalError::InvalidQuery(format!(
            "field '{}' has no predicates",
            field
        )));
    }

    let predicates = raw_predicates
        .iter()
        .map(|p| Predicate::parse(p))
        .collect::<Result<Vec<_>>>()?;

    let (equalities, comparisons): (Vec<_>, Vec<_>) =
        predicates.iter().partition(|p| p.op == Comparison::Eq);

    let mut parts = Vec::with_capacity(comparisons.len() + 1);
    match equalities.len() {
        0 => {}
        1 => parts.push(equalities[0].render(field)),
        _ => {
            let any = equalities
                .iter()
                .map(|p| p.render(field))
                .collect::<Vec<_>>()
                .join(" or ");
            parts.push(format!("({})", any));
        }
    }
    parts.extend(comparisons.iter().map(|p| p.render(field)));

    // A single predicate needs no grouping; a lone OR group is already parenthesized.
    if parts.len() == 1 {
        Ok(parts.remove(0))
    } else {
        Ok(format!("({})", parts.join(" and ")))
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RetrievalError::InvalidQuery(format!(
            "'{}' is not a valid field name",
            name
        )))
    }
}

/// Escape a literal for inclusion in a `$filter` expression.
///
/// Booleans and plain numbers stay bare. Numbers with a leading zero (county
/// and FIPS codes) are strings. A value already wrapped in single quotes is
/// unwrapped first; every quote left inside is doubled.
pub fn escape_value(value: &str) -> String {
    let inner = match value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        Some(inner) => inner,
        None if value == "true" || value == "false" || is_numeric_literal(value) => {
            return value.to_string();
        }
        None => value,
    };
    format!("'{}'", inner.replace('\'', "''"))
}

fn is_numeric_literal(value: &str) -> bool {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let int_part = digits.split('.').next().unwrap_or_default();
    if int_part.len() > 1 && int_part.starts_with('0') {
        return false;
    }
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && !digits.starts_with('.')
        && !digits.ends_with('.')
}

/// Field selection for `$select`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// Every field of the dataset
    #[default]
    All,
    /// An ordered, de-duplicated list that always includes the identifier
    Fields(Vec<String>),
}

impl Selection {
    /// Build a selection from caller fields, forcing `identifier` in front.
    pub fn with_identifier<I, S>(fields: I, identifier: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected = vec![identifier.to_string()];
        for field in fields {
            let field = field.as_ref().trim();
            if field.is_empty() {
                continue;
            }
            validate_field_name(field)?;
            if !selected.iter().any(|s| s.eq_ignore_ascii_case(field)) {
                selected.push(field.to_string());
            }
        }
        Ok(Selection::Fields(selected))
    }

    /// Comma-separated `$select` value, or `None` for all fields.
    pub fn to_odata(&self) -> Option<String> {
        match self {
            Selection::All => None,
            Selection::Fields(fields) => Some(fields.join(",")),
        }
    }
}

/// Normalized description of one API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Canonical dataset entry
    pub dataset: DatasetEntry,
    /// Fields to return
    pub selection: Selection,
    /// Rendered `$filter` expression
    pub filter: Option<String>,
    /// Stride between pages
    pub page_size: u32,
    /// `$skip`; always a multiple of `page_size`
    pub offset: u64,
    /// `$top` for this call, at most `page_size`
    pub top: u32,
}

impl QueryDescriptor {
    /// Descriptor for page `index` requesting `top` rows.
    pub fn page(&self, index: u64, top: u32) -> Self {
        Self {
            offset: index * u64::from(self.page_size),
            top: top.min(self.page_size),
            ..self.clone()
        }
    }

    /// One-row descriptor selecting only the identifier, used to read the count.
    pub fn probe(&self) -> Self {
        Self {
            selection: Selection::Fields(vec![self.dataset.identifier.clone()]),
            offset: 0,
            top: 1,
            ..self.clone()
        }
    }

    /// Endpoint path relative to the API base URL.
    pub fn path(&self) -> String {
        self.dataset.endpoint()
    }

    /// Serialize as URL query parameters (without the leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut params = vec![
            "$inlinecount=allpages".to_string(),
            format!("$top={}", self.top),
            format!("$skip={}", self.offset),
        ];
        if let Some(ref filter) = self.filter {
            params.push(format!("$filter={}", urlencoding::encode(filter)));
        }
        if let Some(select) = self.selection.to_odata() {
            params.push(format!("$select={}", urlencoding::encode(&select)));
        }
        params.join("&")
    }
}

/// Translates caller input into a [`QueryDescriptor`].
pub struct QueryBuilder<'a, C: DatasetCatalog + ?Sized> {
    catalog: &'a C,
}

impl<'a, C: DatasetCatalog + ?Sized> QueryBuilder<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// Build the descriptor for the page at `offset`.
    ///
    /// `offset` must be a multiple of `page_size`.
    pub fn build(
        &self,
        dataset: &str,
        fields: Option<&[String]>,
        filters: &FilterSpec,
        page_size: u32,
        offset: u64,
    ) -> Result<QueryDescriptor> {
        let entry = self.catalog.resolve_dataset_id(dataset)?;

        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(RetrievalError::InvalidQuery(format!(
                "page size {} outside 1..={}",
                page_size, MAX_PAGE_SIZE
            )));
        }
        if offset % u64::from(page_size) != 0 {
            return Err(RetrievalError::InvalidQuery(format!(
                "offset {} is not a multiple of page size {}",
                offset, page_size
            )));
        }

        let selection = match fields {
            Some(fields) if !fields.is_empty() => {
                Selection::with_identifier(fields, &entry.identifier)?
            }
            _ => Selection::All,
        };

        Ok(QueryDescriptor {
            dataset: entry.clone(),
            selection,
            filter: filters.to_odata()?,
            page_size,
            offset,
            top: page_size,
        })
    }
}
