//! Dataset registry used to canonicalize names and recognize date fields.
//!
//! The retrieval engine only needs two lookups from the catalog: resolving a
//! user-supplied dataset name to the API's canonical casing (plus its endpoint
//! version), and the set of fields known to carry dates. [`StaticCatalog`]
//! ships with the commonly used OpenFEMA datasets and can be refreshed from
//! the live `DataSets` / `DataSetFields` endpoints.

use crate::error::{Result, RetrievalError};
use crate::types::{DataSetField, DataSetSummary};
use std::collections::{BTreeMap, BTreeSet};

/// Identifier field present on every OpenFEMA entity.
pub const DEFAULT_IDENTIFIER: &str = "id";

/// A dataset known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    /// Canonical entity name, e.g. "FimaNfipClaims"
    pub name: String,
    /// Endpoint version, e.g. 2 for `/v2/FimaNfipClaims`
    pub version: u32,
    /// Field that uniquely addresses each row
    pub identifier: String,
    /// Fields holding dates in the API's textual format
    pub date_fields: BTreeSet<String>,
}

impl DatasetEntry {
    /// Create an entry with the default `id` identifier and no date fields.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            identifier: DEFAULT_IDENTIFIER.to_string(),
            date_fields: BTreeSet::new(),
        }
    }

    /// Register date fields for this dataset.
    pub fn with_date_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Path of the entity endpoint relative to the API base URL.
    pub fn endpoint(&self) -> String {
        format!("/v{}/{}", self.version, self.name)
    }
}

/// Read-only dataset lookups consumed by the retrieval engine.
pub trait DatasetCatalog: Send + Sync {
    /// Find a dataset by name, ignoring case.
    fn lookup(&self, name: &str) -> Option<&DatasetEntry>;

    /// Resolve a dataset name to its canonical entry.
    fn resolve_dataset_id(&self, name: &str) -> Result<&DatasetEntry> {
        self.lookup(name.trim())
            .ok_or_else(|| RetrievalError::UnknownDataset(name.to_string()))
    }

    /// Fields of `dataset_id` known to carry dates. Empty for unknown datasets.
    fn known_date_fields(&self, dataset_id: &str) -> BTreeSet<String> {
        self.lookup(dataset_id)
            .map(|entry| entry.date_fields.clone())
            .unwrap_or_default()
    }
}

/// In-memory catalog keyed by lower-cased dataset name.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: BTreeMap<String, DatasetEntry>,
}

impl StaticCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the commonly used OpenFEMA datasets.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for entry in builtin_entries() {
            catalog.insert(entry);
        }
        catalog
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: DatasetEntry) {
        self.entries.insert(entry.name.to_lowercase(), entry);
    }

    /// Number of datasets in the catalog.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the catalog has no datasets.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical names of every dataset, sorted case-insensitively.
    pub fn names(&self) -> Vec<&str> {
        self.entries.values().map(|e| e.name.as_str()).collect()
    }

    /// Adopt the dataset list reported by the API.
    ///
    /// Only the highest version of each dataset is kept. Date fields already
    /// registered for a dataset survive a version bump.
    pub fn merge_remote(&mut self, summaries: &[DataSetSummary]) {
        for summary in summaries {
            let key = summary.name.to_lowercase();
            match self.entries.get_mut(&key) {
                Some(existing) if existing.version > summary.version => {}
                Some(existing) => {
                    existing.name = summary.name.clone();
                    existing.version = summary.version;
                }
                None => {
                    self.entries
                        .insert(key, DatasetEntry::new(summary.name.clone(), summary.version));
                }
            }
        }
        tracing::debug!(datasets = self.entries.len(), "Merged remote dataset list");
    }

    /// Register the date-typed fields from `DataSetFields` metadata.
    pub fn add_date_fields(&mut self, dataset: &str, fields: &[DataSetField]) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&dataset.trim().to_lowercase())
            .ok_or_else(|| RetrievalError::UnknownDataset(dataset.to_string()))?;

        entry.date_fields.extend(
            fields
                .iter()
                .filter(|f| f.is_date())
                .map(|f| f.name.clone()),
        );
        Ok(())
    }
}

impl DatasetCatalog for StaticCatalog {
    fn lookup(&self, name: &str) -> Option<&DatasetEntry> {
        self.entries.get(&name.to_lowercase())
    }
}

fn builtin_entries() -> Vec<DatasetEntry> {
    vec![
        DatasetEntry::new("FimaNfipClaims", 2).with_date_fields([
            "asOfDate",
            "dateOfLoss",
            "originalConstructionDate",
            "originalNBDate",
        ]),
        DatasetEntry::new("FimaNfipPolicies", 2).with_date_fields([
            "cancellationDateOfFloodPolicy",
            "originalConstructionDate",
            "originalNBDate",
            "policyEffectiveDate",
            "policyTerminationDate",
        ]),
        DatasetEntry::new("DisasterDeclarationsSummaries", 2).with_date_fields([
            "declarationDate",
            "disasterCloseoutDate",
            "incidentBeginDate",
            "incidentEndDate",
            "lastIAFilingDate",
            "lastRefresh",
        ]),
        DatasetEntry::new("FemaWebDisasterDeclarations", 1).with_date_fields([
            "closeoutDate",
            "declarationDate",
            "incidentBeginDate",
            "incidentEndDate",
            "lastRefresh",
        ]),
        DatasetEntry::new("HazardMitigationAssistanceProjects", 3).with_date_fields([
            "dateApproved",
            "dateClosed",
            "dateInitiallyApproved",
            "lastRefresh",
        ]),
        DatasetEntry::new("PublicAssistanceFundedProjectsDetails", 1).with_date_fields([
            "declarationDate",
            "lastObligationDate",
            "firstObligationDate",
            "lastRefresh",
        ]),
        DatasetEntry::new("IndividualsAndHouseholdsProgramValidRegistrations", 1)
            .with_date_fields(["declarationDate", "lastRefresh"]),
        DatasetEntry::new("HousingAssistanceOwners", 2).with_date_fields(["lastRefresh"]),
        DatasetEntry::new("HousingAssistanceRenters", 2).with_date_fields(["lastRefresh"]),
    ]
}
