//! Core domain model for the regulatory parameter sync agent.
//!
//! Everything in this crate is pure data: the category enumeration, the
//! canonical payload shapes consumed by the downstream calculators, and the
//! provenance/monitoring records the agent maintains alongside them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "veille-core";

/// One regulated fiscal/legal parameter domain, tracked independently.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Notarial fee scale (emoluments tranches).
    Notaire,
    /// Transfer duty rates by department.
    Dmto,
    /// Mileage allowance scale.
    Ik,
    /// Income tax brackets.
    Ir,
    /// Minimum wage amounts.
    Smic,
    /// Housing aid rent ceilings.
    Apl,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Notaire,
        Category::Dmto,
        Category::Ik,
        Category::Ir,
        Category::Smic,
        Category::Apl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Notaire => "notaire",
            Category::Dmto => "dmto",
            Category::Ik => "ik",
            Category::Ir => "ir",
            Category::Smic => "smic",
            Category::Apl => "apl",
        }
    }

    pub fn from_cli(input: &str) -> Option<Category> {
        match input.trim().to_ascii_lowercase().as_str() {
            "notaire" => Some(Category::Notaire),
            "dmto" => Some(Category::Dmto),
            "ik" => Some(Category::Ik),
            "ir" => Some(Category::Ir),
            "smic" => Some(Category::Smic),
            "apl" => Some(Category::Apl),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bracket of a rate table. `upper: None` is the open-ended top bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tranche {
    pub lower: f64,
    pub upper: Option<f64>,
    pub rate: f64,
}

/// One power-rating row of the mileage scale, with per-distance-band rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MileageRow {
    pub power: String,
    pub up_to_5000: f64,
    pub from_5001_to_20000: f64,
    pub beyond_20000: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MileageScale {
    pub car: Vec<MileageRow>,
    pub two_wheeler: BTreeMap<String, f64>,
}

/// Departmental transfer-duty rates: a standard rate, a reduced rate and the
/// department codes the reduced rate applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalRates {
    pub standard_rate: f64,
    pub reduced_rate: f64,
    pub reduced_departments: Vec<String>,
}

/// Housing-aid rent ceilings by zone and household profile, plus region
/// multipliers. BTreeMaps keep serialization order deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HousingCeilings {
    pub zones: BTreeMap<String, BTreeMap<String, f64>>,
    pub region_multipliers: BTreeMap<String, f64>,
}

/// Canonical payload shapes, one variant per family of parameter. The diff
/// engine pattern-matches this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Tranches(Vec<Tranche>),
    Mileage(MileageScale),
    RegionalRates(RegionalRates),
    Amounts(BTreeMap<String, f64>),
    HousingCeilings(HousingCeilings),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Tranches(_) => "tranches",
            Payload::Mileage(_) => "mileage",
            Payload::RegionalRates(_) => "regional_rates",
            Payload::Amounts(_) => "amounts",
            Payload::HousingCeilings(_) => "housing_ceilings",
        }
    }
}

/// The authoritative value for one category. Overwritten only by a merge that
/// found a genuine difference; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub payload: Payload,
    pub updated_at: DateTime<Utc>,
}

/// One public holiday. `fixed` distinguishes the fixed-date holidays from
/// the Easter-derived movable ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
    pub fixed: bool,
}

/// All canonical records, keyed by category, plus the derived public-holiday
/// calendar keyed by year. Serialized as a flat JSON object so the downstream
/// calculators can index it by category key or `jours_feries`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStore {
    #[serde(flatten)]
    pub records: BTreeMap<Category, CanonicalRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub jours_feries: BTreeMap<String, Vec<Holiday>>,
}

impl CanonicalStore {
    pub fn get(&self, category: Category) -> Option<&CanonicalRecord> {
        self.records.get(&category)
    }

    pub fn insert(&mut self, category: Category, record: CanonicalRecord) {
        self.records.insert(category, record);
    }

    pub fn holidays(&self, year: i32) -> Option<&[Holiday]> {
        self.jours_feries.get(&year.to_string()).map(Vec::as_slice)
    }

    /// Replace the holiday table for one year. Returns whether anything
    /// actually changed, so callers can keep writes diff-gated.
    pub fn set_holidays(&mut self, year: i32, holidays: Vec<Holiday>) -> bool {
        let key = year.to_string();
        if self.jours_feries.get(&key) == Some(&holidays) {
            return false;
        }
        self.jours_feries.insert(key, holidays);
        true
    }
}

/// Publication date extracted from a source page. `NotFound` is an explicit
/// sentinel; a missing date never aborts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PublicationDate {
    Found(NaiveDate),
    NotFound,
}

impl PublicationDate {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            PublicationDate::Found(d) => Some(*d),
            PublicationDate::NotFound => None,
        }
    }
}

impl From<PublicationDate> for String {
    fn from(value: PublicationDate) -> Self {
        match value {
            PublicationDate::Found(d) => d.format("%Y-%m-%d").to_string(),
            PublicationDate::NotFound => "not-found".to_string(),
        }
    }
}

impl From<String> for PublicationDate {
    fn from(value: String) -> Self {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map(PublicationDate::Found)
            .unwrap_or(PublicationDate::NotFound)
    }
}

/// Audit metadata for one sync attempt. A failed fetch still produces an
/// entry (with `error` set) but never a canonical mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub verified: bool,
    pub publication_date: PublicationDate,
    pub content_sha256: Option<String>,
    pub error: Option<String>,
}

/// Append-only changelog line: the only user-facing audit trail of automated
/// changes to the canonical store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub date: NaiveDate,
    pub category: Category,
    pub verified: bool,
    pub summary: String,
}

/// Per-category monitoring state. The changelog is append-only and
/// `next_expected_update` only advances after a check actually ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRecord {
    pub last_check: Option<NaiveDate>,
    pub last_publication_date: Option<NaiveDate>,
    pub next_expected_update: Option<NaiveDate>,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
}

/// All monitoring records, keyed by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoringFile {
    pub categories: BTreeMap<Category, MonitoringRecord>,
}

impl MonitoringFile {
    pub fn record(&self, category: Category) -> Option<&MonitoringRecord> {
        self.categories.get(&category)
    }

    pub fn record_mut(&mut self, category: Category) -> &mut MonitoringRecord {
        self.categories.entry(category).or_default()
    }
}

/// When a category's external source should be re-verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueRule {
    /// Only evaluate during the given calendar month (1 = January).
    CalendarMonth(u32),
    /// Evaluate once `next_expected_update` has been reached.
    NextCheckReached,
    /// Evaluate on every invocation.
    Always,
}

/// A category-specific candidate assembled from fetched evidence, ready to be
/// diffed against the canonical store. Always carries a payload, even after an
/// upstream failure (the previous canonical payload is reused).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub category: Category,
    pub payload: Payload,
    pub provenance: SourceProvenance,
}
