//! Per-category candidate builders.
//!
//! Each builder assembles the typed payload for its category from legally
//! published constants and computes `verified` by checking that the fetched
//! page still carries the expected values or wording. The check is a crude
//! substring heuristic, kept auditable on purpose: the changelog records
//! whether an update was verified, and operators review unverified ones.
//!
//! On any upstream fetch failure the builder falls back to the previous
//! canonical payload with `verified = false` and the error message recorded,
//! so the pipeline always has something to diff against.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use veille_core::{
    Candidate, Category, HousingCeilings, MileageRow, MileageScale, Payload, PublicationDate,
    RegionalRates, SourceProvenance, Tranche,
};
use veille_store::{FetchError, FetchedPage};

use crate::parse::parse_publication_date;

/// Build the candidate record for one category from a fetch outcome.
pub fn build_candidate(
    category: Category,
    url: &str,
    outcome: &Result<FetchedPage, FetchError>,
    previous: Option<&Payload>,
    now: DateTime<Utc>,
) -> Candidate {
    match outcome {
        Ok(page) => {
            let mut provenance = page.provenance();
            provenance.verified = page_verifies(category, &page.body);
            provenance.publication_date = parse_publication_date(&page.body);
            Candidate {
                category,
                payload: reference_payload(category),
                provenance,
            }
        }
        Err(err) => Candidate {
            category,
            payload: previous.cloned().unwrap_or_else(|| empty_payload(category)),
            provenance: SourceProvenance {
                url: url.to_string(),
                fetched_at: now,
                verified: false,
                publication_date: PublicationDate::NotFound,
                content_sha256: None,
                error: Some(err.to_string()),
            },
        },
    }
}

/// Does the page still mention the values/wording this category expects?
pub fn page_verifies(category: Category, body: &str) -> bool {
    let lower = body.to_lowercase();
    match category {
        Category::Notaire => ["0.0387", "0.01596", "0.01064", "0.00799"]
            .iter()
            .all(|rate| body.contains(rate)),
        Category::Dmto => ["56", "57", "67", "68"].iter().all(|code| body.contains(code)),
        Category::Ik => {
            lower.contains("barème kilométrique")
                || lower.contains("indemnités kilométriques")
                || body.contains("0,502")
                || body.contains("0.502")
        }
        Category::Ir => lower.contains("impôt sur le revenu") || lower.contains("barème"),
        Category::Smic => lower.contains("smic"),
        Category::Apl => lower.contains("aide personnalisée au logement") || lower.contains("apl"),
    }
}

/// The currently published reference values per category. These tables change
/// rarely (annual legal revisions); the diff engine only rewrites the store
/// when they actually differ from what is held.
pub fn reference_payload(category: Category) -> Payload {
    match category {
        Category::Notaire => Payload::Tranches(vec![
            tranche(0.0, Some(6_500.0), 0.0387),
            tranche(6_500.0, Some(17_000.0), 0.01596),
            tranche(17_000.0, Some(60_000.0), 0.01064),
            tranche(60_000.0, None, 0.00799),
        ]),
        Category::Ir => Payload::Tranches(vec![
            tranche(0.0, Some(11_294.0), 0.0),
            tranche(11_294.0, Some(28_797.0), 0.11),
            tranche(28_797.0, Some(82_341.0), 0.30),
            tranche(82_341.0, Some(177_106.0), 0.41),
            tranche(177_106.0, None, 0.45),
        ]),
        Category::Ik => Payload::Mileage(MileageScale {
            car: vec![
                mileage_row("3CV et moins", 0.502, 0.300, 0.360),
                mileage_row("4CV", 0.575, 0.323, 0.387),
                mileage_row("5CV", 0.603, 0.339, 0.407),
                mileage_row("6CV", 0.631, 0.355, 0.427),
                mileage_row("7CV et plus", 0.659, 0.371, 0.447),
            ],
            two_wheeler: BTreeMap::from([
                ("moins_50cc".to_string(), 0.315),
                ("50cc_125cc".to_string(), 0.388),
                ("plus_125cc".to_string(), 0.453),
            ]),
        }),
        Category::Dmto => Payload::RegionalRates(RegionalRates {
            standard_rate: 0.045,
            reduced_rate: 0.038,
            reduced_departments: vec![
                "56".to_string(),
                "57".to_string(),
                "67".to_string(),
                "68".to_string(),
            ],
        }),
        Category::Smic => Payload::Amounts(BTreeMap::from([
            ("horaire_brut".to_string(), 11.65),
            ("mensuel_brut_35h".to_string(), 1_766.92),
        ])),
        Category::Apl => Payload::HousingCeilings(HousingCeilings {
            zones: BTreeMap::from([
                ("zone1".to_string(), ceilings(610.0, 670.0, 730.0, 790.0)),
                ("zone2".to_string(), ceilings(510.0, 560.0, 610.0, 660.0)),
                ("zone3".to_string(), ceilings(430.0, 480.0, 530.0, 580.0)),
            ]),
            region_multipliers: BTreeMap::from([
                ("idf".to_string(), 1.15),
                ("province".to_string(), 1.0),
                ("dom".to_string(), 0.95),
            ]),
        }),
    }
}

/// Shape-correct empty payload, used when a fetch fails before any canonical
/// record exists for the category.
pub fn empty_payload(category: Category) -> Payload {
    match category {
        Category::Notaire | Category::Ir => Payload::Tranches(Vec::new()),
        Category::Ik => Payload::Mileage(MileageScale {
            car: Vec::new(),
            two_wheeler: BTreeMap::new(),
        }),
        Category::Dmto => Payload::RegionalRates(RegionalRates {
            standard_rate: 0.0,
            reduced_rate: 0.0,
            reduced_departments: Vec::new(),
        }),
        Category::Smic => Payload::Amounts(BTreeMap::new()),
        Category::Apl => Payload::HousingCeilings(HousingCeilings {
            zones: BTreeMap::new(),
            region_multipliers: BTreeMap::new(),
        }),
    }
}

fn tranche(lower: f64, upper: Option<f64>, rate: f64) -> Tranche {
    Tranche { lower, upper, rate }
}

fn mileage_row(power: &str, up_to_5000: f64, mid: f64, beyond: f64) -> MileageRow {
    MileageRow {
        power: power.to_string(),
        up_to_5000,
        from_5001_to_20000: mid,
        beyond_20000: beyond,
    }
}

fn ceilings(single: f64, couple: f64, one_child: f64, two_children: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("seul".to_string(), single),
        ("couple".to_string(), couple),
        ("couple_1_enfant".to_string(), one_child),
        ("couple_2_enfants".to_string(), two_children),
    ])
}
