//! Diff/merge engine: structural, field-aware comparison of a candidate
//! payload against the canonical record. A no-op merge returns the current
//! record untouched so that re-serialization stays byte-identical; a write
//! on unchanged input is a defect.

use chrono::{DateTime, Utc};

use veille_core::{CanonicalRecord, Payload, Tranche};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub next: CanonicalRecord,
    pub changed: bool,
}

/// Merge a candidate payload into the canonical store slot for its category.
/// `changed` is true only when at least one field genuinely differs (or no
/// record exists yet); otherwise `next` is a clone of `current`, timestamps
/// included.
pub fn merge(
    current: Option<&CanonicalRecord>,
    candidate: &Payload,
    now: DateTime<Utc>,
) -> MergeOutcome {
    match current {
        Some(record) if payloads_equal(&record.payload, candidate) => MergeOutcome {
            next: record.clone(),
            changed: false,
        },
        _ => MergeOutcome {
            next: CanonicalRecord {
                payload: candidate.clone(),
                updated_at: now,
            },
            changed: true,
        },
    }
}

/// Structural equality per payload shape. A shape change between variants
/// always counts as changed.
pub fn payloads_equal(a: &Payload, b: &Payload) -> bool {
    match (a, b) {
        (Payload::Tranches(x), Payload::Tranches(y)) => tranches_equal(x, y),
        (Payload::Mileage(x), Payload::Mileage(y)) => x == y,
        (Payload::RegionalRates(x), Payload::RegionalRates(y)) => x == y,
        (Payload::Amounts(x), Payload::Amounts(y)) => x == y,
        (Payload::HousingCeilings(x), Payload::HousingCeilings(y)) => x == y,
        _ => false,
    }
}

/// Element-wise comparison on every numeric field, the open-ended upper bound
/// included (`None` only equals `None`).
fn tranches_equal(a: &[Tranche], b: &[Tranche]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.lower == y.lower && x.upper == y.upper && x.rate == y.rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn tranches(values: &[(f64, Option<f64>, f64)]) -> Payload {
        Payload::Tranches(
            values
                .iter()
                .map(|(lower, upper, rate)| Tranche {
                    lower: *lower,
                    upper: *upper,
                    rate: *rate,
                })
                .collect(),
        )
    }

    fn record(payload: Payload) -> CanonicalRecord {
        CanonicalRecord {
            payload,
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn identical_tranches_are_unchanged_and_keep_timestamp() {
        let current = record(tranches(&[(0.0, Some(6500.0), 0.0387), (6500.0, None, 0.00799)]));
        let candidate = tranches(&[(0.0, Some(6500.0), 0.0387), (6500.0, None, 0.00799)]);
        let outcome = merge(Some(&current), &candidate, Utc::now());
        assert!(!outcome.changed);
        assert_eq!(outcome.next, current);
    }

    #[test]
    fn a_single_rate_difference_changes() {
        let current = record(tranches(&[(0.0, Some(6500.0), 0.0387)]));
        let candidate = tranches(&[(0.0, Some(6500.0), 0.0395)]);
        let now = Utc::now();
        let outcome = merge(Some(&current), &candidate, now);
        assert!(outcome.changed);
        assert_eq!(outcome.next.updated_at, now);
        assert_eq!(outcome.next.payload, candidate);
    }

    #[test]
    fn open_upper_bound_does_not_equal_a_finite_one() {
        let current = record(tranches(&[(177106.0, None, 0.45)]));
        let candidate = tranches(&[(177106.0, Some(999_999_999.0), 0.45)]);
        assert!(merge(Some(&current), &candidate, Utc::now()).changed);
    }

    #[test]
    fn variant_shape_change_counts_as_changed() {
        let current = record(tranches(&[(0.0, None, 0.0)]));
        let candidate = Payload::Amounts(BTreeMap::from([("horaire_brut".to_string(), 11.65)]));
        assert!(merge(Some(&current), &candidate, Utc::now()).changed);
    }

    #[test]
    fn first_sync_always_changes() {
        let candidate = tranches(&[(0.0, None, 0.0)]);
        let outcome = merge(None, &candidate, Utc::now());
        assert!(outcome.changed);
        assert_eq!(outcome.next.payload, candidate);
    }

    #[test]
    fn amounts_maps_compare_by_full_deep_equality() {
        let a = Payload::Amounts(BTreeMap::from([
            ("horaire_brut".to_string(), 11.65),
            ("mensuel_brut_35h".to_string(), 1766.92),
        ]));
        let b = Payload::Amounts(BTreeMap::from([
            ("mensuel_brut_35h".to_string(), 1766.92),
            ("horaire_brut".to_string(), 11.65),
        ]));
        assert!(payloads_equal(&a, &b));
    }
}
