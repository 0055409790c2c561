//! Due-check evaluation: decides whether a category's external source should
//! be re-verified now. Pure; the `--fetch-all` override is applied by the
//! pipeline, not here.
//!
//! External sources are rarely updated (annual legal revisions), so checking
//! on every invocation would waste bandwidth and strain the courtesy implied
//! by the allowlist. Due-gating is mandatory, not an optimization.

use chrono::{Datelike, NaiveDate};

use veille_core::{DueRule, MonitoringRecord};

use crate::registry::SourceSpec;

/// A category that has never been checked (no monitoring record) is due.
pub fn is_due(spec: &SourceSpec, record: Option<&MonitoringRecord>, today: NaiveDate) -> bool {
    let Some(record) = record else {
        return true;
    };
    match spec.due_rule {
        DueRule::Always => true,
        DueRule::CalendarMonth(month) => today.month() == month,
        DueRule::NextCheckReached => match record.next_expected_update {
            Some(next) => today >= next,
            None => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veille_core::Category;

    fn spec(rule: DueRule) -> SourceSpec {
        SourceSpec {
            category: Category::Notaire,
            source_urls: vec!["https://www.notaires.fr/fr/les-baremes-notariaux".to_string()],
            allowed_domains: vec!["notaires.fr".to_string()],
            snippet_keyword: "émoluments".to_string(),
            due_rule: rule,
            recheck_interval_days: 365,
        }
    }

    fn record_with_next(next: Option<NaiveDate>) -> MonitoringRecord {
        MonitoringRecord {
            next_expected_update: next,
            ..MonitoringRecord::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn first_run_is_always_due() {
        assert!(is_due(&spec(DueRule::NextCheckReached), None, date(2026, 6, 1)));
        assert!(is_due(&spec(DueRule::CalendarMonth(1)), None, date(2026, 6, 1)));
    }

    #[test]
    fn future_next_check_is_not_due() {
        let record = record_with_next(Some(date(2027, 1, 1)));
        assert!(!is_due(
            &spec(DueRule::NextCheckReached),
            Some(&record),
            date(2026, 6, 1)
        ));
    }

    #[test]
    fn reached_next_check_is_due() {
        let record = record_with_next(Some(date(2026, 6, 1)));
        assert!(is_due(
            &spec(DueRule::NextCheckReached),
            Some(&record),
            date(2026, 6, 1)
        ));
    }

    #[test]
    fn missing_next_check_is_due() {
        let record = record_with_next(None);
        assert!(is_due(
            &spec(DueRule::NextCheckReached),
            Some(&record),
            date(2026, 6, 1)
        ));
    }

    #[test]
    fn calendar_month_rule_only_fires_in_its_month() {
        let record = record_with_next(None);
        let spec = spec(DueRule::CalendarMonth(1));
        assert!(is_due(&spec, Some(&record), date(2026, 1, 15)));
        assert!(!is_due(&spec, Some(&record), date(2026, 2, 15)));
    }

    #[test]
    fn always_rule_is_always_due() {
        let record = record_with_next(Some(date(2099, 1, 1)));
        assert!(is_due(&spec(DueRule::Always), Some(&record), date(2026, 6, 1)));
    }
}
