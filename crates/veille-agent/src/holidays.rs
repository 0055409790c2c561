//! French public-holiday calendar, derived locally (no fetch involved).
//!
//! The canonical store carries a `jours_feries` table for the current and
//! next year so the downstream calculators can resolve legal deadlines. The
//! fixed holidays are constant; the movable ones hang off the Gregorian
//! Easter computus.

use chrono::{Days, NaiveDate};

use veille_core::Holiday;

const FIXED_HOLIDAYS: [(u32, u32, &str); 8] = [
    (1, 1, "Jour de l'An"),
    (5, 1, "Fête du Travail"),
    (5, 8, "Fête de la Victoire"),
    (7, 14, "Fête Nationale"),
    (8, 15, "Assomption"),
    (11, 1, "Toussaint"),
    (11, 11, "Armistice"),
    (12, 25, "Noël"),
];

const MOVABLE_HOLIDAYS: [(u64, &str); 3] = [
    (1, "Lundi de Pâques"),
    (39, "Ascension"),
    (50, "Lundi de Pentecôte"),
];

/// Easter Sunday for a Gregorian year (anonymous computus).
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

/// The eleven French public holidays of a year, fixed dates first, then the
/// Easter-derived movable ones.
pub fn french_holidays(year: i32) -> Vec<Holiday> {
    let mut holidays: Vec<Holiday> = FIXED_HOLIDAYS
        .iter()
        .filter_map(|(month, day, name)| {
            NaiveDate::from_ymd_opt(year, *month, *day).map(|date| Holiday {
                date,
                name: (*name).to_string(),
                fixed: true,
            })
        })
        .collect();

    if let Some(easter) = easter_sunday(year) {
        for (offset, name) in MOVABLE_HOLIDAYS {
            if let Some(date) = easter.checked_add_days(Days::new(offset)) {
                holidays.push(Holiday {
                    date,
                    name: name.to_string(),
                    fixed: false,
                });
            }
        }
    }
    holidays
}
