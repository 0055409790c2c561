//! Tolerant extraction of publication dates, page titles and text snippets.
//!
//! All functions here are side-effect free and never fail: a page that lacks
//! the expected markers yields a sentinel or a best-effort fallback, not an
//! error, so a badly formatted source cannot abort the pipeline.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};

use veille_core::PublicationDate;

/// Maximum snippet length in characters.
pub const SNIPPET_MAX_CHARS: usize = 300;

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(20\d{2}-\d{2}-\d{2})\b").expect("iso date pattern"));

static FRENCH_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)publi[ée]?\s*le\s*(\d{1,2})\s+([A-Za-zéèêëàâäïîôöûüç]+)\s+(\d{4})")
        .expect("french date pattern")
});

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script>").expect("script pattern"));

static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style>").expect("style pattern"));

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag pattern"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

fn french_month_number(name: &str) -> Option<u32> {
    // Accented and unaccented spellings both occur on official pages.
    match name.to_lowercase().as_str() {
        "janvier" => Some(1),
        "février" | "fevrier" => Some(2),
        "mars" => Some(3),
        "avril" => Some(4),
        "mai" => Some(5),
        "juin" => Some(6),
        "juillet" => Some(7),
        "août" | "aout" => Some(8),
        "septembre" => Some(9),
        "octobre" => Some(10),
        "novembre" => Some(11),
        "décembre" | "decembre" => Some(12),
        _ => None,
    }
}

/// Extract a publication date from page text: ISO `YYYY-MM-DD` first, then
/// the French `publié le <day> <month-name> <year>` wording. Returns the
/// `NotFound` sentinel when neither pattern yields a valid calendar date.
pub fn parse_publication_date(text: &str) -> PublicationDate {
    if let Some(captures) = ISO_DATE_RE.captures(text) {
        if let Ok(date) = NaiveDate::parse_from_str(&captures[1], "%Y-%m-%d") {
            return PublicationDate::Found(date);
        }
    }
    if let Some(captures) = FRENCH_DATE_RE.captures(text) {
        let day: u32 = match captures[1].parse() {
            Ok(d) => d,
            Err(_) => return PublicationDate::NotFound,
        };
        let year: i32 = match captures[3].parse() {
            Ok(y) => y,
            Err(_) => return PublicationDate::NotFound,
        };
        if let Some(month) = french_month_number(&captures[2]) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return PublicationDate::Found(date);
            }
        }
    }
    PublicationDate::NotFound
}

/// Page `<title>` text, if present and non-empty.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document.select(&selector).next().and_then(|node| {
        let text = node.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

/// Strip `<script>`/`<style>` blocks and all tags, then collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(html, " ");
    let without_styles = STYLE_RE.replace_all(&without_scripts, " ");
    let without_tags = TAG_RE.replace_all(&without_styles, " ");
    WHITESPACE_RE.replace_all(&without_tags, " ").trim().to_string()
}

/// Up to [`SNIPPET_MAX_CHARS`] characters of stripped text centered on the
/// first case-insensitive occurrence of `keyword`. When the keyword is absent
/// the head of the stripped text is returned instead, so the snippet is never
/// empty for a page with any text content.
pub fn extract_snippet(html: &str, keyword: &str) -> String {
    let clean = strip_tags(html);
    let source = if clean.is_empty() { html.trim() } else { clean.as_str() };

    let haystack: Vec<char> = source.chars().collect();
    let folded: Vec<char> = haystack.iter().map(|c| fold_char(*c)).collect();
    let needle: Vec<char> = keyword.chars().map(fold_char).collect();

    let hit = if needle.is_empty() || needle.len() > folded.len() {
        None
    } else {
        folded
            .windows(needle.len())
            .position(|window| window == needle.as_slice())
    };

    let start = match hit {
        Some(index) => {
            let center = index + needle.len() / 2;
            let mut start = center.saturating_sub(SNIPPET_MAX_CHARS / 2);
            if haystack.len().saturating_sub(start) < SNIPPET_MAX_CHARS {
                start = haystack.len().saturating_sub(SNIPPET_MAX_CHARS);
            }
            start
        }
        None => 0,
    };

    haystack
        .iter()
        .skip(start)
        .take(SNIPPET_MAX_CHARS)
        .collect()
}

fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}
