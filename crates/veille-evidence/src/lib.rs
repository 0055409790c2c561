//! Evidence extraction and per-category candidate builders.
//!
//! `parse` turns fetched HTML into dates, titles and keyword-anchored text
//! snippets; `builder` assembles the typed candidate payload for each
//! category and computes the `verified` sanity flag.

pub mod builder;
pub mod parse;

pub use builder::build_candidate;
pub use parse::{extract_snippet, extract_title, parse_publication_date};

pub const CRATE_NAME: &str = "veille-evidence";
