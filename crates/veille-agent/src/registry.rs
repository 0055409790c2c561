//! Static mapping from category to allowed domains, source URLs and parsing
//! hints. Built in code and injected explicitly; a `sources.yaml` in the data
//! directory overrides the builtin table for deployments that track different
//! editions of the official pages.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use veille_core::{Category, DueRule};

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub category: Category,
    /// Primary source first; later entries are cross-check references kept
    /// for the audit trail.
    pub source_urls: Vec<String>,
    /// Host-suffix allowlist enforced before any request is issued.
    pub allowed_domains: Vec<String>,
    /// Anchor keyword for the evidence snippet.
    pub snippet_keyword: String,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub due_rule: DueRule,
    /// Used to advance `next_expected_update` after a check actually ran.
    pub recheck_interval_days: u32,
}

impl SourceSpec {
    pub fn primary_url(&self) -> &str {
        self.source_urls.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceSpec>,
}

impl SourceRegistry {
    pub fn spec_for(&self, category: Category) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.category == category)
    }

    /// Read `sources.yaml` from the data directory when present, otherwise
    /// fall back to the builtin table.
    pub fn load_or_builtin(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("sources.yaml");
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn builtin() -> Self {
        Self {
            sources: vec![
                SourceSpec {
                    category: Category::Notaire,
                    source_urls: vec![
                        "https://www.notaires.fr/fr/les-baremes-notariaux".to_string(),
                        "https://www.service-public.fr/particuliers/vosdroits/N367".to_string(),
                    ],
                    allowed_domains: domains(&[
                        "notaires.fr",
                        "legifrance.gouv.fr",
                        "service-public.fr",
                    ]),
                    snippet_keyword: "émoluments".to_string(),
                    due_rule: DueRule::NextCheckReached,
                    recheck_interval_days: 365,
                },
                SourceSpec {
                    category: Category::Dmto,
                    source_urls: vec![
                        "https://www.impots.gouv.fr/particulier/les-droits-denregistrement"
                            .to_string(),
                    ],
                    allowed_domains: domains(&[
                        "impots.gouv.fr",
                        "legifrance.gouv.fr",
                        "service-public.fr",
                    ]),
                    snippet_keyword: "droits d'enregistrement".to_string(),
                    due_rule: DueRule::NextCheckReached,
                    recheck_interval_days: 180,
                },
                SourceSpec {
                    category: Category::Ik,
                    source_urls: vec![
                        "https://www.service-public.fr/particuliers/vosdroits/F1879".to_string(),
                        "https://bofip.impots.gouv.fr/bofip/2185-PGP.html/identifiant=BOI-BAREME-000001-20230720"
                            .to_string(),
                    ],
                    allowed_domains: domains(&[
                        "service-public.fr",
                        "impots.gouv.fr",
                        "bofip.impots.gouv.fr",
                    ]),
                    snippet_keyword: "barème kilométrique".to_string(),
                    due_rule: DueRule::NextCheckReached,
                    recheck_interval_days: 365,
                },
                SourceSpec {
                    category: Category::Ir,
                    source_urls: vec![
                        "https://www.impots.gouv.fr/particulier/le-bareme-de-limpot-sur-le-revenu"
                            .to_string(),
                        "https://bofip.impots.gouv.fr/bofip/2491-PGP.html/identifiant=BOI-IR-LIQ-20-10-20250414"
                            .to_string(),
                    ],
                    allowed_domains: domains(&[
                        "impots.gouv.fr",
                        "bofip.impots.gouv.fr",
                        "legifrance.gouv.fr",
                        "service-public.fr",
                    ]),
                    snippet_keyword: "barème".to_string(),
                    // Brackets are revalorized with the finance act.
                    due_rule: DueRule::CalendarMonth(1),
                    recheck_interval_days: 365,
                },
                SourceSpec {
                    category: Category::Smic,
                    source_urls: vec![
                        "https://travail-emploi.gouv.fr/salaire-minimum-interprofessionnel-de-croissance-smic"
                            .to_string(),
                    ],
                    allowed_domains: domains(&["travail-emploi.gouv.fr", "service-public.fr"]),
                    snippet_keyword: "smic".to_string(),
                    due_rule: DueRule::CalendarMonth(1),
                    recheck_interval_days: 365,
                },
                SourceSpec {
                    category: Category::Apl,
                    source_urls: vec![
                        "https://www.service-public.fr/particuliers/vosdroits/F12006".to_string(),
                        "https://www.caf.fr/professionnels/offres-et-services/accompagnement-des-allocataires/aide-personnalisee-au-logement"
                            .to_string(),
                    ],
                    allowed_domains: domains(&["caf.fr", "service-public.fr"]),
                    snippet_keyword: "plafond".to_string(),
                    due_rule: DueRule::NextCheckReached,
                    recheck_interval_days: 180,
                },
            ],
        }
    }
}

fn domains(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_every_category() {
        let registry = SourceRegistry::builtin();
        for category in Category::ALL {
            let spec = registry.spec_for(category).expect("registry entry");
            assert!(!spec.source_urls.is_empty(), "{category} has no source url");
            assert!(!spec.allowed_domains.is_empty(), "{category} has no allowlist");
        }
    }

    #[test]
    fn builtin_urls_pass_their_own_allowlist() {
        let registry = SourceRegistry::builtin();
        for spec in &registry.sources {
            for url in &spec.source_urls {
                assert!(
                    veille_store::fetch::host_allowed(url, &spec.allowed_domains).is_ok(),
                    "{url} rejected by its own allowlist"
                );
            }
        }
    }

    #[test]
    fn yaml_override_parses() {
        let yaml = r#"
sources:
  - category: smic
    source_urls:
      - "https://travail-emploi.gouv.fr/smic"
    allowed_domains:
      - "travail-emploi.gouv.fr"
    snippet_keyword: "smic"
    due_rule:
      calendar_month: 1
    recheck_interval_days: 365
"#;
        let registry: SourceRegistry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(registry.sources.len(), 1);
        assert_eq!(registry.sources[0].category, Category::Smic);
        assert_eq!(registry.sources[0].due_rule, DueRule::CalendarMonth(1));
    }
}
