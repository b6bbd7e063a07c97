//! Query classification
//!
//! Turns a raw question into a [`QueryAnalysis`]: which retrieval strategy
//! to run, which entities and relationships the question mentions, and
//! which natural language it is written in. Classification is pure and
//! synchronous; registered ontology patterns are tried before the
//! heuristic tables so curated questions stay deterministic.
//!
//! The heuristic tables are data, not code: a TOML pack per language,
//! compiled to regexes at construction. Built-in packs cover English and
//! German; deployments can substitute their own file.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::ontology::Ontology;

/// Built-in classification tables.
const BUILTIN_PACKS: &str = include_str!("language_packs.toml");

/// Which retrieval strategy a question calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStrategy {
    /// Entity and relationship lookups against the graph
    Structural,
    /// Embedding-based content search
    Semantic,
    /// Both, fused
    Hybrid,
}

impl QueryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supported question languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    German,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "english",
            Self::German => "german",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "english" | "en" => Some(Self::English),
            "german" | "de" => Some(Self::German),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The classifier's read-only verdict on a question.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub strategy: QueryStrategy,
    /// Entity names the question appears to mention
    pub entity_hints: Vec<String>,
    /// Relationship names the question's verbs point at
    pub relation_hints: Vec<String>,
    /// Name of the ontology pattern that matched, if any
    pub matched_pattern: Option<String>,
    pub language: Language,
}

#[derive(Debug, Deserialize)]
struct PackFile {
    language: Vec<PackEntry>,
}

#[derive(Debug, Deserialize)]
struct PackEntry {
    name: String,
    #[serde(default)]
    markers: Vec<String>,
    #[serde(default)]
    structural: Vec<String>,
    #[serde(default)]
    semantic: Vec<String>,
    #[serde(default)]
    relations: BTreeMap<String, String>,
}

/// Compiled tables for one language.
struct LanguagePack {
    language: Language,
    markers: Vec<Regex>,
    structural: Vec<Regex>,
    semantic: Vec<Regex>,
    relations: Vec<(Regex, String)>,
}

impl LanguagePack {
    fn compile(entry: PackEntry) -> Result<Self> {
        let language = Language::parse(&entry.name).ok_or_else(|| {
            Error::Config(format!("unsupported language pack: {}", entry.name))
        })?;

        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns.iter().map(|p| compile_cue(p)).collect()
        };

        let mut relations = Vec::with_capacity(entry.relations.len());
        for (cue, relation) in &entry.relations {
            relations.push((compile_cue(cue)?, relation.clone()));
        }

        Ok(Self {
            language,
            markers: compile_all(&entry.markers)?,
            structural: compile_all(&entry.structural)?,
            semantic: compile_all(&entry.semantic)?,
            relations,
        })
    }

    fn marker_hits(&self, text: &str) -> usize {
        self.markers.iter().filter(|r| r.is_match(text)).count()
    }
}

fn compile_cue(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){pattern}"))
        .map_err(|e| Error::Config(format!("bad cue pattern '{pattern}': {e}")))
}

/// Classifies questions into retrieval strategies.
pub struct QueryClassifier {
    ontology: Arc<dyn Ontology>,
    packs: Vec<LanguagePack>,
}

impl QueryClassifier {
    /// Classifier with the built-in English and German tables.
    pub fn new(ontology: Arc<dyn Ontology>) -> Self {
        // The embedded pack file is validated by tests; a parse failure
        // here would be a build defect, not a runtime condition.
        Self::from_toml(ontology, BUILTIN_PACKS).expect("built-in language packs parse")
    }

    /// Classifier from a pack definition string.
    pub fn from_toml(ontology: Arc<dyn Ontology>, toml_str: &str) -> Result<Self> {
        let file: PackFile = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("language pack parse error: {e}")))?;
        if file.language.is_empty() {
            return Err(Error::Config("language pack defines no languages".into()));
        }

        let packs = file
            .language
            .into_iter()
            .map(LanguagePack::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { ontology, packs })
    }

    /// Classifier from a pack file on disk.
    pub fn from_file(ontology: Arc<dyn Ontology>, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(ontology, &content)
    }

    /// Analyze a question. Never fails; unclassifiable input lands on
    /// the hybrid strategy with empty hints.
    pub fn classify(&self, question: &str) -> QueryAnalysis {
        let language = self.detect_language(question);
        let entity_hints = self.extract_entity_hints(question);
        let relation_hints = self.extract_relation_hints(question, language);

        if let Some(matched) = self.ontology.match_query_pattern(question) {
            debug!(pattern = %matched.name, "question matched registered pattern");
            return QueryAnalysis {
                strategy: matched.strategy,
                entity_hints,
                relation_hints,
                matched_pattern: Some(matched.name),
                language,
            };
        }

        let strategy = self.heuristic_strategy(question, language);
        debug!(%strategy, %language, "question classified heuristically");

        QueryAnalysis {
            strategy,
            entity_hints,
            relation_hints,
            matched_pattern: None,
            language,
        }
    }

    /// Most marker hits wins; ties and no hits fall back to the first
    /// pack (English in the built-in tables).
    fn detect_language(&self, question: &str) -> Language {
        let mut best = self.packs.first().map(|p| p.language).unwrap_or(Language::English);
        let mut best_hits = 0usize;
        for pack in &self.packs {
            let hits = pack.marker_hits(question);
            if hits > best_hits {
                best = pack.language;
                best_hits = hits;
            }
        }
        best
    }

    fn heuristic_strategy(&self, question: &str, language: Language) -> QueryStrategy {
        let Some(pack) = self.packs.iter().find(|p| p.language == language) else {
            return QueryStrategy::Hybrid;
        };

        let structural = pack.structural.iter().filter(|r| r.is_match(question)).count();
        let semantic = pack.semantic.iter().filter(|r| r.is_match(question)).count();

        if structural > semantic {
            QueryStrategy::Structural
        } else if semantic > structural {
            QueryStrategy::Semantic
        } else {
            QueryStrategy::Hybrid
        }
    }

    /// Ontology-known names plus a capitalized-token scan. The scan
    /// groups consecutive capitalized words and drops a group that is
    /// just the question's leading word, which is capitalized in any
    /// sentence.
    fn extract_entity_hints(&self, question: &str) -> Vec<String> {
        let mut hints = self.ontology.entity_hints(question);

        let tokens: Vec<&str> = question
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| c.is_ascii_punctuation()))
            .collect();

        let mut group: Vec<&str> = Vec::new();
        let mut group_start = 0usize;
        let mut push_group = |group: &mut Vec<&str>, start: usize, hints: &mut Vec<String>| {
            if group.is_empty() {
                return;
            }
            let keep = start > 0 || group.len() > 1;
            if keep {
                let hint = group.join(" ");
                if !hints.iter().any(|h| h.eq_ignore_ascii_case(&hint)) {
                    hints.push(hint);
                }
            }
            group.clear();
        };

        for (index, token) in tokens.iter().enumerate() {
            let capitalized = token.chars().next().is_some_and(|c| c.is_uppercase())
                && token.chars().count() >= 2;
            if capitalized {
                if group.is_empty() {
                    group_start = index;
                }
                group.push(token);
            } else {
                push_group(&mut group, group_start, &mut hints);
            }
        }
        push_group(&mut group, group_start, &mut hints);

        hints
    }

    fn extract_relation_hints(&self, question: &str, language: Language) -> Vec<String> {
        let Some(pack) = self.packs.iter().find(|p| p.language == language) else {
            return Vec::new();
        };

        let mut hints = Vec::new();
        for (cue, relation) in &pack.relations {
            if cue.is_match(question) && !hints.contains(relation) {
                hints.push(relation.clone());
            }
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{QueryPattern, StaticOntology};

    fn classifier() -> QueryClassifier {
        QueryClassifier::new(Arc::new(StaticOntology::project_default()))
    }

    #[test]
    fn test_structural_cues_english() {
        let analysis = classifier().classify("Who is assigned to the rollout tasks?");
        assert_eq!(analysis.strategy, QueryStrategy::Structural);
        assert_eq!(analysis.language, Language::English);
    }

    #[test]
    fn test_semantic_cues_english() {
        let analysis = classifier().classify("Explain the rationale behind the migration.");
        assert_eq!(analysis.strategy, QueryStrategy::Semantic);
    }

    #[test]
    fn test_hybrid_default() {
        let analysis = classifier().classify("status update for the rollout");
        assert_eq!(analysis.strategy, QueryStrategy::Hybrid);
    }

    #[test]
    fn test_structural_cues_german() {
        let analysis = classifier().classify("Wie viele Aufgaben sind Miriam zugewiesen?");
        assert_eq!(analysis.strategy, QueryStrategy::Structural);
        assert_eq!(analysis.language, Language::German);
    }

    #[test]
    fn test_semantic_cues_german() {
        let analysis = classifier().classify("Warum wurde die Migration verschoben?");
        assert_eq!(analysis.strategy, QueryStrategy::Semantic);
        assert_eq!(analysis.language, Language::German);
    }

    #[test]
    fn test_pattern_takes_precedence() {
        let ontology = StaticOntology::project_default()
            .with_known_entity("Miriam Obst")
            .with_pattern(QueryPattern {
                name: "reports-to".into(),
                triggers: vec!["reports to".into()],
                template: "MATCH (p:Person)-[:REPORTS_TO]->(m:Person) \
                           WHERE toLower(m.name) CONTAINS '{entity}' RETURN p"
                    .into(),
                strategy: QueryStrategy::Structural,
            });
        let classifier = QueryClassifier::new(Arc::new(ontology));

        // "explain" would otherwise pull this toward semantic.
        let analysis = classifier.classify("Explain who reports to Miriam Obst");
        assert_eq!(analysis.matched_pattern.as_deref(), Some("reports-to"));
        assert_eq!(analysis.strategy, QueryStrategy::Structural);
    }

    #[test]
    fn test_entity_hints_capitalized_groups() {
        let analysis = classifier().classify("Who reviewed the Atlas Migration Plan with Jordan?");
        assert!(analysis.entity_hints.contains(&"Atlas Migration Plan".to_string()));
        assert!(analysis.entity_hints.contains(&"Jordan".to_string()));
        // The leading "Who" is sentence capitalization, not an entity.
        assert!(!analysis.entity_hints.contains(&"Who".to_string()));
    }

    #[test]
    fn test_relation_hints_from_verbs() {
        let analysis = classifier().classify("Who wrote the incident report and who owns the risk?");
        assert!(analysis.relation_hints.contains(&"AUTHORED".to_string()));
        assert!(analysis.relation_hints.contains(&"OWNS".to_string()));
    }

    #[test]
    fn test_custom_pack_rejects_unknown_language() {
        let toml = r#"
            [[language]]
            name = "klingon"
            markers = ['\bqapla\b']
        "#;
        let result = QueryClassifier::from_toml(Arc::new(StaticOntology::new()), toml);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_custom_pack_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packs.toml");
        std::fs::write(
            &path,
            r#"
            [[language]]
            name = "english"
            markers = ['\bthe\b']
            structural = ['\beverything\b']
        "#,
        )
        .unwrap();

        let classifier =
            QueryClassifier::from_file(Arc::new(StaticOntology::new()), &path).unwrap();
        let analysis = classifier.classify("Find everything about the rollout");
        assert_eq!(analysis.strategy, QueryStrategy::Structural);
    }
}
