use crate::models::{Quad, QuadField};
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

/// Per-field regexes, as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatcherConfig {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    pub object: Option<String>,
    pub graph: Option<String>,
}

/// Matches a statement when every configured field regex matches that field's value.
///
/// A matcher with no fields matches everything. A graph regex never matches a
/// statement in the default graph.
#[derive(Debug, Clone)]
pub struct QuadMatcher {
    rules: Vec<(QuadField, Regex)>,
}

impl QuadMatcher {
    pub fn new(rules: &[(QuadField, &str)]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(field, pattern)| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid {:?} matcher regex: {}", field, pattern))
                    .map(|re| (*field, re))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn from_config(config: &MatcherConfig) -> Result<Self> {
        let mut rules = Vec::new();
        for (field, pattern) in [
            (QuadField::Subject, &config.subject),
            (QuadField::Predicate, &config.predicate),
            (QuadField::Object, &config.object),
            (QuadField::Graph, &config.graph),
        ] {
            if let Some(pattern) = pattern {
                rules.push((field, pattern.as_str()));
            }
        }
        Self::new(&rules)
    }

    pub fn matches(&self, quad: &Quad) -> bool {
        self.rules.iter().all(|(field, re)| match quad.field(*field) {
            Some(term) => re.is_match(term.value()),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Term;

    const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

    fn quad(p: &str) -> Quad {
        Quad::new(Term::iri("http://pod/s"), Term::iri(p), Term::iri("http://schema/Post"))
    }

    #[test]
    fn predicate_matcher() {
        let matcher = QuadMatcher::new(&[(QuadField::Predicate, "#type$")]).unwrap();
        assert!(matcher.matches(&quad(RDF_TYPE)));
        assert!(!matcher.matches(&quad("http://xmlns.com/foaf/0.1/name")));
    }

    #[test]
    fn all_rules_must_match() {
        let matcher = QuadMatcher::from_config(&MatcherConfig {
            predicate: Some("#type$".to_string()),
            object: Some("Comment$".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(!matcher.matches(&quad(RDF_TYPE)));
    }

    #[test]
    fn empty_matcher_matches_everything() {
        let matcher = QuadMatcher::from_config(&MatcherConfig::default()).unwrap();
        assert!(matcher.matches(&quad("http://anything")));
    }

    #[test]
    fn graph_rule_requires_graph() {
        let matcher = QuadMatcher::new(&[(QuadField::Graph, ".*")]).unwrap();
        assert!(!matcher.matches(&quad(RDF_TYPE)));
        assert!(matcher.matches(&quad(RDF_TYPE).with_graph(Term::iri("http://g"))));
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = QuadMatcher::new(&[(QuadField::Subject, "(")]).unwrap_err();
        assert!(err.to_string().contains("Invalid Subject matcher regex"));
    }
}
