use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;

/// Maps a subject IRI to the datasets it belongs to.
///
/// Exclusions are checked first and win outright. Otherwise every inclusion
/// pattern that matches contributes all of its captures (the whole match and
/// each participating group) as dataset identifiers.
pub struct PatternRouter {
    inclusions: Vec<Regex>,
    exclusions: Vec<Regex>,
}

impl PatternRouter {
    pub fn new(inclusions: &[String], exclusions: &[String]) -> Result<Self> {
        Ok(Self {
            inclusions: compile_all(inclusions, "dataset")?,
            exclusions: compile_all(exclusions, "exclusion")?,
        })
    }

    pub fn classify(&self, subject: &str) -> BTreeSet<String> {
        if self.is_excluded(subject) {
            return BTreeSet::new();
        }

        let mut datasets = BTreeSet::new();
        for re in &self.inclusions {
            if let Some(caps) = re.captures(subject) {
                for m in caps.iter().flatten() {
                    datasets.insert(m.as_str().to_string());
                }
            }
        }
        datasets
    }

    pub fn is_excluded(&self, subject: &str) -> bool {
        self.exclusions.iter().any(|re| re.is_match(subject))
    }
}

fn compile_all(patterns: &[String], kind: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("Invalid {} pattern: {}", kind, p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(inclusions: &[&str], exclusions: &[&str]) -> PatternRouter {
        let inc: Vec<String> = inclusions.iter().map(|s| s.to_string()).collect();
        let exc: Vec<String> = exclusions.iter().map(|s| s.to_string()).collect();
        PatternRouter::new(&inc, &exc).unwrap()
    }

    #[test]
    fn capture_names_dataset() {
        let r = router(&["^(/pods/[^/]+)"], &[]);
        let datasets = r.classify("/pods/alice/profile/card");
        assert_eq!(datasets.into_iter().collect::<Vec<_>>(), vec!["/pods/alice"]);
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let r = router(&["^(/pods/[^/]+)", "(/pods/[^/]+)"], &["^/private"]);
        assert!(r.classify("/private/pods/alice/x").is_empty());
        assert!(!r.classify("/pods/alice/x").is_empty());
    }

    #[test]
    fn all_captures_are_contributed() {
        let r = router(&["^(http://host/)(pods/[a-z]+/)"], &[]);
        let datasets = r.classify("http://host/pods/bob/posts");
        assert!(datasets.contains("http://host/pods/bob/"));
        assert!(datasets.contains("http://host/"));
        assert!(datasets.contains("pods/bob/"));
        assert_eq!(datasets.len(), 3);
    }

    #[test]
    fn multiple_patterns_give_set_semantics() {
        let r = router(&["^(/pods/[^/]+)", "^(/pods/[^/]+)/"], &[]);
        let datasets = r.classify("/pods/carol/a");
        // both patterns yield /pods/carol; the second also yields its full match
        assert!(datasets.contains("/pods/carol"));
        assert!(datasets.contains("/pods/carol/"));
        assert_eq!(datasets.len(), 2);
    }

    #[test]
    fn no_match_is_empty() {
        let r = router(&["^(/pods/[^/]+)"], &[]);
        assert!(r.classify("http://elsewhere/x").is_empty());
    }

    #[test]
    fn invalid_pattern_is_error() {
        let inc = vec!["(".to_string()];
        assert!(PatternRouter::new(&inc, &[]).is_err());
    }
}
