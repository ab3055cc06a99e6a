use crate::models::Quad;
use anyhow::{bail, Context, Result};
use regex::Regex;
use rustc_hash::FxHashMap;

/// Remembers which owner identity (e.g. a WebID) belongs to which pod base
/// URI, so a direct link to a dataset's `.meta` file can be written into the
/// owner's profile document.
pub struct OwnerLinks {
    link_predicate: String,
    profile_predicate: Regex,
    pod_base_extraction: Regex,
    owners: FxHashMap<String, String>,
}

impl OwnerLinks {
    pub fn new(link_predicate: &str, profile_predicate: &str, pod_base_extraction: &str) -> Result<Self> {
        Ok(Self {
            link_predicate: link_predicate.to_string(),
            profile_predicate: Regex::new(profile_predicate)
                .with_context(|| format!("Invalid profilePredicateRegex: {}", profile_predicate))?,
            pod_base_extraction: Regex::new(pod_base_extraction).with_context(|| {
                format!("Invalid podBaseUriExtractionRegex: {}", pod_base_extraction)
            })?,
            owners: FxHashMap::default(),
        })
    }

    pub fn link_predicate(&self) -> &str {
        &self.link_predicate
    }

    /// Records the statement's object as owner of every pod base it names,
    /// if the predicate is a profile predicate.
    pub fn observe(&mut self, quad: &Quad) {
        if !self.profile_predicate.is_match(quad.predicate.value()) {
            return;
        }
        let owner = quad.object.value();
        if let Some(caps) = self.pod_base_extraction.captures(owner) {
            for m in caps.iter().flatten() {
                self.owners.insert(m.as_str().to_string(), owner.to_string());
            }
        }
    }

    /// Owners that must receive a link for `dataset`. Every pod base extracted
    /// from the dataset id needs a recorded owner.
    pub fn owners_of(&self, dataset: &str) -> Result<Vec<String>> {
        let mut owners = Vec::new();
        if let Some(caps) = self.pod_base_extraction.captures(dataset) {
            for m in caps.iter().flatten() {
                match self.owners.get(m.as_str()) {
                    Some(owner) => {
                        if !owners.contains(owner) {
                            owners.push(owner.clone());
                        }
                    }
                    None => bail!("Found summary for pod without registered WebId: {}", m.as_str()),
                }
            }
        }
        Ok(owners)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Term;

    const MAKER: &str = "http://xmlns.com/foaf/0.1/maker";

    fn links() -> OwnerLinks {
        OwnerLinks::new(
            "urn:derived:meta",
            "foaf/0.1/maker$",
            "^(http://localhost:3000/pods/[0-9]+/)",
        )
        .unwrap()
    }

    #[test]
    fn records_owner_for_pod() {
        let mut l = links();
        l.observe(&Quad::new(
            Term::iri("http://localhost:3000/pods/01/posts/1"),
            Term::iri(MAKER),
            Term::iri("http://localhost:3000/pods/01/profile/card#me"),
        ));
        let owners = l.owners_of("http://localhost:3000/pods/01/").unwrap();
        assert_eq!(owners, vec!["http://localhost:3000/pods/01/profile/card#me"]);
    }

    #[test]
    fn ignores_other_predicates() {
        let mut l = links();
        l.observe(&Quad::new(
            Term::iri("http://localhost:3000/pods/01/posts/1"),
            Term::iri("http://schema.org/author"),
            Term::iri("http://localhost:3000/pods/01/profile/card#me"),
        ));
        assert!(l.is_empty());
    }

    #[test]
    fn missing_owner_is_fatal() {
        let l = links();
        let err = l.owners_of("http://localhost:3000/pods/02/").unwrap_err();
        assert!(err.to_string().contains("without registered WebId"));
    }

    #[test]
    fn dataset_outside_extraction_needs_no_owner() {
        let l = links();
        assert!(l.owners_of("http://elsewhere/").unwrap().is_empty());
    }
}
