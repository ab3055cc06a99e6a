use crate::models::Quad;
use crate::summary::DatasetSummary;
use anyhow::{bail, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Dataset-scoped renaming of blank node labels.
///
/// Every original label gets a stable substitute (`b0`, `b1`, ...) in
/// first-seen order, so all patterns derived from statements sharing a blank
/// node agree on it. Once finalized, no new label can be introduced.
#[derive(Debug, Default)]
pub struct BlankNodeRegistry {
    substitutes: FxHashMap<Arc<str>, Arc<str>>,
    finalized: bool,
}

impl BlankNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn substitute(&mut self, label: &Arc<str>) -> Result<Arc<str>> {
        if let Some(existing) = self.substitutes.get(label) {
            return Ok(existing.clone());
        }
        if self.finalized {
            bail!("Blank node registry is finalized, cannot add _:{}", label);
        }
        let mut buf = itoa::Buffer::new();
        let mut name = String::with_capacity(4);
        name.push('b');
        name.push_str(buf.format(self.substitutes.len()));
        let name: Arc<str> = Arc::from(name);
        self.substitutes.insert(label.clone(), name.clone());
        Ok(name)
    }

    /// Idempotent; there is no way back.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn len(&self) -> usize {
        self.substitutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.substitutes.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveReport {
    /// Deferred statements a summary accepted (counted per dataset)
    pub attributed: u64,
    /// Deferred statements reached but refused by a summary's filter
    pub rejected: u64,
    /// Deferred statements no dataset ever referenced
    pub dropped: u64,
    /// Distinct (blank node, dataset) links followed
    pub links: usize,
}

/// Attributes statements with a blank-node subject to the datasets that
/// reference that blank node.
///
/// Such statements cannot be routed by subject while streaming, so they are
/// deferred in arrival order and indexed by subject label. Routed statements
/// with a blank object record a reference from their dataset.
/// [`resolve`](Self::resolve) walks those references breadth-first, following
/// blank objects of attributed statements, so every (label, dataset) link is
/// visited once. It then finalizes every summary's registry.
#[derive(Default)]
pub struct BlankNodeResolver {
    deferred: Vec<Quad>,
    by_subject: FxHashMap<Arc<str>, Vec<usize>>,
    references: Vec<(Arc<str>, String)>,
    seen: FxHashSet<(Arc<str>, String)>,
    resolved: bool,
}

impl BlankNodeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&mut self, quad: Quad) -> Result<()> {
        if self.resolved {
            bail!("Cannot defer statements after blank nodes were resolved");
        }
        let Some(label) = quad.subject.blank_label().cloned() else {
            bail!("Only statements with a blank subject can be deferred, got {}", quad.subject);
        };
        self.by_subject
            .entry(label)
            .or_default()
            .push(self.deferred.len());
        self.deferred.push(quad);
        Ok(())
    }

    pub fn note_reference(&mut self, label: &Arc<str>, dataset: &str) {
        let link = (label.clone(), dataset.to_string());
        if self.seen.insert(link.clone()) {
            self.references.push(link);
        }
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolve(
        &mut self,
        summaries: &mut BTreeMap<String, DatasetSummary>,
    ) -> Result<ResolveReport> {
        if self.resolved {
            bail!("Blank nodes were already resolved for this run");
        }

        let mut report = ResolveReport::default();
        let mut reached = vec![false; self.deferred.len()];
        let mut queue: VecDeque<(Arc<str>, String)> = self.references.drain(..).collect();

        while let Some((label, dataset)) = queue.pop_front() {
            report.links += 1;
            let Some(indices) = self.by_subject.get(&label) else {
                continue;
            };
            for &idx in indices {
                let quad = &self.deferred[idx];
                reached[idx] = true;
                if let Some(summary) = summaries.get_mut(&dataset) {
                    if summary.register(quad)? {
                        report.attributed += 1;
                    } else {
                        report.rejected += 1;
                    }
                }
                if let Some(object) = quad.object.blank_label() {
                    let link = (object.clone(), dataset.clone());
                    if self.seen.insert(link.clone()) {
                        queue.push_back(link);
                    }
                }
            }
        }

        report.dropped = reached.iter().filter(|r| !**r).count() as u64;
        self.deferred.clear();
        self.by_subject.clear();
        self.seen.clear();

        for summary in summaries.values_mut() {
            summary.finalize_blank_nodes();
        }
        self.resolved = true;

        debug!(
            attributed = report.attributed,
            rejected = report.rejected,
            dropped = report.dropped,
            links = report.links,
            "Blank nodes resolved"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Term;
    use crate::summary::{Authoritativeness, DatasetSummary, SummaryOptions};

    fn summaries(ids: &[&str]) -> BTreeMap<String, DatasetSummary> {
        ids.iter()
            .map(|id| (id.to_string(), DatasetSummary::predicate_set(id, SummaryOptions::default())))
            .collect()
    }

    fn q(s: Term, p: &str, o: Term) -> Quad {
        Quad::new(s, Term::iri(p), o)
    }

    #[test]
    fn registry_assigns_stable_substitutes() {
        let mut reg = BlankNodeRegistry::new();
        let a: Arc<str> = Arc::from("xyz");
        let b: Arc<str> = Arc::from("abc");
        assert_eq!(&*reg.substitute(&a).unwrap(), "b0");
        assert_eq!(&*reg.substitute(&b).unwrap(), "b1");
        assert_eq!(&*reg.substitute(&a).unwrap(), "b0");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn finalized_registry_rejects_new_labels() {
        let mut reg = BlankNodeRegistry::new();
        let a: Arc<str> = Arc::from("a");
        reg.substitute(&a).unwrap();
        reg.finalize();
        reg.finalize();
        assert!(reg.is_finalized());
        assert!(reg.substitute(&a).is_ok());
        assert!(reg.substitute(&Arc::from("new")).is_err());
    }

    #[test]
    fn deferred_statement_follows_reference() {
        let mut all = summaries(&["http://pod/a/"]);
        let mut resolver = BlankNodeResolver::new();

        // blank subject arrives before anything references it
        resolver
            .defer(q(Term::blank("n1"), "http://p/street", Term::literal("Main St")))
            .unwrap();
        let routed = q(Term::iri("http://pod/a/me"), "http://p/address", Term::blank("n1"));
        all.get_mut("http://pod/a/").unwrap().register(&routed).unwrap();
        resolver.note_reference(routed.object.blank_label().unwrap(), "http://pod/a/");

        let report = resolver.resolve(&mut all).unwrap();
        assert_eq!(report.attributed, 1);
        assert_eq!(report.dropped, 0);
        assert_eq!(all["http://pod/a/"].subject_count(), 2);
    }

    #[test]
    fn references_propagate_through_blank_chains() {
        let mut all = summaries(&["http://pod/a/"]);
        let mut resolver = BlankNodeResolver::new();

        // _:inner is only reachable through _:outer
        resolver
            .defer(q(Term::blank("inner"), "http://p/x", Term::literal("1")))
            .unwrap();
        resolver
            .defer(q(Term::blank("outer"), "http://p/y", Term::blank("inner")))
            .unwrap();
        resolver.note_reference(&Arc::from("outer"), "http://pod/a/");

        let report = resolver.resolve(&mut all).unwrap();
        assert_eq!(report.attributed, 2);
        assert_eq!(report.links, 2);
        assert_eq!(all["http://pod/a/"].subject_count(), 2);
    }

    #[test]
    fn unreferenced_statements_are_dropped() {
        let mut all = summaries(&["http://pod/a/"]);
        let mut resolver = BlankNodeResolver::new();
        resolver
            .defer(q(Term::blank("lonely"), "http://p/x", Term::literal("1")))
            .unwrap();
        let report = resolver.resolve(&mut all).unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(all["http://pod/a/"].subject_count(), 0);
    }

    #[test]
    fn shared_blank_node_reaches_every_referencing_dataset() {
        let mut all = summaries(&["http://pod/a/", "http://pod/b/"]);
        let mut resolver = BlankNodeResolver::new();
        resolver
            .defer(q(Term::blank("shared"), "http://p/x", Term::literal("1")))
            .unwrap();
        resolver.note_reference(&Arc::from("shared"), "http://pod/a/");
        resolver.note_reference(&Arc::from("shared"), "http://pod/b/");

        let report = resolver.resolve(&mut all).unwrap();
        assert_eq!(report.attributed, 2);
        assert_eq!(all["http://pod/a/"].subject_count(), 1);
        assert_eq!(all["http://pod/b/"].subject_count(), 1);
    }

    #[test]
    fn resolve_runs_once_and_finalizes() {
        let mut all = summaries(&["http://pod/a/"]);
        let mut resolver = BlankNodeResolver::new();
        resolver.resolve(&mut all).unwrap();
        assert!(all["http://pod/a/"].is_finalized());
        assert!(resolver.resolve(&mut all).is_err());
        assert!(resolver
            .defer(q(Term::blank("late"), "http://p/x", Term::literal("1")))
            .is_err());
    }

    #[test]
    fn long_reverse_chain_visits_each_link_once() {
        let mut all = summaries(&["http://pod/a/"]);
        let mut resolver = BlankNodeResolver::new();

        // _:n0 -> _:n1 -> ... -> _:n2999, deferred tail first
        let n = 3000;
        for i in (0..n).rev() {
            let object = if i + 1 < n {
                Term::blank(format!("n{}", i + 1))
            } else {
                Term::literal("end")
            };
            resolver
                .defer(q(Term::blank(format!("n{}", i)), "http://p/next", object))
                .unwrap();
        }
        resolver.note_reference(&Arc::from("n0"), "http://pod/a/");

        let report = resolver.resolve(&mut all).unwrap();
        assert_eq!(report.attributed, n as u64);
        assert_eq!(report.links, n);
        assert_eq!(report.dropped, 0);
        assert_eq!(all["http://pod/a/"].subject_count(), n);
    }

    #[test]
    fn rejected_statements_are_not_attributed() {
        let options = SummaryOptions {
            authoritativeness: Some(Authoritativeness::BaseUri),
            ..SummaryOptions::default()
        };
        let mut all: BTreeMap<String, DatasetSummary> = [(
            "http://pod/a/".to_string(),
            DatasetSummary::predicate_set("http://pod/a/", options),
        )]
        .into_iter()
        .collect();
        let mut resolver = BlankNodeResolver::new();
        resolver
            .defer(q(Term::blank("addr"), "http://p/street", Term::literal("Main")))
            .unwrap();
        resolver.note_reference(&Arc::from("addr"), "http://pod/a/");

        let report = resolver.resolve(&mut all).unwrap();
        assert_eq!(report.attributed, 0);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.dropped, 0);
        assert_eq!(all["http://pod/a/"].subject_count(), 0);
    }

    #[test]
    fn only_blank_subjects_can_be_deferred() {
        let mut resolver = BlankNodeResolver::new();
        assert!(resolver
            .defer(q(Term::iri("http://pod/a/s"), "http://p/x", Term::literal("1")))
            .is_err());
    }
}
