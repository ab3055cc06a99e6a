use crate::models::{Quad, Term};
use anyhow::{bail, Error, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

/// How characteristic sets are ranked before truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    /// Fewest predicates first
    MinSize,
    /// Most predicates first
    MaxSize,
    /// Most subjects first
    MaxCardinality,
}

impl FromStr for SelectionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "minSize" => Ok(SelectionStrategy::MinSize),
            "maxSize" => Ok(SelectionStrategy::MaxSize),
            "maxCardinality" => Ok(SelectionStrategy::MaxCardinality),
            other => bail!("Unsupported derived resource construction strategy: {}", other),
        }
    }
}

/// Subjects sharing exactly the same predicate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSet {
    /// Sorted, deduplicated predicate IRIs; this is the signature.
    pub predicates: Vec<Arc<str>>,
    pub count: u64,
}

impl CharacteristicSet {
    pub fn size(&self) -> usize {
        self.predicates.len()
    }
}

/// Counts subjects per predicate-set signature.
///
/// `BTreeSet` iteration is sorted, so the signature does not depend on the
/// order predicates were observed in. Sets come out in first-seen order.
pub fn characteristic_sets<'a, I>(predicate_sets: I) -> Vec<CharacteristicSet>
where
    I: IntoIterator<Item = &'a BTreeSet<Arc<str>>>,
{
    let mut positions: FxHashMap<&'a BTreeSet<Arc<str>>, usize> = FxHashMap::default();
    let mut sets: Vec<CharacteristicSet> = Vec::new();

    for predicates in predicate_sets {
        match positions.get(predicates) {
            Some(&pos) => sets[pos].count += 1,
            None => {
                positions.insert(predicates, sets.len());
                sets.push(CharacteristicSet {
                    predicates: predicates.iter().cloned().collect(),
                    count: 1,
                });
            }
        }
    }
    sets
}

/// Ranks `csets` under `strategy` and keeps at most `limit`.
///
/// The strategy name is parsed here, so an unknown name surfaces when a
/// summary is first serialized. Sorting is stable: ties keep input order.
/// With `skip_trivial`, sets with a single predicate are not eligible.
pub fn select(
    csets: Vec<CharacteristicSet>,
    strategy: &str,
    limit: usize,
    skip_trivial: bool,
) -> Result<Vec<CharacteristicSet>> {
    let strategy: SelectionStrategy = strategy.parse()?;

    let mut eligible: Vec<CharacteristicSet> = csets
        .into_iter()
        .filter(|c| !skip_trivial || c.size() > 1)
        .collect();

    match strategy {
        SelectionStrategy::MinSize => eligible.sort_by_key(|c| c.size()),
        SelectionStrategy::MaxSize => eligible.sort_by(|a, b| b.size().cmp(&a.size())),
        SelectionStrategy::MaxCardinality => eligible.sort_by(|a, b| b.count.cmp(&a.count)),
    }

    eligible.truncate(limit);
    Ok(eligible)
}

/// Builds a variable placeholder IRI such as `urn:var:o3`.
pub fn variable(marker: &str, name: &str, index: Option<usize>) -> Term {
    let mut iri = String::with_capacity(marker.len() + name.len() + 4);
    iri.push_str(marker);
    iri.push_str(name);
    if let Some(index) = index {
        let mut buf = itoa::Buffer::new();
        iri.push_str(buf.format(index));
    }
    Term::iri(iri)
}

/// One star pattern per characteristic set: a shared subject variable and a
/// fresh object variable per predicate, e.g. `?s0 p1 ?o0 . ?s0 p2 ?o1`.
pub fn render_group(cset: &CharacteristicSet, marker: &str) -> Vec<Quad> {
    let subject = variable(marker, "s", Some(0));
    cset.predicates
        .iter()
        .enumerate()
        .map(|(i, predicate)| {
            Quad::new(
                subject.clone(),
                Term::Iri(predicate.clone()),
                variable(marker, "o", Some(i)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pset(preds: &[&str]) -> BTreeSet<Arc<str>> {
        preds.iter().map(|p| Arc::from(*p)).collect()
    }

    fn cset(preds: &[&str], count: u64) -> CharacteristicSet {
        CharacteristicSet {
            predicates: preds.iter().map(|p| Arc::from(*p)).collect(),
            count,
        }
    }

    fn sizes(sets: &[CharacteristicSet]) -> Vec<usize> {
        sets.iter().map(|c| c.size()).collect()
    }

    #[test]
    fn signatures_ignore_observation_order() {
        let subjects = vec![pset(&["b", "a"]), pset(&["a", "b"]), pset(&["c"])];
        let sets = characteristic_sets(&subjects);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], cset(&["a", "b"], 2));
        assert_eq!(sets[1], cset(&["c"], 1));
    }

    #[test]
    fn min_size_ascending() {
        let sets = vec![cset(&["a", "b", "c"], 1), cset(&["a", "b"], 1), cset(&["x", "y", "z", "w"], 1)];
        let selected = select(sets, "minSize", 10, true).unwrap();
        assert_eq!(sizes(&selected), vec![2, 3, 4]);
    }

    #[test]
    fn max_size_descending() {
        let sets = vec![cset(&["a", "b"], 1), cset(&["x", "y", "z", "w"], 1), cset(&["a", "b", "c"], 1)];
        let selected = select(sets, "maxSize", 10, true).unwrap();
        assert_eq!(sizes(&selected), vec![4, 3, 2]);
    }

    #[test]
    fn max_cardinality_descending() {
        let sets = vec![cset(&["a", "b"], 3), cset(&["c", "d"], 9), cset(&["e", "f"], 5)];
        let selected = select(sets, "maxCardinality", 2, true).unwrap();
        let counts: Vec<u64> = selected.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![9, 5]);
    }

    #[test]
    fn ties_keep_input_order() {
        let sets = vec![cset(&["a", "b"], 1), cset(&["c", "d"], 1), cset(&["e", "f"], 1)];
        let selected = select(sets.clone(), "minSize", 10, true).unwrap();
        assert_eq!(selected, sets);
        let selected = select(sets.clone(), "maxCardinality", 10, true).unwrap();
        assert_eq!(selected, sets);
    }

    #[test]
    fn limit_bounds_result() {
        let sets: Vec<_> = (0..5).map(|i| cset(&["a", &format!("p{}", i)], 1)).collect();
        assert_eq!(select(sets.clone(), "minSize", 3, true).unwrap().len(), 3);
        assert_eq!(select(sets.clone(), "minSize", 9, true).unwrap().len(), 5);
        assert!(select(sets, "minSize", 0, true).unwrap().is_empty());
    }

    #[test]
    fn single_predicate_sets_filtered() {
        let sets = vec![cset(&["a"], 100), cset(&["a", "b"], 1)];
        let selected = select(sets.clone(), "maxCardinality", 10, true).unwrap();
        assert_eq!(selected, vec![cset(&["a", "b"], 1)]);
        let selected = select(sets, "maxCardinality", 10, false).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn unknown_strategy_fails() {
        let err = select(vec![], "random", 10, true).unwrap_err();
        assert!(err.to_string().contains("Unsupported derived resource construction strategy"));
    }

    #[test]
    fn render_group_uses_fresh_object_variables() {
        let patterns = render_group(&cset(&["http://p1", "http://p2", "http://p3"], 1), "urn:var:");
        assert_eq!(patterns.len(), 3);
        for (i, q) in patterns.iter().enumerate() {
            assert_eq!(q.subject, Term::iri("urn:var:s0"));
            assert_eq!(q.object, Term::iri(format!("urn:var:o{}", i)));
        }
        assert_eq!(patterns[1].predicate, Term::iri("http://p2"));
    }
}
