use crate::blank::BlankNodeRegistry;
use crate::config::{DEFAULT_MAX_RESOURCES, DEFAULT_STRATEGY, DEFAULT_VARIABLE_MARKER};
use crate::matcher::QuadMatcher;
use crate::models::{Quad, SummaryOutput, Term};
use crate::selector::{characteristic_sets, render_group, select, variable, CharacteristicSet};
use anyhow::{bail, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which statements a dataset is allowed to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Authoritativeness {
    /// Only subjects under the dataset id count.
    BaseUri,
}

/// Settings shared by every summary of a run.
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub filter: Option<Arc<QuadMatcher>>,
    pub authoritativeness: Option<Authoritativeness>,
    pub variable_marker: Arc<str>,
    pub strategy: Arc<str>,
    pub max_resources: usize,
    pub skip_single_predicate_sets: bool,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            filter: None,
            authoritativeness: None,
            variable_marker: Arc::from(DEFAULT_VARIABLE_MARKER),
            strategy: Arc::from(DEFAULT_STRATEGY),
            max_resources: DEFAULT_MAX_RESOURCES,
            skip_single_predicate_sets: true,
        }
    }
}

enum SummaryKind {
    PredicateSet {
        positions: FxHashMap<Term, usize>,
        predicate_sets: Vec<BTreeSet<Arc<str>>>,
    },
    TypeStar {
        matcher: Arc<QuadMatcher>,
        seen: FxHashSet<Term>,
        types: Vec<Term>,
        type_predicate: Option<Term>,
    },
    Stub,
}

/// Per-dataset structural state, accumulated while streaming.
pub struct DatasetSummary {
    dataset: String,
    options: SummaryOptions,
    kind: SummaryKind,
    blank_nodes: BlankNodeRegistry,
}

impl DatasetSummary {
    /// Records the predicate set of every subject.
    pub fn predicate_set(dataset: &str, options: SummaryOptions) -> Self {
        Self::with_kind(
            dataset,
            options,
            SummaryKind::PredicateSet {
                positions: FxHashMap::default(),
                predicate_sets: Vec::new(),
            },
        )
    }

    /// Records the distinct objects of statements accepted by `type_matcher`.
    pub fn type_star(dataset: &str, options: SummaryOptions, type_matcher: Arc<QuadMatcher>) -> Self {
        Self::with_kind(
            dataset,
            options,
            SummaryKind::TypeStar {
                matcher: type_matcher,
                seen: FxHashSet::default(),
                types: Vec::new(),
                type_predicate: None,
            },
        )
    }

    /// Records nothing and serializes to a single empty group.
    pub fn stub(dataset: &str) -> Self {
        Self::with_kind(dataset, SummaryOptions::default(), SummaryKind::Stub)
    }

    fn with_kind(dataset: &str, options: SummaryOptions, kind: SummaryKind) -> Self {
        Self {
            dataset: dataset.to_string(),
            options,
            kind,
            blank_nodes: BlankNodeRegistry::new(),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Records `quad`. Returns `false` when the filter or the authoritativeness
    /// rule refused it.
    pub fn register(&mut self, quad: &Quad) -> Result<bool> {
        if self.blank_nodes.is_finalized() {
            bail!(
                "Summary for {} is finalized, cannot register {}",
                self.dataset,
                quad.subject
            );
        }
        if matches!(self.kind, SummaryKind::Stub) {
            return Ok(true);
        }
        if let Some(filter) = &self.options.filter {
            if !filter.matches(quad) {
                return Ok(false);
            }
        }
        if self.options.authoritativeness == Some(Authoritativeness::BaseUri)
            && !quad.subject.value().starts_with(&self.dataset)
        {
            return Ok(false);
        }

        match &mut self.kind {
            SummaryKind::PredicateSet {
                positions,
                predicate_sets,
            } => {
                let subject = localize(&mut self.blank_nodes, &quad.subject)?;
                let predicate: Arc<str> = match &quad.predicate {
                    Term::Iri(iri) => iri.clone(),
                    other => Arc::from(other.value()),
                };
                let pos = *positions.entry(subject).or_insert_with(|| {
                    predicate_sets.push(BTreeSet::new());
                    predicate_sets.len() - 1
                });
                predicate_sets[pos].insert(predicate);
            }
            SummaryKind::TypeStar {
                matcher,
                seen,
                types,
                type_predicate,
            } => {
                if !matcher.matches(quad) {
                    return Ok(false);
                }
                let object = localize(&mut self.blank_nodes, &quad.object)?;
                if seen.insert(object.clone()) {
                    types.push(object);
                }
                *type_predicate = Some(quad.predicate.clone());
            }
            SummaryKind::Stub => {}
        }
        Ok(true)
    }

    pub fn finalize_blank_nodes(&mut self) {
        self.blank_nodes.finalize();
    }

    pub fn is_finalized(&self) -> bool {
        self.blank_nodes.is_finalized()
    }

    /// Distinct subjects recorded by a predicate-set summary.
    pub fn subject_count(&self) -> usize {
        match &self.kind {
            SummaryKind::PredicateSet { predicate_sets, .. } => predicate_sets.len(),
            _ => 0,
        }
    }

    /// Distinct type values recorded by a type-star summary.
    pub fn type_count(&self) -> usize {
        match &self.kind {
            SummaryKind::TypeStar { types, .. } => types.len(),
            _ => 0,
        }
    }

    /// All characteristic sets, before selection.
    pub fn characteristic_sets(&self) -> Vec<CharacteristicSet> {
        match &self.kind {
            SummaryKind::PredicateSet { predicate_sets, .. } => characteristic_sets(predicate_sets),
            _ => Vec::new(),
        }
    }

    pub fn serialize(&self) -> Result<SummaryOutput> {
        if !self.blank_nodes.is_finalized() {
            bail!(
                "Summary for {} serialized before blank nodes were resolved",
                self.dataset
            );
        }

        let marker = &*self.options.variable_marker;
        match &self.kind {
            SummaryKind::PredicateSet { .. } => {
                let selected = select(
                    self.characteristic_sets(),
                    &self.options.strategy,
                    self.options.max_resources,
                    self.options.skip_single_predicate_sets,
                )?;
                let mut output = SummaryOutput::empty(&self.dataset);
                for cset in &selected {
                    let group = render_group(cset, marker);
                    output.grouped.push(group.len());
                    output.patterns.extend(group);
                }
                Ok(output)
            }
            SummaryKind::TypeStar {
                types,
                type_predicate,
                ..
            } => {
                let mut output = SummaryOutput::empty(&self.dataset);
                let Some(type_predicate) = type_predicate else {
                    return Ok(output);
                };
                let subject = variable(marker, "s", None);
                for type_value in types {
                    output.patterns.push(Quad::new(
                        subject.clone(),
                        type_predicate.clone(),
                        type_value.clone(),
                    ));
                    output.grouped.push(1);
                }
                Ok(output)
            }
            SummaryKind::Stub => Ok(SummaryOutput {
                dataset: self.dataset.clone(),
                patterns: Vec::new(),
                grouped: vec![0],
            }),
        }
    }
}

fn localize(registry: &mut BlankNodeRegistry, term: &Term) -> Result<Term> {
    match term {
        Term::Blank(label) => Ok(Term::Blank(registry.substitute(label)?)),
        other => Ok(other.clone()),
    }
}
