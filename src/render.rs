use crate::models::{Quad, Term};
use std::fmt::Write;
use std::sync::Arc;

/// Extra knobs some renderers need.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext {
    /// Number of predicate placeholders in a ladder query.
    pub n_predicates: Option<usize>,
}

/// Turns a group of statement patterns into query text.
pub trait QueryRenderer: Send + Sync {
    fn render(&self, patterns: &[Quad], ctx: &RenderContext) -> String;
}

/// Renders a term, turning marker-prefixed IRIs into `?variables`.
fn render_term(term: &Term, marker: &str) -> String {
    match term {
        Term::Iri(iri) if iri.starts_with(marker) => format!("?{}", &iri[marker.len()..]),
        other => other.to_ntriples(),
    }
}

fn render_patterns(patterns: &[Quad], marker: &str) -> String {
    let mut out = String::new();
    for q in patterns {
        let _ = writeln!(
            out,
            "  {} {} {} .",
            render_term(&q.subject, marker),
            render_term(&q.predicate, marker),
            render_term(&q.object, marker)
        );
    }
    out
}

/// `CONSTRUCT` whose template and basic graph pattern are the patterns themselves.
pub struct ConstructRenderer {
    marker: Arc<str>,
}

impl ConstructRenderer {
    pub fn new(marker: Arc<str>) -> Self {
        Self { marker }
    }
}

impl QueryRenderer for ConstructRenderer {
    fn render(&self, patterns: &[Quad], _ctx: &RenderContext) -> String {
        let body = render_patterns(patterns, &self.marker);
        format!("CONSTRUCT {{\n{body}}}\nWHERE {{\n{body}}}\n")
    }
}

/// Fetches every triple whose predicate is one of the group's predicates.
pub struct ValuesRenderer;

impl QueryRenderer for ValuesRenderer {
    fn render(&self, patterns: &[Quad], _ctx: &RenderContext) -> String {
        let predicates: Vec<String> = patterns.iter().map(|q| q.predicate.to_ntriples()).collect();
        format!(
            "CONSTRUCT {{ ?s ?p ?o }}\nWHERE {{\n  ?s ?p ?o .\n  VALUES ?p {{ {} }}\n}}\n",
            predicates.join(" ")
        )
    }
}

/// Fetches whole subjects that also satisfy the group's patterns, used for
/// type stars where the pattern pins the subject's type.
pub struct StarRenderer {
    marker: Arc<str>,
}

impl StarRenderer {
    pub fn new(marker: Arc<str>) -> Self {
        Self { marker }
    }
}

impl QueryRenderer for StarRenderer {
    fn render(&self, patterns: &[Quad], _ctx: &RenderContext) -> String {
        format!(
            "CONSTRUCT {{ ?s ?p ?o }}\nWHERE {{\n  ?s ?p ?o .\n{}}}\n",
            render_patterns(patterns, &self.marker)
        )
    }
}

/// Star query over `n_predicates` placeholder predicates `$p1$ .. $pn$`,
/// filled in by whoever serves the template. Patterns are ignored.
pub struct PredicateLadderRenderer;

impl QueryRenderer for PredicateLadderRenderer {
    fn render(&self, _patterns: &[Quad], ctx: &RenderContext) -> String {
        let mut body = String::new();
        let mut buf = itoa::Buffer::new();
        for j in 1..=ctx.n_predicates.unwrap_or(1) {
            let j = buf.format(j);
            let _ = writeln!(body, "  ?s $p{j}$ ?o{j} .");
        }
        format!("CONSTRUCT {{\n{body}}}\nWHERE {{\n{body}}}\n")
    }
}
