use anyhow::{bail, Result};
use oxrdf::vocab::xsd;
use oxrdf::{BlankNodeRef, GraphName, LiteralRef, NamedNodeRef};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// A single RDF term: IRI, blank node or literal.
///
/// Values are reference counted so the same predicate or subject can be held by
/// many summaries without copying the underlying string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(Arc<str>),
    /// Blank node label without the `_:` prefix.
    Blank(Arc<str>),
    Literal {
        value: Arc<str>,
        language: Option<Arc<str>>,
        datatype: Option<Arc<str>>,
    },
}

impl Term {
    pub fn iri(value: impl AsRef<str>) -> Self {
        Term::Iri(Arc::from(value.as_ref()))
    }

    pub fn blank(label: impl AsRef<str>) -> Self {
        Term::Blank(Arc::from(label.as_ref()))
    }

    pub fn literal(value: impl AsRef<str>) -> Self {
        Term::Literal {
            value: Arc::from(value.as_ref()),
            language: None,
            datatype: None,
        }
    }

    pub fn lang_literal(value: impl AsRef<str>, language: impl AsRef<str>) -> Self {
        Term::Literal {
            value: Arc::from(value.as_ref()),
            language: Some(Arc::from(language.as_ref())),
            datatype: None,
        }
    }

    pub fn typed_literal(value: impl AsRef<str>, datatype: impl AsRef<str>) -> Self {
        Term::Literal {
            value: Arc::from(value.as_ref()),
            language: None,
            datatype: Some(Arc::from(datatype.as_ref())),
        }
    }

    /// The lexical value: IRI string, blank label or literal text.
    pub fn value(&self) -> &str {
        match self {
            Term::Iri(v) | Term::Blank(v) => v,
            Term::Literal { value, .. } => value,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    pub fn blank_label(&self) -> Option<&Arc<str>> {
        match self {
            Term::Blank(label) => Some(label),
            _ => None,
        }
    }

    /// N-Triples serialization of this term.
    pub fn to_ntriples(&self) -> String {
        match self {
            Term::Iri(v) => NamedNodeRef::new_unchecked(v).to_string(),
            Term::Blank(v) => BlankNodeRef::new_unchecked(v).to_string(),
            Term::Literal {
                value,
                language,
                datatype,
            } => match (language, datatype) {
                (Some(lang), _) => {
                    LiteralRef::new_language_tagged_literal_unchecked(value, lang).to_string()
                }
                (None, Some(dt)) => {
                    LiteralRef::new_typed_literal(value, NamedNodeRef::new_unchecked(dt)).to_string()
                }
                (None, None) => LiteralRef::new_simple_literal(value).to_string(),
            },
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ntriples())
    }
}

impl From<oxrdf::NamedNode> for Term {
    fn from(node: oxrdf::NamedNode) -> Self {
        Term::Iri(Arc::from(node.into_string()))
    }
}

impl From<oxrdf::BlankNode> for Term {
    fn from(node: oxrdf::BlankNode) -> Self {
        Term::Blank(Arc::from(node.as_str()))
    }
}

impl From<oxrdf::Literal> for Term {
    fn from(literal: oxrdf::Literal) -> Self {
        if let Some(lang) = literal.language() {
            return Term::lang_literal(literal.value(), lang);
        }
        if literal.datatype() == xsd::STRING {
            Term::literal(literal.value())
        } else {
            Term::typed_literal(literal.value(), literal.datatype().as_str())
        }
    }
}

impl From<oxrdf::NamedOrBlankNode> for Term {
    fn from(node: oxrdf::NamedOrBlankNode) -> Self {
        match node {
            oxrdf::NamedOrBlankNode::NamedNode(n) => n.into(),
            oxrdf::NamedOrBlankNode::BlankNode(b) => b.into(),
        }
    }
}

impl TryFrom<oxrdf::Term> for Term {
    type Error = anyhow::Error;

    fn try_from(term: oxrdf::Term) -> Result<Self> {
        match term {
            oxrdf::Term::NamedNode(n) => Ok(n.into()),
            oxrdf::Term::BlankNode(b) => Ok(b.into()),
            oxrdf::Term::Literal(l) => Ok(l.into()),
            #[allow(unreachable_patterns)]
            other => bail!("Unsupported quoted triple term: {}", other),
        }
    }
}

/// Which position of a statement a matcher or callback looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuadField {
    Subject,
    Predicate,
    Object,
    Graph,
}

/// An immutable statement. The graph is `None` for triples in the default graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Option<Term>,
}

impl Quad {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: None,
        }
    }

    pub fn with_graph(mut self, graph: Term) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn field(&self, field: QuadField) -> Option<&Term> {
        match field {
            QuadField::Subject => Some(&self.subject),
            QuadField::Predicate => Some(&self.predicate),
            QuadField::Object => Some(&self.object),
            QuadField::Graph => self.graph.as_ref(),
        }
    }

    /// One N-Quads line, including the terminating ` .\n`.
    pub fn to_nquads(&self) -> String {
        let mut line = format!(
            "{} {} {}",
            self.subject.to_ntriples(),
            self.predicate.to_ntriples(),
            self.object.to_ntriples()
        );
        if let Some(graph) = &self.graph {
            line.push(' ');
            line.push_str(&graph.to_ntriples());
        }
        line.push_str(" .\n");
        line
    }
}

impl TryFrom<oxrdf::Quad> for Quad {
    type Error = anyhow::Error;

    fn try_from(quad: oxrdf::Quad) -> Result<Self> {
        let graph = match quad.graph_name {
            GraphName::NamedNode(n) => Some(n.into()),
            GraphName::BlankNode(b) => Some(b.into()),
            GraphName::DefaultGraph => None,
        };
        Ok(Self {
            subject: quad.subject.into(),
            predicate: quad.predicate.into(),
            object: quad.object.try_into()?,
            graph,
        })
    }
}

/// What a dataset summary serializes into.
///
/// `patterns` is flat; `grouped[i]` is the number of consecutive patterns that
/// make up derived resource `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutput {
    pub dataset: String,
    pub patterns: Vec<Quad>,
    pub grouped: Vec<usize>,
}

impl SummaryOutput {
    pub fn empty(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            patterns: Vec::new(),
            grouped: Vec::new(),
        }
    }

    /// Splits the flat pattern list back into its groups, in order.
    pub fn groups(&self) -> impl Iterator<Item = &[Quad]> + '_ {
        let mut start = 0;
        self.grouped.iter().map(move |&size| {
            let end = (start + size).min(self.patterns.len());
            let group = &self.patterns[start..end];
            start = end;
            group
        })
    }
}
