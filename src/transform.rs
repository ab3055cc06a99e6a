use crate::matcher::{MatcherConfig, QuadMatcher};
use crate::models::{Quad, QuadField, Term};
use crate::path::replacement_template;
use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs::{self, File};
use std::path::PathBuf;

/// Rewrites a statement before it is routed. May drop it (empty result) or
/// fan it out into several statements.
pub trait StatementTransformer: Send {
    fn transform(&self, quad: Quad) -> Vec<Quad>;
}

/// Applies `transformers` in order, each to every output of the previous one.
pub fn apply_chain(transformers: &[Box<dyn StatementTransformer>], quad: Quad) -> Vec<Quad> {
    let mut current = vec![quad];
    for transformer in transformers {
        current = current
            .into_iter()
            .flat_map(|q| transformer.transform(q))
            .collect();
    }
    current
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RewriteConfig {
    pub search: String,
    pub replace: String,
}

/// Regex search/replace over every IRI of a statement.
pub struct IriRewriteTransformer {
    search: Regex,
    replace: String,
}

impl IriRewriteTransformer {
    pub fn new(search: &str, replace: &str) -> Result<Self> {
        Ok(Self {
            search: Regex::new(search)
                .with_context(|| format!("Invalid transformer search regex: {}", search))?,
            replace: replacement_template(replace),
        })
    }

    pub fn from_config(config: &RewriteConfig) -> Result<Self> {
        Self::new(&config.search, &config.replace)
    }

    fn rewrite(&self, term: Term) -> Term {
        match term {
            Term::Iri(iri) if self.search.is_match(&iri) => {
                Term::iri(self.search.replace_all(&iri, self.replace.as_str()))
            }
            other => other,
        }
    }
}

impl StatementTransformer for IriRewriteTransformer {
    fn transform(&self, quad: Quad) -> Vec<Quad> {
        vec![Quad {
            subject: self.rewrite(quad.subject),
            predicate: self.rewrite(quad.predicate),
            object: self.rewrite(quad.object),
            graph: quad.graph.map(|g| self.rewrite(g)),
        }]
    }
}

/// Observes every statement together with what the transformer chain made of it.
pub trait TransformCallback: Send {
    fn initialize(&mut self) -> Result<()>;
    fn run(&mut self, original: &Quad, produced: &[Quad]) -> Result<()>;
    fn end(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CallbackMapConfig {
    pub matchers: Vec<MatcherConfig>,
    pub field: QuadField,
    pub columns: Vec<String>,
    pub file: String,
}

/// Writes one CSV row per statement whose produced statements match any of
/// the matchers: the original's `field` value followed by that field of each
/// matching produced statement.
pub struct TransformCallbackMap {
    matchers: Vec<QuadMatcher>,
    field: QuadField,
    columns: Vec<String>,
    file: PathBuf,
    writer: Option<csv::Writer<File>>,
    rows: u64,
}

impl TransformCallbackMap {
    pub fn new(matchers: Vec<QuadMatcher>, field: QuadField, columns: Vec<String>, file: PathBuf) -> Self {
        Self {
            matchers,
            field,
            columns,
            file,
            writer: None,
            rows: 0,
        }
    }

    pub fn from_config(config: &CallbackMapConfig) -> Result<Self> {
        let matchers = config
            .matchers
            .iter()
            .map(QuadMatcher::from_config)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(
            matchers,
            config.field,
            config.columns.clone(),
            PathBuf::from(&config.file),
        ))
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn field_value<'q>(&self, quad: &'q Quad) -> &'q str {
        quad.field(self.field).map(|t| t.value()).unwrap_or("")
    }
}

impl TransformCallback for TransformCallbackMap {
    fn initialize(&mut self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&self.file)
            .with_context(|| format!("Failed to create {}", self.file.display()))?;
        writer.write_record(&self.columns)?;
        self.writer = Some(writer);
        Ok(())
    }

    fn run(&mut self, original: &Quad, produced: &[Quad]) -> Result<()> {
        let matched: Vec<&Quad> = produced
            .iter()
            .filter(|q| self.matchers.iter().any(|m| m.matches(q)))
            .collect();
        if matched.is_empty() {
            return Ok(());
        }

        let mut record = Vec::with_capacity(matched.len() + 1);
        record.push(self.field_value(original));
        record.extend(matched.iter().map(|q| self.field_value(q)));

        let Some(writer) = self.writer.as_mut() else {
            bail!("Transform callback for {} used before initialize", self.file.display());
        };
        writer.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("Failed to flush {}", self.file.display()))?;
        }
        Ok(())
    }
}
