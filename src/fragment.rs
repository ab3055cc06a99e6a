use crate::blank::{BlankNodeResolver, ResolveReport};
use crate::config::{
    fill_count, FragmenterConfig, OutputMode, PROGRESS_INTERVAL, QPF_EXTENSION, QPF_MARKER,
    QUERY_EXTENSION, QUERY_MIME, TEXT_MIME,
};
use crate::matcher::QuadMatcher;
use crate::metadata::{MetadataGenerator, MetadataInput};
use crate::models::{Quad, SummaryOutput, Term};
use crate::owner::OwnerLinks;
use crate::path::IriPathResolver;
use crate::render::{
    ConstructRenderer, PredicateLadderRenderer, QueryRenderer, RenderContext, StarRenderer,
    ValuesRenderer,
};
use crate::router::PatternRouter;
use crate::sink::{Document, FileSink, StatementSink};
use crate::stats::FragmentStats;
use crate::summary::{DatasetSummary, SummaryOptions};
use crate::transform::{
    apply_chain, IriRewriteTransformer, StatementTransformer, TransformCallback,
    TransformCallbackMap,
};
use crate::writer::WriterPool;
use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a run. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    Resolving,
    Flushing,
    Closed,
    Failed,
}

enum SummaryFactory {
    PredicateSet,
    TypeStar(Arc<QuadMatcher>),
    Stub,
}

/// Streams statements into per-dataset summaries and flushes them as derived
/// resources plus `.meta` descriptions.
pub struct Fragmenter {
    mode: OutputMode,
    router: PatternRouter,
    owners: Option<OwnerLinks>,
    factory: SummaryFactory,
    summary_options: SummaryOptions,
    summaries: BTreeMap<String, DatasetSummary>,
    blank_nodes: BlankNodeResolver,
    transformers: Vec<Box<dyn StatementTransformer>>,
    callbacks: Vec<Box<dyn TransformCallback>>,
    metadata: Box<dyn MetadataGenerator>,
    sink: Box<dyn StatementSink>,
    filter_filename: String,
    max_size_stars: usize,
    stats: Arc<FragmentStats>,
    state: PipelineState,
}

impl Fragmenter {
    /// Builds a fragmenter writing files through the IRI path rules.
    pub fn new(config: &FragmenterConfig) -> Result<Self> {
        config.validate()?;
        let marker: Arc<str> = Arc::from(config.variable_replacement_indicator.as_str());
        let renderer: Arc<dyn QueryRenderer> = match config.mode {
            OutputMode::CsetValues => Arc::new(ValuesRenderer),
            OutputMode::StarTypes => Arc::new(StarRenderer::new(marker.clone())),
            _ => Arc::new(ConstructRenderer::new(marker.clone())),
        };
        let sink = FileSink::new(
            IriPathResolver::new(&config.path_rules()?)?,
            renderer,
            marker,
            Arc::new(WriterPool::new(config.max_open_writers)?),
        );
        Self::with_sink(config, Box::new(sink))
    }

    pub fn with_sink(config: &FragmenterConfig, sink: Box<dyn StatementSink>) -> Result<Self> {
        config.validate()?;

        let filter = config
            .filter
            .as_ref()
            .map(QuadMatcher::from_config)
            .transpose()
            .context("Invalid filter")?
            .map(Arc::new);
        let summary_options = SummaryOptions {
            filter,
            authoritativeness: config.authoritativeness_strategy,
            variable_marker: Arc::from(config.variable_replacement_indicator.as_str()),
            strategy: Arc::from(config.derived_resource_construction_strategy.as_str()),
            max_resources: config.max_resources,
            skip_single_predicate_sets: config.skip_single_predicate_sets,
        };

        let factory = match config.mode {
            OutputMode::Cset | OutputMode::CsetValues => SummaryFactory::PredicateSet,
            OutputMode::StarTypes => {
                let matcher = config
                    .type_predicate_matcher
                    .as_ref()
                    .ok_or_else(|| anyhow!("mode starTypes requires typePredicateMatcher"))?;
                SummaryFactory::TypeStar(Arc::new(
                    QuadMatcher::from_config(matcher).context("Invalid typePredicateMatcher")?,
                ))
            }
            OutputMode::PredicateTemplate | OutputMode::Qpf => SummaryFactory::Stub,
        };

        let owners = match (
            &config.direct_metadata_link_predicate,
            &config.profile_predicate_regex,
            &config.pod_base_uri_extraction_regex,
        ) {
            (Some(link), Some(profile), Some(extraction)) => {
                Some(OwnerLinks::new(link, profile, extraction)?)
            }
            _ => None,
        };

        let transformers = config
            .transformers
            .iter()
            .map(|t| {
                IriRewriteTransformer::from_config(t)
                    .map(|t| Box::new(t) as Box<dyn StatementTransformer>)
            })
            .collect::<Result<Vec<_>>>()?;
        let callbacks = config
            .transform_callbacks
            .iter()
            .map(|c| {
                TransformCallbackMap::from_config(c)
                    .map(|c| Box::new(c) as Box<dyn TransformCallback>)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            mode: config.mode,
            router: PatternRouter::new(&config.dataset_patterns, &config.exclusion_patterns)?,
            owners,
            factory,
            summary_options,
            summaries: BTreeMap::new(),
            blank_nodes: BlankNodeResolver::new(),
            transformers,
            callbacks,
            metadata: config.metadata.build()?,
            sink,
            filter_filename: config.filter_filename.clone(),
            max_size_stars: config.max_size_stars.unwrap_or(0),
            stats: Arc::new(FragmentStats::new()),
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> Arc<FragmentStats> {
        self.stats.clone()
    }

    /// Datasets that currently hold a summary.
    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.summaries.keys().map(String::as_str)
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = PipelineState::Failed;
        }
        result
    }

    fn begin(&mut self) -> Result<()> {
        for callback in &mut self.callbacks {
            callback.initialize()?;
        }
        self.state = PipelineState::Streaming;
        debug!(mode = ?self.mode, "Streaming started");
        Ok(())
    }

    /// Routes one statement. Statements are handled strictly in arrival order.
    pub fn ingest(&mut self, quad: Quad) -> Result<()> {
        match self.state {
            PipelineState::Idle => {
                let started = self.begin();
                self.fail(started)?;
            }
            PipelineState::Streaming => {}
            other => bail!("Cannot ingest statements while {:?}", other),
        }
        let result = self.ingest_inner(quad);
        self.fail(result)
    }

    fn ingest_inner(&mut self, quad: Quad) -> Result<()> {
        self.stats.inc_read();

        let produced = if self.transformers.is_empty() && self.callbacks.is_empty() {
            vec![quad]
        } else {
            let produced = apply_chain(&self.transformers, quad.clone());
            for callback in &mut self.callbacks {
                callback.run(&quad, &produced)?;
            }
            produced
        };

        for quad in produced {
            self.route(quad)?;
        }
        Ok(())
    }

    fn route(&mut self, quad: Quad) -> Result<()> {
        if let Some(owners) = &mut self.owners {
            owners.observe(&quad);
        }

        if quad.subject.is_blank() {
            self.blank_nodes.defer(quad)?;
            self.stats.inc_deferred();
            return Ok(());
        }

        let subject = quad.subject.value();
        let datasets = self.router.classify(subject);
        if datasets.is_empty() {
            if self.router.is_excluded(subject) {
                self.stats.inc_excluded();
            } else {
                self.stats.inc_unrouted();
            }
            return Ok(());
        }
        self.stats.inc_routed();

        for dataset in &datasets {
            if let Some(label) = quad.object.blank_label() {
                self.blank_nodes.note_reference(label, dataset);
            }
            if !self.summaries.contains_key(dataset) {
                let summary = self.new_summary(dataset);
                self.summaries.insert(dataset.clone(), summary);
            }
            if let Some(summary) = self.summaries.get_mut(dataset) {
                summary.register(&quad)?;
            }
        }
        Ok(())
    }

    fn new_summary(&self, dataset: &str) -> DatasetSummary {
        debug!(dataset, "New dataset summary");
        match &self.factory {
            SummaryFactory::PredicateSet => {
                DatasetSummary::predicate_set(dataset, self.summary_options.clone())
            }
            SummaryFactory::TypeStar(matcher) => {
                DatasetSummary::type_star(dataset, self.summary_options.clone(), matcher.clone())
            }
            SummaryFactory::Stub => DatasetSummary::stub(dataset),
        }
    }

    /// Attributes deferred blank-node statements and finalizes every summary.
    /// Runs once, after the last statement.
    pub fn resolve(&mut self) -> Result<ResolveReport> {
        match self.state {
            PipelineState::Idle => {
                let started = self.begin();
                self.fail(started)?;
            }
            PipelineState::Streaming => {}
            other => bail!("Cannot resolve blank nodes while {:?}", other),
        }
        self.state = PipelineState::Resolving;

        let result = self.blank_nodes.resolve(&mut self.summaries);
        let report = self.fail(result)?;
        self.stats.add_attributed(report.attributed);
        self.stats.add_dropped(report.dropped);
        if report.dropped > 0 {
            warn!(
                dropped = report.dropped,
                "Blank node statements not referenced by any dataset were dropped"
            );
        }
        info!(
            datasets = self.summaries.len(),
            attributed = report.attributed,
            "Blank nodes resolved"
        );
        Ok(report)
    }

    /// Serializes every summary in dataset order. Each dataset's files are
    /// written and awaited before the next summary is serialized, so memory
    /// holds at most one dataset's output.
    pub async fn flush(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Idle | PipelineState::Streaming => {
                self.resolve()?;
            }
            PipelineState::Resolving => {}
            other => bail!("Cannot flush while {:?}", other),
        }
        self.state = PipelineState::Flushing;

        let result = self.flush_summaries().await;
        self.fail(result)
    }

    async fn flush_summaries(&mut self) -> Result<()> {
        let pb = make_progress_bar(self.summaries.len() as u64, "Datasets");
        let datasets: Vec<String> = self.summaries.keys().cloned().collect();
        for dataset in datasets {
            let Some(summary) = self.summaries.remove(&dataset) else {
                continue;
            };
            let output = summary
                .serialize()
                .with_context(|| format!("Failed to summarize {}", dataset))?;
            drop(summary);

            let n_resources = self.emit_resources(&output)?;
            let meta_target = format!("{}{}", dataset, self.metadata.meta_file_name());
            self.emit_metadata(&dataset, n_resources, &meta_target)?;
            self.emit_owner_links(&dataset, &meta_target)?;

            let written = match self.sink.flush().await {
                Ok(written) => written,
                Err(e) => {
                    pb.abandon();
                    return Err(e.context(format!("Failed to write files for {}", dataset)));
                }
            };
            self.stats.add_files(written);
            self.stats.inc_flushed();
            pb.inc(1);
            debug!(dataset = %dataset, resources = n_resources, files = written, "Dataset flushed");
        }
        pb.finish_and_clear();
        info!(datasets = self.stats.flushed(), "Summaries flushed");
        Ok(())
    }

    /// Pushes the derived resources of one dataset; returns how many the
    /// metadata has to describe.
    fn emit_resources(&mut self, output: &SummaryOutput) -> Result<usize> {
        let dataset = &output.dataset;
        match self.mode {
            OutputMode::Cset | OutputMode::CsetValues | OutputMode::StarTypes => {
                for (i, group) in output.groups().enumerate() {
                    let target = format!("{}{}", dataset, fill_count(&self.filter_filename, i));
                    for quad in group {
                        self.sink.push(&target, quad.clone())?;
                    }
                }
                Ok(output.grouped.len())
            }
            OutputMode::PredicateTemplate => {
                for i in 1..self.max_size_stars {
                    let target = format!("{}{}", dataset, fill_count(&self.filter_filename, i));
                    let query = PredicateLadderRenderer.render(
                        &output.patterns,
                        &RenderContext {
                            n_predicates: Some(i),
                        },
                    );
                    self.sink.push_document(
                        &target,
                        Document {
                            extension: QUERY_EXTENSION.to_string(),
                            format: QUERY_MIME.to_string(),
                            contents: query,
                        },
                    )?;
                }
                Ok(self.max_size_stars.saturating_sub(1))
            }
            OutputMode::Qpf => {
                let target = format!("{}{}", dataset, fill_count(&self.filter_filename, 0));
                self.sink.push_document(
                    &target,
                    Document {
                        extension: QPF_EXTENSION.to_string(),
                        format: TEXT_MIME.to_string(),
                        contents: QPF_MARKER.to_string(),
                    },
                )?;
                Ok(output.grouped.len())
            }
        }
    }

    fn emit_metadata(&mut self, dataset: &str, n_resources: usize, meta_target: &str) -> Result<()> {
        let selectors = [format!("{}*", dataset)];
        let quads = self.metadata.generate_metadata(&MetadataInput {
            pod_uri: dataset,
            selector_patterns: &selectors,
            filter_filename_template: &self.filter_filename,
            n_resources,
        });
        for quad in quads {
            self.sink.push(meta_target, quad)?;
        }
        Ok(())
    }

    fn emit_owner_links(&mut self, dataset: &str, meta_target: &str) -> Result<()> {
        let Some(owners) = &self.owners else {
            return Ok(());
        };
        let link = Term::iri(owners.link_predicate());
        for owner in owners.owners_of(dataset)? {
            let quad = Quad::new(Term::iri(&owner), link.clone(), Term::iri(meta_target));
            self.sink.push(&owner, quad)?;
        }
        Ok(())
    }

    /// Releases the sink and ends the run. Returns the number of files
    /// written over the whole run.
    pub async fn close(&mut self) -> Result<u64> {
        match self.state {
            PipelineState::Flushing => {}
            PipelineState::Closed => bail!("Fragmenter is already closed"),
            other => bail!("Cannot close while {:?}", other),
        }

        let result = self.sink.close().await;
        let written = self.fail(result)?;
        for callback in &mut self.callbacks {
            let ended = callback.end();
            if let Err(e) = ended {
                self.state = PipelineState::Failed;
                return Err(e);
            }
        }
        self.stats.add_files(written);
        self.state = PipelineState::Closed;
        info!(files = self.stats.files(), "Fragmentation finished");
        Ok(self.stats.files())
    }

    /// Runs the whole pipeline over `source`. A source error aborts the run
    /// before anything is flushed.
    pub async fn fragment<I>(&mut self, source: I) -> Result<u64>
    where
        I: IntoIterator<Item = Result<Quad>>,
    {
        let spinner = make_spinner("Streaming statements");
        for item in source {
            let quad = match item {
                Ok(quad) => quad,
                Err(e) => {
                    self.state = PipelineState::Failed;
                    spinner.abandon_with_message("Statement source failed");
                    return Err(e.context("Statement source failed"));
                }
            };
            if let Err(e) = self.ingest(quad) {
                spinner.abandon();
                return Err(e);
            }
            let read = self.stats.read();
            if read % PROGRESS_INTERVAL == 0 {
                spinner.set_message(format!("Streaming statements: {read} read"));
            }
        }
        spinner.finish_and_clear();
        info!(
            read = self.stats.read(),
            routed = self.stats.routed(),
            datasets = self.summaries.len(),
            "Streaming complete"
        );

        self.resolve()?;
        self.flush().await?;
        self.close().await
    }
}

fn make_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(msg.to_string());
    pb
}

fn make_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "    {{spinner:.cyan}} {label:<10} [{{bar:30.cyan/blue}}] {{pos}}/{{len}}"
            ))
            .unwrap()
            .progress_chars("=> "),
    );
    pb
}
