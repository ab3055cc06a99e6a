use crate::matcher::MatcherConfig;
use crate::metadata::MetadataConfig;
use crate::summary::Authoritativeness;
use crate::transform::{CallbackMapConfig, RewriteConfig};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

/// Maximum number of simultaneously open output files
pub const DEFAULT_WRITER_STREAMS: usize = 128;

/// Placeholder replaced by the resource index in filename templates
pub const COUNT_TOKEN: &str = ":COUNT:";

/// Progress update interval (tick every N statements)
pub const PROGRESS_INTERVAL: u64 = 1000;

pub const DEFAULT_VARIABLE_MARKER: &str = "urn:var:";
pub const DEFAULT_STRATEGY: &str = "minSize";
pub const DEFAULT_MAX_RESOURCES: usize = 10;

/// Extension of every rendered query file
pub const QUERY_EXTENSION: &str = ".rq";
/// Extension of the marker file written in QPF mode
pub const QPF_EXTENSION: &str = ".txt";
pub const QPF_MARKER: &str = "qpf";

pub const QUERY_MIME: &str = "application/sparql-query";
pub const NQUADS_MIME: &str = "application/n-quads";
pub const TEXT_MIME: &str = "text/plain";

/// Which kind of derived resource is produced for every dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    /// One CONSTRUCT query per selected characteristic set.
    Cset,
    /// One `VALUES ?p { ... }` query per selected characteristic set.
    CsetValues,
    /// One query per distinct `rdf:type` value.
    StarTypes,
    /// A ladder of star queries with 1..max_size_stars-1 predicate placeholders.
    PredicateTemplate,
    /// A single QPF marker file.
    Qpf,
}

/// Run configuration, usually loaded from a JSON file.
///
/// Map-valued options (`iriToPath`) keep their file order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FragmenterConfig {
    pub mode: OutputMode,
    /// Regexes whose captures name the dataset(s) a subject belongs to.
    pub dataset_patterns: Vec<String>,
    /// Subjects matching any of these are never summarized.
    #[serde(default)]
    pub exclusion_patterns: Vec<String>,
    /// Regex to path template; the longest match wins.
    pub iri_to_path: serde_json::Map<String, serde_json::Value>,
    /// Filename of each derived resource relative to its dataset; must contain `:COUNT:`.
    pub filter_filename: String,
    #[serde(default = "default_variable_marker")]
    pub variable_replacement_indicator: String,
    #[serde(default = "default_strategy")]
    pub derived_resource_construction_strategy: String,
    #[serde(default = "default_max_resources")]
    pub max_resources: usize,
    #[serde(default = "default_true")]
    pub skip_single_predicate_sets: bool,
    #[serde(default)]
    pub max_size_stars: Option<usize>,
    #[serde(default)]
    pub filter: Option<MatcherConfig>,
    #[serde(default)]
    pub type_predicate_matcher: Option<MatcherConfig>,
    #[serde(default)]
    pub authoritativeness_strategy: Option<Authoritativeness>,
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub direct_metadata_link_predicate: Option<String>,
    #[serde(default)]
    pub profile_predicate_regex: Option<String>,
    #[serde(default)]
    pub pod_base_uri_extraction_regex: Option<String>,
    #[serde(default = "default_writer_streams")]
    pub max_open_writers: usize,
    #[serde(default)]
    pub transformers: Vec<RewriteConfig>,
    #[serde(default)]
    pub transform_callbacks: Vec<CallbackMapConfig>,
}

fn default_variable_marker() -> String {
    DEFAULT_VARIABLE_MARKER.to_string()
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}

fn default_max_resources() -> usize {
    DEFAULT_MAX_RESOURCES
}

fn default_writer_streams() -> usize {
    DEFAULT_WRITER_STREAMS
}

fn default_true() -> bool {
    true
}

impl FragmenterConfig {
    pub fn from_path(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_json_str(&raw).with_context(|| format!("Invalid config file: {}", path))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Construction-time checks. The selection strategy is deliberately not
    /// checked here; an unknown name fails when the first summary is selected.
    pub fn validate(&self) -> Result<()> {
        require_count_token("filterFilename", &self.filter_filename)?;

        check_all_or_none(
            &[
                ("directMetadataLinkPredicate", self.direct_metadata_link_predicate.is_some()),
                ("profilePredicateRegex", self.profile_predicate_regex.is_some()),
                ("podBaseUriExtractionRegex", self.pod_base_uri_extraction_regex.is_some()),
            ],
            "Configuration",
        )?;

        if self.dataset_patterns.is_empty() {
            bail!("Configuration error: datasetPatterns must not be empty");
        }
        if self.iri_to_path.is_empty() {
            bail!("Configuration error: iriToPath must not be empty");
        }
        if self.max_open_writers == 0 {
            bail!("Configuration error: maxOpenWriters must be at least 1");
        }

        match self.mode {
            OutputMode::StarTypes if self.type_predicate_matcher.is_none() => {
                bail!("Configuration error: mode starTypes requires typePredicateMatcher");
            }
            OutputMode::PredicateTemplate if self.max_size_stars.unwrap_or(0) < 2 => {
                bail!("Configuration error: mode predicateTemplate requires maxSizeStars >= 2");
            }
            _ => {}
        }

        self.metadata.validate()?;
        Ok(())
    }

    /// The `iriToPath` rules in file order.
    pub fn path_rules(&self) -> Result<Vec<(String, String)>> {
        self.iri_to_path
            .iter()
            .map(|(pattern, replacement)| match replacement.as_str() {
                Some(r) => Ok((pattern.clone(), r.to_string())),
                None => bail!("iriToPath value for {} must be a string", pattern),
            })
            .collect()
    }
}

pub fn require_count_token(option: &str, template: &str) -> Result<()> {
    if !template.contains(COUNT_TOKEN) {
        bail!(
            "Configuration error: {} does not contain {}, got {}",
            option,
            COUNT_TOKEN,
            template
        );
    }
    Ok(())
}

/// Replaces every `:COUNT:` in `template` with `count`.
pub fn fill_count(template: &str, count: usize) -> String {
    let mut buf = itoa::Buffer::new();
    template.replace(COUNT_TOKEN, buf.format(count))
}

/// Options that only make sense together must be all set or all unset.
pub fn check_all_or_none(values: &[(&str, bool)], context: &str) -> Result<()> {
    let defined: Vec<&str> = values.iter().filter(|(_, d)| *d).map(|(k, _)| *k).collect();
    let missing: Vec<&str> = values.iter().filter(|(_, d)| !*d).map(|(k, _)| *k).collect();

    if !defined.is_empty() && !missing.is_empty() {
        let all: Vec<&str> = values.iter().map(|(k, _)| *k).collect();
        bail!(
            "{} error: either all of [{}] must be defined or all must be undefined. \
             Defined: {}; Missing: {}.",
            context,
            all.join(", "),
            defined.join(", "),
            missing.join(", ")
        );
    }
    Ok(())
}
