//! Podshape: structural summaries of many RDF datasets as derived-resource query templates
//!
//! This crate streams a large N-Triples / N-Quads dump that mixes many independent
//! datasets (for example one per Solid pod) and writes, for every dataset, a small
//! bounded set of parameterized queries describing the shape of its data, together
//! with `.meta` statements announcing them:
//!
//! 1. **Streaming Pass** -- Every statement goes through an optional rewrite chain and
//!    is routed by subject to the dataset(s) whose patterns capture it. Statements with a
//!    blank-node subject are held back.
//! 2. **Resolving Pass** -- Held-back statements are attributed to every dataset that
//!    references their blank node, walking blank-node chains once per dataset.
//! 3. **Flushing Pass** -- Each summary selects its characteristic sets (or types) under
//!    the configured strategy and is pushed to the sink as query patterns and metadata.
//!    The sink maps target IRIs to paths and writes that dataset's files through a pool
//!    that never holds more than a fixed number of files open, before the next summary
//!    is serialized.
//!
//! # Key Modules
//!
//! - [`fragment`] -- Orchestration and the run state machine
//! - [`router`] -- Subject to dataset routing with exclusions
//! - [`summary`] -- Per-dataset accumulators (predicate sets, type stars, stubs)
//! - [`selector`] -- Characteristic-set grouping, ranking and rendering to patterns
//! - [`blank`] -- Blank-node renaming and cross-dataset attribution
//! - [`path`] -- IRI to file path mapping
//! - [`writer`] -- Bounded concurrent file writer pool
//! - [`sink`] -- Buffering statement sink that renders queries and N-Quads
//! - [`render`] -- Query text for each output mode
//! - [`metadata`] -- `.meta` statement generators
//! - [`owner`] -- Owner identity tracking for direct metadata links
//! - [`transform`] -- Statement rewriting and transform callbacks
//! - [`matcher`] -- Per-field regex statement matchers
//! - [`parser`] -- N-Triples / N-Quads statement reader with BZ2 decompression
//! - [`models`] -- Terms, statements and summary output
//! - [`stats`] -- Thread-safe atomic counters for run metrics
//! - [`config`] -- Constants and the JSON run configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Summarize every pod in a dump into CONSTRUCT queries
//! podshape fragment -i pods.nq.bz2 -c cset.json
//!
//! # Check a configuration without reading any data
//! podshape check-config -c cset.json
//! ```

pub mod blank;
pub mod config;
pub mod fragment;
pub mod matcher;
pub mod metadata;
pub mod models;
pub mod owner;
pub mod parser;
pub mod path;
pub mod render;
pub mod router;
pub mod selector;
pub mod sink;
pub mod stats;
pub mod summary;
pub mod transform;
pub mod writer;
