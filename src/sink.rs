use crate::config::{NQUADS_MIME, QUERY_EXTENSION, QUERY_MIME};
use crate::models::{Quad, Term};
use crate::path::IriPathResolver;
use crate::render::{QueryRenderer, RenderContext};
use crate::writer::{write_files, FileJob, WriterPool};
use anyhow::{bail, Result};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A pre-rendered file body, written as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Appended to the resolved path.
    pub extension: String,
    pub format: String,
    pub contents: String,
}

/// Where the orchestrator sends everything it produces, addressed by target IRI.
#[async_trait]
pub trait StatementSink: Send {
    fn push(&mut self, target: &str, quad: Quad) -> Result<()>;

    fn push_document(&mut self, target: &str, document: Document) -> Result<()>;

    /// Writes everything pushed since the last flush and waits for it to land.
    /// Outputs stay available. Returns the number of files written.
    async fn flush(&mut self) -> Result<u64>;

    /// Flushes what is left and releases every output. Returns the number of
    /// files written by that last flush.
    async fn close(&mut self) -> Result<u64>;
}

enum Buffered {
    Statements(Vec<Quad>),
    Document(Document),
}

/// Buffers per target until the next flush, then writes one file per target.
/// Targets seen again after a flush are appended to.
///
/// A target whose statements use variable placeholders is rendered as a query
/// (`.rq`); any other statement target is written as N-Quads. Paths come from
/// the IRI path rules.
pub struct FileSink {
    resolver: IriPathResolver,
    renderer: Arc<dyn QueryRenderer>,
    marker: Arc<str>,
    pool: Arc<WriterPool>,
    order: Vec<String>,
    buffers: FxHashMap<String, Buffered>,
    pushed: u64,
    written: u64,
    closed: bool,
}

impl FileSink {
    pub fn new(
        resolver: IriPathResolver,
        renderer: Arc<dyn QueryRenderer>,
        marker: Arc<str>,
        pool: Arc<WriterPool>,
    ) -> Self {
        Self {
            resolver,
            renderer,
            marker,
            pool,
            order: Vec::new(),
            buffers: FxHashMap::default(),
            pushed: 0,
            written: 0,
            closed: false,
        }
    }

    pub fn pool(&self) -> &Arc<WriterPool> {
        &self.pool
    }

    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn pending(&self) -> usize {
        self.order.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("Sink is closed");
        }
        Ok(())
    }

    fn is_query(&self, quads: &[Quad]) -> bool {
        let is_var = |t: &Term| matches!(t, Term::Iri(iri) if iri.starts_with(&*self.marker));
        quads
            .iter()
            .any(|q| is_var(&q.subject) || is_var(&q.predicate) || is_var(&q.object))
    }

    fn job_for(&self, target: &str, buffered: Buffered) -> Result<FileJob> {
        Ok(match buffered {
            Buffered::Statements(quads) if self.is_query(&quads) => FileJob {
                path: self.resolver.resolve_with_extension(target, QUERY_EXTENSION)?,
                format: QUERY_MIME.to_string(),
                contents: self.renderer.render(&quads, &RenderContext::default()),
            },
            Buffered::Statements(quads) => FileJob {
                path: self.resolver.resolve(target)?,
                format: NQUADS_MIME.to_string(),
                contents: quads.iter().map(Quad::to_nquads).collect(),
            },
            Buffered::Document(document) => FileJob {
                path: self.resolver.resolve_with_extension(target, &document.extension)?,
                format: document.format,
                contents: document.contents,
            },
        })
    }

    fn drain_jobs(&mut self) -> Result<Vec<FileJob>> {
        let mut jobs = Vec::with_capacity(self.order.len());
        for target in std::mem::take(&mut self.order) {
            if let Some(buffered) = self.buffers.remove(&target) {
                jobs.push(self.job_for(&target, buffered)?);
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl StatementSink for FileSink {
    fn push(&mut self, target: &str, quad: Quad) -> Result<()> {
        self.ensure_open()?;
        self.pushed += 1;
        match self.buffers.get_mut(target) {
            Some(Buffered::Statements(quads)) => quads.push(quad),
            Some(Buffered::Document(_)) => {
                bail!("{} already holds a document, cannot add statements", target)
            }
            None => {
                self.order.push(target.to_string());
                self.buffers
                    .insert(target.to_string(), Buffered::Statements(vec![quad]));
            }
        }
        Ok(())
    }

    fn push_document(&mut self, target: &str, document: Document) -> Result<()> {
        self.ensure_open()?;
        if self.buffers.contains_key(target) {
            bail!("{} was already written to in this run", target);
        }
        self.order.push(target.to_string());
        self.buffers
            .insert(target.to_string(), Buffered::Document(document));
        Ok(())
    }

    async fn flush(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let jobs = self.drain_jobs()?;
        if jobs.is_empty() {
            return Ok(0);
        }
        let written = write_files(self.pool.clone(), jobs, None).await?;
        self.written += written;
        debug!(files = written, open = self.pool.open_handles(), "Sink flushed");
        Ok(written)
    }

    async fn close(&mut self) -> Result<u64> {
        self.ensure_open()?;
        let flushed = self.flush().await;
        self.closed = true;
        // the pool is released either way
        let closed = self.pool.close_all().await;

        let written = flushed?;
        closed?;
        info!(
            files = self.written,
            statements = self.pushed,
            peak_open = self.pool.peak_open_handles(),
            "Sink closed"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TEXT_MIME;
    use crate::render::ConstructRenderer;
    use std::path::Path;
    use tempfile::TempDir;

    const MARKER: &str = "urn:var:";

    fn sink(dir: &Path) -> FileSink {
        let rules = vec![(
            "^http://pod/".to_string(),
            format!("{}/", dir.display()),
        )];
        FileSink::new(
            IriPathResolver::new(&rules).unwrap(),
            Arc::new(ConstructRenderer::new(Arc::from(MARKER))),
            Arc::from(MARKER),
            Arc::new(WriterPool::new(4).unwrap()),
        )
    }

    #[tokio::test]
    async fn query_targets_become_rq_files() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        sink.push(
            "http://pod/derived/cset0",
            Quad::new(Term::iri("urn:var:s0"), Term::iri("http://p/a"), Term::iri("urn:var:o0")),
        )
        .unwrap();
        assert_eq!(sink.close().await.unwrap(), 1);

        let query = std::fs::read_to_string(dir.path().join("derived/cset0.rq")).unwrap();
        assert!(query.contains("?s0 <http://p/a> ?o0 ."));
    }

    #[tokio::test]
    async fn plain_statements_become_nquads() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        let q = Quad::new(Term::iri("http://pod/"), Term::iri("http://p/a"), Term::blank("d0"));
        sink.push("http://pod/.meta", q.clone()).unwrap();
        sink.push("http://pod/.meta", q.clone()).unwrap();
        sink.close().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join(".meta")).unwrap();
        assert_eq!(written, format!("{}{}", q.to_nquads(), q.to_nquads()));
    }

    #[tokio::test]
    async fn documents_written_verbatim() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        sink.push_document(
            "http://pod/derived/qpf0",
            Document {
                extension: ".txt".to_string(),
                format: TEXT_MIME.to_string(),
                contents: "qpf".to_string(),
            },
        )
        .unwrap();
        sink.close().await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("derived/qpf0.txt")).unwrap(),
            "qpf"
        );
    }

    #[tokio::test]
    async fn closed_sink_rejects_everything() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        sink.close().await.unwrap();
        assert!(sink.close().await.is_err());
        let q = Quad::new(Term::iri("http://pod/s"), Term::iri("http://p/a"), Term::literal("x"));
        assert!(sink.push("http://pod/x", q).is_err());
        assert!(sink.pool().is_closed());
    }

    #[tokio::test]
    async fn unmapped_target_fails_close() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        let q = Quad::new(Term::iri("http://else/s"), Term::iri("http://p/a"), Term::literal("x"));
        sink.push("http://else/.meta", q).unwrap();
        let err = sink.close().await.unwrap_err();
        assert!(err.to_string().contains("No IRI mapping found"));
    }

    #[tokio::test]
    async fn flush_writes_before_close() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        let q = Quad::new(Term::iri("http://pod/a"), Term::iri("http://p/a"), Term::literal("x"));
        sink.push("http://pod/a/.meta", q.clone()).unwrap();
        sink.push("http://pod/b/.meta", q.clone()).unwrap();
        assert_eq!(sink.pending(), 2);

        assert_eq!(sink.flush().await.unwrap(), 2);
        assert_eq!(sink.pending(), 0);
        assert!(dir.path().join("a/.meta").exists());
        assert!(dir.path().join("b/.meta").exists());
        assert!(!sink.pool().is_closed());
        assert_eq!(sink.pool().open_handles(), 0);

        assert_eq!(sink.flush().await.unwrap(), 0);
        sink.push("http://pod/a/.meta", q.clone()).unwrap();
        assert_eq!(sink.close().await.unwrap(), 1);
        assert_eq!(sink.written(), 3);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/.meta")).unwrap(),
            format!("{}{}", q.to_nquads(), q.to_nquads())
        );
    }

    #[tokio::test]
    async fn failed_flush_keeps_earlier_files() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        let q = Quad::new(Term::iri("http://pod/s"), Term::iri("http://p/a"), Term::literal("x"));
        sink.push("http://pod/.meta", q.clone()).unwrap();
        sink.flush().await.unwrap();

        sink.push("http://else/.meta", q).unwrap();
        assert!(sink.flush().await.is_err());
        assert!(dir.path().join(".meta").exists());
    }

    #[tokio::test]
    async fn unmapped_target_still_releases_pool() {
        let dir = TempDir::new().unwrap();
        let mut sink = sink(dir.path());
        let q = Quad::new(Term::iri("http://else/s"), Term::iri("http://p/a"), Term::literal("x"));
        sink.push("http://else/.meta", q).unwrap();
        assert!(sink.close().await.is_err());
        assert!(sink.pool().is_closed());
    }
}
