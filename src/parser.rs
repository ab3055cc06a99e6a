use crate::models::Quad;
use anyhow::{Context, Result};
use bzip2::read::MultiBzDecoder;
use oxttl::nquads::ReaderNQuadsParser;
use oxttl::{NQuadsParser, TurtleParseError};
use std::fs::File;
use std::io::{BufReader, Read};

/// Pull-based statement source over N-Triples or N-Quads text.
///
/// Yields one `Result<Quad>` per statement; comments and blank lines are
/// skipped. Files ending in `.bz2` are decompressed on the fly. The sequence is
/// finite and cannot be restarted.
pub struct StatementReader {
    inner: ReaderNQuadsParser<BufReader<Box<dyn Read + Send>>>,
}

impl StatementReader {
    pub fn open(path: &str) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open input file: {}", path))?;
        let inner: Box<dyn Read + Send> = if path.ends_with(".bz2") {
            Box::new(MultiBzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self::from_boxed(inner))
    }

    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::from_boxed(Box::new(reader))
    }

    fn from_boxed(inner: Box<dyn Read + Send>) -> Self {
        Self {
            inner: NQuadsParser::new().for_reader(BufReader::with_capacity(128 * 1024, inner)),
        }
    }
}

impl Iterator for StatementReader {
    type Item = Result<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.map_err(describe_error).and_then(Quad::try_from))
    }
}

/// Parses a single N-Quads line. Returns `Ok(None)` for blank and comment lines.
pub fn parse_line(line: &str) -> Result<Option<Quad>> {
    match NQuadsParser::new().for_slice(line.as_bytes()).next() {
        Some(item) => Ok(Some(Quad::try_from(item.map_err(describe_syntax)?)?)),
        None => Ok(None),
    }
}

fn describe_error(error: TurtleParseError) -> anyhow::Error {
    match error {
        TurtleParseError::Syntax(e) => describe_syntax(e),
        TurtleParseError::Io(e) => anyhow::Error::new(e).context("Failed to read input"),
    }
}

fn describe_syntax(error: oxttl::TurtleSyntaxError) -> anyhow::Error {
    let line = error.location().start.line + 1;
    anyhow::Error::new(error).context(format!("Invalid statement on line {}", line))
}
