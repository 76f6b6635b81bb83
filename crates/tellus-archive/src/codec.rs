//! Compression codecs and the sinks and sources an archive body streams
//! through.

use std::collections::VecDeque;
use std::io::{self, BufReader, Read, Write};

use flate2::Compression;
use tellus_fs::{Sandbox, StagedFile};
use tracing::debug;

use crate::Result;
use crate::data::Codec;

impl Codec {
    pub fn encoder<W: Write>(self, writer: W, level: u32) -> io::Result<Encoder<W>> {
        match self {
            Self::Gzip => Ok(Encoder::Gzip(flate2::write::GzEncoder::new(writer, Compression::new(level)))),
            Self::Zstd => {
                let level = i32::try_from(level).map_err(io::Error::other)?;
                Ok(Encoder::Zstd(zstd::stream::write::Encoder::new(writer, level)?))
            }
        }
    }

    pub fn decoder<R: Read>(self, reader: R) -> io::Result<Decoder<R>> {
        match self {
            Self::Gzip => Ok(Decoder::Gzip(Box::new(flate2::read::GzDecoder::new(reader)))),
            Self::Zstd => Ok(Decoder::Zstd(Box::new(zstd::stream::read::Decoder::new(reader)?))),
        }
    }
}

pub enum Encoder<W: Write> {
    Gzip(flate2::write::GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    /// Write the trailer and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Gzip(e) => e.finish(),
            Self::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Gzip(e) => e.write(buf),
            Self::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Gzip(e) => e.flush(),
            Self::Zstd(e) => e.flush(),
        }
    }
}

pub enum Decoder<R: Read> {
    Gzip(Box<flate2::read::GzDecoder<R>>),
    Zstd(Box<zstd::stream::read::Decoder<'static, BufReader<R>>>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Gzip(d) => d.read(buf),
            Self::Zstd(d) => d.read(buf),
        }
    }
}

/// Name of part `index` of a split body.
pub fn part_name(stem: &str, index: usize) -> String { format!("{stem}.{index:03}") }

/// Staged sink cutting a stream into numbered parts of at most
/// `part_size` bytes. Nothing is visible until `publish`.
pub struct SplitWriter {
    sandbox:   Sandbox,
    stem:      String,
    part_size: u64,
    parts:     Vec<StagedFile>,
}

impl SplitWriter {
    pub fn new(sandbox: &Sandbox, stem: impl Into<String>, part_size: u64) -> Self {
        Self {
            sandbox: sandbox.clone(),
            stem: stem.into(),
            part_size: part_size.max(1),
            parts: Vec::new(),
        }
    }

    fn next_part(&mut self) -> Result<()> {
        let name = part_name(&self.stem, self.parts.len());
        self.parts.push(StagedFile::new(&self.sandbox, name)?);
        Ok(())
    }

    /// Publish every part in order; returns the part count.
    pub fn publish(mut self) -> Result<u32> {
        if self.parts.is_empty() {
            self.next_part()?;
        }
        let count = self.parts.len();
        let mut published = Vec::with_capacity(count);
        for part in std::mem::take(&mut self.parts) {
            let target = part.target().to_owned();
            if let Err(err) = part.publish() {
                for name in published {
                    if let Err(cleanup) = self.sandbox.delete(&name) {
                        debug!(part = %name, error = %cleanup, "failed to remove published part");
                    }
                }
                return Err(err.into());
            }
            published.push(target);
        }
        Ok(count as u32)
    }
}

impl Write for SplitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let full = self.parts.last().is_none_or(|p| p.written() >= self.part_size);
        if full {
            self.next_part().map_err(io::Error::other)?;
        }
        let Some(part) = self.parts.last_mut() else {
            return Err(io::Error::other("split writer has no open part"));
        };
        let room = (self.part_size - part.written()).min(buf.len() as u64) as usize;
        part.write(&buf[..room])
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.parts.last_mut() {
            Some(part) => part.flush(),
            None => Ok(()),
        }
    }
}

/// Where a compressed body goes: one staged file or staged parts.
pub enum BodySink {
    Single(StagedFile),
    Split(SplitWriter),
}

impl BodySink {
    /// Make the body visible; returns the part count.
    pub fn publish(self) -> Result<u32> {
        match self {
            Self::Single(file) => {
                file.publish()?;
                Ok(1)
            }
            Self::Split(parts) => parts.publish(),
        }
    }
}

impl Write for BodySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Single(w) => w.write(buf),
            Self::Split(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Single(w) => w.flush(),
            Self::Split(w) => w.flush(),
        }
    }
}

/// Reads a sequence of stored files back to back as one stream.
pub struct ChainedParts {
    sandbox: Sandbox,
    pending: VecDeque<String>,
    current: Option<Box<dyn Read + Send>>,
}

impl ChainedParts {
    pub fn new(sandbox: &Sandbox, names: impl IntoIterator<Item = String>) -> Self {
        Self {
            sandbox: sandbox.clone(),
            pending: names.into_iter().collect(),
            current: None,
        }
    }
}

impl Read for ChainedParts {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.current.is_none() {
                let Some(name) = self.pending.pop_front() else {
                    return Ok(0);
                };
                self.current = Some(self.sandbox.read(&name).map_err(io::Error::other)?);
            }
            if let Some(reader) = self.current.as_mut() {
                let n = reader.read(buf)?;
                if n > 0 || buf.is_empty() {
                    return Ok(n);
                }
                self.current = None;
            }
        }
    }
}
