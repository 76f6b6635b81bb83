use std::io::{self, Read, Write};

use crate::{Hasher, Result, VerificationError};

/// Streaming reader that hashes and counts data as it passes through.
pub struct VerifiedReader<R, H> {
    reader: R,
    hasher: H,
    bytes:  u64,
}

impl<R, H> VerifiedReader<R, H> {
    pub fn new(reader: R, hasher: H) -> Self {
        Self {
            reader,
            hasher,
            bytes: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes(&self) -> u64 { self.bytes }
}

impl<R: Read, H: Hasher> Read for VerifiedReader<R, H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        if n > 0 {
            self.hasher.update(&buf[..n]);
            self.bytes += n as u64;
        }
        Ok(n)
    }
}

impl<R: Read, H: Hasher> VerifiedReader<R, H> {
    /// Finalize against an expected hex checksum and size.
    pub fn finish(self, expected_hex: &str, expected_size: u64) -> Result<()> {
        let expected = hex::decode(expected_hex.trim()).map_err(|_| VerificationError::Malformed(expected_hex.to_owned()))?;
        if self.bytes != expected_size {
            return Err(VerificationError::SizeMismatch {
                expected: expected_size,
                actual:   self.bytes,
            });
        }
        let actual = self.hasher.finalize();
        if actual == expected {
            Ok(())
        } else {
            Err(VerificationError::Mismatch {
                expected: expected_hex.to_owned(),
                actual:   hex::encode(actual),
            })
        }
    }

    /// Consume the reader, returning the digest and byte count.
    pub fn into_digest(self) -> (Vec<u8>, u64) { (self.hasher.finalize(), self.bytes) }
}

/// Writer that hashes and counts everything written through it.
pub struct HashingWriter<W, H> {
    writer: W,
    hasher: H,
    bytes:  u64,
}

impl<W: Write, H: Hasher> HashingWriter<W, H> {
    pub fn new(writer: W, hasher: H) -> Self {
        Self {
            writer,
            hasher,
            bytes: 0,
        }
    }

    pub fn bytes(&self) -> u64 { self.bytes }

    pub fn get_mut(&mut self) -> &mut W { &mut self.writer }

    /// Return the inner writer, the hex digest and the byte count.
    pub fn finish(self) -> (W, String, u64) { (self.writer, hex::encode(self.hasher.finalize()), self.bytes) }
}

impl<W: Write, H: Hasher> Write for HashingWriter<W, H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> { self.writer.flush() }
}
