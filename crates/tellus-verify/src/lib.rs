//! Content verification for archived files.
//!
//! Hashing happens while bytes stream through, so a file is read once for
//! both copying and checksumming. Checksums are stored as lowercase hex.
//!
//! ```
//! use std::io::Read;
//! use tellus_verify::{Sha256Hasher, VerifiedReader, sha256_hex};
//!
//! let data = b"hello world";
//! let expected = sha256_hex(data);
//!
//! let mut reader = VerifiedReader::new(&data[..], Sha256Hasher::new());
//! let mut buffer = Vec::new();
//! reader.read_to_end(&mut buffer).unwrap();
//!
//! reader.finish(&expected, data.len() as u64).unwrap();
//! ```

pub use self::error::{Result, VerificationError};
pub use self::hasher::{Hasher, Sha256Hasher, matches_hex, sha256_hex};
pub use self::reader::{HashingWriter, VerifiedReader};

mod error;
mod hasher;
mod reader;
