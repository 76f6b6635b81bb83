use sha2::Digest;

pub trait Hasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self) -> Vec<u8>;
}

#[derive(Clone, Default)]
pub struct Sha256Hasher(sha2::Sha256);

impl Hasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) { self.0.update(data); }
    fn finalize(self) -> Vec<u8> { self.0.finalize().to_vec() }
}

impl Sha256Hasher {
    pub fn new() -> Self { Self(sha2::Sha256::new()) }

    pub fn digest(data: &[u8]) -> Vec<u8> { sha2::Sha256::digest(data).to_vec() }
}

/// Lowercase hex SHA-256 of `data`, the checksum form stored in sidecars.
pub fn sha256_hex(data: &[u8]) -> String { hex::encode(Sha256Hasher::digest(data)) }

/// Compare a digest against a stored hex checksum, ignoring case.
pub fn matches_hex(digest: &[u8], expected: &str) -> bool {
    hex::decode(expected.trim()).is_ok_and(|bytes| bytes == digest)
}
