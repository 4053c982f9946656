//! Content addressing.
//!
//! A storage key is the SHA-256 of the fragment content, encoded as
//! url-safe base64 without padding. The encoding never contains `/` or
//! `.`, so a key is always usable as a single url path segment, a file
//! name, and a tar member name.

use base64::prelude::*;
use sha2::{Digest, Sha256};

/// Compute the canonical storage key of `content`.
pub fn content_address(content: &[u8]) -> String {
    encode_digest(&Sha256::digest(content))
}

fn encode_digest(digest: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(digest)
}

/// Encoded length of a storage key.
pub const ADDRESS_LEN: usize = 43;

/// True if `key` is the canonical encoding of some SHA-256 digest.
pub fn is_content_address(key: &str) -> bool {
    key.len() == ADDRESS_LEN
        && matches!(
            BASE64_URL_SAFE_NO_PAD.decode(key),
            Ok(digest) if digest.len() == 32
        )
}

/// Incremental content address computation for streamed payloads.
#[derive(Default, Clone)]
pub struct AddressHasher(Sha256);

impl std::fmt::Debug for AddressHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressHasher").finish()
    }
}

impl AddressHasher {
    /// Start a new hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more content.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish, returning the encoded address.
    pub fn finish(self) -> String {
        encode_digest(&self.0.finalize())
    }
}

impl std::io::Write for AddressHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Hash exactly `len` bytes from `reader`, failing if fewer are available.
pub fn address_of_reader<R: std::io::Read>(
    reader: R,
    len: u64,
) -> std::io::Result<String> {
    let mut hasher = AddressHasher::new();
    let copied = std::io::copy(&mut reader.take(len), &mut hasher)?;
    if copied != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes to hash, got {copied}"),
        ));
    }
    Ok(hasher.finish())
}
