//! Typed view over a single tar header block.
//!
//! Only the fields the splicer needs are interpreted:
//!
//! ```text
//! offset  len  field
//!      0  100  name (NUL terminated)
//!    124   12  size (octal ASCII, or GNU base-256 if the high bit is set)
//!    148    8  checksum (octal ASCII)
//!    257    6  magic ("ustar")
//!    345  155  name prefix (ustar only)
//! ```

use crate::*;
use std::ops::Range;

/// Tar block size. Headers occupy one block, payloads are zero padded
/// to a whole number of blocks.
pub const BLOCK_SIZE: usize = 512;

/// A single tar block.
pub type Block = [u8; BLOCK_SIZE];

/// An all-zero block. Two in a row mark the end of an archive.
pub const ZERO_BLOCK: Block = [0; BLOCK_SIZE];

const NAME: Range<usize> = 0..100;
const SIZE: Range<usize> = 124..136;
const CHECKSUM: Range<usize> = 148..156;
const MAGIC: Range<usize> = 257..262;
const PREFIX: Range<usize> = 345..500;

/// Round a payload length up to a whole number of blocks.
pub fn padded_len(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// True if every byte of the block is zero.
pub fn is_zero_block(block: &Block) -> bool {
    block.iter().all(|b| *b == 0)
}

/// A read-only view of a header block.
pub struct HeaderView<'a> {
    block: &'a Block,
}

impl<'a> HeaderView<'a> {
    /// Wrap a block.
    pub fn new(block: &'a Block) -> Self {
        Self { block }
    }

    /// The member name, joined with the ustar prefix when present.
    pub fn name(&self) -> String {
        let name = nul_terminated(&self.block[NAME]);
        let prefix = if &self.block[MAGIC] == b"ustar" {
            nul_terminated(&self.block[PREFIX])
        } else {
            &[]
        };
        if prefix.is_empty() {
            String::from_utf8_lossy(name).into_owned()
        } else {
            format!(
                "{}/{}",
                String::from_utf8_lossy(prefix),
                String::from_utf8_lossy(name),
            )
        }
    }

    /// The payload size, if the size field is well formed.
    pub fn size(&self) -> Option<u64> {
        let field = &self.block[SIZE];
        if field[0] & 0x80 != 0 {
            parse_base256(field)
        } else {
            parse_octal(field)
        }
    }

    /// The checksum recorded in the header.
    pub fn stored_checksum(&self) -> Option<u64> {
        parse_octal(&self.block[CHECKSUM])
    }

    /// The checksum of the block as it is, counting the checksum
    /// field itself as spaces.
    pub fn computed_checksum(&self) -> u64 {
        self.block
            .iter()
            .enumerate()
            .map(|(i, b)| {
                if CHECKSUM.contains(&i) {
                    b' ' as u64
                } else {
                    *b as u64
                }
            })
            .sum()
    }

    /// Validate the header, returning its name and payload size.
    /// `offset` is only used for error reporting.
    pub fn parse(&self, offset: u64) -> ArchiveResult<(String, u64)> {
        let size = self
            .size()
            .ok_or_else(|| ArchiveError::corrupt(offset, "bad size field"))?;
        match self.stored_checksum() {
            Some(sum) if sum == self.computed_checksum() => (),
            Some(_) => {
                return Err(ArchiveError::corrupt(offset, "checksum mismatch"))
            }
            None => {
                return Err(ArchiveError::corrupt(offset, "bad checksum field"))
            }
        }
        Ok((self.name(), size))
    }
}

/// Build a ustar header for a regular file member. Names longer than the
/// name field are split into the ustar prefix where a `/` allows it.
pub fn new_header(name: &str, size: u64) -> ArchiveResult<Block> {
    let mtime = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut header = tar::Header::new_ustar();
    header
        .set_path(name)
        .map_err(|_| ArchiveError::NameTooLong(name.to_string()))?;
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    Ok(*header.as_bytes())
}

fn nul_terminated(field: &[u8]) -> &[u8] {
    match field.iter().position(|b| *b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

/// Octal digits, optionally led by spaces and ended by NUL or space.
fn parse_octal(field: &[u8]) -> Option<u64> {
    let start = field.iter().position(|b| *b != b' ')?;
    let field = &field[start..];
    let end = field
        .iter()
        .position(|b| *b == 0 || *b == b' ')
        .unwrap_or(field.len());
    let (digits, rest) = field.split_at(end);
    if digits.is_empty() || rest.iter().any(|b| *b != 0 && *b != b' ') {
        return None;
    }
    digits.iter().try_fold(0u64, |acc, b| {
        if !(b'0'..=b'7').contains(b) {
            return None;
        }
        acc.checked_mul(8)?.checked_add((b - b'0') as u64)
    })
}

/// GNU base-256: high bit set on the first byte, big-endian value.
fn parse_base256(field: &[u8]) -> Option<u64> {
    let (head, tail) = field.split_at(field.len().checked_sub(8)?);
    if head.first()? & 0x7f != 0 || head[1..].iter().any(|b| *b != 0) {
        return None;
    }
    Some(u64::from_be_bytes(tail.try_into().ok()?))
}
