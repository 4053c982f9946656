//! Single-pass splicing primitives over uncompressed tar streams.
//!
//! Everything here works on `Read`/`Write`, so the same code edits plain
//! and gzip containers. Callers are responsible for writing into a
//! temporary file and renaming it into place, see [crate::Container].

use crate::*;
use std::io::{self, Read, Seek, Write};

/// A member located inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member name as recorded in its header.
    pub name: String,

    /// Unpadded payload length.
    pub size: u64,

    /// Offset of the payload in the uncompressed stream.
    pub offset: u64,
}

/// A member to be written into a container.
#[derive(Debug, Clone, Copy)]
pub struct NewMember<'a> {
    /// Member name.
    pub name: &'a str,

    /// Member payload.
    pub content: &'a [u8],
}

/// Sources that can discard bytes, cheaply where possible.
pub trait Skip: Read {
    /// Discard up to `n` bytes, returning how many were discarded.
    /// Fewer than `n` means the input ended.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        io::copy(&mut Read::take(self, n), &mut io::sink())
    }
}

impl Skip for &[u8] {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let n = n.min(self.len() as u64) as usize;
        *self = &self[n..];
        Ok(n as u64)
    }
}

impl<T: AsRef<[u8]>> Skip for io::Cursor<T> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let len = self.get_ref().as_ref().len() as u64;
        let n = n.min(len.saturating_sub(self.position()));
        self.set_position(self.position() + n);
        Ok(n)
    }
}

impl Skip for std::fs::File {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let len = self.metadata()?.len();
        let pos = self.stream_position()?;
        let n = n.min(len.saturating_sub(pos));
        self.seek(io::SeekFrom::Current(n as i64))?;
        Ok(n)
    }
}

impl Skip for io::BufReader<std::fs::File> {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let len = self.get_ref().metadata()?.len();
        let pos = self.stream_position()?;
        let n = n.min(len.saturating_sub(pos));
        self.seek_relative(n as i64)?;
        Ok(n)
    }
}

impl<R: Read> Skip for flate2::read::GzDecoder<R> {}

impl<S: Skip + ?Sized> Skip for &mut S {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        (**self).skip(n)
    }
}

/// One step of a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A member header was read. Its payload has not been consumed yet.
    Member(Member),

    /// A lone all-zero block that is not part of the end marker.
    Filler,
}

/// Walks the headers of an uncompressed tar stream.
///
/// After [MemberWalker::next_entry] returns a member, the caller may
/// consume its payload with [MemberWalker::copy_payload] or
/// [MemberWalker::stream_payload]; anything left unconsumed is skipped
/// on the next call.
pub struct MemberWalker<R> {
    reader: R,
    offset: u64,
    pending: Option<(u64, Block)>,
    header: Block,
    payload_left: u64,
    padded_left: u64,
    done: bool,
}

impl<R: Skip> MemberWalker<R> {
    /// Start walking at the beginning of `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            pending: None,
            header: ZERO_BLOCK,
            payload_left: 0,
            padded_left: 0,
            done: false,
        }
    }

    /// Advance to the next entry. `None` once the end marker was read.
    pub fn next_entry(&mut self) -> ArchiveResult<Option<Entry>> {
        self.skip_rest()?;

        if self.done {
            return Ok(None);
        }

        let (offset, block) = self.read_block()?;

        if is_zero_block(&block) {
            let (next_offset, next) = self.read_block()?;
            if is_zero_block(&next) {
                self.done = true;
                return Ok(None);
            }
            self.pending = Some((next_offset, next));
            return Ok(Some(Entry::Filler));
        }

        let (name, size) = HeaderView::new(&block).parse(offset)?;
        self.header = block;
        self.payload_left = size;
        self.padded_left = padded_len(size);

        Ok(Some(Entry::Member(Member {
            name,
            size,
            offset: offset + BLOCK_SIZE as u64,
        })))
    }

    /// Advance to the next member, passing over filler blocks.
    pub fn next_member(&mut self) -> ArchiveResult<Option<Member>> {
        loop {
            match self.next_entry()? {
                Some(Entry::Member(member)) => return Ok(Some(member)),
                Some(Entry::Filler) => continue,
                None => return Ok(None),
            }
        }
    }

    /// The raw header block of the member last returned.
    pub fn header_block(&self) -> &Block {
        &self.header
    }

    /// Copy the rest of the current payload, padding included, verbatim.
    pub fn copy_payload<W: Write + ?Sized>(
        &mut self,
        writer: &mut W,
    ) -> ArchiveResult<()> {
        let n = self.padded_left;
        self.copy_exact(n, writer)?;
        self.payload_left = 0;
        self.padded_left = 0;
        Ok(())
    }

    /// Copy the rest of the current payload without its padding.
    pub fn stream_payload<W: Write + ?Sized>(
        &mut self,
        writer: &mut W,
    ) -> ArchiveResult<()> {
        let n = self.payload_left;
        self.copy_exact(n, writer)?;
        self.payload_left = 0;
        self.padded_left -= n;
        Ok(())
    }

    fn skip_rest(&mut self) -> ArchiveResult<()> {
        if self.padded_left == 0 {
            return Ok(());
        }
        let n = self.padded_left;
        let skipped = self.reader.skip(n)?;
        self.offset += skipped;
        if skipped < n {
            return Err(ArchiveError::Truncated);
        }
        self.payload_left = 0;
        self.padded_left = 0;
        Ok(())
    }

    fn copy_exact<W: Write + ?Sized>(
        &mut self,
        n: u64,
        writer: &mut W,
    ) -> ArchiveResult<()> {
        let copied = io::copy(&mut (&mut self.reader).take(n), writer)?;
        self.offset += copied;
        if copied < n {
            return Err(ArchiveError::Truncated);
        }
        Ok(())
    }

    fn read_block(&mut self) -> ArchiveResult<(u64, Block)> {
        if let Some(pending) = self.pending.take() {
            return Ok(pending);
        }
        let offset = self.offset;
        let mut block = ZERO_BLOCK;
        match self.reader.read_exact(&mut block) {
            Ok(()) => (),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ArchiveError::Truncated)
            }
            Err(err) => return Err(err.into()),
        }
        self.offset += BLOCK_SIZE as u64;
        Ok((offset, block))
    }
}

/// Result of a [rewrite] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// At least one member named in the remove set was seen.
    pub found: bool,

    /// Members present in the output, appended ones included.
    pub kept: usize,
}

/// Copy `reader` to `writer` dropping members named in `remove`, then
/// append `append` and a fresh end marker.
///
/// Kept headers and payloads are copied byte for byte. Lone zero filler
/// blocks are preserved.
pub fn rewrite<R: Skip, W: Write + ?Sized>(
    reader: R,
    writer: &mut W,
    remove: &[&str],
    append: &[NewMember<'_>],
) -> ArchiveResult<RewriteOutcome> {
    let mut walker = MemberWalker::new(reader);
    let mut found = false;
    let mut kept = 0;

    while let Some(entry) = walker.next_entry()? {
        match entry {
            Entry::Filler => writer.write_all(&ZERO_BLOCK)?,
            Entry::Member(member) => {
                if remove.contains(&member.name.as_str()) {
                    tracing::trace!(name = %member.name, "dropping member");
                    found = true;
                    continue;
                }
                writer.write_all(walker.header_block())?;
                walker.copy_payload(writer)?;
                kept += 1;
            }
        }
    }

    for member in append {
        write_member(writer, member)?;
        kept += 1;
    }
    write_end_marker(writer)?;

    Ok(RewriteOutcome { found, kept })
}

/// Copy every member (and filler block) up to, not including, the end
/// marker. Returns the number of members copied.
pub fn copy_members<R: Skip, W: Write + ?Sized>(
    reader: R,
    writer: &mut W,
) -> ArchiveResult<usize> {
    let mut walker = MemberWalker::new(reader);
    let mut count = 0;

    while let Some(entry) = walker.next_entry()? {
        match entry {
            Entry::Filler => writer.write_all(&ZERO_BLOCK)?,
            Entry::Member(_) => {
                writer.write_all(walker.header_block())?;
                walker.copy_payload(writer)?;
                count += 1;
            }
        }
    }

    Ok(count)
}

/// Write one member: header, payload, zero padding.
pub fn write_member<W: Write + ?Sized>(
    writer: &mut W,
    member: &NewMember<'_>,
) -> ArchiveResult<()> {
    let size = member.content.len() as u64;
    writer.write_all(&new_header(member.name, size)?)?;
    writer.write_all(member.content)?;
    let pad = (padded_len(size) - size) as usize;
    writer.write_all(&ZERO_BLOCK[..pad])?;
    Ok(())
}

/// Write the two-block end marker.
pub fn write_end_marker<W: Write + ?Sized>(
    writer: &mut W,
) -> ArchiveResult<()> {
    writer.write_all(&ZERO_BLOCK)?;
    writer.write_all(&ZERO_BLOCK)?;
    Ok(())
}

/// Recompute the content address of every member whose name does not end
/// in `excluded_suffix` and require it to equal the member name.
///
/// Returns every verified name in archive order, or the first mismatch.
pub fn verify_digests<R: Skip>(
    reader: R,
    excluded_suffix: &str,
) -> ArchiveResult<Vec<String>> {
    let mut walker = MemberWalker::new(reader);
    let mut names = Vec::new();

    while let Some(member) = walker.next_member()? {
        if !excluded_suffix.is_empty() && member.name.ends_with(excluded_suffix)
        {
            continue;
        }

        let mut hasher = AddressHasher::new();
        walker.stream_payload(&mut hasher)?;
        let computed = hasher.finish();

        if computed != member.name {
            return Err(ArchiveError::DigestMismatch {
                name: member.name,
                computed,
            });
        }
        names.push(member.name);
    }

    Ok(names)
}

/// List every member in archive order.
pub fn list_members<R: Skip>(reader: R) -> ArchiveResult<Vec<Member>> {
    let mut walker = MemberWalker::new(reader);
    let mut out = Vec::new();
    while let Some(member) = walker.next_member()? {
        out.push(member);
    }
    Ok(out)
}
