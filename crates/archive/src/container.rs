//! File-level container handle.

use crate::*;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Container compression variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// `.tar`
    Plain,

    /// `.tar.gz`
    Gzip,
}

impl Compression {
    /// Lookup order when probing for a node's container.
    pub const SEARCH_ORDER: [Compression; 2] =
        [Compression::Gzip, Compression::Plain];

    /// File name suffix for this variant.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Plain => ".tar",
            Self::Gzip => ".tar.gz",
        }
    }

    /// Determine the variant from a file name, if it names a container.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar") {
            Some(Self::Plain)
        } else {
            None
        }
    }
}

/// Decompressing reader over a container file.
pub enum ContainerReader {
    /// Plain tar.
    Plain(BufReader<std::fs::File>),

    /// Gzip compressed tar.
    Gzip(flate2::read::GzDecoder<BufReader<std::fs::File>>),
}

impl Read for ContainerReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
        }
    }
}

impl Skip for ContainerReader {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        match self {
            Self::Plain(r) => r.skip(n),
            Self::Gzip(r) => r.skip(n),
        }
    }
}

enum ContainerWriter {
    Plain(BufWriter<tempfile::NamedTempFile>),
    Gzip(flate2::write::GzEncoder<BufWriter<tempfile::NamedTempFile>>),
}

impl Write for ContainerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

impl ContainerWriter {
    fn create(dir: &Path, compression: Compression) -> io::Result<Self> {
        let file = new_temp_file(dir)?;
        let buf = BufWriter::new(file);
        Ok(match compression {
            Compression::Plain => Self::Plain(buf),
            Compression::Gzip => Self::Gzip(flate2::write::GzEncoder::new(
                buf,
                flate2::Compression::default(),
            )),
        })
    }

    /// Flush everything, sync and rename over `path`.
    fn commit(self, path: &Path) -> io::Result<()> {
        let buf = match self {
            Self::Plain(w) => w,
            Self::Gzip(w) => w.finish()?,
        };
        let file = buf.into_inner().map_err(|err| err.into_error())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Create a temporary file in `dir` suitable for renaming into place.
///
/// The name starts with `.tmp`, which never collides with a storage key.
pub fn new_temp_file(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    tempfile::Builder::new().prefix(".tmp").tempfile_in(dir)
}

/// A container file on disk.
///
/// Handles are cheap, the file is only touched by the operations. Edits
/// are not synchronized here; callers must hold a per-path lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    path: PathBuf,
    compression: Compression,
}

impl Container {
    /// A container at an explicit path.
    pub fn new(path: impl Into<PathBuf>, compression: Compression) -> Self {
        Self {
            path: path.into(),
            compression,
        }
    }

    /// The container owned by `node_hex` in `dir`.
    pub fn for_node(
        dir: &Path,
        node_hex: &str,
        compression: Compression,
    ) -> Self {
        Self::new(
            dir.join(format!("{node_hex}{}", compression.suffix())),
            compression,
        )
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compression variant.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// True if the file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open a decompressing reader at the start of the stream.
    pub fn open(&self) -> ArchiveResult<ContainerReader> {
        let file = BufReader::new(std::fs::File::open(&self.path)?);
        Ok(match self.compression {
            Compression::Plain => ContainerReader::Plain(file),
            Compression::Gzip => {
                ContainerReader::Gzip(flate2::read::GzDecoder::new(file))
            }
        })
    }

    /// Every member in archive order.
    pub fn members(&self) -> ArchiveResult<Vec<Member>> {
        list_members(self.open()?)
    }

    /// Locate the first member called `name`.
    pub fn find(&self, name: &str) -> ArchiveResult<Option<Member>> {
        let mut walker = MemberWalker::new(self.open()?);
        while let Some(member) = walker.next_member()? {
            if member.name == name {
                return Ok(Some(member));
            }
        }
        Ok(None)
    }

    /// A reader over exactly the payload of `member`.
    ///
    /// The reader holds its own file descriptor, so it stays valid if the
    /// container is replaced while it is being read.
    pub fn open_payload(
        &self,
        member: &Member,
    ) -> ArchiveResult<io::Take<ContainerReader>> {
        let reader = match self.compression {
            Compression::Plain => {
                let mut file = std::fs::File::open(&self.path)?;
                if member.offset + member.size > file.metadata()?.len() {
                    return Err(ArchiveError::Truncated);
                }
                file.seek(io::SeekFrom::Start(member.offset))?;
                ContainerReader::Plain(BufReader::new(file))
            }
            Compression::Gzip => {
                let mut reader = self.open()?;
                if reader.skip(member.offset)? < member.offset {
                    return Err(ArchiveError::Truncated);
                }
                reader
            }
        };
        Ok(reader.take(member.size))
    }

    /// Read a whole payload into memory. Meant for metadata members and
    /// other small payloads.
    pub fn read_payload(&self, member: &Member) -> ArchiveResult<Vec<u8>> {
        let mut out = Vec::with_capacity(member.size as usize);
        self.open_payload(member)?.read_to_end(&mut out)?;
        if (out.len() as u64) < member.size {
            return Err(ArchiveError::Truncated);
        }
        Ok(out)
    }

    /// Verify every data member, see [verify_digests].
    pub fn verify_digests(
        &self,
        excluded_suffix: &str,
    ) -> ArchiveResult<Vec<String>> {
        verify_digests(self.open()?, excluded_suffix)
    }

    /// Remove every member named in `names` in one pass.
    ///
    /// Returns whether any of them was present. The file is removed when
    /// no member remains, and left untouched when nothing matched.
    pub fn delete_members(&self, names: &[&str]) -> ArchiveResult<bool> {
        let mut out = self.create_writer()?;
        let outcome = rewrite(self.open()?, &mut out, names, &[])?;

        if !outcome.found {
            return Ok(false);
        }

        if outcome.kept == 0 {
            tracing::debug!(path = ?self.path, "container emptied, removing");
            std::fs::remove_file(&self.path)?;
            return Ok(true);
        }

        out.commit(&self.path)?;
        Ok(true)
    }

    /// Append members, creating the container if it does not exist.
    pub fn append_members(
        &self,
        members: &[NewMember<'_>],
    ) -> ArchiveResult<()> {
        let mut out = self.create_writer()?;
        if self.exists() {
            rewrite(self.open()?, &mut out, &[], members)?;
        } else {
            for member in members {
                write_member(&mut out, member)?;
            }
            write_end_marker(&mut out)?;
        }
        out.commit(&self.path)?;
        Ok(())
    }

    /// Replace the member called `member.name`, or add it if absent.
    pub fn upsert_member(&self, member: NewMember<'_>) -> ArchiveResult<()> {
        let mut out = self.create_writer()?;
        rewrite(self.open()?, &mut out, &[member.name], &[member])?;
        out.commit(&self.path)?;
        Ok(())
    }

    /// Append every member of `other` to this container and delete
    /// `other`.
    ///
    /// Both inputs must carry an end marker. On any failure this container
    /// and `other` are left as they were.
    pub fn concatenate(&self, other: &Container) -> ArchiveResult<usize> {
        let mut out = self.create_writer()?;
        copy_members(self.open()?, &mut out)?;
        let added = copy_members(other.open()?, &mut out)?;
        write_end_marker(&mut out)?;
        out.commit(&self.path)?;

        std::fs::remove_file(&other.path)?;
        tracing::debug!(
            into = ?self.path,
            from = ?other.path,
            added,
            "concatenated containers",
        );
        Ok(added)
    }

    /// Move a fully written container file into this container's place.
    pub fn install(&self, file: tempfile::NamedTempFile) -> ArchiveResult<()> {
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn create_writer(&self) -> io::Result<ContainerWriter> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        ContainerWriter::create(dir, self.compression)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn build(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in members {
            let mut header = tar::Header::new_ustar();
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_container(
        dir: &Path,
        node: &str,
        compression: Compression,
        members: &[(&str, &[u8])],
    ) -> Container {
        let c = Container::for_node(dir, node, compression);
        let bytes = build(members);
        match compression {
            Compression::Plain => std::fs::write(c.path(), bytes).unwrap(),
            Compression::Gzip => {
                let mut enc = flate2::write::GzEncoder::new(
                    std::fs::File::create(c.path()).unwrap(),
                    flate2::Compression::fast(),
                );
                enc.write_all(&bytes).unwrap();
                enc.finish().unwrap();
            }
        }
        c
    }

    fn names(c: &Container) -> Vec<String> {
        c.members().unwrap().into_iter().map(|m| m.name).collect()
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".tmp")
            })
            .count()
    }

    #[test]
    fn compression_from_name() {
        assert_eq!(
            Some(Compression::Gzip),
            Compression::from_name("ab.tar.gz")
        );
        assert_eq!(Some(Compression::Plain), Compression::from_name("ab.tar"));
        assert_eq!(None, Compression::from_name("ab.gz"));
        let c = Container::for_node(Path::new("/s"), "abcd", Compression::Gzip);
        assert_eq!(Path::new("/s/abcd.tar.gz"), c.path());
    }

    #[test]
    fn find_and_read_payload_both_variants() {
        for compression in Compression::SEARCH_ORDER {
            let dir = tempfile::tempdir().unwrap();
            let c = write_container(
                dir.path(),
                "node",
                compression,
                &[("a", &[1; 700][..]), ("b", &b"payload b"[..])],
            );

            let b = c.find("b").unwrap().unwrap();
            assert_eq!(b"payload b".to_vec(), c.read_payload(&b).unwrap());
            assert_eq!(None, c.find("zzz").unwrap());

            let mut part = Vec::new();
            c.open_payload(&b)
                .unwrap()
                .take(4)
                .read_to_end(&mut part)
                .unwrap();
            assert_eq!(b"payl".to_vec(), part);
        }
    }

    #[test]
    fn delete_some_then_all() {
        for compression in Compression::SEARCH_ORDER {
            let dir = tempfile::tempdir().unwrap();
            let c = write_container(
                dir.path(),
                "node",
                compression,
                &[
                    ("a", &b"1"[..]),
                    ("a.x.meta", &b"2"[..]),
                    ("b", &b"3"[..]),
                ],
            );

            assert!(!c.delete_members(&["nope"]).unwrap());
            assert_eq!(3, c.members().unwrap().len());

            assert!(c.delete_members(&["a", "a.x.meta"]).unwrap());
            assert_eq!(vec!["b".to_string()], names(&c));

            assert!(c.delete_members(&["b"]).unwrap());
            assert!(!c.exists());
            assert_eq!(0, leftover_temp_files(dir.path()));
        }
    }

    #[test]
    fn append_creates_then_extends() {
        let dir = tempfile::tempdir().unwrap();
        let c = Container::for_node(dir.path(), "node", Compression::Gzip);
        assert!(!c.exists());

        let ka = content_address(b"aaa");
        c.append_members(&[NewMember {
            name: &ka,
            content: b"aaa",
        }])
        .unwrap();
        assert!(c.exists());

        let kb = content_address(b"bbb");
        let meta = format!("{kb}.m.meta");
        c.append_members(&[
            NewMember {
                name: &kb,
                content: b"bbb",
            },
            NewMember {
                name: &meta,
                content: b"meta",
            },
        ])
        .unwrap();

        assert_eq!(vec![ka.clone(), kb.clone(), meta], names(&c));
        assert_eq!(vec![ka, kb], c.verify_digests(".meta").unwrap());
    }

    #[test]
    fn upsert_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let c = write_container(
            dir.path(),
            "node",
            Compression::Plain,
            &[("k.l.meta", &b"old"[..]), ("k", &b"data"[..])],
        );

        c.upsert_member(NewMember {
            name: "k.l.meta",
            content: b"new",
        })
        .unwrap();

        assert_eq!(vec!["k", "k.l.meta"], names(&c));
        let m = c.find("k.l.meta").unwrap().unwrap();
        assert_eq!(b"new".to_vec(), c.read_payload(&m).unwrap());
    }

    #[test]
    fn concatenate_after_removing_overlap() {
        let (ka, kb, kc) = (
            content_address(b"a"),
            content_address(b"b"),
            content_address(b"c"),
        );
        let dir = tempfile::tempdir().unwrap();
        let a = write_container(
            dir.path(),
            "a",
            Compression::Plain,
            &[(ka.as_str(), &b"a"[..]), (kb.as_str(), &b"b"[..])],
        );
        let b = write_container(
            dir.path(),
            "b",
            Compression::Gzip,
            &[(kb.as_str(), &b"b"[..]), (kc.as_str(), &b"c"[..])],
        );

        let overlap: Vec<String> = b
            .members()
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .filter(|n| names(&a).contains(n))
            .collect();
        assert_eq!(vec![kb.clone()], overlap);
        let overlap: Vec<&str> = overlap.iter().map(|s| s.as_str()).collect();
        assert!(b.delete_members(&overlap).unwrap());

        assert_eq!(1, a.concatenate(&b).unwrap());
        assert!(!b.exists());
        assert_eq!(
            vec![ka, kb, kc],
            a.verify_digests(".meta").unwrap(),
        );

        let bytes = std::fs::read(a.path()).unwrap();
        assert_eq!(512 * 8, bytes.len());
    }

    #[test]
    fn concatenate_truncated_leaves_both_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_container(
            dir.path(),
            "a",
            Compression::Plain,
            &[("x", &b"1"[..])],
        );
        let before = std::fs::read(a.path()).unwrap();

        let b = Container::for_node(dir.path(), "b", Compression::Plain);
        let full = build(&[("y", &b"2"[..])]);
        std::fs::write(b.path(), &full[..1024]).unwrap();

        assert!(matches!(a.concatenate(&b), Err(ArchiveError::Truncated)));
        assert_eq!(before, std::fs::read(a.path()).unwrap());
        assert!(b.exists());
        assert_eq!(0, leftover_temp_files(dir.path()));
    }

    #[test]
    fn install_moves_upload_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut upload = new_temp_file(dir.path()).unwrap();
        upload.write_all(&build(&[("k", &b"v"[..])])).unwrap();

        let c = Container::for_node(dir.path(), "node", Compression::Plain);
        c.install(upload).unwrap();
        assert_eq!(vec!["k"], names(&c));
    }
}
