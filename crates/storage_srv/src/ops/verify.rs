use super::*;
use std::io::{Seek, SeekFrom};

fn check_range(offset: u64, length: u64, size: u64) -> OpResult<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(OpError::BadRange {
            offset,
            length,
            size,
        }),
    }
}

fn proof(key: &str, offset: u64, length: u64, address: String) -> Reply {
    tracing::info!(key, offset, length, "possession proven");
    Reply::text(200, address)
}

impl Node {
    /// VERIFY: answer with the content address of `length` bytes at
    /// `offset`, optionally updating the requester's metadata.
    pub(super) fn verify(
        &self,
        requester: &Requester,
        key: &str,
        offset: u64,
        length: u64,
        meta: Option<(String, Vec<u8>)>,
    ) -> OpResult<Reply> {
        match self.fragments.open(key) {
            Ok(mut file) => {
                check_range(offset, length, file.metadata()?.len())?;
                file.seek(SeekFrom::Start(offset))?;
                let address = address_of_reader(file, length)?;

                if let Some((label, content)) = &meta {
                    let owner = &requester.node_id;
                    let written = self
                        .fragments
                        .set_meta(key, owner, label, content)
                        .map_err(|err| match err.kind() {
                            std::io::ErrorKind::NotFound => {
                                OpError::NotFound(key.to_string())
                            }
                            _ => err.into(),
                        })?;
                    tracing::debug!(
                        key,
                        %owner,
                        label,
                        written,
                        "metadata set",
                    );
                }
                return Ok(proof(key, offset, length, address));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => return Err(err.into()),
        }

        let Located {
            container,
            member,
            mut reader,
            ..
        } = match self.locate(&requester.node_id, key, false)? {
            Some(located) => located,
            None => return Err(OpError::NotFound(key.to_string())),
        };

        check_range(offset, length, member.size)?;
        if reader.get_mut().skip(offset)? < offset {
            return Err(ArchiveError::Truncated.into());
        }
        reader.set_limit(length);
        let address = address_of_reader(reader, length)?;

        if let Some((label, content)) = &meta {
            let _g = self.locks.lock(container.path());
            set_container_meta(&container, key, label, content)?;
        }
        Ok(proof(key, offset, length, address))
    }
}
