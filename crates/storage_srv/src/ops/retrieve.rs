use super::*;

impl Node {
    /// RETRIEVE: stream a fragment back, with the requester's metadata
    /// unless `with_meta` is false.
    pub(super) fn retrieve(
        &self,
        requester: &Requester,
        key: &str,
        with_meta: bool,
    ) -> OpResult<Reply> {
        match self.fragments.open(key) {
            Ok(file) => {
                let len = file.metadata()?.len();
                let metas = if with_meta {
                    self.fragments
                        .meta(key, &requester.node_id)?
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(label, content)| {
                            (meta_member_name(key, &label), content)
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                self.fragments.touch(key)?;
                tracing::info!(key, len, "retrieving standalone fragment");
                return Ok(payload_reply(key, metas, len, file));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
            Err(err) => return Err(err.into()),
        }

        match self.locate(&requester.node_id, key, with_meta)? {
            Some(Located {
                container,
                member,
                reader,
                metas,
            }) => {
                tracing::info!(
                    key,
                    len = member.size,
                    path = ?container.path(),
                    "retrieving packed fragment",
                );
                Ok(payload_reply(key, metas, member.size, reader))
            }
            None => Err(OpError::NotFound(key.to_string())),
        }
    }
}
