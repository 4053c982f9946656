use super::*;
use std::collections::HashSet;
use std::io::Write;

fn stored(key: &str, location: &str) -> Reply {
    Reply::json(
        200,
        &serde_json::json!({ "stored": key, "location": location }),
    )
}

impl Node {
    /// STORE: accept a fragment or a whole container from `requester`.
    pub(super) fn store(
        &self,
        requester: &Requester,
        key: &str,
        meta: Option<(String, Vec<u8>)>,
        body: &[u8],
    ) -> OpResult<Reply> {
        if let Some(compression) = Compression::from_name(key) {
            return self.store_container(requester, key, compression, body);
        }

        let computed = content_address(body);
        if computed != key {
            return Err(OpError::NonCanonicalKey(format!(
                "{key} does not address the uploaded content ({computed})"
            )));
        }

        let owner = &requester.node_id;
        let meta_ref = meta.as_ref().map(|(l, c)| (l.as_str(), c.as_slice()));

        if self.fragments.exists(key) {
            match self.fragments.add_owner(key, owner, meta_ref) {
                Ok(()) => {
                    tracing::info!(key, %owner, "owner added to fragment");
                    return Ok(stored(key, "fragment"));
                }
                // deleted meanwhile, store it anew below
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => return Err(err.into()),
            }
        }

        for container in self.containers_of(owner) {
            let _g = self.locks.lock(container.path());
            if container.find(key)?.is_some() {
                if let Some((label, content)) = &meta {
                    set_container_meta(&container, key, label, content)?;
                }
                tracing::info!(key, %owner, "fragment already in container");
                return Ok(stored(key, "container"));
            }
        }

        if (body.len() as u64) < self.config.small_object_threshold {
            let first = self.containers_of(owner).into_iter().next();
            if let Some(container) = first {
                let _g = self.locks.lock(container.path());
                if container.exists() {
                    let meta_name =
                        meta.as_ref().map(|(l, _)| meta_member_name(key, l));
                    let mut members = vec![NewMember {
                        name: key,
                        content: body,
                    }];
                    if let (Some(name), Some((_, content))) =
                        (&meta_name, &meta)
                    {
                        members.push(NewMember {
                            name,
                            content,
                        });
                    }
                    container.append_members(&members)?;
                    tracing::info!(
                        key,
                        %owner,
                        path = ?container.path(),
                        "small fragment packed into container",
                    );
                    return Ok(stored(key, "container"));
                }
            }
        }

        let mut upload = new_temp_file(&self.config.storage_dir)?;
        upload.write_all(body)?;
        upload.flush()?;
        let created =
            self.fragments
                .create_or_add_owner(key, upload, owner, meta_ref)?;
        tracing::info!(key, %owner, created, "fragment stored");
        Ok(stored(key, "fragment"))
    }

    /// A container upload: verified as a whole, then merged into the
    /// requester's container of the same compression.
    fn store_container(
        &self,
        requester: &Requester,
        key: &str,
        compression: Compression,
        body: &[u8],
    ) -> OpResult<Reply> {
        let mut upload = new_temp_file(&self.config.storage_dir)?;
        upload.write_all(body)?;
        upload.flush()?;

        let incoming = Container::new(upload.path(), compression);
        let verified = incoming.verify_digests(META_SUFFIX).map_err(|err| {
            OpError::NonCanonicalKey(format!("{key}: {err}"))
        })?;

        let target = Container::for_node(
            &self.config.storage_dir,
            &requester.node_id.to_hex(),
            compression,
        );
        let _g = self.locks.lock(target.path());

        if !target.exists() {
            target.install(upload)?;
            tracing::info!(
                path = ?target.path(),
                members = verified.len(),
                "container installed",
            );
            return Ok(stored(key, "container"));
        }

        let present: HashSet<String> =
            target.members()?.into_iter().map(|m| m.name).collect();
        let overlap: Vec<String> = incoming
            .members()?
            .into_iter()
            .map(|m| m.name)
            .filter(|name| present.contains(name))
            .collect();
        if !overlap.is_empty() {
            let overlap: Vec<&str> =
                overlap.iter().map(String::as_str).collect();
            incoming.delete_members(&overlap)?;
        }

        // everything uploaded was already present
        if !incoming.exists() {
            tracing::info!(
                path = ?target.path(),
                "container upload added nothing",
            );
            return Ok(stored(key, "container"));
        }

        let added = target.concatenate(&incoming)?;
        tracing::info!(
            path = ?target.path(),
            added,
            skipped = overlap.len(),
            "container upload merged",
        );
        Ok(stored(key, "container"))
    }
}
