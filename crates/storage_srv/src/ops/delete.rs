use super::*;

fn deleted(key: &str, removed: bool) -> Reply {
    Reply::json(
        200,
        &serde_json::json!({ "deleted": key, "removed": removed }),
    )
}

impl Node {
    /// DELETE: sever the `label` ownership edge of `requester` to `key`.
    pub(super) fn delete(
        &self,
        requester: &Requester,
        key: &str,
        label: &str,
    ) -> OpResult<Reply> {
        let owner = &requester.node_id;

        if self.fragments.exists(key) {
            let removed = self.fragments.remove_owner(key, owner, label)?;
            tracing::info!(
                key,
                %owner,
                label,
                removed,
                "fragment owner removed",
            );
            return Ok(deleted(key, removed));
        }

        let meta_name = meta_member_name(key, label);
        for container in self.containers_of(owner) {
            let _g = self.locks.lock(container.path());

            let members = match members_if_present(&container)? {
                None => continue,
                Some(members) => members,
            };
            if !members.iter().any(|m| m.name == key) {
                continue;
            }

            // other labels still reference the payload
            let shared = members
                .iter()
                .any(|m| m.name != meta_name && is_meta_of(&m.name, key));

            let names: Vec<&str> = if shared {
                vec![meta_name.as_str()]
            } else {
                vec![key, meta_name.as_str()]
            };
            container.delete_members(&names)?;

            tracing::info!(
                key,
                label,
                removed = !shared,
                path = ?container.path(),
                "container member removed",
            );
            return Ok(deleted(key, !shared));
        }

        Err(OpError::NotFound(key.to_string()))
    }
}
