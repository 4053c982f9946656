//! The storage operations behind the authentication gate.
//!
//! A fragment is looked up first in the standalone [FragmentStore], then
//! in the requester's own containers, compressed before plain. Container
//! edits hold the container's edit lock for the duration of the local
//! rewrite only; payloads are streamed to the requester after the lock
//! is released, from a file handle opened while it was held.

use crate::*;
use fragstore_archive::*;
use std::io::Read;
use std::sync::Arc;

mod delete;
mod identify;
mod retrieve;
mod store;
mod verify;

/// Name suffix of metadata members.
pub const META_SUFFIX: &str = ".meta";

/// Container member name of the `label` metadata of `key`.
pub fn meta_member_name(key: &str, label: &str) -> String {
    format!("{key}.{label}{META_SUFFIX}")
}

fn is_meta_of(name: &str, key: &str) -> bool {
    name.len() > key.len() + META_SUFFIX.len()
        && name.starts_with(key)
        && name.as_bytes()[key.len()] == b'.'
        && name.ends_with(META_SUFFIX)
}

/// A payload located in one of the requester's containers.
struct Located {
    container: Container,
    member: Member,
    reader: std::io::Take<ContainerReader>,
    metas: Vec<(String, Vec<u8>)>,
}

/// One storage node: its identity, gate and storage.
pub struct Node {
    config: Arc<Config>,
    key: Arc<NodeKey>,
    gate: AuthGate,
    fragments: FragmentStore,
    locks: Arc<EditLocks>,
    peers: DynPeerReputation,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", self.key.node_id())
            .field("storage_dir", &self.config.storage_dir)
            .finish()
    }
}

impl Node {
    /// Construct a node storing into `config.storage_dir`.
    pub fn new(
        config: Arc<Config>,
        key: Arc<NodeKey>,
        challenges: ChallengeRegistry,
        peers: DynPeerReputation,
    ) -> Self {
        let locks = Arc::new(EditLocks::default());
        Self {
            gate: AuthGate::new(
                key.clone(),
                challenges,
                config.group_secret.clone(),
                peers.clone(),
            ),
            fragments: FragmentStore::new(
                config.storage_dir.clone(),
                locks.clone(),
            ),
            config,
            key,
            locks,
            peers,
        }
    }

    /// This node's key.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Run one operation request to completion, turning failures into
    /// error replies.
    pub fn dispatch(&self, req: OpRequest) -> Reply {
        let OpRequest {
            kind,
            key,
            peer,
            query,
            authorization,
            body,
        } = req;

        let op = kind.name();
        let host = peer.ip().to_string();
        let params = Params::new(op, query);

        let authorization = authorization.as_deref();
        match self.run(kind, &key, &host, &params, authorization, body) {
            Ok(reply) => reply,
            Err(err) => {
                let port = params
                    .optional("port")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0);
                tracing::warn!(
                    op,
                    host = %host,
                    port,
                    key = %key,
                    %err,
                    "operation failed",
                );
                self.peers.record_failure(op, &host, port, &key, &err);
                Reply::error(&err)
            }
        }
    }

    /// Parameter and identity errors surface here, before the gate can
    /// issue a challenge.
    fn run(
        &self,
        kind: OpKind,
        key: &str,
        host: &str,
        params: &Params,
        authorization: Option<&str>,
        body: bytes::Bytes,
    ) -> OpResult<Reply> {
        let op = kind.name();

        match kind {
            OpKind::Identify => self.identify(params, host),
            OpKind::Store => {
                let requester = target(kind, key, params, host)?;
                let size: u64 = params.required_parsed("size")?;
                if size != body.len() as u64 {
                    return Err(OpError::malformed(format!(
                        "STORE size {size} does not match body length {}",
                        body.len()
                    )));
                }
                let meta = params.meta()?;
                self.gate.authenticate(op, &requester, authorization, || {
                    self.store(&requester, key, meta, &body)
                })
            }
            OpKind::Retrieve => {
                let requester = target(kind, key, params, host)?;
                let with_meta = params.flag("withMeta", true)?;
                self.gate.authenticate(op, &requester, authorization, || {
                    self.retrieve(&requester, key, with_meta)
                })
            }
            OpKind::Verify => {
                let requester = target(kind, key, params, host)?;
                let offset: u64 = params.required_parsed("offset")?;
                let length: u64 = params.required_parsed("length")?;
                let meta = params.meta()?;
                self.gate.authenticate(op, &requester, authorization, || {
                    self.verify(&requester, key, offset, length, meta)
                })
            }
            OpKind::Delete => {
                let requester = target(kind, key, params, host)?;
                let label = params.metakey()?;
                self.gate.authenticate(op, &requester, authorization, || {
                    self.delete(&requester, key, label)
                })
            }
        }
    }

    /// The requester's existing containers in lookup order.
    fn containers_of(&self, owner: &NodeId) -> Vec<Container> {
        let hex = owner.to_hex();
        Compression::SEARCH_ORDER
            .iter()
            .map(|c| Container::for_node(&self.config.storage_dir, &hex, *c))
            .filter(Container::exists)
            .collect()
    }

    /// Find `key` in the requester's containers and open its payload,
    /// optionally reading its metadata members too.
    fn locate(
        &self,
        owner: &NodeId,
        key: &str,
        with_meta: bool,
    ) -> OpResult<Option<Located>> {
        for container in self.containers_of(owner) {
            let _g = self.locks.lock(container.path());

            let members = match members_if_present(&container)? {
                None => continue,
                Some(members) => members,
            };
            let member = match members.iter().find(|m| m.name == key) {
                None => continue,
                Some(member) => member.clone(),
            };

            let mut metas = Vec::new();
            if with_meta {
                let of_key =
                    members.iter().filter(|m| is_meta_of(&m.name, key));
                for meta in of_key {
                    let content = container.read_payload(meta)?;
                    metas.push((meta.name.clone(), content));
                }
            }

            let reader = container.open_payload(&member)?;
            return Ok(Some(Located {
                container,
                member,
                reader,
                metas,
            }));
        }
        Ok(None)
    }
}

/// The requester of an operation on `key`. Only STORE takes names that
/// are not content addresses, for container uploads.
fn target(
    kind: OpKind,
    key: &str,
    params: &Params,
    host: &str,
) -> OpResult<Requester> {
    match kind {
        OpKind::Store => validate_key(key)?,
        _ => validate_address(key)?,
    }
    Requester::from_params(params, host)
}

/// Members of `container`, or `None` if it vanished since it was listed.
fn members_if_present(container: &Container) -> OpResult<Option<Vec<Member>>> {
    match container.members() {
        Ok(members) => Ok(Some(members)),
        Err(ArchiveError::Io(err))
            if err.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Write the `label` metadata member of `key` unless it already holds
/// `content`. The caller holds the container's edit lock.
fn set_container_meta(
    container: &Container,
    key: &str,
    label: &str,
    content: &[u8],
) -> OpResult<bool> {
    let name = meta_member_name(key, label);
    if let Some(member) = container.find(&name)? {
        if member.size == content.len() as u64
            && container.read_payload(&member)? == content
        {
            return Ok(false);
        }
    }
    container.upsert_member(NewMember {
        name: &name,
        content,
    })?;
    tracing::debug!(
        path = ?container.path(),
        name = %name,
        "metadata member written",
    );
    Ok(true)
}

/// Copy exactly `len` bytes of `reader` into `out`.
fn copy_exact(
    reader: impl Read,
    len: u64,
    out: &mut dyn std::io::Write,
) -> std::io::Result<()> {
    let copied = std::io::copy(&mut reader.take(len), out)?;
    if copied < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("payload ended after {copied} of {len} bytes"),
        ));
    }
    Ok(())
}

/// A streamed payload, multi-part framed when there is metadata to send
/// along.
fn payload_reply<R: Read + Send + 'static>(
    key: &str,
    metas: Vec<(String, Vec<u8>)>,
    len: u64,
    reader: R,
) -> Reply {
    if metas.is_empty() {
        return Reply::Stream {
            headers: vec![
                ("Content-Type", "application/octet-stream".into()),
                ("Content-Length", len.to_string()),
            ],
            writer: Box::new(move |out: &mut dyn std::io::Write| {
                copy_exact(reader, len, out)
            }),
        };
    }

    let mp = Multipart::new();
    let key = key.to_string();
    Reply::Stream {
        headers: vec![("Content-Type", mp.content_type())],
        writer: Box::new(move |out: &mut dyn std::io::Write| {
            for (name, content) in metas.iter() {
                mp.write_part(out, name, content)?;
            }
            mp.write_part_head(out, &key, len)?;
            copy_exact(reader, len, out)?;
            mp.write_end(out)
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn meta_names() {
        assert_eq!("k.owner.meta", meta_member_name("k", "owner"));
        assert!(is_meta_of("k.owner.meta", "k"));
        assert!(!is_meta_of("k.meta", "k"));
        assert!(!is_meta_of("kk.owner.meta", "k"));
        assert!(!is_meta_of("k.owner", "k"));
        assert!(!is_meta_of("k", "k"));
    }

    fn drain(reply: Reply) -> (Vec<(&'static str, String)>, Vec<u8>) {
        match reply {
            Reply::Stream { headers, writer } => {
                let mut out = Vec::new();
                writer(&mut out).unwrap();
                (headers, out)
            }
            Reply::Full { .. } => panic!("expected a stream"),
        }
    }

    #[test]
    fn raw_payload_reply() {
        let reader = std::io::Cursor::new(b"abcdef".to_vec());
        let (headers, body) = drain(payload_reply("k", vec![], 3, reader));
        assert!(headers.contains(&("Content-Length", "3".to_string())));
        assert_eq!(b"abc".to_vec(), body);
    }

    #[test]
    fn multipart_payload_reply() {
        let (headers, body) = drain(payload_reply(
            "k",
            vec![("k.a.meta".to_string(), b"m".to_vec())],
            3,
            std::io::Cursor::new(b"abc".to_vec()),
        ));
        let ct =
            &headers.iter().find(|(k, _)| *k == "Content-Type").unwrap().1;
        let boundary = ct.rsplit_once("boundary=").unwrap().1;
        assert_eq!(
            vec![
                ("k.a.meta".to_string(), b"m".to_vec()),
                ("k".to_string(), b"abc".to_vec()),
            ],
            split_parts(&body, boundary).unwrap(),
        );
    }

    #[test]
    fn short_payload_is_an_error() {
        let reader = std::io::Cursor::new(b"abc".to_vec());
        match payload_reply("k", vec![], 10, reader) {
            Reply::Stream { writer, .. } => {
                let mut out = Vec::new();
                assert!(writer(&mut out).is_err());
            }
            Reply::Full { .. } => panic!("expected a stream"),
        }
    }
}
