//! The authentication gate wrapped around every storage operation.
//!
//! ```text
//!  request ──► identity check ──► credentials? ──no──► 401 + challenge
//!                   │                   │
//!                  400                 yes
//!                                       ▼
//!                              consume nonce ──fail──► 403 AuthFailed
//!                                       ▼
//!                              group credential ──fail──► 403 GroupAuthFailed
//!                                       ▼
//!                              record contact, run the operation
//! ```

use crate::*;
use base64::prelude::*;
use std::sync::Arc;

/// The peer a request came from.
#[derive(Debug, Clone)]
pub struct Requester {
    /// Presented public key.
    pub key: PublicKey,

    /// Hash of `key`.
    pub node_id: NodeId,

    /// Remote ip address.
    pub host: String,

    /// Port the requester says it listens on.
    pub port: u16,
}

impl Requester {
    /// Read the requester's key and port from `params`, checking an
    /// optional claimed `nodeId` against the key.
    pub fn from_params(params: &Params, host: &str) -> OpResult<Self> {
        let key = params.public_key()?;
        let port = params.port()?;
        let node_id = key.node_id();

        if let Some(claimed) = params.optional("nodeId") {
            if !claimed.eq_ignore_ascii_case(&node_id.to_hex()) {
                return Err(OpError::IdentityMismatch {
                    claimed: claimed.to_string(),
                    actual: node_id.to_hex(),
                });
            }
        }

        Ok(Self {
            key,
            node_id,
            host: host.to_string(),
            port,
        })
    }
}

/// A challenge response: the decrypted nonce and the group credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Nonce recovered from the challenge.
    pub nonce: Vec<u8>,

    /// Group credential, see [group_credential].
    pub group: String,
}

impl Credentials {
    /// Parse an `Authorization: Basic` header value. The user name is the
    /// base64url nonce, the password the group credential. Anything
    /// incomplete is treated as absent.
    pub fn from_basic(header: &str) -> Option<Self> {
        let (scheme, encoded) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = BASE64_STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, password) = decoded.split_once(':')?;
        if user.is_empty() || password.is_empty() {
            return None;
        }
        let nonce = BASE64_URL_SAFE_NO_PAD.decode(user).ok()?;
        if nonce.is_empty() {
            return None;
        }
        Some(Self {
            nonce,
            group: password.to_string(),
        })
    }

    /// Encode as an `Authorization` header value.
    pub fn to_basic(&self) -> String {
        let user = BASE64_URL_SAFE_NO_PAD.encode(&self.nonce);
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{user}:{}", self.group))
        )
    }
}

/// Proof of trust group membership: base64url of
/// `SHA-256(exported_key ++ group_secret)`.
pub fn group_credential(exported_key: &[u8], group_secret: &str) -> String {
    let mut buf = exported_key.to_vec();
    buf.extend_from_slice(group_secret.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(crate::sha256(&buf))
}

/// Answer a challenge received from the node `server_id`.
///
/// This is the requesting side of the exchange.
pub fn answer_challenge(
    node_key: &NodeKey,
    server_id: &NodeId,
    encrypted: &str,
    group_secret: &str,
) -> Result<Credentials, CryptoError> {
    let encrypted = BASE64_URL_SAFE_NO_PAD
        .decode(encrypted.trim())
        .map_err(|err| CryptoError(format!("challenge encoding: {err}")))?;
    let plain = node_key.decrypt(&encrypted)?;
    let nonce = plain
        .strip_prefix(server_id.as_bytes().as_slice())
        .ok_or_else(|| CryptoError("challenge from unexpected node".into()))?;
    Ok(Credentials {
        nonce: nonce.to_vec(),
        group: group_credential(&node_key.public().export(), group_secret),
    })
}

/// Gate issuing and checking challenges.
pub struct AuthGate {
    node: Arc<NodeKey>,
    challenges: ChallengeRegistry,
    group_secret: String,
    peers: DynPeerReputation,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("node", self.node.node_id())
            .field("challenges", &self.challenges)
            .finish()
    }
}

impl AuthGate {
    /// Construct a gate for the node owning `node`.
    pub fn new(
        node: Arc<NodeKey>,
        challenges: ChallengeRegistry,
        group_secret: String,
        peers: DynPeerReputation,
    ) -> Self {
        Self {
            node,
            challenges,
            group_secret,
            peers,
        }
    }

    /// The challenge registry.
    pub fn challenges(&self) -> &ChallengeRegistry {
        &self.challenges
    }

    /// Run `op` for `requester` if `authorization` answers a live
    /// challenge. Without credentials a new challenge is returned instead.
    pub fn authenticate<F>(
        &self,
        op_name: &str,
        requester: &Requester,
        authorization: Option<&str>,
        op: F,
    ) -> OpResult<Reply>
    where
        F: FnOnce() -> OpResult<Reply>,
    {
        let creds = match authorization.and_then(Credentials::from_basic) {
            None => return self.challenge(op_name, requester),
            Some(creds) => creds,
        };

        if !self.challenges.consume(&creds.nonce) {
            return Err(OpError::AuthChallengeFailed);
        }

        let expected =
            group_credential(&requester.key.export(), &self.group_secret);
        if creds.group != expected {
            return Err(OpError::AuthGroupFailed);
        }

        tracing::debug!(
            op = op_name,
            node = %requester.node_id,
            host = %requester.host,
            port = requester.port,
            "authenticated",
        );
        self.peers.record_contact(
            &requester.node_id,
            &requester.host,
            requester.port,
        );

        op()
    }

    fn challenge(
        &self,
        op_name: &str,
        requester: &Requester,
    ) -> OpResult<Reply> {
        let nonce = self.challenges.issue();

        let mut plain = self.node.node_id().as_bytes().to_vec();
        plain.extend_from_slice(&nonce);

        let encrypted = match requester.key.encrypt(&plain) {
            Ok(encrypted) => encrypted,
            Err(err) => {
                self.challenges.expire(&nonce);
                return Err(err.into());
            }
        };

        tracing::debug!(
            op = op_name,
            node = %requester.node_id,
            host = %requester.host,
            port = requester.port,
            "issuing challenge",
        );

        Ok(Reply::challenge(&BASE64_URL_SAFE_NO_PAD.encode(encrypted)))
    }
}
