#![deny(missing_docs)]
//! Fragstore storage node: an HTTP REST server storing content-addressed
//! fragments on behalf of authenticated peers.
//!
//! Peers upload fragments under their content address, prove later that
//! the node still holds them by asking for the hash of arbitrary byte
//! ranges, fetch them back, and drop their ownership when they no longer
//! need the node to keep them. Small fragments of one peer are packed
//! into that peer's tar container (see [fragstore_archive]), everything
//! else is kept as a reference counted standalone file.
//!
//! Every operation except `/health` and `/id` sits behind a
//! challenge/response gate proving that the requester controls the key
//! it presents and that it belongs to the node's trust group.
//!
//! For the wire protocol, please see [protocol].

/// This is a documentation module describing the fragstore node protocol.
///
/// #### 1. Types
///
/// All base64 in this protocol uses the url safe alphabet (with `-` and
/// `_`) and no padding characters (`=`), see
/// <https://datatracker.ietf.org/doc/html/rfc4648#section-5>.
///
/// - `StorageKey` - base64UrlSafeNoPad SHA-256 of the fragment content,
///   43 characters.
/// - `Dec` - a decimal integer string.
/// - `NodeIdHex` - lowercase hex SHA-256 of the exported public key
///   `{"e":"<Dec exponent>","n":"<Dec modulus>"}`.
///
/// #### 2. REST API
///
/// Every request but `/health` carries `publicKeyExponent`,
/// `publicKeyModulus` and `port` query parameters identifying the
/// requester. An optional `nodeId` must match the key if present.
///
/// ```text
/// ErrResponse = { "error": string }
/// ```
///
/// - `GET /health`
///   - Response Body: `{}`
/// - `GET /id?nodeId=..`
///   - Response Body: `{ "nodeId": NodeIdHex, "publicKeyExponent": Dec,
///     "publicKeyModulus": Dec }`
/// - `POST /file/<StorageKey>?size=..[&metakey=..&meta=..]`
///   - Request Body: the fragment, or a whole `.tar` / `.tar.gz`
///     container when the key ends in that suffix.
///   - Response Body: `{ "stored": key, "location": "fragment" |
///     "container" }`
/// - `GET /file/<StorageKey>[?withMeta=false]`
///   - Response Body: the fragment, or a `multipart/related` body when
///     metadata is attached.
/// - `GET /hash/<StorageKey>?offset=..&length=..[&metakey=..&meta=..]`
///   - Response Body: the `StorageKey` encoding of the selected range.
/// - `DELETE /file/<StorageKey>?metakey=..`
///   - Response Body: `{ "deleted": key, "removed": bool }`
///
/// Only `POST` takes a container name as its key. Every other route
/// wants a `StorageKey`, anything else is a 400.
///
/// Status codes: 200 success, 400 malformed or out of range, 401
/// challenge issued, 403 authentication failed, 404 not found, 409 the
/// content does not hash to its key.
///
/// #### 3. Authentication
///
/// - A request without credentials gets a 401 with
///   `WWW-Authenticate: Basic realm="default"` and `Connection: close`.
///   The challenge is in the `x-fragstore-challenge` header and in the
///   body as `challenge = <value>`: base64 of
///   `RSA-PKCS1v15(requesterKey, serverNodeId[32] ++ nonce[40])`.
/// - The requester repeats the request with HTTP Basic credentials:
///   user `base64(nonce)`, password the group credential
///   `base64(SHA-256(exportedRequesterKey ++ groupSecret))`.
/// - A nonce is accepted once, and only within
///   `request_timeout * challenge_ttl_multiplier` of being issued.
///
/// #### 4. Storage
///
/// - Standalone fragments are stored as `<StorageKey>` beside an
///   `<StorageKey>.owners` json record listing owners and their metadata.
/// - Each peer has at most one `<NodeIdHex>.tar.gz` and one
///   `<NodeIdHex>.tar`. Lookups try the standalone fragment first, then the
///   gzip container, then the plain one.
/// - Metadata members are named `<StorageKey>.<metakey>.meta`. Deleting
///   the last metadata member of a packed fragment deletes the fragment.
#[cfg(doc)]
pub mod protocol {}

mod config;
pub use config::*;

mod error;
pub use error::*;

mod crypto;
pub use crypto::*;

mod challenge;
pub use challenge::*;

mod peer;
pub use peer::*;

mod locks;
pub use locks::*;

mod fragments;
pub use fragments::*;

mod params;
pub use params::*;

mod multipart;
pub use multipart::*;

mod http;
pub use http::{
    BodyWriter, Headers, Reply, CHALLENGE_HEADER, PROTOCOL_HEADER,
    PROTOCOL_VERSION, SERVER_NAME,
};
use http::*;

mod auth;
pub use auth::*;

mod tls;
pub use tls::*;

mod ops;
use ops::*;

mod server;
pub use server::*;
