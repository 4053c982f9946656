//! Node identity and the asymmetric key provider.
//!
//! Keys are RSA. A requester presents its public key as decimal exponent
//! and modulus strings; the canonical exported form of a key is the json
//! object `{"e":"<decimal>","n":"<decimal>"}`, and a node id is the
//! SHA-256 of that export.

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// Key handling failure.
#[derive(Debug, thiserror::Error)]
#[error("Crypto: {0}")]
pub struct CryptoError(pub String);

impl CryptoError {
    fn other(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// `len` bytes from the thread rng.
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut out = vec![0; len];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

/// Identifier of a node: the hash of its exported public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 32]);

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl NodeId {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, as used in container file names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut out = [0; 32];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Self(out))
    }
}

/// A public key presented by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Build from decimal exponent and modulus strings.
    pub fn from_components(
        exponent: &str,
        modulus: &str,
    ) -> Result<Self, CryptoError> {
        let parse = |what: &str, s: &str| {
            BigUint::parse_bytes(s.as_bytes(), 10)
                .ok_or_else(|| CryptoError(format!("invalid key {what}")))
        };
        let e = parse("exponent", exponent)?;
        let n = parse("modulus", modulus)?;
        Ok(Self(RsaPublicKey::new(n, e).map_err(CryptoError::other)?))
    }

    /// Decimal exponent.
    pub fn exponent(&self) -> String {
        self.0.e().to_string()
    }

    /// Decimal modulus.
    pub fn modulus(&self) -> String {
        self.0.n().to_string()
    }

    /// Canonical byte encoding.
    pub fn export(&self) -> Vec<u8> {
        serde_json::json!({
            "e": self.exponent(),
            "n": self.modulus(),
        })
        .to_string()
        .into_bytes()
    }

    /// The node id this key hashes to.
    pub fn node_id(&self) -> NodeId {
        NodeId(sha256(&self.export()))
    }

    /// Encrypt a short message (PKCS#1 v1.5).
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)
            .map_err(CryptoError::other)
    }
}

/// A node's own key pair.
pub struct NodeKey {
    key: RsaPrivateKey,
    public: PublicKey,
    id: NodeId,
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey").field("id", &self.id).finish()
    }
}

impl NodeKey {
    fn from_private(key: RsaPrivateKey) -> Self {
        let public = PublicKey(key.to_public_key());
        let id = public.node_id();
        Self { key, public, id }
    }

    /// Generate a fresh key.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(CryptoError::other)?;
        Ok(Self::from_private(key))
    }

    /// Load the key stored at `path`, generating and saving one if the
    /// file does not exist. Without a path the key is ephemeral.
    pub fn load_or_generate(
        path: Option<&std::path::Path>,
        bits: usize,
    ) -> std::io::Result<Self> {
        let path = match path {
            None => {
                tracing::info!("using an ephemeral node key");
                return Self::generate(bits).map_err(std::io::Error::other);
            }
            Some(path) => path,
        };

        match std::fs::read_to_string(path) {
            Ok(pem) => {
                let key = RsaPrivateKey::from_pkcs8_pem(&pem)
                    .map_err(std::io::Error::other)?;
                tracing::info!(?path, "loaded node key");
                Ok(Self::from_private(key))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let this = Self::generate(bits).map_err(std::io::Error::other)?;
                let pem = this
                    .key
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(std::io::Error::other)?;
                std::fs::write(path, pem.as_bytes())?;
                tracing::info!(?path, id = %this.id, "generated node key");
                Ok(this)
            }
            Err(err) => Err(err),
        }
    }

    /// The public half.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// This node's id.
    pub fn node_id(&self) -> &NodeId {
        &self.id
    }

    /// Decrypt a message encrypted under [NodeKey::public].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.key
            .decrypt(Pkcs1v15Encrypt, data)
            .map_err(CryptoError::other)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn components_round_trip_to_the_same_id() {
        let key = NodeKey::generate(1024).unwrap();
        let public = key.public();

        let parsed =
            PublicKey::from_components(&public.exponent(), &public.modulus())
                .unwrap();
        assert_eq!(public, &parsed);
        assert_eq!(key.node_id(), &parsed.node_id());
        assert_eq!(64, key.node_id().to_hex().len());
        assert_eq!(
            Some(*key.node_id()),
            NodeId::from_hex(&key.node_id().to_hex())
        );
    }

    #[test]
    fn export_format() {
        let key = NodeKey::generate(1024).unwrap();
        let exported = String::from_utf8(key.public().export()).unwrap();
        assert_eq!(
            format!(
                r#"{{"e":"{}","n":"{}"}}"#,
                key.public().exponent(),
                key.public().modulus()
            ),
            exported
        );
        assert_eq!("65537", key.public().exponent());
    }

    #[test]
    fn bad_components() {
        assert!(PublicKey::from_components("65537", "12ab").is_err());
        assert!(PublicKey::from_components("", "12").is_err());
    }

    #[test]
    fn encrypt_decrypt() {
        let key = NodeKey::generate(1024).unwrap();
        let msg = random_bytes(72);
        let enc = key.public().encrypt(&msg).unwrap();
        assert_ne!(msg, enc);
        assert_eq!(msg, key.decrypt(&enc).unwrap());
    }

    #[test]
    fn key_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.pem");

        let first = NodeKey::load_or_generate(Some(&path), 1024).unwrap();
        assert!(path.is_file());
        let second = NodeKey::load_or_generate(Some(&path), 1024).unwrap();
        assert_eq!(first.node_id(), second.node_id());

        let ephemeral = NodeKey::load_or_generate(None, 1024).unwrap();
        assert_ne!(first.node_id(), ephemeral.node_id());
    }
}
