//! Operation error types.

use fragstore_archive::ArchiveError;

/// Failure of a storage operation.
///
/// Every variant maps onto one response status, see [OpError::status].
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    /// A required parameter is missing or unparseable.
    #[error("MalformedRequest: {0}")]
    MalformedRequest(String),

    /// The claimed node id is not the hash of the presented key.
    #[error("IdentityMismatch: claimed {claimed}, key hashes to {actual}")]
    IdentityMismatch {
        /// Node id sent by the requester.
        claimed: String,

        /// Node id derived from the presented key.
        actual: String,
    },

    /// The challenge nonce is unknown, expired or already used.
    #[error("AuthFailed")]
    AuthChallengeFailed,

    /// The group credential is wrong.
    #[error("GroupAuthFailed")]
    AuthGroupFailed,

    /// Uploaded content does not hash to the key it was stored under.
    #[error("NonCanonicalKey: {0}")]
    NonCanonicalKey(String),

    /// The key is neither a standalone fragment nor in the requester's
    /// containers.
    #[error("NotFound: {0}")]
    NotFound(String),

    /// The requested byte range lies outside the fragment.
    #[error("BadRange: offset {offset} length {length} size {size}")]
    BadRange {
        /// Requested offset.
        offset: u64,

        /// Requested length.
        length: u64,

        /// Fragment size.
        size: u64,
    },

    /// Container structure error.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Key handling error.
    #[error(transparent)]
    Crypto(#[from] crate::CryptoError),

    /// Filesystem error.
    #[error("Io: {0}")]
    Io(#[from] std::io::Error),
}

impl OpError {
    /// Construct a malformed request error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// The http status this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            Self::MalformedRequest(_)
            | Self::IdentityMismatch { .. }
            | Self::BadRange { .. } => 400,
            Self::AuthChallengeFailed | Self::AuthGroupFailed => 403,
            Self::NotFound(_) => 404,
            Self::NonCanonicalKey(_) => 409,
            Self::Archive(_) | Self::Crypto(_) | Self::Io(_) => 500,
        }
    }
}

/// Operation result type.
pub type OpResult<T> = Result<T, OpError>;
