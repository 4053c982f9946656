//! Archive error types.

/// Errors raised while walking or editing a container.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A header block could not be interpreted.
    #[error("ArchiveCorrupt at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset of the offending header block.
        offset: u64,

        /// What was wrong with it.
        reason: &'static str,
    },

    /// The input ended before the end-of-archive marker.
    #[error("ArchiveTruncated: end-of-archive marker not found")]
    Truncated,

    /// A data member's payload does not hash to its name.
    #[error("DigestMismatch: member {name} hashes to {computed}")]
    DigestMismatch {
        /// The member name (the claimed storage key).
        name: String,

        /// The content address actually computed from the payload.
        computed: String,
    },

    /// A member name does not fit in a ustar header.
    #[error("NameTooLong: {0}")]
    NameTooLong(String),

    /// Underlying filesystem error.
    #[error("Io: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Construct a corrupt-header error.
    pub fn corrupt(offset: u64, reason: &'static str) -> Self {
        Self::Corrupt { offset, reason }
    }
}

/// Archive result type.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            "ArchiveCorrupt at offset 1024: bad size field",
            ArchiveError::corrupt(1024, "bad size field").to_string(),
        );
        assert_eq!(
            "ArchiveTruncated: end-of-archive marker not found",
            ArchiveError::Truncated.to_string(),
        );
    }

    #[test]
    fn ensure_archive_error_is_send_and_sync() {
        fn ensure<T: std::error::Error + Send + Sync + 'static>(_t: T) {}
        ensure(ArchiveError::Truncated);
    }
}
