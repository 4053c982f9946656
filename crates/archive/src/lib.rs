#![deny(missing_docs)]
//! Fragstore archive containers.
//!
//! A storage node packs many small content-addressed fragments into one
//! append-structured tar container per owning peer. This crate edits those
//! containers at the byte level: it never decodes and re-encodes a whole
//! archive, it walks the 512-byte header blocks, copies the bytes it wants
//! to keep verbatim, and renames the result into place.
//!
//! #### Container layout
//!
//! ```text
//! [header][payload, zero padded to 512][header][payload]...[zero][zero]
//! ```
//!
//! - Data members are named by the content address of their payload
//!   (see [content_address]).
//! - Metadata members are named `<storage-key>.<label>.meta` and hold an
//!   opaque blob supplied by the owning peer. They are exempt from digest
//!   verification.
//! - Exactly one end-of-archive marker (two all-zero blocks) terminates a
//!   container. Every edit writes a complete new file next to the old one
//!   and renames it over the original, so readers never observe a
//!   container without its end marker.
//!
//! #### Compression
//!
//! A container is either a plain `.tar` or a gzip `.tar.gz`. The splicing
//! primitives work on the uncompressed stream, so both variants support
//! the same operations; the gzip variant simply pays for decompression.

mod error;
pub use error::*;

mod address;
pub use address::*;

mod header;
pub use header::*;

mod splice;
pub use splice::*;

mod container;
pub use container::*;
