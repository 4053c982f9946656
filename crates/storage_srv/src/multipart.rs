//! Multi-part framing for RETRIEVE responses carrying metadata.
//!
//! ```text
//! --<boundary>\r\n
//! Content-Type: Application/octet-stream\r\n
//! Content-ID: <name>\r\n
//! Content-Length: <len>\r\n
//! \r\n
//! <payload>\r\n
//! ... more parts ...
//! --<boundary>--\r\n
//! ```
//!
//! Metadata parts come first, named `<key>.<label>.meta`; the fragment
//! itself is the last part, named by its key.

use std::io::Write;

/// Writer of one multi-part body.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

impl Multipart {
    /// Use a fresh random boundary.
    pub fn new() -> Self {
        Self {
            boundary: hex::encode(crate::random_bytes(13)),
        }
    }

    /// The boundary token.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the response `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }

    /// Write the header block of a part whose payload follows.
    pub fn write_part_head<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        name: &str,
        len: u64,
    ) -> std::io::Result<()> {
        write!(
            writer,
            "--{}\r\nContent-Type: Application/octet-stream\r\n\
             Content-ID: {name}\r\nContent-Length: {len}\r\n\r\n",
            self.boundary,
        )
    }

    /// Write a complete part.
    pub fn write_part<W: Write + ?Sized>(
        &self,
        writer: &mut W,
        name: &str,
        content: &[u8],
    ) -> std::io::Result<()> {
        self.write_part_head(writer, name, content.len() as u64)?;
        writer.write_all(content)?;
        writer.write_all(b"\r\n")
    }

    /// Close the last part and the body.
    pub fn write_end<W: Write + ?Sized>(
        &self,
        writer: &mut W,
    ) -> std::io::Result<()> {
        write!(writer, "\r\n--{}--\r\n", self.boundary)
    }
}

/// Split a multi-part body into `(name, payload)` pairs.
///
/// This is the receiving half of [Multipart], used by peers fetching
/// fragments with metadata.
pub fn split_parts(
    body: &[u8],
    boundary: &str,
) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let bad = |why: &str| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("multipart: {why}"),
        )
    };

    let delim = format!("--{boundary}");
    let mut rest = body;
    let mut out = Vec::new();

    loop {
        rest = rest
            .strip_prefix(delim.as_bytes())
            .ok_or_else(|| bad("missing boundary"))?;
        if rest.starts_with(b"--") {
            return Ok(out);
        }
        rest = rest.strip_prefix(b"\r\n").ok_or_else(|| bad("bad boundary"))?;

        let head_end = rest
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| bad("unterminated part header"))?;
        let head = std::str::from_utf8(&rest[..head_end])
            .map_err(|_| bad("part header is not utf8"))?;
        rest = &rest[head_end + 4..];

        let mut name = None;
        let mut len = None;
        for line in head.split("\r\n") {
            if let Some((k, v)) = line.split_once(':') {
                match k.trim().to_ascii_lowercase().as_str() {
                    "content-id" => name = Some(v.trim().to_string()),
                    "content-length" => len = v.trim().parse::<usize>().ok(),
                    _ => (),
                }
            }
        }
        let name = name.ok_or_else(|| bad("part without Content-ID"))?;
        let len = len.ok_or_else(|| bad("part without Content-Length"))?;

        if rest.len() < len {
            return Err(bad("part shorter than its Content-Length"));
        }
        out.push((name, rest[..len].to_vec()));
        rest = rest[len..]
            .strip_prefix(b"\r\n")
            .ok_or_else(|| bad("part not followed by CRLF"))?;
    }
}
