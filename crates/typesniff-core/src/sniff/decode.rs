//! Source encoding detection ahead of the XML reader.
//!
//! The reader parses UTF-8 only. Documents carrying a UTF-16 byte order mark,
//! or declaring another ASCII-compatible encoding in their XML declaration,
//! are transcoded to UTF-8 before they reach it.

use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

/// The encoding `head` must be transcoded from, or `None` for UTF-8.
///
/// `head` is the start of the document. A byte order mark wins over the
/// declaration.
pub(crate) fn transcoding(head: &[u8]) -> Option<&'static Encoding> {
    let encoding = match Encoding::for_bom(head) {
        Some((encoding, _)) => encoding,
        None if head.starts_with(b"<\0?\0") => UTF_16LE,
        None if head.starts_with(b"\0<\0?") => UTF_16BE,
        // A readable declaration naming UTF-16 is mislabelled.
        None => declared_encoding(head).filter(|e| e.is_ascii_compatible())?,
    };
    (encoding != UTF_8).then_some(encoding)
}

/// Encoding named by the `encoding` pseudo-attribute of the XML declaration.
fn declared_encoding(head: &[u8]) -> Option<&'static Encoding> {
    let rest = head.strip_prefix(b"<?xml")?;
    let end = rest.windows(2).position(|w| w == b"?>")?;
    let decl = &rest[..end];

    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let value = decl[at + 8..]
        .trim_ascii_start()
        .strip_prefix(b"=")?
        .trim_ascii_start();
    let (&quote, value) = value.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let end = value.iter().position(|&b| b == quote)?;
    Encoding::for_label(&value[..end])
}
