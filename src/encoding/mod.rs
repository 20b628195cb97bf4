//! Encoding detection and transcoding.
//!
//! Pages, entity files and text includes are read from disk as bytes.
//! This module turns them into UTF-8 strings: a Byte Order Mark wins,
//! otherwise the `encoding=` label of the XML declaration (or text
//! declaration, for entity files) is honoured, otherwise UTF-8 is assumed.
//! Non-UTF-8 input is transcoded with `encoding_rs`.

use std::fmt;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// An error that occurs during encoding detection or transcoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingError {
    /// A human-readable description of the encoding error.
    pub message: String,
}

impl EncodingError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encoding error: {}", self.message)
    }
}

impl std::error::Error for EncodingError {}

/// Inspects the Byte Order Mark, returning the encoding it names and the
/// number of bytes it occupies.
///
/// # Examples
///
/// ```
/// use manxml::encoding::sniff_bom;
///
/// let (enc, skip) = sniff_bom(b"\xEF\xBB\xBF<page/>").unwrap();
/// assert_eq!(enc.name(), "UTF-8");
/// assert_eq!(skip, 3);
/// assert!(sniff_bom(b"<page/>").is_none());
/// ```
#[must_use]
pub fn sniff_bom(bytes: &[u8]) -> Option<(&'static Encoding, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some((UTF_8, 3)),
        [0xFE, 0xFF, ..] => Some((UTF_16BE, 2)),
        [0xFF, 0xFE, ..] => Some((UTF_16LE, 2)),
        _ => None,
    }
}

/// Extracts the `encoding` pseudo-attribute of a leading `<?xml ...?>`
/// declaration from ASCII-compatible bytes.
fn declared_label(bytes: &[u8]) -> Option<&str> {
    let head = bytes.strip_prefix(b"<?xml")?;
    let end = head.windows(2).position(|w| w == b"?>")?;
    let decl = std::str::from_utf8(&head[..end]).ok()?;

    let after = &decl[decl.find("encoding")? + "encoding".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &after[1..];
    Some(&value[..value.find(quote)?])
}

/// Transcodes `bytes` from the encoding named by `label` into UTF-8.
///
/// # Errors
///
/// Returns `EncodingError` if the label is not a known encoding or if the
/// bytes are malformed for it.
///
/// # Examples
///
/// ```
/// use manxml::encoding::transcode;
///
/// assert_eq!(transcode(b"caf\xE9", "ISO-8859-1").unwrap(), "café");
/// assert!(transcode(b"x", "no-such-charset").is_err());
/// ```
pub fn transcode(bytes: &[u8], label: &str) -> Result<String, EncodingError> {
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| EncodingError::new(format!("unsupported encoding: {label}")))?;
    decode_with(bytes, encoding)
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> Result<String, EncodingError> {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        return Err(EncodingError::new(format!(
            "malformed byte sequence for encoding {}",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}

/// Decodes raw XML bytes into a UTF-8 string.
///
/// The returned string never starts with a BOM.
///
/// # Errors
///
/// Returns `EncodingError` if the declared encoding is unknown or the bytes
/// are invalid for the detected encoding.
///
/// # Examples
///
/// ```
/// use manxml::encoding::decode_to_utf8;
///
/// let text = decode_to_utf8(b"<?xml version=\"1.0\"?><page/>").unwrap();
/// assert!(text.ends_with("<page/>"));
/// ```
pub fn decode_to_utf8(bytes: &[u8]) -> Result<String, EncodingError> {
    if let Some((encoding, skip)) = sniff_bom(bytes) {
        return decode_with(&bytes[skip..], encoding);
    }

    match declared_label(bytes) {
        Some(label) => {
            let encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| EncodingError::new(format!("unsupported encoding: {label}")))?;
            // A UTF-16 label without a BOM cannot be right for bytes whose
            // declaration we just read as ASCII.
            if encoding == UTF_16LE || encoding == UTF_16BE {
                return decode_with(bytes, UTF_8);
            }
            decode_with(bytes, encoding)
        }
        None => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| EncodingError::new("input is not valid UTF-8")),
    }
}
