//! Parsing of ICY metadata blocks.
//!
//! A metadata block is a sequence of `Key='value';` assignments padded with
//! NUL bytes up to a multiple of [`ICY_METADATA_BLOCK_SIZE`]:
//!
//! ```text
//! StreamTitle='Artist - Title';StreamUrl='http://example.com';\0\0\0
//! ```
//!
//! The scanner below is a single forward pass over the bytes: no regex, no
//! backtracking, so an adversarial block costs at most one linear scan of
//! 4080 bytes.

/// Unit of the ICY length byte (`length = byte * 16`).
pub const ICY_METADATA_BLOCK_SIZE: usize = 16;

/// Largest metadata block a station can announce (`255 * 16`).
pub const ICY_METADATA_MAX_LEN: usize = u8::MAX as usize * ICY_METADATA_BLOCK_SIZE;

/// Key carrying the "Now Playing" title.
pub const STREAM_TITLE_KEY: &str = "StreamTitle";

/// Key carrying the optional stream URL.
pub const STREAM_URL_KEY: &str = "StreamUrl";

/// Extracts the `StreamTitle` value of a metadata block.
///
/// Returns an empty string when the block carries no title: a block without
/// `StreamTitle=` is a normal outcome, not an error.
///
/// # Example
///
/// ```
/// use pmoicy::parse_stream_title;
///
/// let block = b"StreamTitle='Daft Punk - Da Funk';StreamUrl='';\0\0\0";
/// assert_eq!(parse_stream_title(block), "Daft Punk - Da Funk");
/// assert_eq!(parse_stream_title(b"\0\0\0\0"), "");
/// ```
pub fn parse_stream_title(block: &[u8]) -> String {
    icy_field(block, STREAM_TITLE_KEY).unwrap_or_default()
}

/// Looks up the first `key='value'` assignment of a metadata block.
///
/// The value stops at the first `'` that is not preceded by a backslash;
/// escaped quotes are returned as-is. Invalid UTF-8 is replaced lossily.
/// Returns `None` when the key is absent or its value is never closed.
pub fn icy_field(block: &[u8], key: &str) -> Option<String> {
    let start = find_value_start(block, key.as_bytes())?;
    let len = closing_quote(&block[start..])?;
    Some(String::from_utf8_lossy(&block[start..start + len]).into_owned())
}

/// Offset right after the first `key='` occurrence.
fn find_value_start(block: &[u8], key: &[u8]) -> Option<usize> {
    let needle_len = key.len() + 2;
    if block.len() < needle_len {
        return None;
    }

    (0..=block.len() - needle_len)
        .find(|&i| {
            block[i..i + key.len()] == *key
                && block[i + key.len()] == b'='
                && block[i + key.len() + 1] == b'\''
        })
        .map(|i| i + needle_len)
}

/// Length of the value up to its unescaped closing quote.
fn closing_quote(value: &[u8]) -> Option<usize> {
    let mut escaped = false;
    for (i, &b) in value.iter().enumerate() {
        match b {
            b'\\' => escaped = !escaped,
            b'\'' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}
