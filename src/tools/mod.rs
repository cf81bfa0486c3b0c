//! Common utilities used across the toolkit.

use bytesize::KIB;
use sha2::{Digest, Sha256};

pub mod redact;
pub mod time;

/// Messages, payloads and bodies embedded into errors or log lines are truncated to this length.
pub const MAX_PAYLOAD_PRINT_LEN: usize = 8 * KIB as usize;

const ELLIPSIS: &str = "(...)";

/// Hex encoded SHA-256 over the given parts.
///
/// Every part is length-prefixed so that moving bytes from one part into
/// another yields a different digest.
pub fn digest<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }

    hex::encode(hasher.finalize())
}

/// Truncates a string to roughly `max_len` characters.
///
/// Long input keeps its head and its tail (half of `max_len` each) joined by `(...)`.
/// If `with_len` is set, the original length is prefixed as `(len): `.
///
/// # Example
/// ```
/// use connector_kit::tools::truncate_str;
///
/// assert_eq!(truncate_str("abcdefgh", 4, false), "ab(...)gh");
/// assert_eq!(truncate_str("abc", 4, true), "(3): abc");
/// ```
pub fn truncate_str(data: &str, max_len: usize, with_len: bool) -> String {
    let prefix = if with_len {
        format!("({}): ", data.len())
    } else {
        String::new()
    };

    if data.len() <= max_len {
        return format!("{}{}", prefix, data);
    }

    let half = max_len / 2;
    let head = floor_char_boundary(data, half);
    let tail = ceil_char_boundary(data, data.len() - half);

    format!("{}{}{}{}", prefix, &data[..head], ELLIPSIS, &data[tail..])
}

/// Like [`truncate_str`] for raw bytes, which are rendered lossily as UTF-8.
pub fn truncate_bytes(data: &[u8], max_len: usize, with_len: bool) -> String {
    let prefix = if with_len {
        format!("({}): ", data.len())
    } else {
        String::new()
    };

    if data.len() <= max_len {
        return format!("{}{}", prefix, String::from_utf8_lossy(data));
    }

    let half = max_len / 2;
    format!(
        "{}{}{}{}",
        prefix,
        String::from_utf8_lossy(&data[..half]),
        ELLIPSIS,
        String::from_utf8_lossy(&data[data.len() - half..])
    )
}

fn floor_char_boundary(data: &str, mut index: usize) -> usize {
    while index > 0 && !data.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(data: &str, mut index: usize) -> usize {
    while index < data.len() && !data.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Serde adapter storing byte buffers as standard base64 strings.
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
