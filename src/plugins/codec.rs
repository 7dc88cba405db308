//! `EncodedList`: the wire format for lists of strings.
//!
//! Each entry is a `u32` little-endian byte count followed by that many UTF-8
//! bytes. Entries are concatenated with no header and no terminator, so the
//! empty list is the empty byte string. The same format is used for argument
//! names, argument values and result lines.

use super::error::DecodeError;

/// Width of the per-entry length prefix.
pub const PREFIX_LEN: usize = 4;

/// Longest entry the length prefix can describe.
pub const MAX_ENTRY_LEN: usize = u32::MAX as usize;

/// First entry of a result list that reports a failure instead of output.
///
/// The leading NUL keeps it out of the way of real text output.
pub const ERROR_MARKER: &str = "\0pagewire:error";

/// Encode a list of strings. Never fails.
///
/// # Panics
/// Panics if a single entry is longer than [`MAX_ENTRY_LEN`] bytes.
#[must_use]
pub fn encode<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let total = items
        .iter()
        .map(|item| PREFIX_LEN + item.as_ref().len())
        .sum();
    let mut out = Vec::with_capacity(total);
    for item in items {
        let bytes = item.as_ref().as_bytes();
        let len = u32::try_from(bytes.len()).expect("list entry exceeds u32::MAX bytes");
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

/// Decode a list of strings, never reading past `bytes.len()`.
///
/// # Errors
/// [`DecodeError::Truncated`] when a prefix or payload runs past the end,
/// [`DecodeError::InvalidEncoding`] when a payload is not UTF-8.
pub fn decode(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut items = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < PREFIX_LEN {
            return Err(DecodeError::Truncated {
                offset,
                needed: PREFIX_LEN,
                available: remaining,
            });
        }

        let mut prefix = [0u8; PREFIX_LEN];
        prefix.copy_from_slice(&bytes[offset..offset + PREFIX_LEN]);
        let len = u32::from_le_bytes(prefix) as usize;
        offset += PREFIX_LEN;

        let available = bytes.len() - offset;
        if len > available {
            return Err(DecodeError::Truncated {
                offset,
                needed: len,
                available,
            });
        }

        let payload = &bytes[offset..offset + len];
        let item = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidEncoding {
            index: items.len(),
        })?;
        items.push(item.to_owned());
        offset += len;
    }

    Ok(items)
}

/// Build a result list that signals failure with `details`.
#[must_use]
pub fn error_frame(details: &str) -> Vec<u8> {
    encode(&[ERROR_MARKER, details])
}

/// Split a decoded result into output lines or the failure it reports.
///
/// # Errors
/// Returns the detail text of an error frame.
pub fn into_result(mut items: Vec<String>) -> Result<Vec<String>, String> {
    if items.first().map(String::as_str) != Some(ERROR_MARKER) {
        return Ok(items);
    }
    if items.len() < 2 {
        return Err("plugin reported an unspecified error".to_string());
    }
    Err(items.swap_remove(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_list_is_zero_bytes() {
        let empty: [&str; 0] = [];
        assert!(encode(&empty).is_empty());
        assert_eq!(decode(&[]).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_layout_is_length_prefixed() {
        let bytes = encode(&["hi", ""]);
        assert_eq!(bytes, vec![2, 0, 0, 0, b'h', b'i', 0, 0, 0, 0]);
    }

    #[test]
    fn test_embedded_nul_survives() {
        let items = vec!["a\0b".to_string()];
        assert_eq!(decode(&encode(&items)).unwrap(), items);
    }

    #[test]
    fn test_partial_prefix_is_truncated() {
        let err = decode(&[1, 0]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 0,
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_payload_past_end_is_truncated() {
        let mut bytes = encode(&["hello"]);
        bytes.truncate(7);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 4,
                needed: 5,
                available: 3
            }
        );
    }

    #[test]
    fn test_huge_length_prefix_does_not_overflow() {
        let err = decode(&[0xff, 0xff, 0xff, 0xff, b'x']).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_invalid_utf8_reports_index() {
        let mut bytes = encode(&["ok"]);
        bytes.extend_from_slice(&[2, 0, 0, 0, 0xc3, 0x28]);
        assert_eq!(
            decode(&bytes).unwrap_err(),
            DecodeError::InvalidEncoding { index: 1 }
        );
    }

    #[test]
    fn test_error_frame_round_trip() {
        let items = decode(&error_frame("disk full")).unwrap();
        assert_eq!(into_result(items), Err("disk full".to_string()));
    }

    #[test]
    fn test_bare_error_marker() {
        let items = vec![ERROR_MARKER.to_string()];
        assert!(into_result(items).is_err());
    }

    #[test]
    fn test_plain_output_passes_through() {
        let items = vec!["line".to_string()];
        assert_eq!(into_result(items.clone()), Ok(items));
    }

    proptest! {
        #[test]
        fn prop_round_trip(items in proptest::collection::vec(".*", 0..16)) {
            prop_assert_eq!(decode(&encode(&items)).unwrap(), items);
        }

        #[test]
        fn prop_any_truncation_is_an_error(
            items in proptest::collection::vec(".+", 1..8),
            cut in 1usize..64,
        ) {
            let bytes = encode(&items);
            let cut = cut.min(bytes.len());
            let shortened = &bytes[..bytes.len() - cut];
            match decode(shortened) {
                // Cutting exactly at an entry boundary yields a shorter valid list.
                Ok(prefix) => prop_assert!(prefix.len() < items.len()),
                Err(err) => prop_assert!(
                    matches!(err, DecodeError::Truncated { .. }),
                    "unexpected error {:?}",
                    err
                ),
            }
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode(&bytes);
        }
    }
}
