//! Wire escaping for protocol metacharacters.
//!
//! Certain bytes may not appear raw inside frame fields: NUL, `\x05`, `$`,
//! `` ` ``, `|` and `~`. Two escape spellings exist on the wire: the entity
//! form `&#NN;` used in ordinary fields, and the DCN form `/%DCNnnn%/` used
//! in lock and key exchanges. Decoding accepts both regardless of context.
//!
//! Everything here is pure; the rest of the crate and the daemon operate on
//! already-decoded strings.

/// Bytes that must be escaped inside a field.
pub const ESCAPE_SET: [u8; 6] = [0, 5, 36, 96, 124, 126];

#[inline]
fn needs_escape(b: u8) -> bool {
    matches!(b, 0 | 5 | 36 | 96 | 124 | 126)
}

/// Escape a text field using the entity form `&#NN;`.
///
/// Only ASCII metacharacters are rewritten, so valid UTF-8 stays valid.
pub fn escape(src: &str) -> String {
    let out = escape_bytes(src.as_bytes(), false);
    String::from_utf8_lossy(&out).into_owned()
}

/// Escape raw bytes using the DCN form `/%DCNnnn%/` (lock and key fields).
///
/// Keys are arbitrary bytes after the nibble swap, so this works on and
/// returns byte vectors.
pub fn escape_dcn(src: &[u8]) -> Vec<u8> {
    escape_bytes(src, true)
}

fn escape_bytes(src: &[u8], dcn: bool) -> Vec<u8> {
    let mut dest = Vec::with_capacity(src.len());

    for &b in src {
        if needs_escape(b) {
            if dcn {
                dest.extend_from_slice(format!("/%DCN{:03}%/", b).as_bytes());
            } else {
                dest.extend_from_slice(format!("&#{};", b).as_bytes());
            }
        } else {
            dest.push(b);
        }
    }

    dest
}

/// Decode both escape spellings back into raw bytes.
///
/// Unrecognized or truncated escapes are passed through verbatim, matching
/// what clients do with stray ampersands.
pub fn unescape(src: &[u8]) -> Vec<u8> {
    let mut dest = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        if let Some((value, used)) = match src[i] {
            b'/' => decode_dcn(&src[i..]),
            b'&' => decode_entity(&src[i..]),
            _ => None,
        } {
            dest.push(value);
            i += used;
        } else {
            dest.push(src[i]);
            i += 1;
        }
    }

    dest
}

/// `/%DCNnnn%/` with exactly three decimal digits.
fn decode_dcn(rest: &[u8]) -> Option<(u8, usize)> {
    if rest.len() < 10 || &rest[..5] != b"/%DCN" || &rest[8..10] != b"%/" {
        return None;
    }

    let digits = std::str::from_utf8(&rest[5..8]).ok()?;
    let value: u16 = digits.parse().ok()?;

    if value > 255 {
        return None;
    }

    Some((value as u8, 10))
}

/// `&#N;` through `&#NNN;`.
fn decode_entity(rest: &[u8]) -> Option<(u8, usize)> {
    if rest.len() < 4 || &rest[..2] != b"&#" {
        return None;
    }

    let end = rest.iter().take(6).position(|&b| b == b';')?;
    let digits = std::str::from_utf8(&rest[2..end]).ok()?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let value: u16 = digits.parse().ok()?;

    if value > 255 {
        return None;
    }

    Some((value as u8, end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_the_full_set() {
        let raw = "a\0b\x05c$d`e|f~g";
        assert_eq!(escape(raw), "a&#0;b&#5;c&#36;d&#96;e&#124;f&#126;g");
    }

    #[test]
    fn dcn_form_is_three_digit_padded() {
        assert_eq!(escape_dcn(&[0]), b"/%DCN000%/".to_vec());
        assert_eq!(escape_dcn(&[5]), b"/%DCN005%/".to_vec());
        assert_eq!(escape_dcn(&[36]), b"/%DCN036%/".to_vec());
        assert_eq!(escape_dcn(&[124]), b"/%DCN124%/".to_vec());
    }

    #[test]
    fn unescape_handles_both_spellings() {
        assert_eq!(unescape(b"&#36;"), vec![36]);
        assert_eq!(unescape(b"/%DCN036%/"), vec![36]);
        assert_eq!(unescape(b"a&#124;b/%DCN005%/c"), b"a|b\x05c".to_vec());
    }

    #[test]
    fn unescape_passes_through_garbage() {
        assert_eq!(unescape(b"&#x41;"), b"&#x41;".to_vec());
        assert_eq!(unescape(b"/%DCN1%/"), b"/%DCN1%/".to_vec());
        assert_eq!(unescape(b"&"), b"&".to_vec());
        assert_eq!(unescape(b"&#999;"), b"&#999;".to_vec());
    }

    #[test]
    fn utf8_text_passes_through_untouched() {
        let raw = "héllo wörld";
        assert_eq!(escape(raw), raw);
        assert_eq!(unescape(raw.as_bytes()), raw.as_bytes().to_vec());
    }

    #[test]
    fn roundtrip_every_byte_string() {
        for b in 0u16..=255 {
            let raw = vec![b as u8, b'x', b as u8];
            let escaped = escape_bytes(&raw, false);
            assert_eq!(unescape(&escaped), raw, "entity roundtrip of byte {b}");
            let escaped = escape_bytes(&raw, true);
            assert_eq!(unescape(&escaped), raw, "dcn roundtrip of byte {b}");
        }
    }
}
