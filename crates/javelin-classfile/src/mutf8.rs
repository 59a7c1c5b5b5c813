//! UTF-8 modifié, l'encodage des entrées `CONSTANT_Utf8`.
//!
//! Écarts avec l'UTF-8 standard : U+0000 s'écrit `C0 80`, et les caractères
//! hors BMP s'écrivent en paire de substitution, chaque moitié sur trois octets.

/// Encode `s` en UTF-8 modifié.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Décode de l'UTF-8 modifié ; `None` si l'entrée est mal formée ou si une
/// moitié de paire est isolée.
pub fn decode(bytes: &[u8]) -> Option<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            0x01..=0x7F => {
                units.push(u16::from(b));
                i += 1;
            }
            0xC0..=0xDF => {
                let b2 = *bytes.get(i + 1)?;
                if b2 & 0xC0 != 0x80 {
                    return None;
                }
                units.push((u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F));
                i += 2;
            }
            0xE0..=0xEF => {
                let b2 = *bytes.get(i + 1)?;
                let b3 = *bytes.get(i + 2)?;
                if b2 & 0xC0 != 0x80 || b3 & 0xC0 != 0x80 {
                    return None;
                }
                units.push(
                    (u16::from(b & 0x0F) << 12) | (u16::from(b2 & 0x3F) << 6) | u16::from(b3 & 0x3F),
                );
                i += 3;
            }
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode("java/lang/Object"), b"java/lang/Object".to_vec());
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']).as_deref(), Some("a\0b"));
    }

    #[test]
    fn supplementary_chars_become_surrogate_pairs() {
        let s = "snake \u{1F40D}";
        let bytes = encode(s);
        // 6 octets ASCII + 2 * 3 octets pour la paire
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode(&bytes).as_deref(), Some(s));
    }

    #[test]
    fn raw_zero_byte_is_rejected() {
        assert_eq!(decode(&[b'a', 0x00]), None);
    }
}
