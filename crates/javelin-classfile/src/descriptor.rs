//! Descripteurs de champs et de méthodes, réduits à ce dont la comptabilité
//! de pile a besoin : le nombre de mots qu'occupe chaque type.

use crate::{ClassFileError, Result};

/// Tailles des arguments et du retour d'une méthode, en mots de pile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodShape {
    /// Mots dépilés pour les arguments (receveur exclu).
    pub arg_words: u16,
    /// Mots empilés pour le résultat (0 pour `V`).
    pub ret_words: u8,
}

/// Lit un type de champ à partir de `i` ; rend `(mots, index suivant)`.
fn field_type(desc: &[u8], i: usize) -> Option<(u8, usize)> {
    match *desc.get(i)? {
        b'B' | b'C' | b'F' | b'I' | b'S' | b'Z' => Some((1, i + 1)),
        b'J' | b'D' => Some((2, i + 1)),
        b'L' => {
            let end = desc[i..].iter().position(|&b| b == b';')?;
            (end > 1).then_some((1, i + end + 1))
        }
        b'[' => {
            let mut j = i;
            while desc.get(j) == Some(&b'[') {
                j += 1;
            }
            let (_, next) = field_type(desc, j)?;
            Some((1, next))
        }
        _ => None,
    }
}

/// Mots d'un descripteur de champ (`J`/`D` → 2, les autres → 1).
pub fn field_words(desc: &str) -> Result<u8> {
    match field_type(desc.as_bytes(), 0) {
        Some((words, end)) if end == desc.len() => Ok(words),
        _ => Err(ClassFileError::BadDescriptor(desc.to_owned())),
    }
}

/// Lit un descripteur de méthode, par exemple `(Ljava/lang/String;I)V`.
pub fn method_shape(desc: &str) -> Result<MethodShape> {
    let bad = || ClassFileError::BadDescriptor(desc.to_owned());
    let bytes = desc.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(bad());
    }
    let mut i = 1;
    let mut arg_words: u16 = 0;
    while bytes.get(i) != Some(&b')') {
        let (words, next) = field_type(bytes, i).ok_or_else(bad)?;
        arg_words = arg_words.checked_add(u16::from(words)).ok_or_else(bad)?;
        i = next;
    }
    i += 1;
    let ret_words = if bytes.get(i) == Some(&b'V') && i + 1 == bytes.len() {
        0
    } else {
        match field_type(bytes, i) {
            Some((words, end)) if end == bytes.len() => words,
            _ => return Err(bad()),
        }
    };
    Ok(MethodShape { arg_words, ret_words })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shapes() -> Result<()> {
        assert_eq!(method_shape("()V")?, MethodShape { arg_words: 0, ret_words: 0 });
        assert_eq!(
            method_shape("(Ljava/util/Map;Ljava/lang/String;)Lorg/python/Object;")?,
            MethodShape { arg_words: 2, ret_words: 1 }
        );
        assert_eq!(method_shape("(JD[[I)J")?, MethodShape { arg_words: 5, ret_words: 2 });
        assert_eq!(field_words("D")?, 2);
        assert_eq!(field_words("[J")?, 1);
        Ok(())
    }

    #[test]
    fn malformed_descriptors() {
        for bad in ["", "V", "(", "(L;)V", "(I", "()", "()VV", "(Q)V", "()Ljava/lang/Object"] {
            assert!(method_shape(bad).is_err(), "{bad} should be rejected");
        }
        assert!(field_words("V").is_err());
        assert!(field_words("II").is_err());
    }
}
