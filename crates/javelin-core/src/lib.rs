//! javelin-core — primitives partagées
//!
//! Fournit :
//! - IO mémoire : `ByteWriter`, `ByteReader` (big-endian pour les class files,
//!   little-endian pour le flux marshal des `.pyc`)
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//!
//! Les deux formats manipulés par javelin ont des boutismes opposés, d'où les
//! deux familles de helpers (`_le` explicite, big-endian par défaut).

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::borrow::Cow;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use thiserror::Error;

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = Result<T, CoreError>;

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Fin de buffer inattendue.
    #[error("unexpected EOF: need {needed} bytes at {at}")]
    UnexpectedEof {
        /// Nombre d’octets manquants.
        needed: u64,
        /// Offset où l’erreur s’est produite.
        at: u64,
    },
    /// Longueur invalide (ex: dépasse le buffer ou la largeur du champ).
    #[error("invalid length for {section}: {len}")]
    InvalidLength {
        /// Nom de la section concernée.
        section: Cow<'static, str>,
        /// Longueur fautive.
        len: u64,
    },
    /// UTF-8 invalide.
    #[error("invalid utf-8 at offset {at}")]
    InvalidUtf8 {
        /// Offset du début de la chaîne.
        at: u64,
    },
    /// Données corrompues (format).
    #[error("corrupted: {0}")]
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { Self::Corrupted(msg.into()) }

    /// Construit une erreur de longueur.
    pub fn invalid_length(section: impl Into<Cow<'static, str>>, len: usize) -> Self {
        Self::InvalidLength { section: section.into(), len: len as u64 }
    }
}

/* ─────────────────────────── Byte Writer ─────────────────────────── */

/// Buffer d’écriture (croît automatiquement).
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Crée un writer vide.
    pub const fn new() -> Self { Self { buf: Vec::new() } }
    /// Accès en lecture au contenu.
    pub fn as_slice(&self) -> &[u8] { &self.buf }
    /// Récupère le buffer (consomme).
    pub fn into_vec(self) -> Vec<u8> { self.buf }
    /// Nombre d'octets déjà écrits.
    pub fn len(&self) -> usize { self.buf.len() }
    /// Vrai si rien n'a été écrit.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Ajoute des octets bruts.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }
    /// Écrit un octet.
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    /// Écrit un i8.
    pub fn write_i8(&mut self, v: i8) { self.buf.extend_from_slice(&v.to_be_bytes()); }

    /// Écrit un u16 big-endian.
    pub fn write_u16(&mut self, v: u16) {
        let mut b = [0; 2];
        BigEndian::write_u16(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un i16 big-endian.
    pub fn write_i16(&mut self, v: i16) {
        let mut b = [0; 2];
        BigEndian::write_i16(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un u32 big-endian.
    pub fn write_u32(&mut self, v: u32) {
        let mut b = [0; 4];
        BigEndian::write_u32(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un i32 big-endian.
    pub fn write_i32(&mut self, v: i32) {
        let mut b = [0; 4];
        BigEndian::write_i32(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un i64 big-endian.
    pub fn write_i64(&mut self, v: i64) {
        let mut b = [0; 8];
        BigEndian::write_i64(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un f32 big-endian (bits IEEE 754).
    pub fn write_f32(&mut self, v: f32) { self.write_u32(v.to_bits()); }
    /// Écrit un f64 big-endian (bits IEEE 754).
    pub fn write_f64(&mut self, v: f64) { self.write_i64(v.to_bits() as i64); }

    /// Écrit un u16 little-endian.
    pub fn write_u16_le(&mut self, v: u16) {
        let mut b = [0; 2];
        LittleEndian::write_u16(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un u32 little-endian.
    pub fn write_u32_le(&mut self, v: u32) {
        let mut b = [0; 4];
        LittleEndian::write_u32(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un i32 little-endian.
    pub fn write_i32_le(&mut self, v: i32) {
        let mut b = [0; 4];
        LittleEndian::write_i32(&mut b, v);
        self.write_bytes(&b);
    }
    /// Écrit un f64 little-endian.
    pub fn write_f64_le(&mut self, v: f64) {
        let mut b = [0; 8];
        LittleEndian::write_f64(&mut b, v);
        self.write_bytes(&b);
    }

    /// Réserve un u32 (préfixe de longueur) et renvoie sa position.
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.buf.len();
        self.write_u32(0);
        at
    }

    /// Réécrit un u32 big-endian déjà réservé.
    pub fn patch_u32(&mut self, at: usize, v: u32) -> CoreResult<()> {
        let slot = self
            .buf
            .get_mut(at..at + 4)
            .ok_or(CoreError::UnexpectedEof { needed: 4, at: at as u64 })?;
        BigEndian::write_u32(slot, v);
        Ok(())
    }

    /// Ferme un préfixe de longueur réservé par `reserve_u32` : la longueur
    /// couvre tout ce qui a été écrit depuis.
    pub fn close_length(&mut self, at: usize, section: &'static str) -> CoreResult<()> {
        let len = self.buf.len().saturating_sub(at + 4);
        let len32 = u32::try_from(len).map_err(|_| CoreError::invalid_length(section, len))?;
        self.patch_u32(at, len32)
    }
}

/* ─────────────────────────── Byte Reader ─────────────────────────── */

/// Lecteur séquentiel sur un slice d’octets.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    /// Construit un lecteur.
    pub const fn new(data: &'a [u8]) -> Self { Self { data, off: 0 } }
    /// Offset courant.
    pub const fn offset(&self) -> usize { self.off }
    /// Taille restante.
    pub const fn remaining(&self) -> usize { self.data.len().saturating_sub(self.off) }
    /// Vrai si tout a été consommé.
    pub const fn is_at_end(&self) -> bool { self.remaining() == 0 }

    /// Lit `n` octets (ou erreur si EOF).
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: self.off as u64 });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    /// Sous-lecteur sur les `n` prochains octets ; le lecteur courant avance d'autant.
    pub fn sub_reader(&mut self, n: usize) -> CoreResult<ByteReader<'a>> {
        Ok(ByteReader::new(self.read_bytes(n)?))
    }

    /// Lit une chaîne UTF-8 de `n` octets.
    pub fn read_str(&mut self, n: usize) -> CoreResult<&'a str> {
        let at = self.off as u64;
        let bytes = self.read_bytes(n)?;
        std::str::from_utf8(bytes).map_err(|_| CoreError::InvalidUtf8 { at })
    }

    /// Lit un octet.
    pub fn read_u8(&mut self) -> CoreResult<u8> { Ok(self.read_bytes(1)?[0]) }
    /// Lit un u16 BE.
    pub fn read_u16(&mut self) -> CoreResult<u16> { Ok(BigEndian::read_u16(self.read_bytes(2)?)) }
    /// Lit un i16 BE.
    pub fn read_i16(&mut self) -> CoreResult<i16> { Ok(BigEndian::read_i16(self.read_bytes(2)?)) }
    /// Lit un u32 BE.
    pub fn read_u32(&mut self) -> CoreResult<u32> { Ok(BigEndian::read_u32(self.read_bytes(4)?)) }
    /// Lit un i32 BE.
    pub fn read_i32(&mut self) -> CoreResult<i32> { Ok(BigEndian::read_i32(self.read_bytes(4)?)) }
    /// Lit un i64 BE.
    pub fn read_i64(&mut self) -> CoreResult<i64> { Ok(BigEndian::read_i64(self.read_bytes(8)?)) }
    /// Lit un f32 BE.
    pub fn read_f32(&mut self) -> CoreResult<f32> { Ok(f32::from_bits(self.read_u32()?)) }
    /// Lit un f64 BE.
    pub fn read_f64(&mut self) -> CoreResult<f64> { Ok(BigEndian::read_f64(self.read_bytes(8)?)) }

    /// Lit un u16 LE.
    pub fn read_u16_le(&mut self) -> CoreResult<u16> { Ok(LittleEndian::read_u16(self.read_bytes(2)?)) }
    /// Lit un u32 LE.
    pub fn read_u32_le(&mut self) -> CoreResult<u32> { Ok(LittleEndian::read_u32(self.read_bytes(4)?)) }
    /// Lit un i32 LE.
    pub fn read_i32_le(&mut self) -> CoreResult<i32> { Ok(LittleEndian::read_i32(self.read_bytes(4)?)) }
    /// Lit un f64 LE.
    pub fn read_f64_le(&mut self) -> CoreResult<f64> { Ok(LittleEndian::read_f64(self.read_bytes(8)?)) }

    /// Échoue si des octets restent après la fin attendue d'une section.
    pub fn expect_end(&self, section: &'static str) -> CoreResult<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(CoreError::invalid_length(section, self.remaining()))
        }
    }
}

/* ─────────────────────────── Prélude (reexports utiles) ─────────────────────────── */

/// Prélude pratique pour importer les types clés du crate.
pub mod prelude {
    /// Réexports utiles pour une importation rapide.
    pub use super::{ByteReader, ByteWriter, CoreError, CoreResult};
}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn writer_reader_be() -> CoreResult<()> {
        let mut w = ByteWriter::new();
        w.write_u32(0xCAFE_BABE);
        w.write_u16(49);
        w.write_i16(-3);
        w.write_i64(-42);
        w.write_f32(1.5);
        w.write_f64(3.5);

        assert_eq!(&w.as_slice()[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u32()?, 0xCAFE_BABE);
        assert_eq!(r.read_u16()?, 49);
        assert_eq!(r.read_i16()?, -3);
        assert_eq!(r.read_i64()?, -42);
        assert_eq!(r.read_f32()?, 1.5);
        assert_eq!(r.read_f64()?, 3.5);
        r.expect_end("test")
    }

    #[test]
    fn little_endian_helpers() -> CoreResult<()> {
        let mut w = ByteWriter::new();
        w.write_u32_le(3310);
        w.write_i32_le(-1);
        assert_eq!(&w.as_slice()[..2], &[0xEE, 0x0C]);
        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u32_le()?, 3310);
        assert_eq!(r.read_i32_le()?, -1);
        Ok(())
    }

    #[test]
    fn eof_is_reported_with_offset() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        assert_eq!(r.read_u16().ok(), Some(0x0102));
        assert_eq!(r.read_u32(), Err(CoreError::UnexpectedEof { needed: 4, at: 2 }));
    }

    #[test]
    fn length_prefix_is_patched() -> CoreResult<()> {
        let mut w = ByteWriter::new();
        w.write_u16(7);
        let at = w.reserve_u32();
        w.write_bytes(b"abc");
        w.close_length(at, "attribute")?;
        assert_eq!(w.as_slice(), &[0, 7, 0, 0, 0, 3, b'a', b'b', b'c']);
        Ok(())
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let r = ByteReader::new(&[0]);
        assert!(matches!(r.expect_end("class"), Err(CoreError::InvalidLength { len: 1, .. })));
    }

    proptest! {
        #[test]
        fn mixed_widths_roundtrip(a in any::<u16>(), b in any::<i32>(), c in any::<i64>(), d in any::<u32>()) {
            let mut w = ByteWriter::new();
            w.write_u16(a);
            w.write_i32(b);
            w.write_i64(c);
            w.write_u32_le(d);
            let mut r = ByteReader::new(w.as_slice());
            prop_assert_eq!(r.read_u16().ok(), Some(a));
            prop_assert_eq!(r.read_i32().ok(), Some(b));
            prop_assert_eq!(r.read_i64().ok(), Some(c));
            prop_assert_eq!(r.read_u32_le().ok(), Some(d));
            prop_assert!(r.is_at_end());
        }
    }
}
