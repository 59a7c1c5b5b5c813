//! Flux marshal (version 3/4 de CPython 3.4) et en-tête `.pyc`.
//!
//! En-tête `.pyc` 3.4 : magic u16 LE + `\r\n`, mtime u32 LE, taille source u32 LE,
//! puis un objet code marshalé.

use javelin_core::{ByteReader, ByteWriter};
use tracing::debug;

use crate::{CodeFlags, CodeObject, PyConst, PycError, Result};

/// Magic écrit par [`write_pyc`] (CPython 3.4 final).
pub const MAGIC_3_4: u16 = 3310;
/// Plage des magics 3.4 acceptés en lecture (alphas → final).
pub const MAGIC_RANGE: std::ops::RangeInclusive<u16> = 3250..=3310;

const FLAG_REF: u8 = 0x80;

/// En-tête d'un fichier `.pyc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PycHeader {
    /// Magic (3250..=3310).
    pub magic: u16,
    /// Horodatage de la source.
    pub mtime: u32,
    /// Taille de la source.
    pub source_size: u32,
}

/// Lit un fichier `.pyc` : en-tête et objet code.
pub fn read_pyc(bytes: &[u8]) -> Result<(PycHeader, CodeObject)> {
    let mut r = ByteReader::new(bytes);
    let magic = r.read_u16_le()?;
    if !MAGIC_RANGE.contains(&magic) || r.read_bytes(2)? != b"\r\n" {
        return Err(PycError::BadMagic(magic));
    }
    let header = PycHeader { magic, mtime: r.read_u32_le()?, source_size: r.read_u32_le()? };
    let mut reader = Reader { r, refs: Vec::new() };
    let at = reader.r.offset();
    let code = match reader.object()? {
        PyConst::Code(code) => *code,
        _ => return Err(PycError::Unexpected { expected: "code object", at }),
    };
    reader.r.expect_end("pyc")?;
    debug!(name = %code.name, magic, refs = reader.refs.len(), "pyc loaded");
    Ok((header, code))
}

/// Produit un fichier `.pyc` 3.4.
pub fn write_pyc(code: &CodeObject, mtime: u32, source_size: u32) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u16_le(MAGIC_3_4);
    w.write_bytes(b"\r\n");
    w.write_u32_le(mtime);
    w.write_u32_le(source_size);
    dump_code(&mut w, code);
    w.into_vec()
}

/// Décode un objet marshal isolé.
pub fn loads(bytes: &[u8]) -> Result<PyConst> {
    let mut reader = Reader { r: ByteReader::new(bytes), refs: Vec::new() };
    let value = reader.object()?;
    reader.r.expect_end("marshal")?;
    Ok(value)
}

/// Encode une valeur (sans références arrière).
pub fn dumps(value: &PyConst) -> Vec<u8> {
    let mut w = ByteWriter::new();
    dump(&mut w, value);
    w.into_vec()
}

/* ───────────────────────────── Lecture ───────────────────────────── */

struct Reader<'a> {
    r: ByteReader<'a>,
    refs: Vec<Option<PyConst>>,
}

impl Reader<'_> {
    fn length(&mut self) -> Result<usize> {
        let at = self.r.offset();
        let n = self.r.read_i32_le()?;
        usize::try_from(n).map_err(|_| PycError::Unexpected { expected: "non-negative length", at })
    }

    fn object(&mut self) -> Result<PyConst> {
        let at = self.r.offset();
        let byte = self.r.read_u8()?;
        let (code, flagged) = (byte & !FLAG_REF, byte & FLAG_REF != 0);
        // FLAG_REF réserve l'index avant les enfants (ordre de `r_ref_reserve`).
        let slot = flagged.then(|| {
            self.refs.push(None);
            self.refs.len() - 1
        });
        let value = match code {
            b'0' => return Err(PycError::Unexpected { expected: "object (got NULL)", at }),
            b'N' => PyConst::None,
            b'F' => PyConst::Bool(false),
            b'T' => PyConst::Bool(true),
            b'S' => PyConst::StopIteration,
            b'.' => PyConst::Ellipsis,
            b'i' => PyConst::Int(i64::from(self.r.read_i32_le()?)),
            b'l' => PyConst::Int(self.long(at)?),
            b'g' => PyConst::Float(self.r.read_f64_le()?),
            b'y' => PyConst::Complex(self.r.read_f64_le()?, self.r.read_f64_le()?),
            b'f' => PyConst::Float(self.text_float(at)?),
            b'x' => PyConst::Complex(self.text_float(at)?, self.text_float(at)?),
            b's' => {
                let n = self.length()?;
                PyConst::Bytes(self.r.read_bytes(n)?.to_vec())
            }
            b't' | b'u' | b'a' | b'A' => {
                let n = self.length()?;
                PyConst::Str(self.text(n)?)
            }
            b'z' | b'Z' => {
                let n = usize::from(self.r.read_u8()?);
                PyConst::Str(self.text(n)?)
            }
            b'(' => {
                let n = self.length()?;
                PyConst::Tuple(self.items(n)?)
            }
            b')' => {
                let n = usize::from(self.r.read_u8()?);
                PyConst::Tuple(self.items(n)?)
            }
            b'[' => {
                let n = self.length()?;
                PyConst::List(self.items(n)?)
            }
            b'<' => {
                let n = self.length()?;
                PyConst::Set(self.items(n)?)
            }
            b'>' => {
                let n = self.length()?;
                PyConst::FrozenSet(self.items(n)?)
            }
            b'{' => {
                let mut entries = Vec::new();
                loop {
                    if self.peek()? == b'0' {
                        self.r.read_u8()?;
                        break;
                    }
                    let k = self.object()?;
                    let v = self.object()?;
                    entries.push((k, v));
                }
                PyConst::Dict(entries)
            }
            b'r' => {
                let index = self.r.read_u32_le()?;
                return self
                    .refs
                    .get(index as usize)
                    .cloned()
                    .flatten()
                    .ok_or(PycError::BadRef { index, at });
            }
            b'c' => PyConst::Code(Box::new(self.code()?)),
            other => return Err(PycError::UnknownType { code: other, at }),
        };
        if let Some(slot) = slot {
            self.refs[slot] = Some(value.clone());
        }
        Ok(value)
    }

    fn peek(&self) -> Result<u8> {
        let mut ahead = self.r.clone();
        Ok(ahead.read_u8()?)
    }

    fn items(&mut self, n: usize) -> Result<Vec<PyConst>> {
        let mut out = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            out.push(self.object()?);
        }
        Ok(out)
    }

    fn text(&mut self, n: usize) -> Result<String> { Ok(self.r.read_str(n)?.to_owned()) }

    fn text_float(&mut self, at: usize) -> Result<f64> {
        let n = usize::from(self.r.read_u8()?);
        let s = self.r.read_str(n)?;
        s.trim().parse().map_err(|_| PycError::Unexpected { expected: "float literal", at })
    }

    /// Entier long : nombre signé de chiffres base 2^15, poids faible d'abord.
    fn long(&mut self, at: usize) -> Result<i64> {
        let n = self.r.read_i32_le()?;
        let mut acc: i128 = 0;
        for i in 0..n.unsigned_abs() {
            let digit = i128::from(self.r.read_u16_le()?);
            if digit >= 1 << 15 {
                return Err(PycError::Unexpected { expected: "15-bit digit", at });
            }
            if i >= 5 {
                if digit != 0 {
                    return Err(PycError::IntOverflow { at });
                }
                continue;
            }
            acc |= digit << (15 * i);
        }
        let value = if n < 0 { -acc } else { acc };
        i64::try_from(value).map_err(|_| PycError::IntOverflow { at })
    }

    fn strings(&mut self, field: &'static str) -> Result<Vec<String>> {
        let at = self.r.offset();
        match self.object()? {
            PyConst::Tuple(items) => items
                .into_iter()
                .map(|item| match item {
                    PyConst::Str(s) => Ok(s),
                    _ => Err(PycError::Unexpected { expected: field, at }),
                })
                .collect(),
            _ => Err(PycError::Unexpected { expected: field, at }),
        }
    }

    fn string(&mut self, field: &'static str) -> Result<String> {
        let at = self.r.offset();
        match self.object()? {
            PyConst::Str(s) => Ok(s),
            _ => Err(PycError::Unexpected { expected: field, at }),
        }
    }

    fn bytes(&mut self, field: &'static str) -> Result<Vec<u8>> {
        let at = self.r.offset();
        match self.object()? {
            PyConst::Bytes(b) => Ok(b),
            _ => Err(PycError::Unexpected { expected: field, at }),
        }
    }

    fn count(&mut self) -> Result<u32> {
        let at = self.r.offset();
        let v = self.r.read_i32_le()?;
        u32::try_from(v).map_err(|_| PycError::Unexpected { expected: "non-negative count", at })
    }

    fn code(&mut self) -> Result<CodeObject> {
        let argcount = self.count()?;
        let kwonlyargcount = self.count()?;
        let nlocals = self.count()?;
        let stacksize = self.count()?;
        let flags = CodeFlags::from_bits_retain(self.count()?);
        let code = self.bytes("co_code bytes")?;
        let at = self.r.offset();
        let consts = match self.object()? {
            PyConst::Tuple(items) => items,
            _ => return Err(PycError::Unexpected { expected: "co_consts tuple", at }),
        };
        Ok(CodeObject {
            argcount,
            kwonlyargcount,
            nlocals,
            stacksize,
            flags,
            code,
            consts,
            names: self.strings("co_names tuple of str")?,
            varnames: self.strings("co_varnames tuple of str")?,
            freevars: self.strings("co_freevars tuple of str")?,
            cellvars: self.strings("co_cellvars tuple of str")?,
            filename: self.string("co_filename str")?,
            name: self.string("co_name str")?,
            firstlineno: self.count()?,
            lnotab: self.bytes("co_lnotab bytes")?,
        })
    }
}

/* ───────────────────────────── Écriture ───────────────────────────── */

fn write_len(w: &mut ByteWriter, n: usize) { w.write_i32_le(n as i32); }

fn dump_str(w: &mut ByteWriter, s: &str) {
    if s.is_ascii() && s.len() < 256 {
        w.write_u8(b'z');
        w.write_u8(s.len() as u8);
    } else {
        w.write_u8(b'u');
        write_len(w, s.len());
    }
    w.write_bytes(s.as_bytes());
}

fn dump_seq(w: &mut ByteWriter, tag: u8, items: &[PyConst]) {
    w.write_u8(tag);
    write_len(w, items.len());
    for item in items {
        dump(w, item);
    }
}

fn dump_strings(w: &mut ByteWriter, items: &[String]) {
    if items.len() < 256 {
        w.write_u8(b')');
        w.write_u8(items.len() as u8);
    } else {
        w.write_u8(b'(');
        write_len(w, items.len());
    }
    for s in items {
        dump_str(w, s);
    }
}

fn dump(w: &mut ByteWriter, value: &PyConst) {
    match value {
        PyConst::None => w.write_u8(b'N'),
        PyConst::Bool(false) => w.write_u8(b'F'),
        PyConst::Bool(true) => w.write_u8(b'T'),
        PyConst::StopIteration => w.write_u8(b'S'),
        PyConst::Ellipsis => w.write_u8(b'.'),
        PyConst::Int(v) => match i32::try_from(*v) {
            Ok(small) => {
                w.write_u8(b'i');
                w.write_i32_le(small);
            }
            Err(_) => {
                let mut magnitude = v.unsigned_abs();
                let mut digits = Vec::new();
                while magnitude != 0 {
                    digits.push((magnitude & 0x7FFF) as u16);
                    magnitude >>= 15;
                }
                w.write_u8(b'l');
                let n = digits.len() as i32;
                w.write_i32_le(if *v < 0 { -n } else { n });
                for d in digits {
                    w.write_u16_le(d);
                }
            }
        },
        PyConst::Float(f) => {
            w.write_u8(b'g');
            w.write_f64_le(*f);
        }
        PyConst::Complex(re, im) => {
            w.write_u8(b'y');
            w.write_f64_le(*re);
            w.write_f64_le(*im);
        }
        PyConst::Str(s) => dump_str(w, s),
        PyConst::Bytes(b) => {
            w.write_u8(b's');
            write_len(w, b.len());
            w.write_bytes(b);
        }
        PyConst::Tuple(items) if items.len() < 256 => {
            w.write_u8(b')');
            w.write_u8(items.len() as u8);
            for item in items {
                dump(w, item);
            }
        }
        PyConst::Tuple(items) => dump_seq(w, b'(', items),
        PyConst::List(items) => dump_seq(w, b'[', items),
        PyConst::Set(items) => dump_seq(w, b'<', items),
        PyConst::FrozenSet(items) => dump_seq(w, b'>', items),
        PyConst::Dict(entries) => {
            w.write_u8(b'{');
            for (k, v) in entries {
                dump(w, k);
                dump(w, v);
            }
            w.write_u8(b'0');
        }
        PyConst::Code(code) => dump_code(w, code),
    }
}

fn dump_code(w: &mut ByteWriter, code: &CodeObject) {
    w.write_u8(b'c');
    w.write_u32_le(code.argcount);
    w.write_u32_le(code.kwonlyargcount);
    w.write_u32_le(code.nlocals);
    w.write_u32_le(code.stacksize);
    w.write_u32_le(code.flags.bits());
    dump(w, &PyConst::Bytes(code.code.clone()));
    dump(w, &PyConst::Tuple(code.consts.clone()));
    dump_strings(w, &code.names);
    dump_strings(w, &code.varnames);
    dump_strings(w, &code.freevars);
    dump_strings(w, &code.cellvars);
    dump_str(w, &code.filename);
    dump_str(w, &code.name);
    w.write_u32_le(code.firstlineno);
    dump(w, &PyConst::Bytes(code.lnotab.clone()));
}
