//! Objets code CPython et leurs constantes.

use bitflags::bitflags;

bitflags! {
    /// `co_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CodeFlags: u32 {
        /// `CO_OPTIMIZED`
        const OPTIMIZED = 0x0001;
        /// `CO_NEWLOCALS`
        const NEWLOCALS = 0x0002;
        /// `CO_VARARGS`
        const VARARGS = 0x0004;
        /// `CO_VARKEYWORDS`
        const VARKEYWORDS = 0x0008;
        /// `CO_NESTED`
        const NESTED = 0x0010;
        /// `CO_GENERATOR`
        const GENERATOR = 0x0020;
        /// `CO_NOFREE`
        const NOFREE = 0x0040;
    }
}

/// Valeur portée par un flux marshal.
///
/// Seuls None, bool, int, float, complex, str, bytes, tuple, frozenset,
/// Ellipsis et code apparaissent dans `co_consts` ; les autres variantes
/// existent pour lire des flux arbitraires.
#[derive(Debug, Clone, PartialEq)]
pub enum PyConst {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Entier (limité à 64 bits).
    Int(i64),
    /// Flottant.
    Float(f64),
    /// Complexe `(réel, imaginaire)`.
    Complex(f64, f64),
    /// `str`
    Str(String),
    /// `bytes`
    Bytes(Vec<u8>),
    /// `tuple`
    Tuple(Vec<PyConst>),
    /// `frozenset` (ordre du flux conservé).
    FrozenSet(Vec<PyConst>),
    /// `...`
    Ellipsis,
    /// Objet code imbriqué.
    Code(Box<CodeObject>),
    /// `list`
    List(Vec<PyConst>),
    /// `set`
    Set(Vec<PyConst>),
    /// `dict` (ordre du flux conservé).
    Dict(Vec<(PyConst, PyConst)>),
    /// `StopIteration`
    StopIteration,
}

impl PyConst {
    /// Nom du type Python, pour les diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Complex(..) => "complex",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::FrozenSet(_) => "frozenset",
            Self::Ellipsis => "ellipsis",
            Self::Code(_) => "code",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Dict(_) => "dict",
            Self::StopIteration => "StopIteration",
        }
    }

    /// Égalité au sens de la déduplication de `co_consts` :
    /// même type et même valeur (`1`, `1.0` et `True` restent distincts).
    pub fn same_constant(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Complex(a, b), Self::Complex(c, d)) => a.to_bits() == c.to_bits() && b.to_bits() == d.to_bits(),
            (Self::Tuple(a), Self::Tuple(b)) | (Self::FrozenSet(a), Self::FrozenSet(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_constant(y))
            }
            (Self::Code(a), Self::Code(b)) => std::ptr::eq(a.as_ref(), b.as_ref()) || a == b,
            _ => self == other,
        }
    }
}

/// Un objet code CPython 3.4 (champs dans l'ordre du flux marshal).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodeObject {
    /// `co_argcount`
    pub argcount: u32,
    /// `co_kwonlyargcount`
    pub kwonlyargcount: u32,
    /// `co_nlocals`
    pub nlocals: u32,
    /// `co_stacksize`
    pub stacksize: u32,
    /// `co_flags`
    pub flags: CodeFlags,
    /// `co_code`
    pub code: Vec<u8>,
    /// `co_consts`
    pub consts: Vec<PyConst>,
    /// `co_names`
    pub names: Vec<String>,
    /// `co_varnames`
    pub varnames: Vec<String>,
    /// `co_freevars`
    pub freevars: Vec<String>,
    /// `co_cellvars`
    pub cellvars: Vec<String>,
    /// `co_filename`
    pub filename: String,
    /// `co_name`
    pub name: String,
    /// `co_firstlineno`
    pub firstlineno: u32,
    /// `co_lnotab`
    pub lnotab: Vec<u8>,
}

impl CodeObject {
    /// Débuts de ligne `(offset, ligne)`, à la manière de `dis.findlinestarts`.
    pub fn line_starts(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        let mut last = None;
        let mut line = self.firstlineno;
        let mut addr = 0u32;
        for pair in self.lnotab.chunks_exact(2) {
            let (byte_incr, line_incr) = (u32::from(pair[0]), u32::from(pair[1]));
            if byte_incr != 0 {
                if last != Some(line) {
                    out.push((addr, line));
                    last = Some(line);
                }
                addr += byte_incr;
            }
            line += line_incr;
        }
        if last != Some(line) {
            out.push((addr, line));
        }
        out
    }

    /// Nombre de paramètres reçus : positionnels, nommés seuls, `*args`, `**kwargs`.
    pub fn param_count(&self) -> u32 {
        self.argcount
            + self.kwonlyargcount
            + u32::from(self.flags.contains(CodeFlags::VARARGS))
            + u32::from(self.flags.contains(CodeFlags::VARKEYWORDS))
    }

    /// Objets code imbriqués de `co_consts`, dans l'ordre.
    pub fn nested(&self) -> impl Iterator<Item = &CodeObject> + '_ {
        self.consts.iter().filter_map(|c| match c {
            PyConst::Code(code) => Some(code.as_ref()),
            _ => None,
        })
    }
}

/// Encode une table `(offset, ligne)` croissante en `lnotab` 3.4.
///
/// Les incréments supérieurs à 255 sont découpés comme le fait CPython.
pub fn encode_lnotab(firstlineno: u32, starts: &[(u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    let (mut addr, mut line) = (0u32, firstlineno);
    for &(offset, l) in starts {
        if l < line || offset < addr {
            continue;
        }
        let (mut db, mut dl) = (offset - addr, l - line);
        while db > 255 {
            out.extend_from_slice(&[255, 0]);
            db -= 255;
        }
        while dl > 255 {
            out.extend_from_slice(&[db as u8, 255]);
            db = 0;
            dl -= 255;
        }
        if db != 0 || dl != 0 {
            out.extend_from_slice(&[db as u8, dl as u8]);
        }
        addr = offset;
        line = l;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn line_starts_follow_findlinestarts() {
        let code = CodeObject { firstlineno: 1, lnotab: vec![6, 1, 0, 2, 10, 1], ..CodeObject::default() };
        assert_eq!(code.line_starts(), vec![(0, 1), (6, 4), (16, 5)]);
    }

    #[test]
    fn lnotab_roundtrip_with_large_steps() {
        let starts = vec![(0, 3), (300, 4), (310, 700)];
        let code = CodeObject { firstlineno: 3, lnotab: encode_lnotab(3, &starts), ..CodeObject::default() };
        assert_eq!(code.line_starts(), starts);
    }

    #[test]
    fn constants_keep_types_apart() {
        assert!(!PyConst::Int(1).same_constant(&PyConst::Bool(true)));
        assert!(!PyConst::Float(0.0).same_constant(&PyConst::Float(-0.0)));
        assert!(PyConst::Tuple(vec![PyConst::Int(1)]).same_constant(&PyConst::Tuple(vec![PyConst::Int(1)])));
    }

    #[test]
    fn params_include_star_args() {
        let code = CodeObject {
            argcount: 2,
            kwonlyargcount: 1,
            flags: CodeFlags::VARARGS | CodeFlags::VARKEYWORDS,
            ..CodeObject::default()
        };
        assert_eq!(code.param_count(), 5);
    }
}
