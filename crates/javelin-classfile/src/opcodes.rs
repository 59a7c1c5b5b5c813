//! Jeu d'instructions JVM : mnémoniques, formes d'opérandes, effets de pile
//! fixes, et décodeur des octets d'un `Code`.
//!
//! Les effets de pile se comptent en mots. Quand l'effet dépend d'une constante
//! (accès aux champs, appels, `ldc`, `multianewarray`), l'opcode rend
//! [`Effect::Dynamic`] et l'appelant résout contre la table des constantes.

use crate::{ClassFileError, Result};

/// Octets d'opcode utilisés par la génération de code.
#[allow(missing_docs)]
pub mod op {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const LCONST_0: u8 = 0x09;
    pub const LCONST_1: u8 = 0x0A;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const ALOAD_0: u8 = 0x2A;
    pub const AALOAD: u8 = 0x32;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3A;
    pub const ASTORE_0: u8 = 0x4B;
    pub const AASTORE: u8 = 0x53;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const DUP_X1: u8 = 0x5A;
    pub const DUP_X2: u8 = 0x5B;
    pub const DUP2: u8 = 0x5C;
    pub const SWAP: u8 = 0x5F;
    pub const IXOR: u8 = 0x82;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9A;
    pub const IF_ACMPEQ: u8 = 0xA5;
    pub const IF_ACMPNE: u8 = 0xA6;
    pub const GOTO: u8 = 0xA7;
    pub const JSR: u8 = 0xA8;
    pub const RET: u8 = 0xA9;
    pub const TABLESWITCH: u8 = 0xAA;
    pub const LOOKUPSWITCH: u8 = 0xAB;
    pub const IRETURN: u8 = 0xAC;
    pub const ARETURN: u8 = 0xB0;
    pub const RETURN: u8 = 0xB1;
    pub const GETSTATIC: u8 = 0xB2;
    pub const PUTSTATIC: u8 = 0xB3;
    pub const GETFIELD: u8 = 0xB4;
    pub const PUTFIELD: u8 = 0xB5;
    pub const INVOKEVIRTUAL: u8 = 0xB6;
    pub const INVOKESPECIAL: u8 = 0xB7;
    pub const INVOKESTATIC: u8 = 0xB8;
    pub const INVOKEINTERFACE: u8 = 0xB9;
    pub const INVOKEDYNAMIC: u8 = 0xBA;
    pub const NEW: u8 = 0xBB;
    pub const NEWARRAY: u8 = 0xBC;
    pub const ANEWARRAY: u8 = 0xBD;
    pub const ARRAYLENGTH: u8 = 0xBE;
    pub const ATHROW: u8 = 0xBF;
    pub const CHECKCAST: u8 = 0xC0;
    pub const INSTANCEOF: u8 = 0xC1;
    pub const WIDE: u8 = 0xC4;
    pub const MULTIANEWARRAY: u8 = 0xC5;
    pub const IFNULL: u8 = 0xC6;
    pub const IFNONNULL: u8 = 0xC7;
    pub const GOTO_W: u8 = 0xC8;
    pub const JSR_W: u8 = 0xC9;
}

/// Forme de l'opérande qui suit l'octet d'opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Sans opérande.
    None,
    /// Octet signé immédiat (`bipush`).
    Byte,
    /// Court signé immédiat (`sipush`).
    Short,
    /// Emplacement local sur un octet (extensible par `wide`).
    Local,
    /// Index de constante sur un octet (`ldc`).
    Const8,
    /// Index de constante sur deux octets.
    Const16,
    /// Déplacement de saut signé sur 16 bits.
    Branch16,
    /// Déplacement de saut signé sur 32 bits.
    Branch32,
    /// `iinc local, delta`.
    Iinc,
    /// `invokeinterface index, count, 0`.
    Interface,
    /// `invokedynamic index, 0, 0`.
    Dynamic,
    /// `newarray atype`.
    ArrayType,
    /// `multianewarray index, dims`.
    MultiArray,
    /// `tableswitch`.
    TableSwitch,
    /// `lookupswitch`.
    LookupSwitch,
    /// Préfixe `wide`.
    Wide,
}

/// Effet de pile, en mots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// `(dépilés, empilés)`.
    Fixed(u8, u8),
    /// Dépend d'une entrée de la table des constantes.
    Dynamic,
}

/// Informations statiques d'un opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    /// Mnémonique.
    pub name: &'static str,
    /// Forme de l'opérande.
    pub layout: Layout,
    /// Effet de pile.
    pub effect: Effect,
}

const fn i(name: &'static str, layout: Layout, pops: u8, pushes: u8) -> OpInfo {
    OpInfo { name, layout, effect: Effect::Fixed(pops, pushes) }
}

const fn d(name: &'static str, layout: Layout) -> OpInfo {
    OpInfo { name, layout, effect: Effect::Dynamic }
}

/// Cherche un opcode.
#[allow(clippy::match_same_arms)]
pub const fn info(opcode: u8) -> Option<OpInfo> {
    use Layout as L;
    Some(match opcode {
        0x00 => i("nop", L::None, 0, 0),
        0x01 => i("aconst_null", L::None, 0, 1),
        0x02 => i("iconst_m1", L::None, 0, 1),
        0x03 => i("iconst_0", L::None, 0, 1),
        0x04 => i("iconst_1", L::None, 0, 1),
        0x05 => i("iconst_2", L::None, 0, 1),
        0x06 => i("iconst_3", L::None, 0, 1),
        0x07 => i("iconst_4", L::None, 0, 1),
        0x08 => i("iconst_5", L::None, 0, 1),
        0x09 => i("lconst_0", L::None, 0, 2),
        0x0A => i("lconst_1", L::None, 0, 2),
        0x0B => i("fconst_0", L::None, 0, 1),
        0x0C => i("fconst_1", L::None, 0, 1),
        0x0D => i("fconst_2", L::None, 0, 1),
        0x0E => i("dconst_0", L::None, 0, 2),
        0x0F => i("dconst_1", L::None, 0, 2),
        0x10 => i("bipush", L::Byte, 0, 1),
        0x11 => i("sipush", L::Short, 0, 1),
        0x12 => d("ldc", L::Const8),
        0x13 => d("ldc_w", L::Const16),
        0x14 => i("ldc2_w", L::Const16, 0, 2),
        0x15 => i("iload", L::Local, 0, 1),
        0x16 => i("lload", L::Local, 0, 2),
        0x17 => i("fload", L::Local, 0, 1),
        0x18 => i("dload", L::Local, 0, 2),
        0x19 => i("aload", L::Local, 0, 1),
        0x1A => i("iload_0", L::None, 0, 1),
        0x1B => i("iload_1", L::None, 0, 1),
        0x1C => i("iload_2", L::None, 0, 1),
        0x1D => i("iload_3", L::None, 0, 1),
        0x1E => i("lload_0", L::None, 0, 2),
        0x1F => i("lload_1", L::None, 0, 2),
        0x20 => i("lload_2", L::None, 0, 2),
        0x21 => i("lload_3", L::None, 0, 2),
        0x22 => i("fload_0", L::None, 0, 1),
        0x23 => i("fload_1", L::None, 0, 1),
        0x24 => i("fload_2", L::None, 0, 1),
        0x25 => i("fload_3", L::None, 0, 1),
        0x26 => i("dload_0", L::None, 0, 2),
        0x27 => i("dload_1", L::None, 0, 2),
        0x28 => i("dload_2", L::None, 0, 2),
        0x29 => i("dload_3", L::None, 0, 2),
        0x2A => i("aload_0", L::None, 0, 1),
        0x2B => i("aload_1", L::None, 0, 1),
        0x2C => i("aload_2", L::None, 0, 1),
        0x2D => i("aload_3", L::None, 0, 1),
        0x2E => i("iaload", L::None, 2, 1),
        0x2F => i("laload", L::None, 2, 2),
        0x30 => i("faload", L::None, 2, 1),
        0x31 => i("daload", L::None, 2, 2),
        0x32 => i("aaload", L::None, 2, 1),
        0x33 => i("baload", L::None, 2, 1),
        0x34 => i("caload", L::None, 2, 1),
        0x35 => i("saload", L::None, 2, 1),
        0x36 => i("istore", L::Local, 1, 0),
        0x37 => i("lstore", L::Local, 2, 0),
        0x38 => i("fstore", L::Local, 1, 0),
        0x39 => i("dstore", L::Local, 2, 0),
        0x3A => i("astore", L::Local, 1, 0),
        0x3B => i("istore_0", L::None, 1, 0),
        0x3C => i("istore_1", L::None, 1, 0),
        0x3D => i("istore_2", L::None, 1, 0),
        0x3E => i("istore_3", L::None, 1, 0),
        0x3F => i("lstore_0", L::None, 2, 0),
        0x40 => i("lstore_1", L::None, 2, 0),
        0x41 => i("lstore_2", L::None, 2, 0),
        0x42 => i("lstore_3", L::None, 2, 0),
        0x43 => i("fstore_0", L::None, 1, 0),
        0x44 => i("fstore_1", L::None, 1, 0),
        0x45 => i("fstore_2", L::None, 1, 0),
        0x46 => i("fstore_3", L::None, 1, 0),
        0x47 => i("dstore_0", L::None, 2, 0),
        0x48 => i("dstore_1", L::None, 2, 0),
        0x49 => i("dstore_2", L::None, 2, 0),
        0x4A => i("dstore_3", L::None, 2, 0),
        0x4B => i("astore_0", L::None, 1, 0),
        0x4C => i("astore_1", L::None, 1, 0),
        0x4D => i("astore_2", L::None, 1, 0),
        0x4E => i("astore_3", L::None, 1, 0),
        0x4F => i("iastore", L::None, 3, 0),
        0x50 => i("lastore", L::None, 4, 0),
        0x51 => i("fastore", L::None, 3, 0),
        0x52 => i("dastore", L::None, 4, 0),
        0x53 => i("aastore", L::None, 3, 0),
        0x54 => i("bastore", L::None, 3, 0),
        0x55 => i("castore", L::None, 3, 0),
        0x56 => i("sastore", L::None, 3, 0),
        0x57 => i("pop", L::None, 1, 0),
        0x58 => i("pop2", L::None, 2, 0),
        0x59 => i("dup", L::None, 1, 2),
        0x5A => i("dup_x1", L::None, 2, 3),
        0x5B => i("dup_x2", L::None, 3, 4),
        0x5C => i("dup2", L::None, 2, 4),
        0x5D => i("dup2_x1", L::None, 3, 5),
        0x5E => i("dup2_x2", L::None, 4, 6),
        0x5F => i("swap", L::None, 2, 2),
        0x60 => i("iadd", L::None, 2, 1),
        0x61 => i("ladd", L::None, 4, 2),
        0x62 => i("fadd", L::None, 2, 1),
        0x63 => i("dadd", L::None, 4, 2),
        0x64 => i("isub", L::None, 2, 1),
        0x65 => i("lsub", L::None, 4, 2),
        0x66 => i("fsub", L::None, 2, 1),
        0x67 => i("dsub", L::None, 4, 2),
        0x68 => i("imul", L::None, 2, 1),
        0x69 => i("lmul", L::None, 4, 2),
        0x6A => i("fmul", L::None, 2, 1),
        0x6B => i("dmul", L::None, 4, 2),
        0x6C => i("idiv", L::None, 2, 1),
        0x6D => i("ldiv", L::None, 4, 2),
        0x6E => i("fdiv", L::None, 2, 1),
        0x6F => i("ddiv", L::None, 4, 2),
        0x70 => i("irem", L::None, 2, 1),
        0x71 => i("lrem", L::None, 4, 2),
        0x72 => i("frem", L::None, 2, 1),
        0x73 => i("drem", L::None, 4, 2),
        0x74 => i("ineg", L::None, 1, 1),
        0x75 => i("lneg", L::None, 2, 2),
        0x76 => i("fneg", L::None, 1, 1),
        0x77 => i("dneg", L::None, 2, 2),
        0x78 => i("ishl", L::None, 2, 1),
        0x79 => i("lshl", L::None, 3, 2),
        0x7A => i("ishr", L::None, 2, 1),
        0x7B => i("lshr", L::None, 3, 2),
        0x7C => i("iushr", L::None, 2, 1),
        0x7D => i("lushr", L::None, 3, 2),
        0x7E => i("iand", L::None, 2, 1),
        0x7F => i("land", L::None, 4, 2),
        0x80 => i("ior", L::None, 2, 1),
        0x81 => i("lor", L::None, 4, 2),
        0x82 => i("ixor", L::None, 2, 1),
        0x83 => i("lxor", L::None, 4, 2),
        0x84 => i("iinc", L::Iinc, 0, 0),
        0x85 => i("i2l", L::None, 1, 2),
        0x86 => i("i2f", L::None, 1, 1),
        0x87 => i("i2d", L::None, 1, 2),
        0x88 => i("l2i", L::None, 2, 1),
        0x89 => i("l2f", L::None, 2, 1),
        0x8A => i("l2d", L::None, 2, 2),
        0x8B => i("f2i", L::None, 1, 1),
        0x8C => i("f2l", L::None, 1, 2),
        0x8D => i("f2d", L::None, 1, 2),
        0x8E => i("d2i", L::None, 2, 1),
        0x8F => i("d2l", L::None, 2, 2),
        0x90 => i("d2f", L::None, 2, 1),
        0x91 => i("i2b", L::None, 1, 1),
        0x92 => i("i2c", L::None, 1, 1),
        0x93 => i("i2s", L::None, 1, 1),
        0x94 => i("lcmp", L::None, 4, 1),
        0x95 => i("fcmpl", L::None, 2, 1),
        0x96 => i("fcmpg", L::None, 2, 1),
        0x97 => i("dcmpl", L::None, 4, 1),
        0x98 => i("dcmpg", L::None, 4, 1),
        0x99 => i("ifeq", L::Branch16, 1, 0),
        0x9A => i("ifne", L::Branch16, 1, 0),
        0x9B => i("iflt", L::Branch16, 1, 0),
        0x9C => i("ifge", L::Branch16, 1, 0),
        0x9D => i("ifgt", L::Branch16, 1, 0),
        0x9E => i("ifle", L::Branch16, 1, 0),
        0x9F => i("if_icmpeq", L::Branch16, 2, 0),
        0xA0 => i("if_icmpne", L::Branch16, 2, 0),
        0xA1 => i("if_icmplt", L::Branch16, 2, 0),
        0xA2 => i("if_icmpge", L::Branch16, 2, 0),
        0xA3 => i("if_icmpgt", L::Branch16, 2, 0),
        0xA4 => i("if_icmple", L::Branch16, 2, 0),
        0xA5 => i("if_acmpeq", L::Branch16, 2, 0),
        0xA6 => i("if_acmpne", L::Branch16, 2, 0),
        0xA7 => i("goto", L::Branch16, 0, 0),
        0xA8 => i("jsr", L::Branch16, 0, 1),
        0xA9 => i("ret", L::Local, 0, 0),
        0xAA => i("tableswitch", L::TableSwitch, 1, 0),
        0xAB => i("lookupswitch", L::LookupSwitch, 1, 0),
        0xAC => i("ireturn", L::None, 1, 0),
        0xAD => i("lreturn", L::None, 2, 0),
        0xAE => i("freturn", L::None, 1, 0),
        0xAF => i("dreturn", L::None, 2, 0),
        0xB0 => i("areturn", L::None, 1, 0),
        0xB1 => i("return", L::None, 0, 0),
        0xB2 => d("getstatic", L::Const16),
        0xB3 => d("putstatic", L::Const16),
        0xB4 => d("getfield", L::Const16),
        0xB5 => d("putfield", L::Const16),
        0xB6 => d("invokevirtual", L::Const16),
        0xB7 => d("invokespecial", L::Const16),
        0xB8 => d("invokestatic", L::Const16),
        0xB9 => d("invokeinterface", L::Interface),
        0xBA => d("invokedynamic", L::Dynamic),
        0xBB => i("new", L::Const16, 0, 1),
        0xBC => i("newarray", L::ArrayType, 1, 1),
        0xBD => i("anewarray", L::Const16, 1, 1),
        0xBE => i("arraylength", L::None, 1, 1),
        0xBF => i("athrow", L::None, 1, 0),
        0xC0 => i("checkcast", L::Const16, 1, 1),
        0xC1 => i("instanceof", L::Const16, 1, 1),
        0xC2 => i("monitorenter", L::None, 1, 0),
        0xC3 => i("monitorexit", L::None, 1, 0),
        0xC4 => i("wide", L::Wide, 0, 0),
        0xC5 => d("multianewarray", L::MultiArray),
        0xC6 => i("ifnull", L::Branch16, 1, 0),
        0xC7 => i("ifnonnull", L::Branch16, 1, 0),
        0xC8 => i("goto_w", L::Branch32, 0, 0),
        0xC9 => i("jsr_w", L::Branch32, 0, 1),
        _ => return None,
    })
}

/// Mnémonique d'un opcode (`"???"` s'il est inconnu).
pub fn name(opcode: u8) -> &'static str { info(opcode).map_or("???", |i| i.name) }

/// L'exécution ne continue jamais à l'instruction suivante ?
pub const fn is_terminal(opcode: u8) -> bool {
    matches!(
        opcode,
        op::GOTO | op::GOTO_W | op::ATHROW | op::RET | op::TABLESWITCH | op::LOOKUPSWITCH | 0xAC..=0xB1
    )
}

/// Opérande décodé.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Sans opérande.
    None,
    /// Valeur immédiate (`bipush`, `sipush`, type de `newarray`).
    Imm(i32),
    /// Emplacement local.
    Local(u16),
    /// Index dans la table des constantes.
    Const(u16),
    /// Cible de saut absolue.
    Target(u32),
    /// `iinc`.
    Iinc {
        /// Emplacement local.
        local: u16,
        /// Incrément.
        delta: i16,
    },
    /// `invokeinterface` (octet de compte gardé pour les vérifications).
    Interface {
        /// → InterfaceMethodref
        index: u16,
        /// Mots d'arguments déclarés + 1.
        count: u8,
    },
    /// `multianewarray`.
    MultiArray {
        /// → Class
        index: u16,
        /// Dimensions dépilées.
        dims: u8,
    },
    /// `tableswitch` / `lookupswitch` : cible par défaut puis couples `(clé, cible)`.
    Switch {
        /// Cible par défaut.
        default: u32,
        /// Cas.
        cases: Vec<(i32, u32)>,
    },
}

/// Une instruction décodée.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset du premier octet (le préfixe `wide` le cas échéant).
    pub pc: u32,
    /// Longueur encodée, en octets.
    pub len: u32,
    /// Opcode (celui modifié pour les formes `wide`).
    pub opcode: u8,
    /// Forme préfixée par `wide` ?
    pub wide: bool,
    /// Opérande.
    pub operand: Operand,
}

impl Instruction {
    /// Toutes les cibles de saut de l'instruction.
    pub fn targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Target(t) => vec![*t],
            Operand::Switch { default, cases } => {
                std::iter::once(*default).chain(cases.iter().map(|(_, t)| *t)).collect()
            }
            _ => Vec::new(),
        }
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
    pc: u32,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .ok_or_else(|| ClassFileError::invalid_code(self.pc, "truncated instruction"))?;
        self.pos += N;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }
    fn u8(&mut self) -> Result<u8> { Ok(self.take::<1>()?[0]) }
    fn u16(&mut self) -> Result<u16> { Ok(u16::from_be_bytes(self.take()?)) }
    fn i16(&mut self) -> Result<i16> { Ok(i16::from_be_bytes(self.take()?)) }
    fn i32(&mut self) -> Result<i32> { Ok(i32::from_be_bytes(self.take()?)) }

    fn target(&self, delta: i64) -> Result<u32> {
        u32::try_from(i64::from(self.pc) + delta)
            .map_err(|_| ClassFileError::invalid_code(self.pc, "branch before start of code"))
    }
}

/// Décode un tableau `code` entier.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut out = Vec::new();
    let mut c = Cursor { code, pos: 0, pc: 0 };
    while c.pos < code.len() {
        c.pc = c.pos as u32;
        let mut opcode = c.u8()?;
        let mut wide = false;
        let mut layout = info(opcode)
            .ok_or_else(|| ClassFileError::invalid_code(c.pc, format!("unknown opcode 0x{opcode:02X}")))?
            .layout;
        if layout == Layout::Wide {
            wide = true;
            opcode = c.u8()?;
            layout = match info(opcode) {
                Some(i) if matches!(i.layout, Layout::Local | Layout::Iinc) => i.layout,
                _ => return Err(ClassFileError::invalid_code(c.pc, "invalid wide form")),
            };
        }
        let operand = match layout {
            Layout::None => Operand::None,
            Layout::Byte => Operand::Imm(i32::from(c.u8()? as i8)),
            Layout::Short => Operand::Imm(i32::from(c.i16()?)),
            Layout::ArrayType => Operand::Imm(i32::from(c.u8()?)),
            Layout::Local if wide => Operand::Local(c.u16()?),
            Layout::Local => Operand::Local(u16::from(c.u8()?)),
            Layout::Const8 => Operand::Const(u16::from(c.u8()?)),
            Layout::Const16 => Operand::Const(c.u16()?),
            Layout::Branch16 => {
                let delta = c.i16()?;
                Operand::Target(c.target(i64::from(delta))?)
            }
            Layout::Branch32 => {
                let delta = c.i32()?;
                Operand::Target(c.target(i64::from(delta))?)
            }
            Layout::Iinc if wide => Operand::Iinc { local: c.u16()?, delta: c.i16()? },
            Layout::Iinc => Operand::Iinc { local: u16::from(c.u8()?), delta: i16::from(c.u8()? as i8) },
            Layout::Interface => {
                let index = c.u16()?;
                let count = c.u8()?;
                if c.u8()? != 0 {
                    return Err(ClassFileError::invalid_code(c.pc, "invokeinterface trailing byte"));
                }
                Operand::Interface { index, count }
            }
            Layout::Dynamic => {
                let index = c.u16()?;
                c.u16()?;
                Operand::Const(index)
            }
            Layout::MultiArray => Operand::MultiArray { index: c.u16()?, dims: c.u8()? },
            Layout::TableSwitch | Layout::LookupSwitch => {
                while c.pos % 4 != 0 {
                    c.u8()?;
                }
                let delta = c.i32()?;
                let default = c.target(i64::from(delta))?;
                let mut cases = Vec::new();
                if layout == Layout::TableSwitch {
                    let low = c.i32()?;
                    let high = c.i32()?;
                    if high < low {
                        return Err(ClassFileError::invalid_code(c.pc, "tableswitch high < low"));
                    }
                    for key in low..=high {
                        let delta = c.i32()?;
                        cases.push((key, c.target(i64::from(delta))?));
                    }
                } else {
                    let n = c.i32()?;
                    for _ in 0..n.max(0) {
                        let key = c.i32()?;
                        let delta = c.i32()?;
                        cases.push((key, c.target(i64::from(delta))?));
                    }
                }
                Operand::Switch { default, cases }
            }
            Layout::Wide => return Err(ClassFileError::invalid_code(c.pc, "nested wide")),
        };
        out.push(Instruction { pc: c.pc, len: c.pos as u32 - c.pc, opcode, wide, operand });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_known_opcode_has_a_name() {
        let known = (0..=255u8).filter(|&b| info(b).is_some()).count();
        assert_eq!(known, 202);
        assert_eq!(name(op::INVOKEINTERFACE), "invokeinterface");
        assert_eq!(name(0xFE), "???");
    }

    #[test]
    fn decodes_branches_as_absolute_targets() -> Result<()> {
        // 0: iconst_0; 1: ifeq +5 (-> 6); 4: nop; 5: nop; 6: goto -6 (-> 0)
        let code = [0x03, 0x99, 0x00, 0x05, 0x00, 0x00, 0xA7, 0xFF, 0xFA];
        let insns = decode(&code)?;
        assert_eq!(insns.len(), 5);
        assert_eq!(insns[1].operand, Operand::Target(6));
        assert_eq!(insns[4].operand, Operand::Target(0));
        assert!(is_terminal(insns[4].opcode));
        Ok(())
    }

    #[test]
    fn decodes_wide_and_interface_forms() -> Result<()> {
        let code = [0xC4, 0x19, 0x01, 0x00, 0xB9, 0x00, 0x07, 0x02, 0x00];
        let insns = decode(&code)?;
        assert_eq!(insns[0].operand, Operand::Local(256));
        assert!(insns[0].wide);
        assert_eq!(insns[0].len, 4);
        assert_eq!(insns[1].operand, Operand::Interface { index: 7, count: 2 });
        Ok(())
    }

    #[test]
    fn truncated_and_unknown_fail() {
        assert!(decode(&[0x11, 0x00]).is_err());
        assert!(decode(&[0xFE]).is_err());
        assert!(decode(&[0xA7, 0xFF, 0x00]).is_err());
    }
}
