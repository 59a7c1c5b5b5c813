//! Assembleur de l'attribut `Code`.
//!
//! Passe 1 : chaque instruction est écrite à son offset définitif (les tailles
//! sont fixes), les sauts reçoivent un déplacement provisoire et une
//! relocation est enregistrée. Passe 2 (`finish`) : les relocations sont
//! résolues vers l'offset de leur label ; un déplacement hors i16 est une
//! erreur, jamais une troncature.
//!
//! La profondeur de pile est suivie instruction par instruction à partir des
//! effets déclarés (`opcodes::info`, descripteurs pour les appels/champs).

use tracing::trace;

use crate::{
    class::{Attribute, AttributeInfo, Code, ExceptionEntry, LineNumber},
    descriptor,
    opcodes::{self, op, Effect, Layout},
    ClassFileError, ConstantPool, Result,
};

/// Position symbolique dans le code, résolue en passe 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Genre d'appel de méthode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    /// `invokevirtual`
    Virtual,
    /// `invokespecial`
    Special,
    /// `invokestatic`
    Static,
    /// `invokeinterface`
    Interface,
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    pc: u32,
    at: usize,
    label: Label,
}

#[derive(Debug, Clone, Copy)]
struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: u16,
}

/// Construit un attribut `Code`.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
    depth: u32,
    max_stack: u32,
    max_locals: u32,
    labels: Vec<Option<u32>>,
    fixups: Vec<Fixup>,
    handlers: Vec<PendingHandler>,
    lines: Vec<(u32, u32)>,
    pending_line: Option<u32>,
}

impl CodeBuilder {
    /// Nouveau code ; `params` emplacements locaux sont déjà occupés.
    pub fn new(params: u16) -> Self { Self { max_locals: u32::from(params), ..Self::default() } }

    /* ───────────── état ───────────── */

    /// Offset de la prochaine instruction.
    pub fn pc(&self) -> u32 { self.code.len() as u32 }
    /// Profondeur courante (mots).
    pub const fn depth(&self) -> u32 { self.depth }
    /// Profondeur maximale observée.
    pub const fn max_stack(&self) -> u32 { self.max_stack }
    /// Emplacements locaux utilisés.
    pub const fn max_locals(&self) -> u32 { self.max_locals }

    /// Impose la profondeur (entrée d'un label atteint seulement par saut).
    pub fn set_depth(&mut self, depth: u32) {
        self.depth = depth;
        self.max_stack = self.max_stack.max(depth);
    }

    /// Réserve un nouvel emplacement local.
    pub fn alloc_local(&mut self) -> Result<u16> {
        let slot = u16::try_from(self.max_locals).map_err(|_| ClassFileError::TooManyLocals(self.max_locals))?;
        self.max_locals += 1;
        if self.max_locals > u32::from(u16::MAX) {
            return Err(ClassFileError::TooManyLocals(self.max_locals));
        }
        Ok(slot)
    }

    /* ───────────── labels / méta ───────────── */

    /// Nouveau label non posé.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Pose `label` à l'offset courant.
    pub fn bind(&mut self, label: Label) -> Result<()> {
        let pc = self.pc();
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(pc);
                Ok(())
            }
            Some(Some(_)) => Err(ClassFileError::LabelRebound(label.0)),
            None => Err(ClassFileError::UnboundLabel(label.0)),
        }
    }

    /// Offset d'un label déjà posé.
    pub fn label_pc(&self, label: Label) -> Option<u32> { self.labels.get(label.0 as usize).copied().flatten() }

    /// La prochaine instruction émise ouvre une entrée de ligne.
    pub fn mark_line(&mut self, line: u32) { self.pending_line = Some(line); }

    /// Plage protégée `[start, end)` routée vers `handler`.
    pub fn exception(&mut self, start: Label, end: Label, handler: Label, catch_type: u16) {
        self.handlers.push(PendingHandler { start, end, handler, catch_type });
    }

    /* ───────────── émission ───────────── */

    fn begin(&mut self, opcode: u8) -> u32 {
        let pc = self.pc();
        if let Some(line) = self.pending_line.take() {
            self.lines.push((pc, line));
        }
        trace!(pc, op = opcodes::name(opcode), depth = self.depth, "emit");
        self.code.push(opcode);
        pc
    }

    fn account(&mut self, pc: u32, opcode: u8, pops: u32, pushes: u32) -> Result<()> {
        if self.depth < pops {
            return Err(ClassFileError::StackUnderflow { pc, opcode: opcodes::name(opcode) });
        }
        self.depth = self.depth - pops + pushes;
        if self.depth > u32::from(u16::MAX) {
            return Err(ClassFileError::StackOverflow { pc });
        }
        self.max_stack = self.max_stack.max(self.depth);
        Ok(())
    }

    fn fixed(opcode: u8, layout: Layout) -> Result<(u32, u32)> {
        match opcodes::info(opcode) {
            Some(i) if i.layout == layout => match i.effect {
                Effect::Fixed(pops, pushes) => Ok((u32::from(pops), u32::from(pushes))),
                Effect::Dynamic => Err(ClassFileError::invalid_code(0, format!("{} needs a constant", i.name))),
            },
            _ => Err(ClassFileError::invalid_code(0, format!("{} is not a {layout:?} instruction", opcodes::name(opcode)))),
        }
    }

    /// Instruction sans opérande (`dup`, `aaload`, `areturn`...).
    pub fn op(&mut self, opcode: u8) -> Result<()> {
        let (pops, pushes) = Self::fixed(opcode, Layout::None)?;
        let pc = self.begin(opcode);
        self.account(pc, opcode, pops, pushes)
    }

    /// Empile un entier avec la forme la plus courte.
    pub fn push_int(&mut self, pool: &mut ConstantPool, v: i32) -> Result<()> {
        match v {
            -1..=5 => self.op((i32::from(op::ICONST_0) + v) as u8),
            -128..=127 => {
                let pc = self.begin(op::BIPUSH);
                self.code.push(v as i8 as u8);
                self.account(pc, op::BIPUSH, 0, 1)
            }
            -32768..=32767 => {
                let pc = self.begin(op::SIPUSH);
                self.code.extend_from_slice(&(v as i16).to_be_bytes());
                self.account(pc, op::SIPUSH, 0, 1)
            }
            _ => {
                let index = pool.integer(v)?;
                self.ldc(index)
            }
        }
    }

    /// `ldc`/`ldc_w` d'une constante d'un mot (Integer, Float, String, Class).
    pub fn ldc(&mut self, index: u16) -> Result<()> {
        let pc = if let Ok(narrow) = u8::try_from(index) {
            let pc = self.begin(op::LDC);
            self.code.push(narrow);
            pc
        } else {
            let pc = self.begin(op::LDC_W);
            self.code.extend_from_slice(&index.to_be_bytes());
            pc
        };
        self.account(pc, op::LDC, 0, 1)
    }

    /// `ldc2_w` d'une constante Long/Double.
    pub fn ldc2(&mut self, index: u16) -> Result<()> {
        let pc = self.begin(op::LDC2_W);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.account(pc, op::LDC2_W, 0, 2)
    }

    fn local(&mut self, short_base: u8, long_op: u8, slot: u16) -> Result<()> {
        let (pops, pushes) = Self::fixed(long_op, Layout::Local)?;
        let pc = if slot <= 3 {
            self.begin(short_base + slot as u8)
        } else if let Ok(narrow) = u8::try_from(slot) {
            let pc = self.begin(long_op);
            self.code.push(narrow);
            pc
        } else {
            let pc = self.begin(op::WIDE);
            self.code.push(long_op);
            self.code.extend_from_slice(&slot.to_be_bytes());
            pc
        };
        if u32::from(slot) >= self.max_locals {
            self.max_locals = u32::from(slot) + 1;
        }
        self.account(pc, long_op, pops, pushes)
    }

    /// `aload` (forme courte, normale ou `wide`).
    pub fn load(&mut self, slot: u16) -> Result<()> { self.local(op::ALOAD_0, op::ALOAD, slot) }

    /// `astore` (forme courte, normale ou `wide`).
    pub fn store(&mut self, slot: u16) -> Result<()> { self.local(op::ASTORE_0, op::ASTORE, slot) }

    /// Accès à un champ (`getstatic`, `putstatic`, `getfield`, `putfield`).
    pub fn field(&mut self, opcode: u8, pool: &mut ConstantPool, class: &str, name: &str, desc: &str) -> Result<()> {
        let words = u32::from(descriptor::field_words(desc)?);
        let (pops, pushes) = match opcode {
            op::GETSTATIC => (0, words),
            op::PUTSTATIC => (words, 0),
            op::GETFIELD => (1, words),
            op::PUTFIELD => (1 + words, 0),
            _ => return Err(ClassFileError::invalid_code(self.pc(), "not a field instruction")),
        };
        let index = pool.field(class, name, desc)?;
        let pc = self.begin(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.account(pc, opcode, pops, pushes)
    }

    /// Appel de méthode ; l'effet de pile vient du descripteur.
    pub fn invoke(&mut self, kind: InvokeKind, pool: &mut ConstantPool, class: &str, name: &str, desc: &str) -> Result<()> {
        let shape = descriptor::method_shape(desc)?;
        let receiver = u32::from(kind != InvokeKind::Static);
        let pops = u32::from(shape.arg_words) + receiver;
        let (opcode, index) = match kind {
            InvokeKind::Virtual => (op::INVOKEVIRTUAL, pool.method(class, name, desc)?),
            InvokeKind::Special => (op::INVOKESPECIAL, pool.method(class, name, desc)?),
            InvokeKind::Static => (op::INVOKESTATIC, pool.method(class, name, desc)?),
            InvokeKind::Interface => (op::INVOKEINTERFACE, pool.interface_method(class, name, desc)?),
        };
        let pc = self.begin(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        if kind == InvokeKind::Interface {
            let count = u8::try_from(pops).map_err(|_| ClassFileError::BadDescriptor(desc.to_owned()))?;
            self.code.push(count);
            self.code.push(0);
        }
        self.account(pc, opcode, pops, u32::from(shape.ret_words))
    }

    /// Instruction typée par une classe (`new`, `anewarray`, `checkcast`, `instanceof`).
    pub fn type_insn(&mut self, opcode: u8, pool: &mut ConstantPool, class: &str) -> Result<()> {
        let (pops, pushes) = Self::fixed(opcode, Layout::Const16)?;
        let index = pool.class(class)?;
        let pc = self.begin(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.account(pc, opcode, pops, pushes)
    }

    /// Saut 16 bits vers `label` (déplacement résolu en passe 2).
    pub fn branch(&mut self, opcode: u8, label: Label) -> Result<()> {
        let (pops, pushes) = Self::fixed(opcode, Layout::Branch16)?;
        let pc = self.begin(opcode);
        let at = self.code.len();
        self.code.extend_from_slice(&[0, 0]);
        self.fixups.push(Fixup { pc, at, label });
        self.account(pc, opcode, pops, pushes)
    }

    /* ───────────── passe 2 ───────────── */

    fn resolve(&self, label: Label) -> Result<u32> { self.label_pc(label).ok_or(ClassFileError::UnboundLabel(label.0)) }

    /// Résout sauts, exceptions et lignes ; produit l'attribut `Code`.
    pub fn finish(mut self, pool: &mut ConstantPool, emit_lines: bool) -> Result<Code> {
        if self.code.is_empty() {
            return Err(ClassFileError::invalid_code(0, "empty code"));
        }
        if self.code.len() > usize::from(u16::MAX) {
            return Err(ClassFileError::CodeTooLarge(self.code.len()));
        }
        for f in std::mem::take(&mut self.fixups) {
            let to = self.resolve(f.label)?;
            let delta = i16::try_from(i64::from(to) - i64::from(f.pc))
                .map_err(|_| ClassFileError::BranchOutOfRange { from: f.pc, to })?;
            self.code[f.at..f.at + 2].copy_from_slice(&delta.to_be_bytes());
        }

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for h in &self.handlers {
            let (start, end) = (self.resolve(h.start)?, self.resolve(h.end)?);
            if start >= end {
                continue;
            }
            exception_table.push(ExceptionEntry {
                start_pc: start as u16,
                end_pc: end as u16,
                handler_pc: self.resolve(h.handler)? as u16,
                catch_type: h.catch_type,
            });
        }

        let mut attributes = Vec::new();
        if emit_lines && !self.lines.is_empty() {
            let mut lines = Vec::with_capacity(self.lines.len());
            for &(pc, line) in &self.lines {
                let line_number = u16::try_from(line)
                    .map_err(|_| ClassFileError::invalid_code(pc, format!("line {line} exceeds 65535")))?;
                lines.push(LineNumber { start_pc: pc as u16, line_number });
            }
            let name_index = pool.utf8("LineNumberTable")?;
            attributes.push(Attribute { name_index, info: AttributeInfo::LineNumberTable(lines) });
        }

        Ok(Code {
            max_stack: self.max_stack as u16,
            max_locals: u16::try_from(self.max_locals).map_err(|_| ClassFileError::TooManyLocals(self.max_locals))?,
            code: self.code,
            exception_table,
            attributes,
        })
    }
}

/* ───────────────────────────── Tests ───────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{decode, Operand};
    use pretty_assertions::assert_eq;

    #[test]
    fn forward_and_backward_branches_are_patched() -> Result<()> {
        let mut pool = ConstantPool::new();
        let mut cb = CodeBuilder::new(1);
        let top = cb.new_label();
        let out = cb.new_label();
        cb.bind(top)?;
        cb.load(0)?;
        cb.branch(op::IFNULL, out)?;
        cb.branch(op::GOTO, top)?;
        cb.bind(out)?;
        cb.op(op::RETURN)?;
        let code = cb.finish(&mut pool, false)?;
        let insns = decode(&code.code)?;
        assert_eq!(insns[1].operand, Operand::Target(7));
        assert_eq!(insns[2].operand, Operand::Target(0));
        assert_eq!(code.max_stack, 1);
        Ok(())
    }

    #[test]
    fn branch_beyond_i16_is_an_error() -> Result<()> {
        let mut pool = ConstantPool::new();
        let mut cb = CodeBuilder::new(0);
        let far = cb.new_label();
        cb.branch(op::GOTO, far)?;
        for _ in 0..40_000 {
            cb.op(op::NOP)?;
        }
        cb.bind(far)?;
        cb.op(op::RETURN)?;
        assert_eq!(cb.finish(&mut pool, false), Err(ClassFileError::BranchOutOfRange { from: 0, to: 40_003 }));
        Ok(())
    }

    #[test]
    fn underflow_is_reported_with_pc() {
        let mut cb = CodeBuilder::new(0);
        assert!(cb.op(op::NOP).is_ok());
        assert_eq!(cb.op(op::POP), Err(ClassFileError::StackUnderflow { pc: 1, opcode: "pop" }));
    }

    #[test]
    fn invoke_effects_follow_descriptors() -> Result<()> {
        let mut pool = ConstantPool::new();
        let mut cb = CodeBuilder::new(0);
        cb.op(op::ACONST_NULL)?;
        cb.op(op::ACONST_NULL)?;
        cb.invoke(InvokeKind::Interface, &mut pool, "org/python/Object", "__add__", "(Lorg/python/Object;)Lorg/python/Object;")?;
        assert_eq!(cb.depth(), 1);
        cb.invoke(InvokeKind::Static, &mut pool, "demo/Util", "wide", "(Ljava/lang/Object;)J")?;
        assert_eq!(cb.depth(), 2);
        assert_eq!(cb.max_stack(), 2);
        cb.op(op::POP2)?;
        cb.op(op::RETURN)?;
        let code = cb.finish(&mut pool, false)?;
        // invokeinterface index, count=2, 0
        assert_eq!(&code.code[2..7], &[op::INVOKEINTERFACE, 0, 6, 2, 0]);
        Ok(())
    }

    #[test]
    fn int_forms_and_wide_locals() -> Result<()> {
        let mut pool = ConstantPool::new();
        let mut cb = CodeBuilder::new(0);
        for v in [-1, 5, 100, -300, 70_000] {
            cb.push_int(&mut pool, v)?;
        }
        let slot = 300;
        cb.op(op::ACONST_NULL)?;
        cb.store(slot)?;
        let code_len_before = cb.pc();
        cb.load(slot)?;
        assert_eq!(cb.pc() - code_len_before, 4);
        assert_eq!(cb.max_locals(), 301);
        Ok(())
    }

    #[test]
    fn empty_ranges_are_dropped_and_lines_recorded_once() -> Result<()> {
        let mut pool = ConstantPool::new();
        let mut cb = CodeBuilder::new(0);
        let (a, b, h) = (cb.new_label(), cb.new_label(), cb.new_label());
        cb.bind(a)?;
        cb.bind(b)?;
        cb.mark_line(3);
        cb.mark_line(4);
        cb.op(op::RETURN)?;
        cb.bind(h)?;
        cb.set_depth(1);
        cb.op(op::ATHROW)?;
        cb.exception(a, b, h, 0);
        let code = cb.finish(&mut pool, true)?;
        assert!(code.exception_table.is_empty());
        assert_eq!(code.line_numbers(), &[LineNumber { start_pc: 0, line_number: 4 }]);
        Ok(())
    }

    #[test]
    fn unbound_label_fails() {
        let mut pool = ConstantPool::new();
        let mut cb = CodeBuilder::new(0);
        let l = cb.new_label();
        assert!(cb.branch(op::GOTO, l).is_ok());
        assert_eq!(cb.finish(&mut pool, false), Err(ClassFileError::UnboundLabel(0)));
    }
}
