//! Vérification structurelle d'un attribut `Code` :
//! - chaque cible de saut, borne d'exception et entrée de ligne tombe sur un
//!   début d'instruction ;
//! - simulation de la profondeur de pile par parcours des successeurs
//!   (handlers entrés avec 1 mot), profondeurs cohérentes aux jonctions ;
//! - indices de locaux sous `max_locals`, pile sous `max_stack`.
//!
//! Pas de typage : seules les profondeurs sont suivies.

use std::collections::VecDeque;

use tracing::debug;

use crate::{
    class::Code,
    descriptor,
    opcodes::{self, decode, op, Effect, Instruction, Operand},
    ClassFile, ClassFileError, Constant, ConstantPool, Result,
};

/// Résultat d'une vérification réussie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackReport {
    /// Profondeur maximale atteinte (mots).
    pub max_depth: u16,
    /// Instructions atteignables.
    pub reachable: usize,
    /// Instructions décodées.
    pub instructions: usize,
}

/// Vérifie toutes les méthodes munies de code ; rend `(nom, rapport)` par méthode.
pub fn check_class(class: &ClassFile) -> Result<Vec<(String, StackReport)>> {
    let pool = &class.constant_pool;
    let mut out = Vec::with_capacity(class.methods.len());
    for m in &class.methods {
        if let Some(code) = m.code() {
            let name = class.member_name(m)?;
            let report = check_code(code, pool)?;
            debug!(method = name, max_depth = report.max_depth, reachable = report.reachable, "method verified");
            out.push((name.to_owned(), report));
        }
    }
    Ok(out)
}

/// Vérifie un attribut `Code` contre la table des constantes de sa classe.
pub fn check_code(code: &Code, pool: &ConstantPool) -> Result<StackReport> {
    let insns = decode(&code.code)?;
    let len = code.code.len();
    let mut index_of = vec![None; len + 1];
    for (i, insn) in insns.iter().enumerate() {
        index_of[insn.pc as usize] = Some(i);
    }
    let at = |pc: u32, from: u32, what: &str| -> Result<usize> {
        index_of
            .get(pc as usize)
            .copied()
            .flatten()
            .ok_or_else(|| ClassFileError::invalid_code(from, format!("{what} {pc} is not an instruction start")))
    };

    for insn in &insns {
        if matches!(insn.opcode, op::JSR | op::JSR_W | op::RET) {
            return Err(ClassFileError::invalid_code(insn.pc, "subroutines are not supported"));
        }
        for t in insn.targets() {
            at(t, insn.pc, "branch target")?;
        }
        if let Some((slot, width)) = local_access(insn) {
            if u32::from(slot) + width > u32::from(code.max_locals) {
                return Err(ClassFileError::invalid_code(insn.pc, format!("local {slot} beyond max_locals {}", code.max_locals)));
            }
        }
    }

    let mut handlers = Vec::with_capacity(code.exception_table.len());
    for e in &code.exception_table {
        let (start, end, handler) = (u32::from(e.start_pc), u32::from(e.end_pc), u32::from(e.handler_pc));
        if start >= end {
            return Err(ClassFileError::invalid_code(start, "empty exception range"));
        }
        at(start, start, "exception start")?;
        if end as usize != len {
            at(end, start, "exception end")?;
        }
        handlers.push((start, end, at(handler, start, "handler")?));
    }
    for l in code.line_numbers() {
        at(u32::from(l.start_pc), u32::from(l.start_pc), "line entry")?;
    }

    let mut depth_at: Vec<Option<u32>> = vec![None; insns.len()];
    let mut max_depth = 0u32;
    let mut work = VecDeque::new();
    if !insns.is_empty() {
        merge(&mut depth_at, &insns, 0, 0, 0, &mut work)?;
    }
    while let Some(idx) = work.pop_front() {
        let insn = &insns[idx];
        let depth = depth_at[idx].unwrap_or(0);
        for &(start, end, handler) in &handlers {
            if (start..end).contains(&insn.pc) {
                merge(&mut depth_at, &insns, handler, 1, insn.pc, &mut work)?;
            }
        }
        let (pops, pushes) = effect(insn, pool)?;
        if depth < pops {
            return Err(ClassFileError::StackUnderflow { pc: insn.pc, opcode: opcodes::name(insn.opcode) });
        }
        let after = depth - pops + pushes;
        max_depth = max_depth.max(depth).max(after);
        if max_depth > u32::from(code.max_stack) {
            return Err(ClassFileError::StackOverflow { pc: insn.pc });
        }
        for t in insn.targets() {
            merge(&mut depth_at, &insns, at(t, insn.pc, "branch target")?, after, insn.pc, &mut work)?;
        }
        if !opcodes::is_terminal(insn.opcode) {
            let next = idx + 1;
            if next >= insns.len() {
                return Err(ClassFileError::invalid_code(insn.pc, "execution falls off the end of the code"));
            }
            merge(&mut depth_at, &insns, next, after, insn.pc, &mut work)?;
        }
    }

    Ok(StackReport {
        max_depth: max_depth as u16,
        reachable: depth_at.iter().filter(|d| d.is_some()).count(),
        instructions: insns.len(),
    })
}

fn merge(
    depth_at: &mut [Option<u32>],
    insns: &[Instruction],
    idx: usize,
    depth: u32,
    from: u32,
    work: &mut VecDeque<usize>,
) -> Result<()> {
    match depth_at[idx] {
        None => {
            depth_at[idx] = Some(depth);
            work.push_back(idx);
            Ok(())
        }
        Some(d) if d == depth => Ok(()),
        Some(d) => Err(ClassFileError::invalid_code(
            from,
            format!("inconsistent stack depth at {}: {d} vs {depth}", insns[idx].pc),
        )),
    }
}

/// Effet `(pops, pushes)` en mots, constantes résolues.
fn effect(insn: &Instruction, pool: &ConstantPool) -> Result<(u32, u32)> {
    let info = opcodes::info(insn.opcode).ok_or_else(|| ClassFileError::invalid_code(insn.pc, "unknown opcode"))?;
    if let Effect::Fixed(pops, pushes) = info.effect {
        return Ok((u32::from(pops), u32::from(pushes)));
    }
    let index = match insn.operand {
        Operand::Const(i) | Operand::Interface { index: i, .. } | Operand::MultiArray { index: i, .. } => i,
        _ => return Err(ClassFileError::invalid_code(insn.pc, "missing constant operand")),
    };
    Ok(match insn.opcode {
        op::LDC | op::LDC_W | op::LDC2_W => match pool.get(index)? {
            Constant::Long(_) | Constant::Double(_) => (0, 2),
            Constant::Integer(_) | Constant::Float(_) | Constant::String(_) | Constant::Class(_) => (0, 1),
            other => {
                return Err(ClassFileError::invalid_code(insn.pc, format!("cannot load a {} constant", other.kind())))
            }
        },
        op::GETSTATIC | op::PUTSTATIC | op::GETFIELD | op::PUTFIELD => {
            let (_, _, desc) = pool.member_at(index)?;
            let words = u32::from(descriptor::field_words(desc)?);
            match insn.opcode {
                op::GETSTATIC => (0, words),
                op::PUTSTATIC => (words, 0),
                op::GETFIELD => (1, words),
                _ => (1 + words, 0),
            }
        }
        op::INVOKEVIRTUAL | op::INVOKESPECIAL | op::INVOKESTATIC | op::INVOKEINTERFACE => {
            let (_, _, desc) = pool.member_at(index)?;
            let shape = descriptor::method_shape(desc)?;
            let receiver = u32::from(insn.opcode != op::INVOKESTATIC);
            let pops = u32::from(shape.arg_words) + receiver;
            if let Operand::Interface { count, .. } = insn.operand {
                if u32::from(count) != pops {
                    return Err(ClassFileError::invalid_code(insn.pc, format!("invokeinterface count {count}, expected {pops}")));
                }
            }
            (pops, u32::from(shape.ret_words))
        }
        op::MULTIANEWARRAY => match insn.operand {
            Operand::MultiArray { dims, .. } if dims > 0 => (u32::from(dims), 1),
            _ => return Err(ClassFileError::invalid_code(insn.pc, "multianewarray with zero dimensions")),
        },
        _ => return Err(ClassFileError::invalid_code(insn.pc, format!("{} is not supported", info.name))),
    })
}

/// `(slot, largeur)` d'un accès à une variable locale.
fn local_access(insn: &Instruction) -> Option<(u16, u32)> {
    let wide_kind = |opcode: u8| u32::from(matches!(opcode, 0x16 | 0x18 | 0x37 | 0x39)) + 1;
    match (&insn.operand, insn.opcode) {
        (Operand::Local(slot), opcode) => Some((*slot, wide_kind(opcode))),
        (Operand::Iinc { local, .. }, _) => Some((*local, 1)),
        (Operand::None, o @ 0x1A..=0x2D) => {
            let (family, slot) = ((o - 0x1A) / 4, u16::from((o - 0x1A) % 4));
            Some((slot, if matches!(family, 1 | 3) { 2 } else { 1 }))
        }
        (Operand::None, o @ 0x3B..=0x4E) => {
            let (family, slot) = ((o - 0x3B) / 4, u16::from((o - 0x3B) % 4));
            Some((slot, if matches!(family, 1 | 3) { 2 } else { 1 }))
        }
        _ => None,
    }
}
