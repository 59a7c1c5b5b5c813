//! Décodage de `co_code` en instructions.

use crate::{opcode::JumpKind, Opcode, PycError, Result};

/// Une instruction source décodée.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset du premier octet (celui de l'éventuel préfixe EXTENDED_ARG).
    pub offset: u32,
    /// Taille encodée, préfixe compris.
    pub size: u32,
    /// Opcode.
    pub opcode: Opcode,
    /// Argument complet (EXTENDED_ARG fusionné), `None` sous HAVE_ARGUMENT.
    pub arg: Option<u32>,
}

impl Instruction {
    /// Offset de l'instruction suivante.
    pub const fn next_offset(&self) -> u32 { self.offset + self.size }

    /// Argument, 0 si absent.
    pub fn arg(&self) -> u32 { self.arg.unwrap_or(0) }

    /// Offset visé si l'instruction est un saut.
    pub fn jump_target(&self) -> Option<u32> {
        match self.opcode.jump()? {
            JumpKind::Relative => self.next_offset().checked_add(self.arg()),
            JumpKind::Absolute => Some(self.arg()),
        }
    }
}

/// Décode un flux `co_code` complet.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut out = Vec::with_capacity(code.len() / 2);
    let mut pos = 0usize;
    let mut pending: Option<(u32, u32)> = None;
    while pos < code.len() {
        let offset = pos as u32;
        let byte = code[pos];
        let opcode = Opcode::from_byte(byte).ok_or(PycError::UnknownOpcode { opcode: byte, offset })?;
        pos += 1;
        let arg = if opcode.has_arg() {
            let raw = code
                .get(pos..pos + 2)
                .ok_or(PycError::MalformedInstruction { offset, reason: "truncated argument" })?;
            pos += 2;
            Some(u32::from(u16::from_le_bytes([raw[0], raw[1]])))
        } else {
            None
        };

        if opcode == Opcode::ExtendedArg {
            if pending.is_some() {
                return Err(PycError::MalformedInstruction { offset, reason: "chained EXTENDED_ARG" });
            }
            pending = Some((offset, arg.unwrap_or(0) << 16));
            continue;
        }

        let (start, arg) = match pending.take() {
            Some((prefix, high)) => {
                if !opcode.has_arg() {
                    return Err(PycError::MalformedInstruction { offset, reason: "EXTENDED_ARG before an opcode without argument" });
                }
                (prefix, arg.map(|a| a | high))
            }
            None => (offset, arg),
        };
        out.push(Instruction { offset: start, size: pos as u32 - start, opcode, arg });
    }
    if let Some((offset, _)) = pending {
        return Err(PycError::MalformedInstruction { offset, reason: "dangling EXTENDED_ARG" });
    }
    Ok(out)
}
