//! javelin-pyc — le format source : bytecode CPython 3.4
//!
//! - `opcode` : jeu d'opcodes 3.4 (énumération fermée, arguments, sauts, effets de pile)
//! - `code` : `CodeObject`, constantes `PyConst`, table des lignes (`lnotab`)
//! - `decode` : flux d'octets → instructions (EXTENDED_ARG fusionné)
//! - `marshal` : lecture/écriture du flux marshal et des fichiers `.pyc`
//! - `asm` : assembleur texte `.pyasm` (tests, fixtures, CLI)
//!
//! ```ignore
//! use javelin_pyc::{asm, decode};
//!
//! let code = asm::assemble(".code <module>\n LOAD_CONST None\n RETURN_VALUE\n.end\n")?;
//! assert_eq!(decode::decode(&code.code)?.len(), 2);
//! ```

#![deny(missing_docs)]

use javelin_core::CoreError;
use thiserror::Error;

pub mod asm;
pub mod code;
pub mod decode;
pub mod marshal;
pub mod opcode;

pub use code::{CodeFlags, CodeObject, PyConst};
pub use decode::{decode, Instruction};
pub use opcode::{JumpKind, Opcode};

/// Alias résultat du crate.
pub type Result<T> = std::result::Result<T, PycError>;

/// Erreurs de décodage, de marshal et d'assemblage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PycError {
    /// Erreur d'I/O mémoire.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Octet d'opcode inconnu de CPython 3.4.
    #[error("unknown opcode {opcode} at offset {offset}")]
    UnknownOpcode {
        /// Octet lu.
        opcode: u8,
        /// Offset de l'instruction.
        offset: u32,
    },
    /// Argument tronqué ou préfixe EXTENDED_ARG mal placé.
    #[error("malformed instruction at offset {offset}: {reason}")]
    MalformedInstruction {
        /// Offset de l'instruction.
        offset: u32,
        /// Description.
        reason: &'static str,
    },

    /// Magic `.pyc` hors de la plage 3.4.
    #[error("unsupported pyc magic {0} (expected a Python 3.4 file)")]
    BadMagic(u16),
    /// Code de type marshal inconnu.
    #[error("unknown marshal type {code:#04x} at offset {at}")]
    UnknownType {
        /// Octet de type (sans FLAG_REF).
        code: u8,
        /// Offset.
        at: usize,
    },
    /// Référence arrière invalide.
    #[error("invalid marshal reference {index} at offset {at}")]
    BadRef {
        /// Index référencé.
        index: u32,
        /// Offset.
        at: usize,
    },
    /// Entier hors de la plage i64.
    #[error("integer constant at offset {at} does not fit in 64 bits")]
    IntOverflow {
        /// Offset.
        at: usize,
    },
    /// Valeur de type inattendu à cet endroit du flux.
    #[error("expected {expected} at offset {at}")]
    Unexpected {
        /// Type attendu.
        expected: &'static str,
        /// Offset.
        at: usize,
    },

    /// Erreur d'assemblage `.pyasm`.
    #[error("pyasm line {line}: {message}")]
    Asm {
        /// Ligne source (1-based).
        line: usize,
        /// Description.
        message: String,
    },
}

impl PycError {
    pub(crate) fn asm(line: usize, message: impl Into<String>) -> Self { Self::Asm { line, message: message.into() } }
}
