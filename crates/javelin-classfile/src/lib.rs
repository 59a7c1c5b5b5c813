//! javelin-classfile — le conteneur binaire cible (class file JVM)
//!
//! - `constants` : table des constantes dédupliquée, finalisable
//! - `class` : modèle logique (`ClassFile`, membres, attributs, `Code`)
//! - `write` / `read` : sérialisation big-endian et relecture vérifiée
//! - `code` : assembleur de l'attribut `Code` (labels, pile, exceptions, lignes)
//! - `opcodes` / `descriptor` : jeu d'instructions et effets de pile
//! - `verify` : intégrité des sauts + simulation de pile
//! - `disasm` : rendu texte façon `javap`
//!
//! Une seule version de format est produite : 49.0 (pas de StackMapTable).
//!
//! ```ignore
//! use javelin_classfile::{ClassAccess, ClassBuilder, ClassFile};
//!
//! let mut cb = ClassBuilder::new("demo/Hello", "java/lang/Object", ClassAccess::PUBLIC | ClassAccess::SUPER)?;
//! // ... add_method(...)
//! let class = cb.build();
//! let bytes = class.to_bytes()?;
//! assert_eq!(ClassFile::from_bytes(&bytes)?, class);
//! ```

#![deny(missing_docs)]

use std::borrow::Cow;

use javelin_core::CoreError;
use thiserror::Error;

pub mod class;
pub mod code;
pub mod constants;
pub mod descriptor;
pub mod disasm;
pub mod mutf8;
pub mod opcodes;
pub mod read;
pub mod verify;
pub mod write;

pub use class::{
    Attribute, AttributeInfo, ClassAccess, ClassBuilder, ClassFile, Code, ExceptionEntry,
    LineNumber, Member, MemberAccess,
};
pub use code::{CodeBuilder, InvokeKind, Label};
pub use constants::{Constant, ConstantPool};

/* ───────────────────────────── Constantes de format ───────────────────────────── */

/// Magic d'un class file.
pub const MAGIC: u32 = 0xCAFE_BABE;
/// Version majeure produite (Java 5 : pas de StackMapTable exigée).
pub const MAJOR_VERSION: u16 = 49;
/// Version mineure produite.
pub const MINOR_VERSION: u16 = 0;
/// Plus ancienne version majeure acceptée en lecture.
pub const MIN_READ_MAJOR: u16 = 45;
/// Plus récente version majeure acceptée en lecture.
pub const MAX_READ_MAJOR: u16 = 52;

/// Alias résultat du crate.
pub type Result<T> = std::result::Result<T, ClassFileError>;

/* ───────────────────────────── Erreurs ───────────────────────────── */

/// Erreurs du conteneur, de la table des constantes et de l'assembleur.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    /// Erreur d'I/O mémoire (EOF, longueur).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Insertion après `finalize()`.
    #[error("constant pool is finalized; late insertion of {0}")]
    PoolFinalized(String),
    /// Plus de 65535 emplacements.
    #[error("constant pool overflow (more than 65535 slots)")]
    PoolOverflow,
    /// Sérialisation d'une table non finalisée.
    #[error("constant pool must be finalized before writing")]
    PoolNotFinalized,
    /// Référence vers une entrée absente ou d'un autre genre.
    #[error("constant #{index} is not a resolved {expected} entry")]
    UnresolvedConstant {
        /// Index fautif.
        index: u16,
        /// Genre attendu.
        expected: &'static str,
    },
    /// Index hors table.
    #[error("constant index #{index} out of range (pool has {count} slots)")]
    IndexOutOfRange {
        /// Index fautif.
        index: u16,
        /// `constant_pool_count`.
        count: u16,
    },
    /// Chaîne trop longue pour une entrée Utf8.
    #[error("utf8 constant too long ({0} encoded bytes)")]
    Utf8TooLong(usize),

    /// Magic invalide.
    #[error("bad magic 0x{0:08X}")]
    BadMagic(u32),
    /// Version non prise en charge.
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion {
        /// Majeure lue.
        major: u16,
        /// Mineure lue.
        minor: u16,
    },
    /// Tag de constante inconnu (section obligatoire).
    #[error("unknown constant tag {tag} at index #{index}")]
    UnknownTag {
        /// Tag lu.
        tag: u8,
        /// Position dans la table.
        index: u16,
    },
    /// Longueur déclarée incohérente avec le contenu.
    #[error("length mismatch in {section}: declared {declared}, parsed {parsed}")]
    LengthMismatch {
        /// Section concernée.
        section: Cow<'static, str>,
        /// Longueur déclarée.
        declared: u64,
        /// Longueur effectivement consommée.
        parsed: u64,
    },
    /// Utf8 modifié invalide.
    #[error("invalid modified utf-8 in constant #{0}")]
    BadUtf8(u16),

    /// Profondeur de pile négative.
    #[error("operand stack underflow at pc {pc} ({opcode})")]
    StackUnderflow {
        /// Offset de l'instruction.
        pc: u32,
        /// Mnémonique.
        opcode: &'static str,
    },
    /// Profondeur de pile au-delà de 65535 mots.
    #[error("operand stack exceeds 65535 words at pc {pc}")]
    StackOverflow {
        /// Offset de l'instruction.
        pc: u32,
    },
    /// Saut relatif hors de la plage i16.
    #[error("branch at pc {from} to pc {to} exceeds the signed 16-bit range")]
    BranchOutOfRange {
        /// Offset de l'instruction de saut.
        from: u32,
        /// Offset cible.
        to: u32,
    },
    /// Label référencé mais jamais posé.
    #[error("label L{0} referenced but never bound")]
    UnboundLabel(u32),
    /// Label posé deux fois.
    #[error("label L{0} bound twice")]
    LabelRebound(u32),
    /// Code plus long que 65535 octets.
    #[error("code length {0} exceeds 65535 bytes")]
    CodeTooLarge(usize),
    /// Trop de variables locales.
    #[error("too many local slots ({0})")]
    TooManyLocals(u32),
    /// Descripteur de champ/méthode invalide.
    #[error("invalid descriptor `{0}`")]
    BadDescriptor(String),
    /// Flux d'instructions invalide (décodage, cible de saut, incohérence de pile).
    #[error("invalid code at pc {pc}: {reason}")]
    InvalidCode {
        /// Offset concerné.
        pc: u32,
        /// Description.
        reason: String,
    },
}

impl ClassFileError {
    /// Erreur de discipline de pile (profondeur négative ou trop grande).
    pub const fn is_stack_discipline(&self) -> bool {
        matches!(self, Self::StackUnderflow { .. } | Self::StackOverflow { .. })
    }

    /// Dépassement d'une largeur de champ (saut, table, code, locales).
    pub const fn is_addressing(&self) -> bool {
        matches!(
            self,
            Self::BranchOutOfRange { .. }
                | Self::CodeTooLarge(_)
                | Self::TooManyLocals(_)
                | Self::PoolOverflow
                | Self::Utf8TooLong(_)
        )
    }

    /// Mauvaise utilisation de la table des constantes.
    pub const fn is_constant_table(&self) -> bool {
        matches!(
            self,
            Self::PoolFinalized(_) | Self::PoolNotFinalized | Self::UnresolvedConstant { .. }
        )
    }

    pub(crate) fn invalid_code(pc: u32, reason: impl Into<String>) -> Self {
        Self::InvalidCode { pc, reason: reason.into() }
    }
}
