//! Erreurs de traduction (par routine) et d'orchestration (par unité).

use std::{io, path::PathBuf};

use javelin_classfile::ClassFileError;
use javelin_pyc::{Opcode, PycError};
use thiserror::Error;

/// Échec de traduction d'une routine.
///
/// Chaque variante situe la faute : routine (`co_name`) puis offset source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// Opcode ou forme d'opcode hors du sous-ensemble traduit.
    #[error("{routine}@{offset}: unsupported {opcode}: {reason}")]
    Unsupported {
        /// Routine fautive.
        routine: String,
        /// Offset source.
        offset: u32,
        /// Opcode.
        opcode: Opcode,
        /// Précision.
        reason: String,
    },

    /// Constante de `co_consts` sans représentation runtime.
    #[error("{routine}@{offset}: unsupported constant of type {type_name}")]
    UnsupportedConstant {
        /// Routine fautive.
        routine: String,
        /// Offset source.
        offset: u32,
        /// Type Python de la constante.
        type_name: &'static str,
    },

    /// Bytecode incohérent (blocs mal imbriqués, cible hors instruction, index hors table).
    #[error("{routine}@{offset}: malformed {opcode}: {reason}")]
    Malformed {
        /// Routine fautive.
        routine: String,
        /// Offset source.
        offset: u32,
        /// Opcode.
        opcode: Opcode,
        /// Précision.
        reason: String,
    },

    /// Profondeur de pile négative ou incohérente à une jonction.
    #[error("{routine}@{offset}: stack discipline at {opcode}: {reason}")]
    Stack {
        /// Routine fautive.
        routine: String,
        /// Offset source.
        offset: u32,
        /// Opcode.
        opcode: Opcode,
        /// Précision.
        reason: String,
    },

    /// Saut, code ou locaux au-delà des largeurs du format cible.
    #[error("{routine}: addressing overflow: {source}")]
    Addressing {
        /// Routine fautive.
        routine: String,
        /// Cause côté class file.
        source: ClassFileError,
    },

    /// Mauvais usage de la table des constantes.
    #[error("{routine}: constant table: {source}")]
    ConstantTable {
        /// Routine fautive.
        routine: String,
        /// Cause côté class file.
        source: ClassFileError,
    },

    /// `co_code` indécodable.
    #[error("{routine}: {source}")]
    Decode {
        /// Routine fautive.
        routine: String,
        /// Cause côté décodeur.
        source: PycError,
    },

    /// Autre échec du class file (assemblage de la classe).
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
}

impl TranslateError {
    /// Routine en cause, si connue.
    pub fn routine(&self) -> Option<&str> {
        match self {
            Self::Unsupported { routine, .. }
            | Self::UnsupportedConstant { routine, .. }
            | Self::Malformed { routine, .. }
            | Self::Stack { routine, .. }
            | Self::Addressing { routine, .. }
            | Self::ConstantTable { routine, .. }
            | Self::Decode { routine, .. } => Some(routine),
            Self::ClassFile(_) => None,
        }
    }
}

/// Échec de l'orchestration.
#[derive(Debug, Error)]
pub enum TranspileError {
    /// Une unité n'a pas pu être traduite.
    #[error("unit `{unit}`: {source}")]
    Unit {
        /// Nom pointé de l'unité.
        unit: String,
        /// Cause.
        #[source]
        source: TranslateError,
    },

    /// Deux unités de même nom.
    #[error("duplicate unit `{0}`")]
    DuplicateUnit(String),

    /// Nom d'unité vide ou composant non identifiant.
    #[error("invalid unit name `{0}`")]
    InvalidUnitName(String),

    /// Fichier source illisible.
    #[error("cannot load `{path}`: {source}")]
    Load {
        /// Fichier.
        path: PathBuf,
        /// Cause.
        #[source]
        source: PycError,
    },

    /// Entrée/sortie.
    #[error("{path}: {source}")]
    Io {
        /// Fichier ou dossier.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },
}

impl TranspileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
