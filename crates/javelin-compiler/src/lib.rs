// src/lib.rs
//! javelin-compiler : bytecode CPython 3.4 → classes JVM (version 49)
//!
//! - Entrée : des unités (`SourceUnit`) portant un `CodeObject` racine
//! - Sortie : une classe `<ns>/a/b/__init__` par unité, en mémoire ou sur disque
//! - `blocks` : arbre des blocs structurés d'une routine (boucles, protections, handlers)
//! - `translate` : traduction instruction par instruction d'une routine
//! - `module` : assemblage de la classe (`<clinit>`, `main`, `module`, fonctions)
//! - `transpiler` : registre d'unités, dépendances, traduction parallèle, écriture
//! - `runtime` : noms et descripteurs de l'ABI runtime visée
//!
//! Features :
//! - `serde` (par défaut) : `TranspileOptions` (dé)sérialisable
//! - `parallel` (par défaut) : unités traduites sur le pool rayon
//!
//! API principale :
//! ```ignore
//! use javelin_compiler::{SourceUnit, Transpiler, TranspileOptions};
//!
//! let mut t = Transpiler::new(TranspileOptions::default());
//! t.add_unit(SourceUnit::new("example", "example.py", code))?;
//! let outputs = t.transpile()?;
//! javelin_compiler::write_all("out", &outputs)?;
//! ```

#![deny(missing_docs)]

pub mod blocks;
pub mod error;
pub mod module;
pub mod options;
pub mod runtime;
pub mod translate;
pub mod transpiler;

pub use error::{TranslateError, TranspileError};
pub use module::{build_module, class_name};
pub use options::TranspileOptions;
pub use transpiler::{
    dependencies, load_file, write_all, PathLoader, SourceUnit, TranslatedUnit, Transpiler, UnitLoader,
};
