//! javelin-harness — exécution comparée Python / JVM des modules produits
//!
//! - `adjust` : mise en forme des extraits (dédentation, enveloppe de fonction)
//! - `normalize` : normalisation des sorties (exceptions, piles, adresses, fins de ligne)
//! - `daemon` : client du démon de test (une unité par ligne, terminateur `.`)
//! - `command` : invocation directe `java`, interpréteur de référence, suite configurée,
//!   comparaison Python / JVM d'un extrait (`Suite::assert_code_execution`)
//! - `cases` : données d'échantillon et extraits d'opérations générés
//!
//! Le harness ne lance rien tout seul : le build du runtime et la JVM sont
//! fournis par l'appelant (`Suite::configure`, `Daemon::spawn`).

#![deny(missing_docs)]

pub mod adjust;
pub mod cases;
pub mod command;
pub mod daemon;
pub mod normalize;

pub use adjust::adjust;
pub use cases::{Case, SAMPLE_DATA};
pub use command::{compare_outputs, JavaCommand, PythonRun, Suite};
pub use daemon::{merge_output, Daemon, DaemonClient, StderrTail};
pub use normalize::{cleanse_java, cleanse_python};

/// Nom Java (`python.test.__init__`) d'un nom interne (`python/test/__init__`).
pub fn binary_name(internal: &str) -> String { internal.replace('/', ".") }
