//! Options de transpilation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options communes à toutes les unités d'une transpilation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct TranspileOptions {
    /// Préfixe de paquet des classes produites (`python` → `python/a/b/__init__`).
    pub namespace: String,
    /// Émettre l'attribut `LineNumberTable`.
    pub emit_line_numbers: bool,
    /// Émettre l'attribut `SourceFile`.
    pub emit_source_file: bool,
    /// Traduire les unités en parallèle (feature `parallel`).
    pub parallel: bool,
}

impl Default for TranspileOptions {
    fn default() -> Self {
        Self {
            namespace: "python".to_owned(),
            emit_line_numbers: true,
            emit_source_file: true,
            parallel: true,
        }
    }
}

impl TranspileOptions {
    /// Préfixe de paquet sans `/` de bord ; `.` accepté comme séparateur.
    pub fn namespace_path(&self) -> String {
        self.namespace.trim_matches(|c| c == '/' || c == '.').replace('.', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn namespace_accepts_dotted_form() {
        let opts = TranspileOptions { namespace: "org.demo/".into(), ..TranspileOptions::default() };
        assert_eq!(opts.namespace_path(), "org/demo");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_config_keeps_defaults() {
        let opts: TranspileOptions = serde_json::from_str(r#"{ "namespace": "demo", "parallel": false }"#).unwrap();
        assert_eq!(
            opts,
            TranspileOptions { namespace: "demo".into(), parallel: false, ..TranspileOptions::default() }
        );
        assert!(serde_json::from_str::<TranspileOptions>(r#"{ "nope": 1 }"#).is_err());
    }
}
