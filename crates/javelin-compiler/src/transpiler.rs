//! Orchestration : registre d'unités, dépendances, traduction, écriture.

use std::{
    collections::{BTreeSet, VecDeque},
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use javelin_classfile::ClassFile;
use javelin_pyc::{asm, decode, marshal, CodeObject, Opcode, PyConst};
use tracing::{debug, info};

use crate::{
    error::{TranslateError, TranspileError},
    module::{build_module, class_name},
    options::TranspileOptions,
};

/// Une unité source : nom pointé, origine, objet code racine.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    /// Nom pointé (`pkg.mod`).
    pub name: String,
    /// Origine (chemin du fichier source, pour `SourceFile`).
    pub source_id: String,
    /// Objet code du module.
    pub code: CodeObject,
}

impl SourceUnit {
    /// Nouvelle unité.
    pub fn new(name: impl Into<String>, source_id: impl Into<String>, code: CodeObject) -> Self {
        Self { name: name.into(), source_id: source_id.into(), code }
    }
}

/// Une unité traduite.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedUnit {
    /// Nom pointé de l'unité.
    pub unit: String,
    /// Nom interne de la classe.
    pub class_name: String,
    /// Classe construite.
    pub class: ClassFile,
    /// Octets sérialisés.
    pub bytes: Vec<u8>,
}

impl TranslatedUnit {
    /// Chemin relatif du `.class` (`python/a/b/__init__.class`).
    pub fn relative_path(&self) -> PathBuf {
        let mut path: PathBuf = self.class_name.split('/').collect();
        path.set_extension("class");
        path
    }
}

/* ───────────────────────────── Dépendances ───────────────────────────── */

/// Unités importées statiquement par `code` (routines imbriquées comprises).
///
/// Les imports relatifs sont résolus contre le paquet de `unit` (l'unité
/// elle-même si `co_filename` est un `__init__`). Chaque import ajoute aussi
/// ses paquets parents ; l'unité elle-même est exclue.
pub fn dependencies(unit: &str, code: &CodeObject) -> Vec<String> {
    let mut package: Vec<&str> = unit.split('.').collect();
    if !matches!(Path::new(&code.filename).file_stem(), Some(stem) if stem == "__init__") {
        package.pop();
    }
    let mut found = BTreeSet::new();
    collect_imports(&package, code, &mut found);
    found.remove(unit);
    found.into_iter().collect()
}

fn collect_imports(package: &[&str], code: &CodeObject, found: &mut BTreeSet<String>) {
    // Code indécodable : la traduction le signalera.
    let insns = decode(&code.code).unwrap_or_default();
    for (i, insn) in insns.iter().enumerate() {
        if insn.opcode != Opcode::ImportName {
            continue;
        }
        let Some(name) = code.names.get(insn.arg() as usize) else { continue };
        let level = i
            .checked_sub(2)
            .map(|j| insns[j])
            .filter(|prev| prev.opcode == Opcode::LoadConst)
            .and_then(|prev| match code.consts.get(prev.arg() as usize) {
                Some(PyConst::Int(level)) => usize::try_from(*level).ok(),
                _ => None,
            })
            .unwrap_or(0);
        if let Some(target) = resolve(package, name, level) {
            let mut prefix = String::new();
            for part in target.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(part);
                found.insert(prefix.clone());
            }
        }
    }
    for nested in code.nested() {
        collect_imports(package, nested, found);
    }
}

/// `from ..x import y` dans le paquet `a.b` → `a.x`.
fn resolve(package: &[&str], name: &str, level: usize) -> Option<String> {
    if level == 0 {
        return (!name.is_empty()).then(|| name.to_owned());
    }
    let keep = package.len().checked_sub(level - 1)?;
    let mut base = package[..keep].join(".");
    if !name.is_empty() {
        if !base.is_empty() {
            base.push('.');
        }
        base.push_str(name);
    }
    (!base.is_empty()).then_some(base)
}

fn valid_unit_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars.next().is_some_and(|c| c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        })
}

/* ───────────────────────────── Chargement ───────────────────────────── */

/// Source d'unités par nom, pour le chargement transitif.
pub trait UnitLoader {
    /// Charge `name` ; `Ok(None)` si l'unité est introuvable.
    fn load(&self, name: &str) -> Result<Option<SourceUnit>, TranspileError>;
}

/// Cherche `a/b.pyc`, `a/b/__init__.pyc` puis leurs variantes `.pyasm` sous chaque racine.
#[derive(Debug, Clone, Default)]
pub struct PathLoader {
    roots: Vec<PathBuf>,
}

impl PathLoader {
    /// Loader sur des racines, dans l'ordre de recherche.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self { Self { roots: roots.into_iter().collect() } }

    /// Racines de recherche.
    pub fn roots(&self) -> &[PathBuf] { &self.roots }

    fn candidates(&self, name: &str) -> impl Iterator<Item = PathBuf> + '_ {
        let rel: PathBuf = name.split('.').collect();
        self.roots.iter().flat_map(move |root| {
            let base = root.join(&rel);
            ["pyc", "pyasm"]
                .into_iter()
                .flat_map(move |ext| [base.with_extension(ext), base.join("__init__").with_extension(ext)])
        })
    }
}

impl UnitLoader for PathLoader {
    fn load(&self, name: &str) -> Result<Option<SourceUnit>, TranspileError> {
        match self.candidates(name).find(|p| p.is_file()) {
            Some(path) => load_file(&path, name).map(Some),
            None => Ok(None),
        }
    }
}

/// Lit un `.pyc` (ou un `.pyasm`) en unité nommée `name`.
pub fn load_file(path: &Path, name: &str) -> Result<SourceUnit, TranspileError> {
    let code = if path.extension().is_some_and(|e| e == "pyasm") {
        let text = fs::read_to_string(path).map_err(|e| TranspileError::io(path, e))?;
        asm::assemble(&text)
    } else {
        let bytes = fs::read(path).map_err(|e| TranspileError::io(path, e))?;
        marshal::read_pyc(&bytes).map(|(_, code)| code)
    }
    .map_err(|source| TranspileError::Load { path: path.to_owned(), source })?;
    debug!(unit = name, path = %path.display(), "unit loaded");
    Ok(SourceUnit::new(name, path.display().to_string(), code))
}

/* ───────────────────────────── Transpiler ───────────────────────────── */

/// Registre ordonné d'unités à traduire ensemble.
#[derive(Debug, Clone, Default)]
pub struct Transpiler {
    options: TranspileOptions,
    units: IndexMap<String, SourceUnit>,
}

impl Transpiler {
    /// Registre vide.
    pub fn new(options: TranspileOptions) -> Self { Self { options, units: IndexMap::new() } }

    /// Options en vigueur.
    pub fn options(&self) -> &TranspileOptions { &self.options }

    /// Nombre d'unités.
    pub fn len(&self) -> usize { self.units.len() }

    /// Aucune unité ?
    pub fn is_empty(&self) -> bool { self.units.is_empty() }

    /// Unité déjà enregistrée ?
    pub fn contains(&self, name: &str) -> bool { self.units.contains_key(name) }

    /// Unités dans l'ordre d'ajout.
    pub fn units(&self) -> impl Iterator<Item = &SourceUnit> { self.units.values() }

    /// Ajoute une unité ; nom invalide ou déjà pris refusé.
    pub fn add_unit(&mut self, unit: SourceUnit) -> Result<(), TranspileError> {
        if !valid_unit_name(&unit.name) {
            return Err(TranspileError::InvalidUnitName(unit.name));
        }
        if self.units.contains_key(&unit.name) {
            return Err(TranspileError::DuplicateUnit(unit.name));
        }
        debug!(unit = %unit.name, source = %unit.source_id, "unit registered");
        self.units.insert(unit.name.clone(), unit);
        Ok(())
    }

    /// Ajoute `unit` puis, transitivement, les unités qu'elle importe et que
    /// `loader` trouve. Les imports introuvables restent à la charge du runtime.
    pub fn add_with_dependencies(&mut self, unit: SourceUnit, loader: &dyn UnitLoader) -> Result<(), TranspileError> {
        let mut queue: VecDeque<String> = dependencies(&unit.name, &unit.code).into();
        self.add_unit(unit)?;
        while let Some(name) = queue.pop_front() {
            if self.contains(&name) {
                continue;
            }
            match loader.load(&name)? {
                Some(dep) => {
                    queue.extend(dependencies(&dep.name, &dep.code));
                    self.add_unit(dep)?;
                }
                None => debug!(unit = %name, "import not found, left to the runtime"),
            }
        }
        Ok(())
    }

    /// Traduit toutes les unités ; résultats dans l'ordre d'ajout, première erreur dans ce même ordre.
    pub fn transpile(&self) -> Result<Vec<TranslatedUnit>, TranspileError> {
        let units: Vec<&SourceUnit> = self.units.values().collect();
        info!(units = units.len(), namespace = %self.options.namespace, "transpiling");
        let results = self.run(&units);
        let outputs = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        info!(units = outputs.len(), bytes = outputs.iter().map(|o| o.bytes.len()).sum::<usize>(), "transpiled");
        Ok(outputs)
    }

    #[cfg(feature = "parallel")]
    fn run(&self, units: &[&SourceUnit]) -> Vec<Result<TranslatedUnit, TranspileError>> {
        use rayon::prelude::*;
        if self.options.parallel {
            units.par_iter().map(|u| self.translate_unit(u)).collect()
        } else {
            units.iter().map(|u| self.translate_unit(u)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn run(&self, units: &[&SourceUnit]) -> Vec<Result<TranslatedUnit, TranspileError>> {
        units.iter().map(|u| self.translate_unit(u)).collect()
    }

    fn translate_unit(&self, unit: &SourceUnit) -> Result<TranslatedUnit, TranspileError> {
        let wrap = |source: TranslateError| TranspileError::Unit { unit: unit.name.clone(), source };
        let class = build_module(unit, &self.options).map_err(wrap)?;
        let bytes = class.to_bytes().map_err(|e| wrap(e.into()))?;
        let class_name = class_name(&self.options.namespace_path(), &unit.name);
        info!(unit = %unit.name, class = %class_name, bytes = bytes.len(), "unit translated");
        Ok(TranslatedUnit { unit: unit.name.clone(), class_name, class, bytes })
    }
}

/// Écrit chaque classe sous `dir` ; rend les chemins écrits.
pub fn write_all(dir: impl AsRef<Path>, outputs: &[TranslatedUnit]) -> Result<Vec<PathBuf>, TranspileError> {
    let dir = dir.as_ref();
    let mut written = Vec::with_capacity(outputs.len());
    for out in outputs {
        let path = dir.join(out.relative_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TranspileError::io(parent, e))?;
        }
        fs::write(&path, &out.bytes).map_err(|e| TranspileError::io(&path, e))?;
        debug!(path = %path.display(), bytes = out.bytes.len(), "class written");
        written.push(path);
    }
    Ok(written)
}

/* ───────────────────────────── Tests ───────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use javelin_pyc::asm::assemble;
    use pretty_assertions::assert_eq;

    fn unit(name: &str, src: &str) -> SourceUnit { SourceUnit::new(name, format!("{name}.py"), assemble(src).unwrap()) }

    const HELLO: &str = "
.code <module>
    LOAD_NAME print
    LOAD_CONST 'hello'
    CALL_FUNCTION 1
    POP_TOP
    LOAD_CONST None
    RETURN_VALUE
.end
";

    const IMPORTS: &str = "
.code <module>
    LOAD_CONST 0
    LOAD_CONST None
    IMPORT_NAME os.path
    STORE_NAME os
    LOAD_CONST 1
    LOAD_CONST None
    IMPORT_NAME helpers
    STORE_NAME helpers
    LOAD_CONST 2
    LOAD_CONST None
    IMPORT_NAME parent
    STORE_NAME up
    LOAD_CONST None
    RETURN_VALUE
.end
";

    #[test]
    fn relative_imports_resolve_against_the_package() {
        let mut code = assemble(IMPORTS).unwrap();
        // `from .. import x` porte un nom vide
        let parent = code.names.iter().position(|n| n == "parent").unwrap();
        code.names[parent].clear();

        let deps = dependencies("app.pkg.main", &code);
        assert_eq!(deps, vec!["app", "app.pkg", "app.pkg.helpers", "os", "os.path"]);

        code.filename = "app/pkg/__init__.py".into();
        let deps = dependencies("app.pkg", &code);
        assert_eq!(deps, vec!["app", "app.pkg.helpers", "os", "os.path"]);
    }

    #[test]
    fn resolution_rules() {
        assert_eq!(resolve(&["a", "b"], "x", 1), Some("a.b.x".into()));
        assert_eq!(resolve(&["a", "b"], "", 2), Some("a".into()));
        assert_eq!(resolve(&[], "x", 2), None);
        assert_eq!(resolve(&["a"], "", 0), None);
    }

    #[test]
    fn registry_rejects_bad_names_and_duplicates() {
        let mut t = Transpiler::new(TranspileOptions::default());
        t.add_unit(unit("hello", HELLO)).unwrap();
        assert!(matches!(t.add_unit(unit("hello", HELLO)), Err(TranspileError::DuplicateUnit(n)) if n == "hello"));
        assert!(matches!(t.add_unit(unit("a..b", HELLO)), Err(TranspileError::InvalidUnitName(_))));
        assert!(matches!(t.add_unit(unit("9lives", HELLO)), Err(TranspileError::InvalidUnitName(_))));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn parallel_and_serial_agree() {
        let build = |parallel| {
            let mut t = Transpiler::new(TranspileOptions { parallel, ..TranspileOptions::default() });
            for name in ["zeta", "alpha", "pkg.mid"] {
                t.add_unit(unit(name, HELLO)).unwrap();
            }
            t.transpile().unwrap()
        };
        let (a, b) = (build(true), build(false));
        assert_eq!(a.iter().map(|o| o.unit.as_str()).collect::<Vec<_>>(), vec!["zeta", "alpha", "pkg.mid"]);
        assert_eq!(a, b);
        assert_eq!(a[2].relative_path(), PathBuf::from("python/pkg/mid/__init__.class"));
    }

    #[test]
    fn first_failure_in_unit_order_is_reported() {
        let bad = ".code <module>\n    LOAD_CONST None\n    YIELD_VALUE\n    RETURN_VALUE\n.end\n";
        let mut t = Transpiler::new(TranspileOptions::default());
        t.add_unit(unit("ok", HELLO)).unwrap();
        t.add_unit(unit("first", bad)).unwrap();
        t.add_unit(unit("second", bad)).unwrap();
        let err = t.transpile().unwrap_err();
        assert!(matches!(err, TranspileError::Unit { ref unit, .. } if unit == "first"), "{err}");
    }

    #[test]
    fn outputs_land_under_the_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = Transpiler::new(TranspileOptions { namespace: "org.demo".into(), ..TranspileOptions::default() });
        t.add_unit(unit("a.b", HELLO)).unwrap();
        let written = write_all(dir.path(), &t.transpile().unwrap()).unwrap();
        let expected = dir.path().join("org/demo/a/b/__init__.class");
        assert_eq!(written, vec![expected.clone()]);
        let bytes = fs::read(expected).unwrap();
        assert_eq!(ClassFile::from_bytes(&bytes).unwrap().name().unwrap(), "org/demo/a/b/__init__");
    }

    #[test]
    fn loader_follows_imports_transitively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("app/util")).unwrap();
        let main = "
.code <module>
    LOAD_CONST 0
    LOAD_CONST None
    IMPORT_NAME app.util
    STORE_NAME app
    LOAD_CONST 0
    LOAD_CONST None
    IMPORT_NAME sys
    STORE_NAME sys
    LOAD_CONST None
    RETURN_VALUE
.end
";
        let util = "
.code <module>
    LOAD_CONST 1
    LOAD_CONST None
    IMPORT_NAME shared
    STORE_NAME shared
    LOAD_CONST None
    RETURN_VALUE
.end
";
        fs::write(root.join("app/__init__.pyasm"), HELLO).unwrap();
        fs::write(root.join("app/util/__init__.pyasm"), util).unwrap();
        let shared = assemble(HELLO).unwrap();
        fs::write(root.join("app/shared.pyc"), marshal::write_pyc(&shared, 0, 0)).unwrap();

        let loader = PathLoader::new([root.to_path_buf()]);
        let mut t = Transpiler::new(TranspileOptions::default());
        t.add_with_dependencies(unit("main", main), &loader).unwrap();
        let names: Vec<&str> = t.units().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["main", "app", "app.util", "app.shared"]);
        assert!(!t.contains("sys"));
        assert!(t.units().nth(3).unwrap().source_id.ends_with("shared.pyc"));
    }
}
