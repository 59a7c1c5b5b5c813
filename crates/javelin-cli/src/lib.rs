//! javelin-cli — bibliothèque interne du binaire `javelin`
//!
//! `main.rs` ne fait que parser les arguments et initialiser logger et
//! couleurs ; tout le reste (chargement des unités, écriture atomique,
//! rendus texte/JSON) vit ici pour être testé sans processus.
//!
//! - Traces (`feature = "trace"`) et couleurs (`feature = "color"`) optionnelles

#![forbid(unsafe_code)]

use std::{
    ffi::OsStr,
    fmt::Write as _,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{anyhow, bail, Context, Result};
use javelin_classfile::{disasm::disassemble, verify::check_class, ClassFile};
use javelin_compiler::{blocks::BlockTree, load_file, write_all, PathLoader, TranspileOptions, Transpiler};
use javelin_pyc::{asm::assemble, decode, marshal::write_pyc, CodeObject, PyConst};
use serde::Serialize;

#[cfg(feature = "color")]
use owo_colors::OwoColorize;

// ───────────────────────────── Types publics ─────────────────────────────

/// Commande haut-niveau (le parsing reste dans main.rs).
#[derive(Clone, Debug)]
pub enum Command {
    /// `.pyc`/`.pyasm` → classes JVM.
    Transpile(TranspileTask),
    /// Class file → texte façon `javap`.
    Disasm(DisasmTask),
    /// Résumé d'un class file (texte ou JSON).
    Inspect(InspectTask),
    /// `.pyasm` → `.pyc`.
    Asm(AsmTask),
    /// `.pyc`/`.pyasm` → listing des instructions source.
    Dis(DisTask),
}

/// Paramètres de `transpile`.
#[derive(Clone, Debug, Default)]
pub struct TranspileTask {
    /// Unités d'entrée (`.pyc` ou `.pyasm`), dans l'ordre.
    pub inputs: Vec<PathBuf>,
    /// Répertoire de sortie des classes.
    pub output_dir: PathBuf,
    /// Racines de recherche des imports.
    pub search_paths: Vec<PathBuf>,
    /// Fichier JSON de `TranspileOptions`.
    pub config: Option<PathBuf>,
    /// Préfixe de paquet (prioritaire sur la configuration).
    pub namespace: Option<String>,
    /// Pas de `LineNumberTable`.
    pub no_lines: bool,
    /// Traduction séquentielle.
    pub serial: bool,
    /// Afficher la durée.
    pub time: bool,
}

/// Paramètres de `disasm`.
#[derive(Clone, Debug, Default)]
pub struct DisasmTask {
    /// Class file.
    pub input: PathBuf,
    /// Fichier texte (stdout si absent).
    pub output: Option<PathBuf>,
}

/// Paramètres de `inspect`.
#[derive(Clone, Debug, Default)]
pub struct InspectTask {
    /// Class file.
    pub input: PathBuf,
    /// Sortie JSON.
    pub json: bool,
}

/// Paramètres de `asm`.
#[derive(Clone, Debug, Default)]
pub struct AsmTask {
    /// Source `.pyasm`.
    pub input: PathBuf,
    /// `.pyc` produit (même nom par défaut).
    pub output: Option<PathBuf>,
}

/// Paramètres de `dis`.
#[derive(Clone, Debug, Default)]
pub struct DisTask {
    /// `.pyc` ou `.pyasm`.
    pub input: PathBuf,
    /// Afficher l'arbre des blocs structurés au lieu du listing plat.
    pub blocks: bool,
}

// ───────────────────────────── Initialisation ─────────────────────────────

/// Filtre par défaut selon `-v`/`-q` : `info` sans option.
pub const fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialise le logger selon la feature `trace` ; `RUST_LOG` garde la main.
pub fn init_logger(default_filter: &str) {
    #[cfg(feature = "trace")]
    {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
            .format_timestamp_secs()
            .try_init();
    }
    #[cfg(not(feature = "trace"))]
    let _ = default_filter;
}

// ───────────────────────────── Exécution ─────────────────────────────

/// Exécute une commande. Retourne un code de sortie.
pub fn execute(cmd: Command) -> Result<i32> {
    match cmd {
        Command::Transpile(t) => transpile_entry(&t).map(|_| 0),
        Command::Disasm(t) => {
            let text = disasm_text(&t.input)?;
            emit_text(t.output.as_deref(), &text)?;
            if let Some(p) = &t.output {
                status_ok("DISASM", &display(p));
            }
            Ok(0)
        },
        Command::Inspect(t) => {
            let summary = inspect_class(&t.input)?;
            let text = if t.json {
                let mut s = serde_json::to_string_pretty(&summary)?;
                s.push('\n');
                s
            } else {
                summary.render()
            };
            emit_text(None, &text)?;
            Ok(if summary.verified { 0 } else { 2 })
        },
        Command::Asm(t) => {
            let out = asm_entry(&t)?;
            status_ok("ASM", &display(&out));
            Ok(0)
        },
        Command::Dis(t) => {
            let text = dis_text(&t.input, t.blocks)?;
            emit_text(None, &text)?;
            Ok(0)
        },
    }
}

/// Options effectives : configuration JSON puis drapeaux.
pub fn resolve_options(task: &TranspileTask) -> Result<TranspileOptions> {
    let mut opts = match &task.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("lecture config: {}", display(path)))?;
            serde_json::from_str(&text).with_context(|| format!("config invalide: {}", display(path)))?
        },
        None => TranspileOptions::default(),
    };
    if let Some(ns) = &task.namespace {
        opts.namespace.clone_from(ns);
    }
    if task.no_lines {
        opts.emit_line_numbers = false;
    }
    if task.serial {
        opts.parallel = false;
    }
    Ok(opts)
}

/// Nom d'unité d'une entrée : chemin relatif à la première racine qui la
/// contient (`a/b.pyc` → `a.b`, `a/__init__.pyc` → `a`), sinon le nom du fichier.
pub fn unit_name(path: &Path, roots: &[PathBuf]) -> Result<String> {
    let rel = roots.iter().find_map(|r| path.strip_prefix(r).ok()).unwrap_or_else(|| Path::new(""));
    let rel = if rel.as_os_str().is_empty() { Path::new(path.file_name().unwrap_or_default()) } else { rel };
    let mut parts: Vec<String> = rel
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p == "__init__") {
        parts.pop();
    } else if parts.len() == 1 && parts[0] == "__init__" {
        let dir = path
            .parent()
            .and_then(Path::file_name)
            .ok_or_else(|| anyhow!("paquet sans répertoire: {}", display(path)))?;
        parts[0] = dir.to_string_lossy().into_owned();
    }
    let name = parts.join(".");
    if name.is_empty() {
        bail!("nom d'unité vide pour {}", display(path));
    }
    Ok(name)
}

/// Transpile les entrées et leurs imports ; rend les chemins écrits.
pub fn transpile_entry(task: &TranspileTask) -> Result<Vec<PathBuf>> {
    if task.inputs.is_empty() {
        bail!("aucune entrée à transpiler");
    }
    let opts = resolve_options(task)?;
    #[cfg(feature = "trace")]
    log::debug!("options: {opts:?}");

    let mut roots = task.search_paths.clone();
    for input in &task.inputs {
        let parent = input.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        if !roots.contains(&parent) {
            roots.push(parent);
        }
    }
    let loader = PathLoader::new(roots);

    let start = Instant::now();
    let mut transpiler = Transpiler::new(opts);
    for input in &task.inputs {
        let name = unit_name(input, &task.search_paths)?;
        if transpiler.contains(&name) {
            continue;
        }
        let unit = load_file(input, &name)?;
        transpiler.add_with_dependencies(unit, &loader)?;
    }
    let outputs = transpiler.transpile()?;
    let written = write_all(&task.output_dir, &outputs)
        .with_context(|| format!("écriture sous {}", display(&task.output_dir)))?;

    for (out, path) in outputs.iter().zip(&written) {
        status_ok("TRANSPILE", &format!("{} -> {}", out.unit, display(path)));
    }
    if task.time {
        status_info("TIME", &format!("transpile: {} ms", start.elapsed().as_millis()));
    }
    Ok(written)
}

fn read_class(path: &Path) -> Result<ClassFile> {
    let bytes = fs::read(path).with_context(|| format!("lecture class: {}", display(path)))?;
    ClassFile::from_bytes(&bytes).with_context(|| format!("class file invalide: {}", display(path)))
}

/// Désassemblage texte d'un class file.
pub fn disasm_text(path: &Path) -> Result<String> { Ok(disassemble(&read_class(path)?)?) }

/// Compile un `.pyasm` en `.pyc` ; rend le chemin écrit.
pub fn asm_entry(task: &AsmTask) -> Result<PathBuf> {
    let text = fs::read_to_string(&task.input).with_context(|| format!("lecture: {}", display(&task.input)))?;
    let code = assemble(&text).with_context(|| format!("assemblage de {}", display(&task.input)))?;
    let out = task.output.clone().unwrap_or_else(|| task.input.with_extension("pyc"));
    let size = u32::try_from(text.len()).unwrap_or(u32::MAX);
    write_bytes_atomic(&out, &write_pyc(&code, 0, size)).with_context(|| format!("écriture de {}", display(&out)))?;
    Ok(out)
}

// ───────────────────────────── Inspection ─────────────────────────────

/// Résumé d'une méthode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodSummary {
    /// Nom.
    pub name: String,
    /// Descripteur.
    pub descriptor: String,
    /// Taille du bytecode (absent pour une méthode sans `Code`).
    pub code_length: Option<usize>,
    /// `max_stack` déclaré.
    pub max_stack: Option<u16>,
    /// `max_locals` déclaré.
    pub max_locals: Option<u16>,
    /// Entrées de la table d'exceptions.
    pub handlers: usize,
}

/// Résumé d'un class file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    /// Nom interne.
    pub name: String,
    /// Super-classe.
    pub super_class: String,
    /// `major.minor`.
    pub version: String,
    /// Entrées utilisées de la table des constantes.
    pub constants: usize,
    /// Champs (`nom:descripteur`).
    pub fields: Vec<String>,
    /// Méthodes.
    pub methods: Vec<MethodSummary>,
    /// Attribut `SourceFile`.
    pub source_file: Option<String>,
    /// Sauts et pile vérifiés.
    pub verified: bool,
    /// Diagnostic de vérification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl ClassSummary {
    /// Rendu texte.
    pub fn render(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "class {} extends {} (version {})", self.name, self.super_class, self.version);
        let _ = writeln!(s, "  constants: {}", self.constants);
        if let Some(file) = &self.source_file {
            let _ = writeln!(s, "  source:    {file}");
        }
        for f in &self.fields {
            let _ = writeln!(s, "  field  {f}");
        }
        for m in &self.methods {
            match (m.code_length, m.max_stack, m.max_locals) {
                (Some(len), Some(stack), Some(locals)) => {
                    let _ = writeln!(
                        s,
                        "  method {}{}  code={len} stack={stack} locals={locals} handlers={}",
                        m.name, m.descriptor, m.handlers
                    );
                },
                _ => {
                    let _ = writeln!(s, "  method {}{}", m.name, m.descriptor);
                },
            }
        }
        match &self.problem {
            None => s.push_str("  verify: ok\n"),
            Some(p) => {
                let _ = writeln!(s, "  verify: FAILED ({p})");
            },
        }
        s
    }
}

/// Lit, résume et vérifie un class file.
pub fn inspect_class(path: &Path) -> Result<ClassSummary> {
    let class = read_class(path)?;
    let pool = &class.constant_pool;
    let fields = class
        .fields
        .iter()
        .map(|f| Ok(format!("{}:{}", pool.utf8_at(f.name_index)?, pool.utf8_at(f.descriptor_index)?)))
        .collect::<Result<Vec<_>>>()?;
    let methods = class
        .methods
        .iter()
        .map(|m| {
            let code = m.code();
            Ok(MethodSummary {
                name: pool.utf8_at(m.name_index)?.to_owned(),
                descriptor: pool.utf8_at(m.descriptor_index)?.to_owned(),
                code_length: code.map(|c| c.code.len()),
                max_stack: code.map(|c| c.max_stack),
                max_locals: code.map(|c| c.max_locals),
                handlers: code.map_or(0, |c| c.exception_table.len()),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let problem = check_class(&class).err().map(|e| e.to_string());
    Ok(ClassSummary {
        name: class.name()?.to_owned(),
        super_class: pool.class_name_at(class.super_class)?.to_owned(),
        version: format!("{}.{}", class.major_version, class.minor_version),
        constants: pool.len(),
        fields,
        methods,
        source_file: class.source_file().map(str::to_owned),
        verified: problem.is_none(),
        problem,
    })
}

// ───────────────────────────── Listing source ─────────────────────────────

/// Listing des instructions d'un `.pyc`/`.pyasm`, objets imbriqués compris.
pub fn dis_text(path: &Path, blocks: bool) -> Result<String> {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
    let unit = load_file(path, &stem)?;
    let mut out = String::new();
    dis_code(&unit.code, blocks, &mut out)?;
    Ok(out)
}

fn const_repr(c: &PyConst) -> String {
    match c {
        PyConst::None => "None".into(),
        PyConst::Bool(b) => if *b { "True" } else { "False" }.into(),
        PyConst::Int(i) => i.to_string(),
        PyConst::Float(f) => format!("{f:?}"),
        PyConst::Complex(re, im) => format!("({re:?}+{im:?}j)"),
        PyConst::Str(s) => format!("{s:?}"),
        PyConst::Bytes(b) => format!("b{:?}", String::from_utf8_lossy(b)),
        PyConst::Tuple(items) => format!("({})", items.iter().map(const_repr).collect::<Vec<_>>().join(", ")),
        PyConst::FrozenSet(items) => {
            format!("frozenset({{{}}})", items.iter().map(const_repr).collect::<Vec<_>>().join(", "))
        },
        PyConst::List(items) => format!("[{}]", items.iter().map(const_repr).collect::<Vec<_>>().join(", ")),
        PyConst::Set(items) => format!("{{{}}}", items.iter().map(const_repr).collect::<Vec<_>>().join(", ")),
        PyConst::Dict(pairs) => format!(
            "{{{}}}",
            pairs.iter().map(|(k, v)| format!("{}: {}", const_repr(k), const_repr(v))).collect::<Vec<_>>().join(", ")
        ),
        PyConst::Ellipsis => "Ellipsis".into(),
        PyConst::Code(code) => format!("<code {}>", code.name),
        PyConst::StopIteration => "StopIteration".into(),
    }
}

fn dis_code(code: &CodeObject, blocks: bool, out: &mut String) -> Result<()> {
    let _ = writeln!(
        out,
        "code {} ({}:{}) args={} locals={} stack={}",
        code.name, code.filename, code.firstlineno, code.argcount, code.nlocals, code.stacksize
    );
    if blocks {
        let tree = BlockTree::build(decode(&code.code)?).map_err(|m| anyhow!("bloc mal formé dans {}: {m}", code.name))?;
        out.push_str(&tree.dump());
        for inner in code.nested() {
            out.push('\n');
            dis_code(inner, blocks, out)?;
        }
        return Ok(());
    }
    let starts = code.line_starts();
    for insn in decode(&code.code)? {
        let line = starts.iter().find(|(offset, _)| *offset == insn.offset).map(|(_, l)| *l);
        let mark = line.map_or_else(String::new, |l| l.to_string());
        let _ = write!(out, "{mark:>5} {:>6} {:<24}", insn.offset, insn.opcode.name());
        if let Some(arg) = insn.arg {
            let _ = write!(out, " {arg}");
            let idx = arg as usize;
            let detail = if let Some(target) = insn.jump_target() {
                Some(format!("to {target}"))
            } else {
                match insn.opcode.name() {
                    "LOAD_CONST" => code.consts.get(idx).map(const_repr),
                    "LOAD_FAST" | "STORE_FAST" | "DELETE_FAST" => code.varnames.get(idx).cloned(),
                    n if n.contains("NAME") || n.contains("GLOBAL") || n.contains("ATTR") || n == "IMPORT_FROM" => {
                        code.names.get(idx).cloned()
                    },
                    _ => None,
                }
            };
            if let Some(d) = detail {
                let _ = write!(out, " ({d})");
            }
        }
        out.push('\n');
    }
    for inner in code.nested() {
        out.push('\n');
        dis_code(inner, blocks, out)?;
    }
    Ok(())
}

// ───────────────────────────── Utilitaires E/S ─────────────────────────────

fn emit_text(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(p) => write_bytes_atomic(p, text.as_bytes()),
        None => {
            let mut w = BufWriter::new(io::stdout().lock());
            w.write_all(text.as_bytes())?;
            w.flush()?;
            Ok(())
        },
    }
}

/// Écrit via un fichier temporaire voisin puis `rename`.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("création de {}", display(&parent)))?;
    let tmp = unique_tmp_path(&parent, path.file_name().unwrap_or_default());
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(bytes)?;
        w.flush()?;
    }
    if path.exists() {
        // Windows : rename sur cible existante peut échouer
        let _ = fs::remove_file(path);
    }
    fs::rename(&tmp, path).or_else(|_| fs::copy(&tmp, path).and_then(|_| fs::remove_file(&tmp)))?;
    Ok(())
}

fn unique_tmp_path(dir: &Path, base: &OsStr) -> PathBuf {
    let mut i = 0u32;
    loop {
        let candidate = dir.join(format!("{}.tmp{}", base.to_string_lossy(), i));
        if !candidate.exists() {
            return candidate;
        }
        i = i.wrapping_add(1);
    }
}

fn display(p: &Path) -> String { p.to_string_lossy().into_owned() }

// ───────────────────────────── Sorties jolies ─────────────────────────────

fn status_ok(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.green().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

fn status_info(tag: &str, msg: &str) {
    #[cfg(feature = "color")]
    {
        eprintln!("{} {}", tag.blue().bold(), msg);
    }
    #[cfg(not(feature = "color"))]
    {
        eprintln!("{tag} {msg}");
    }
}

// ───────────────────────────── Tests ─────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAIN: &str = "
.code <module>
.filename main.py
.line 1
    LOAD_CONST 0
    LOAD_CONST None
    IMPORT_NAME helper
    STORE_NAME helper
.line 2
    LOAD_NAME helper
    LOAD_ATTR run
    CALL_FUNCTION 0
    POP_TOP
    LOAD_CONST None
    RETURN_VALUE
.end
";

    const HELPER: &str = "
.code <module>
.filename helper.py
    LOAD_CONST @run
    LOAD_CONST 'run'
    MAKE_FUNCTION 0
    STORE_NAME run
    LOAD_CONST None
    RETURN_VALUE
.code run
    LOAD_CONST 42
    RETURN_VALUE
.end
.end
";

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.pyasm"), MAIN).unwrap();
        fs::write(dir.path().join("helper.pyasm"), HELPER).unwrap();
        dir
    }

    #[test]
    fn verbosity_maps_to_log_filters() {
        assert_eq!(log_filter(0, false), "info");
        assert_eq!(log_filter(1, false), "debug");
        assert_eq!(log_filter(3, false), "trace");
        assert_eq!(log_filter(2, true), "error");
    }

    #[test]
    fn unit_names_follow_roots_and_packages() {
        let roots = vec![PathBuf::from("src")];
        assert_eq!(unit_name(Path::new("src/a/b.pyc"), &roots).unwrap(), "a.b");
        assert_eq!(unit_name(Path::new("src/a/__init__.pyc"), &roots).unwrap(), "a");
        assert_eq!(unit_name(Path::new("elsewhere/tool.pyasm"), &roots).unwrap(), "tool");
        assert_eq!(unit_name(Path::new("pkg/__init__.pyc"), &[]).unwrap(), "pkg");
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("javelin.json");
        fs::write(&cfg, r#"{ "namespace": "from.config", "emit_source_file": false }"#).unwrap();
        let task = TranspileTask {
            config: Some(cfg),
            namespace: Some("org.demo".into()),
            no_lines: true,
            serial: true,
            ..TranspileTask::default()
        };
        let opts = resolve_options(&task).unwrap();
        assert_eq!(opts.namespace, "org.demo");
        assert!(!opts.emit_source_file && !opts.emit_line_numbers && !opts.parallel);
    }

    #[test]
    fn transpile_follows_imports_and_writes_classes() {
        let src = project();
        let out = tempfile::tempdir().unwrap();
        let task = TranspileTask {
            inputs: vec![src.path().join("main.pyasm")],
            output_dir: out.path().to_path_buf(),
            ..TranspileTask::default()
        };
        let written = transpile_entry(&task).unwrap();
        assert_eq!(
            written,
            vec![
                out.path().join("python/main/__init__.class"),
                out.path().join("python/helper/__init__.class"),
            ]
        );

        let summary = inspect_class(&written[1]).unwrap();
        assert_eq!(summary.name, "python/helper/__init__");
        assert_eq!(summary.version, "49.0");
        assert!(summary.verified);
        assert!(summary.methods.iter().any(|m| m.name == "run$1"));
        let json: serde_json::Value = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["source_file"], "helper.pyasm");
        assert!(json.get("problem").is_none());

        assert!(disasm_text(&written[0]).unwrap().contains("module"));
    }

    #[test]
    fn asm_then_dis_lists_nested_code() {
        let src = project();
        let pyc = asm_entry(&AsmTask { input: src.path().join("helper.pyasm"), output: None }).unwrap();
        assert_eq!(pyc, src.path().join("helper.pyc"));
        let text = dis_text(&pyc, false).unwrap();
        assert!(text.starts_with("code <module> (helper.py:1)"));
        assert!(text.contains("LOAD_CONST"));
        assert!(text.contains("(<code run>)"));
        assert!(text.contains("\ncode run "));
        assert!(text.contains("(42)"));

        let tree = dis_text(&pyc, true).unwrap();
        assert!(tree.contains("\nroutine\n"));
        assert!(tree.contains("RETURN_VALUE"));
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");
        write_bytes_atomic(&path, b"one").unwrap();
        write_bytes_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn empty_input_list_is_rejected() {
        assert!(transpile_entry(&TranspileTask::default()).is_err());
    }
}
