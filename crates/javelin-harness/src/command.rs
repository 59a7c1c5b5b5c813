//! Invocations externes : JVM directe, interpréteur de référence, suite.

use std::{
    ffi::{OsStr, OsString},
    fs,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use anyhow::{bail, ensure, Context, Result};
use javelin_compiler::{load_file, write_all, SourceUnit, TranslatedUnit, TranspileOptions, Transpiler};
use tracing::{debug, info, warn};

use crate::{
    adjust::adjust,
    binary_name,
    cases::Case,
    daemon::Daemon,
    normalize::{cleanse_java, cleanse_python},
};

/// Compile `test.py` en `test.pyc` dans le répertoire courant.
const PY_COMPILE: &str = "import py_compile; py_compile.compile('test.py', cfile='test.pyc', doraise=True)";

/// Sortie combinée (stdout puis stderr) d'un processus terminé.
fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/* ───────────────────────────── JVM ───────────────────────────── */

/// Invocation directe `java -classpath <cp> <class> <args…>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaCommand {
    java: OsString,
    classpath: Vec<PathBuf>,
    class: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl JavaCommand {
    /// Exécute `class` (nom binaire) avec le `java` du PATH.
    pub fn new(class: impl Into<String>) -> Self {
        Self { java: "java".into(), classpath: Vec::new(), class: class.into(), args: Vec::new(), cwd: None }
    }

    /// Exécutable JVM.
    #[must_use]
    pub fn java(mut self, java: impl Into<OsString>) -> Self {
        self.java = java.into();
        self
    }

    /// Ajoute une entrée au classpath (ordre conservé).
    #[must_use]
    pub fn classpath(mut self, entry: impl Into<PathBuf>) -> Self {
        self.classpath.push(entry.into());
        self
    }

    /// Arguments passés au programme.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Répertoire courant du processus.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Commande prête à lancer.
    pub fn to_command(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.java);
        if !self.classpath.is_empty() {
            let cp = std::env::join_paths(&self.classpath).context("invalid classpath entry")?;
            cmd.arg("-classpath").arg(cp);
        }
        cmd.arg(&self.class).args(&self.args).stdin(Stdio::null());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    /// Lance et rend la sortie combinée, quel que soit le code de retour.
    pub fn output(&self) -> Result<String> {
        let output = self.to_command()?.output().with_context(|| format!("failed to run java for {}", self.class))?;
        debug!(class = %self.class, status = %output.status, "java run finished");
        Ok(combined(&output))
    }
}

/* ───────────────────────────── Python ───────────────────────────── */

/// Exécution de référence : `test.py` et ses modules annexes dans `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonRun {
    python: OsString,
    main: String,
    extra: Vec<(String, String)>,
    args: Vec<String>,
    run_in_function: bool,
}

impl PythonRun {
    /// Programme principal (extrait indenté, passé à `adjust`).
    pub fn new(main: impl Into<String>) -> Self {
        Self { python: "python3".into(), main: main.into(), extra: Vec::new(), args: Vec::new(), run_in_function: false }
    }

    /// Interpréteur utilisé.
    #[must_use]
    pub fn python(mut self, python: impl Into<OsString>) -> Self {
        self.python = python.into();
        self
    }

    /// Module annexe `a.b` (écrit sous `a/b.py`).
    #[must_use]
    pub fn module(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.extra.push((name.into(), source.into()));
        self
    }

    /// Arguments du programme.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Enveloppe le programme principal dans une fonction.
    #[must_use]
    pub const fn in_function(mut self, yes: bool) -> Self {
        self.run_in_function = yes;
        self
    }

    /// Écrit les sources sous `dir` ; rend les chemins créés.
    pub fn stage(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let main = dir.join("test.py");
        fs::write(&main, adjust(&self.main, self.run_in_function))
            .with_context(|| format!("writing {}", main.display()))?;
        let mut written = vec![main];
        for (name, source) in &self.extra {
            let mut path: PathBuf = dir.to_path_buf();
            path.extend(name.split('.'));
            path.set_extension("py");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
            }
            fs::write(&path, adjust(source, false)).with_context(|| format!("writing {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }

    /// Écrit les sources dans `dir`, lance `python test.py args…`, rend la sortie combinée.
    pub fn output(&self, dir: &Path) -> Result<String> {
        self.stage(dir)?;
        let output = Command::new(&self.python)
            .arg("test.py")
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.python.to_string_lossy()))?;
        Ok(combined(&output))
    }
}

/* ───────────────────────────── Comparaison ───────────────────────────── */

/// Compare deux sorties normalisées ; l'erreur cite la première ligne divergente et les deux textes.
pub fn compare_outputs(context: &str, python: &str, java: &str) -> Result<()> {
    if python == java {
        return Ok(());
    }
    let line = python
        .lines()
        .zip(java.lines())
        .position(|(p, j)| p != j)
        .unwrap_or_else(|| python.lines().count().min(java.lines().count()));
    bail!("{context}: outputs differ at line {}\n--- python\n{python}--- java\n{java}", line + 1)
}

/* ───────────────────────────── Suite ───────────────────────────── */

/// Environnement d'exécution configuré une fois pour toute une série de tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    java: OsString,
    python: OsString,
    runtime: Vec<PathBuf>,
}

impl Suite {
    /// Lance l'étape de build du runtime et vérifie qu'elle réussit.
    pub fn configure(build: &mut Command) -> Result<Self> {
        let output = build.stdin(Stdio::null()).output().context("failed to start the runtime build")?;
        if !output.status.success() {
            bail!("Error compiling java sources: {}", combined(&output));
        }
        info!("runtime build finished");
        Ok(Self::prebuilt())
    }

    /// Suite sur un runtime déjà construit.
    pub fn prebuilt() -> Self { Self { java: "java".into(), python: "python3".into(), runtime: Vec::new() } }

    /// Exécutable JVM.
    #[must_use]
    pub fn with_java(mut self, java: impl Into<OsString>) -> Self {
        self.java = java.into();
        self
    }

    /// Interpréteur de référence ; il compile aussi le `.pyc` traduit, d'où un CPython 3.4.
    #[must_use]
    pub fn with_python(mut self, python: impl Into<OsString>) -> Self {
        self.python = python.into();
        self
    }

    /// Ajoute une entrée de classpath (jar du runtime, classes support…).
    #[must_use]
    pub fn with_runtime(mut self, entry: impl Into<PathBuf>) -> Self {
        self.runtime.push(entry.into());
        self
    }

    /// Entrées de classpath du runtime.
    pub fn runtime(&self) -> &[PathBuf] { &self.runtime }

    /// Exécutable JVM configuré.
    pub fn java(&self) -> &OsStr { &self.java }

    /// Écrit les unités dans un répertoire temporaire, lance la première.
    pub fn run(&self, units: &[TranslatedUnit], args: &[String]) -> Result<String> {
        let Some(main) = units.first() else { bail!("no unit to run") };
        let dir = tempfile::tempdir().context("creating the staging directory")?;
        write_all(dir.path(), units)?;
        let command = self
            .runtime
            .iter()
            .fold(JavaCommand::new(binary_name(&main.class_name)).java(&self.java), |cmd, entry| cmd.classpath(entry))
            .classpath(dir.path())
            .args(args.iter().cloned())
            .current_dir(dir.path());
        command.output()
    }

    /// Compile le `test.py` déjà écrit dans `dir` et le charge comme unité `test`.
    fn compile_main(&self, dir: &Path) -> Result<SourceUnit> {
        let output = Command::new(&self.python)
            .args(["-c", PY_COMPILE])
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.python.to_string_lossy()))?;
        if !output.status.success() {
            bail!("Error compiling test.py: {}", combined(&output));
        }
        let mut unit = load_file(&dir.join("test.pyc"), "test")?;
        unit.source_id = "test.py".into();
        Ok(unit)
    }

    /// Exécute `code` sous Python puis, traduit, sous la JVM ; compare les sorties normalisées.
    ///
    /// `run_in_global` : extrait au niveau module ; `run_in_function` : enveloppé
    /// dans `test_function()`. Chaque mode retenu est comparé séparément.
    pub fn assert_code_execution(&self, code: &str, run_in_global: bool, run_in_function: bool) -> Result<()> {
        ensure!(run_in_global || run_in_function, "no execution mode selected");
        let modes = [(false, run_in_global), (true, run_in_function)];
        for (in_function, _) in modes.into_iter().filter(|&(_, on)| on) {
            let mode = if in_function { "function" } else { "global" };
            let dir = tempfile::tempdir().context("creating the staging directory")?;

            let python = PythonRun::new(code).python(&self.python).in_function(in_function).output(dir.path())?;
            let unit = self.compile_main(dir.path())?;
            let mut transpiler = Transpiler::new(TranspileOptions::default());
            transpiler.add_unit(unit)?;
            let java = self.run(&transpiler.transpile()?, &[])?;

            compare_outputs(&format!("{mode} code"), &cleanse_python(&python)?, &cleanse_java(&java)?)?;
            debug!(mode, "outputs match");
        }
        Ok(())
    }

    /// `assert_code_execution` sur chaque extrait ; l'erreur regroupe tous les échecs.
    pub fn assert_cases(&self, cases: &[Case], run_in_global: bool, run_in_function: bool) -> Result<()> {
        let mut failures = Vec::new();
        for case in cases {
            if let Err(e) = self.assert_code_execution(&case.source, run_in_global, run_in_function) {
                warn!(case = %case.name, "outputs differ");
                failures.push(format!("[{}] {}\n{e:#}", case.name, case.message));
            }
        }
        if !failures.is_empty() {
            bail!("{} of {} cases failed:\n{}", failures.len(), cases.len(), failures.join("\n"));
        }
        info!(cases = cases.len(), "all cases match");
        Ok(())
    }

    /// Démon de test sur le classpath du runtime plus `work_dir`.
    pub fn spawn_daemon(&self, work_dir: &Path) -> Result<Daemon> {
        let mut classpath = self.runtime.clone();
        classpath.push(work_dir.to_path_buf());
        Daemon::spawn(&self.java, &classpath, work_dir)
    }

    /// Écrit les unités sous le répertoire du démon et lance la première.
    pub fn run_in_daemon(&self, daemon: &mut Daemon, units: &[TranslatedUnit]) -> Result<String> {
        let Some(main) = units.first() else { bail!("no unit to run") };
        let written = write_all(daemon.work_dir(), units)?;
        ensure!(written.len() == units.len(), "partial staging in {}", daemon.work_dir().display());
        daemon.run(&binary_name(&main.class_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn java_command_line_is_ordered() {
        let cmd = JavaCommand::new("python.test.__init__")
            .java("/opt/jdk/bin/java")
            .classpath("dist/python-java.jar")
            .classpath(".")
            .args(["a", "b"])
            .to_command()
            .unwrap();
        assert_eq!(cmd.get_program(), "/opt/jdk/bin/java");
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        let cp = std::env::join_paths(["dist/python-java.jar", "."]).unwrap();
        assert_eq!(args, vec!["-classpath".to_owned(), cp.to_string_lossy().into_owned(), "python.test.__init__".into(), "a".into(), "b".into()]);
    }

    #[test]
    fn empty_classpath_is_omitted() {
        let cmd = JavaCommand::new("Main").to_command().unwrap();
        assert_eq!(cmd.get_args().count(), 1);
    }

    #[test]
    fn python_sources_are_staged_with_packages() {
        let dir = tempfile::tempdir().unwrap();
        let run = PythonRun::new("\n    import pkg.helper\n    print(pkg.helper.X)\n    ")
            .module("pkg.helper", "\n    X = 1\n    ")
            .in_function(true);
        let written = run.stage(dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("test.py")).unwrap(),
            "def test_function():\n    import pkg.helper\n    print(pkg.helper.X)\n\ntest_function()"
        );
        assert_eq!(fs::read_to_string(dir.path().join("pkg/helper.py")).unwrap(), "X = 1\n");
    }

    #[test]
    fn failed_build_reports_its_output() {
        let mut build = Command::new(if cfg!(windows) { "cmd" } else { "sh" });
        if cfg!(windows) {
            build.args(["/C", "echo boom && exit 1"]);
        } else {
            build.args(["-c", "echo boom; exit 1"]);
        }
        let err = Suite::configure(&mut build).unwrap_err();
        assert!(err.to_string().starts_with("Error compiling java sources: boom"));
    }

    #[test]
    fn matching_outputs_compare_equal() {
        assert!(compare_outputs("global code", "7\n", "7\n").is_ok());
    }

    #[test]
    fn divergence_names_the_first_differing_line() {
        let err = compare_outputs("function code", "1\n2\n3\n", "1\n5\n3\n").unwrap_err().to_string();
        assert!(err.starts_with("function code: outputs differ at line 2"), "{err}");
        assert!(err.contains("--- python\n1\n2\n3\n--- java\n1\n5\n3\n"));

        let short = compare_outputs("global code", "1\n2\n", "1\n").unwrap_err().to_string();
        assert!(short.contains("at line 2"), "{short}");
    }

    #[test]
    fn some_execution_mode_is_required() {
        let err = Suite::prebuilt().assert_code_execution("print(1)", false, false).unwrap_err();
        assert_eq!(err.to_string(), "no execution mode selected");
    }

    #[test]
    fn missing_interpreter_fails_the_case() {
        let suite = Suite::prebuilt().with_python("javelin-no-such-python");
        let case = Case { name: "add_int".into(), source: "print(1 + 2)\n".into(), message: "Error running x + y".into() };
        let err = suite.assert_cases(&[case], true, false).unwrap_err().to_string();
        assert!(err.starts_with("1 of 1 cases failed:\n[add_int] Error running x + y"), "{err}");
    }

    #[test]
    fn running_nothing_is_an_error() {
        assert!(Suite::prebuilt().run(&[], &[]).is_err());
    }
}
