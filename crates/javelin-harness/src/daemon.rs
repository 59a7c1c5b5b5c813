//! Client du démon de test JVM.
//!
//! Protocole ligne à ligne : on écrit le nom binaire d'une classe suivi de
//! `\n`, le démon l'exécute et renvoie sa sortie combinée puis une ligne
//! contenant seulement `.`. `exit` termine le démon.
//!
//! La sortie d'erreur du processus est collectée à part et ajoutée à la
//! réponse suivante, comme si les deux flux étaient fusionnés.

use std::{
    ffi::OsString,
    io::{self, BufRead, BufReader, Read, Write},
    mem,
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, trace};

/// Ligne de fin de réponse.
pub const TERMINATOR: &str = ".";

/// Commande d'arrêt.
pub const EXIT: &str = "exit";

/// Classe principale du démon livré avec le runtime.
pub const DAEMON_CLASS: &str = "python.testdaemon.TestDaemon";

/// Côté client du protocole, sur n'importe quelle paire lecteur/écrivain.
#[derive(Debug)]
pub struct DaemonClient<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> DaemonClient<R, W> {
    /// Client sur `reader` (sortie du démon) et `writer` (son entrée).
    pub const fn new(reader: R, writer: W) -> Self { Self { reader, writer } }

    /// Exécute la classe `class` (nom binaire) et rend sa sortie.
    pub fn run(&mut self, class: &str) -> io::Result<String> {
        writeln!(self.writer, "{class}")?;
        self.writer.flush()?;
        trace!(class, "daemon request");

        let mut out = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "daemon closed before the terminator"));
            }
            if line.trim_end_matches(['\r', '\n']) == TERMINATOR {
                return Ok(out);
            }
            out.push_str(&line);
        }
    }

    /// Demande l'arrêt ; l'écrivain est rendu pour être fermé par l'appelant.
    pub fn shutdown(mut self) -> io::Result<W> {
        self.writer.write_all(EXIT.as_bytes())?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/* ───────────────────────────── Sortie d'erreur ───────────────────────────── */

/// Lecture en tâche de fond d'un flux d'erreur, vidée à la demande.
#[derive(Debug)]
pub struct StderrTail {
    buffer: Arc<Mutex<String>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrTail {
    /// Lance la lecture de `stream` ligne par ligne.
    pub fn spawn(stream: impl Read + Send + 'static) -> Self {
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&buffer);
        let reader = thread::spawn(move || {
            for line in BufReader::new(stream).lines().map_while(io::Result::ok) {
                let mut buf = sink.lock().unwrap_or_else(PoisonError::into_inner);
                buf.push_str(&line);
                buf.push('\n');
            }
        });
        Self { buffer, reader: Some(reader) }
    }

    /// Rend et vide ce qui a été lu jusqu'ici.
    pub fn take(&self) -> String { mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner)) }

    /// Attend la fin du flux et rend le reste.
    pub fn finish(mut self) -> String {
        if let Some(reader) = self.reader.take() {
            // Un lecteur en panique n'a rien ajouté de plus.
            let _ = reader.join();
        }
        self.take()
    }
}

/// Réponse du démon suivie de sa sortie d'erreur.
pub fn merge_output(stdout: String, stderr: &str) -> String {
    let mut out = stdout;
    if !stderr.is_empty() && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(stderr);
    out
}

/* ───────────────────────────── Processus ───────────────────────────── */

/// Démon lancé comme processus fils.
#[derive(Debug)]
pub struct Daemon {
    child: Child,
    client: Option<DaemonClient<BufReader<ChildStdout>, ChildStdin>>,
    stderr: Option<StderrTail>,
    work_dir: PathBuf,
}

impl Daemon {
    /// Lance `java -classpath <classpath> python.testdaemon.TestDaemon` dans `work_dir`.
    ///
    /// Les classes à exécuter doivent être écrites sous `work_dir` (ou un autre
    /// élément du classpath) avant chaque `run`.
    pub fn spawn(java: impl Into<OsString>, classpath: &[PathBuf], work_dir: impl AsRef<Path>) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();
        let cp = std::env::join_paths(classpath).context("invalid classpath entry")?;
        let mut child = Command::new(java.into())
            .arg("-classpath")
            .arg(&cp)
            .arg(DAEMON_CLASS)
            .current_dir(&work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to start the test daemon")?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("daemon stdin not captured"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("daemon stdout not captured"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("daemon stderr not captured"))?;
        debug!(pid = child.id(), dir = %work_dir.display(), "test daemon started");
        Ok(Self {
            child,
            client: Some(DaemonClient::new(BufReader::new(stdout), stdin)),
            stderr: Some(StderrTail::spawn(stderr)),
            work_dir,
        })
    }

    /// Répertoire courant du démon.
    pub fn work_dir(&self) -> &Path { &self.work_dir }

    /// Exécute une classe déjà écrite sur disque ; rend stdout puis stderr.
    pub fn run(&mut self, class: &str) -> Result<String> {
        let client = self.client.as_mut().ok_or_else(|| anyhow!("daemon already shut down"))?;
        let out = client.run(class);
        let err = self.stderr.as_ref().map(StderrTail::take).unwrap_or_default();
        match out {
            Ok(out) => Ok(merge_output(out, &err)),
            Err(e) => Err(anyhow!(e).context(format!("daemon run of {class}: {}", err.trim_end()))),
        }
    }

    /// Envoie `exit`, ferme l'entrée et attend la fin du processus.
    pub fn shutdown(mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            drop(client.shutdown().context("daemon shutdown")?);
        }
        let status = self.child.wait().context("waiting for the test daemon")?;
        let rest = self.stderr.take().map(StderrTail::finish).unwrap_or_default();
        debug!(%status, stderr = %rest.trim_end(), "test daemon stopped");
        Ok(())
    }
}
