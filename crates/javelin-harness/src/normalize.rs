//! Normalisation des sorties capturées.
//!
//! Les deux côtés sont ramenés au même format :
//!
//! ```text
//! ### EXCEPTION ###
//! ValueError: message
//!     file.py:3
//! ```
//!
//! Les adresses mémoire deviennent `0xXXXXXXXX`, le nom de l'exécutable
//! `***EXECUTABLE***`, et les fins de ligne `\n`.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// En-tête commun des rapports d'exception normalisés.
pub const EXCEPTION_BANNER: &str = "### EXCEPTION ###";

const EXECUTABLE: &str = "***EXECUTABLE***";

/* ───────────────────────────── Motifs ───────────────────────────── */

struct Patterns {
    java_exception: Regex,
    java_stack: Regex,
    python_exception: Regex,
    python_stack: Regex,
    memory: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            java_exception: Regex::new(concat!(
                r#"(((Exception in thread "[\w-]+" )?org\.python\.exceptions\.(?P<exception1>\w+): (?P<message1>[^\r\n]+))|"#,
                r"([^\r\n]*?\r?\n((    |\t)at[^\r\n]*?\r?\n)*",
                r"Caused by: org\.python\.exceptions\.(?P<exception2>\w+): (?P<message2>[^\r\n]+)))\r?\n",
                r"(?P<trace>(\s+at .+\((((.*)(:(\d+))?)|(Native Method))\)\r?\n)+)(.*\r?\n)*",
                r#"(Exception in thread "\w+" )?"#,
            ))?,
            java_stack: Regex::new(
                r"(?m)^\s+at (?P<module>.+)\((((?P<file>.*?)(:(?P<line>\d+))?)|(Native Method))\)\r?\n",
            )?,
            python_exception: Regex::new(concat!(
                r"Traceback \(most recent call last\):\r?\n",
                r#"(  File "(?P<file>.*)", line (?P<line>\d+), in .*\r?\n    .*\r?\n)+"#,
                r"(?P<exception>.*?): (?P<message>.*\r?\n)",
            ))?,
            python_stack: Regex::new(r#"  File "(?P<file>.*)", line (?P<line>\d+), in .*\r?\n    .*\r?\n"#)?,
            memory: Regex::new(r"0x[\dabcdef]{4,8}")?,
        })
    }
}

lazy_static! {
    static ref PATTERNS: Result<Patterns, regex::Error> = Patterns::compile();
}

fn patterns() -> Result<&'static Patterns> {
    PATTERNS.as_ref().map_err(|e| anyhow!("invalid normalization pattern: {e}"))
}

fn group<'h>(caps: &Captures<'h>, name: &str) -> &'h str { caps.name(name).map_or("", |m| m.as_str()) }

/// Lignes `    file:line` suivies d'un saut de ligne si au moins une frame a été vue.
fn summary(frames: &[String], seen_any: bool) -> String {
    let mut out = frames.join("\n");
    if seen_any {
        out.push('\n');
    }
    out
}

fn finish(p: &Patterns, out: &str) -> String { p.memory.replace_all(out, "0xXXXXXXXX").into_owned() }

/* ───────────────────────────── Java ───────────────────────────── */

/// Normalise la sortie combinée d'une exécution JVM.
///
/// Le rapport d'exception garde le type et le message ; la pile est réduite
/// aux frames des modules générés (`python.*`, constructeurs exclus), de la
/// plus ancienne à la plus récente.
pub fn cleanse_java(input: &str) -> Result<String> {
    let p = patterns()?;
    let out = p.java_exception.replace_all(input, |caps: &Captures<'_>| {
        let (exception, message) = if caps.name("exception2").is_some() {
            (group(caps, "exception2"), group(caps, "message2"))
        } else {
            (group(caps, "exception1"), group(caps, "message1"))
        };
        format!("{EXCEPTION_BANNER}\n{exception}: {message}\n{}", group(caps, "trace"))
    });

    let stack: Vec<(String, String, String)> = p
        .java_stack
        .captures_iter(&out)
        .map(|c| (group(&c, "module").to_owned(), group(&c, "file").to_owned(), group(&c, "line").to_owned()))
        .collect();
    let frames: Vec<String> = stack
        .iter()
        .rev()
        .filter(|(module, _, _)| module.starts_with("python.") && !module.ends_with(".<init>"))
        .map(|(_, file, line)| format!("    {file}:{line}"))
        .collect();
    let mut out = p.java_stack.replace_all(&out, "").into_owned();
    out.push_str(&summary(&frames, !stack.is_empty()));

    Ok(finish(p, &out)
        .replace("'python.test.__init__'", EXECUTABLE)
        .replace("'python.testdaemon.TestDaemon'", EXECUTABLE)
        .replace("\r\n", "\n"))
}

/* ───────────────────────────── Python ───────────────────────────── */

/// Normalise la sortie combinée de l'interpréteur de référence.
pub fn cleanse_python(input: &str) -> Result<String> {
    let p = patterns()?;
    let mut out = p
        .python_exception
        .replace_all(input, |caps: &Captures<'_>| {
            format!("{EXCEPTION_BANNER}\n{}: {}", group(caps, "exception"), group(caps, "message"))
        })
        .into_owned();
    let frames: Vec<String> = p
        .python_stack
        .captures_iter(input)
        .map(|c| format!("    {}:{}", group(&c, "file"), group(&c, "line")))
        .collect();
    out.push_str(&summary(&frames, !frames.is_empty()));

    // Message de int() aligné sur 3.4.4.
    Ok(finish(p, &out)
        .replace("'test.py'", EXECUTABLE)
        .replace(
            "int() argument must be a string or a number, not",
            "int() argument must be a string, a bytes-like object or a number, not",
        )
        .replace("\r\n", "\n"))
}
