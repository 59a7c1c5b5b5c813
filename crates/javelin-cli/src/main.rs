//! `javelin` — CLI du transpileur
//!
//! Ici on fait uniquement : parsing d'arguments, initialisation (logger,
//! couleur), et délégation à `javelin_cli` (lib).

#![forbid(unsafe_code)]

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use javelin_cli as cli;

// ──────────────────────────── CLI (clap) ────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "javelin", version, about = "javelin — bytecode CPython 3.4 vers classes JVM", long_about = None)]
struct Opt {
    /// Augmente la verbosité (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux (casse la verbosité)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, global = true)]
    quiet: bool,

    /// Force la couleur (si la feature `color` est compilée)
    #[arg(long = "color", value_enum, default_value_t = ColorChoice::Auto, global = true)]
    color: ColorChoice,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Transpiler des unités (.pyc / .pyasm) et leurs imports en classes
    Transpile {
        /// Unités d'entrée
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Répertoire de sortie
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Racine de recherche des imports (répétable)
        #[arg(long = "path")]
        path: Vec<PathBuf>,
        /// Préfixe de paquet des classes (`python` par défaut)
        #[arg(long)]
        namespace: Option<String>,
        /// Options JSON (TranspileOptions)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Pas de table des lignes
        #[arg(long = "no-lines")]
        no_lines: bool,
        /// Traduction séquentielle
        #[arg(long)]
        serial: bool,
        /// Afficher le temps d'exécution
        #[arg(long)]
        time: bool,
    },

    /// Désassembler un class file
    Disasm {
        /// Class file
        input: PathBuf,
        /// Sortie texte (stdout si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Résumer et vérifier un class file
    Inspect {
        /// Class file
        input: PathBuf,
        /// Sortie JSON
        #[arg(long)]
        json: bool,
    },

    /// Assembler un .pyasm en .pyc
    Asm {
        /// Source .pyasm
        input: PathBuf,
        /// Fichier .pyc (même nom si omis)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Lister les instructions d'un .pyc / .pyasm
    Dis {
        /// Unité
        input: PathBuf,
        /// Arbre des blocs structurés
        #[arg(long)]
        blocks: bool,
    },
}

// ──────────────────────────── Logger / Verbosité ────────────────────────────

fn init_telemetry(verbose: u8, quiet: bool) { cli::init_logger(cli::log_filter(verbose, quiet)); }

fn init_color(choice: ColorChoice) {
    match choice {
        ColorChoice::Auto => {},
        ColorChoice::Always => {
            std::env::set_var("CLICOLOR_FORCE", "1");
            std::env::remove_var("NO_COLOR");
        },
        ColorChoice::Never => {
            std::env::set_var("NO_COLOR", "1");
            std::env::remove_var("CLICOLOR_FORCE");
        },
    }
}

// ──────────────────────────── main ────────────────────────────

fn main() -> ExitCode {
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        },
    }
}

fn real_main() -> Result<i32> {
    let opt = Opt::parse();

    init_color(opt.color);
    init_telemetry(opt.verbose, opt.quiet);

    use cli::{AsmTask, Command as C, DisTask, DisasmTask, InspectTask, TranspileTask};

    let command = match opt.cmd {
        Command::Transpile { inputs, output, path, namespace, config, no_lines, serial, time } => {
            C::Transpile(TranspileTask {
                inputs,
                output_dir: output,
                search_paths: path,
                config,
                namespace,
                no_lines,
                serial,
                time,
            })
        },
        Command::Disasm { input, output } => C::Disasm(DisasmTask { input, output }),
        Command::Inspect { input, json } => C::Inspect(InspectTask { input, json }),
        Command::Asm { input, output } => C::Asm(AsmTask { input, output }),
        Command::Dis { input, blocks } => C::Dis(DisTask { input, blocks }),
    };

    cli::execute(command).context("échec d'exécution de la commande")
}
