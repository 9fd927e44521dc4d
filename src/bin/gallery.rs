//! `gallery` command line: check a corpus, print its matrix, or run it.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use gallery_harness::annotation::DEFAULT_EXTENSIONS;
use gallery_harness::run::EXIT_FAILURES;
use gallery_harness::{
    resolve, ArtifactDisassembler, ArtifactWriter, Config, ConfigError, Corpus, CorpusError,
    InclusionState, Runner,
};
use log::{info, warn};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

const EXIT_CONFIG: u8 = 3;
const EXIT_CORPUS: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "gallery")]
#[command(about = "Resolve and verify the codegen gallery scenario matrix.", long_about = None)]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the corpus and report fixtures with bad annotations.
    Check(CheckArgs),
    /// Print the resolved {fixture x toolchain x scenario} matrix.
    Matrix(MatrixArgs),
    /// Compile and verify every included cell.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, value_name = "DIR")]
    src: PathBuf,

    /// Universe config; only its `[run] extensions` are used.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UniverseArgs {
    #[arg(long, value_name = "DIR")]
    src: PathBuf,

    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// Restrict to these toolchain ids.
    #[arg(long = "toolchain", value_name = "ID")]
    toolchains: Vec<String>,

    /// Restrict to these scenario labels.
    #[arg(long = "scenario", value_name = "LABEL")]
    scenarios: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct MatrixArgs {
    #[command(flatten)]
    universe: UniverseArgs,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    universe: UniverseArgs,

    /// Worker pool size.
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// Per-job timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Stop dispatching after this many failed cells.
    #[arg(long, value_name = "N")]
    max_failures: Option<usize>,

    /// Write the JSON report here (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Dump sources, flags, disassembly and diagnostics per cell.
    #[arg(long, value_name = "DIR")]
    artifacts: Option<PathBuf>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("failed to write {what}: {source}")]
    Output {
        what: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Corpus(_) => EXIT_CORPUS,
            Self::Output { .. } | Self::Json(_) => EXIT_FAILURES,
        }
    }

    fn output(what: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let what = what.into();
        move |source| Self::Output { what, source }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let outcome = match cli.command {
        Command::Check(args) => cmd_check(&args),
        Command::Matrix(args) => cmd_matrix(&args),
        Command::Run(args) => cmd_run(&args),
    };
    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("gallery: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn cmd_check(args: &CheckArgs) -> Result<u8, CliError> {
    let extensions = match &args.config {
        Some(path) => Config::load(path)?.settings.extensions,
        None => DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
    };
    let corpus = Corpus::load(&args.src, &extensions)?;
    let mut out = io::stdout().lock();
    let write = CliError::output("stdout");
    let mut print = || -> io::Result<()> {
        for rejected in corpus.rejected() {
            writeln!(out, "{}: {}", rejected.path.display(), rejected.reason)?;
        }
        writeln!(
            out,
            "{} fixtures loaded, {} rejected",
            corpus.len(),
            corpus.rejected().len()
        )
    };
    print().map_err(write)?;
    Ok(if corpus.rejected().is_empty() {
        0
    } else {
        EXIT_FAILURES
    })
}

fn load_universe(args: &UniverseArgs) -> Result<(Config, Corpus), CliError> {
    let config = Config::load(&args.config)?.select(&args.toolchains, &args.scenarios)?;
    let corpus = Corpus::load(&args.src, &config.settings.extensions)?;
    for rejected in corpus.rejected() {
        warn!("Rejected {}: {}", rejected.path.display(), rejected.reason);
    }
    Ok((config, corpus))
}

fn cmd_matrix(args: &MatrixArgs) -> Result<u8, CliError> {
    let (config, corpus) = load_universe(&args.universe)?;
    let matrix = resolve(corpus.fixtures(), &config.toolchains, &config.scenarios)?;

    let mut out = io::stdout().lock();
    if args.format == Format::Json {
        let json = serde_json::to_string_pretty(&matrix)?;
        writeln!(out, "{json}").map_err(CliError::output("stdout"))?;
        return Ok(0);
    }

    let mut print = || -> io::Result<()> {
        for cell in matrix.cells() {
            if cell.inclusion == InclusionState::Included {
                writeln!(
                    out,
                    "{} {} {} included: {}",
                    cell.fixture,
                    cell.toolchain,
                    cell.scenario,
                    cell.resolved_flags.join(" ")
                )?;
            } else {
                writeln!(
                    out,
                    "{} {} {} {}",
                    cell.fixture, cell.toolchain, cell.scenario, cell.inclusion
                )?;
            }
        }
        let included = matrix.included().count();
        writeln!(
            out,
            "{} files x {} toolchains x {} scenarios = {} cells ({} included)",
            corpus.len(),
            config.toolchains.len(),
            config.scenarios.len(),
            matrix.len(),
            included
        )
    };
    print().map_err(CliError::output("stdout"))?;
    Ok(0)
}

fn cmd_run(args: &RunArgs) -> Result<u8, CliError> {
    let (mut config, corpus) = load_universe(&args.universe)?;
    if let Some(jobs) = args.jobs {
        config.settings.jobs = jobs;
    }
    if let Some(secs) = args.timeout {
        config.settings.timeout = Duration::from_secs(secs);
    }
    if args.max_failures.is_some() {
        config.settings.max_failures = args.max_failures;
    }

    let matrix = resolve(corpus.fixtures(), &config.toolchains, &config.scenarios)?;
    let runner = Runner::new(config.settings.jobs, config.settings.timeout)?
        .with_max_failures(config.settings.max_failures);

    let mut writer = match &args.artifacts {
        Some(dir) => Some(
            ArtifactWriter::create(dir)
                .map_err(CliError::output(dir.display().to_string()))?,
        ),
        None => None,
    };
    let report = runner.run(
        &corpus,
        &config.toolchains,
        &matrix,
        &config.compiler,
        &ArtifactDisassembler,
        |fixture, result| {
            if let Some(writer) = writer.as_mut() {
                if let Err(err) = writer.record(fixture, result) {
                    warn!("Could not dump artifacts for {}: {err}", fixture.id);
                }
            }
        },
    );
    if let Some(writer) = writer {
        let dumped = writer.written();
        let root = writer
            .finish(&config.toolchains, &config.scenarios)
            .map_err(CliError::output("artifact index"))?;
        info!("Dumped {dumped} cells under {}", root.display());
    }

    let json_to_stdout = args.json.as_deref() == Some(Path::new("-"));
    if let Some(path) = &args.json {
        let json = report.to_json()?;
        if json_to_stdout {
            writeln!(io::stdout().lock(), "{json}").map_err(CliError::output("stdout"))?;
        } else {
            fs::write(path, json + "\n")
                .map_err(CliError::output(path.display().to_string()))?;
        }
    }
    if json_to_stdout {
        report
            .write_summary(&mut io::stderr().lock())
            .map_err(CliError::output("stderr"))?;
    } else {
        report
            .write_summary(&mut io::stdout().lock())
            .map_err(CliError::output("stdout"))?;
    }
    Ok(report.exit_code())
}
