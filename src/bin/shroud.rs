//! Shroud CLI - batch password protection inside zip containers

use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shroud::audit::{AuditLog, DEFAULT_LOG_NAME};
use shroud::discover::{DiscoveryOptions, discover};
use shroud::passphrase::{self, LineReader, PassphraseReader, TerminalCapability};
use shroud::pipeline;
use shroud::policy::{self, DEFAULT_GENERATED_LENGTH};
use shroud::selftest;
use shroud::{ErrorKind, Secret, SevenZip, ShroudError};

const EXIT_OK: u8 = 0;
const EXIT_ENGINE_MISSING: u8 = 1;
const EXIT_SELF_TEST_FAILED: u8 = 2;
const EXIT_FATAL: u8 = 3;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "shroud")]
#[command(version)]
#[command(
    about = "Password-protect every file under a directory inside zip containers.",
    long_about = None
)]
struct Cli {
    /// Log debug details to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and wrap every file under a directory
    #[command(alias = "p")]
    Protect {
        /// Directory to process [default: directory of this executable]
        #[arg(short, long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Path to the 7-Zip executable, skipping the search
        #[arg(long, value_name = "FILE", env = "SHROUD_ENGINE")]
        engine: Option<PathBuf>,

        /// Maximum directory depth to descend (files in the root are depth 1)
        #[arg(long, value_name = "N")]
        max_depth: Option<usize>,

        /// Only process files with this extension (repeatable)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Audit log file name, created in the root directory
        #[arg(long, value_name = "NAME", default_value = DEFAULT_LOG_NAME)]
        log_file: PathBuf,

        /// Generate a strong password instead of prompting for one
        #[arg(long, conflicts_with = "passphrase_stdin")]
        generate: bool,

        /// Read the password from stdin instead of from the terminal
        #[arg(long)]
        passphrase_stdin: bool,

        /// Do not run the round-trip self-test before processing files
        #[arg(long)]
        skip_self_test: bool,
    },

    /// Verify the encrypt/wrap/unwrap/decrypt round trip on synthetic data
    #[command(alias = "t")]
    SelfTest {
        /// Path to the 7-Zip executable, skipping the search
        #[arg(long, value_name = "FILE", env = "SHROUD_ENGINE")]
        engine: Option<PathBuf>,
    },

    /// Recover the original file from a container
    #[command(alias = "r")]
    Restore {
        /// Container produced by `protect`
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Existing directory to write the original file into
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Path to the 7-Zip executable, skipping the search
        #[arg(long, value_name = "FILE", env = "SHROUD_ENGINE")]
        engine: Option<PathBuf>,

        /// Read the password from stdin instead of from the terminal
        #[arg(long)]
        passphrase_stdin: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Commands::Protect {
            root,
            engine,
            max_depth,
            extensions,
            log_file,
            generate,
            passphrase_stdin,
            skip_self_test,
        } => cmd_protect(ProtectArgs {
            root,
            engine,
            max_depth,
            extensions,
            log_file,
            generate,
            passphrase_stdin,
            skip_self_test,
        }),
        Commands::SelfTest { engine } => cmd_self_test(engine.as_deref()),
        Commands::Restore {
            input,
            output,
            engine,
            passphrase_stdin,
        } => cmd_restore(&input, &output, engine.as_deref(), passphrase_stdin),
    };
    ExitCode::from(code)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

struct ProtectArgs {
    root: Option<PathBuf>,
    engine: Option<PathBuf>,
    max_depth: Option<usize>,
    extensions: Vec<String>,
    log_file: PathBuf,
    generate: bool,
    passphrase_stdin: bool,
    skip_self_test: bool,
}

fn cmd_protect(args: ProtectArgs) -> u8 {
    let root = match resolve_root(args.root) {
        Ok(root) => root,
        Err(e) => return fatal(&e),
    };
    println!("Processing directory: {}", root.display());

    let engine = match SevenZip::locate(args.engine.as_deref()) {
        Ok(engine) => engine,
        Err(e) => return fatal(&e),
    };

    if !args.skip_self_test {
        if let Err(failure) = selftest::run_self_test(&engine) {
            eprintln!("Error: {}", failure);
            eprintln!("Refusing to process real files with a broken round trip.");
            return EXIT_SELF_TEST_FAILED;
        }
        println!("Self-test passed.");
    }

    let secret = match acquire_run_secret(args.generate, args.passphrase_stdin) {
        Ok(secret) => secret,
        Err(e) => return fatal(&e),
    };

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            log::warn!("could not install interrupt handler: {}", e);
        }
    }

    let log_path = root.join(&args.log_file);
    let mut audit = match AuditLog::open(&log_path) {
        Ok(audit) => audit,
        Err(e) => return fatal(&e),
    };

    let mut exclude = vec![log_path.clone(), engine.program().to_path_buf()];
    if let Ok(exe) = std::env::current_exe() {
        exclude.push(exe);
    }
    let options = DiscoveryOptions {
        max_depth: args.max_depth,
        extensions: args.extensions,
        exclude,
    };
    let files = match discover(&root, &options) {
        Ok(files) => files,
        Err(e) => return fatal(&e),
    };
    println!("Total files found: {}", files.len());

    let summary = pipeline::run_batch(&engine, &secret, &files, &mut audit, &interrupted);

    println!(
        "Completed. Total files: {} | Success: {} | Skipped: {} | Errors: {}",
        summary.total, summary.totals.succeeded, summary.totals.skipped, summary.totals.failed
    );
    println!("Audit log: {}", audit.path().display());
    if summary.interrupted {
        eprintln!("Interrupted by user.");
        return EXIT_INTERRUPTED;
    }
    EXIT_OK
}

fn cmd_self_test(engine: Option<&Path>) -> u8 {
    let engine = match SevenZip::locate(engine) {
        Ok(engine) => engine,
        Err(e) => return fatal(&e),
    };
    match selftest::run_self_test(&engine) {
        Ok(()) => {
            println!("Self-test passed.");
            EXIT_OK
        }
        Err(failure) => {
            eprintln!("Error: {}", failure);
            EXIT_SELF_TEST_FAILED
        }
    }
}

fn cmd_restore(input: &Path, output: &Path, engine: Option<&Path>, passphrase_stdin: bool) -> u8 {
    let engine = match SevenZip::locate(engine) {
        Ok(engine) => engine,
        Err(e) => return fatal(&e),
    };
    let mut reader = secret_reader(passphrase_stdin);
    let secret = match passphrase::read_existing(&mut *reader) {
        Ok(secret) => secret,
        Err(e) => return fatal(&e),
    };
    match pipeline::restore_container(&engine, &secret, input, output) {
        Ok(restored) => {
            for path in restored {
                println!("Restored {}", path.display());
            }
            EXIT_OK
        }
        Err(e) => fatal(&e),
    }
}

fn acquire_run_secret(generate: bool, passphrase_stdin: bool) -> shroud::Result<Secret> {
    let mut notice = io::stderr();
    if generate {
        let secret = policy::generate_strong(DEFAULT_GENERATED_LENGTH);
        passphrase::announce_generated(&secret, &mut notice)?;
        return Ok(secret);
    }
    let mut reader = secret_reader(passphrase_stdin);
    if passphrase_stdin {
        return passphrase::acquire_validated(&mut *reader);
    }
    let secret = passphrase::acquire_interactive(&mut *reader, &mut notice)?;
    let _ = notice.flush();
    Ok(secret)
}

fn secret_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(LineReader::quiet(io::stdin().lock()))
    } else {
        TerminalCapability::probe().reader()
    }
}

fn resolve_root(root: Option<PathBuf>) -> shroud::Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => {
            let exe = std::env::current_exe().map_err(|e| {
                ShroudError::with_kind_and_source(
                    shroud::ErrorCategory::Internal,
                    ErrorKind::Io,
                    "cannot determine the executable's directory; pass --root",
                    e,
                )
            })?;
            exe.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
        }
    };
    std::fs::canonicalize(&root).map_err(|e| {
        ShroudError::with_kind_and_source(
            shroud::ErrorCategory::User,
            ErrorKind::Io,
            format!("cannot read root directory {}", root.display()),
            e,
        )
    })
}

/// Report a fatal error and pick its exit code.
fn fatal(e: &ShroudError) -> u8 {
    eprintln!("Error: {}", e.chain_message());
    if e.is_kind(ErrorKind::EngineNotFound) {
        EXIT_ENGINE_MISSING
    } else if e.is_kind(ErrorKind::UserInterrupted) {
        EXIT_INTERRUPTED
    } else {
        EXIT_FATAL
    }
}
