use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use gmacro::engine::{AntiAfkHandle, Engine, EnigoInjector, ExecutionEvent};
use gmacro::model::{loader, validate_resolved};
use gmacro::share;
use gmacro::vision::{ImageStore, NullCapture};

/// Gmacro CLI
#[derive(Debug, Parser)]
#[command(
    name = gmacro::PKG_NAME,
    version = gmacro::PKG_VERSION,
    about = "Block-timeline macro engine with humanized input and shareable macro codes"
)]
struct Args {
    /// Set log level (e.g., trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Check a macro file for structural errors
    Validate {
        /// Path to the macro JSON file
        macro_file: PathBuf,

        /// Directory of template images to resolve references against
        #[arg(long = "images")]
        images: Option<PathBuf>,
    },

    /// Execute a macro file
    Run {
        /// Path to the macro JSON file
        macro_file: PathBuf,

        /// Directory of template images referenced by the macro
        #[arg(long = "images")]
        images: Option<PathBuf>,

        /// Enable dry-run mode (log injections instead of simulating input)
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Poll interval for conditions and commands, in milliseconds
        #[arg(long = "poll-ms", default_value_t = 100)]
        poll_ms: u64,
    },

    /// Encode a macro file into a GMAC share code
    Encode {
        /// Path to the macro JSON file
        macro_file: PathBuf,
    },

    /// Decode a GMAC share code back into macro JSON
    Decode {
        /// The share code (GMAC-...)
        code: String,

        /// Write the decoded macro here instead of stdout
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },

    /// Print the JSON Schema for macro files and exit
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Honor --log-level by initializing tracing directly at that level.
    if let Some(level) = &args.log_level {
        let level = match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        };
        let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
    } else {
        gmacro::init_tracing();
    }

    match args.command {
        CliCommand::Validate { macro_file, images } => validate(&macro_file, images.as_deref()),
        CliCommand::Run {
            macro_file,
            images,
            dry_run,
            poll_ms,
        } => run(&macro_file, images.as_deref(), dry_run, poll_ms).await,
        CliCommand::Encode { macro_file } => {
            let mac = loader::load_from_path(&macro_file)?;
            println!("{}", share::encode(&mac)?);
            Ok(())
        }
        CliCommand::Decode { code, out } => {
            let mac = share::decode(&code)?;
            let json = serde_json::to_string_pretty(&mac)?;
            match out {
                Some(path) => std::fs::write(&path, json)?,
                None => println!("{json}"),
            }
            Ok(())
        }
        CliCommand::Schema => {
            let schema = loader::generate_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn load_images(dir: Option<&std::path::Path>) -> anyhow::Result<ImageStore> {
    match dir {
        Some(dir) => ImageStore::load_dir(dir),
        None => Ok(ImageStore::new()),
    }
}

fn validate(macro_file: &std::path::Path, images: Option<&std::path::Path>) -> anyhow::Result<()> {
    // Loading already rejects structurally broken macros; a resolved check
    // additionally verifies image references against the store.
    let mac = loader::load_from_path(macro_file)?;
    let store = load_images(images)?;
    let errors = validate_resolved(&mac, &store.names());
    if !errors.is_empty() {
        anyhow::bail!("macro is invalid:\n{}", loader::render_errors(&errors));
    }
    println!(
        "OK: `{}` ({} top-level block(s))",
        mac.name,
        mac.blocks.len()
    );
    Ok(())
}

async fn run(
    macro_file: &std::path::Path,
    images: Option<&std::path::Path>,
    dry_run: bool,
    poll_ms: u64,
) -> anyhow::Result<()> {
    let mac = loader::load_from_path(macro_file)?;
    let store = load_images(images)?;
    info!(
        version = gmacro::PKG_VERSION,
        macro_name = %mac.name,
        images = store.len(),
        dry_run,
        "Starting run"
    );

    // Screen capture is a host-provided capability; the CLI runs without
    // one, so vision blocks fail with a capture error here.
    let mut engine = Engine::with_poll_interval(
        Box::new(EnigoInjector::new(dry_run)),
        Box::new(NullCapture),
        std::time::Duration::from_millis(poll_ms.max(1)),
    );

    let afk = if mac.anti_afk.enabled {
        Some(AntiAfkHandle::spawn(
            mac.anti_afk.clone(),
            engine.injector(),
            engine.subscribe(),
        ))
    } else {
        None
    };

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    engine.start(mac, store, tx)?;

    // Main loop: handle run events or Ctrl+C.
    let mut failed = false;
    tokio::select! {
        _ = async {
            while let Some(event) = rx.recv().await {
                match event {
                    ExecutionEvent::BlockStarted { path } => {
                        info!(target: "gmacro", %path, "Block started");
                    }
                    ExecutionEvent::BlockCompleted { path } => {
                        info!(target: "gmacro", %path, "Block completed");
                    }
                    ExecutionEvent::ConditionTimeout { path } => {
                        warn!(target: "gmacro", %path, "Condition timed out");
                    }
                    ExecutionEvent::Error { kind, message } => {
                        error!(target: "gmacro", ?kind, %message, "Run error");
                        failed = true;
                    }
                    ExecutionEvent::Finished { elapsed } => {
                        info!(target: "gmacro", ?elapsed, "Run finished");
                    }
                    ExecutionEvent::Aborted => {
                        warn!(target: "gmacro", "Run aborted");
                        failed = true;
                    }
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping run");
            let _ = engine.stop();
        }
    }

    engine.join().await;
    if let Some(afk) = afk {
        afk.shutdown().await;
    }

    if failed {
        anyhow::bail!("macro run did not complete");
    }
    Ok(())
}
