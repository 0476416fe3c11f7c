use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use syncml_viewer::actions::{
    DiagnosticsScenario, HostActions, SystemActions, default_diagnostics_dir,
};
use syncml_viewer::{CaptureConfig, CaptureError, SyncMlViewer, WriterSink};

/// syncml-viewer - live view of Windows MDM SyncML traffic
#[derive(Debug, Parser)]
#[command(name = "syncml-viewer", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Args)]
struct GlobalOptions {
    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture SyncML messages to stdout until interrupted. Requires elevation.
    Capture(CaptureArgs),

    /// Ask the MDM client to sync with its server now.
    Sync,

    /// Export MDM diagnostics with MdmDiagnosticsTool.
    Diagnostics {
        /// Autopilot, DeviceEnrollment, DeviceProvisioning, TPM or Full.
        #[arg(default_value = "Full")]
        scenario: DiagnosticsScenario,

        /// Output folder (defaults to the public MDMDiagnostics folder).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Do not open the output folder afterwards.
        #[arg(long)]
        no_open: bool,
    },

    /// Open the registry editor at a key.
    OpenRegistry {
        /// Full key path, e.g. HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Enrollments.
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Open a folder in Explorer.
    OpenFolder {
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },

    /// Open a link in the default browser.
    OpenUrl {
        #[arg(value_name = "URL")]
        url: String,
    },
}

#[derive(Debug, Args)]
struct CaptureArgs {
    /// ETW session name.
    #[arg(long)]
    session_name: Option<String>,

    /// Decode &lt; &gt; &quot; in the formatted output.
    #[arg(long)]
    decode_entities: bool,

    /// YAML capture configuration.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only SyncML; RUST_LOG overrides
    let level = if cli.global.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("syncml_viewer={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let actions = SystemActions::new();
    match cli.command {
        Command::Capture(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(capture(args))
        }
        Command::Sync => actions.trigger_external_sync().map_err(report),
        Command::Diagnostics { scenario, out, no_open } => {
            let dir = out.unwrap_or_else(default_diagnostics_dir);
            let code = actions.run_diagnostics_export(scenario, &dir).map_err(report)?;
            if code != 0 {
                warn!(code, "MdmDiagnosticsTool reported failure");
            }
            if !no_open {
                actions.open_folder(&dir).map_err(report)?;
            }
            Ok(())
        }
        Command::OpenRegistry { key } => actions.open_registry_at(&key).map_err(report),
        Command::OpenFolder { path } => actions.open_folder(&path).map_err(report),
        Command::OpenUrl { url } => actions.open_url(&url).map_err(report),
    }
}

async fn capture(args: CaptureArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::load(path).map_err(report)?,
        None => CaptureConfig::default(),
    };
    if let Some(name) = args.session_name {
        config.session_name = name;
    }
    if args.decode_entities {
        config.decode_entities = true;
    }

    let handle = SyncMlViewer::start_live(config, WriterSink::stdout()).await.map_err(report)?;
    info!(session = handle.session_name(), "Capturing, press Ctrl+C to stop");

    tokio::select! {
        signal = shutdown_signal() => {
            let signal = signal?;
            info!(signal, "Stopping capture");
        }
        () = handle.finished() => warn!("Trace session ended"),
    }

    let summary = handle.stop().await.map_err(report)?;
    info!(
        rendered = summary.stats.rendered,
        ignored = summary.stats.ignored,
        dropped = summary.stats.dropped,
        "Capture finished"
    );
    Ok(())
}

/// Resolves on the first request from the host to end the process.
///
/// The console close, logoff and shutdown events leave only a few seconds
/// before the process is killed, which is enough to release the session.
#[cfg(windows)]
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::windows;

    let mut interrupt = windows::ctrl_c().context("failed to listen for Ctrl+C")?;
    let mut brk = windows::ctrl_break().context("failed to listen for Ctrl+Break")?;
    let mut close = windows::ctrl_close().context("failed to listen for console close")?;
    let mut logoff = windows::ctrl_logoff().context("failed to listen for logoff")?;
    let mut shutdown = windows::ctrl_shutdown().context("failed to listen for shutdown")?;

    Ok(tokio::select! {
        _ = interrupt.recv() => "ctrl-c",
        _ = brk.recv() => "ctrl-break",
        _ = close.recv() => "console-close",
        _ = logoff.recv() => "logoff",
        _ = shutdown.recv() => "shutdown",
    })
}

#[cfg(not(windows))]
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    Ok("ctrl-c")
}

/// Print recovery hints for a capture error and convert it for `main`.
fn report(error: CaptureError) -> anyhow::Error {
    let suggestions = error.recovery_suggestions();
    if !suggestions.is_empty() {
        eprintln!("{error}");
        for suggestion in suggestions {
            eprintln!("  - {suggestion}");
        }
        if let Some(command) = error.stale_session_command() {
            eprintln!("A session left behind by a killed viewer can be stopped with: {command}");
        }
    }
    anyhow::Error::new(error)
}
