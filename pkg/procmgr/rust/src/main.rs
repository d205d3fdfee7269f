// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_procsched::config::{self, ProjectConfig};
use dd_procsched::scheduler::{SchedulerOptions, Supervisor};
use dd_procsched::shutdown;
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Parser, Debug)]
#[command(name = "dd-procsched")]
#[command(about = "Start, supervise and restart local processes in dependency order")]
struct Args {
    /// Project file (defaults to DD_PROCSCHED_CONFIG, then the system path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Keep running after every process has settled, until SIGTERM/SIGINT
    #[arg(long, default_value = "false")]
    keep_alive: bool,

    /// Seconds between SIGTERM and SIGKILL when stopping a process
    #[arg(long, default_value = "10")]
    shutdown_grace: u64,
}

fn init_logging(args: &Args, project: &ProjectConfig) -> Result<()> {
    // RUST_LOG takes precedence, then the flag, then the project file
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        let level = args
            .log_level
            .as_deref()
            .or(project.log_level.as_deref())
            .unwrap_or("info");
        EnvFilter::try_new(level).with_context(|| format!("invalid log level '{level}'"))
    })?;

    let (writer, ansi) = match &project.log_location {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (
            BoxMakeWriter::new(std::io::stdout),
            std::io::stdout().is_terminal(),
        ),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let path = args.config.clone().unwrap_or_else(config::config_path);
    let project = config::load_project(&path)?;
    init_logging(&args, &project)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "dd-procsched starting"
    );

    let store = project.descriptors()?;
    let options = SchedulerOptions {
        shutdown_grace: Duration::from_secs(args.shutdown_grace),
        exit_on_quiescence: !args.keep_alive,
    };
    let supervisor = Supervisor::new(store, options)?;
    let handle = supervisor.handle();

    tokio::spawn(async move {
        if let Err(e) = shutdown::wait_for_signal().await {
            error!(error = %e, "failed to install signal handlers");
            return;
        }
        handle.shutdown();
    });

    let report = supervisor.run().await;
    for err in &report.errors {
        error!(error = %err, "supervision error");
    }
    info!(
        states = %serde_json::to_string(&report.states)?,
        "final process states"
    );

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
