//! ajdeploy - Entry Point
//!
//! Deploys a git repository to a remote host: stage, sync, provision, run
//! containers, configure nginx, validate.

use std::env;
use std::process;
use std::sync::Arc;

use chrono::Local;
use tracing::{error, info};

use ajdeploy::app::options::{collect_config, parse_args, AppOptions};
use ajdeploy::app::prompt::{Prompter, StdinPrompter};
use ajdeploy::app::run::Orchestrator;
use ajdeploy::deploy::git::GitStager;
use ajdeploy::deploy::sync::RsyncTransfer;
use ajdeploy::deploy::validate::HttpProber;
use ajdeploy::errors::{DeployError, EXIT_FAILURE};
use ajdeploy::logs::{init_logging, RunLog, Scrubber};
use ajdeploy::remote::executor::SshExecutor;
use ajdeploy::utils::version_info;

#[tokio::main]
async fn main() {
    let args = parse_args(env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let options = match AppOptions::from_args(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(EXIT_FAILURE);
        }
    };

    // Initialize logging
    let run_log = match init_logging(options.log.clone(), Local::now()) {
        Ok(run_log) => run_log,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };
    info!("ajdeploy {} ({})", version.version, version.git_hash);

    let shutdown = await_shutdown_signal();
    tokio::pin!(shutdown);

    let prompter = StdinPrompter::new();
    let prompter: Option<&dyn Prompter> = options.interactive.then_some(&prompter as &dyn Prompter);
    let env_lookup = |key: &str| env::var(key).ok();
    let config = tokio::select! {
        config = collect_config(&args, &env_lookup, prompter) => config,
        _ = &mut shutdown => Err(DeployError::Interrupted),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            finish(run_log, e.exit_code());
        }
    };

    let scrubber = Arc::new(Scrubber::new().with_secret(&config.token));
    let prober = match HttpProber::new() {
        Ok(prober) => prober,
        Err(e) => {
            error!("Failed to build the HTTP client: {}", e);
            finish(run_log, EXIT_FAILURE);
        }
    };

    let mut orchestrator = Orchestrator::new(
        Arc::new(GitStager::new(options.layout.clone(), scrubber.clone())),
        Arc::new(SshExecutor::new(scrubber.clone())),
        Arc::new(RsyncTransfer::new(scrubber)),
        Arc::new(prober),
        options.runner.clone(),
    );

    let summary = orchestrator
        .run(&config, &mut shutdown)
        .await
        .with_log_path(run_log.path());
    println!("{}", summary);
    // The run log is plain text
    colored::control::set_override(false);
    record(&run_log, &summary.to_string());

    let code = summary.exit_code();
    info!(stage = %summary.stage, exit_code = code, "Run finished");
    finish(run_log, code);
}

/// Flush the run log, report where it is and exit with `code`
fn finish(run_log: RunLog, code: i32) -> ! {
    let line = format!("Run log: {}", run_log.path().display());
    eprintln!("{}", line);
    record(&run_log, &line);
    drop(run_log);
    process::exit(code);
}

/// Copy operator-facing output that bypasses `tracing` into the run log
fn record(run_log: &RunLog, text: &str) {
    if let Err(e) = run_log.record(text) {
        eprintln!("Failed to write the run log: {}", e);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, stopping...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, stopping...");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, stopping..."),
        // Without a handler the run can only end on its own
        Err(_) => std::future::pending::<()>().await,
    }
}
