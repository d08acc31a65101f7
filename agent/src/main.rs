//! BMTL Agent - Entry Point
//!
//! One binary for every role on a BMTL camera device: the agent runtime that talks to
//! the MQTT broker, the launcher started by systemd, and the blue/green release manager.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use bmtl_agent::app::check::self_check;
use bmtl_agent::app::options::AppOptions;
use bmtl_agent::app::run::run;
use bmtl_agent::filesys::file::File;
use bmtl_agent::launcher::{exec_runtime, prepare_launch, EXIT_NO_RUNTIME};
use bmtl_agent::logs::{init_logging, LogOptions};
use bmtl_agent::release::manager::{self, release_status, ReleaseManager, UpdateMode};
use bmtl_agent::release::services::SystemdServices;
use bmtl_agent::release::slots::{build_hash, SlotManifest, MANIFEST_FILE};
use bmtl_agent::storage::layout::StorageLayout;
use bmtl_agent::storage::settings::Settings;
use bmtl_agent::utils::version_info;

use tracing::{error, info, warn};

/// Exit code when the install root needs manual repair
const EXIT_CORRUPTION: i32 = 2;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        print_json(&version_info());
        return;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = load_settings(&settings_file).await;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.as_ref().map(PathBuf::from),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    if cli_args.contains_key("self-check") {
        match self_check(&settings) {
            Ok(report) => print_json(&report),
            Err(e) => {
                error!("Self-check failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let release_options = manager::Options::from(&settings.release);

    if cli_args.contains_key("status") {
        print_json(&release_status(&release_options.layout).await);
        return;
    }

    let mode = if cli_args.contains_key("install") {
        Some(UpdateMode::Install)
    } else if cli_args.contains_key("update") {
        Some(UpdateMode::Update)
    } else if cli_args.contains_key("revert") {
        Some(UpdateMode::Revert)
    } else {
        None
    };
    if let Some(mode) = mode {
        std::process::exit(run_release_manager(&settings, release_options, mode).await);
    }

    if cli_args.contains_key("launch") {
        let forward: Vec<String> = args
            .iter()
            .skip(1)
            .filter(|arg| arg.as_str() != "--launch" && arg.as_str() != "--run")
            .cloned()
            .collect();
        let system_runtime = File::new(&settings.release.system_runtime);
        match prepare_launch(&release_options.layout, &system_runtime).await {
            Ok(target) => {
                let err = exec_runtime(&target, &forward);
                error!("Failed to exec {}: {}", target.runtime.display(), err);
                std::process::exit(1);
            }
            Err(e) => {
                error!("Unable to launch the agent: {}", e);
                std::process::exit(EXIT_NO_RUNTIME);
            }
        }
    }

    // Run the agent starting here
    let mut options = AppOptions::from_settings(&settings, layout);
    options.settings_path = cli_args.get("settings").cloned();
    options.slot = env::var("BMTL_SLOT").ok();
    options.build_hash = running_build_hash().await;

    info!("Running BMTL Agent with options: {:?}", options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the agent: {e}");
        std::process::exit(1);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Unable to serialize output: {e}"),
    }
}

async fn load_settings(settings_file: &File) -> Settings {
    let mut settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!(
                    "Unable to read settings file {}, using defaults: {e}",
                    settings_file.path().display()
                );
                Settings::default()
            }
        }
    } else {
        Settings::default()
    };
    settings.apply_env_overrides();
    settings
}

async fn run_release_manager(settings: &Settings, options: manager::Options, mode: UpdateMode) -> i32 {
    let services = match SystemdServices::new(
        settings.release.services.clone(),
        settings.release.status_url.as_deref(),
    ) {
        Ok(services) => services,
        Err(e) => {
            error!("Invalid release configuration: {}", e);
            return 1;
        }
    };

    let manager = ReleaseManager::new(options, services);
    match manager.run(mode, Box::pin(await_shutdown_signal())).await {
        Ok(report) => {
            info!(
                "Release {} complete: slot {} running build {}",
                mode, report.active, report.build_hash
            );
            print_json(&report);
            0
        }
        Err(e) if e.is_corruption() => {
            error!("Install root needs manual repair: {}", e);
            EXIT_CORRUPTION
        }
        Err(e) => {
            error!("Release {} failed: {}", mode, e);
            1
        }
    }
}

/// Build hash of the release this process runs from
async fn running_build_hash() -> String {
    if let Ok(release_dir) = env::var("BMTL_RELEASE_DIR") {
        let manifest = File::new(Path::new(&release_dir).join(MANIFEST_FILE));
        match manifest.read_json::<SlotManifest>().await {
            Ok(manifest) => return manifest.build_hash,
            Err(e) => warn!("Unable to read release manifest in {}: {}", release_dir, e),
        }
    }

    if let Ok(cwd) = env::current_dir() {
        let hash = build_hash(&cwd).await;
        if hash != "unknown" {
            return hash;
        }
    }

    version_info().git_hash
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers, waiting for Ctrl+C only");
                wait_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    wait_ctrl_c().await;
}

async fn wait_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl+C received, shutting down...");
}
