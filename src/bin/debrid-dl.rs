use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use debrid_dl::auth::{ProcessLock, TokenStore};
use debrid_dl::{ApiClient, AppConfig, AuthConfig, AuthManager, Backend, Orchestrator, notify};

fn print_usage() {
    eprintln!("Usage: debrid-dl <reference>");
    eprintln!();
    eprintln!("Adds a torrent to the Debrid-Link seedbox and downloads its files.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <reference>   path to a .magnet file (magnet link as text) or a .torrent file");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -h, --help    Show this help");
    eprintln!();
    eprintln!("Environment (a .env file in the working directory is read first):");
    eprintln!("  DEBRID_LINK_CLIENT_ID     OAuth client id (required)");
    eprintln!("  DOWNLOADS                 destination directory");
    eprintln!("  IN_PROGRESS               directory for in-progress files (default: DOWNLOADS)");
    eprintln!("  DOWNLOADER                aria2 | fetch (unset: print links only)");
    eprintln!("  ARIA2_RPC_URL, ARIA2_SECRET");
    eprintln!("  SMTP_HOST, SMTP_PORT, SMTP_USER, SMTP_PASS, MAIL_FROM, MAIL_TO");
    eprintln!("  MJ_APIKEY_PUBLIC, MJ_APIKEY_PRIVATE (used when SMTP_HOST is unset)");
    eprintln!("  DEBRID_STATE_DIR          credential and lock directory");
    eprintln!("  DEBRID_REMOVE_COMPLETED   remove the torrent once every file is in place");
}

fn parse_args() -> PathBuf {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        std::process::exit(0);
    }
    match args.as_slice() {
        [reference] if !reference.starts_with('-') => PathBuf::from(reference),
        [] => {
            eprintln!("Error: missing torrent or magnet reference");
            print_usage();
            std::process::exit(1);
        }
        _ => {
            eprintln!("Error: expected exactly one reference");
            print_usage();
            std::process::exit(1);
        }
    }
}

async fn run(reference: PathBuf, config: AppConfig) -> debrid_dl::Result<i32> {
    let http = reqwest::Client::new();
    let mailer = notify::from_config(&config.notifier, http.clone())?;
    let auth = AuthManager::new(
        AuthConfig::new(config.client_id.clone()),
        TokenStore::in_dir(&config.state_dir),
        ProcessLock::in_dir(&config.state_dir),
        mailer,
        http.clone(),
    )?;
    let api = ApiClient::new(http.clone(), Arc::new(auth));
    let backend = Backend::from_config(&config, http);
    log::debug!(
        "destination: {:?} - temp destination: {:?} - downloader: {}",
        config.destination,
        config.temp_dir(),
        backend.name()
    );

    let outcome = Orchestrator::new(api, &config)
        .run(&reference, backend.downloader(), &mut std::io::stdout())
        .await?;
    log::debug!("{outcome:?}");
    Ok(outcome.exit_code())
}

#[tokio::main]
async fn main() {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let reference = parse_args();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let code = match run(reference.clone(), config).await {
        Ok(code) => code,
        Err(e) => {
            log::info!("Couldn't process '{}'", reference.display());
            log::error!("{e}");
            1
        }
    };
    std::process::exit(code);
}
