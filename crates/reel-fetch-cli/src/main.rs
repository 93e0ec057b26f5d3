//! Reel-Fetch CLI - command-line frontend for the Reel-Fetch downloader

mod cli;

use clap::Parser;
use reel_fetch_core::{
    format_bytes, format_eta, format_speed, ContentSearcher, DownloadRecord, DownloadService,
    EngineCommand, EngineEvent, Error, Magnet, Result, SearchConfig, SearchResult, Settings,
    UiMessage,
};
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    log::info!("Starting Reel-Fetch v{}", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let settings = load_settings(&config_path, cli.download_dir.as_deref());
    let result = match cli.command {
        Commands::Search { query, limit } => run_search(&settings, &query, limit),
        Commands::Get { magnet, title } => run_get(settings, magnet, title),
        Commands::ListConfig => list_config(&config_path, &settings),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: &Path, download_dir: Option<&str>) -> Settings {
    let mut settings = match Settings::load(path) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to load settings, using defaults: {}", e);
            Settings::default()
        }
    };
    if let Some(dir) = download_dir {
        settings.download_path = dir.to_string();
    }
    settings
}

fn run_search(settings: &Settings, query: &str, limit: Option<usize>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let searcher = ContentSearcher::new(SearchConfig::from(settings))?;
    let limit = limit.unwrap_or(settings.search_limit);

    let results = rt.block_on(searcher.search(query, limit))?;
    if results.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }
    for (index, result) in results.iter().enumerate() {
        print_result(index + 1, result);
    }
    Ok(())
}

fn print_result(position: usize, result: &SearchResult) {
    let mut details = vec![
        result.size.clone(),
        format!("{} seeders", result.seeders),
        format!("{} peers", result.peers),
    ];
    if let Some(quality) = &result.quality {
        details.push(quality.clone());
    }
    if let Some(year) = result.year {
        details.push(year.to_string());
    }

    println!("{:>2}. {}", position, result.title);
    println!("    {}", details.join(" | "));
    println!("    {}", result.magnet_uri);
}

fn run_get(settings: Settings, magnet: String, title: Option<String>) -> Result<()> {
    let info_hash = Magnet::parse(&magnet)?.info_hash;

    let (ui_sender, ui_receiver) = async_channel::bounded::<UiMessage>(100);
    let (cmd_sender, cmd_receiver) = async_channel::bounded::<EngineCommand>(100);
    let service = DownloadService::spawn(settings, ui_sender, cmd_receiver);

    let outcome = follow_download(&ui_receiver, &cmd_sender, &info_hash, magnet, title);

    let _ = cmd_sender.send_blocking(EngineCommand::Shutdown);
    if service.join().is_err() {
        log::error!("Download service thread panicked");
    }
    outcome
}

/// Submit the magnet once the engine is up, then print progress until it completes
fn follow_download(
    ui_receiver: &async_channel::Receiver<UiMessage>,
    cmd_sender: &async_channel::Sender<EngineCommand>,
    info_hash: &str,
    uri: String,
    title: Option<String>,
) -> Result<()> {
    let mut pending = Some(EngineCommand::AddMagnet { uri, title });

    while let Ok(msg) = ui_receiver.recv_blocking() {
        match msg {
            UiMessage::EngineReady => {
                if let Some(cmd) = pending.take() {
                    cmd_sender.send_blocking(cmd)?;
                }
            }
            UiMessage::Event(event) if event.info_hash() == Some(info_hash) => match event {
                EngineEvent::Added(record) => {
                    println!("Downloading '{}' to {}", record.title, record.save_path.display());
                }
                EngineEvent::Updated(record) => print_progress(&record),
                EngineEvent::Completed(record) => {
                    println!();
                    println!(
                        "Completed '{}' ({})",
                        record.title,
                        format_bytes(record.total_size_bytes)
                    );
                    return Ok(());
                }
                EngineEvent::Error { message, .. } => {
                    println!();
                    return Err(Error::EngineFault(message));
                }
                EngineEvent::Removed(_) => {
                    return Err(Error::NotFound(info_hash.to_string()));
                }
                EngineEvent::SearchCompleted(_) | EngineEvent::SearchError(_) => {}
            },
            UiMessage::Event(_) | UiMessage::DownloadsList(_) => {}
            UiMessage::Error(message) => return Err(Error::EngineFault(message)),
        }
    }

    Err(Error::Channel("download service stopped".to_string()))
}

fn print_progress(record: &DownloadRecord) {
    print!(
        "\r{:>6.2}%  {}  {}/{}  {}  {} peers  ETA {}    ",
        record.progress_percent,
        record.status,
        format_bytes(record.downloaded_bytes),
        format_bytes(record.total_size_bytes),
        format_speed(record.download_rate_bps),
        record.num_peers,
        format_eta(record.eta_seconds),
    );
    let _ = std::io::stdout().flush();
}

fn list_config(path: &Path, settings: &Settings) -> Result<()> {
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
