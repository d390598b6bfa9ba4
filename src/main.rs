use std::error::Error;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use log::error;
use logifai::configuration::cli::{CaptureArgs, CleanupArgs, Command};
use logifai::configuration::{AppPaths, Cli, Settings};
use logifai::data_capture::{CaptureOptions, StdioCapture};
use logifai::reference::{format_reference, MAX_RANGE_SPAN};
use logifai::storage::file_storage::{FileStorage, CURRENT_ALIAS};
use logifai::storage::retention::{parse_duration, parse_size, CleanupPolicy};
use logifai::{SessionManager, WebServer};
use tokio::io::BufReader;

type CliResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() {
    // Logs go to stderr so the stdout passthrough stays byte-identical.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_target(false)
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let paths = AppPaths::from_env().unwrap_or_else(|e| {
        eprintln!("logifai: {}", e);
        std::process::exit(1);
    });
    let settings = Settings::load(&paths.settings_file);
    let storage = Arc::new(FileStorage::new(&paths.logs_dir));
    let manager = Arc::new(SessionManager::new(storage, settings).with_settings_file(&paths.settings_file));

    let result = match cli.command {
        None => {
            if std::io::stdin().is_terminal() {
                // Nothing piped in: show usage instead of waiting on the keyboard.
                let _ = Cli::command().print_help();
                std::process::exit(1);
            }
            capture(manager, cli.capture).await
        }
        Some(Command::Capture(args)) => capture(manager, args).await,
        Some(Command::View { port }) => view(manager, port).await,
        Some(Command::Show { reference }) => show(&manager, &reference),
        Some(Command::Sessions) => sessions(&manager),
        Some(Command::Cleanup(args)) => cleanup(&manager, args),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("logifai: {}", e);
        std::process::exit(1);
    }
}

async fn capture(manager: Arc<SessionManager>, args: CaptureArgs) -> CliResult {
    let project = args.project.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let options = CaptureOptions {
        source: args.source,
        project,
        passthrough: !args.no_passthrough,
    };

    let engine = manager.begin_capture(options, args.live)?;
    let session_id = engine.session().id.clone();

    if args.live {
        let port = args.port.unwrap_or(manager.settings().web.port);
        spawn_server(Arc::clone(&manager), port);
        eprintln!("logifai: live view at http://127.0.0.1:{}", port);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let shutdown = {
        let interrupted = Arc::clone(&interrupted);
        async move {
            wait_for_interrupt().await;
            interrupted.store(true, Ordering::SeqCst);
        }
    };

    let outcome = StdioCapture::new(engine)
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), shutdown)
        .await;
    manager.end_capture(&session_id);
    let summary = outcome?;

    eprintln!("logifai: saved {} entries to session {}", summary.entries_written, session_id);
    if (1..=MAX_RANGE_SPAN).contains(&summary.entries_written) {
        let all: Vec<u64> = (1..=summary.entries_written).collect();
        eprintln!("logifai: cite with {}", format_reference(&session_id, &all));
    }

    if interrupted.load(Ordering::SeqCst) {
        // The session is closed; the stdin reader thread may still be parked
        // in a blocking read and would hold the runtime open.
        std::process::exit(0);
    }
    if args.live {
        eprintln!("logifai: input ended, still serving (Ctrl+C to exit)");
        wait_for_interrupt().await;
    }
    Ok(())
}

async fn view(manager: Arc<SessionManager>, port: Option<u16>) -> CliResult {
    let port = port.unwrap_or(manager.settings().web.port);
    let server = WebServer::new(manager);
    eprintln!("logifai: serving http://127.0.0.1:{}", port);
    tokio::select! {
        res = server.start(port) => res?,
        _ = wait_for_interrupt() => {}
    }
    Ok(())
}

fn show(manager: &SessionManager, reference: &str) -> CliResult {
    for entry in manager.resolve_reference(reference)? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

fn sessions(manager: &SessionManager) -> CliResult {
    let listing = manager.list_sessions()?;
    if listing.sessions.is_empty() {
        eprintln!("logifai: no sessions in {}", manager.storage().logs_dir().display());
        return Ok(());
    }
    let latest = manager.storage().resolve_session_file(CURRENT_ALIAS).ok();
    for meta in listing.sessions {
        let marker = match &latest {
            Some(path) if path.ends_with(&meta.filename) => "*",
            _ => " ",
        };
        println!(
            "{} {}  {}  {:>10}  {}",
            marker,
            meta.id,
            meta.started_at.format("%Y-%m-%d %H:%M:%S"),
            meta.size,
            meta.filename
        );
    }
    Ok(())
}

fn cleanup(manager: &SessionManager, args: CleanupArgs) -> CliResult {
    let mut policy = if args.older_than.is_none() && args.max_size.is_none() {
        CleanupPolicy::from_settings(&manager.settings().retention)
    } else {
        CleanupPolicy {
            max_age_days: args.older_than.as_deref().map(parse_duration).transpose()?,
            max_total_bytes: args.max_size.as_deref().map(parse_size).transpose()?,
            ..Default::default()
        }
    };
    policy.dry_run = args.dry_run;

    let result = manager.cleanup(policy)?;
    let verb = if args.dry_run { "Would delete" } else { "Deleted" };
    for file in &result.deleted_files {
        println!("{} {}", verb, file);
    }
    println!(
        "{} {} session(s), {:.1} MB",
        verb,
        result.deleted_count,
        result.freed_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn spawn_server(manager: Arc<SessionManager>, port: u16) {
    tokio::spawn(async move {
        if let Err(e) = WebServer::new(manager).start(port).await {
            error!("Live view unavailable: {}", e);
            eprintln!("logifai: live view unavailable: {}", e);
        }
    });
}

async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
