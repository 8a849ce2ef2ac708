//! coursepilot - command line client for the course assistant.
//!
//! Logs in against the course assistant API, keeps the session between runs
//! and reports where a given page would take the current user.

mod app;

use std::io;
use std::str::FromStr;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use coursepilot_core::config::Config;
use coursepilot_core::models::Role;

const LOG_FILE: &str = "coursepilot.log";

const USAGE: &str = "\
Usage: coursepilot <command>

Commands:
  login [email] [--then <path>]    Log in and open <path> (or your home page)
  register <name> <email> [role]   Create an account and log in
  logout                           Forget the saved session
  whoami                           Verify the session and show the user
  status                           Show the saved session without checking it
  open <path>                      Show where <path> takes you

Environment:
  RUST_LOG, COURSEPILOT_API_BASE, COURSEPILOT_EMAIL, COURSEPILOT_PASSWORD";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when the cache directory is available, to a file
/// in it. The returned guard flushes the file writer on drop.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match Config::default().cache_dir() {
        Ok(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    if command == "--help" || command == "-h" || command == "help" {
        println!("{}", USAGE);
        return Ok(());
    }

    info!(command = %command, "coursepilot starting");

    let mut app = App::new()?;

    let rest = &args[1..];
    let result = match command.as_str() {
        "login" => {
            let (email, then) = parse_login_args(rest)?;
            app.login(email, then).await
        }
        "register" => {
            let (name, email) = match rest {
                [name, email, ..] => (name.clone(), email.clone()),
                _ => anyhow::bail!("register needs a name and an email\n\n{}", USAGE),
            };
            let role = rest
                .get(2)
                .map(|r| Role::from_str(r))
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            app.register(name, email, role).await
        }
        "logout" => {
            app.logout();
            Ok(())
        }
        "whoami" => app.whoami().await,
        "status" => {
            app.status();
            Ok(())
        }
        "open" => match rest.first() {
            Some(path) => app.open(path).await,
            None => anyhow::bail!("open needs a path\n\n{}", USAGE),
        },
        other => Err(anyhow::anyhow!("Unknown command: {}\n\n{}", other, USAGE)),
    };

    app.report_session_events(result.is_err());
    result
}

/// Split `login` arguments into the optional email and `--then` target.
fn parse_login_args(args: &[String]) -> Result<(Option<String>, Option<String>)> {
    let mut email = None;
    let mut then = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--then" {
            match iter.next() {
                Some(target) => then = Some(target.clone()),
                None => anyhow::bail!("--then needs a path"),
            }
        } else if email.is_none() {
            email = Some(arg.clone());
        } else {
            anyhow::bail!("Unexpected argument: {}", arg);
        }
    }

    Ok((email, then))
}
