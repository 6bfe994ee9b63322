//! vtu-session - terminal client for the VTU session core.
//!
//! Usage:
//!   vtu-session status            Show the restored session, if any
//!   vtu-session login [--remember]
//!   vtu-session logout
//!   vtu-session watch             Keep the session alive; each stdin line counts as activity
//!   vtu-session route <path>      Show what the navigation guard would do

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vtu_session::api::ApiClient;
use vtu_session::models::LoginRequest;
use vtu_session::session::{ActivitySignal, GuardDecision, NavigationGuard, SessionController};
use vtu_session::{AuthState, Config};

// ============================================================================
// Constants
// ============================================================================

/// Daily-rolled log file name prefix in the cache directory
const LOG_FILE_PREFIX: &str = "vtu-session.log";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Login { remember: bool },
    Logout,
    Watch,
    Route(String),
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.first().map(String::as_str) {
        None | Some("status") => Ok(Command::Status),
        Some("login") => Ok(Command::Login {
            remember: args[1..].iter().any(|a| a == "--remember" || a == "-r"),
        }),
        Some("logout") => Ok(Command::Logout),
        Some("watch") => Ok(Command::Watch),
        Some("route") => args
            .get(1)
            .map(|path| Command::Route(path.clone()))
            .ok_or_else(|| anyhow::anyhow!("route needs a path, e.g. `route /dashboard`")),
        Some("help") | Some("--help") | Some("-h") => Ok(Command::Help),
        Some(other) => Err(anyhow::anyhow!("Unknown command: {}", other)),
    }
}

/// Initialize the tracing subscriber: stderr plus a daily log file.
/// The returned guard must live until exit so buffered lines get flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=vtu_session=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        print_usage();
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    if let Ok(url) = std::env::var("VTU_API_URL") {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, ?command, "vtu-session starting");

    let mut controller = build_controller(&config).await?;
    let state = controller.init().await;
    report_redirect(&mut controller);

    let result = match command {
        Command::Status => status(&mut controller, &config).await,
        Command::Login { remember } => {
            if state.is_signed_in() {
                println!("Already signed in.");
                Ok(())
            } else {
                match login(&mut controller, &mut config, remember).await {
                    Ok(()) => watch(&mut controller).await,
                    Err(e) => Err(e),
                }
            }
        }
        Command::Logout => {
            if state.is_signed_in() {
                controller.logout().await;
                controller.take_redirect();
                println!("Signed out.");
            } else {
                println!("Not signed in.");
            }
            Ok(())
        }
        Command::Watch => watch(&mut controller).await,
        Command::Route(path) => {
            route(&controller, &config, &path);
            Ok(())
        }
        Command::Help => Ok(()),
    };

    controller.dispose().await;
    info!("vtu-session shutting down");
    result
}

fn print_usage() {
    println!("Usage: vtu-session <command>");
    println!();
    println!("Commands:");
    println!("  status              Show the restored session, if any");
    println!("  login [--remember]  Sign in, then keep the session alive");
    println!("  logout              Sign out and clear the stored credential");
    println!("  watch               Keep the session alive; each line on stdin counts as activity");
    println!("  route <path>        Show what the navigation guard decides for <path>");
}

async fn build_controller(config: &Config) -> Result<SessionController> {
    let api = ApiClient::new(config.api_base_url.clone(), config.request_timeout())
        .context("Failed to build HTTP client")?;
    let store = config.token_store().await?;
    Ok(SessionController::new(
        config.session_options(),
        store,
        Arc::new(api),
    ))
}

fn report_redirect(controller: &mut SessionController) {
    if let Some(redirect) = controller.take_redirect() {
        match redirect.reason {
            Some(reason) => println!("{} ({})", reason.message(), redirect.url()),
            None => println!("Signed out ({})", redirect.url()),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn status(controller: &mut SessionController, config: &Config) -> Result<()> {
    if controller.state().is_signed_in() {
        // Give the background profile fetch a chance to land
        let _ = tokio::time::timeout(config.request_timeout(), async {
            while controller.session().user.is_none() && controller.state().is_signed_in() {
                match controller.next_event().await {
                    Some(event) => controller.handle_event(event).await,
                    None => break,
                }
            }
        })
        .await;
        report_redirect(controller);
    }

    let session = controller.session();
    println!("State:   {}", session.state);
    if let Some(mode) = session.persistence_mode {
        println!("Stored:  {}", mode);
    }
    if let Some(expires_at) = controller.credential().ok().and_then(|c| c.expires_at()) {
        println!("Expires: {}", expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(user) = &session.user {
        println!("User:    {} <{}>", user.display_name(), user.email);
    }
    Ok(())
}

async fn login(controller: &mut SessionController, config: &mut Config, remember: bool) -> Result<()> {
    let email = match std::env::var("VTU_EMAIL") {
        Ok(email) => email,
        Err(_) => prompt_email(config.last_email.as_deref())?,
    };
    let password = match std::env::var("VTU_PASSWORD") {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ")?,
    };

    if let Err(e) = controller.login(LoginRequest::new(email.clone(), password), remember).await {
        eprintln!("Login failed: {}", e.user_message());
        return Err(e.into());
    }

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    let session = controller.session();
    if let Some(user) = &session.user {
        println!("Signed in as {}.", user.display_name());
    }
    if let Err(e) = controller.persistence_status() {
        println!("Warning: {}", e.user_message());
    }
    Ok(())
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim();
    Ok(match (email.is_empty(), last) {
        (true, Some(last)) => last.to_string(),
        _ => email.to_string(),
    })
}

/// Drive the controller until the session ends, stdin closes and the session
/// ends, or Ctrl+C.
async fn watch(controller: &mut SessionController) -> Result<()> {
    if !controller.state().is_signed_in() {
        println!("Not signed in.");
        return Ok(());
    }
    println!("Session active ({}). Press Enter to register activity, Ctrl+C to quit.", controller.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut states = controller.subscribe();
    let mut last_state = controller.state();

    loop {
        tokio::select! {
            event = controller.next_event() => match event {
                Some(event) => controller.handle_event(event).await,
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    controller.record_activity(ActivitySignal::KeyPress);
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        let state = *states.borrow_and_update();
        if state != last_state && state != AuthState::Validating && last_state != AuthState::Validating {
            println!("State: {}", state);
        }
        last_state = state;

        if !controller.state().is_signed_in() {
            report_redirect(controller);
            break;
        }
    }
    Ok(())
}

fn route(controller: &SessionController, config: &Config, path: &str) {
    let guard = NavigationGuard::new(config.routes.clone());
    match guard.decide(controller.state(), path) {
        GuardDecision::Allow => println!("allow {}", path),
        GuardDecision::Defer => println!("defer {} (session not settled)", path),
        GuardDecision::Redirect(to) => println!("redirect {} -> {}", path, to),
    }
}

// ============================================================================
// Tests
// ============================================================================
