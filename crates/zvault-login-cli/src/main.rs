//! `zvault-login`: sign in to `ZVault` through OIDC or SAML.
//!
//! Opens the identity provider in the system browser, relays the OIDC
//! redirect back through a loopback listener and stores the resulting
//! session so later commands can show, renew or revoke it.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod browser;
mod config;
mod relay;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zvault_login::{
    AttemptSnapshot, AttemptStatus, AuthApi, AuthMethod, HostWindow, HttpAuthApi,
    HttpAuthApiConfig, LoginCoordinator, LoginRequest, LoginTimings, SessionRecord, SessionStore,
    WindowChannel,
};
use zvault_storage::{MemoryBackend, RedbBackend, StorageBackend};

use crate::browser::BrowserOpener;
use crate::config::{GlobalArgs, LoginConfig, StoreKind};
use crate::relay::CallbackRelay;

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// Sign in to ZVault with OIDC or SAML.
#[derive(Parser)]
#[command(
    name = "zvault-login",
    version,
    about = "ZVault login — sign in with OIDC or SAML through your browser",
    long_about = None,
    after_help = format!(
        "{DIM}Examples:{RESET}\n  \
         zvault-login login --method oidc --path oidc --role dev\n  \
         zvault-login login --method saml --path saml\n  \
         zvault-login status\n  \
         zvault-login sessions\n  \
         zvault-login logout"
    ),
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the identity provider.
    Login(LoginArgs),
    /// Show the stored session.
    Status,
    /// List every stored session.
    Sessions,
    /// Renew the stored token.
    Renew,
    /// Revoke the stored token and forget the session.
    Logout,
}

#[derive(Args)]
struct LoginArgs {
    /// Auth method: `oidc` or `saml`. Defaults to the last one used.
    #[arg(long)]
    method: Option<AuthMethod>,

    /// Auth mount path. Defaults to the method name.
    #[arg(long)]
    path: Option<String>,

    /// Role to sign in with.
    #[arg(long)]
    role: Option<String>,

    /// Seconds to wait for the provider before giving up.
    #[arg(long, default_value = "300")]
    timeout: u64,

    /// Print the provider URL instead of launching a browser.
    #[arg(long, default_value = "false")]
    no_browser: bool,
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

fn format_duration(secs: u64) -> String {
    if secs == 0 {
        return "never".to_owned();
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m"),
    }
}

fn print_session(session: &SessionRecord) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let remaining = u64::try_from((session.token_expiration_epoch - now_ms) / 1000).unwrap_or(0);
    let namespace = if session.user_root_namespace.is_empty() {
        "(root)"
    } else {
        session.user_root_namespace.as_str()
    };
    let expires = chrono::DateTime::from_timestamp_millis(session.token_expiration_epoch)
        .map_or_else(|| "unknown".to_owned(), |t| t.to_rfc3339());

    kv_line("display_name", &session.display_name);
    kv_line("token", &session.token);
    kv_line(
        "auth method",
        &format!("{} ({})", session.backend.auth_type, session.backend.mount_path),
    );
    kv_line("policies", &session.policies.join(", "));
    kv_line("namespace", namespace);
    kv_line("renewable", &session.renewable.to_string());
    if session.ttl > 0 {
        kv_line("expires", &format!("{expires} ({})", format_duration(remaining)));
    } else {
        kv_line("expires", "never");
    }
    if session.is_root_token {
        warning("This is a root token.");
    }
}

// ── Command dispatch ─────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = LoginConfig::from_args(cli.global);
    init_tracing(&config.log_level, config.log_json);

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: &LoginConfig, cmd: Commands) -> Result<()> {
    let store = open_store(&config.store)?;
    match cmd {
        Commands::Login(args) => cmd_login(config, store, args).await,
        Commands::Status => cmd_status(config, &store).await,
        Commands::Sessions => cmd_sessions(&store).await,
        Commands::Renew => cmd_renew(config, &store).await,
        Commands::Logout => cmd_logout(config, &store).await,
    }
}

fn open_store(kind: &StoreKind) -> Result<SessionStore> {
    let backend: Arc<dyn StorageBackend> = match kind {
        StoreKind::Memory => Arc::new(MemoryBackend::new()),
        StoreKind::Redb { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            Arc::new(
                RedbBackend::open(path)
                    .with_context(|| format!("failed to open session store {}", path.display()))?,
            )
        }
    };
    Ok(SessionStore::new(backend))
}

fn api_client(config: &LoginConfig) -> Result<HttpAuthApi> {
    HttpAuthApi::with_config(HttpAuthApiConfig {
        base_url: config.addr.clone(),
        timeout: config.request_timeout,
    })
    .context("invalid server address")
}

/// Namespace requests for `session` are scoped to.
fn session_namespace(config: &LoginConfig, session: &SessionRecord) -> Option<String> {
    if session.user_root_namespace.is_empty() {
        config.namespace.clone()
    } else {
        Some(session.user_root_namespace.clone())
    }
}

async fn cmd_login(config: &LoginConfig, store: SessionStore, args: LoginArgs) -> Result<()> {
    let last = store
        .last_auth_method()
        .await
        .context("failed to read the last auth method")?;
    let method = args
        .method
        .or_else(|| last.as_ref().map(|l| l.method))
        .unwrap_or(AuthMethod::Oidc);
    let path = args
        .path
        .or_else(|| {
            last.filter(|l| l.method == method)
                .map(|l| l.mount_path)
        })
        .unwrap_or_else(|| method.as_str().to_owned());

    let mut request = match method {
        AuthMethod::Oidc => LoginRequest::oidc(path, args.role.unwrap_or_default()),
        AuthMethod::Saml => {
            let request = LoginRequest::saml(path);
            match args.role {
                Some(role) => request.with_role(role),
                None => request,
            }
        }
    };
    if let Some(ns) = &config.namespace {
        request = request.with_namespace(ns.as_str());
    }

    let channel = WindowChannel::default();
    let relay = CallbackRelay::start(config.callback_port, channel.clone()).await?;
    let host = HostWindow::new(relay.origin());
    let coordinator = LoginCoordinator::new(
        Arc::new(api_client(config)?),
        Arc::new(BrowserOpener::new(!args.no_browser)),
        channel,
        host.clone(),
    )
    .with_timings(LoginTimings::production())
    .with_store(store);

    println!();
    header(
        "🔐",
        &format!("Signing in with {method} at {}", request.mount_path),
    );
    if method == AuthMethod::Oidc {
        kv_line(
            "redirect uri",
            &zvault_login::exchange::oidc_redirect_uri(relay.origin(), &request.mount_path),
        );
    }

    let progress = report_progress(coordinator.subscribe_status());
    let interrupt = {
        let host = host.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupt received, cancelling login");
                host.unload();
            }
        })
    };
    let outcome =
        tokio::time::timeout(Duration::from_secs(args.timeout), coordinator.login(request)).await;
    interrupt.abort();
    progress.abort();
    relay.stop().await;

    let session = match outcome {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            let message = e
                .banner_message()
                .unwrap_or_else(|| e.to_string());
            bail!(message);
        }
        Err(_) => bail!(
            "timed out after {}s waiting for the identity provider",
            args.timeout
        ),
    };

    println!();
    success("Signed in.");
    println!();
    print_session(&session);
    println!();
    Ok(())
}

/// Print the steps of the attempt that need the user's attention.
fn report_progress(mut status: watch::Receiver<AttemptSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let step = status.borrow_and_update().status;
            match step {
                AttemptStatus::AwaitingCallback => {
                    eprintln!("  {DIM}Waiting for the identity provider...{RESET}");
                }
                AttemptStatus::Exchanging => eprintln!("  {DIM}Completing sign-in...{RESET}"),
                _ => {}
            }
            if step.is_terminal() {
                break;
            }
        }
    })
}

async fn cmd_status(config: &LoginConfig, store: &SessionStore) -> Result<()> {
    let Some(mut session) = store.current().await.context("failed to read session")? else {
        warning("No active session.");
        return Ok(());
    };

    let api = api_client(config)?;
    let namespace = session_namespace(config, &session);
    match api.lookup_self(&session.token, namespace.as_deref()).await {
        Ok(fields) => {
            let ttl = if fields.ttl > 0 { fields.ttl } else { session.ttl };
            session.renewed(ttl, chrono::Utc::now().timestamp_millis());
            session.policies = fields.policies;
            store.save(&session).await.context("failed to save session")?;
        }
        Err(e) => {
            warn!(error = %e, "token lookup failed");
            warning(&format!("Could not refresh the session from the server: {e}"));
        }
    }

    println!();
    header("🔑", "Session");
    print_session(&session);
    if session.is_expired(chrono::Utc::now().timestamp_millis()) {
        warning("The token has expired. Run `zvault-login login` to sign in again.");
    }
    println!();
    Ok(())
}

async fn cmd_sessions(store: &SessionStore) -> Result<()> {
    let names = store
        .session_names()
        .await
        .context("failed to list sessions")?;
    if names.is_empty() {
        warning("No stored sessions.");
        return Ok(());
    }
    let current = store
        .current()
        .await
        .context("failed to read session")?
        .map(|s| s.token_name());

    println!();
    header("🗂", "Stored sessions");
    for name in &names {
        if current.as_deref() == Some(name.as_str()) {
            println!("  {GREEN}*{RESET} {WHITE}{name}{RESET} {DIM}(current){RESET}");
        } else {
            println!("    {name}");
        }
    }
    println!();
    Ok(())
}

async fn cmd_renew(config: &LoginConfig, store: &SessionStore) -> Result<()> {
    let Some(mut session) = store.current().await.context("failed to read session")? else {
        bail!("no active session, run `zvault-login login` first");
    };
    if !session.renewable {
        bail!("the stored token is not renewable");
    }

    let api = api_client(config)?;
    let namespace = session_namespace(config, &session);
    let auth = api
        .renew_self(&session.token, namespace.as_deref())
        .await
        .context("renewal failed")?;
    session.renewed(auth.lease_duration, chrono::Utc::now().timestamp_millis());
    store.save(&session).await.context("failed to save session")?;

    success(&format!(
        "Token renewed for {}.",
        format_duration(auth.lease_duration)
    ));
    Ok(())
}

async fn cmd_logout(config: &LoginConfig, store: &SessionStore) -> Result<()> {
    let Some(session) = store.current().await.context("failed to read session")? else {
        warning("No active session.");
        return Ok(());
    };

    let api = api_client(config)?;
    let namespace = session_namespace(config, &session);
    if let Err(e) = api.revoke_self(&session.token, namespace.as_deref()).await {
        warn!(error = %e, "token revocation failed");
        warning(&format!("Could not revoke the token on the server: {e}"));
    }
    store
        .clear_current()
        .await
        .context("failed to clear session")?;

    success("Signed out.");
    Ok(())
}
