//! Configuration for `zvault-login`.
//!
//! Every setting is a global flag that falls back to an environment
//! variable, then to a default. [`LoginConfig::from_args`] resolves the
//! parsed flags into runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

/// Loopback port of the OIDC redirect, as registered in a role's
/// `allowed_redirect_uris`.
pub const DEFAULT_CALLBACK_PORT: u16 = 8250;

/// Session store backends selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreChoice {
    /// In-memory (lost when the process exits).
    #[value(alias = "mem")]
    Memory,
    /// redb file.
    Redb,
}

/// Flags shared by every command.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Server address.
    #[arg(
        long,
        global = true,
        env = "VAULT_ADDR",
        default_value = "http://127.0.0.1:8200"
    )]
    pub addr: String,

    /// Namespace to sign in to.
    #[arg(long, global = true, env = "VAULT_NAMESPACE")]
    pub namespace: Option<String>,

    /// Session store.
    #[arg(
        long,
        global = true,
        env = "ZVAULT_LOGIN_STORE",
        value_enum,
        ignore_case = true,
        default_value = "redb"
    )]
    pub store: StoreChoice,

    /// Path of the redb session file [default: ~/.zvault/login.redb].
    #[arg(long, global = true, env = "ZVAULT_LOGIN_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Loopback port for the OIDC redirect (0 picks a free port).
    #[arg(
        long,
        global = true,
        env = "ZVAULT_LOGIN_CALLBACK_PORT",
        default_value_t = DEFAULT_CALLBACK_PORT
    )]
    pub callback_port: u16,

    /// Log filter, e.g. `warn` or `zvault_login=debug`. `RUST_LOG` wins when set.
    #[arg(
        long,
        global = true,
        env = "ZVAULT_LOGIN_LOG_LEVEL",
        default_value = "warn"
    )]
    pub log_level: String,

    /// Per-request timeout of the HTTP client, in seconds.
    #[arg(
        long,
        global = true,
        env = "ZVAULT_LOGIN_TIMEOUT",
        default_value = "30"
    )]
    pub request_timeout: u64,

    /// Emit logs as JSON.
    #[arg(long, global = true, default_value = "false")]
    pub log_json: bool,
}

/// Where sessions are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Redb { path: PathBuf },
}

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub addr: String,
    /// Namespace logins are scoped to; `None` is the root namespace.
    pub namespace: Option<String>,
    pub store: StoreKind,
    pub callback_port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub request_timeout: Duration,
}

impl LoginConfig {
    /// Resolve parsed flags. An empty namespace means root; a zero timeout
    /// falls back to 30 seconds.
    #[must_use]
    pub fn from_args(args: GlobalArgs) -> Self {
        let store = match args.store {
            StoreChoice::Memory => StoreKind::Memory,
            StoreChoice::Redb => StoreKind::Redb {
                path: args.store_path.unwrap_or_else(default_store_path),
            },
        };
        let request_timeout = match args.request_timeout {
            0 => Duration::from_secs(30),
            secs => Duration::from_secs(secs),
        };
        Self {
            addr: args.addr,
            namespace: args.namespace.filter(|ns| !ns.is_empty()),
            store,
            callback_port: args.callback_port,
            log_level: args.log_level,
            log_json: args.log_json,
            request_timeout,
        }
    }
}

fn default_store_path() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
        .join(".zvault")
        .join("login.redb")
}
