use std::path::PathBuf;

use brewsync_core::CollectionName;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "brewsync")]
#[command(about = "Keep the brewery client's collections in sync with the remote store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Keychain profile the session is stored under
    #[arg(long, global = true, value_name = "NAME", default_value = "default")]
    pub profile: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge with a JSON-lines UI host on stdin/stdout
    Run,
    /// Print the current value of one or all collections
    Pull {
        /// Only this collection
        #[arg(short, long, value_parser = parse_collection)]
        collection: Option<CollectionName>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace a collection's value
    Push {
        /// Target collection
        #[arg(value_parser = parse_collection)]
        collection: CollectionName,
        /// Read the payload from this file (stdin when omitted)
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,
    },
    /// Sign in with a one-time email code
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Create or inspect the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StoreBackend {
    Local,
    Rest,
    Realtime,
    Memory,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Send a sign-in code to an email address
    Login {
        /// Account email (defaults to the configured sign-in identifier)
        #[arg(long, value_name = "EMAIL")]
        email: Option<String>,
    },
    /// Exchange the emailed code for a session and store it in the keychain
    Verify {
        /// Account email (defaults to the configured sign-in identifier)
        #[arg(long, value_name = "EMAIL")]
        email: Option<String>,
        /// One-time code from the email
        #[arg(long, value_name = "CODE")]
        token: String,
    },
    /// Show the stored session
    Status,
    /// Sign out and clear the stored session
    Logout,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update the config file
    Init {
        /// Store backend
        #[arg(long, value_enum)]
        store: Option<StoreBackend>,
        /// Store URL (rest and realtime backends)
        #[arg(long, value_name = "URL")]
        store_url: Option<String>,
        /// Anon/public key for the rest backend
        #[arg(long, value_name = "KEY")]
        store_anon_key: Option<String>,
        /// Table holding the collections (rest backend)
        #[arg(long, value_name = "NAME")]
        table: Option<String>,
        /// Path prefix under the database root (realtime backend)
        #[arg(long, value_name = "PATH")]
        path_prefix: Option<String>,
        /// Directory for collection files (local backend)
        #[arg(long, value_name = "PATH")]
        data_dir: Option<PathBuf>,
        /// Supabase project URL
        #[arg(long, value_name = "URL")]
        supabase_url: Option<String>,
        /// Supabase anon/public key
        #[arg(long, value_name = "KEY")]
        supabase_anon_key: Option<String>,
        /// Email the bridge signs in with at startup
        #[arg(long, value_name = "EMAIL")]
        email: Option<String>,
        /// Sync collections without waiting for sign-in
        #[arg(long)]
        no_auth_required: bool,
        /// Timeout for every remote call, in seconds
        #[arg(long, value_name = "SECS")]
        request_timeout_secs: Option<u64>,
    },
    /// Print the effective config
    Show,
}

fn parse_collection(raw: &str) -> Result<CollectionName, String> {
    raw.parse().map_err(|error: brewsync_core::Error| error.to_string())
}
