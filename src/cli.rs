use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cr-dev", version)]
#[command(about = "Comradarr development tool - dev server, databases and tests")]
pub struct Cli {
    /// Project root (defaults to the directory holding comradarr-dev.yaml,
    /// or the current directory)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the dev server with an isolated database
    Dev(DevArgs),
    /// Stop the dev server and clean up its database
    Stop {
        /// Only report whether the dev server is running
        #[arg(long)]
        status: bool,
        /// Also remove persistent databases and saved credentials
        #[arg(long, visible_aliases = ["clean-all", "purge"])]
        force_cleanup: bool,
    },
    /// Run unit and integration tests
    Test {
        /// Run only unit tests
        #[arg(long, conflicts_with = "integration")]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
        /// Skip test database setup
        #[arg(long)]
        skip_db: bool,
        /// Don't start or install PostgreSQL automatically
        #[arg(long)]
        no_auto_install: bool,
    },
    /// Manage PostgreSQL and the test database
    #[command(subcommand)]
    Db(DbCommands),
    /// Manage saved database credentials
    #[command(subcommand)]
    Saved(SavedCommands),
    /// Launch the interactive dashboard
    Tui,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DevArgs {
    /// Keep the database and its credentials after the server stops
    #[arg(long)]
    pub persist: bool,
    /// Use this database name instead of a generated one
    #[arg(long, conflicts_with = "reconnect")]
    pub db_name: Option<String>,
    /// Reconnect to a saved database
    #[arg(long, value_name = "NAME")]
    pub reconnect: Option<String>,
    /// Admin password for the seeded admin user
    #[arg(long)]
    pub admin_password: Option<String>,
    /// Dev server port
    #[arg(long)]
    pub port: Option<u16>,
    /// PostgreSQL port
    #[arg(long)]
    pub db_port: Option<u16>,
    /// Run the server with AUTH_MODE=local_bypass
    #[arg(long)]
    pub skip_auth: bool,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Install PostgreSQL
    Install {
        /// Don't start the service after installing
        #[arg(long)]
        no_start: bool,
    },
    /// Start the PostgreSQL service
    Start,
    /// Stop the PostgreSQL service
    Stop,
    /// Show platform, service and test database status
    Status,
    /// Create and migrate the test database
    Setup,
    /// Drop the test database and user
    Teardown,
    /// Teardown followed by setup
    Reset,
    /// Print shell exports for the test database
    Env,
}

#[derive(Subcommand)]
pub enum SavedCommands {
    /// List saved databases
    List {
        /// Print as JSON (secrets omitted)
        #[arg(long)]
        json: bool,
    },
    /// Forget a saved database's credentials
    Delete {
        name: String,
        /// Also drop the database and its role
        #[arg(long)]
        drop: bool,
    },
}
