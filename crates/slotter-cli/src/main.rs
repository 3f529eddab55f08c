use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "slotter")]
#[command(author, version)]
#[command(
    about = "Scheduled appointment booking assistant",
    long_about = "Slotter rotates registered users through scheduled booking attempts against \
                  an appointment site, driving an already-running browser and pausing for a \
                  human operator whenever a challenge or manual step comes up."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the user database (defaults to the platform data directory)
    #[arg(long, global = true, env = "SLOTTER_DB")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the booking schedule with an interactive operator console
    Run {
        /// DevTools endpoint of the already-running browser
        #[arg(long, env = "SLOTTER_ENDPOINT", default_value = "http://127.0.0.1:9222")]
        endpoint: String,

        /// Entry (login) page of the booking site
        #[arg(long, env = "SLOTTER_ENTRY_URL")]
        entry_url: String,

        /// Minutes between scheduled attempts
        #[arg(long, default_value_t = 10)]
        interval_mins: u64,

        /// Upper bound of the random per-tick jitter, in seconds
        #[arg(long, default_value_t = 60)]
        jitter_secs: u64,

        /// Bound on waiting for one attempt's result, in seconds
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,

        /// City to pick from when a user has no stored preference (repeatable)
        #[arg(long = "city")]
        cities: Vec<String>,

        /// Chat id that receives pause notices and summaries (repeatable)
        #[arg(long = "operator-chat")]
        operator_chats: Vec<i64>,

        /// Appointment sub-category
        #[arg(long, env = "SLOTTER_CATEGORY", default_value = "SEAMEN")]
        category: String,
    },

    /// Run exactly one booking attempt, then exit
    Once {
        /// DevTools endpoint of the already-running browser
        #[arg(long, env = "SLOTTER_ENDPOINT", default_value = "http://127.0.0.1:9222")]
        endpoint: String,

        /// Entry (login) page of the booking site
        #[arg(long, env = "SLOTTER_ENTRY_URL")]
        entry_url: String,

        /// Bound on waiting for the attempt's result, in seconds
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// City to pick from when a user has no stored preference (repeatable)
        #[arg(long = "city")]
        cities: Vec<String>,

        /// Appointment sub-category
        #[arg(long, env = "SLOTTER_CATEGORY", default_value = "SEAMEN")]
        category: String,
    },

    /// Register a user with credentials, or a chat-only subscriber
    Register {
        /// Site login; omit for a chat-only subscriber
        #[arg(long)]
        login: Option<String>,

        /// Site password; required together with --login
        #[arg(long)]
        password: Option<String>,

        /// Chat handle for notifications
        #[arg(long)]
        chat_handle: Option<String>,

        /// Numeric chat id for notifications
        #[arg(long)]
        chat_id: Option<i64>,

        /// Preferred appointment city
        #[arg(long)]
        city: Option<String>,
    },

    /// List users and the most recent booking attempt
    Users,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Execute the command
    match cli.command {
        Commands::Run {
            endpoint,
            entry_url,
            interval_mins,
            jitter_secs,
            timeout_secs,
            cities,
            operator_chats,
            category,
        } => commands::run::execute(
            cli.db,
            endpoint,
            entry_url,
            interval_mins,
            jitter_secs,
            timeout_secs,
            cities,
            operator_chats,
            category,
        ),
        Commands::Once {
            endpoint,
            entry_url,
            timeout_secs,
            cities,
            category,
        } => commands::once::execute(cli.db, endpoint, entry_url, timeout_secs, cities, category),
        Commands::Register {
            login,
            password,
            chat_handle,
            chat_id,
            city,
        } => commands::register::execute(cli.db, login, password, chat_handle, chat_id, city),
        Commands::Users => commands::users::execute(cli.db),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("slotter=debug,slotter_core=debug,slotter_browser=debug,slotter_control=debug")
    } else {
        EnvFilter::new("slotter=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
