//! squeue CLI tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "squeue")]
#[command(about = "Work queues stored in SQL tables", long_about = None)]
struct Cli {
    /// Configuration file (default: search SQUEUE_CONFIG, /etc/squeue, ~/.config/squeue)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database nickname from the configuration
    #[arg(long, global = true)]
    database: Option<String>,

    /// Database URL, overriding any nickname
    #[arg(long, env = "SQUEUE_DATABASE_URL", global = true, hide_env_values = true)]
    url: Option<String>,

    /// Queue table, optionally schema-qualified
    #[arg(long, short, env = "SQUEUE_QUEUE", global = true)]
    queue: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the queue table
    Create {
        /// Payload column as name:type (integer, bigint, real, text, boolean, timestamp)
        #[arg(long = "column", short = 'c')]
        columns: Vec<String>,
    },
    /// Enqueue rows from a JSON-lines file
    Put {
        /// File with one JSON object per line (default: stdin)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Priority for rows that do not set sq_priority
        #[arg(long, short, default_value = "1")]
        priority: i64,
    },
    /// Claim the next available row
    Claim {
        /// Only consider rows where column=value
        #[arg(long = "where", short = 'w')]
        filters: Vec<String>,
    },
    /// Fetch a claimed row and mark it in progress
    Fetch {
        /// Row ID
        id: i64,
    },
    /// Record the outcome of an in-progress row
    Finish {
        /// Row ID
        id: i64,
        /// Final status
        #[arg(long, short, default_value = "COMPLETED")]
        status: String,
    },
    /// Show the status of a row
    Status {
        /// Row ID
        id: i64,
    },
    /// Count available rows
    Count {
        /// Only count rows where column=value
        #[arg(long = "where", short = 'w')]
        filters: Vec<String>,
    },
    /// List in-progress rows
    InProgress,
    /// Destroy rows whose lease has expired
    Recover {
        /// Lease limit for claimed rows (default from configuration, else 1h)
        #[arg(long)]
        claimed_timeout: Option<String>,
        /// Lease limit for in-progress rows (default from configuration, else 8h)
        #[arg(long)]
        in_progress_timeout: Option<String>,
        /// Enqueue a fresh copy of each reclaimed row
        #[arg(long)]
        requeue: bool,
    },
    /// Destroy every row in the given statuses
    Destroy {
        /// Status to destroy (repeatable)
        #[arg(long = "status", short, required = true)]
        statuses: Vec<String>,
    },
    /// Run recovery periodically until interrupted
    Sweep {
        /// Time between passes
        #[arg(long, default_value = "1m")]
        interval: String,
        /// Enqueue a fresh copy of each reclaimed row
        #[arg(long)]
        requeue: bool,
    },
    /// Latest status of rows correlated with worker hosts
    Hosts {
        /// Host name prefix preceding the row ID
        #[arg(long)]
        prefix: String,
        /// Spawning row IDs
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// List configured database nicknames
    Databases,
    /// List configured queues and their lease timeouts
    Queues,
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let target = commands::Target {
        config: cli.config,
        database: cli.database,
        url: cli.url,
        queue: cli.queue,
    };

    match cli.command {
        Commands::Create { columns } => {
            commands::admin::create(&target, &columns).await?;
        }
        Commands::Put { file, priority } => {
            commands::rows::put(&target, file, priority).await?;
        }
        Commands::Claim { filters } => {
            commands::rows::claim(&target, &filters).await?;
        }
        Commands::Fetch { id } => {
            commands::rows::fetch(&target, id).await?;
        }
        Commands::Finish { id, status } => {
            commands::rows::finish(&target, id, &status).await?;
        }
        Commands::Status { id } => {
            commands::rows::status(&target, id).await?;
        }
        Commands::Count { filters } => {
            commands::admin::count(&target, &filters).await?;
        }
        Commands::InProgress => {
            commands::admin::in_progress(&target).await?;
        }
        Commands::Recover {
            claimed_timeout,
            in_progress_timeout,
            requeue,
        } => {
            commands::admin::recover(
                &target,
                claimed_timeout.as_deref(),
                in_progress_timeout.as_deref(),
                requeue,
            )
            .await?;
        }
        Commands::Destroy { statuses } => {
            commands::admin::destroy(&target, &statuses).await?;
        }
        Commands::Sweep { interval, requeue } => {
            commands::admin::sweep(&target, &interval, requeue).await?;
        }
        Commands::Hosts { prefix, ids } => {
            commands::admin::hosts(&target, &prefix, &ids).await?;
        }
        Commands::Databases => {
            commands::databases(&target)?;
        }
        Commands::Queues => {
            commands::queues(&target)?;
        }
    }

    Ok(())
}
