//! sqlq CLI: operator interface to a persistent queue.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use sqlq::config::{Backend, Config, QueueOptions};
use sqlq::telemetry::{TelemetryConfig, init_telemetry};
use sqlq::{Error, GetOptions, Queue, QueueKind};

#[derive(Parser)]
#[command(name = "sqlq", about = "Persistent FIFO/FILO/unique work queues")]
struct Cli {
    /// TOML file with queue options (overrides SQLQ_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Queue name
    #[arg(long, global = true)]
    name: Option<String>,
    /// Ordering: fifo, filo or unique
    #[arg(long, global = true)]
    kind: Option<QueueKind>,
    /// Directory holding the SQLite file (ignored when DATABASE_URL is set)
    #[arg(long, global = true)]
    path: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a JSON item
    Put {
        /// JSON value
        item: String,
    },
    /// Dequeue one item and print it
    Get {
        /// Fail immediately when the queue is empty
        #[arg(long)]
        no_wait: bool,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Take this row instead of the head
        #[arg(long)]
        id: Option<i64>,
        /// Print id and timestamp too
        #[arg(long)]
        raw: bool,
    },
    /// Replace the payload of an existing row
    Update {
        id: i64,
        /// JSON value
        item: String,
    },
    /// Show every row without consuming
    List,
    /// Print the number of waiting items
    Size,
    /// Reclaim disk space
    Vacuum,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "sqlq".to_string(),
        default_level: config.log_level.clone(),
    })?;

    if let Some(ref path) = cli.config {
        config.queue = QueueOptions::from_toml_file(path)?;
    }
    if let Some(name) = cli.name {
        config.queue.name = name;
    }
    if let Some(kind) = cli.kind {
        config.queue.kind = kind;
    }
    if let (Some(path), Backend::Sqlite { dir }) = (cli.path, &mut config.backend) {
        *dir = path;
    }
    config.queue.validate()?;

    let queue: Queue<Value> = Queue::from_config(&config)?;

    match cli.command {
        Command::Put { item } => {
            let value: Value = serde_json::from_str(&item)?;
            match queue.put(&value)? {
                Some(id) => println!("{id}"),
                None => println!("duplicate, not enqueued"),
            }
        }
        Command::Get {
            no_wait,
            timeout,
            id,
            raw,
        } => {
            let options = GetOptions {
                block: !no_wait,
                timeout,
                id,
            };
            match queue.get_raw(options) {
                Ok(item) if raw => println!("{}", serde_json::to_string_pretty(&item)?),
                Ok(item) => println!("{}", serde_json::to_string(&item.data)?),
                Err(Error::Empty) => {
                    eprintln!("queue is empty");
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
            queue.task_done()?;
        }
        Command::Update { id, item } => {
            let value: Value = serde_json::from_str(&item)?;
            queue.update(&value, Some(id))?;
            println!("{id}");
        }
        Command::List => {
            let items = queue.list_all()?;
            if items.is_empty() {
                println!("No items.");
                return Ok(());
            }
            println!("{:<8}  {:<20}  DATA", "ID", "ENQUEUED");
            println!("{}", "-".repeat(60));
            for item in &items {
                println!(
                    "{:<8}  {:<20}  {}",
                    item.id,
                    item.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_string(&item.data)?
                );
            }
            println!("\n{} item(s)", items.len());
        }
        Command::Size => println!("{}", queue.size()),
        Command::Vacuum => queue.shrink_disk_usage()?,
    }

    Ok(())
}
