use clap::{Parser, Subcommand};
use procflow::config::{EngineConfig, StorageConfig};
use procflow::runtime::definitions::InMemoryDefinitions;
use procflow::runtime::engine::Engine;
use procflow::runtime::queue::{Job, JobKind, RedisTaskQueue, TaskQueue};
use procflow::runtime::worker::Worker;
use procflow::store::{QueryOptions, Stores};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the engine YAML config; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the Redis job queue
    Worker {
        /// YAML list of the deployed process definitions
        #[arg(long)]
        definitions: PathBuf,
    },
    /// Enqueue a job
    Submit {
        #[command(subcommand)]
        job: JobCommand,
    },
    /// Print in-progress message instances and waiting message events
    Recovery {
        /// Clear the in-progress flags after printing
        #[arg(long)]
        reset: bool,
    },
    /// Print the live token count of a merge key
    Tokens {
        #[arg(long)]
        process_instance: u64,
        #[arg(long)]
        ref_id: u64,
    },
}

#[derive(Subcommand)]
enum JobCommand {
    Correlate,
    Timers,
    Archive {
        #[arg(long)]
        process_instance: u64,
    },
    Cleanup {
        #[arg(long)]
        process_instance: u64,
    },
}

impl JobCommand {
    fn into_job(self) -> Job {
        Job::new(match self {
            JobCommand::Correlate => JobKind::CorrelateMessages,
            JobCommand::Timers => JobKind::FireDueTimers { now: None },
            JobCommand::Archive { process_instance } => JobKind::ArchiveProcessInstance {
                process_instance_id: process_instance,
            },
            JobCommand::Cleanup { process_instance } => JobKind::CleanupProcessInstance {
                process_instance_id: process_instance,
            },
        })
    }
}

fn job_queue(config: &EngineConfig) -> anyhow::Result<Arc<dyn TaskQueue>> {
    match &config.storage {
        StorageConfig::Redis { url, key_prefix } => {
            let client = redis::Client::open(url.as_str())?;
            Ok(Arc::new(RedisTaskQueue::new(client, format!("{}:jobs", key_prefix))))
        }
        StorageConfig::Memory => {
            anyhow::bail!("the job queue needs the redis storage backend")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let stores = Stores::from_config(&config.storage, &config.archive)?;
    let definitions = match &cli.command {
        Commands::Worker { definitions } => {
            let loaded = InMemoryDefinitions::load(definitions)?;
            if loaded.is_empty() {
                anyhow::bail!("no process definitions in {}", definitions.display());
            }
            info!(definitions = loaded.len(), "Process definitions loaded");
            loaded
        }
        // Recovery and inspection never consult the definitions.
        _ => InMemoryDefinitions::new(),
    };
    let engine = Arc::new(Engine::new(stores, Arc::new(definitions), &config));

    match cli.command {
        Commands::Worker { .. } => {
            let queue = job_queue(&config)?;
            let worker = Worker::new(
                engine,
                queue,
                Duration::from_secs(config.job_timeout_secs),
            );
            info!("Running... (Press Ctrl+C to stop)");
            tokio::select! {
                _ = worker.run() => {}
                _ = tokio::signal::ctrl_c() => info!("Shutting down"),
            }
        }
        Commands::Submit { job } => {
            let queue = job_queue(&config)?;
            let job = job.into_job();
            let id = job.id;
            queue.push(job).await?;
            println!("{}", id);
        }
        Commands::Recovery { reset } => {
            let messages = engine
                .events
                .get_in_progress_message_instances(&QueryOptions::all())
                .await?;
            let waiting = engine
                .events
                .get_in_progress_waiting_message_events(&QueryOptions::all())
                .await?;
            for message in &messages {
                println!("message {} {}", message.id, message.message_name);
            }
            for event in &waiting {
                println!("waiting {} {:?}", event.id, event.flow_node_instance_id);
            }
            if reset {
                engine.events.reset_in_progress_message_instances().await?;
                engine.events.reset_in_progress_waiting_events().await?;
            }
        }
        Commands::Tokens {
            process_instance,
            ref_id,
        } => {
            let count = engine
                .tokens
                .get_number_of_token(process_instance, ref_id)
                .await?;
            println!("{}", count);
        }
    }

    Ok(())
}
