//! tubeworker command line: run a worker pool or enqueue jobs.
//!
//! Configuration is read from an optional JSON file, then `TUBEWORKER_*`
//! environment variables, then flags.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use tubeworker::{
    handler_fn, BeanstalkConn, Client, Config, Connection, Error, Job, Network, WorkMux,
    DEFAULT_PRIORITY, DEFAULT_TTR,
};

#[derive(Parser)]
#[command(name = "tubeworker")]
#[command(about = "beanstalkd worker pool client")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, env = "TUBEWORKER_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BrokerArgs {
    /// Transport: tcp or unix
    #[arg(long)]
    network: Option<Network>,

    /// Broker address (host:port or socket path)
    #[arg(long)]
    addr: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve jobs, log them and delete them until interrupted
    Work {
        /// Tube to watch (repeatable; defaults to "default")
        #[arg(long = "tube", short)]
        tubes: Vec<String>,

        /// Pause between scans of all tubes, e.g. "250ms"
        #[arg(long, value_parser = humantime::parse_duration)]
        poll_interval: Option<Duration>,

        /// Maximum handlers running at once
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Give up waiting for running handlers after this long
        #[arg(long, value_parser = humantime::parse_duration)]
        drain_timeout: Option<Duration>,
    },

    /// Insert one job
    Put {
        /// Job body
        body: String,

        /// Target tube
        #[arg(long, short, default_value = "default")]
        tube: String,

        /// Priority (lower is more urgent)
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u32,

        /// Delay before the job becomes ready, e.g. "5s"
        #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
        delay: Duration,

        /// Time to run once reserved, e.g. "60s"
        #[arg(long, value_parser = humantime::parse_duration)]
        ttr: Option<Duration>,
    },
}

fn load_config(cli: &Cli) -> Result<Config, Error> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(network) = cli.broker.network {
        config.client.network = network;
    }
    if let Some(addr) = &cli.broker.addr {
        config.client.addr = addr.clone();
    }
    Ok(config)
}

async fn log_and_delete(job: Job) {
    tracing::info!(
        "job_received: tube={}, id={}, bytes={}",
        job.tube(),
        job.id(),
        job.body().len()
    );
    if let Err(e) = job.delete().await {
        tracing::warn!("job_delete_failed: id={}, error={}", job.id(), e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    tubeworker::observability::init_tracing(&config.observability);

    match cli.command {
        Commands::Work {
            tubes,
            poll_interval,
            max_concurrency,
            drain_timeout,
        } => {
            if let Some(interval) = poll_interval {
                config.client.poll_interval = interval;
            }
            if let Some(max) = max_concurrency {
                config.client.max_concurrency = max;
            }
            if drain_timeout.is_some() {
                config.client.drain_timeout = drain_timeout;
            }

            let client = if tubes.is_empty() {
                Client::new(config.client, handler_fn(log_and_delete))?
            } else {
                let mut mux = WorkMux::new();
                for tube in tubes {
                    mux.handle_fn(tube, log_and_delete)?;
                }
                Client::new(config.client, mux)?
            };

            match client.connect_and_work().await {
                Error::Quit => Ok(()),
                e => Err(e.into()),
            }
        }
        Commands::Put {
            body,
            tube,
            priority,
            delay,
            ttr,
        } => {
            let conn = BeanstalkConn::connect_with(&config.client).await?;
            let id = conn
                .put(&tube, body.as_bytes(), priority, delay, ttr.unwrap_or(DEFAULT_TTR))
                .await?;
            println!("{}", id);
            conn.close().await?;
            Ok(())
        }
    }
}
