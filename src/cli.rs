use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "placecrawl", about = "Venue website crawler & enrichment pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Claim crawl jobs and run the enrichment pipeline
    Worker {
        /// Number of concurrent worker loops
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Jobs to claim per batch (defaults to WORKER_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// Enqueue background refresh jobs for stale venues
    Scheduler {
        /// Seconds between scheduling cycles (defaults to SCHEDULER_SLEEP_SECONDS)
        #[arg(long)]
        sleep_seconds: Option<u64>,

        /// Venues to consider per cycle (defaults to SCHEDULER_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// Serve the HTTP API
    Serve {
        /// Bind address (defaults to API_BIND)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Show queue depth and table counts
    Status,
    /// Enqueue crawl jobs for specific venues
    Enqueue {
        /// Venue place ids (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        place_ids: Vec<String>,

        /// Job mode: realtime or background
        #[arg(long, default_value = "realtime")]
        mode: String,

        /// Priority 0..10
        #[arg(long, default_value = "5")]
        priority: i32,
    },
}
