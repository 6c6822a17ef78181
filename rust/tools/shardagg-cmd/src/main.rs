use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod utils;

#[derive(Parser)]
#[command(name = "shardagg-cmd")]
#[command(about = "Command-line utility for adjacency matrix aggregations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an adjacency matrix aggregation over ndjson shard files
    Matrix {
        /// Filter definition `name=field:value` (term) or `name=field` (exists);
        /// can be specified multiple times
        #[arg(short, long, required = true)]
        filter: Vec<String>,

        /// Shard file in ndjson format (can be specified multiple times)
        #[arg(short, long, required = true)]
        shard: Vec<String>,

        /// Numeric field to sum inside every bucket
        #[arg(long)]
        sum: Option<String>,

        /// Separator between the two filter names of a pair bucket key
        #[arg(long)]
        separator: Option<String>,

        /// Number of shard results folded by one reduction step
        #[arg(long)]
        batch_reduce_size: Option<usize>,

        /// Maximum number of buckets the reduction may materialize
        #[arg(long)]
        max_buckets: Option<u64>,

        /// Abort the request after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Omit buckets that no document matched from the printed result
        #[arg(long)]
        skip_empty: bool,

        /// Write the reduced result in wire format to this file
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Decode a wire-format result file and print it as JSON
    Inspect {
        /// Omit buckets that no document matched
        #[arg(long)]
        skip_empty: bool,

        /// Path of the wire-format file
        path: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Matrix {
            filter,
            shard,
            sum,
            separator,
            batch_reduce_size,
            max_buckets,
            timeout_secs,
            skip_empty,
            output,
        } => commands::matrix::run(commands::matrix::MatrixArgs {
            filters: filter,
            shards: shard,
            sum,
            separator,
            batch_reduce_size,
            max_buckets,
            timeout_secs,
            skip_empty,
            output,
        }),
        Commands::Inspect { skip_empty, path } => commands::inspect::run(&path, skip_empty),
    }
}
