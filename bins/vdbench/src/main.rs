//! Vector database benchmark CLI.
//!
//! ## Commands
//!
//! ```bash
//! # Attach payloads and query filters to the GIST vectors
//! vdbench generate --data-dir ./data
//!
//! # Load the reference set into a backend
//! vdbench ingest --provider qdrant --m 16 --ef-construction 100
//!
//! # One load run
//! vdbench query --provider qdrant --k 20 --ef 20 --tasks 5 --queries-per-task 10
//!
//! # The whole query_throughput group
//! vdbench sweep --provider elasticsearch
//!
//! # Recall@k over every result log
//! vdbench evaluate --reports-dir ./reports
//!
//! # Decode a benchmark identifier
//! vdbench id "qdrant/query_throughput/16:100_4.00:8.00-20:20:p:F-5:10"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "vdbench")]
#[command(version, about = "Throughput and recall benchmark for ANN vector databases")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate payloads and query filters for the dataset
    Generate(commands::GenerateArgs),

    /// Create the collection and upsert the reference vectors
    Ingest(commands::IngestArgs),

    /// Run one query configuration under concurrent load
    Query(commands::QueryArgs),

    /// Run every configuration of the query_throughput group
    Sweep(commands::SweepArgs),

    /// Compute Recall@k for every result log under the reports directory
    Evaluate(commands::EvaluateArgs),

    /// Parse a benchmark identifier and print its fields
    Id(commands::IdArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = vdbench_core::telemetry::init_dev_subscriber_with_env_filter() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => commands::generate(args),
        Commands::Ingest(args) => commands::ingest(args).await,
        Commands::Query(args) => commands::query(args).await,
        Commands::Sweep(args) => commands::sweep(args).await,
        Commands::Evaluate(args) => commands::evaluate(args).await,
        Commands::Id(args) => commands::id(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_defaults() {
        let cli = Cli::try_parse_from(["vdbench", "query", "--provider", "vespa"]).unwrap();
        let Commands::Query(args) = cli.command else {
            panic!("expected query");
        };
        assert_eq!(args.provider.provider.as_str(), "vespa");
        assert_eq!(args.k, 20);
        assert_eq!(args.load.tasks, 5);
        assert_eq!(args.load.queries_per_task, 10);
        assert!(!args.filters);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(Cli::try_parse_from(["vdbench", "query", "--provider", "milvus"]).is_err());
    }
}
