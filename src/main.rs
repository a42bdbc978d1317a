//! Command-line interface for kafka-protobuf-sr
//!
//! # Usage Examples
//!
//! ```bash
//! # Produce the example user to TOPIC_NAME, configured from .env
//! kafka-protobuf-sr produce
//!
//! # Consume from two topics starting at the beginning
//! kafka-protobuf-sr consume --topics users,users-archive --group-id demo \
//!   --auto-offset-reset earliest
//!
//! # Try the serializer offline against an in-process registry
//! kafka-protobuf-sr produce --schema-registry-url mock://local \
//!   --security-protocol PLAINTEXT --bootstrap-servers localhost:9092 --topic users
//! ```

use clap::{Parser, Subcommand};
use kafka_protobuf_sr::consumer::{run_consume, ConsumeArgs};
use kafka_protobuf_sr::load_dotenv;
use kafka_protobuf_sr::producer::{run_produce, ProduceArgs};

#[derive(Parser)]
#[command(name = "kafka-protobuf-sr")]
#[command(about = "Produce and consume schema-registry framed Protobuf messages")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serialize the example User record and produce it once
    Produce(ProduceArgs),
    /// Consume and print records until SIGINT/SIGTERM
    Consume(ConsumeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // .env must be loaded before clap reads the environment
    load_dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Produce(args) => run_produce(args).await,
        Commands::Consume(args) => run_consume(args).await,
    }
}
