mod chat;
mod ingest;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Ask questions about your documents.
#[derive(Parser, Debug)]
#[command(name = "docchat")]
#[command(version)]
#[command(about = "Chat with a vector store of your documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive question loop over a vector store
    Chat(chat::ChatArgs),

    /// Split and embed documents into a vector store
    Ingest(ingest::IngestArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init();

    match cli.command {
        Commands::Chat(args) => chat::run(args).await,
        Commands::Ingest(args) => ingest::run(args).await,
    }
}
