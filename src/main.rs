use anyhow::Result;
use clap::{Parser, Subcommand};
use ragpool::commands::{
    delete, drop_collection, health, ingest, load_config, query, show_stats, update,
};
use ragpool::config::show_config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragpool")]
#[command(about = "Chunk, embed and retrieve documents from pooled vector collections")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector database
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Ingest a text file into a collection
    Ingest {
        /// Path of the document to ingest
        file: PathBuf,
        /// Document ID; a UUID is generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Target collection; a new kb_ collection is created when omitted
        #[arg(long)]
        collection: Option<String>,
    },
    /// Replace a stored document with new contents
    Update {
        /// Path of the new document contents
        file: PathBuf,
        /// Document ID to replace
        #[arg(long)]
        id: String,
        #[arg(long)]
        collection: String,
    },
    /// Delete every chunk of a document
    Delete {
        /// Document ID to delete
        id: String,
        #[arg(long)]
        collection: String,
    },
    /// Drop a whole collection
    Drop {
        collection: String,
    },
    /// Query a collection for the closest chunks
    Query {
        collection: String,
        /// Query text
        text: String,
        /// Number of results to return
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },
    /// Show pool and cache statistics
    Stats {
        /// Collections to report entity counts for
        collections: Vec<String>,
    },
    /// Check the embedding provider and vector store
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                println!("{}", show_config(&config)?);
            } else {
                config.save()?;
                println!("Configuration written to {}", config.config_file_path().display());
            }
        }
        Commands::Ingest {
            file,
            id,
            collection,
        } => {
            ingest(&config, &file, id.as_deref(), collection.as_deref()).await?;
        }
        Commands::Update {
            file,
            id,
            collection,
        } => {
            update(&config, &file, &id, &collection).await?;
        }
        Commands::Delete { id, collection } => {
            delete(&config, &id, &collection).await?;
        }
        Commands::Drop { collection } => {
            drop_collection(&config, &collection).await?;
        }
        Commands::Query {
            collection,
            text,
            top_k,
        } => {
            query(&config, &collection, &text, top_k).await?;
        }
        Commands::Stats { collections } => {
            show_stats(&config, &collections).await?;
        }
        Commands::Health => {
            health(&config).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn ingest_with_defaults() {
        let cli = Cli::try_parse_from(["ragpool", "ingest", "notes.txt"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest {
                file,
                id,
                collection,
            } = parsed.command
            {
                assert_eq!(file, PathBuf::from("notes.txt"));
                assert_eq!(id, None);
                assert_eq!(collection, None);
            }
        }
    }

    #[test]
    fn ingest_with_id_and_collection() {
        let cli = Cli::try_parse_from([
            "ragpool",
            "ingest",
            "notes.txt",
            "--id",
            "doc1",
            "--collection",
            "c1",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ingest { id, collection, .. } = parsed.command {
                assert_eq!(id, Some("doc1".to_string()));
                assert_eq!(collection, Some("c1".to_string()));
            }
        }
    }

    #[test]
    fn update_requires_id_and_collection() {
        let cli = Cli::try_parse_from(["ragpool", "update", "notes.txt"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn query_with_top_k() {
        let cli = Cli::try_parse_from(["ragpool", "query", "c1", "lazy dog", "-k", "3"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Query {
                collection,
                text,
                top_k,
            } = parsed.command
            {
                assert_eq!(collection, "c1");
                assert_eq!(text, "lazy dog");
                assert_eq!(top_k, Some(3));
            }
        }
    }

    #[test]
    fn global_config_dir() {
        let cli = Cli::try_parse_from(["ragpool", "health", "--config-dir", "/tmp/rp"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/rp")));
            assert!(matches!(parsed.command, Commands::Health));
        }
    }

    #[test]
    fn stats_with_collections() {
        let cli = Cli::try_parse_from(["ragpool", "stats", "c1", "c2"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Stats { collections } = parsed.command {
                assert_eq!(collections, vec!["c1", "c2"]);
            }
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["ragpool", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragpool", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragpool", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
