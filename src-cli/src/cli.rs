//! Command-line arguments and command dispatch.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fanindex_core::{Config, IndexService};

use crate::input;

#[derive(Parser, Debug)]
#[command(name = "fanindex")]
#[command(about = "Bulk-build milli indexes in parallel")]
pub struct Args {
    /// Settings file (defaults to ~/.config/fanindex/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the directory holding every index
    #[arg(long, global = true)]
    pub store_root: Option<PathBuf>,

    /// Override the number of partitions built in parallel
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Build documents from a JSON Lines file into an index
    Ingest {
        #[arg(long)]
        index: String,
        /// One document (a JSON array of fields) per line
        #[arg(long)]
        input: PathBuf,
    },
    /// Print the number of documents in an index
    Count {
        #[arg(long)]
        index: String,
    },
    /// Print one document as JSON
    Get {
        #[arg(long)]
        index: String,
        #[arg(long)]
        id: String,
    },
    /// Delete one document
    Delete {
        #[arg(long)]
        index: String,
        #[arg(long)]
        id: String,
    },
    /// Delete every document in an index
    Clear {
        #[arg(long)]
        index: String,
    },
}

impl Args {
    /// Settings file merged with command-line overrides.
    pub fn load_config(&self) -> Result<Config> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(Config::default_settings_file);
        let mut config = Config::load(&path)?;

        if let Some(ref store_root) = self.store_root {
            config.store_root = store_root.clone();
        }
        if let Some(workers) = self.workers {
            config.max_parallel_workers = workers;
        }
        config.validate()?;

        Ok(config)
    }
}

pub async fn execute(config: Config, command: Command) -> Result<()> {
    let service = IndexService::new(config)?;

    match command {
        Command::Ingest { index, input } => {
            let documents = input::read_documents(&input)?;
            tracing::info!(index = %index, documents = documents.len(), "Read input");

            let build = service.write_index(documents, &index);
            tokio::pin!(build);

            let report = tokio::select! {
                report = &mut build => report?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, cancelling build");
                    service.shutdown();
                    build.await?
                }
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Count { index } => {
            println!("{}", service.document_count(&index).await?);
        }
        Command::Get { index, id } => match service.get_document(&index, &id).await? {
            Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
            None => anyhow::bail!("No document {:?} in index {:?}", id, index),
        },
        Command::Delete { index, id } => {
            service.delete_document(&index, &id).await?;
            tracing::info!(index = %index, id = %id, "Deleted document");
        }
        Command::Clear { index } => {
            let removed = service.delete_all(&index).await?;
            println!("{}", removed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ingest_with_global_flags() {
        let args = Args::try_parse_from([
            "fanindex",
            "ingest",
            "--index",
            "books",
            "--input",
            "books.jsonl",
            "--workers",
            "4",
        ])
        .unwrap();

        assert_eq!(args.workers, Some(4));
        assert_eq!(
            args.command,
            Command::Ingest {
                index: "books".to_string(),
                input: PathBuf::from("books.jsonl"),
            }
        );
    }

    #[test]
    fn test_parse_requires_index() {
        assert!(Args::try_parse_from(["fanindex", "count"]).is_err());
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = temp_dir.path().join("settings.json");
        std::fs::write(&settings, r#"{"max_parallel_workers": 3, "build_timeout_secs": 60}"#)
            .unwrap();

        let args = Args {
            config: Some(settings),
            store_root: Some(temp_dir.path().join("indexes")),
            workers: Some(8),
            command: Command::Count {
                index: "books".to_string(),
            },
        };
        let config = args.load_config().unwrap();

        assert_eq!(config.max_parallel_workers, 8);
        assert_eq!(config.store_root, temp_dir.path().join("indexes"));
        assert_eq!(config.build_timeout_secs, Some(60));
    }

    #[test]
    fn test_load_config_rejects_zero_workers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let args = Args {
            config: Some(temp_dir.path().join("missing.json")),
            store_root: None,
            workers: Some(0),
            command: Command::Clear {
                index: "books".to_string(),
            },
        };
        assert!(args.load_config().is_err());
    }

    #[tokio::test]
    async fn test_execute_ingest_then_clear() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = temp_dir.path().join("books.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"[{"name":"doc_id","value":"1"},{"name":"title","value":"Dune","analysis":true}]"#,
                "\n",
                r#"[{"name":"doc_id","value":"2"},{"name":"title","value":"Emma","analysis":true}]"#,
                "\n",
            ),
        )
        .unwrap();
        let config = Config::default().with_store_root(temp_dir.path().join("indexes"));

        execute(
            config.clone(),
            Command::Ingest {
                index: "books".to_string(),
                input,
            },
        )
        .await
        .unwrap();
        execute(
            config.clone(),
            Command::Get {
                index: "books".to_string(),
                id: "2".to_string(),
            },
        )
        .await
        .unwrap();
        execute(
            config,
            Command::Clear {
                index: "books".to_string(),
            },
        )
        .await
        .unwrap();
    }
}
