mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use embedkit_core::{parse_document_id, Document, SearchOptions, SearchResult};
use embedkit_retrieval::{LocalEmbedding, Retriever};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::settings::{CliConfig, Overrides};

#[derive(Parser)]
#[command(name = "embedkit", version, about = "EmbedKit: on-device hybrid document search")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "embedkit.toml")]
    config: PathBuf,

    /// Store name (overrides config)
    #[arg(short, long, global = true)]
    store: Option<String>,

    /// Root directory holding the stores (overrides config)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Embedding dimension (overrides config)
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add one or more documents
    Add {
        /// Document texts
        #[arg(required = true)]
        texts: Vec<String>,
        /// Explicit ids, one per text
        #[arg(long = "id")]
        ids: Vec<String>,
    },
    /// Search by text
    Search {
        /// Query text
        query: String,
        #[arg(short, long, value_enum, default_value_t = SearchMode::Vector)]
        mode: SearchMode,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
        /// Minimum score (vector and hybrid modes)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Vector weight in [0, 1] (hybrid mode)
        #[arg(short, long)]
        weight: Option<f32>,
    },
    /// Search with a raw query vector
    SearchVector {
        /// Vector components
        #[arg(required = true, allow_negative_numbers = true)]
        vector: Vec<f32>,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
        /// Minimum score
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List all documents
    List,
    /// Delete documents by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Replace the text of a document
    Update { id: String, text: String },
    /// Delete every document in the store
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Print embeddings without storing anything
    Embed {
        #[arg(required = true)]
        texts: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Vector,
    Keyword,
    Hybrid,
}

/// A document without its embedding, for listing.
#[derive(Serialize)]
struct DocumentSummary<'a> {
    id: Uuid,
    text: &'a str,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Document> for DocumentSummary<'a> {
    fn from(document: &'a Document) -> Self {
        Self {
            id: document.id,
            text: &document.text,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Serialize)]
struct Embedding<'a> {
    text: &'a str,
    embedding: &'a [f32],
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_ids(raw: &[String]) -> anyhow::Result<Vec<Uuid>> {
    raw.iter()
        .map(|s| parse_document_id(s).map_err(anyhow::Error::from))
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_results(results: &[SearchResult], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(results);
    }
    if results.is_empty() {
        println!("No results.");
    }
    for result in results {
        println!("{:.4}  {}  {}", result.score, result.id, result.text);
    }
    Ok(())
}

/// Ask on stderr and read the answer from stdin.
async fn confirm(prompt: &str) -> anyhow::Result<bool> {
    eprint!("{prompt} [y/N] ");
    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = CliConfig::load(&cli.config).await?.resolve(Overrides {
        store: cli.store,
        root: cli.root,
        dimension: cli.dimension,
    });
    let dimension = config.dimension.unwrap_or(settings::DEFAULT_DIMENSION);
    let store_name = config.name.clone();
    let embedder = Arc::new(LocalEmbedding::new(dimension));
    let retriever = Retriever::open(config, embedder).await?;

    match cli.command {
        Commands::Add { texts, ids } => {
            let ids = parse_ids(&ids)?;
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let given = (!ids.is_empty()).then_some(ids.as_slice());
            let added = retriever.add_documents(&refs, given).await?;
            info!(store = %store_name, count = added.len(), "Added documents");

            if cli.json {
                print_json(&added)?;
            } else {
                for id in &added {
                    println!("{id}");
                }
            }
        }
        Commands::Search {
            query,
            mode,
            limit,
            threshold,
            weight,
        } => {
            let options = SearchOptions {
                limit,
                threshold,
                weight,
            };
            let results = match mode {
                SearchMode::Vector => retriever.search_text(&query, options).await?,
                SearchMode::Keyword => retriever.search_keyword(&query, limit).await?,
                SearchMode::Hybrid => retriever.search_hybrid(&query, options).await?,
            };
            print_results(&results, cli.json)?;
        }
        Commands::SearchVector {
            vector,
            limit,
            threshold,
        } => {
            let options = SearchOptions {
                limit,
                threshold,
                weight: None,
            };
            let results = retriever.search_vector(&vector, options).await?;
            print_results(&results, cli.json)?;
        }
        Commands::List => {
            let documents = retriever.list_documents().await?;
            let summaries: Vec<DocumentSummary<'_>> =
                documents.iter().map(DocumentSummary::from).collect();
            if cli.json {
                print_json(&summaries)?;
            } else if summaries.is_empty() {
                println!("Store '{store_name}' is empty.");
            } else {
                for summary in &summaries {
                    println!("{}  {}", summary.id, summary.text);
                }
                println!("\nTotal: {} document(s)", summaries.len());
            }
        }
        Commands::Delete { ids } => {
            let ids = parse_ids(&ids)?;
            retriever.delete_documents(&ids).await?;
            if cli.json {
                print_json(&ids)?;
            } else {
                println!("Deleted {} document(s)", ids.len());
            }
        }
        Commands::Update { id, text } => {
            let id = parse_document_id(&id)?;
            let updated = retriever.update_document(id, &text).await?;
            if cli.json {
                print_json(&DocumentSummary::from(&updated))?;
            } else {
                println!("Updated {}", updated.id);
            }
        }
        Commands::Reset { yes } => {
            let count = retriever.count().await?;
            if !yes {
                let prompt = format!(
                    "This permanently deletes {count} document(s) from store '{store_name}'. Continue?"
                );
                if !confirm(&prompt).await? {
                    bail!("reset aborted");
                }
            }
            retriever.reset().await?;
            println!("Store '{store_name}' reset ({count} document(s) removed)");
        }
        Commands::Embed { texts } => {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let vectors = retriever.embed(&refs).await?;
            if cli.json {
                let out: Vec<Embedding<'_>> = refs
                    .iter()
                    .zip(&vectors)
                    .map(|(text, embedding)| Embedding { text, embedding })
                    .collect();
                print_json(&out)?;
            } else {
                for vector in &vectors {
                    println!("{}", serde_json::to_string(vector)?);
                }
            }
        }
    }

    Ok(())
}
