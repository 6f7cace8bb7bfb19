use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use docqa::answer::{self, AnswerEngine};
use docqa::config::Settings;
use docqa::embedding::{self, Embedder};
use docqa::error::QaError;
use docqa::generation;
use docqa::ingest::{self, IngestionWorkflow};
use docqa::logging;
use docqa::models::{QueryResult, SourceDocument};
use docqa::session::Session;

#[derive(Parser, Debug)]
#[command(version, about = "Ask questions about your own documents", long_about = None)]
struct Args {
    /// Path to a TOML configuration file (defaults to ./docqa.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add PDF, TXT or DOCX files to the knowledge base
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Rebuild the knowledge base from every file in the source directory
    Rebuild,
    /// Ask a single question
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Ask questions interactively
    Chat,
    /// List the documents in the knowledge base
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let settings = Settings::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Commands::List = args.command {
        return list(&settings);
    }

    let embedder = match embedding::from_settings(&settings) {
        Ok(embedder) => embedder,
        Err(err) => match startup_failure(&args.command, &err) {
            Some(message) => {
                println!("\n{}\n", message);
                return Ok(());
            }
            None => return Err(err.into()),
        },
    };
    let workflow = IngestionWorkflow::new(&settings, embedder.clone());

    match args.command {
        Commands::Rebuild => {
            let chunks = workflow.ingest_all().await?;
            println!("Knowledge base rebuilt: {} chunks indexed.", chunks);
        }
        Commands::Upload { files } => {
            bootstrap(&workflow).await;
            upload(&workflow, files).await;
        }
        Commands::Ask { question } => {
            bootstrap(&workflow).await;
            let engine = answer_engine(&settings, embedder);
            let result = engine.ask(&question.join(" "), workflow.index_dir()).await;
            print_result(&result);
        }
        Commands::Chat => {
            bootstrap(&workflow).await;
            let engine = answer_engine(&settings, embedder);
            chat(&engine, &workflow).await?;
        }
        Commands::List => {}
    }

    Ok(())
}

/// Questions always get a reply, even when the embedding model fails to load.
fn startup_failure(command: &Commands, err: &QaError) -> Option<String> {
    match command {
        Commands::Ask { .. } | Commands::Chat => Some(answer::failure_message(err)),
        _ => None,
    }
}

fn answer_engine(settings: &Settings, embedder: Arc<dyn Embedder>) -> AnswerEngine {
    AnswerEngine::new(embedder, generation::from_settings(settings)).with_top_k(settings.top_k)
}

async fn bootstrap(workflow: &IngestionWorkflow) {
    match workflow.ensure_knowledge_base().await {
        Ok(true) => println!("Knowledge base creation complete!"),
        Ok(false) => {}
        Err(e) => warn!("Could not create the knowledge base: {}", e),
    }
}

async fn upload(workflow: &IngestionWorkflow, files: Vec<PathBuf>) {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        match std::fs::read(&path) {
            Ok(bytes) => uploads.push(SourceDocument::new(path.to_string_lossy(), bytes)),
            Err(e) => eprintln!("Error reading '{}': {}", path.display(), e),
        }
    }

    let report = workflow.ingest_uploads(uploads).await;
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!("'{}' vectorization complete ({} chunks).", outcome.filename, outcome.chunks),
            Some(e) => eprintln!("Error processing file '{}': {}", outcome.filename, e),
        }
    }

    if report.succeeded() > 0 {
        println!("{} new files successfully uploaded and vectorized.", report.succeeded());
    } else {
        println!("File upload complete, but no files were successfully processed.");
    }
}

fn list(settings: &Settings) -> Result<()> {
    let documents = ingest::list_documents(&settings.source_dir)?;
    if documents.is_empty() {
        println!("There are currently no documents in the knowledge base.");
    }
    for name in documents {
        println!("- {}", name);
    }
    Ok(())
}

async fn chat(engine: &AnswerEngine, workflow: &IngestionWorkflow) -> Result<()> {
    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Enter your question (type 'exit' to quit).");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }

        session.set_input(line);
        session.submit_query();
        let Some(question) = session.take_pending() else {
            continue;
        };

        let result = engine.ask(&question, workflow.index_dir()).await;
        print_result(&result);
        session.record(question, result);
    }

    println!("Answered {} questions.", session.history().len());
    Ok(())
}

fn print_result(result: &QueryResult) {
    println!("\n{}\n", result.answer);
    let sources = result.source_names();
    if sources.is_empty() {
        return;
    }
    println!("Reference sources:");
    for name in sources {
        println!("- {}", name);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa::error::ProviderError;

    #[test]
    fn test_embedder_load_failure_answers_questions() {
        let err = QaError::Provider(ProviderError::Generic("model download failed".into()));
        let ask = Commands::Ask {
            question: vec!["warranty?".to_string()],
        };

        let message = startup_failure(&ask, &err);
        assert_eq!(message.as_deref(), Some("[Provider error] model download failed"));

        let offline = QaError::Provider(ProviderError::Connectivity("dns".into()));
        assert_eq!(
            startup_failure(&Commands::Chat, &offline),
            Some(answer::failure_message(&offline))
        );
    }

    #[test]
    fn test_embedder_load_failure_aborts_ingestion() {
        let err = QaError::Provider(ProviderError::Generic("model download failed".into()));
        assert!(startup_failure(&Commands::Rebuild, &err).is_none());
        assert!(startup_failure(&Commands::Upload { files: Vec::new() }, &err).is_none());
    }
}
