use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::Parser;
use pdf_chat_core::{
    AutoLoader, ChainConfig, ChatError, EmbeddingModel, GeminiClient, GeminiConfig,
    IngestionOptions, ModelSet, ProcessResult, RetryPolicy, Session, TrigramEmbedder,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-chat", version, about = "Ask questions about a single PDF")]
struct Cli {
    /// Document to load (PDF, or plain text / markdown).
    #[arg(long = "pdf", value_name = "FILE")]
    file: PathBuf,

    /// Question to ask; repeat for a scripted conversation. Without any,
    /// questions are read from stdin.
    #[arg(long = "question", short = 'q')]
    questions: Vec<String>,

    /// Print the chunks each answer was grounded on.
    #[arg(long, default_value_t = false)]
    show_sources: bool,

    /// Gemini API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Gemini REST base URL
    #[arg(
        long,
        env = "PDF_CHAT_GEMINI_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta/"
    )]
    gemini_url: String,

    /// Model used for chunk refinement and answering
    #[arg(long, env = "PDF_CHAT_GENERATION_MODEL", default_value = "gemini-2.0-flash")]
    generation_model: String,

    /// Model used for embeddings
    #[arg(long, env = "PDF_CHAT_EMBEDDING_MODEL", default_value = "models/embedding-001")]
    embedding_model: String,

    /// Use the local trigram embedder instead of the embedding API.
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,

    /// Concurrent refinement calls (defaults to available parallelism).
    #[arg(long, env = "PDF_CHAT_REFINE_WORKERS")]
    refine_workers: Option<usize>,

    /// Attempts per chunk before keeping the unrefined text.
    #[arg(long, default_value = "5")]
    refine_attempts: usize,

    /// Attempts per answer generation call.
    #[arg(long, env = "PDF_CHAT_ANSWER_ATTEMPTS", default_value = "1")]
    answer_attempts: usize,

    /// Chunks retrieved per question.
    #[arg(long, default_value = "4")]
    top_k: usize,

    /// Retrieve with the raw follow-up instead of a history-aware rewrite.
    #[arg(long, default_value_t = false)]
    no_condense: bool,

    /// HTTP timeout for model calls, in seconds.
    #[arg(long, default_value = "60")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    let models = build_models(&cli)?;
    let mut options = IngestionOptions {
        refine_retry: RetryPolicy::default().with_max_attempts(cli.refine_attempts),
        ..IngestionOptions::default()
    };
    if let Some(workers) = cli.refine_workers {
        options.refine_workers = workers;
    }
    let chain_config = ChainConfig {
        top_k: cli.top_k,
        condense_question: !cli.no_condense,
        answer_retry: RetryPolicy::default().with_max_attempts(cli.answer_attempts),
    };

    let mut session = Session::new(Arc::new(AutoLoader), models, options, chain_config);

    let file_name = cli
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("not a file path: {}", cli.file.display()))?
        .to_string();
    let bytes = tokio::fs::read(&cli.file)
        .await
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    match session.upload_document(&file_name, &bytes).await? {
        ProcessResult::Processed(report) => {
            println!(
                "processed {file_name}: {} pages, {} chunks of up to {} chars ({} kept unrefined)",
                report.pages, report.chunks, report.chunk_size, report.fallbacks
            );
        }
        ProcessResult::AlreadyProcessed => {}
    }

    if cli.questions.is_empty() {
        interactive(&mut session, cli.show_sources).await?;
    } else {
        for question in &cli.questions {
            println!("> {question}");
            ask(&mut session, question, cli.show_sources).await;
        }
    }

    Ok(())
}

fn build_models(cli: &Cli) -> anyhow::Result<ModelSet> {
    let api_key = cli
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            anyhow!("a Gemini API key is required: pass --api-key or set GOOGLE_API_KEY")
        })?;

    let mut config = GeminiConfig::new(api_key);
    config.base_url = cli.gemini_url.clone();
    config.generation_model = cli.generation_model.clone();
    config.embedding_model = cli.embedding_model.clone();
    config.timeout = Duration::from_secs(cli.timeout_secs);

    let client = GeminiClient::new(&config)?;
    let embedder: Arc<dyn EmbeddingModel> = if cli.offline_embeddings {
        Arc::new(TrigramEmbedder::default())
    } else {
        Arc::new(client.embedder(&config.embedding_model)?)
    };

    Ok(ModelSet {
        refiner: Arc::new(client.generator(&config.generation_model, config.refine_temperature)?),
        answerer: Arc::new(client.generator(&config.generation_model, config.answer_temperature)?),
        embedder,
    })
}

async fn interactive(session: &mut Session, show_sources: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"ask> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() || question.eq_ignore_ascii_case("exit") {
            break;
        }
        ask(session, question, show_sources).await;
    }

    Ok(())
}

/// A failed turn is reported and the conversation carries on.
async fn ask(session: &mut Session, question: &str, show_sources: bool) {
    match session.ask_question(question).await {
        Ok(answer) => {
            println!("{}\n", answer.answer);
            if show_sources {
                for (rank, hit) in answer.sources.iter().enumerate() {
                    let source = hit
                        .chunk
                        .metadata
                        .get("source")
                        .and_then(|value| value.as_str())
                        .unwrap_or("document");
                    let page = hit
                        .chunk
                        .page()
                        .map(|page| (page + 1).to_string())
                        .unwrap_or_else(|| "?".to_string());
                    println!(
                        "[source {}] {source}, page {page}, distance={:.4}",
                        rank + 1,
                        hit.distance
                    );
                    println!("{}\n", hit.chunk.text.trim());
                }
            }
        }
        Err(ChatError::EmptyQuestion) => {}
        Err(error) => {
            warn!(error = %error, "question failed");
            eprintln!("could not answer: {error}");
        }
    }
}
