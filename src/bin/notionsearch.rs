use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use notionsearch::config::{ChunkArgs, EmbeddingArgs, IndexArgs, LlmArgs, LogArgs, NotionArgs, OpenAiArgs};
use notionsearch::search::{DEFAULT_CHUNKS_PER_PAGE, DEFAULT_MAX_PAGES};
use notionsearch::{
    logging, Indexer, RagAnswer, ResponseGenerator, Retriever, SearchOptions, SearchResult,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "notionsearch",
    about = "Index a Notion database and search it semantically"
)]
struct Cli {
    /// Rebuild the vector index from the Notion database
    #[arg(long, default_value_t = false)]
    index: bool,

    /// Search query
    #[arg(long)]
    search: Option<String>,

    /// Question answered from the indexed pages
    #[arg(long)]
    ask: Option<String>,

    /// Nearest-neighbour candidates fetched per search
    #[arg(long, default_value_t = 5)]
    limit: usize,

    /// Return raw chunk hits instead of grouping them by page
    #[arg(long, default_value_t = false)]
    ungrouped: bool,

    /// Pages kept in grouped mode
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: usize,

    /// Chunks kept per page in grouped mode
    #[arg(long, default_value_t = DEFAULT_CHUNKS_PER_PAGE)]
    chunks_per_page: usize,

    #[command(flatten)]
    openai: OpenAiArgs,

    #[command(flatten)]
    notion: NotionArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    index_args: IndexArgs,

    #[command(flatten)]
    chunk: ChunkArgs,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    if !cli.index && cli.search.is_none() && cli.ask.is_none() {
        Cli::command().print_help()?;
        return Ok(());
    }
    let _log_guard = logging::init(&cli.log)?;

    let retry = cli.embedding.retry_policy();
    let embeddings = cli
        .embedding
        .build_client(&cli.openai)
        .context("failed to configure embeddings")?;
    let index = cli
        .index_args
        .build_index(cli.embedding.embedding_dimensions, retry.clone())
        .context("failed to configure vector index")?;

    if cli.index {
        let source = cli
            .notion
            .build_source(retry.clone())
            .context("failed to configure Notion")?;
        let indexer = Indexer::new(
            Arc::new(source),
            cli.chunk.build_chunker(),
            embeddings.clone(),
            index.clone(),
        );
        info!("indexing Notion content");
        let report = indexer.index_all().context("indexing failed")?;
        println!(
            "Indexed {} chunks from {} pages ({} skipped, {} chunks failed to embed)",
            report.points_written,
            report.pages_seen - report.pages_skipped,
            report.pages_skipped,
            report.chunks_created - report.chunks_embedded
        );
    }

    let retriever = Retriever::new(embeddings, index);

    if let Some(query) = cli.search.as_deref() {
        let options = SearchOptions {
            candidates: cli.limit.max(1),
            group_by_page: !cli.ungrouped,
            max_pages: cli.max_pages.max(1),
            chunks_per_page: cli.chunks_per_page.max(1),
        };
        info!(query, "searching");
        let results = retriever.search(query, &options);
        print_results(query, &results);
    }

    if let Some(question) = cli.ask.as_deref() {
        let llm = cli
            .llm
            .build_llm(&cli.openai)
            .context("failed to configure answer model")?;
        let generator =
            ResponseGenerator::new(retriever, llm, retry).with_options(cli.llm.rag_options());
        let answer = generator.generate(question);
        print_answer(&answer);
        if answer.pages.is_empty() && answer.answer.starts_with("Error generating response") {
            bail!("answer generation failed");
        }
    }
    Ok(())
}

fn print_results(query: &str, results: &[SearchResult]) {
    if results.is_empty() {
        println!("\nNo results found for '{query}'");
        return;
    }
    println!("\nFound {} results for '{query}':", results.len());
    for (i, result) in results.iter().enumerate() {
        println!(
            "\n{}. {} (Chunk {}/{}, Score: {:.4})",
            i + 1,
            result.title,
            result.chunk_idx + 1,
            result.total_chunks,
            result.score
        );
        println!("   {}", result.excerpt.as_deref().unwrap_or(&result.content));
    }
}

fn print_answer(answer: &RagAnswer) {
    println!("--- Answer ---\n{}", answer.answer);
    if answer.pages.is_empty() {
        return;
    }
    println!("\n--- Sources ---");
    for page in &answer.pages {
        println!("{} (Score: {:.4})", page.title, page.score);
        for chunk in &page.chunks {
            if let Some(excerpt) = &chunk.excerpt {
                println!("   [{}] {}", chunk.chunk_idx + 1, excerpt);
            }
        }
    }
}
