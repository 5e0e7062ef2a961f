use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use notionsearch::config::{EmbeddingArgs, IndexArgs, LlmArgs, LogArgs, OpenAiArgs};
use notionsearch::search::{DEFAULT_CANDIDATES, DEFAULT_MAX_PAGES};
use notionsearch::{logging, RagAnswer, ResponseGenerator, Retriever, SearchOptions, SearchResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "notionsearch-api",
    about = "HTTP API for semantic search and grounded answers over indexed Notion pages"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "NOTIONSEARCH_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Candidate pool when the client does not pass `limit`.
    #[arg(long, default_value_t = DEFAULT_CANDIDATES)]
    default_limit: usize,

    /// Largest `limit` accepted per request.
    #[arg(long, default_value_t = 100)]
    max_limit: usize,

    #[command(flatten)]
    openai: OpenAiArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    index: IndexArgs,

    #[command(flatten)]
    llm: LlmArgs,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Clone)]
struct AppState {
    retriever: Retriever,
    generator: Option<Arc<ResponseGenerator>>,
    default_limit: usize,
    max_limit: usize,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    group_by_page: Option<bool>,
    #[serde(default)]
    max_pages: Option<usize>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
    meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
struct ResponseMeta {
    candidates: usize,
    group_by_page: bool,
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = ApiCli::parse();
    let _log_guard = logging::init(&cli.log)?;

    // blocking HTTP clients are built before the async runtime starts
    let retry = cli.embedding.retry_policy();
    let embeddings = cli
        .embedding
        .build_client(&cli.openai)
        .context("failed to configure embeddings")?;
    let index = cli
        .index
        .build_index(cli.embedding.embedding_dimensions, retry.clone())
        .context("failed to configure vector index")?;
    let retriever = Retriever::new(embeddings, index);
    let generator = match cli.llm.build_llm(&cli.openai) {
        Ok(llm) => Some(Arc::new(
            ResponseGenerator::new(retriever.clone(), llm, retry).with_options(cli.llm.rag_options()),
        )),
        Err(err) => {
            warn!(error = %err, "answer model not configured; /rag is disabled");
            None
        }
    };
    let state = AppState {
        retriever,
        generator,
        default_limit: cli.default_limit.max(1),
        max_limit: cli.max_limit.max(1),
    };

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(serve(addr, state.clone()));
    drop(runtime);
    drop(state);
    result
}

async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/search/:query", get(search_handler))
        .route("/rag/:query", get(rag_handler))
        .with_state(state);
    info!(%addr, "notionsearch-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn index() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "notionsearch API is running",
        "endpoints": {
            "health": "/health",
            "search": "/search/:query?limit=&group_by_page=&max_pages=",
            "rag": "/rag/:query"
        }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn search_options(state: &AppState, params: &SearchParams) -> SearchOptions {
    SearchOptions {
        candidates: params
            .limit
            .unwrap_or(state.default_limit)
            .clamp(1, state.max_limit),
        group_by_page: params.group_by_page.unwrap_or(true),
        max_pages: params.max_pages.unwrap_or(DEFAULT_MAX_PAGES).max(1),
        ..SearchOptions::default()
    }
}

async fn search_handler(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorBody>)> {
    if query.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "query text must not be empty"));
    }
    let options = search_options(&state, &params);
    let retriever = state.retriever.clone();
    let start = Instant::now();
    let task_query = query.clone();
    let results = tokio::task::spawn_blocking(move || retriever.search(&task_query, &options))
        .await
        .map_err(|err| internal_error(anyhow!("search task join error: {err}")))?;
    Ok(Json(SearchResponse {
        query,
        results,
        meta: ResponseMeta {
            candidates: options.candidates,
            group_by_page: options.group_by_page,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    }))
}

async fn rag_handler(
    State(state): State<AppState>,
    Path(query): Path<String>,
) -> Result<Json<RagAnswer>, (StatusCode, Json<ErrorBody>)> {
    let Some(generator) = state.generator.clone() else {
        return Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "answer model is not configured",
        ));
    };
    if query.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "query text must not be empty"));
    }
    let answer = tokio::task::spawn_blocking(move || generator.generate(&query))
        .await
        .map_err(|err| internal_error(anyhow!("rag task join error: {err}")))?;
    Ok(Json(answer))
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
