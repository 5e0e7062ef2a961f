use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use notionsearch::config::{EmbeddingArgs, IndexArgs, LogArgs, OpenAiArgs};
use notionsearch::search::{DEFAULT_CHUNKS_PER_PAGE, DEFAULT_MAX_PAGES};
use notionsearch::{logging, Retriever, SearchOptions, SearchResult};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "notionsearch-eval",
    about = "Evaluate retrieval quality against a labeled query set"
)]
struct EvalCli {
    /// Path to the evaluation JSONL file.
    #[arg(
        long,
        env = "NOTIONSEARCH_EVAL_DATA",
        default_value = "data/retrieval_eval.jsonl"
    )]
    cases: PathBuf,

    /// Candidates fetched per query.
    #[arg(long, default_value_t = 10)]
    limit: usize,

    /// Score raw chunk hits instead of page-grouped results.
    #[arg(long, default_value_t = false)]
    ungrouped: bool,

    /// Pages kept per query in grouped mode.
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: usize,

    /// Optional JSON report output path.
    #[arg(long, env = "NOTIONSEARCH_EVAL_REPORT")]
    report_json: Option<PathBuf>,

    #[command(flatten)]
    openai: OpenAiArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    index: IndexArgs,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Debug, Clone, Deserialize)]
struct EvalCase {
    query: String,
    #[serde(default)]
    relevant_titles: Vec<String>,
    #[serde(default)]
    relevant_page_ids: Vec<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl EvalCase {
    fn label_count(&self) -> usize {
        self.relevant_titles.len() + self.relevant_page_ids.len()
    }
}

#[derive(Debug, Clone, Serialize)]
struct RetrievedChunkReport {
    title: String,
    page_id: String,
    chunk_idx: usize,
    score: f32,
    text_preview: String,
    rank: usize,
    hit: bool,
}

#[derive(Debug, Serialize)]
struct CaseReport {
    query: String,
    relevant_titles: Vec<String>,
    relevant_page_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recall: Option<f64>,
    best_rank: Option<usize>,
    latency_ms: f64,
    retrieved: Vec<RetrievedChunkReport>,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
    total_cases: usize,
    hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    mean_recall: Option<f64>,
    mean_reciprocal_rank: f64,
    avg_latency_ms: f64,
    limit: usize,
    group_by_page: bool,
}

#[derive(Debug, Serialize)]
struct EvalReport {
    summary: EvalSummary,
    cases: Vec<CaseReport>,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = EvalCli::parse();
    let _log_guard = logging::init(&cli.log)?;
    let cases = load_cases(&cli.cases)?;
    anyhow::ensure!(!cases.is_empty(), "evaluation file contains no cases");

    let retry = cli.embedding.retry_policy();
    let embeddings = cli
        .embedding
        .build_client(&cli.openai)
        .context("failed to configure embeddings")?;
    let index = cli
        .index
        .build_index(cli.embedding.embedding_dimensions, retry)
        .context("failed to configure vector index")?;
    let retriever = Retriever::new(embeddings, index);
    let options = SearchOptions {
        candidates: cli.limit.max(1),
        group_by_page: !cli.ungrouped,
        max_pages: cli.max_pages.max(1),
        chunks_per_page: DEFAULT_CHUNKS_PER_PAGE,
    };

    let report = run_evaluation(&retriever, &options, cases)?;
    render_summary(&report.summary);
    if let Some(path) = cli.report_json {
        write_report(&report, &path)?;
        println!("wrote JSON report to {:?}", path);
    }
    Ok(())
}

fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut cases = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read evaluation line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let case: EvalCase = serde_json::from_str(&line)
            .with_context(|| format!("invalid evaluation record at line {}", idx + 1))?;
        cases.push(case);
    }
    Ok(cases)
}

fn run_evaluation(
    retriever: &Retriever,
    options: &SearchOptions,
    cases: Vec<EvalCase>,
) -> Result<EvalReport> {
    let total_cases = cases.len();
    let mut results = Vec::with_capacity(total_cases);
    for (idx, case) in cases.into_iter().enumerate() {
        let start = Instant::now();
        let retrieved = retriever
            .try_search(&case.query, options)
            .with_context(|| format!("search failed for {:?}", case.query))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        results.push(CaseReport {
            latency_ms,
            ..build_case_report(case, &retrieved)
        });
        render_eval_progress(idx + 1, total_cases);
    }
    if total_cases > 0 {
        println!();
    }
    Ok(EvalReport {
        summary: summarize(&results, options),
        cases: results,
    })
}

fn summarize(results: &[CaseReport], options: &SearchOptions) -> EvalSummary {
    let total_cases = results.len();
    let mean = |sum: f64| {
        if total_cases == 0 {
            0.0
        } else {
            sum / total_cases as f64
        }
    };
    let hits = results.iter().filter(|r| r.best_rank.is_some()).count();
    let reciprocal_rank_sum: f64 = results
        .iter()
        .filter_map(|r| r.best_rank)
        .map(|rank| 1.0 / rank as f64)
        .sum();
    let recalls: Vec<f64> = results.iter().filter_map(|r| r.recall).collect();
    EvalSummary {
        total_cases,
        hit_rate: mean(hits as f64),
        mean_recall: (!recalls.is_empty())
            .then(|| recalls.iter().sum::<f64>() / recalls.len() as f64),
        mean_reciprocal_rank: mean(reciprocal_rank_sum),
        avg_latency_ms: mean(results.iter().map(|r| r.latency_ms).sum()),
        limit: options.candidates,
        group_by_page: options.group_by_page,
    }
}

fn build_case_report(case: EvalCase, results: &[SearchResult]) -> CaseReport {
    let titles: HashSet<String> = case
        .relevant_titles
        .iter()
        .map(|title| title.trim().to_lowercase())
        .collect();
    let page_ids: HashSet<&str> = case.relevant_page_ids.iter().map(String::as_str).collect();

    let mut matched = HashSet::new();
    let mut best_rank = None;
    let mut retrieved = Vec::with_capacity(results.len());
    for (idx, result) in results.iter().enumerate() {
        let rank = idx + 1;
        let title_key = result.title.trim().to_lowercase();
        let id_hit = page_ids.contains(result.page_id.as_str());
        let title_hit = titles.contains(&title_key);
        let hit = id_hit || title_hit;
        if hit && best_rank.is_none() {
            best_rank = Some(rank);
        }
        if id_hit {
            matched.insert(format!("id:{}", result.page_id));
        }
        if title_hit {
            matched.insert(format!("title:{title_key}"));
        }
        retrieved.push(RetrievedChunkReport {
            title: result.title.clone(),
            page_id: result.page_id.clone(),
            chunk_idx: result.chunk_idx,
            score: result.score,
            text_preview: snippet(&result.content),
            rank,
            hit,
        });
    }
    let labels = case.label_count();
    let recall = (labels > 0).then(|| matched.len() as f64 / labels as f64);

    CaseReport {
        query: case.query,
        relevant_titles: case.relevant_titles,
        relevant_page_ids: case.relevant_page_ids,
        notes: case.notes,
        recall,
        best_rank,
        retrieved,
        latency_ms: 0.0, // filled by caller
    }
}

fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 200;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let mut snippet = text.chars().take(MAX_CHARS).collect::<String>();
    snippet.push('…');
    snippet
}

fn render_summary(summary: &EvalSummary) {
    println!("--- Retrieval Evaluation Summary ---");
    println!("cases: {}", summary.total_cases);
    println!("limit: {}", summary.limit);
    println!("grouped by page: {}", summary.group_by_page);
    println!("hit rate: {:.3}", summary.hit_rate);
    if let Some(recall) = summary.mean_recall {
        println!("mean recall: {:.3}", recall);
    } else {
        println!("mean recall: n/a");
    }
    println!("mean reciprocal rank: {:.3}", summary.mean_reciprocal_rank);
    println!("avg search latency (ms): {:.2}", summary.avg_latency_ms);
}

fn write_report(report: &EvalReport, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, report).context("failed to write JSON report")?;
    Ok(())
}

fn render_eval_progress(done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let pct = (done as f64 / total as f64) * 100.0;
    print!("\rEvaluating {done}/{total} ({pct:.1}%)");
    let _ = io::stdout().flush();
}
