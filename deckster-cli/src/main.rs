//! deckster-cli: command-line frontend for the Deckster HTTP API.
//!
//! # Subcommands
//! - `upload <session> <file>`            upload a reference file into a session
//! - `files <session>`                    list a session's files
//! - `generate <session> <prompt>`        generate slide content
//! - `overview <session> <topic>`        themes and data points in a session's files
//! - `detailed <session> <query>`        cited content chunks for a query
//! - `stats`                              show generation ledger counters
//! - `status`                             show server health

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Debug, Parser)]
#[command(name = "deckster-cli", version, about = "Deckster grounded slide generation CLI")]
struct Cli {
    /// Deckster HTTP server URL (overrides DECKSTER_HTTP_URL env var)
    #[arg(long, env = "DECKSTER_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a reference file into a session's knowledge store
    Upload {
        session_id: String,
        file: String,

        #[arg(long)]
        user_id: Option<String>,

        /// Override the media type guessed from the extension
        #[arg(long)]
        media_type: Option<String>,
    },

    /// List the files uploaded to a session
    Files { session_id: String },

    /// Generate slide content, grounded in the session's files when it has any
    Generate {
        session_id: String,
        prompt: String,

        #[arg(long, default_value = "content")]
        slide_type: String,

        /// Extra context as a JSON object, e.g. '{"audience": "board"}'
        #[arg(long)]
        context: Option<String>,

        #[arg(long)]
        user_id: Option<String>,
    },

    /// Summarise the themes, data points and layout of a session's files
    Overview {
        session_id: String,
        topic: String,

        #[arg(long, default_value_t = 5)]
        max_themes: u32,

        #[arg(long)]
        context: Option<String>,
    },

    /// Retrieve cited content chunks from a session's files
    Detailed {
        session_id: String,
        query: String,

        #[arg(long, default_value_t = 10)]
        max_chunks: u32,

        #[arg(long, default_value_t = 0.7)]
        min_confidence: f64,

        #[arg(long)]
        context: Option<String>,
    },

    /// Show generation ledger counters
    Stats,

    /// Show server status
    Status,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
    error_code: String,
}

#[derive(Debug, Deserialize)]
struct FileSummary {
    file_id: String,
    name: String,
    size_bytes: u64,
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CitationSummary {
    file_name: String,
    excerpt: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GenerationSummary {
    method: String,
    #[serde(default)]
    fallback_reason: Option<String>,
    content: serde_json::Value,
    #[serde(default)]
    citations: Vec<CitationSummary>,
    attempts: u32,
    latency_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ThemeSummary {
    theme_name: String,
    relevance_score: f64,
    #[serde(default)]
    key_points: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OverviewSummary {
    themes: Vec<ThemeSummary>,
    relevance_summary: String,
    total_files_analyzed: usize,
    #[serde(default)]
    citations: Vec<CitationSummary>,
}

#[derive(Debug, Deserialize)]
struct ChunkSummary {
    content: String,
    source_file: String,
    #[serde(default)]
    page_reference: Option<String>,
    confidence_score: f64,
}

#[derive(Debug, Deserialize)]
struct DetailedSummary {
    content_chunks: Vec<ChunkSummary>,
    synthesized_content: String,
    total_chunks_found: usize,
    chunks_returned: usize,
}

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Read a JSON body, turning the server's error envelope into an error.
fn read_body(resp: reqwest::blocking::Response) -> anyhow::Result<serde_json::Value> {
    let status = resp.status();
    let body: serde_json::Value = resp.json().context("response was not JSON")?;
    if status.is_success() {
        return Ok(body);
    }
    match serde_json::from_value::<ApiError>(body.clone()) {
        Ok(e) => anyhow::bail!("{} ({}): {}", e.error_code, status.as_u16(), e.error),
        Err(_) => anyhow::bail!("server returned {}: {}", status, body),
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `--context`; it must be a JSON object.
fn parse_context(raw: Option<&str>) -> anyhow::Result<serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(serde_json::json!({}));
    };
    let value: serde_json::Value = serde_json::from_str(raw).context("--context is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--context must be a JSON object");
    }
    Ok(value)
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

fn format_file(f: &FileSummary) -> String {
    let mut line = format!("{}  {:<8} {:>10}  {}", f.file_id, f.status, format_size(f.size_bytes), f.name);
    if let Some(reason) = &f.failure_reason {
        line.push_str(&format!("  ({})", reason));
    }
    line
}

fn format_chunk(index: usize, c: &ChunkSummary) -> String {
    let location = match &c.page_reference {
        Some(page) => format!("{} p.{}", c.source_file, page),
        None => c.source_file.clone(),
    };
    format!("[{}] {} ({:.0}%): {}", index + 1, location, c.confidence_score * 100.0, c.content)
}

fn format_citation(index: usize, c: &CitationSummary) -> String {
    let excerpt: String = c.excerpt.chars().take(120).collect();
    match c.confidence {
        Some(conf) => format!("[{}] {} ({:.0}%): {}", index + 1, c.file_name, conf * 100.0, excerpt),
        None => format!("[{}] {}: {}", index + 1, c.file_name, excerpt),
    }
}

fn do_upload(
    server: &str,
    json: bool,
    session_id: &str,
    file: &str,
    user_id: Option<String>,
    media_type: Option<String>,
) -> anyhow::Result<()> {
    let path = Path::new(file);
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", file))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let mut part = reqwest::blocking::multipart::Part::bytes(bytes).file_name(file_name);
    if let Some(mt) = media_type {
        part = part.mime_str(&mt)?;
    }
    let mut form = reqwest::blocking::multipart::Form::new()
        .text("session_id", session_id.to_string())
        .part("file", part);
    if let Some(user) = user_id {
        form = form.text("user_id", user);
    }

    // Indexing is synchronous server-side and can take a while.
    let resp = client(300)?
        .post(format!("{}/files/upload", server))
        .multipart(form)
        .send()
        .with_context(|| format!("connection failed to {}", server))?;
    let body = read_body(resp)?;

    if json {
        return print_json(&body);
    }
    let file: FileSummary = serde_json::from_value(body)?;
    println!("{}", format_file(&file));
    Ok(())
}

fn do_files(server: &str, json: bool, session_id: &str) -> anyhow::Result<()> {
    let resp = client(30)?
        .get(format!("{}/sessions/{}/files", server, session_id))
        .send()
        .with_context(|| format!("connection failed to {}", server))?;
    let body = read_body(resp)?;

    if json {
        return print_json(&body);
    }
    let files: Vec<FileSummary> = serde_json::from_value(body["files"].clone())?;
    if files.is_empty() {
        eprintln!("No files in session {}", session_id);
        return Ok(());
    }
    for f in &files {
        println!("{}", format_file(f));
    }
    Ok(())
}

fn do_generate(
    server: &str,
    json: bool,
    session_id: &str,
    prompt: &str,
    slide_type: &str,
    context: Option<&str>,
    user_id: Option<String>,
) -> anyhow::Result<()> {
    let body = serde_json::json!({
        "session_id": session_id,
        "prompt": prompt,
        "slide_type": slide_type,
        "context": parse_context(context)?,
        "user_id": user_id,
    });
    let resp = client(300)?
        .post(format!("{}/content/generate", server))
        .json(&body)
        .send()
        .with_context(|| format!("connection failed to {}", server))?;
    let body = read_body(resp)?;

    if json {
        return print_json(&body);
    }
    let result: GenerationSummary = serde_json::from_value(body)?;
    match &result.fallback_reason {
        Some(reason) => println!("Method:   {} ({})", result.method, reason),
        None => println!("Method:   {}", result.method),
    }
    println!("Attempts: {}  Latency: {} ms\n", result.attempts, result.latency_ms);
    println!("{}", serde_json::to_string_pretty(&result.content)?);
    if !result.citations.is_empty() {
        println!("\nCitations:");
        for (i, c) in result.citations.iter().enumerate() {
            println!("  {}", format_citation(i, c));
        }
    }
    Ok(())
}

fn post_json(server: &str, route: &str, body: &serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let resp = client(300)?
        .post(format!("{}{}", server, route))
        .json(body)
        .send()
        .with_context(|| format!("connection failed to {}", server))?;
    read_body(resp)
}

fn do_overview(
    server: &str,
    json: bool,
    session_id: &str,
    topic: &str,
    max_themes: u32,
    context: Option<&str>,
) -> anyhow::Result<()> {
    let body = post_json(
        server,
        "/rag/file/overview",
        &serde_json::json!({
            "session_id": session_id,
            "topic": topic,
            "max_themes": max_themes,
            "context": parse_context(context)?,
        }),
    )?;
    if json {
        return print_json(&body);
    }
    let overview: OverviewSummary = serde_json::from_value(body)?;
    println!("Files analyzed: {}
", overview.total_files_analyzed);
    for theme in &overview.themes {
        println!("{} ({:.2})", theme.theme_name, theme.relevance_score);
        for point in &theme.key_points {
            println!("  - {}", point);
        }
    }
    if !overview.relevance_summary.is_empty() {
        println!("
{}", overview.relevance_summary);
    }
    if !overview.citations.is_empty() {
        println!("
Citations:");
        for (i, c) in overview.citations.iter().enumerate() {
            println!("  {}", format_citation(i, c));
        }
    }
    Ok(())
}

fn do_detailed(
    server: &str,
    json: bool,
    session_id: &str,
    query: &str,
    max_chunks: u32,
    min_confidence: f64,
    context: Option<&str>,
) -> anyhow::Result<()> {
    let body = post_json(
        server,
        "/rag/file/detailed",
        &serde_json::json!({
            "session_id": session_id,
            "query": query,
            "max_chunks": max_chunks,
            "min_confidence": min_confidence,
            "context": parse_context(context)?,
        }),
    )?;
    if json {
        return print_json(&body);
    }
    let detailed: DetailedSummary = serde_json::from_value(body)?;
    println!("{}
", detailed.synthesized_content);
    println!("Chunks: {} of {} found", detailed.chunks_returned, detailed.total_chunks_found);
    for (i, c) in detailed.content_chunks.iter().enumerate() {
        println!("  {}", format_chunk(i, c));
    }
    Ok(())
}

fn do_stats(server: &str, json: bool) -> anyhow::Result<()> {
    let resp = client(10)?
        .get(format!("{}/ledger/stats", server))
        .send()
        .with_context(|| format!("connection failed to {}", server))?;
    let body = read_body(resp)?;
    if json {
        return print_json(&body);
    }
    println!("Total:          {}", body["total"]);
    println!("Grounded:       {}", body["grounded"]);
    println!("Fallback:       {}", body["fallback"]);
    println!("Failed:         {}", body["failed"]);
    println!("Grounded ratio: {:.2}", body["grounded_ratio"].as_f64().unwrap_or(0.0));
    println!("Avg citations:  {:.2}", body["avg_citations"].as_f64().unwrap_or(0.0));
    Ok(())
}

fn do_status(server: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?
        .get(&url)
        .send()
        .with_context(|| format!("cannot reach {}", url))?;
    if !resp.status().is_success() {
        anyhow::bail!("server unhealthy (HTTP {})", resp.status());
    }
    let body: serde_json::Value = resp.json().unwrap_or_default();
    if json {
        return print_json(&body);
    }
    println!("Deckster server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Storage:         {}", body["storage"].as_str().unwrap_or("?"));
    println!("Provider:        {}", body["provider"].as_str().unwrap_or("?"));
    println!("Model:           {}", body["model"].as_str().unwrap_or("?"));
    println!("Socket:          {}", body["socket"].as_str().unwrap_or("?"));
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let json = cli.json;

    let result = match cli.command {
        Commands::Upload { session_id, file, user_id, media_type } => {
            do_upload(&server, json, &session_id, &file, user_id, media_type)
        }
        Commands::Files { session_id } => do_files(&server, json, &session_id),
        Commands::Generate { session_id, prompt, slide_type, context, user_id } => {
            do_generate(&server, json, &session_id, &prompt, &slide_type, context.as_deref(), user_id)
        }
        Commands::Overview { session_id, topic, max_themes, context } => {
            do_overview(&server, json, &session_id, &topic, max_themes, context.as_deref())
        }
        Commands::Detailed { session_id, query, max_chunks, min_confidence, context } => do_detailed(
            &server,
            json,
            &session_id,
            &query,
            max_chunks,
            min_confidence,
            context.as_deref(),
        ),
        Commands::Stats => do_stats(&server, json),
        Commands::Status => do_status(&server, json),
    };

    if let Err(e) = result {
        eprintln!("deckster-cli: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(status: &str, reason: Option<&str>) -> FileSummary {
        FileSummary {
            file_id: "7b5c24ab-1234-5678-9abc-def012345678".to_string(),
            name: "q3.pdf".to_string(),
            size_bytes: 2 * 1024 * 1024,
            status: status.to_string(),
            failure_reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn test_context_defaults_to_empty_object() {
        assert_eq!(parse_context(None).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_context_must_be_object() {
        assert!(parse_context(Some("[1, 2]")).is_err());
        assert!(parse_context(Some("not json")).is_err());
        let ctx = parse_context(Some(r#"{"audience": "board"}"#)).unwrap();
        assert_eq!(ctx["audience"], "board");
    }

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(20 * 1024 * 1024), "20.0 MiB");
    }

    #[test]
    fn test_format_file_includes_failure_reason() {
        let line = format_file(&file("failed", Some("indexing timed out")));
        assert!(line.contains("failed"));
        assert!(line.contains("2.0 MiB"));
        assert!(line.ends_with("(indexing timed out)"));

        assert!(!format_file(&file("indexed", None)).contains('('));
    }

    #[test]
    fn test_format_citation_truncates_excerpt() {
        let c = CitationSummary {
            file_name: "q3.pdf".to_string(),
            excerpt: "x".repeat(500),
            confidence: Some(0.91),
        };
        let line = format_citation(0, &c);
        assert!(line.starts_with("[1] q3.pdf (91%): "));
        assert_eq!(line.matches('x').count(), 120);
    }

    #[test]
    fn test_generation_summary_parses_server_result() {
        let body = serde_json::json!({
            "request_id": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            "session_id": "s1",
            "method": "fallback",
            "fallback_reason": "no_indexed_files",
            "content": {"title": "Q3"},
            "citations": [],
            "citation_schema": 1,
            "grounding": {"used_files": false, "file_count": 0},
            "model_used": "gemini-2.5-flash",
            "attempts": 1,
            "latency_ms": 12,
            "generated_at": "2026-10-01T10:00:00Z"
        });
        let summary: GenerationSummary = serde_json::from_value(body).unwrap();
        assert_eq!(summary.method, "fallback");
        assert_eq!(summary.fallback_reason.as_deref(), Some("no_indexed_files"));
        assert_eq!(summary.content["title"], "Q3");
    }

    #[test]
    fn test_format_chunk_shows_page() {
        let c = ChunkSummary {
            content: "Revenue up 15%".to_string(),
            source_file: "q3.pdf".to_string(),
            page_reference: Some("3".to_string()),
            confidence_score: 0.9,
        };
        assert_eq!(format_chunk(0, &c), "[1] q3.pdf p.3 (90%): Revenue up 15%");
    }

    #[test]
    fn test_overview_summary_parses_server_result() {
        let body = serde_json::json!({
            "session_id": "s1",
            "topic": "Q3",
            "themes": [{"theme_name": "Growth", "description": "", "relevance_score": 0.9,
                        "source_files": [], "key_points": ["Revenue up 15%"]}],
            "data_points": [],
            "document_structures": [],
            "relevance_summary": "Relevant",
            "citations": [],
            "total_files_analyzed": 1,
            "model_used": "gemini-2.5-flash",
            "attempts": 1,
            "latency_ms": 40,
            "generated_at": "2026-10-01T10:00:00Z"
        });
        let overview: OverviewSummary = serde_json::from_value(body).unwrap();
        assert_eq!(overview.themes[0].key_points[0], "Revenue up 15%");
        assert_eq!(overview.total_files_analyzed, 1);
    }

    #[test]
    fn test_api_error_envelope_parses() {
        let e: ApiError = serde_json::from_value(serde_json::json!({
            "status": "error",
            "error": "session s1 already has 5 files",
            "error_code": "MAX_FILES_EXCEEDED"
        }))
        .unwrap();
        assert_eq!(e.error_code, "MAX_FILES_EXCEEDED");
    }
}
