//! HTTP API server
//!
//! Minimal HTTP handling over raw tokio sockets. Routes:
//!   GET  /api/health
//!   POST /api/query/execute     (X-Tenant-Id header scopes the request)
//!   GET  /api/query/history     (?limit=&offset=)
//!   GET  /api/query/{id}

use anyhow::Context;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use askdata::catalog::{DatasetCatalog, InMemoryCatalog};
use askdata::config::Settings;
use askdata::db::connection;
use askdata::db::datasets::PgCatalog;
use askdata::db::history::{HistoryRecord, HistoryStore, InMemoryHistoryStore, PgHistoryStore};
use askdata::error::EngineError;
use askdata::llm::LlmClient;
use askdata::pipeline::{QueryEngine, QueryRequest};
use askdata::templates::DefaultTemplate;

const DEFAULT_TENANT: &str = "default";
const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Parser, Debug)]
#[command(name = "askdata-server", about = "Natural-language analytics API server")]
struct Args {
    /// Directory of dataset files for the in-memory catalog (no DATABASE_URL)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Override the bind address from the environment
    #[arg(long)]
    bind: Option<String>,
}

struct AppState {
    engine: QueryEngine,
    history: Arc<dyn HistoryStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = Settings::from_env().context("invalid configuration")?;

    let (catalog, history): (Arc<dyn DatasetCatalog>, Arc<dyn HistoryStore>) =
        match &settings.database_url {
            Some(url) => {
                let pool = connection::connect(url).await.context("database setup failed")?;
                (
                    Arc::new(PgCatalog::new(pool.clone())),
                    Arc::new(PgHistoryStore::new(pool)),
                )
            }
            None => {
                info!(
                    "No DATABASE_URL set, serving datasets from {}",
                    args.data_dir.display()
                );
                (
                    Arc::new(InMemoryCatalog::from_dir(DEFAULT_TENANT, &args.data_dir)?),
                    Arc::new(InMemoryHistoryStore::new()),
                )
            }
        };

    let generator = Arc::new(LlmClient::new(&settings)?);
    let engine = QueryEngine::new(catalog, Arc::new(DefaultTemplate), generator);
    let state = Arc::new(AppState { engine, history });

    let bind_addr = args.bind.unwrap_or_else(|| settings.bind_addr.clone());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("Server listening on {}", bind_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!("Connection from {} failed: {}", addr, e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> std::io::Result<()> {
    use tokio::time::{timeout, Duration};

    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    let read_result = timeout(Duration::from_secs(10), async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);

            if let Ok(text) = std::str::from_utf8(&buffer) {
                if let Some(headers_end) = text.find("\r\n\r\n") {
                    let body_len = extract_content_length(text).unwrap_or(0);
                    if buffer.len() >= headers_end + 4 + body_len {
                        break;
                    }
                }
            }
            // Bound memory on malformed requests.
            if buffer.len() > 1_000_000 {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    })
    .await;

    if read_result.is_err() {
        warn!("Request read timeout");
        return Ok(());
    }

    if buffer.is_empty() {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buffer).into_owned();
    let response = handle_request(&request, &state).await;
    stream.write_all(response.as_bytes()).await
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            return line.split(':').nth(1).and_then(|v| v.trim().parse().ok());
        }
    }
    None
}

async fn handle_request(request: &str, state: &AppState) -> String {
    let request_line = match request.lines().next() {
        Some(line) => line,
        None => return create_response(400, "Bad Request", "{}"),
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }

    let method = parts[0];
    let full_path = parts[1];
    let (path, query_string) = match full_path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (full_path, None),
    };
    let path = {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    };

    let headers = parse_headers(request);
    let tenant_id = headers
        .get("x-tenant-id")
        .map(String::as_str)
        .unwrap_or(DEFAULT_TENANT);

    info!("{} {} (tenant {})", method, path, tenant_id);

    match (method, path) {
        ("GET", "/api/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"askdata-api"}"#)
        }
        ("POST", "/api/query/execute") => {
            let body = extract_body(request);
            handle_query_execute(state, tenant_id, body).await
        }
        ("GET", "/api/query/history") => {
            let (limit, offset) = pagination(query_string);
            handle_history_list(state, tenant_id, limit, offset).await
        }
        ("GET", p) if p.starts_with("/api/query/") => {
            let query_id = p.strip_prefix("/api/query/").unwrap_or("");
            handle_history_fetch(state, tenant_id, query_id).await
        }
        ("OPTIONS", _) => create_response(200, "OK", ""),
        _ => create_response(
            404,
            "Not Found",
            &error_body(format!("Endpoint not found: {} {}", method, path)),
        ),
    }
}

async fn handle_query_execute(state: &AppState, tenant_id: &str, body: &str) -> String {
    if body.is_empty() {
        return create_response(400, "Bad Request", &error_body("JSON body required"));
    }

    let query_request: QueryRequest = match serde_json::from_str(body) {
        Ok(req) => req,
        Err(e) => {
            return create_response(400, "Bad Request", &error_body(format!("Invalid JSON: {}", e)))
        }
    };
    if query_request.query.trim().is_empty() {
        return create_response(400, "Bad Request", &error_body("Field 'query' is required"));
    }

    // A stale context id degrades to a context-free query.
    let context_query = match &query_request.context_query_id {
        Some(id) => match state.history.fetch(tenant_id, id).await {
            Ok(entry) => Some(entry.query_text),
            Err(EngineError::NotFound(_)) => {
                warn!("Context query {} not found, ignoring", id);
                None
            }
            Err(e) => {
                error!("Context lookup failed: {}", e);
                None
            }
        },
        None => None,
    };

    match state
        .engine
        .execute_query(tenant_id, &query_request, context_query.as_deref())
        .await
    {
        Ok(response) => {
            let entry = HistoryRecord::from_response(tenant_id, &response);
            if let Err(e) = state.history.record(&entry).await {
                error!("History write failed for {}: {}", response.query_id, e);
            }
            match serde_json::to_string(&response) {
                Ok(json) => create_response(200, "OK", &json),
                Err(e) => create_response(
                    500,
                    "Internal Server Error",
                    &error_body(format!("Serialization failed: {}", e)),
                ),
            }
        }
        Err(e @ EngineError::Generation(_)) => {
            error!("Code generation failed: {}", e);
            create_response(502, "Bad Gateway", &error_body(e.to_string()))
        }
        Err(EngineError::NotFound(what)) => {
            create_response(404, "Not Found", &error_body(format!("Not found: {}", what)))
        }
        Err(e) => {
            error!("Query failed: {}", e);
            create_response(500, "Internal Server Error", &error_body(e.to_string()))
        }
    }
}

async fn handle_history_list(
    state: &AppState,
    tenant_id: &str,
    limit: i64,
    offset: i64,
) -> String {
    match state.history.list(tenant_id, limit, offset).await {
        Ok((items, total)) => {
            let body = serde_json::json!({
                "items": items,
                "total": total,
                "limit": limit,
                "offset": offset
            });
            match serde_json::to_string(&body) {
                Ok(json) => create_response(200, "OK", &json),
                Err(e) => create_response(
                    500,
                    "Internal Server Error",
                    &error_body(format!("Serialization failed: {}", e)),
                ),
            }
        }
        Err(e) => {
            error!("History list failed: {}", e);
            create_response(500, "Internal Server Error", &error_body(e.to_string()))
        }
    }
}

async fn handle_history_fetch(state: &AppState, tenant_id: &str, query_id: &str) -> String {
    if query_id.is_empty() {
        return create_response(400, "Bad Request", &error_body("Query id is required"));
    }
    match state.history.fetch(tenant_id, query_id).await {
        Ok(entry) => match serde_json::to_string(&entry) {
            Ok(json) => create_response(200, "OK", &json),
            Err(e) => create_response(
                500,
                "Internal Server Error",
                &error_body(format!("Serialization failed: {}", e)),
            ),
        },
        Err(EngineError::NotFound(_)) => create_response(
            404,
            "Not Found",
            &error_body(format!("Query not found: {}", query_id)),
        ),
        Err(e) => {
            error!("History fetch failed: {}", e);
            create_response(500, "Internal Server Error", &error_body(e.to_string()))
        }
    }
}

fn parse_headers(request: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in request.lines().skip(1) {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

fn extract_body(request: &str) -> &str {
    match request.find("\r\n\r\n") {
        Some(pos) => request[pos + 4..].trim(),
        None => "",
    }
}

fn pagination(query_string: Option<&str>) -> (i64, i64) {
    let mut limit = DEFAULT_HISTORY_LIMIT;
    let mut offset = 0;
    if let Some(qs) = query_string {
        for param in qs.split('&') {
            if let Some((key, value)) = param.split_once('=') {
                match key {
                    "limit" => {
                        if let Ok(v) = value.parse::<i64>() {
                            limit = v.clamp(1, 200);
                        }
                    }
                    "offset" => {
                        if let Ok(v) = value.parse::<i64>() {
                            offset = v.max(0);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    (limit, offset)
}

fn error_body(message: impl std::fmt::Display) -> String {
    serde_json::json!({ "error": message.to_string() }).to_string()
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type, X-Tenant-Id\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
