//! HTTP API for the profile search pipeline.
//! Minimal HTTP handling over raw tokio TCP, JSON in and out.

use clap::Parser;
use rishta::config::LlmConfig;
use rishta::executor::{ExecutionGateway, PostgresGateway};
use rishta::schema_context::SchemaContextProvider;
use rishta::{PipelineError, QueryPipeline};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "rishta-server")]
#[command(about = "Natural-language matrimonial profile search API")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Postgres connection string (or set DATABASE_URL env var)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let database_url = args
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;

    let config = LlmConfig::from_env()?;
    let provider = config.build_provider();
    info!("Using {} model {}", provider.name(), config.model);

    let gateway: Arc<dyn ExecutionGateway> =
        Arc::new(PostgresGateway::connect(&database_url).await?);
    info!("Connected to Postgres");

    let context = Arc::new(SchemaContextProvider::new(Arc::clone(&provider)));
    let embedded = context.initialize().await;
    if embedded == 0 {
        warn!("No schema embeddings available, retrieval will serve the full schema text");
    } else {
        info!(
            "Embedded schema docs for: {}",
            context.embedded_tables().await.join(", ")
        );
    }

    let pipeline = Arc::new(QueryPipeline::with_context(provider, gateway, context));

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("Listening on port {}", args.port);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            handle_connection(stream, pipeline).await;
        });
    }
}

async fn handle_connection(mut stream: TcpStream, pipeline: Arc<QueryPipeline>) {
    use tokio::time::{timeout, Duration};

    let mut buffer = Vec::new();
    let mut chunk = [0; 8192];

    // Read until the headers are complete and Content-Length bytes of body
    // have arrived. Slow or oversized requests are dropped.
    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Ok(text) = std::str::from_utf8(&buffer) {
                        if let Some(headers_end) = text.find("\r\n\r\n") {
                            match extract_content_length(text) {
                                Some(length) => {
                                    if buffer.len() >= headers_end + 4 + length {
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                    if buffer.len() > 1_000_000 {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from stream: {}", e);
                    return;
                }
            }
        }
    })
    .await;

    if read_result.is_err() {
        warn!("Request read timed out");
        return;
    }
    if buffer.is_empty() {
        return;
    }

    let request = String::from_utf8_lossy(&buffer).into_owned();
    let response = handle_request(&request, &pipeline).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write response: {}", e);
    }
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

/// The JSON payload of a request, if it has one.
fn request_body(request: &str) -> Option<&str> {
    let body_start = request.find("\r\n\r\n")? + 4;
    let body = request[body_start..].trim();
    let json_start = body.find('{')?;
    Some(&body[json_start..])
}

async fn handle_request(request: &str, pipeline: &QueryPipeline) -> String {
    let request_line = match request.lines().next() {
        Some(line) => line,
        None => return create_response(400, "Bad Request", "{}"),
    };
    let mut parts = request_line.split_whitespace();
    let (method, raw_path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method, path),
        _ => return create_response(400, "Bad Request", "{}"),
    };

    // Drop the query string and any trailing slash.
    let mut path = raw_path
        .split('?')
        .next()
        .unwrap_or(raw_path)
        .trim_end_matches('/');
    if path.is_empty() {
        path = "/";
    }

    info!("{} {}", method, path);

    match (method, path) {
        ("OPTIONS", _) => create_response(200, "OK", ""),
        ("GET", "/api/health") => {
            let body = serde_json::json!({
                "status": "ok",
                "service": "rishta-api",
                "provider": pipeline.provider_name(),
            });
            create_response(200, "OK", &render(&body))
        }
        ("GET", "/api/telemetry") => {
            create_response(200, "OK", &render(&pipeline.telemetry_snapshot()))
        }
        ("POST", "/api/query") => {
            #[derive(Deserialize)]
            struct QueryRequest {
                question: Option<String>,
            }

            let json_str = match request_body(request) {
                Some(body) => body,
                None => {
                    return create_response(400, "Bad Request", r#"{"error":"JSON body required"}"#)
                }
            };
            let question = match serde_json::from_str::<QueryRequest>(json_str) {
                Ok(req) => match req.question.filter(|q| !q.trim().is_empty()) {
                    Some(question) => question,
                    None => {
                        return create_response(
                            400,
                            "Bad Request",
                            r#"{"error":"Field 'question' is required and cannot be empty"}"#,
                        )
                    }
                },
                Err(e) => {
                    let body = serde_json::json!({ "error": format!("Invalid JSON: {}", e) });
                    return create_response(400, "Bad Request", &render(&body));
                }
            };

            let response = pipeline.answer(&question).await;
            if response.rate_limited {
                create_response(429, "Too Many Requests", &render(&response))
            } else {
                create_response(200, "OK", &render(&response))
            }
        }
        ("POST", "/api/sql") => {
            #[derive(Deserialize)]
            struct SqlRequest {
                sql: Option<String>,
            }

            let json_str = match request_body(request) {
                Some(body) => body,
                None => {
                    return create_response(400, "Bad Request", r#"{"error":"JSON body required"}"#)
                }
            };
            let sql = match serde_json::from_str::<SqlRequest>(json_str) {
                Ok(req) => match req.sql.filter(|s| !s.trim().is_empty()) {
                    Some(sql) => sql,
                    None => {
                        return create_response(
                            400,
                            "Bad Request",
                            r#"{"error":"Field 'sql' is required and cannot be empty"}"#,
                        )
                    }
                },
                Err(e) => {
                    let body = serde_json::json!({ "error": format!("Invalid JSON: {}", e) });
                    return create_response(400, "Bad Request", &render(&body));
                }
            };

            match pipeline.run_raw(&sql).await {
                Ok(rows) => {
                    let body = serde_json::json!({
                        "success": true,
                        "row_count": rows.len(),
                        "data": rows,
                    });
                    create_response(200, "OK", &render(&body))
                }
                Err(e @ PipelineError::UnsupportedStatement(_)) => {
                    let body = serde_json::json!({ "error": e.to_string() });
                    create_response(400, "Bad Request", &render(&body))
                }
                Err(e) => {
                    error!("Raw SQL execution failed: {}", e);
                    let body = serde_json::json!({ "error": e.to_string() });
                    create_response(500, "Internal Server Error", &render(&body))
                }
            }
        }
        _ => create_response(
            404,
            "Not Found",
            &format!(r#"{{"error":"Endpoint not found: {} {}"}}"#, method, path),
        ),
    }
}

fn render<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| r#"{"error":"Failed to serialize response"}"#.to_string())
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
