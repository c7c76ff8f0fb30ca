//! Zentinel body filter CLI entry point.
//!
//! Runs a response body through the filter, the way it would be rewritten on
//! its way back to a client, and writes the result to stdout.

use anyhow::{bail, Context, Result};
use clap::Parser;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_body_filter::writer::IoResponseWriter;
use zentinel_body_filter::{BodyFilter, FilterConfig, RequestContext, RequestInfo, StaticHandler};

#[derive(Parser, Debug)]
#[command(name = "zentinel-body-filter")]
#[command(
    author,
    version,
    about = "Response body rewriting filter for Zentinel"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "BODY_FILTER_CONFIG")]
    config: Option<PathBuf>,

    /// Response body to filter (reads stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Request target the response answers (path and optional query)
    #[arg(long, default_value = "/")]
    path: String,

    /// Request method
    #[arg(long, default_value = "GET")]
    method: String,

    /// Content-Type of the response
    #[arg(long, default_value = "text/plain")]
    content_type: String,

    /// Status code of the response
    #[arg(long, default_value_t = 200)]
    status: u16,

    /// Write the body in chunks of this many bytes (0 = one write)
    #[arg(long, default_value_t = 8192)]
    chunk_size: usize,

    /// Template variable as KEY=VALUE (repeatable)
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Print filter counters as JSON on stderr when done
    #[arg(long)]
    stats: bool,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

fn print_example_config() {
    let example = r#"# Body Filter Configuration Example

# Regex the response Content-Type must match for the body to be rewritten
content_type: "^text/(html|plain)"

# Regex located within the response body
search_pattern: "http://(internal\\.example\\.com)(/[^\"]*)?"

# Replacement template:
#   {0}, {1}, ...     capture groups of the match
#   {request.path}    request variables (request.method, request.query,
#                     request.header.<name>, request.query_param.<name>,
#                     correlation_id, now)
# Unresolved placeholders are kept as written.
replacement: "https://{1}{2}"

# Maximum body size to buffer for rewriting (bytes); larger responses
# are streamed through unmodified
max_size: 2097152  # 2MB

# Regex the request path must match for the filter to engage
path: ".*"
"#;
    println!("{}", example);
}

fn load_config(path: &Path) -> Result<FilterConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = if path
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml")
    {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stdout carries the body, logs go to stderr)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let Some(config_path) = &args.config else {
        bail!("a configuration file is required (--config)");
    };
    let config = load_config(config_path)?;
    let body_filter = BodyFilter::new(&config).context("Invalid filter configuration")?;

    if args.validate {
        info!(config = %config_path.display(), "Configuration is valid");
        return Ok(());
    }

    let mut body = Vec::new();
    match &args.input {
        Some(path) => {
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input: {}", path.display()))?
                .read_to_end(&mut body)
                .await?;
        }
        None => {
            tokio::io::stdin().read_to_end(&mut body).await?;
        }
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&args.content_type).context("Invalid content type")?,
    );
    let status = StatusCode::from_u16(args.status).context("Invalid status code")?;
    let handler = StaticHandler::new(body)
        .with_status(status)
        .with_headers(headers)
        .with_chunk_size(args.chunk_size);

    let request = RequestInfo::new(args.method.as_str(), &args.path);
    let ctx = args.vars.iter().fold(
        RequestContext::new(request.clone(), "cli"),
        |ctx, (k, v)| ctx.with_variable(k.as_str(), v.as_str()),
    );

    let mut writer = IoResponseWriter::new(tokio::io::stdout());
    let outcome = body_filter
        .handle(&mut writer, &request, &ctx, &handler)
        .await
        .context("Failed to filter response")?;

    info!(
        path = %request.path,
        outcome = ?outcome,
        status = writer.status().as_u16(),
        bytes = writer.bytes_written(),
        "Response filtered"
    );
    writer.finish().await.context("Failed to flush output")?;

    if args.stats {
        eprintln!("{}", serde_json::to_string(&body_filter.stats())?);
    }

    Ok(())
}
