use std::path::PathBuf;
use std::sync::Arc;

use airelay_core::{
    client::{ClientWriter, IoClient},
    config::{Config, ModelGate},
    error::ErrorEnvelope,
    http_client::{HttpClient, RequestCtx},
    relay::{Relay, RelayOptions},
    telemetry::{set_telemetry_sink, LogSink},
    transcode::RelayMode,
    upstream::UpstreamResponse,
    usage::ApproxTokenCounter,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "airelay CLI: relay an upstream completion response", long_about = None)]
struct Cli {
    /// JSON or TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RelayArgs {
    #[arg(long, default_value = "gpt-3.5-turbo")]
    model: String,
    #[arg(long, default_value = "chat_completions")]
    mode: RelayMode,
    /// Overrides relay.fixed_content from the config
    #[arg(long)]
    trailer: Option<String>,
    #[arg(long, default_value_t = 0)]
    prompt_tokens: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay a captured upstream body from a file
    Replay {
        #[arg(short, long)]
        file: PathBuf,
        /// Treat the file as an event stream
        #[arg(long)]
        stream: bool,
        #[arg(long, default_value_t = 200)]
        status: u16,
        #[command(flatten)]
        relay: RelayArgs,
    },
    /// POST a request body upstream and relay the live response
    Forward {
        #[arg(long)]
        url: String,
        /// JSON request body; its `model` and `stream` fields drive the relay
        #[arg(long)]
        body: PathBuf,
        /// Environment variable holding the bearer token
        #[arg(long, default_value = "OPENAI_API_KEY")]
        api_key_env: String,
        #[command(flatten)]
        relay: RelayArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    set_telemetry_sink(Arc::new(LogSink));

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    let gate = ModelGate::new(&cfg.relay).context("compiling text_capture_models")?;

    let (resp, opts) = match cli.command {
        Commands::Replay {
            file,
            stream,
            status,
            relay,
        } => {
            let body = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let status = StatusCode::from_u16(status).context("invalid --status")?;
            let mut headers = HeaderMap::new();
            let content_type = if stream { "text/event-stream" } else { "application/json" };
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            let opts = options(&cfg, &gate, &relay, stream);
            (UpstreamResponse::from_bytes(status, headers, body), opts)
        }
        Commands::Forward {
            url,
            body,
            api_key_env,
            relay,
        } => {
            let raw = tokio::fs::read(&body)
                .await
                .with_context(|| format!("reading {}", body.display()))?;
            let request: serde_json::Value =
                serde_json::from_slice(&raw).context("request body is not JSON")?;
            let stream = request.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
            let model = request
                .get("model")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| relay.model.clone());
            let relay = RelayArgs { model, ..relay };

            let bearer = std::env::var(&api_key_env)
                .map(|k| format!("Bearer {k}"))
                .with_context(|| format!("{api_key_env} is not set"))?;
            let client = HttpClient::from_cfg(&cfg.http)?;
            let resp = client
                .post_upstream(&url, &request, &[("Authorization", bearer.as_str())], &RequestCtx::default())
                .await?;
            (resp, options(&cfg, &gate, &relay, stream))
        }
    };

    let relay = Relay::new(Arc::new(ApproxTokenCounter));
    let mut out = IoClient::new(tokio::io::stdout());
    match relay.relay(resp, &opts, &mut out).await {
        Ok(outcome) => {
            let usage = outcome.usage();
            eprintln!(
                "[usage: prompt={} completion={} total={}]",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            );
        }
        // Past the head the status is fixed; report out of band.
        Err(err) if out.head_written() => eprintln!("[error: {err}]"),
        Err(err) => write_error(&mut out, &err).await?,
    }
    Ok(())
}

fn options(cfg: &Config, gate: &ModelGate, args: &RelayArgs, stream: bool) -> RelayOptions {
    let mut opts = cfg
        .request_options(gate, args.mode, &args.model, stream)
        .prompt_tokens(args.prompt_tokens);
    if let Some(trailer) = &args.trailer {
        opts = opts.fixed_content(trailer.clone());
    }
    opts
}

async fn write_error(out: &mut dyn ClientWriter, err: &ErrorEnvelope) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&err.to_body())?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    out.write_head(err.status, &headers).await?;
    out.write_body(&body).await?;
    Ok(())
}
