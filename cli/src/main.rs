//! CLI entrypoint for Conclave
//!
//! This is the main binary that wires together all layers using
//! dependency injection: config loading, provider construction, the
//! runtime binder, and terminal rendering of the live event stream.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use conclave_domain::{error_codes, EventKind, MeetingEvent, OutputFormat};
use conclave_infrastructure::{
    AnthropicAdapter, ConfigLoader, FileConfig, InMemoryStore, JsonlTranscriptLogger, MockProvider,
    OpenAiCompatAdapter, ProviderAdapter, RoutingGateway, Runtime,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "conclave", version, about = "Convene LLM agents, discuss, vote, conclude")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a meeting to a terminal state
    Run {
        /// Path to a meeting config TOML
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Topic override (otherwise taken from the config file)
        #[arg(short, long)]
        topic: Option<String>,

        /// Write the report here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for operation and transcript logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Validate a meeting config without running anything
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, topic, output, log_dir } => run(config, topic, output, log_dir).await,
        Command::Validate { config } => validate(config),
    }
}

/// Resolve the log directory path.
fn resolve_log_dir(override_path: Option<&Path>) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("conclave").join("logs");
    }
    PathBuf::from(".conclave").join("logs")
}

/// Console logging plus a rolling file layer in the log directory.
fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(log_dir, "conclave.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            tracing_subscriber::registry().with(console).with(file).init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(console).init();
            None
        }
    }
}

/// Build the provider set from configured credentials; the mock provider is
/// always present as the fallback target.
fn build_gateway(config: &FileConfig) -> Arc<RoutingGateway> {
    let mut providers: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::new(MockProvider::new())];

    let openai_key = config
        .providers
        .openai_api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    if let Some(key) = openai_key {
        providers.push(Arc::new(OpenAiCompatAdapter::openai(key)));
    }

    let anthropic_key = config
        .providers
        .anthropic_api_key
        .clone()
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok());
    if let Some(key) = anthropic_key {
        providers.push(Arc::new(AnthropicAdapter::new(key)));
    }

    let gemini_key = config
        .providers
        .gemini_api_key
        .clone()
        .or_else(|| std::env::var("GEMINI_API_KEY").ok());
    if let Some(key) = gemini_key {
        providers.push(Arc::new(OpenAiCompatAdapter::gemini(key)));
    }

    Arc::new(RoutingGateway::new(providers))
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    let file_config = ConfigLoader::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    let meeting_config = file_config.to_meeting_config();
    let issues = meeting_config.validate();

    if issues.is_empty() {
        println!("{} configuration is valid", "ok:".green().bold());
        return Ok(());
    }
    for issue in &issues {
        println!("{} {}", "issue:".red().bold(), issue.message);
    }
    bail!("{} configuration issue(s) found", issues.len());
}

async fn run(
    config_path: Option<PathBuf>,
    topic_override: Option<String>,
    output: Option<PathBuf>,
    log_dir: Option<PathBuf>,
) -> Result<()> {
    let log_dir = resolve_log_dir(log_dir.as_deref());
    let _log_guard = init_logging(&log_dir);

    let file_config = ConfigLoader::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("config error: {e}"))?;
    let topic = topic_override
        .or_else(|| file_config.topic.clone())
        .context("no topic: pass --topic or set `topic` in the config file")?;
    let meeting_config = file_config.to_meeting_config();
    let output_format = meeting_config.output.format;

    let store = Arc::new(InMemoryStore::new());
    let gateway = build_gateway(&file_config);
    let mut runtime = Runtime::new(store, gateway);
    let transcript_path = log_dir.join(format!("meeting-{}.jsonl", std::process::id()));
    if let Some(transcript) = JsonlTranscriptLogger::new(&transcript_path) {
        runtime = runtime.with_transcript(Arc::new(transcript));
        info!(path = %transcript_path.display(), "transcript logging enabled");
    }
    let runtime = Runtime::install_global(Arc::new(runtime));

    let meeting = runtime
        .create_meeting(&topic, meeting_config)
        .await
        .map_err(|e| anyhow::anyhow!("could not create meeting: {e}"))?;
    println!("{} {} {}", "meeting".bold(), meeting.id.dimmed(), topic);

    let mut subscription = runtime.subscribe(&meeting.id, None).await?;
    runtime.start_meeting(&meeting.id).await?;

    // Render events until the meeting is terminal; ctrl-c aborts cleanly.
    let meeting_id = meeting.id.clone();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{}", "interrupt received, aborting meeting".yellow());
                runtime.abort_meeting(&meeting_id, "Aborted by user").await?;
                break;
            }
            event = subscription.next() => {
                let Some(event) = event else { break };
                render_event(&event);
                if event.kind() == EventKind::MeetingStateChanged {
                    let state = event.body.payload["state"].as_str().unwrap_or_default();
                    if state.starts_with("finished_") {
                        break;
                    }
                }
            }
        }
    }
    runtime.wait_for_meeting(&meeting.id).await?;

    let finished = runtime.store().get_meeting(&meeting.id).await?;
    let result = finished
        .result
        .context("terminal meeting is missing its result")?;

    match output_format {
        OutputFormat::Markdown => write_output(output.as_deref(), &result.report_markdown, "md")?,
        OutputFormat::Json => write_output(
            output.as_deref(),
            &serde_json::to_string_pretty(&result.summary_json)?,
            "json",
        )?,
        OutputFormat::Both => {
            write_output(output.as_deref(), &result.report_markdown, "md")?;
            let json_path = output
                .as_deref()
                .map(|p| p.with_extension("json"));
            write_output(
                json_path.as_deref(),
                &serde_json::to_string_pretty(&result.summary_json)?,
                "json",
            )?;
        }
    }

    if result.accepted {
        println!("{} {}", "accepted:".green().bold(), result.reason);
        Ok(())
    } else {
        println!("{} {}", "aborted:".red().bold(), result.reason);
        std::process::exit(1);
    }
}

fn write_output(path: Option<&Path>, content: &str, kind: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("writing {kind} report to {}", path.display()))?;
            println!("{} {}", "wrote".bold(), path.display());
        }
        None => println!("\n{content}"),
    }
    Ok(())
}

fn render_event(event: &MeetingEvent) {
    let payload = &event.body.payload;
    match event.kind() {
        EventKind::MeetingStateChanged => {
            println!(
                "{} state={} round={} sv={}",
                "»".cyan().bold(),
                payload["state"].as_str().unwrap_or_default().cyan(),
                payload["round"],
                payload["stage_version"],
            );
        }
        EventKind::MessageFinal => {
            let message = &payload["message"];
            let speaker = message["agent_id"]
                .as_str()
                .or_else(|| message["system_id"].as_str())
                .unwrap_or("user");
            let content = message["content"].as_str().unwrap_or_default();
            let preview: String = content.chars().take(160).collect();
            println!("{} {preview}", format!("[{speaker}]").bold());
        }
        EventKind::FacilitatorOutput => {
            let summary = payload["output"]["round_summary"].as_str().unwrap_or_default();
            println!("{} {summary}", "[facilitator]".magenta().bold());
        }
        EventKind::VoteSessionStarted => {
            println!(
                "{} session={} kind={}",
                "vote open".yellow().bold(),
                payload["vote_session_id"].as_str().unwrap_or_default(),
                payload["kind"].as_str().unwrap_or("proposal"),
            );
        }
        EventKind::VoteReceived => {
            let vote = &payload["vote"];
            println!(
                "{} {} score={} pass={}",
                "vote".yellow(),
                vote["voter_agent_id"].as_str().unwrap_or_default(),
                vote["score"],
                vote["pass"],
            );
        }
        EventKind::VoteSessionFinal => {
            println!(
                "{} accepted={} avg={} ({})",
                "vote closed".yellow().bold(),
                payload["accepted"],
                payload["avg_score"],
                payload["reason"].as_str().unwrap_or_default(),
            );
        }
        EventKind::Error => {
            let code = payload["code"].as_str().unwrap_or_default();
            let line = format!("{}: {}", code, payload["message"].as_str().unwrap_or_default());
            if code == error_codes::DISCUSSION_EMPTY_SKIP_VOTE {
                println!("{}", line.yellow());
            } else {
                eprintln!("{}", line.red());
            }
        }
    }
}
