use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_bot::chat_flow::{build_request, ChatArgs};
use relay_bot::{build_pipeline, BotContext, HttpChatClient, MessageEvent, RandomDice};
use relay_core::{ModelTransport, TraceId, TurnMeta};
use relay_llm::{ResponsesTransport, TransportConfig};
use relay_settings::RelaySettings;
use relay_telemetry::{init_telemetry, parse_level, TelemetryConfig};

#[derive(Parser)]
#[command(name = "relay", version, about = "Chat bot relay: stage pipeline and streaming model turns")]
struct Cli {
    /// Settings file. Defaults to ~/.relay/settings.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the inbound event server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one model turn and print partial results.
    Chat {
        #[arg(long)]
        text: String,
        /// Use the reasoning model.
        #[arg(long)]
        reasoning: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("failed to load settings")?,
    };
    let _ = init_telemetry(&telemetry_config(&settings));

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.cancel();
        }
    });

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings, cancel).await
        }
        Commands::Chat { text, reasoning } => chat(settings, text, reasoning, cancel).await,
    }
}

fn telemetry_config(settings: &RelaySettings) -> TelemetryConfig {
    let telemetry = &settings.telemetry;
    let mut module_levels = Vec::new();
    for (module, level) in &telemetry.module_levels {
        match parse_level(level) {
            Some(level) => module_levels.push((module.clone(), level)),
            None => eprintln!("ignoring invalid log level {level:?} for {module}"),
        }
    }
    module_levels.sort_by(|a, b| a.0.cmp(&b.0));
    TelemetryConfig {
        log_level: parse_level(&telemetry.log_level).unwrap_or(tracing::Level::INFO),
        module_levels,
        json: telemetry.json,
    }
}

fn transport(settings: &RelaySettings) -> anyhow::Result<Arc<dyn ModelTransport>> {
    let model = &settings.model;
    let api_key = relay_settings::require_api_key(model)?;
    let mut config = TransportConfig::new(&model.base_url, Some(api_key));
    config.connect_timeout = Duration::from_secs(model.connect_timeout_secs);
    config.idle_timeout = Duration::from_secs(model.idle_timeout_secs);
    let transport = ResponsesTransport::new(config).context("failed to build model transport")?;
    Ok(Arc::new(transport))
}

async fn serve(settings: RelaySettings, cancel: CancellationToken) -> anyhow::Result<()> {
    let client = HttpChatClient::new(&settings.chat_gateway).context("failed to build chat gateway client")?;
    let transport = transport(&settings)?;
    let server_config = relay_server::ServerConfig::from_settings(&settings.server, &settings.bot.bot_open_id);
    if settings.bot.bot_open_id.is_empty() {
        warn!("bot.bot_open_id is empty; mentions and own messages cannot be detected");
    }

    let ctx = Arc::new(BotContext::new(settings, Arc::new(client), transport, Arc::new(RandomDice)));
    let pipeline = Arc::new(build_pipeline(ctx));

    let handle = relay_server::start(server_config, pipeline, cancel)
        .await
        .context("failed to start server")?;
    info!(port = handle.port, "relay ready");
    handle.wait().await;
    Ok(())
}

async fn chat(settings: RelaySettings, text: String, reasoning: bool, cancel: CancellationToken) -> anyhow::Result<()> {
    let client = HttpChatClient::new(&settings.chat_gateway).context("failed to build chat gateway client")?;
    let transport = transport(&settings)?;
    let ctx = BotContext::new(settings, Arc::new(client), transport, Arc::new(RandomDice));

    let event = MessageEvent {
        message_id: "cli".into(),
        chat_id: "cli".into(),
        chat_type: "p2p".into(),
        sender_id: "cli".into(),
        message_type: "text".into(),
        text: text.clone(),
        mentions: Vec::new(),
        create_time: chrono::Utc::now().timestamp_millis(),
        content: serde_json::json!({ "text": text }),
        image_urls: Vec::new(),
    };
    let args = ChatArgs {
        reasoning,
        no_context: true,
        input: text,
    };
    let request = build_request(&ctx, &event, &args);
    let meta = TurnMeta::new("cli", "cli", TraceId::new()).with_cancel(cancel);

    let mut stream = ctx.engine.start(request, meta).await.context("failed to start turn")?;
    let mut stdout = std::io::stdout();
    let (mut reasoning_seen, mut content_seen) = (0usize, 0usize);
    while let Some(item) = stream.next().await {
        let partial = item.context("turn failed")?;
        if partial.reasoning.len() > reasoning_seen {
            write!(stdout, "{}", &partial.reasoning[reasoning_seen..])?;
            reasoning_seen = partial.reasoning.len();
        }
        if partial.content.len() > content_seen {
            write!(stdout, "{}", &partial.content[content_seen..])?;
            content_seen = partial.content.len();
        }
        stdout.flush()?;
        if partial.is_final {
            writeln!(stdout)?;
            if let Some(structured) = partial.structured {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&structured)?)?;
            }
        }
    }
    Ok(())
}
