use claude_openai_bridge::config::config_search_paths;
use claude_openai_bridge::{build_router, AppState, ProxyConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-openai-bridge",
    about = "Serve the Anthropic Messages API on top of an OpenAI Chat Completions backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream base URL, e.g. https://api.openai.com/v1 (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_openai_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.upstream.base_url = base_url;
    }

    info!("claude-openai-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.upstream.base_url);
    info!("  Port:      {}", config.port);
    info!(
        "  Models:    {}",
        if config.models.is_empty() {
            "all".to_string()
        } else {
            config.models.join(", ")
        }
    );
    info!(
        "  Auth:      {}",
        if config.auth.client_keys.is_empty() {
            "forward client key"
        } else {
            "client allow-list"
        }
    );
    if config.upstream.api_key_env.is_some() && config.server_api_key().is_none() {
        tracing::warn!(
            "Upstream key variable '{}' is not set",
            config.upstream.api_key_env.as_deref().unwrap_or_default()
        );
    }

    let port = config.port;
    let state = Arc::new(AppState::new(config)?);

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{} claude", port);

    axum::serve(listener, app).await?;

    Ok(())
}
