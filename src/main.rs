use clap::Parser;
use gemini_proxy::{build_router, AppState, ProxyConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "gemini-proxy",
    about = "OpenAI-compatible chat completions gateway in front of the Gemini API",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Model used when a request names none (overrides config)
    #[arg(long)]
    default_model: Option<String>,

    /// Placeholder sent when the backend returns no text (overrides config)
    #[arg(long)]
    empty_content_fallback: Option<String>,

    /// Log file path
    #[arg(long, default_value = "gemini-proxy.log")]
    log_file: PathBuf,

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
                .unwrap_or_else(|_| "gemini_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in gemini_proxy::config::config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(model) = cli.default_model {
        config.backend.default_model = model;
    }
    if let Some(fallback) = cli.empty_content_fallback {
        config.response.empty_content_fallback = Some(fallback);
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("gemini-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", config.backend.base_url);
    info!("  Model:     {} (default)", config.backend.default_model);
    info!("  Aliases:   {} mapped", config.models.len());
    info!(
        "  Fallback:  {}",
        config
            .response
            .empty_content_fallback
            .as_deref()
            .unwrap_or("(disabled)")
    );
    info!(
        "  Key:       {}",
        if config.server_api_key().is_some() { "server-side fallback" } else { "client only" }
    );
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting gemini-proxy base_url={} port={}",
            config.backend.base_url, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.backend.timeout_secs))
        .build()?;

    let state = Arc::new(AppState {
        config: config.clone(),
        client,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
