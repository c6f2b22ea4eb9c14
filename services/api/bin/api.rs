//! Main Entrypoint for the StockVoice API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Starting the in-process inventory tool server and the agent.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use rmcp::ServiceExt;
use std::{fs, net::SocketAddr, path::Path, sync::Arc};
use stockvoice_api::{
    config::Config,
    router::create_router,
    state::AppState,
    ws::{SessionRegistry, SessionSettings, provider::deepgram::DeepgramConnector},
};
use stockvoice_core::{
    agent::{McpToolExecutor, ToolCallingAgent},
    llm_client::OpenAICompatibleClient,
    prompt::DEFAULT_SYSTEM_PROMPT,
    tools::{InventoryApi, InventoryService},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
    registry.shutdown_all().await;
}

/// Loads `system_prompt.md` from the prompts directory, if one is configured.
fn load_system_prompt(prompts_path: Option<&Path>) -> anyhow::Result<String> {
    let Some(dir) = prompts_path else {
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    };
    let path = dir.join("system_prompt.md");
    if !path.is_file() {
        info!(path = %path.display(), "No prompt override found, using the built-in prompt.");
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    }
    fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize the Tool Server and Agent ---
    let inventory_service = InventoryService::new(InventoryApi::new(&config.inventory_api_base));
    let (server_transport, client_transport) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        match inventory_service.serve(server_transport).await {
            Ok(service) => {
                let _ = service.waiting().await;
            }
            Err(e) => error!(error = ?e, "Inventory tool server failed to start"),
        }
    });
    let mcp_client = ()
        .serve(client_transport)
        .await
        .context("Failed to connect to the inventory tool server")?;

    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let llm_client = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));
    let system_prompt = load_system_prompt(config.prompts_path.as_deref())?;
    let dispatcher = Arc::new(ToolCallingAgent::new(
        llm_client,
        Arc::new(McpToolExecutor::new(mcp_client)),
        system_prompt,
    ));

    let registry = Arc::new(SessionRegistry::new());
    let app_state = Arc::new(AppState {
        settings: SessionSettings::from(&config),
        registry: registry.clone(),
        dispatcher,
        stt: Arc::new(DeepgramConnector::new(&config)),
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.chat_model,
        stt_model = %config.deepgram_model,
        inventory_api = %config.inventory_api_base,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(registry))
    .await?;

    info!("Server has shut down.");
    Ok(())
}
