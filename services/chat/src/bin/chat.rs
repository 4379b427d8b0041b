//! services/chat/src/bin/chat.rs

use async_openai::{config::OpenAIConfig, types::audio::SpeechModel, Client};
use chat_lib::{
    adapters::{
        LocalBlobStore, OpenAiChatAdapter, OpenAiSttAdapter, OpenAiTtsAdapter, OpenMeteoAdapter,
        PgAuthAdapter, PgDocumentStore, TheNewsApiAdapter,
    },
    config::Config,
    error::AppError,
    session::{ChatEvent, Services, SessionController},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting chat service...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgDocumentStore::new(db_pool.clone()));
    info!("Running database migrations...");
    store.run_migrations().await?;
    info!("Database migrations complete.");

    let auth = Arc::new(PgAuthAdapter::new(db_pool));

    // --- 3. Initialize Collaborator Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| AppError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let llm = Arc::new(OpenAiChatAdapter::new(
        openai_client.clone(),
        config.chat_model.clone(),
        config.json_model.clone(),
    ));
    let tts = Arc::new(OpenAiTtsAdapter::new(openai_client.clone(), SpeechModel::Tts1));
    let stt = Arc::new(OpenAiSttAdapter::new(
        openai_client,
        config.stt_model.clone(),
    ));

    let http_client = reqwest::Client::new();
    let news_token = config.news_api_token.clone().unwrap_or_else(|| {
        warn!("NEWS_API_TOKEN is not set; news summaries will fail");
        String::new()
    });
    let news = Arc::new(TheNewsApiAdapter::new(http_client.clone(), news_token));
    let weather = Arc::new(OpenMeteoAdapter::new(http_client));
    let blobs = Arc::new(
        LocalBlobStore::new(config.blob_dir.clone(), config.blob_base_url.clone()).await?,
    );

    let services = Arc::new(Services {
        store,
        auth,
        llm,
        tts,
        stt,
        news,
        weather,
        blobs,
        config,
    });

    // --- 4. Run the Session Controller ---
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ChatEvent>();
    tokio::spawn(async move {
        // Until a UI surface is attached, session events land in the log.
        while let Some(event) = events_rx.recv().await {
            debug!(?event, "session event");
        }
    });

    let mut controller = SessionController::new(services, events_tx);
    for agent in chat_lib::agents::all_agents() {
        debug!(id = %agent.id, persona = %agent.username, "persona registered");
    }
    info!("Chat service ready, waiting for sign-in.");
    tokio::select! {
        _ = controller.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }
    controller.teardown().await;
    info!("Chat service stopped.");
    Ok(())
}
