//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, MemoryStore, OpenAiOcrAdapter, OpenAiTutorAdapter},
    config::{Config, MAX_AUDIO_BYTES, MAX_UPLOAD_BYTES},
    error::ApiError,
    files::FileVault,
    web::{
        self, auth_check_handler, bookmarks, chat, chats, health_handler, history, state::AppState,
        uploads, voice,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tutor_core::ports::ChatStore;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to the Store ---
    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL not set - running with in-memory storage, nothing will persist");
            Arc::new(MemoryStore::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let tutor_adapter = Arc::new(OpenAiTutorAdapter::new(
        openai_client.clone(),
        config.tutor_model.clone(),
    ));
    let ocr_adapter = Arc::new(OpenAiOcrAdapter::new(
        openai_client.clone(),
        config.ocr_model.clone(),
    ));

    let vault = FileVault::new(config.uploads_dir.clone());
    vault.ensure_root().await?;

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        store,
        tutor: tutor_adapter,
        ocr: ocr_adapter,
        vault,
        config: config.clone(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // --- 5. Create the Web Router ---
    let api_routes = Router::new()
        .route("/chat", post(chat::chat_handler))
        .route("/chat/edit-regenerate", post(chat::edit_regenerate_handler))
        .route("/chapters", get(chat::list_chapters_handler))
        .route("/chapters/{chapter_name}", post(chat::set_active_chapter_handler))
        .route(
            "/chats",
            get(chats::list_chats_handler).post(chats::create_chat_handler),
        )
        .route(
            "/chats/{chat_id}",
            get(chats::get_chat_handler).delete(chats::delete_chat_handler),
        )
        .route("/chats/{chat_id}/rename", put(chats::rename_chat_handler))
        .route("/chats/{chat_id}/share", post(chats::share_chat_handler))
        .route(
            "/bookmarks",
            get(bookmarks::list_bookmarks_handler).post(bookmarks::create_bookmark_handler),
        )
        .route("/bookmarks/search", get(bookmarks::search_bookmarks_handler))
        .route("/bookmarks/clear", post(bookmarks::clear_bookmarks_handler))
        .route(
            "/bookmarks/{bookmark_id}",
            delete(bookmarks::delete_bookmark_handler),
        )
        .route(
            "/bookmarks/message/{message_id}",
            put(bookmarks::toggle_message_bookmark_handler),
        )
        .route("/upload", post(uploads::upload_handler))
        .route("/uploads", get(uploads::list_uploads_handler))
        .route("/uploads/{upload_id}", delete(uploads::delete_upload_handler))
        .route("/files/{upload_id}", get(uploads::serve_file_handler))
        .route("/history", get(history::list_history_handler))
        .route("/history/export", get(history::export_history_handler))
        .route("/history/clear", post(history::clear_history_handler))
        .route(
            "/history/clear-chat/{chat_id}",
            post(history::clear_chat_handler),
        )
        .route(
            "/history/entries",
            get(history::list_entries_handler).post(history::save_entry_handler),
        )
        .route(
            "/history/entries/clear",
            post(history::clear_entries_handler),
        )
        .route(
            "/voice",
            post(voice::transcribe_handler).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .route("/voice/status", get(voice::status_handler))
        .route("/auth/check", get(auth_check_handler));

    let api_router = Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new().merge(api_router).merge(
        SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", web::ApiDoc::openapi()),
    );

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
