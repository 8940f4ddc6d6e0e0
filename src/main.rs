use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use pulsar_relay::auth::jwt::{hash_password, TokenSigner};
use pulsar_relay::auth::models::{Permission, User};
use pulsar_relay::cache::UserCache;
use pulsar_relay::config::{self, Settings, StorageBackend};
use pulsar_relay::handlers;
use pulsar_relay::hub::{LocalHub, PollHub};
use pulsar_relay::relay::Coordinator;
use pulsar_relay::state::AppState;
use pulsar_relay::store::{valkey, UserStore, ValkeyLog, ValkeyTopicStore, ValkeyUserStore};

#[tokio::main]
async fn main() {
    // Load configuration first so log_level can seed the default filter.
    let settings = config::load_settings().expect("Failed to load configuration");

    // Tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("pulsar_relay={},tower_http=info", settings.log_level)
            .parse()
            .expect("invalid default log filter")
    });
    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Pulsar Relay starting...");
    let addr = settings.server_addr();

    let state = build_state(settings).await;

    bootstrap_admin(&state).await;

    // Sweep for waiters orphaned by dropped poll requests.
    let reaper_hub = state.poll_hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            reaper_hub.reap_stale(Duration::from_secs(300)).await;
        }
    });

    let coordinator = state.coordinator.clone();

    let app = handlers::router(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!("Server listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");

    if let Some(coordinator) = coordinator {
        coordinator.stop().await;
    }
    info!("Shutdown complete");
}

/// Compose the application state for the configured storage backend.
async fn build_state(settings: Settings) -> AppState {
    match settings.storage_backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage backend");
            AppState::memory(settings)
        }
        StorageBackend::Valkey => {
            let url = settings.store_url();
            info!(
                "Using store backend at {}",
                valkey::sanitize_store_url(&url)
            );

            let pool = valkey::create_pool(&url).expect("Failed to create store pool");
            valkey::ping(&pool).await.expect("Store health check failed");

            let signer = TokenSigner::new(
                &settings.jwt_secret_key,
                &settings.jwt_algorithm,
                settings.jwt_expiration_minutes,
            );
            let user_cache = UserCache::new(
                Duration::from_secs(settings.user_cache_ttl_seconds),
                settings.user_cache_capacity,
            );
            let local_hub = LocalHub::new();
            let poll_hub = PollHub::new();

            // The relay makes every worker see every publish.
            let coordinator = Arc::new(Coordinator::new(
                pool.clone(),
                url,
                local_hub.clone(),
                poll_hub.clone(),
            ));
            coordinator
                .start()
                .await
                .expect("Failed to start relay coordinator");

            AppState {
                log: Arc::new(ValkeyLog::new(
                    pool.clone(),
                    settings.max_messages_per_topic,
                    settings.persistent_tier_retention,
                )),
                users: Arc::new(ValkeyUserStore::new(pool.clone())),
                topics: Arc::new(ValkeyTopicStore::new(pool)),
                local_hub,
                poll_hub,
                coordinator: Some(coordinator),
                user_cache,
                signer,
                settings: Arc::new(settings),
            }
        }
    }
}

/// Create the configured seed admin, if any. Idempotent across restarts.
async fn bootstrap_admin(state: &AppState) {
    let settings = &state.settings;
    let (Some(username), Some(password)) = (
        settings.bootstrap_admin_username.clone(),
        settings.bootstrap_admin_password.clone(),
    ) else {
        return;
    };

    let hashed_password = match hash_password(password).await {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("Failed to hash bootstrap admin password: {e}");
            return;
        }
    };

    let user = User {
        user_id: Uuid::new_v4(),
        username: username.clone(),
        email: settings.bootstrap_admin_email.clone(),
        hashed_password,
        is_active: true,
        created_at: Utc::now(),
        permissions: [Permission::Admin, Permission::Read, Permission::Write].into(),
        owned_topics: Default::default(),
    };

    use pulsar_relay::store::Claim;
    match state.users.create_user(user).await {
        Ok(Claim::Created(_)) => info!(username, "Bootstrap admin created"),
        Ok(Claim::AlreadyExists) => tracing::debug!(username, "Bootstrap admin already exists"),
        Err(e) => tracing::error!("Failed to create bootstrap admin: {e}"),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
