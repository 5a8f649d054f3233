use crate::server::{ServerState, SessionSettings, UploadStore};
use postboard_common::{model::auth::SigningKeyError, util::PositiveDuration};
use postboard_db::client::{DbClient, DbError};
use serde::Deserialize;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

const INSECURE_SECRET_KEY: &str = "mysecretkey123";

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error setting up database: {0}")]
    Database(#[from] DbError),
    #[error("Error deriving cookie signing key: {0}")]
    SigningKey(#[from] SigningKeyError),
    #[error("Error creating upload directory: {0}")]
    UploadDir(std::io::Error),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn default_server_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_server_port() -> u16 {
    10000
}

fn default_database_url() -> String {
    "sqlite://database.db".to_owned()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("static/uploads")
}

fn default_session_ttl_seconds() -> i64 {
    7 * 24 * 60 * 60
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    #[serde(default = "default_server_address")]
    server_address: IpAddr,
    #[serde(default = "default_server_port")]
    server_port: u16,
    #[serde(default = "default_database_url")]
    database_url: String,
    secret_key: Option<String>,
    #[serde(default = "default_upload_dir")]
    upload_dir: PathBuf,
    /// Zero or less keeps sessions alive until logout.
    #[serde(default = "default_session_ttl_seconds")]
    session_ttl_seconds: i64,
    #[serde(default = "default_max_upload_bytes")]
    max_upload_bytes: usize,
}

impl Env {
    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ttl: PositiveDuration::from_seconds(self.session_ttl_seconds),
        }
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "postboard_api=debug,\
                postboard_db=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Listening for ctrl-c failed, shutting down");
        return;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let secret_key = env.secret_key.as_deref().unwrap_or_else(|| {
        warn!("SECRET_KEY is not set, falling back to an insecure default key");
        INSECURE_SECRET_KEY
    });

    let db_client = DbClient::connect(&env.database_url).await?;
    db_client.migrate().await?;

    let uploads = UploadStore::create(&env.upload_dir)
        .await
        .map_err(InitError::UploadDir)?;

    let state = ServerState::new(db_client, secret_key, uploads, env.session_settings())?;

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::app(state, env.max_upload_bytes).layer(tracing_layer);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
