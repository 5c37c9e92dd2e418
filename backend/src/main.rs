use payroll_devnet::config::DevnetConfig;
use payroll_devnet::errors::{internal, ApiError};
use payroll_devnet::state::AppState;
use payroll_devnet::{api, db};
use tracing_subscriber::filter::{Directive, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    let directive: Directive = "info".parse().map_err(internal)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    let config = DevnetConfig::from_env()?;

    // Local chain state lives under the data dir (ignored by git).
    std::fs::create_dir_all(&config.data_dir).map_err(internal)?;

    let db_path = config.data_dir.join("devnet.sqlite");
    let db_url = format!("sqlite:{}", db_path.to_string_lossy());

    let db = db::connect(&db_url).await?;
    db::init_schema(&db).await?;

    let state = AppState::new(db, &config);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .map_err(internal)?;

    tracing::info!(addr = %config.addr, chain_id = config.chain_id, contract = %config.contract, "devnet listening");

    api::serve(listener, state).await
}
