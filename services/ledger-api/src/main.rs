use actix_web::{middleware, web, App, HttpServer};
use anyhow::{anyhow, Context};
use dotenv::dotenv;
use ledger_api::{config::Config, handlers, middleware::TokenAuth};
use ledger_core::{Ledger, Metrics};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    init_tracing(config.logging.json);

    info!(
        host = %config.server.host,
        port = config.server.port,
        database = %config.ledger.database.url,
        "Starting ledger API"
    );

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let ledger = Ledger::open(&config.ledger)
        .await
        .context("Failed to open ledger database")?
        .with_metrics(metrics);

    let auth_token = config.auth.token().map(str::to_string);
    if auth_token.is_none() {
        warn!("No auth token configured, /v1 routes are open");
    }

    let state = web::Data::new(ledger.clone());
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(state.clone())
            .configure(|cfg| handlers::configure_routes(cfg, TokenAuth::new(auth_token.as_deref())))
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    ledger.close().await;
    info!("Ledger API stopped");
    Ok(())
}
