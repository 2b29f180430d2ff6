use actix_web::{web, App, HttpServer};
use log::{info, warn};
use std::sync::Arc;

use chess_clock_review::analysis::{Analyzer, UciAnalyzer};
use chess_clock_review::config::AppConfig;
use chess_clock_review::models::AppState;
use chess_clock_review::routes::configure_routes;
use chess_clock_review::storage::JsonFileStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env();
    let analyzer = UciAnalyzer::from_config(&config);
    let probe = analyzer.probe();
    match (&probe.path, &probe.identity) {
        (Some(path), Some(identity)) => info!("Analyzer {} at {}", identity, path.display()),
        _ => warn!(
            "No analyzer available: {}",
            probe.error.as_deref().unwrap_or("unknown error")
        ),
    }

    let store = JsonFileStore::new(config.store_path.clone());
    info!("Persisting sessions to {}", store.path().display());

    let bind_addr = config.bind_addr.clone();
    let app_state = web::Data::new(AppState::new(config, Arc::new(analyzer), Arc::new(store)));

    info!("Starting chess server at http://{}", bind_addr);
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}
