use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use warp::Filter;

use classhub::auth::verifier::JwtTokenVerifier;
use classhub::config::HubConfig;
use classhub::constants::WS_PATH;
use classhub::core::hub::{Collaborators, Hub, SharedHub};
use classhub::handlers::websocket::handle_ws_client;
use classhub::safety::classifier::ScriptedClassifier;
use classhub::services::locale::StaticLocaleLookup;
use classhub::services::translation::IdentityTranslator;

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    // Load config from the environment
    let config = match HubConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}", config.host, config.port);

    // Collaborator wiring: token verification is JWT against the shared
    // issuer secret; classifier/translator/locale run in pass-through mode
    // until the platform services are attached.
    let hub = Hub::new(
        config.hub_options(),
        Collaborators {
            verifier: Arc::new(JwtTokenVerifier::new(&config.jwt_secret)),
            classifier: Arc::new(ScriptedClassifier::new()),
            translator: Arc::new(IdentityTranslator),
            locale: Arc::new(StaticLocaleLookup::default()),
        },
    );
    hub.start_background_sweep();

    // WebSocket route
    let ws_route = warp::path(WS_PATH)
        .and(warp::ws())
        .and(with_hub(hub.clone()))
        .map(|ws: warp::ws::Ws, hub: SharedHub| {
            info!("New websocket connection");
            ws.on_upgrade(move |socket| handle_ws_client(socket, hub))
        });

    // Health check route
    let health_route = warp::path("health").map(|| "OK");

    let routes = ws_route.or(health_route);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting ClassHub server on {}", addr);

    if config.enable_tls {
        // Certificate paths are validated by HubConfig::from_env
        let cert = config.tls_cert_path.clone().unwrap_or_default();
        let key = config.tls_key_path.clone().unwrap_or_default();
        warp::serve(routes)
            .tls()
            .cert_path(cert)
            .key_path(key)
            .run(addr)
            .await;
    } else {
        warp::serve(routes).run(addr).await;
    }
}

// Helper function to include the hub in request handling
fn with_hub(
    hub: SharedHub,
) -> impl Filter<Extract = (SharedHub,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
