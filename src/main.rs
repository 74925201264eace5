use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use splitledger::{
    auth::AuthKey,
    config::AppConfig,
    routes,
    store::{EntityStore, MemoryStore, MongoStore},
    Ledger,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn cors(origin: Option<&str>) -> Cors {
    match origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allow_any_method()
            .allow_any_header(),
        None => Cors::permissive(),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn EntityStore> = match &config.mongodb_uri {
        Some(uri) => {
            tracing::info!("Using the following URI: {uri}");
            match MongoStore::connect(uri, &config.database).await {
                Ok(store) => {
                    tracing::info!("Connected");
                    Arc::new(store)
                }
                Err(err) => {
                    tracing::error!("Failed to connect: {err}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            tracing::warn!("MONGODB_URI is not set, expenses will only live in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let key = match AuthKey::new(&config.auth_secret) {
        Ok(key) => web::Data::new(key),
        Err(err) => {
            tracing::error!("Invalid AUTH_SECRET: {err}");
            std::process::exit(1);
        }
    };
    let ledger = web::Data::new(Ledger::new(store));
    let cors_origin = config.cors_origin.clone();

    tracing::info!("Listening on {}:{}", config.bind_address, config.port);
    HttpServer::new(move || {
        App::new()
            .wrap(cors(cors_origin.as_deref()))
            .app_data(ledger.clone())
            .app_data(key.clone())
            .configure(routes::configure)
    })
    .bind((config.bind_address.as_str(), config.port))?
    .run()
    .await
}
