use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::{Logger, NormalizePath};
use actix_web::{web, App, HttpServer};
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use taskmesh::auth::password::DEFAULT_COST;
use taskmesh::auth::{
    ForwardedIdentityMiddleware, HttpKeySource, IdentityForwarder, KeyProvider, TokenIssuer,
    TokenVerifier,
};
use taskmesh::config::{Config, ServiceRole};
use taskmesh::error::ConfigError;
use taskmesh::events::EventBus;
use taskmesh::gateway::{self, GatewayState, RateLimit, RealtimeBridge, Upstream};
use taskmesh::realtime::RealtimeServer;
use taskmesh::routes::{self, health::health};
use taskmesh::store::{InMemoryTaskStore, TaskRepository, UserStore};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(fatal)?;
    info!(
        "Starting {} service at {}",
        config.role.as_str(),
        config.server_url()
    );

    match config.role {
        ServiceRole::Identity => run_identity(config).await,
        ServiceRole::Gateway => run_gateway(config).await,
        ServiceRole::Tasks => run_tasks(config).await,
    }
}

fn fatal(e: impl std::fmt::Display) -> io::Error {
    error!("Invalid configuration: {}", e);
    io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
}

fn cors(origins: &[String]) -> Cors {
    let cors = if origins.iter().any(|origin| origin == "*") {
        Cors::default().allow_any_origin()
    } else {
        origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };
    cors.allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

async fn run_identity(config: Config) -> io::Result<()> {
    let private_pem = config
        .jwt_private_key
        .as_deref()
        .ok_or(ConfigError::Missing("JWT_PRIVATE_KEY"))
        .map_err(fatal)?;
    let public_pem = config
        .jwt_public_key
        .as_deref()
        .ok_or(ConfigError::Missing("JWT_PUBLIC_KEY"))
        .map_err(fatal)?;
    let issuer = TokenIssuer::from_pem(private_pem, public_pem, config.jwt_algorithm)
        .map_err(fatal)?;
    let users = UserStore::with_default_admin(DEFAULT_COST)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    let issuer = web::Data::new(issuer);
    let users = web::Data::new(users);
    let origins = config.cors_origins.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .app_data(web::Data::new(ServiceRole::Identity))
            .app_data(issuer.clone())
            .app_data(users.clone())
            .service(health)
            .service(web::scope("/api").configure(routes::identity_config))
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await
}

async fn run_tasks(config: Config) -> io::Result<()> {
    let forwarder = IdentityForwarder::from_secret(config.forwarding_secret.as_deref());
    if !forwarder.is_signed() {
        warn!(
            "FORWARDING_SECRET is not set: forwarded identity headers are trusted as-is, \
             so this service must only be reachable through the gateway"
        );
    }

    let bus = Arc::new(EventBus::new(config.subscriber_buffer));
    let store: Arc<dyn TaskRepository> = if config.seed_demo_tasks {
        info!("Seeding demo tasks");
        Arc::new(InMemoryTaskStore::with_demo_tasks())
    } else {
        Arc::new(InMemoryTaskStore::new())
    };
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(config.ws_addr()).await?;
    let realtime = Arc::new(RealtimeServer::new(
        Arc::clone(&bus),
        forwarder.clone(),
        shutdown.clone(),
    ));
    let realtime_task = tokio::spawn(realtime.serve(listener));

    let bus_data = web::Data::from(Arc::clone(&bus));
    let store_data: web::Data<dyn TaskRepository> = web::Data::from(store);
    let origins = config.cors_origins.clone();

    let result = HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .wrap(Logger::default())
            .wrap(ForwardedIdentityMiddleware::new(forwarder.clone()))
            .app_data(web::Data::new(ServiceRole::Tasks))
            .app_data(bus_data.clone())
            .app_data(store_data.clone())
            .service(health)
            .service(web::scope("/api").configure(routes::tasks_config))
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await;

    info!("Shutting down real-time sessions");
    shutdown.cancel();
    bus.shutdown();
    let _ = realtime_task.await;
    result
}

async fn run_gateway(config: Config) -> io::Result<()> {
    let forwarder = IdentityForwarder::from_secret(config.forwarding_secret.as_deref());
    let keys = Arc::new(KeyProvider::new(
        Arc::new(HttpKeySource::new(config.key_source_url.clone())),
        config.jwt_algorithm,
        config.key_retry_delay,
    ));
    keys.acquire().await;
    let verifier = TokenVerifier::new(Arc::clone(&keys));
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(config.ws_addr()).await?;
    let bridge = Arc::new(RealtimeBridge::new(
        verifier.clone(),
        forwarder.clone(),
        config.tasks_ws_url.clone(),
        shutdown.clone(),
    ));
    let bridge_task = tokio::spawn(bridge.serve(listener));

    let state = web::Data::new(GatewayState {
        identity: Upstream::new(
            "identity",
            config.identity_service_url.clone(),
            forwarder.clone(),
        ),
        tasks: Upstream::new("tasks", config.tasks_service_url.clone(), forwarder),
    });
    let keys_data = web::Data::from(Arc::clone(&keys));
    let origins = config.cors_origins.clone();

    let rate_limit = RateLimit::new(config.rate_limit_max, config.rate_limit_window);
    let prune_task = tokio::spawn({
        let rate_limit = rate_limit.clone();
        let shutdown = shutdown.clone();
        let every = config.rate_limit_window.max(std::time::Duration::from_secs(1));
        async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => rate_limit.prune(),
                }
            }
        }
    });

    let result = HttpServer::new(move || {
        App::new()
            .wrap(rate_limit.clone())
            .wrap(gateway::security_headers())
            .wrap(cors(&origins))
            .wrap(Logger::default())
            .app_data(web::Data::new(ServiceRole::Gateway))
            .app_data(keys_data.clone())
            .app_data(state.clone())
            .configure(gateway::config(verifier.clone()))
            .default_service(web::to(gateway::not_found))
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await;

    info!("Shutting down key acquisition and real-time bridge");
    shutdown.cancel();
    keys.shutdown().await;
    let _ = bridge_task.await;
    let _ = prune_task.await;
    result
}
