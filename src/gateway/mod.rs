//! The edge service.
//!
//! `/api/users/*` is proxied to the identity service without authentication.
//! `/api/tasks*` requires a verified bearer credential; the verified identity
//! is forwarded to the tasks service. Real-time connections go through the
//! [`bridge`]. Every response carries [`security_headers`] and every client is
//! subject to the [`rate_limit`].

pub mod bridge;
pub mod proxy;
pub mod rate_limit;

use actix_web::middleware::DefaultHeaders;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::auth::{AuthMiddleware, AuthenticatedUser, TokenVerifier};
use crate::error::AppError;
use crate::routes::health;

pub use bridge::RealtimeBridge;
pub use proxy::Upstream;
pub use rate_limit::RateLimit;

/// Upstreams the gateway proxies to.
pub struct GatewayState {
    pub identity: Upstream,
    pub tasks: Upstream,
}

/// Gateway routes. Expects `web::Data<GatewayState>`, `web::Data<KeyProvider>`
/// and `web::Data<ServiceRole>` to be registered on the app, with
/// [`not_found`] as its default service.
pub fn config(verifier: TokenVerifier) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.service(health::health)
            .service(web::scope("/api/users").default_service(web::to(proxy_identity)))
            .service(
                web::scope("/api/tasks")
                    .wrap(AuthMiddleware::new(verifier))
                    .default_service(web::to(proxy_tasks)),
            );
    }
}

async fn proxy_identity(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, AppError> {
    state.identity.forward(&req, body, None).await
}

async fn proxy_tasks(
    req: HttpRequest,
    body: web::Bytes,
    user: AuthenticatedUser,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, AppError> {
    state.tasks.forward(&req, body, Some(&user.0)).await
}

/// Hardening headers added to every gateway response.
pub fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Content-Security-Policy", "default-src 'self'; frame-ancestors 'self'"))
        .add(("Cross-Origin-Opener-Policy", "same-origin"))
        .add(("Cross-Origin-Resource-Policy", "same-origin"))
        .add(("Referrer-Policy", "no-referrer"))
        .add(("Strict-Transport-Security", "max-age=15552000; includeSubDomains"))
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-DNS-Prefetch-Control", "off"))
        .add(("X-Frame-Options", "SAMEORIGIN"))
        .add(("X-Permitted-Cross-Domain-Policies", "none"))
}

/// Fallback for every route the gateway does not serve.
pub async fn not_found(req: HttpRequest) -> HttpResponse {
    HttpResponse::NotFound().json(json!({
        "error": "Route not found",
        "path": req.path(),
        "availableRoutes": ["/health", "/api/users/*", "/api/tasks/*"],
    }))
}
