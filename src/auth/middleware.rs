use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};

use crate::auth::forwarding::{IdentityForwarder, USER_PAYLOAD_HEADER, USER_PAYLOAD_SIGNATURE_HEADER};
use crate::auth::verifier::{bearer_credential, TokenVerifier};
use crate::error::AppError;

/// Edge authentication: verifies the bearer credential and stores the
/// resulting `ClaimSet` in the request extensions.
///
/// Requests without a usable credential are answered here and never reach
/// the wrapped service.
pub struct AuthMiddleware {
    verifier: TokenVerifier,
}

impl AuthMiddleware {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service,
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
    verifier: TokenVerifier,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let credential = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_credential);

        match self.verifier.authenticate(credential) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                Box::pin(self.service.call(req))
            }
            Err(auth_err) => {
                log::debug!("Rejected {} {}: {}", req.method(), req.path(), auth_err);
                let app_err = AppError::from(auth_err);
                Box::pin(async move { Err(app_err.into()) })
            }
        }
    }
}

/// Internal side of identity forwarding: reconstructs the caller's
/// `ClaimSet` from the forwarded headers when they are present and valid.
///
/// Never rejects a request. Handlers that need an identity use the
/// [`AuthenticatedUser`](crate::auth::AuthenticatedUser) extractor.
pub struct ForwardedIdentityMiddleware {
    forwarder: IdentityForwarder,
}

impl ForwardedIdentityMiddleware {
    pub fn new(forwarder: IdentityForwarder) -> Self {
        Self { forwarder }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ForwardedIdentityMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ForwardedIdentityService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ForwardedIdentityService {
            service,
            forwarder: self.forwarder.clone(),
        }))
    }
}

pub struct ForwardedIdentityService<S> {
    service: S,
    forwarder: IdentityForwarder,
}

impl<S, B> Service<ServiceRequest> for ForwardedIdentityService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let claims = {
            let headers = req.headers();
            self.forwarder.resolve(
                headers.get(USER_PAYLOAD_HEADER).map(|value| value.as_bytes()),
                headers
                    .get(USER_PAYLOAD_SIGNATURE_HEADER)
                    .map(|value| value.as_bytes()),
            )
        };
        if let Some(claims) = claims {
            req.extensions_mut().insert(claims);
        }
        Box::pin(self.service.call(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::key_provider::tests::ScriptedKeySource;
    use crate::auth::testutil::ed25519_pem_pair;
    use crate::auth::{ClaimSet, KeyProvider, TokenIssuer, VerificationKey};
    use actix_web::{http::StatusCode, test, web, App, HttpRequest, HttpResponse};
    use jsonwebtoken::Algorithm;
    use std::sync::Arc;
    use std::time::Duration;

    async fn whoami(req: HttpRequest) -> HttpResponse {
        match req.extensions().get::<ClaimSet>() {
            Some(claims) => HttpResponse::Ok().body(claims.email().to_string()),
            None => HttpResponse::Ok().body("anonymous"),
        }
    }

    fn verifier(ready: Option<&str>) -> TokenVerifier {
        let source = Arc::new(ScriptedKeySource::new(vec![]));
        let provider = KeyProvider::new(source, Algorithm::EdDSA, Duration::from_millis(10));
        if let Some(public_pem) = ready {
            provider.install(VerificationKey::from_pem(public_pem, Algorithm::EdDSA).unwrap());
        }
        TokenVerifier::new(Arc::new(provider))
    }

    #[actix_rt::test]
    async fn test_edge_middleware_status_mapping() {
        let (private_pem, public_pem) = ed25519_pem_pair(30);
        let issuer = TokenIssuer::from_pem(&private_pem, &public_pem, Algorithm::EdDSA).unwrap();
        let exp = chrono::Utc::now().timestamp() as u64 + 60;
        let token = issuer
            .sign(&ClaimSet::new("1", "john@example.com", "admin", None, exp))
            .unwrap();

        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(verifier(Some(&public_pem))))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await, "john@example.com");

        let req = test::TestRequest::get().uri("/whoami").to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", "Bearer not.a.token"))
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn test_edge_middleware_not_ready() {
        let app = test::init_service(
            App::new()
                .wrap(AuthMiddleware::new(verifier(None)))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header(("Authorization", "Bearer a.b.c"))
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(
            err.error_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[actix_rt::test]
    async fn test_forwarded_identity_middleware() {
        let app = test::init_service(
            App::new()
                .wrap(ForwardedIdentityMiddleware::new(IdentityForwarder::trusted()))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;

        let payload = r#"{"sub":"1","email":"john@example.com","role":"admin","exp":1}"#;
        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((USER_PAYLOAD_HEADER, payload))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(test::read_body(resp).await, "john@example.com");

        let req = test::TestRequest::get()
            .uri("/whoami")
            .insert_header((USER_PAYLOAD_HEADER, "{broken"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(test::read_body(resp).await, "anonymous");
    }
}
