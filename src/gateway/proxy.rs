//! Reverse proxying from the gateway to the internal services.

use std::time::Duration;

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse};
use log::warn;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::auth::{is_identity_header, ClaimSet, IdentityForwarder};
use crate::error::AppError;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop))
}

/// One internal service behind the gateway.
pub struct Upstream {
    name: &'static str,
    base_url: Url,
    client: reqwest::Client,
    forwarder: IdentityForwarder,
}

impl Upstream {
    pub fn new(name: &'static str, base_url: Url, forwarder: IdentityForwarder) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            name,
            base_url,
            client,
            forwarder,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Where `req` goes on this upstream: same path and query.
    pub fn target_url(&self, req: &HttpRequest) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(req.path());
        url.set_query(req.uri().query());
        url
    }

    /// Forwards `req` and relays the upstream response.
    ///
    /// Client-supplied identity headers are always dropped. When `identity`
    /// is given, freshly encoded identity headers are attached instead.
    pub async fn forward(
        &self,
        req: &HttpRequest,
        body: web::Bytes,
        identity: Option<&ClaimSet>,
    ) -> Result<HttpResponse, AppError> {
        let method = Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|e| AppError::BadRequest(format!("Unsupported method: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in req.headers() {
            let name = name.as_str();
            if is_hop_by_hop(name) || is_identity_header(name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                headers.append(name, value);
            }
        }
        if let Some(claims) = identity {
            for (name, value) in self.forwarder.encode(claims)?.headers() {
                let value = HeaderValue::from_str(&value)
                    .map_err(|e| AppError::InternalServerError(e.to_string()))?;
                headers.insert(HeaderName::from_static(name), value);
            }
        }

        let url = self.target_url(req);
        let response = self
            .client
            .request(method, url.clone())
            .headers(headers)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                warn!("Proxy to {} ({}) failed: {}", self.name, url, e);
                AppError::BadGateway(format!("{} service unavailable", self.name))
            })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut builder = HttpResponse::build(status);
        for (name, value) in response.headers() {
            if !is_hop_by_hop(name.as_str()) {
                builder.append_header((name.as_str(), value.as_bytes()));
            }
        }
        let body = response.bytes().await.map_err(|e| {
            warn!("Reading {} response failed: {}", self.name, e);
            AppError::BadGateway(format!("{} service unavailable", self.name))
        })?;
        Ok(builder.body(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let upstream = Upstream::new(
            "tasks",
            Url::parse("http://tasks.internal:4000").unwrap(),
            IdentityForwarder::trusted(),
        );
        let req = TestRequest::get()
            .uri("/api/tasks/42?verbose=1")
            .to_http_request();
        assert_eq!(
            upstream.target_url(&req).as_str(),
            "http://tasks.internal:4000/api/tasks/42?verbose=1"
        );
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("authorization"));
    }
}
