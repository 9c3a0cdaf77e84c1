use actix_web::{get, web, HttpResponse, Responder};
use chrono::Utc;
use serde_json::json;

use crate::auth::KeyProvider;
use crate::config::ServiceRole;
use crate::events::{EventBus, Topic};
use crate::store::TaskRepository;

/// Health check endpoint
///
/// Always answers 200 with the service role and a timestamp. The gateway adds
/// whether the verification key has been fetched; the tasks service adds the
/// number of stored tasks and of live subscriptions per topic.
#[get("/health")]
pub async fn health(
    role: web::Data<ServiceRole>,
    keys: Option<web::Data<KeyProvider>>,
    bus: Option<web::Data<EventBus>>,
    tasks: Option<web::Data<dyn TaskRepository>>,
) -> impl Responder {
    let mut body = json!({
        "status": "ok",
        "service": role.as_str(),
        "timestamp": Utc::now(),
    });
    if let Some(keys) = keys {
        body["publicKeyFetched"] = json!(keys.is_ready());
    }
    if let Some(tasks) = tasks {
        match tasks.count().await {
            Ok(count) => body["data"] = json!({ "tasks": count }),
            Err(e) => log::warn!("Health check could not count tasks: {}", e),
        }
    }
    if let Some(bus) = bus {
        let subscribers: serde_json::Map<String, serde_json::Value> = Topic::ALL
            .into_iter()
            .map(|topic| (topic.to_string(), json!(bus.subscriber_count(topic))))
            .collect();
        body["subscribers"] = serde_json::Value::Object(subscribers);
    }
    HttpResponse::Ok().json(body)
}
