//! Task CRUD for the tasks service.
//!
//! Every successful mutation is published on the [`EventBus`] after the store
//! has committed it and before the response is returned, so a subscriber that
//! was active when the request completed has the event queued.

use crate::{
    auth::AuthenticatedUser,
    error::AppError,
    events::{EventBus, EventPayload, Topic},
    models::{StatusUpdate, Task, TaskInput},
    store::TaskRepository,
};
use actix_web::{delete, get, post, put, web, HttpResponse, Responder};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Lists every task, oldest first.
#[get("")]
pub async fn get_tasks(store: web::Data<dyn TaskRepository>) -> Result<impl Responder, AppError> {
    let tasks = store.list().await?;
    Ok(HttpResponse::Ok().json(tasks))
}

/// Creates a task authored by the caller and publishes `taskAdded`.
///
/// ## Responses:
/// - `201 Created`: the new `Task`.
/// - `401 Unauthorized`: no identity was forwarded with the request.
/// - `422 Unprocessable Entity`: input validation failed.
#[post("")]
pub async fn create_task(
    store: web::Data<dyn TaskRepository>,
    bus: web::Data<EventBus>,
    user: AuthenticatedUser,
    task_data: web::Json<TaskInput>,
) -> Result<impl Responder, AppError> {
    task_data.validate()?;

    let task = store
        .create(Task::new(task_data.into_inner(), user.email()))
        .await?;
    bus.publish(Topic::TaskAdded, EventPayload::Task(task.clone()));

    Ok(HttpResponse::Created().json(task))
}

#[get("/{id}")]
pub async fn get_task(
    store: web::Data<dyn TaskRepository>,
    task_id: web::Path<Uuid>,
) -> Result<impl Responder, AppError> {
    let task = store
        .get(task_id.into_inner())
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
    Ok(HttpResponse::Ok().json(task))
}

/// Changes a task's status and publishes `taskUpdated` with the new state.
#[put("/{id}/status")]
pub async fn update_task_status(
    store: web::Data<dyn TaskRepository>,
    bus: web::Data<EventBus>,
    task_id: web::Path<Uuid>,
    update: web::Json<StatusUpdate>,
) -> Result<impl Responder, AppError> {
    let task = store
        .update_status(task_id.into_inner(), update.status)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
    bus.publish(Topic::TaskUpdated, EventPayload::Task(task.clone()));

    Ok(HttpResponse::Ok().json(task))
}

/// Deletes a task and publishes `taskDeleted` carrying only its id.
#[delete("/{id}")]
pub async fn delete_task(
    store: web::Data<dyn TaskRepository>,
    bus: web::Data<EventBus>,
    task_id: web::Path<Uuid>,
) -> Result<impl Responder, AppError> {
    let task = store
        .delete(task_id.into_inner())
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".into()))?;
    bus.publish(Topic::TaskDeleted, EventPayload::TaskId(task.id));

    Ok(HttpResponse::Ok().json(json!({
        "message": "Task deleted successfully",
        "id": task.id,
    })))
}
