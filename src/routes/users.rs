use crate::{
    auth::{LoginRequest, LoginResponse, RegisterRequest, TokenIssuer},
    error::AppError,
    store::UserStore,
};
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde_json::json;
use validator::Validate;

/// Key distribution endpoint: the PEM public key that verifies issued
/// credentials, as plain text.
#[get("/public-key")]
pub async fn public_key(issuer: web::Data<TokenIssuer>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(issuer.public_key_pem().to_string())
}

/// Register a new user
///
/// New accounts get the `user` role in the default team.
///
/// ## Responses:
/// - `201 Created`: `{message, user}`.
/// - `409 Conflict`: the email is already registered.
/// - `422 Unprocessable Entity`: validation failed.
#[post("/register")]
pub async fn register(
    users: web::Data<UserStore>,
    register_data: web::Json<RegisterRequest>,
) -> Result<impl Responder, AppError> {
    register_data.validate()?;

    let user = users.register(
        &register_data.name,
        &register_data.email,
        &register_data.password,
    )?;
    log::info!("Registered user {}", user.id);

    Ok(HttpResponse::Created().json(json!({
        "message": "User created successfully",
        "user": user,
    })))
}

/// Login user
///
/// Exchanges email and password for a signed credential valid for one hour.
#[post("/login")]
pub async fn login(
    users: web::Data<UserStore>,
    issuer: web::Data<TokenIssuer>,
    login_data: web::Json<LoginRequest>,
) -> Result<impl Responder, AppError> {
    login_data.validate()?;

    let user = users.authenticate(&login_data.email, &login_data.password)?;
    let token = issuer.issue(&user)?;

    Ok(HttpResponse::Ok().json(LoginResponse {
        message: "Login successful".into(),
        token,
    }))
}

#[get("")]
pub async fn list_users(users: web::Data<UserStore>) -> impl Responder {
    HttpResponse::Ok().json(users.list())
}

#[get("/teams")]
pub async fn list_teams(users: web::Data<UserStore>) -> impl Responder {
    HttpResponse::Ok().json(users.teams())
}

#[get("/teams/{id}/users")]
pub async fn team_users(
    users: web::Data<UserStore>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let members = users.team_users(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(members))
}

#[get("/{id}")]
pub async fn get_user(
    users: web::Data<UserStore>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let id = path.into_inner();
    let user = users
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("User with ID {} does not exist", id)))?;
    Ok(HttpResponse::Ok().json(user))
}

#[delete("/{id}")]
pub async fn delete_user(
    users: web::Data<UserStore>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let id = path.into_inner();
    let user = users
        .delete(&id)
        .ok_or_else(|| AppError::NotFound(format!("User with ID {} does not exist", id)))?;
    log::info!("Deleted user {}", user.id);
    Ok(HttpResponse::Ok().json(json!({
        "message": "User deleted successfully",
        "user": user,
    })))
}
