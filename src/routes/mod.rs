pub mod health;
pub mod tasks;
pub mod users;

use actix_web::web;

/// Routes served by the identity service, mounted under `/api`.
pub fn identity_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/users")
            .service(users::public_key)
            .service(users::register)
            .service(users::login)
            .service(users::list_users)
            .service(users::list_teams)
            .service(users::team_users)
            .service(users::get_user)
            .service(users::delete_user),
    );
}

/// Routes served by the tasks service, mounted under `/api`.
pub fn tasks_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tasks")
            .service(tasks::get_tasks)
            .service(tasks::create_task)
            .service(tasks::get_task)
            .service(tasks::update_task_status)
            .service(tasks::delete_task),
    );
}
