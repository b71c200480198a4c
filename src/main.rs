#[macro_use]
extern crate rocket;

mod auth;
mod db;
mod env;
mod error;
mod models;
mod routes;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use auth::{login, logout, process_login, unauthorized};
use db::{clean_expired_sessions, connect_options, ensure_admin};
use env::{AppConfig, load_environment};
use routes::{
    course_detail, course_edit, course_list, course_update, health, task_create,
    task_create_form, task_delete, task_delete_confirm, task_edit_form, task_update,
};
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use telemetry::{TelemetryFairing, init_tracing};
use tracing::{error, info};

#[launch]
async fn rocket() -> _ {
    if let Err(e) = load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }
    init_tracing();

    let config = AppConfig::from_env();

    let pool = match connect(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to start: {:?}", e);
            panic!("Database setup failed: {}", e);
        }
    };

    spawn_session_sweeper(pool.clone(), config.session_sweep_secs);

    init_rocket(pool, config).await
}

async fn connect(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .connect_with(connect_options(&config.database_url)?)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    if let Some(admin) = &config.admin {
        ensure_admin(&pool, &admin.username, &admin.password).await?;
    }

    Ok(pool)
}

fn spawn_session_sweeper(pool: SqlitePool, interval_secs: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
        }
    });
}

pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting homeschool");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/",
            routes![
                course_list,
                course_detail,
                course_edit,
                course_update,
                task_create_form,
                task_create,
                task_edit_form,
                task_update,
                task_delete_confirm,
                task_delete,
                health,
            ],
        )
        .mount("/accounts", routes![login, process_login, logout])
        .register("/", catchers![unauthorized])
        .attach(TelemetryFairing)
}
