use chrono::{Duration, Utc};
use rocket::State;
use rocket::form::Form;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::response::Redirect;
use rocket::serde::json::Json;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{error, info, warn};

use crate::db::{authenticate_user, create_user_session, invalidate_session};
use crate::env::AppConfig;
use crate::validation::safe_next;

use super::{LOGIN_PATH, SESSION_COOKIE, UserSession};

pub const DEFAULT_LANDING: &str = "/courses";

#[derive(FromForm)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
pub struct LoginPage {
    pub fields: Vec<&'static str>,
    pub next: Option<String>,
    pub error: Option<String>,
}

#[get("/login?<next>&<error>")]
pub fn login(next: Option<String>, error: Option<String>) -> Json<LoginPage> {
    Json(LoginPage {
        fields: vec!["username", "password"],
        next,
        error,
    })
}

#[post("/login?<next>", data = "<form>")]
pub async fn process_login(
    next: Option<&str>,
    form: Form<LoginForm>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Redirect {
    info!("Login attempt: {}", &form.username);

    let user = match authenticate_user(db, &form.username, &form.password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Authentication failed for {}", &form.username);
            return Redirect::found(format!("{}?error=invalid", LOGIN_PATH));
        }
        Err(e) => {
            error!("Authentication error: {:?}", e);
            return Redirect::found(format!("{}?error=unavailable", LOGIN_PATH));
        }
    };

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + Duration::hours(config.session_hours);

    if let Err(e) = create_user_session(db, user.id, &token, expires_at.naive_utc()).await {
        error!("Failed to create session for {}: {:?}", user.username, e);
        return Redirect::found(format!("{}?error=unavailable", LOGIN_PATH));
    }

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(config.session_hours)),
    );

    info!("Authentication successful for {}", user.username);
    Redirect::found(safe_next(next).unwrap_or(DEFAULT_LANDING).to_string())
}

#[post("/logout")]
pub async fn logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Redirect {
    if let Some(token) = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
    {
        if let Err(e) = invalidate_session(db, &token).await {
            warn!("Failed to invalidate session: {:?}", e);
        }
    }

    cookies.remove_private(SESSION_COOKIE);
    Redirect::found(LOGIN_PATH)
}
