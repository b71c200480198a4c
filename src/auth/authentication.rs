use rocket::Request;
use rocket::http::{RawStr, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::Redirect;
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::{get_session_by_token, get_user};
use crate::error::AppError;

use super::User;

pub const SESSION_COOKIE: &str = "session_token";
pub const LOGIN_PATH: &str = "/accounts/login";

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");
        let _guard = auth_span.enter();

        let token = request
            .cookies()
            .get_private(SESSION_COOKIE)
            .map(|c| c.value().to_string());

        let Some(token) = token else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let db = match request.rocket().state::<SqlitePool>() {
            Some(pool) => pool,
            _ => {
                tracing::error!("Database pool not found in managed state");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        let session = match get_session_by_token(db, &token).await {
            Ok(session) => session,
            Err(AppError::Authentication(msg)) => {
                tracing::warn!(message = %msg, "Invalid session token");
                return Outcome::Error((Status::Unauthorized, ()));
            }
            Err(err) => {
                tracing::error!(error = ?err, "Failed to look up session");
                return Outcome::Error((Status::InternalServerError, ()));
            }
        };

        if !session.is_valid() {
            tracing::warn!(session_id = session.id, "Session token expired");
            return Outcome::Error((Status::Unauthorized, ()));
        }

        match get_user(db, session.user_id).await {
            Ok(user) => {
                tracing::info!(username = %user.username, "User authenticated via session token");
                Outcome::Success(user)
            }
            Err(AppError::NotFound(_)) => {
                tracing::warn!(user_id = %session.user_id, "Session belongs to a removed user");
                Outcome::Error((Status::Unauthorized, ()))
            }
            Err(err) => {
                tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
                Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

pub fn login_url(next: &str) -> String {
    format!("{}?next={}", LOGIN_PATH, RawStr::new(next).percent_encode())
}

#[catch(401)]
pub fn unauthorized(req: &Request) -> Redirect {
    let next = req.uri().to_string();
    warn!(path = %next, "Unauthorized access attempt");
    Redirect::found(login_url(&next))
}
