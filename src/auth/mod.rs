pub mod auth;
pub mod authentication;
pub mod ownership;
pub mod user;

pub use auth::*;
pub use authentication::*;
pub use user::*;
