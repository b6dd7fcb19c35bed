//! Helpdesk API client.
//!
//! [`ApiClient`] wraps a [`Transport`](crate::http::Transport), attaches the
//! stored bearer token to every request and renews it once when the server
//! answers 401. Login, logout and registration live in [`auth`]; the REST
//! resources it talks to are listed in [`endpoints`].

pub mod auth;
mod client;
pub mod endpoints;

pub use auth::{Login, NewUser, Role, UserProfile};
pub use client::{ApiClient, DEFAULT_API_URL, REFRESH_PATH, RefreshFailed};
pub use endpoints::Endpoint;
