//! Login, logout, registration and profile lookup on top of [`ApiClient`].

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::http::Transport;
use crate::session::{
    ACCESS_KEY, CredentialStore, Credentials, ROLE_KEY, SCHOOL_KEY, SessionListener,
    clear_credentials,
};

/// Path of the token obtain endpoint.
pub const LOGIN_PATH: &str = "api/token/";

/// Path of the users collection (registration and profiles).
pub const USERS_PATH: &str = "api/users/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Technician,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Technician => write!(f, "technician"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub school: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Login {
    pub credentials: Credentials,
    /// `None` when the profile could not be fetched; the login still stands.
    pub profile: Option<UserProfile>,
}

impl<T: Transport, S: CredentialStore, L: SessionListener> ApiClient<T, S, L> {
    /// Obtains a credential pair, stores it, then records the user's role and
    /// school from their profile.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Login> {
        let credentials: Credentials = self
            .post_json(LOGIN_PATH, &LoginRequest { username, password })
            .await
            .context("Login failed. Please check your credentials.")?;
        credentials.save(self.store())?;
        info!("Logged in as {}", username);

        let profile = match self.current_user().await {
            Ok(profile) => {
                self.store().set(ROLE_KEY, &profile.role.to_string())?;
                self.store()
                    .set(SCHOOL_KEY, profile.school.as_deref().unwrap_or_default())?;
                Some(profile)
            }
            Err(e) => {
                warn!("Failed to fetch user profile: {:#}", e);
                None
            }
        };

        Ok(Login {
            credentials,
            profile,
        })
    }

    /// Forgets the session. Nothing is sent to the server.
    pub fn logout(&self) -> Result<()> {
        clear_credentials(self.store())?;
        self.store().remove(ROLE_KEY)?;
        self.store().remove(SCHOOL_KEY)?;
        info!("Logged out");
        Ok(())
    }

    /// Whether a non-empty access token is stored.
    pub fn is_logged_in(&self) -> Result<bool> {
        Ok(self.store().get(ACCESS_KEY)?.is_some_and(|t| !t.is_empty()))
    }

    #[tracing::instrument(skip(self, user), fields(username = %user.username))]
    pub async fn register(&self, user: &NewUser) -> Result<UserProfile> {
        self.post_json(USERS_PATH, user)
            .await
            .context("Registration failed")
    }

    /// Fetches the profile of the user the stored access token belongs to.
    #[tracing::instrument(skip(self))]
    pub async fn current_user(&self) -> Result<UserProfile> {
        let access = self
            .store()
            .get(ACCESS_KEY)?
            .context("Not logged in. Run `ictdesk login` first.")?;
        let user_id = user_id_from_token(&access)?;
        debug!("Access token belongs to user {}", user_id);

        self.get_json(&format!("{}{}/", USERS_PATH, user_id))
            .await
            .context("Failed to fetch user profile")
    }
}

/// Extracts the user id from a JWT access token's payload.
///
/// The id is read from `user_id`, then `id`, then `sub`. The signature is not
/// verified; the server does that.
pub fn user_id_from_token(token: &str) -> Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .context("Access token is not a JWT")?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .context("Access token payload is not valid base64")?;
    let claims: serde_json::Value =
        serde_json::from_slice(&bytes).context("Access token payload is not JSON")?;

    for claim in ["user_id", "id", "sub"] {
        match claims.get(claim) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => return Ok(n.to_string()),
            _ => {}
        }
    }
    bail!("Access token does not identify a user")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::http::ReqwestTransport;
    use crate::session::{MemoryStore, MockSessionListener, NoopListener, REFRESH_KEY};
    use mockito::{Matcher, Server};
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;

    /// Builds an unsigned JWT carrying the given claims.
    pub(crate) fn fake_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.signature", header, payload)
    }

    fn client_for(
        server: &Server,
        store: &Arc<MemoryStore>,
    ) -> ApiClient<ReqwestTransport, Arc<MemoryStore>, NoopListener> {
        ApiClient::new(
            ReqwestTransport::new(Client::new()),
            store.clone(),
            NoopListener,
            Some(server.url()),
        )
    }

    #[test]
    fn test_user_id_from_token_claims() {
        assert_eq!(user_id_from_token(&fake_jwt(json!({"user_id": 12}))).unwrap(), "12");
        assert_eq!(user_id_from_token(&fake_jwt(json!({"id": "7"}))).unwrap(), "7");
        assert_eq!(user_id_from_token(&fake_jwt(json!({"sub": "42"}))).unwrap(), "42");
        assert_eq!(
            user_id_from_token(&fake_jwt(json!({"user_id": 3, "sub": "99"}))).unwrap(),
            "3"
        );
    }

    #[test]
    fn test_user_id_from_token_rejects_garbage() {
        assert!(user_id_from_token("not-a-jwt").is_err());
        assert!(user_id_from_token("a.!!!.c").is_err());
        assert!(user_id_from_token(&fake_jwt(json!({"exp": 1}))).is_err());
    }

    #[tokio::test]
    async fn test_login_stores_credentials_and_profile() {
        let mut server = Server::new_async().await;
        let access = fake_jwt(json!({"user_id": 5}));

        let token = server
            .mock("POST", "/api/token/")
            .match_body(Matcher::Json(json!({"username": "amina", "password": "pw"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access": access, "refresh": "tokR"}).to_string())
            .create_async()
            .await;
        let profile = server
            .mock("GET", "/api/users/5/")
            .match_header("Authorization", format!("Bearer {}", access).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": 5, "username": "amina", "email": "a@school.ac", "role": "technician", "school": "Kisumu High"}"#,
            )
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);

        let login = client.login("amina", "pw").await.unwrap();

        token.assert_async().await;
        profile.assert_async().await;
        assert_eq!(login.credentials.refresh, "tokR");
        assert_eq!(login.profile.unwrap().role, Role::Technician);
        assert_eq!(store.get(ACCESS_KEY).unwrap(), Some(access));
        assert_eq!(store.get(REFRESH_KEY).unwrap().as_deref(), Some("tokR"));
        assert_eq!(store.get(ROLE_KEY).unwrap().as_deref(), Some("technician"));
        assert_eq!(store.get(SCHOOL_KEY).unwrap().as_deref(), Some("Kisumu High"));
    }

    #[tokio::test]
    async fn test_login_succeeds_when_profile_fetch_fails() {
        let mut server = Server::new_async().await;
        let access = fake_jwt(json!({"user_id": 5}));

        let _token = server
            .mock("POST", "/api/token/")
            .with_status(200)
            .with_body(json!({"access": access, "refresh": "tokR"}).to_string())
            .create_async()
            .await;
        let _profile = server
            .mock("GET", "/api/users/5/")
            .with_status(500)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);

        let login = client.login("amina", "pw").await.unwrap();

        assert!(login.profile.is_none());
        assert!(client.is_logged_in().unwrap());
        assert_eq!(store.get(ROLE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let mut server = Server::new_async().await;
        let _token = server
            .mock("POST", "/api/token/")
            .with_status(401)
            .with_body(r#"{"detail": "No active account found with the given credentials"}"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/api/token/refresh/")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);

        let err = client.login("amina", "wrong").await.unwrap_err();

        refresh.assert_async().await;
        assert!(err.to_string().contains("Login failed"));
        assert!(!client.is_logged_in().unwrap());
    }

    #[tokio::test]
    async fn test_logout_clears_all_session_keys() {
        let store = Arc::new(MemoryStore::with_entries([
            ("access", "tokA"),
            ("refresh", "tokR"),
            ("role", "user"),
            ("school", "Kisumu High"),
        ]));
        let mut listener = MockSessionListener::new();
        listener.expect_session_expired().times(0);
        let client = ApiClient::new(
            ReqwestTransport::new(Client::new()),
            store.clone(),
            listener,
            None,
        );

        client.logout().unwrap();

        for key in [ACCESS_KEY, REFRESH_KEY, ROLE_KEY, SCHOOL_KEY] {
            assert_eq!(store.get(key).unwrap(), None, "{} should be cleared", key);
        }
        assert!(!client.is_logged_in().unwrap());
    }

    #[tokio::test]
    async fn test_register_posts_new_user() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/users/")
            .match_body(Matcher::Json(json!({
                "username": "otieno",
                "email": "o@school.ac",
                "password": "secret",
                "role": "user"
            })))
            .with_status(201)
            .with_body(r#"{"id": 9, "username": "otieno", "email": "o@school.ac", "role": "user", "school": null}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);

        let profile = client
            .register(&NewUser {
                username: "otieno".to_string(),
                email: "o@school.ac".to_string(),
                password: "secret".to_string(),
                role: Role::User,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(profile.id, 9);
        assert_eq!(profile.school, None);
    }

    #[tokio::test]
    async fn test_current_user_requires_login() {
        let store = Arc::new(MemoryStore::new());
        let client = ApiClient::new(
            ReqwestTransport::new(Client::new()),
            store,
            NoopListener,
            None,
        );
        let err = client.current_user().await.unwrap_err();
        assert!(err.to_string().contains("Not logged in"));
    }
}
