use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::Method;
use std::io::Write;

use crate::{
    api::{ApiClient, Endpoint, NewUser},
    http::{ApiRequest, ApiResponse, Transport},
    runtime::Runtime,
    session::{CredentialStore, SessionListener},
};

pub mod config;

/// Environment variable consulted when `--password` is not given.
pub const PASSWORD_ENV: &str = "ICTDESK_PASSWORD";

/// Picks the password from the argument or `ICTDESK_PASSWORD`.
pub fn resolve_password<R: Runtime>(runtime: &R, password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    match runtime.env_var(PASSWORD_ENV) {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => bail!("No password given. Pass --password or set {}.", PASSWORD_ENV),
    }
}

#[tracing::instrument(skip(client, password, out))]
pub async fn login<T, S, L, W>(
    client: &ApiClient<T, S, L>,
    username: &str,
    password: &str,
    out: &mut W,
) -> Result<()>
where
    T: Transport,
    S: CredentialStore,
    L: SessionListener,
    W: Write,
{
    let login = client.login(username, password).await?;
    writeln!(out, "Login successful!")?;
    if let Some(profile) = login.profile {
        write!(out, "Signed in as {} ({})", profile.username, profile.role)?;
        match profile.school.as_deref() {
            Some(school) if !school.is_empty() => writeln!(out, ", {}", school)?,
            _ => writeln!(out)?,
        }
    }
    Ok(())
}

pub fn logout<T, S, L, W>(client: &ApiClient<T, S, L>, out: &mut W) -> Result<()>
where
    T: Transport,
    S: CredentialStore,
    L: SessionListener,
    W: Write,
{
    let was_logged_in = client.is_logged_in()?;
    client.logout()?;
    if was_logged_in {
        writeln!(out, "Logged out.")?;
    } else {
        writeln!(out, "Not logged in.")?;
    }
    Ok(())
}

#[tracing::instrument(skip(client, out))]
pub async fn whoami<T, S, L, W>(client: &ApiClient<T, S, L>, out: &mut W) -> Result<()>
where
    T: Transport,
    S: CredentialStore,
    L: SessionListener,
    W: Write,
{
    let profile = client.current_user().await?;
    writeln!(out, "id:       {}", profile.id)?;
    writeln!(out, "username: {}", profile.username)?;
    writeln!(out, "email:    {}", profile.email)?;
    writeln!(out, "role:     {}", profile.role)?;
    writeln!(out, "school:   {}", profile.school.unwrap_or_default())?;
    Ok(())
}

#[tracing::instrument(skip(client, user, out))]
pub async fn register<T, S, L, W>(
    client: &ApiClient<T, S, L>,
    user: &NewUser,
    out: &mut W,
) -> Result<()>
where
    T: Transport,
    S: CredentialStore,
    L: SessionListener,
    W: Write,
{
    let profile = client.register(user).await?;
    writeln!(
        out,
        "Registration successful! Created user {} (id {}).",
        profile.username, profile.id
    )?;
    Ok(())
}

/// Prints a resource, or one record of a collection, as pretty JSON.
#[tracing::instrument(skip(client, out))]
pub async fn fetch<T, S, L, W>(
    client: &ApiClient<T, S, L>,
    endpoint: Endpoint,
    id: Option<u64>,
    out: &mut W,
) -> Result<()>
where
    T: Transport,
    S: CredentialStore,
    L: SessionListener,
    W: Write,
{
    let path = match id {
        Some(id) => endpoint.record_path(id)?,
        None => endpoint.path().to_string(),
    };
    let response = client.get(&path).await?;
    print_body(&response, out)
}

/// Sends an arbitrary request through the authenticated client.
#[tracing::instrument(skip(client, data, out))]
pub async fn request<T, S, L, W>(
    client: &ApiClient<T, S, L>,
    method: &str,
    path: &str,
    data: Option<&str>,
    out: &mut W,
) -> Result<()>
where
    T: Transport,
    S: CredentialStore,
    L: SessionListener,
    W: Write,
{
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut request = ApiRequest::new(method, path);
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("Request data must be valid JSON")?;
        request = request.with_json(body);
    }

    let response = client.request(request).await?;
    debug!("Response status {}", response.status);
    print_body(&response, out)
}

/// Writes JSON bodies pretty-printed and anything else verbatim.
fn print_body<W: Write>(response: &ApiResponse, out: &mut W) -> Result<()> {
    if response.body.is_empty() {
        return Ok(());
    }
    match serde_json::from_slice::<serde_json::Value>(&response.body) {
        Ok(json) => writeln!(out, "{}", serde_json::to_string_pretty(&json)?)?,
        Err(_) => writeln!(out, "{}", response.text())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Role;
    use crate::api::auth::tests::fake_jwt;
    use crate::http::ReqwestTransport;
    use crate::runtime::MockRuntime;
    use crate::session::{ACCESS_KEY, MemoryStore, NoopListener};
    use mockall::predicate::eq;
    use mockito::{Matcher, Server};
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;

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

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_resolve_password_prefers_argument() {
        let runtime = MockRuntime::new();
        let password = resolve_password(&runtime, Some("pw".to_string())).unwrap();
        assert_eq!(password, "pw");
    }

    #[test]
    fn test_resolve_password_from_env() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(PASSWORD_ENV))
            .returning(|_| Ok("from-env".to_string()));
        assert_eq!(resolve_password(&runtime, None).unwrap(), "from-env");
    }

    #[test]
    fn test_resolve_password_missing() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(PASSWORD_ENV))
            .returning(|_| Err(std::env::VarError::NotPresent));
        let err = resolve_password(&runtime, None).unwrap_err();
        assert!(err.to_string().contains(PASSWORD_ENV));
    }

    #[tokio::test]
    async fn test_login_prints_profile() {
        let mut server = Server::new_async().await;
        let access = fake_jwt(json!({"user_id": 3}));

        let _token = server
            .mock("POST", "/api/token/")
            .with_status(200)
            .with_body(json!({"access": access, "refresh": "tokR"}).to_string())
            .create_async()
            .await;
        let _profile = server
            .mock("GET", "/api/users/3/")
            .with_status(200)
            .with_body(r#"{"id": 3, "username": "wanjiru", "role": "user", "school": "Nyeri Girls"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        login(&client, "wanjiru", "pw", &mut out).await.unwrap();

        let text = output(out);
        assert!(text.contains("Login successful!"));
        assert!(text.contains("Signed in as wanjiru (user), Nyeri Girls"));
    }

    #[tokio::test]
    async fn test_logout_prints_and_clears() {
        let server = Server::new_async().await;
        let store = Arc::new(MemoryStore::with_entries([("access", "tokA")]));
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        logout(&client, &mut out).unwrap();

        assert_eq!(output(out), "Logged out.\n");
        assert_eq!(store.get(ACCESS_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_without_session() {
        let server = Server::new_async().await;
        let store = Arc::new(MemoryStore::with_entries([("role", "user")]));
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        logout(&client, &mut out).unwrap();

        assert_eq!(output(out), "Not logged in.\n");
        assert_eq!(store.get("role").unwrap(), None);
    }

    #[tokio::test]
    async fn test_whoami() {
        let mut server = Server::new_async().await;
        let access = fake_jwt(json!({"user_id": 4}));

        let _profile = server
            .mock("GET", "/api/users/4/")
            .match_header("Authorization", format!("Bearer {}", access).as_str())
            .with_status(200)
            .with_body(r#"{"id": 4, "username": "baraka", "email": "b@school.ac", "role": "technician", "school": null}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::with_entries([("access", access.as_str())]));
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        whoami(&client, &mut out).await.unwrap();

        let text = output(out);
        assert!(text.contains("username: baraka"));
        assert!(text.contains("role:     technician"));
    }

    #[tokio::test]
    async fn test_register_prints_created_user() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/users/")
            .with_status(201)
            .with_body(r#"{"id": 11, "username": "kip", "email": "k@school.ac", "role": "technician"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        let user = NewUser {
            username: "kip".to_string(),
            email: "k@school.ac".to_string(),
            password: "pw".to_string(),
            role: Role::Technician,
        };
        register(&client, &user, &mut out).await.unwrap();

        assert!(output(out).contains("Created user kip (id 11)"));
    }

    #[tokio::test]
    async fn test_fetch_record_pretty_prints_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/equipment/3/")
            .with_status(200)
            .with_body(r#"{"id":3,"type":"printer","is_working":false}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        fetch(&client, Endpoint::Equipment, Some(3), &mut out)
            .await
            .unwrap();

        mock.assert_async().await;
        let text = output(out);
        assert!(text.contains("\"type\": \"printer\""));
        assert!(text.contains("\"is_working\": false"));
    }

    #[tokio::test]
    async fn test_fetch_report() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/reports/turnaround-time/")
            .with_status(200)
            .with_body(r#"{"average_turnaround_hours": 12.5}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        fetch(&client, Endpoint::TurnaroundTime, None, &mut out)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(output(out).contains("12.5"));
    }

    #[tokio::test]
    async fn test_request_sends_method_and_data() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/api/tickets/2/")
            .match_body(Matcher::Json(json!({"status": "in_progress"})))
            .with_status(200)
            .with_body("updated")
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        request(
            &client,
            "put",
            "/api/tickets/2/",
            Some(r#"{"status": "in_progress"}"#),
            &mut out,
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(output(out), "updated\n");
    }

    #[tokio::test]
    async fn test_request_rejects_invalid_data() {
        let server = Server::new_async().await;
        let store = Arc::new(MemoryStore::new());
        let client = client_for(&server, &store);
        let mut out = Vec::new();

        let err = request(&client, "POST", "/api/tickets/", Some("{oops"), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("valid JSON"));
    }
}
