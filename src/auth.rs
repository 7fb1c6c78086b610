//! One-shot credential acquisition for the `user` and `admin` roles.
//!
//! Each role gets exactly one attempt per run. Any failure leaves the role
//! without a token, which downgrades the descriptors needing it to skipped.

use reqwest::{header, Client, Response, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::{evaluator::body_excerpt, suite::AuthClass};

pub const DEFAULT_USER_LOGIN_PATH: &str = "/api/auth/telegram-bot-login";
pub const DEFAULT_CAPTCHA_PATH: &str = "/api/admin/captcha";
pub const DEFAULT_ADMIN_LOGIN_PATH: &str = "/api/admin/login";
pub const DEFAULT_ADMIN_COOKIE: &str = "adminToken";

/// Test identity used for the bot-login call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLogin {
    pub path: String,
    pub telegram_id: String,
    pub first_name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminLogin {
    pub captcha_path: String,
    pub login_path: String,
    pub email: String,
    pub password: String,
    pub captcha_answer: String,
    pub cookie_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user_token: Option<String>,
    pub admin_token: Option<String>,
}

impl Credentials {
    /// Token for a role; `None` when the role has none. Unauthenticated
    /// descriptors never need one.
    pub fn token_for(&self, class: AuthClass) -> Option<&str> {
        match class {
            AuthClass::None => None,
            AuthClass::User => self.user_token.as_deref(),
            AuthClass::Admin => self.admin_token.as_deref(),
        }
    }

    pub fn availability(&self) -> CredentialAvailability {
        CredentialAvailability {
            user: self.user_token.is_some(),
            admin: self.admin_token.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CredentialAvailability {
    pub user: bool,
    pub admin: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}: {excerpt}")]
    Status {
        url: String,
        status: StatusCode,
        excerpt: String,
    },
    #[error("{url} returned a body that is not JSON")]
    NotJson { url: String },
    #[error("{url} did not report success=true")]
    Rejected { url: String },
    #[error("{url} returned no `{field}`")]
    MissingToken { url: String, field: &'static str },
}

/// Runs both logins. Roles without a configured identity are not attempted.
pub async fn acquire_credentials(
    client: &Client,
    base_url: &Url,
    user: Option<&UserLogin>,
    admin: Option<&AdminLogin>,
) -> Credentials {
    let user_token = match user {
        Some(login) => settle("user", login_user(client, base_url, login).await),
        None => {
            tracing::info!(role = "user", "no test identity configured, skipping login");
            None
        }
    };
    let admin_token = match admin {
        Some(login) => settle("admin", login_admin(client, base_url, login).await),
        None => {
            tracing::info!(role = "admin", "no admin credentials configured, skipping login");
            None
        }
    };

    Credentials {
        user_token,
        admin_token,
    }
}

fn settle(role: &str, result: Result<String, AuthError>) -> Option<String> {
    match result {
        Ok(token) => {
            tracing::info!(role, "token acquired");
            Some(token)
        }
        Err(err) => {
            tracing::warn!(role, error = %error_chain(&err), "token unavailable");
            None
        }
    }
}

fn error_chain(err: &AuthError) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = inner.source();
    }
    rendered
}

pub async fn login_user(
    client: &Client,
    base_url: &Url,
    login: &UserLogin,
) -> Result<String, AuthError> {
    let url = endpoint_url(base_url, &login.path);
    let payload = json!({
        "telegram_id": telegram_id_value(&login.telegram_id),
        "first_name": login.first_name,
        "username": login.username,
    });

    let response = client
        .post(&url)
        .json(&payload)
        .send()
        .await
        .map_err(|source| AuthError::Transport {
            url: url.clone(),
            source,
        })?;
    let body = json_body(&url, response).await?;

    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(AuthError::Rejected { url });
    }
    string_field(&body, "authToken")
        .or_else(|| string_field(&body, "token"))
        .ok_or(AuthError::MissingToken {
            url,
            field: "authToken",
        })
}

pub async fn login_admin(
    client: &Client,
    base_url: &Url,
    login: &AdminLogin,
) -> Result<String, AuthError> {
    let captcha_url = endpoint_url(base_url, &login.captcha_path);
    let captcha_response = client
        .get(&captcha_url)
        .send()
        .await
        .map_err(|source| AuthError::Transport {
            url: captcha_url.clone(),
            source,
        })?;
    // The captcha may be bound to a session cookie; hand it back on login.
    let session_cookie = cookie_header(&captcha_response);
    let captcha = json_body(&captcha_url, captcha_response).await?;
    let captcha_token = string_field(&captcha, "token").ok_or(AuthError::MissingToken {
        url: captcha_url,
        field: "token",
    })?;

    let login_url = endpoint_url(base_url, &login.login_path);
    let mut request = client.post(&login_url).json(&json!({
        "email": login.email,
        "password": login.password,
        "captcha": login.captcha_answer,
        "captchaToken": captcha_token,
    }));
    if let Some(cookie) = session_cookie {
        request = request.header(header::COOKIE, cookie);
    }

    let response = request
        .send()
        .await
        .map_err(|source| AuthError::Transport {
            url: login_url.clone(),
            source,
        })?;
    let cookie_token = response
        .cookies()
        .find(|cookie| cookie.name() == login.cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());
    let body = json_body(&login_url, response).await?;

    if body.get("success").and_then(Value::as_bool) != Some(true) {
        return Err(AuthError::Rejected { url: login_url });
    }
    string_field(&body, "token")
        .or(cookie_token)
        .ok_or(AuthError::MissingToken {
            url: login_url,
            field: "token",
        })
}

/// Joins a path onto the base URL, keeping any path prefix the base carries.
/// A query or fragment on the base is dropped.
pub fn endpoint_url(base_url: &Url, path: &str) -> String {
    let mut base = base_url.clone();
    base.set_query(None);
    base.set_fragment(None);
    format!("{}{}", base.as_str().trim_end_matches('/'), path)
}

async fn json_body(url: &str, response: Response) -> Result<Value, AuthError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|source| AuthError::Transport {
            url: url.to_string(),
            source,
        })?;
    if !status.is_success() {
        return Err(AuthError::Status {
            url: url.to_string(),
            status,
            excerpt: body_excerpt(&bytes, 200),
        });
    }
    serde_json::from_slice(&bytes).map_err(|_| AuthError::NotJson {
        url: url.to_string(),
    })
}

fn cookie_header(response: &Response) -> Option<String> {
    let pairs = response
        .cookies()
        .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
        .collect::<Vec<_>>();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

fn string_field(body: &Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Numeric ids go out as JSON numbers, anything else as a string.
fn telegram_id_value(raw: &str) -> Value {
    raw.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    fn user_login() -> UserLogin {
        UserLogin {
            path: DEFAULT_USER_LOGIN_PATH.to_string(),
            telegram_id: "1622907369".to_string(),
            first_name: "Test User".to_string(),
            username: "test_user".to_string(),
        }
    }

    fn admin_login() -> AdminLogin {
        AdminLogin {
            captcha_path: DEFAULT_CAPTCHA_PATH.to_string(),
            login_path: DEFAULT_ADMIN_LOGIN_PATH.to_string(),
            email: "admin@example.test".to_string(),
            password: "secret".to_string(),
            captcha_answer: "test".to_string(),
            cookie_name: DEFAULT_ADMIN_COOKIE.to_string(),
        }
    }

    fn base(server: &MockServer) -> Url {
        Url::parse(&server.base_url()).unwrap()
    }

    #[test]
    fn endpoint_url_keeps_base_prefix() {
        let base = Url::parse("https://shop.example/prefix/").unwrap();
        assert_eq!(endpoint_url(&base, "/health"), "https://shop.example/prefix/health");
    }

    #[test]
    fn endpoint_url_drops_base_query_and_fragment() {
        let base = Url::parse("https://shop.example/api/?a=b#top").unwrap();
        assert_eq!(endpoint_url(&base, "/health"), "https://shop.example/api/health");
    }

    #[test]
    fn telegram_id_value_prefers_numbers() {
        assert_eq!(telegram_id_value("42"), json!(42));
        assert_eq!(telegram_id_value("abc"), json!("abc"));
    }

    #[test]
    fn token_for_matches_role() {
        let credentials = Credentials {
            user_token: Some("u".to_string()),
            admin_token: None,
        };
        assert_eq!(credentials.token_for(AuthClass::User), Some("u"));
        assert_eq!(credentials.token_for(AuthClass::Admin), None);
        assert_eq!(
            credentials.availability(),
            CredentialAvailability {
                user: true,
                admin: false
            }
        );
    }

    #[tokio::test]
    async fn user_login_reads_auth_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path(DEFAULT_USER_LOGIN_PATH)
                .json_body(json!({
                    "telegram_id": 1622907369u64,
                    "first_name": "Test User",
                    "username": "test_user"
                }));
            then.status(200)
                .json_body(json!({"success": true, "authToken": "user-token"}));
        });

        let token = login_user(&Client::new(), &base(&server), &user_login())
            .await
            .unwrap();
        assert_eq!(token, "user-token");
        mock.assert();
    }

    #[tokio::test]
    async fn user_login_requires_explicit_success() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(DEFAULT_USER_LOGIN_PATH);
            then.status(200).json_body(json!({"authToken": "user-token"}));
        });

        let err = login_user(&Client::new(), &base(&server), &user_login())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected { .. }));
    }

    #[tokio::test]
    async fn user_login_failure_status_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(DEFAULT_USER_LOGIN_PATH);
            then.status(403).body("forbidden");
        });

        let err = login_user(&Client::new(), &base(&server), &user_login())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Status { status, .. } if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn admin_login_prefers_body_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(DEFAULT_CAPTCHA_PATH);
            then.status(200)
                .header("set-cookie", "sid=abc; Path=/")
                .json_body(json!({"token": "captcha-1", "svg": "<svg/>"}));
        });
        let login = server.mock(|when, then| {
            when.method(POST)
                .path(DEFAULT_ADMIN_LOGIN_PATH)
                .header("cookie", "sid=abc")
                .json_body(json!({
                    "email": "admin@example.test",
                    "password": "secret",
                    "captcha": "test",
                    "captchaToken": "captcha-1"
                }));
            then.status(200)
                .json_body(json!({"success": true, "token": "admin-token"}));
        });

        let token = login_admin(&Client::new(), &base(&server), &admin_login())
            .await
            .unwrap();
        assert_eq!(token, "admin-token");
        login.assert();
    }

    #[tokio::test]
    async fn admin_login_falls_back_to_cookie() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(DEFAULT_CAPTCHA_PATH);
            then.status(200).json_body(json!({"token": "captcha-1"}));
        });
        server.mock(|when, then| {
            when.method(POST).path(DEFAULT_ADMIN_LOGIN_PATH);
            then.status(200)
                .header("set-cookie", "adminToken=from-cookie; HttpOnly; Path=/")
                .json_body(json!({"success": true}));
        });

        let token = login_admin(&Client::new(), &base(&server), &admin_login())
            .await
            .unwrap();
        assert_eq!(token, "from-cookie");
    }

    #[tokio::test]
    async fn admin_login_without_captcha_token_fails() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(DEFAULT_CAPTCHA_PATH);
            then.status(200).json_body(json!({"svg": "<svg/>"}));
        });

        let err = login_admin(&Client::new(), &base(&server), &admin_login())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingToken { field: "token", .. }));
    }

    #[tokio::test]
    async fn acquire_credentials_downgrades_failures_to_absent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(DEFAULT_USER_LOGIN_PATH);
            then.status(200)
                .json_body(json!({"success": true, "authToken": "user-token"}));
        });
        server.mock(|when, then| {
            when.method(GET).path(DEFAULT_CAPTCHA_PATH);
            then.status(500).body("boom");
        });

        let credentials = acquire_credentials(
            &Client::new(),
            &base(&server),
            Some(&user_login()),
            Some(&admin_login()),
        )
        .await;
        assert_eq!(credentials.user_token.as_deref(), Some("user-token"));
        assert_eq!(credentials.admin_token, None);
    }

    #[tokio::test]
    async fn acquire_credentials_skips_unconfigured_roles() {
        let base = Url::parse("http://127.0.0.1:9").unwrap();
        let credentials = acquire_credentials(&Client::new(), &base, None, None).await;
        assert_eq!(credentials, Credentials::default());
    }
}
