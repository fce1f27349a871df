//! Supabase (GoTrue) passwordless auth client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{AuthError, AuthProvider, AuthResult, AuthSession, AuthUser};
use crate::util::{normalize_text_option, unix_timestamp_now};

#[derive(Clone)]
pub struct SupabaseAuthClient {
    auth_url: String,
    anon_key: String,
    client: Client,
}

impl SupabaseAuthClient {
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }

        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    async fn send_expecting_success(&self, request: RequestBuilder) -> AuthResult<()> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(())
    }

    async fn send_auth_request(&self, request: RequestBuilder) -> AuthResult<SupabaseAuthResponse> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<SupabaseAuthResponse>().await?)
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthClient {
    async fn send_challenge(&self, identifier: &str) -> AuthResult<()> {
        let payload = serde_json::json!({
            "email": identifier,
            "create_user": true,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/otp", self.auth_url))
                .json(&payload),
        );
        self.send_expecting_success(request).await
    }

    async fn verify_challenge(&self, identifier: &str, token: &str) -> AuthResult<AuthSession> {
        if token.trim().is_empty() {
            return Err(AuthError::Api("Verification token is required".to_string()));
        }

        let payload = serde_json::json!({
            "type": "email",
            "email": identifier,
            "token": token.trim(),
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/verify", self.auth_url))
                .json(&payload),
        );
        let response = self.send_auth_request(request).await?;
        response.into_session()?.ok_or_else(|| {
            AuthError::Api("Verify response did not include an active session".to_string())
        })
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );
        let response = self.send_auth_request(request).await?;
        response.into_session()?.ok_or_else(|| {
            AuthError::Api("Refresh response did not include an active session".to_string())
        })
    }

    async fn sign_out(&self, access_token: &str) -> AuthResult<()> {
        let request = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token);

        let response = request.send().await?;
        if !(response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED) {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(())
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

pub fn resolve_optional_supabase_config(
    url: Option<String>,
    anon_key: Option<String>,
) -> AuthResult<Option<(String, String)>> {
    let url = normalize_text_option(url);
    let anon_key = normalize_text_option(anon_key);

    match (url, anon_key) {
        (None, None) => Ok(None),
        (Some(url), Some(anon_key)) => Ok(Some((url, anon_key))),
        _ => Err(AuthError::NotConfigured),
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
    session: Option<SupabaseAuthResponseSession>,
}

impl SupabaseAuthResponse {
    fn into_session(self) -> AuthResult<Option<AuthSession>> {
        let nested_session = self.session;
        let access_token = self.access_token.or_else(|| {
            nested_session
                .as_ref()
                .and_then(|session| session.access_token.clone())
        });
        let refresh_token = self.refresh_token.or_else(|| {
            nested_session
                .as_ref()
                .and_then(|session| session.refresh_token.clone())
        });
        let expires_at = self
            .expires_at
            .or_else(|| {
                nested_session
                    .as_ref()
                    .and_then(|session| session.expires_at)
            })
            .or_else(|| {
                self.expires_in
                    .or_else(|| {
                        nested_session
                            .as_ref()
                            .and_then(|session| session.expires_in)
                    })
                    .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
            });
        let user = self
            .user
            .or_else(|| nested_session.and_then(|session| session.user))
            .map(Into::into);

        match (access_token, refresh_token, expires_at, user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(Some(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                }))
            }
            (None, None, None, Some(_)) => Ok(None),
            _ => Err(AuthError::Api(
                "Auth response did not include enough session fields".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponseSession {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
}

impl From<SupabaseUser> for AuthUser {
    fn from(value: SupabaseUser) -> Self {
        Self {
            id: value.id,
            email: value.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_auth_url_appends_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
    }

    #[test]
    fn normalize_auth_url_keeps_existing_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co/auth/v1/").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
    }

    #[test]
    fn new_rejects_blank_anon_key() {
        let result = SupabaseAuthClient::new("https://demo.supabase.co", "  ", Duration::from_secs(1));
        assert!(matches!(result, Err(AuthError::InvalidConfiguration(_))));
    }

    #[test]
    fn resolve_optional_config_requires_both_values() {
        assert!(resolve_optional_supabase_config(None, None).unwrap().is_none());
        assert!(matches!(
            resolve_optional_supabase_config(Some("https://demo.supabase.co".to_string()), None),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn verify_response_with_nested_session_is_accepted() {
        let response: SupabaseAuthResponse = serde_json::from_str(
            r#"{
                "session": {
                    "access_token": "at",
                    "refresh_token": "rt",
                    "expires_at": 1700000000,
                    "user": {"id": "u1", "email": "a@b.com"}
                }
            }"#,
        )
        .unwrap();
        let session = response.into_session().unwrap().unwrap();
        assert_eq!(session.identity(), "a@b.com");
        assert_eq!(session.expires_at, 1_700_000_000);
    }

    #[test]
    fn response_without_session_fields_means_confirmation_required() {
        let response = SupabaseAuthResponse {
            access_token: None,
            refresh_token: None,
            expires_at: None,
            expires_in: None,
            user: Some(SupabaseUser {
                id: "user".to_string(),
                email: Some("user@example.com".to_string()),
            }),
            session: None,
        };
        assert!(response.into_session().unwrap().is_none());
    }

    #[test]
    fn parse_api_error_prefers_message_fields() {
        let rendered = parse_api_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"msg":"email rate limit exceeded"}"#,
        );
        assert_eq!(rendered, "email rate limit exceeded (429)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }
}
