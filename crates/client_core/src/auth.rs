//! Sessions issued by the identity provider and OAuth redirect handling.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use url::{form_urlencoded, Url};

/// Sessions are refreshed this long before the provider would reject them.
const EXPIRY_SKEW_SECS: i64 = 30;

/// Parameters the provider appends to the redirect URL after an OAuth login.
const OAUTH_REDIRECT_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "expires_in",
    "expires_at",
    "token_type",
    "provider_token",
    "provider_refresh_token",
    "type",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
}

impl Session {
    /// Builds a session from a bare access token, filling user and expiry
    /// from the JWT claims when they decode.
    pub fn from_access_token(access_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let claims = decode_claims(&access_token);
        Self {
            expires_at: claims
                .as_ref()
                .and_then(|claims| claims.exp)
                .and_then(|exp| Utc.timestamp_opt(exp, 0).single()),
            user_id: claims
                .as_ref()
                .and_then(|claims| claims.sub.as_deref())
                .and_then(|sub| sub.parse().ok()),
            email: claims.and_then(|claims| claims.email),
            access_token,
            refresh_token: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now + Duration::seconds(EXPIRY_SKEW_SECS) >= expires_at)
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

fn decode_claims(token: &str) -> Option<JwtClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[derive(Debug, Serialize)]
pub(crate) struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: UserId,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_session(self, now: DateTime<Utc>) -> Session {
        let mut session = Session::from_access_token(self.access_token);
        session.refresh_token = self.refresh_token;
        if let Some(expires_at) = self.expires_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        {
            session.expires_at = Some(expires_at);
        } else if let Some(expires_in) = self.expires_in {
            session.expires_at = Some(now + Duration::seconds(expires_in));
        }
        if let Some(user) = self.user {
            session.user_id = Some(user.id);
            session.email = user.email.or(session.email);
        }
        session
    }
}

/// Removes the provider's token parameters from a post-login redirect URL.
///
/// Returns the cleaned URL and, when an `access_token` was present, the
/// session it describes. Parameters are read from the fragment first and
/// then the query string.
pub fn strip_oauth_redirect(raw: &str, now: DateTime<Utc>) -> Result<(String, Option<Session>)> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid redirect url: {raw}"))?;
    let mut found: Vec<(String, String)> = Vec::new();

    let fragment = url.fragment().map(str::to_string);
    if let Some(fragment) = fragment.filter(|fragment| fragment.contains('=')) {
        let (kept, stripped) = partition_params(&fragment);
        found.extend(stripped);
        url.set_fragment(if kept.is_empty() { None } else { Some(&kept) });
    }

    let query = url.query().map(str::to_string);
    if let Some(query) = query {
        let (kept, stripped) = partition_params(&query);
        found.extend(stripped);
        url.set_query(if kept.is_empty() { None } else { Some(&kept) });
    }

    let lookup = |key: &str| {
        found
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    };

    let Some(access_token) = lookup("access_token") else {
        return Ok((url.to_string(), None));
    };
    if access_token.trim().is_empty() {
        return Err(anyhow!("redirect carried an empty access_token"));
    }

    let response = TokenResponse {
        access_token,
        refresh_token: lookup("refresh_token"),
        expires_in: lookup("expires_in").and_then(|value| value.parse().ok()),
        expires_at: lookup("expires_at").and_then(|value| value.parse().ok()),
        user: None,
    };
    Ok((url.to_string(), Some(response.into_session(now))))
}

fn partition_params(raw: &str) -> (String, Vec<(String, String)>) {
    let mut kept = form_urlencoded::Serializer::new(String::new());
    let mut stripped = Vec::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        if OAUTH_REDIRECT_PARAMS.contains(&key.as_ref()) {
            stripped.push((key.into_owned(), value.into_owned()));
        } else {
            kept.append_pair(&key, &value);
        }
    }
    (kept.finish(), stripped)
}
