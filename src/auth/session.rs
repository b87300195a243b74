use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use axum_extra::headers::authorization::{Authorization, Bearer};
use axum_extra::TypedHeader;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::api::ApiState;
use crate::auth::mailer::Mailer;
use crate::config::{MAGIC_LINK_TTL_SECS, SESSION_TTL_SECS};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::types::{now_ns, NANOS_PER_SEC};

pub const SESSION_COOKIE: &str = "session";

/// Provider name recorded for users who signed in with a magic link.
pub const EMAIL_PROVIDER: &str = "email";

// ---------------------------------------------------------------------------
// Session context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub auth_providers: Vec<String>,
}

/// Who is making a request. Passed explicitly into every action.
/// The anonymous placeholder has an empty key and an empty user id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_key: String,
    pub user: SessionUser,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.user.id.is_empty()
    }

    /// The signed-in user, or `Unauthorized`.
    pub fn require_user(&self) -> Result<&SessionUser> {
        if self.is_authenticated() {
            Ok(&self.user)
        } else {
            Err(AppError::Unauthorized)
        }
    }

    /// Id to match against ownership and votes; None when anonymous.
    pub fn user_id(&self) -> Option<&str> {
        self.is_authenticated().then_some(self.user.id.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// When true a missing or expired session is an error instead of the
    /// anonymous placeholder.
    pub redirect_unauthorized_users: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { redirect_unauthorized_users: true }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Issues and validates sessions. Magic-link tokens and session keys are only
/// ever stored as SHA-256 digests.
#[derive(Clone)]
pub struct SessionProvider {
    store: Store,
    mailer: Arc<Mailer>,
    public_url: String,
}

impl SessionProvider {
    pub fn new(store: Store, mailer: Arc<Mailer>, public_url: String) -> Self {
        Self { store, mailer, public_url }
    }

    pub async fn get_session(&self, session_key: Option<&str>, opts: SessionOptions) -> Result<Session> {
        let resolved = match session_key.filter(|k| !k.is_empty()) {
            Some(key) => self.resolve(key).await?,
            None => None,
        };
        match resolved {
            Some(session) => Ok(session),
            None if opts.redirect_unauthorized_users => Err(AppError::Unauthorized),
            None => Ok(Session::anonymous()),
        }
    }

    async fn resolve(&self, key: &str) -> Result<Option<Session>> {
        let key_hash = hash_token(key);
        let Some(row) = self.store.find_session(&key_hash).await? else {
            return Ok(None);
        };
        if row.expires_at <= now_ns() {
            self.store.delete_session(&key_hash).await?;
            return Ok(None);
        }
        let auth_providers = self.store.auth_providers(&row.user_id).await?;
        Ok(Some(Session {
            session_key: key.to_string(),
            user: SessionUser { id: row.user_id, auth_providers },
        }))
    }

    /// Create a single-use sign-in token for `email`. Returns the normalized
    /// email and the raw token.
    pub async fn issue_magic_link(&self, email: &str) -> Result<(String, String)> {
        let email = validate_email(email)?;
        let now = now_ns();
        self.store.purge_expired_auth(now).await?;
        let token = generate_token();
        let expires_at = now + MAGIC_LINK_TTL_SECS * NANOS_PER_SEC;
        self.store.insert_magic_link(&hash_token(&token), &email, expires_at).await?;
        Ok((email, token))
    }

    pub async fn send_magic_link(&self, email: &str) -> Result<()> {
        let (email, token) = self.issue_magic_link(email).await?;
        let link = format!("{}/auth/verify?token={}", self.public_url, token);
        self.mailer.send_magic_link(&email, &link).await
    }

    /// Exchange a magic-link token for a new session, creating the user on
    /// first sign-in.
    pub async fn verify_magic_link(&self, token: &str) -> Result<Session> {
        let link = self
            .store
            .consume_magic_link(&hash_token(token.trim()), now_ns())
            .await?
            .ok_or_else(|| {
                AppError::Validation("This sign-in link is invalid or has expired".to_string())
            })?;

        let user = self.store.upsert_user_by_email(&link.email).await?;
        self.store.add_auth_provider(&user.id, EMAIL_PROVIDER).await?;

        let session_key = generate_token();
        let expires_at = now_ns() + SESSION_TTL_SECS * NANOS_PER_SEC;
        self.store.insert_session(&hash_token(&session_key), &user.id, expires_at).await?;
        info!(event = "SIGN_IN", user_id = %user.id, "session created");

        let auth_providers = self.store.auth_providers(&user.id).await?;
        Ok(Session {
            session_key,
            user: SessionUser { id: user.id, auth_providers },
        })
    }

    pub async fn sign_out(&self, session_key: &str) -> Result<()> {
        self.store.delete_session(&hash_token(session_key)).await
    }
}

// ---------------------------------------------------------------------------
// Tokens, emails and cookies
// ---------------------------------------------------------------------------

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Trim and lowercase an email address, rejecting anything malformed.
pub fn validate_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let well_formed = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains("..")
            }
            None => false,
        };
    if well_formed {
        Ok(email)
    } else {
        Err(AppError::Validation("Please enter a valid email address".to_string()))
    }
}

/// Session key from the `session` cookie, else from `Authorization: Bearer`.
/// An empty value in either place counts as absent.
pub fn session_key(jar: &CookieJar, bearer: Option<&Authorization<Bearer>>) -> Option<String> {
    let non_empty = |v: &str| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    };
    jar.get(SESSION_COOKIE)
        .and_then(|c| non_empty(c.value()))
        .or_else(|| bearer.and_then(|auth| non_empty(auth.token())))
}

pub fn session_cookie(session_key: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_key.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(SESSION_TTL_SECS))
        .build()
}

/// Matches the issued cookie's name and path so the browser drops it.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// The raw session key presented with a request, if any.
pub struct SessionKey(pub Option<String>);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Infallible> {
        let jar = CookieJar::from_headers(&parts.headers);
        let bearer = Option::<TypedHeader<Authorization<Bearer>>>::from_request_parts(parts, state)
            .await
            .ok()
            .flatten();
        Ok(SessionKey(session_key(&jar, bearer.as_ref().map(|TypedHeader(auth)| auth))))
    }
}

/// The caller's session, or the anonymous placeholder. Handlers that need a
/// signed-in user call `Session::require_user`.
pub struct MaybeSession(pub Session);

#[axum::async_trait]
impl FromRequestParts<ApiState> for MaybeSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self> {
        let key = match SessionKey::from_request_parts(parts, state).await {
            Ok(SessionKey(key)) => key,
            Err(never) => match never {},
        };
        let session = state
            .sessions
            .get_session(key.as_deref(), SessionOptions { redirect_unauthorized_users: false })
            .await?;
        Ok(MaybeSession(session))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, Request};

    use crate::db::connect_in_memory;

    async fn provider() -> SessionProvider {
        let store = Store::new(connect_in_memory().await.expect("in-memory db"));
        SessionProvider::new(store, Arc::new(Mailer::Log), "http://localhost:3000".to_string())
    }

    #[test]
    fn email_validation() {
        assert_eq!(validate_email("  Me@Example.COM ").unwrap(), "me@example.com");
        for bad in ["", "no-at-sign", "@example.com", "me@", "me@example", "me@.com", "a b@example.com", "me@ex..com"] {
            assert!(validate_email(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn tokens_are_random_and_hash_is_stable() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    async fn key_for(cookie: Option<&str>, authorization: Option<&str>) -> Option<String> {
        let mut req = Request::get("/");
        if let Some(c) = cookie {
            req = req.header(header::COOKIE, c);
        }
        if let Some(a) = authorization {
            req = req.header(header::AUTHORIZATION, a);
        }
        let (mut parts, _) = req.body(()).unwrap().into_parts();
        let SessionKey(key) = SessionKey::from_request_parts(&mut parts, &()).await.unwrap();
        key
    }

    #[tokio::test]
    async fn session_key_prefers_cookie_over_bearer() {
        assert_eq!(key_for(None, Some("Bearer from-bearer")).await.as_deref(), Some("from-bearer"));
        assert_eq!(
            key_for(Some("theme=dark; session=from-cookie"), Some("Bearer from-bearer")).await.as_deref(),
            Some("from-cookie")
        );
        assert_eq!(key_for(Some("theme=dark"), None).await, None);
        assert_eq!(key_for(None, Some("Basic dXNlcjpwYXNz")).await, None);
    }

    #[tokio::test]
    async fn empty_session_cookie_falls_back_to_bearer() {
        assert_eq!(key_for(Some("session="), Some("Bearer from-bearer")).await.as_deref(), Some("from-bearer"));
        assert_eq!(key_for(Some("session="), None).await, None);
    }

    #[test]
    fn issued_cookie_is_http_only_and_site_wide() {
        let cookie = session_cookie("abc");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(SESSION_TTL_SECS)));
    }

    #[tokio::test]
    async fn missing_session_depends_on_options() {
        let provider = provider().await;
        let anon = provider
            .get_session(None, SessionOptions { redirect_unauthorized_users: false })
            .await
            .unwrap();
        assert!(!anon.is_authenticated());
        assert!(matches!(anon.require_user(), Err(AppError::Unauthorized)));

        let err = provider.get_session(Some("bogus"), SessionOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn magic_link_signs_in_once() {
        let provider = provider().await;
        let (email, token) = provider.issue_magic_link("New@Example.com").await.unwrap();
        assert_eq!(email, "new@example.com");

        let session = provider.verify_magic_link(&token).await.unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.user.auth_providers, vec![EMAIL_PROVIDER.to_string()]);

        let resolved = provider
            .get_session(Some(&session.session_key), SessionOptions::default())
            .await
            .unwrap();
        assert_eq!(resolved.user.id, session.user.id);

        assert!(matches!(provider.verify_magic_link(&token).await, Err(AppError::Validation(_))));

        // Signing in again with the same email reuses the user.
        let (_, again) = provider.issue_magic_link("new@example.com").await.unwrap();
        let second = provider.verify_magic_link(&again).await.unwrap();
        assert_eq!(second.user.id, session.user.id);
        assert_ne!(second.session_key, session.session_key);
    }

    #[tokio::test]
    async fn sign_out_invalidates_session() {
        let provider = provider().await;
        let (_, token) = provider.issue_magic_link("out@example.com").await.unwrap();
        let session = provider.verify_magic_link(&token).await.unwrap();
        provider.sign_out(&session.session_key).await.unwrap();
        let after = provider
            .get_session(Some(&session.session_key), SessionOptions { redirect_unauthorized_users: false })
            .await
            .unwrap();
        assert!(!after.is_authenticated());
    }

    #[tokio::test]
    async fn malformed_email_is_rejected_before_sending() {
        let provider = provider().await;
        assert!(matches!(provider.send_magic_link("not-an-email").await, Err(AppError::Validation(_))));
    }
}
