//! AngelOne session management.
//!
//! SmartAPI requires a block of client-identification headers on *every*
//! request - authenticated or not - in addition to the JWT bearer token.
//! Login is a single `loginByPassword` call (client code + PIN + TOTP);
//! refresh goes through `renewToken` with the refresh token and falls back
//! to a full login when renewal fails. Manual mode adopts a pre-obtained
//! JWT from config.
//!
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::totp;
use crate::config::Config;
use crate::error::{DalalError, Result};
use crate::http::{HttpTransport, RequestBody};
use crate::models::enums::AuthMode;
use crate::session::{FileSessionStore, MemorySessionStore, SessionData, SessionStore};

// SmartAPI accepts placeholder values for the client network headers.
const LOCAL_IP: &str = "127.0.0.1";
const PUBLIC_IP: &str = "106.193.147.210";
const MAC_ADDRESS: &str = "00:00:00:00:00:00";

pub(crate) struct AngelOneAuth {
    api_key: Secret<String>,
    mode: AuthMode,
    config: Config,
    api_base: String,
    store: Box<dyn SessionStore>,
    session: RwLock<Option<SessionData>>,
}

impl AngelOneAuth {
    pub(crate) fn new(config: &Config, mode: AuthMode, api_base: String) -> Result<Self> {
        let api_key = config.require_secret(super::BROKER_ID, "api_key")?;
        let store: Box<dyn SessionStore> = if config.get_bool("cache_session") {
            Box::new(FileSessionStore::default())
        } else {
            Box::new(MemorySessionStore::new())
        };
        Ok(Self {
            api_key,
            mode,
            config: config.clone(),
            api_base,
            store,
            session: RwLock::new(None),
        })
    }

    pub(crate) async fn login(&self, transport: &HttpTransport) -> Result<()> {
        let mut slot = self.session.write().await;
        if let Some(cached) = self.store.load(super::BROKER_ID) {
            if !cached.is_expired() {
                debug!(
                    "[angelone] using cached session (expires {})",
                    cached.expires_at
                );
                *slot = Some(cached);
                return Ok(());
            }
        }

        let session = match self.mode {
            AuthMode::Manual => self.login_manual()?,
            AuthMode::Auto => self.login_auto(transport).await?,
        };
        self.store.save(super::BROKER_ID, &session);
        *slot = Some(session);
        Ok(())
    }

    /// Renew via `renewToken`; any failure falls back to a full login. The
    /// write guard is held across the whole renew-then-fallback sequence so
    /// a concurrent fresh login cannot race it.
    pub(crate) async fn refresh(&self, transport: &HttpTransport) -> Result<()> {
        let mut slot = self.session.write().await;

        if self.mode == AuthMode::Manual {
            // The user may have rotated the configured token.
            let session = self.login_manual()?;
            self.store.save(super::BROKER_ID, &session);
            *slot = Some(session);
            return Ok(());
        }

        let renewal = match slot.as_ref() {
            Some(session) => self.renew(transport, session).await,
            None => Err(DalalError::auth("no session to renew")),
        };
        let session = match renewal {
            Ok(session) => session,
            Err(e) => {
                warn!("[angelone] token refresh failed: {}. Attempting full login.", e);
                self.login_auto(transport).await?
            }
        };
        self.store.save(super::BROKER_ID, &session);
        *slot = Some(session);
        Ok(())
    }

    /// Refresh-on-use: renew if the held session has crossed midnight IST.
    /// A missing session is not refreshed - that is a caller error
    /// surfaced by [`headers`](Self::headers).
    pub(crate) async fn ensure_fresh(&self, transport: &HttpTransport) -> Result<()> {
        let expired = matches!(
            self.session.read().await.as_ref(),
            Some(session) if session.is_expired()
        );
        if expired {
            self.refresh(transport).await?;
        }
        Ok(())
    }

    /// Per-request headers built from a snapshot of the live session.
    pub(crate) async fn headers(&self) -> Result<HeaderMap> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| DalalError::auth("Not authenticated. Call login() first."))?;
        let mut headers = self.base_headers()?;
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "Bearer {}",
                session.access_token.expose_secret()
            ))?,
        );
        Ok(headers)
    }

    /// Connect-time values for the SmartStream socket: (jwt, api_key,
    /// client code, feed token).
    pub(crate) async fn stream_credentials(&self) -> Result<(String, String, String, String)> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| DalalError::auth("Not authenticated. Call login() first."))?;
        Ok((
            session.access_token.expose_secret().clone(),
            self.api_key.expose_secret().clone(),
            self.config.get_str("client_id").unwrap_or_default().to_string(),
            session
                .feed_token
                .as_ref()
                .map(|t| t.expose_secret().clone())
                .unwrap_or_default(),
        ))
    }

    /// The `X-*` client-identification block SmartAPI wants on every call.
    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("X-UserType", HeaderValue::from_static("USER"));
        headers.insert("X-SourceID", HeaderValue::from_static("WEB"));
        headers.insert("X-ClientLocalIP", HeaderValue::from_static(LOCAL_IP));
        headers.insert("X-ClientPublicIP", HeaderValue::from_static(PUBLIC_IP));
        headers.insert("X-MACAddress", HeaderValue::from_static(MAC_ADDRESS));
        headers.insert(
            "X-PrivateKey",
            HeaderValue::from_str(self.api_key.expose_secret())?,
        );
        Ok(headers)
    }

    fn login_manual(&self) -> Result<SessionData> {
        let access_token = self.config.require_str(super::BROKER_ID, "access_token")?;
        let feed_token = self.config.get_str("feed_token").map(str::to_string);
        Ok(SessionData::new(access_token, None, feed_token))
    }

    async fn login_auto(&self, transport: &HttpTransport) -> Result<SessionData> {
        let client_id = self.config.require_str(super::BROKER_ID, "client_id")?;
        let pin = self.config.require_str(super::BROKER_ID, "pin")?;
        let totp_secret = self.config.require_str(super::BROKER_ID, "totp_secret")?;

        let payload = json!({
            "clientcode": client_id,
            "password": pin,
            "totp": totp::generate(&totp_secret)?,
        });
        let url = format!(
            "{}/rest/auth/angelbroking/user/v1/loginByPassword",
            self.api_base
        );
        let (_, body) = transport
            .request_json(
                reqwest::Method::POST,
                &url,
                self.base_headers()?,
                RequestBody::Json(payload),
            )
            .await?;

        let session = Self::session_from_login(&body)
            .ok_or_else(|| {
                DalalError::auth(format!(
                    "AngelOne login failed: {}",
                    body.get("message").and_then(Value::as_str).unwrap_or("?")
                ))
            })?;
        info!("[angelone] login successful for {}", client_id);
        Ok(session)
    }

    async fn renew(&self, transport: &HttpTransport, session: &SessionData) -> Result<SessionData> {
        let refresh_token = session
            .refresh_token
            .as_ref()
            .ok_or_else(|| DalalError::auth("no refresh token on session"))?;
        let payload = json!({ "refreshToken": refresh_token.expose_secret() });
        let url = format!("{}/rest/auth/angelbroking/user/v1/renewToken", self.api_base);
        let mut headers = self.base_headers()?;
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "Bearer {}",
                session.access_token.expose_secret()
            ))?,
        );
        let (_, body) = transport
            .request_json(reqwest::Method::POST, &url, headers, RequestBody::Json(payload))
            .await?;

        Self::session_from_login(&body)
            .ok_or_else(|| DalalError::auth("AngelOne token renewal rejected"))
    }

    fn session_from_login(body: &Value) -> Option<SessionData> {
        if body.get("status") != Some(&Value::Bool(true)) {
            return None;
        }
        let data = body.get("data")?;
        let jwt = data.get("jwtToken").and_then(Value::as_str)?;
        Some(SessionData::new(
            jwt,
            data.get("refreshToken")
                .and_then(Value::as_str)
                .map(str::to_string),
            data.get("feedToken")
                .and_then(Value::as_str)
                .map(str::to_string),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_config() -> Config {
        Config::new()
            .set("api_key", "smart_key")
            .set("access_token", "jwt-token")
            .set("feed_token", "feed-token")
            .set("client_id", "A123456")
    }

    #[tokio::test]
    async fn manual_login_adopts_configured_tokens() {
        let auth =
            AngelOneAuth::new(&manual_config(), AuthMode::Manual, "http://unused".into()).unwrap();
        let transport = HttpTransport::new().unwrap();
        auth.login(&transport).await.unwrap();

        let (jwt, api_key, client_id, feed) = auth.stream_credentials().await.unwrap();
        assert_eq!(jwt, "jwt-token");
        assert_eq!(api_key, "smart_key");
        assert_eq!(client_id, "A123456");
        assert_eq!(feed, "feed-token");
    }

    #[tokio::test]
    async fn headers_carry_the_vendor_required_block() {
        let auth =
            AngelOneAuth::new(&manual_config(), AuthMode::Manual, "http://unused".into()).unwrap();
        let transport = HttpTransport::new().unwrap();
        auth.login(&transport).await.unwrap();

        let headers = auth.headers().await.unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer jwt-token");
        assert_eq!(headers.get("X-UserType").unwrap(), "USER");
        assert_eq!(headers.get("X-SourceID").unwrap(), "WEB");
        assert_eq!(headers.get("X-PrivateKey").unwrap(), "smart_key");
        assert!(headers.contains_key("X-ClientLocalIP"));
        assert!(headers.contains_key("X-ClientPublicIP"));
        assert!(headers.contains_key("X-MACAddress"));
    }

    #[test]
    fn login_response_without_status_yields_no_session() {
        let body = json!({"status": false, "message": "Invalid totp", "errorcode": "AB8050"});
        assert!(AngelOneAuth::session_from_login(&body).is_none());

        let body = json!({
            "status": true,
            "data": {"jwtToken": "jwt", "refreshToken": "r", "feedToken": "f"}
        });
        let session = AngelOneAuth::session_from_login(&body).unwrap();
        assert_eq!(session.access_token.expose_secret(), "jwt");
        assert!(session.refresh_token.is_some());
        assert!(session.feed_token.is_some());
    }
}
