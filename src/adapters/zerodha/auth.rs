//! Zerodha session management.
//!
//! Two modes, declared in the capability matrix:
//!
//! - **manual** (the default): the user completes Kite's daily OAuth login
//!   externally and supplies `access_token` in config. The library never
//!   performs a credential flow.
//! - **auto**: the library drives the full login itself - password step,
//!   TOTP two-factor step, the connect-session redirect chain that yields a
//!   `request_token`, and the checksummed token exchange. Kite access
//!   tokens cannot be renewed, so refresh in auto mode is a full re-login.
//!
//! Either way the resulting session expires at the next midnight IST, when
//! Zerodha invalidates all tokens.
//!
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, LOCATION};
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::adapters::totp;
use crate::config::Config;
use crate::error::{DalalError, Result};
use crate::models::enums::AuthMode;
use crate::session::{FileSessionStore, MemorySessionStore, SessionData, SessionStore};

/// Default login host for the automated flow.
pub(crate) const ZERODHA_LOGIN_BASE: &str = "https://kite.zerodha.com";

pub(crate) struct ZerodhaAuth {
    api_key: Secret<String>,
    mode: AuthMode,
    config: Config,
    login_base: String,
    api_base: String,
    store: Box<dyn SessionStore>,
    session: RwLock<Option<SessionData>>,
}

impl ZerodhaAuth {
    pub(crate) fn new(config: &Config, mode: AuthMode, api_base: String) -> Result<Self> {
        let api_key = config.require_secret(super::BROKER_ID, "api_key")?;
        let store: Box<dyn SessionStore> = if config.get_bool("cache_session") {
            Box::new(FileSessionStore::default())
        } else {
            Box::new(MemorySessionStore::new())
        };
        let login_base = config
            .get_str("login_base_url")
            .unwrap_or(ZERODHA_LOGIN_BASE)
            .to_string();
        Ok(Self {
            api_key,
            mode,
            config: config.clone(),
            login_base,
            api_base,
            store,
            session: RwLock::new(None),
        })
    }

    /// Authenticate with the configured mode, preferring an unexpired
    /// cached session - this skips a network round-trip on every restart
    /// before midnight IST.
    pub(crate) async fn login(&self) -> Result<()> {
        let mut slot = self.session.write().await;
        if let Some(cached) = self.store.load(super::BROKER_ID) {
            if !cached.is_expired() {
                debug!(
                    "[zerodha] using cached session (expires {})",
                    cached.expires_at
                );
                *slot = Some(cached);
                return Ok(());
            }
        }

        let session = match self.mode {
            AuthMode::Manual => self.login_manual()?,
            AuthMode::Auto => self.login_auto().await?,
        };
        self.store.save(super::BROKER_ID, &session);
        *slot = Some(session);
        Ok(())
    }

    /// Kite tokens cannot be renewed: auto mode re-runs the full login,
    /// manual mode re-reads config (the user may have rotated the token).
    /// The write guard is held across the whole sequence so a concurrent
    /// login cannot interleave.
    pub(crate) async fn refresh(&self) -> Result<()> {
        let mut slot = self.session.write().await;
        let session = match self.mode {
            AuthMode::Manual => self.login_manual()?,
            AuthMode::Auto => self.login_auto().await?,
        };
        self.store.save(super::BROKER_ID, &session);
        *slot = Some(session);
        Ok(())
    }

    /// Refresh-on-use: re-login if the held session has crossed midnight
    /// IST. A missing session is not refreshed - that is a caller error
    /// surfaced by [`headers`](Self::headers).
    pub(crate) async fn ensure_fresh(&self) -> Result<()> {
        let expired = matches!(
            self.session.read().await.as_ref(),
            Some(session) if session.is_expired()
        );
        if expired {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Per-request auth headers, built from a snapshot of the live session.
    /// Never share the returned map across requests - tokens rotate.
    pub(crate) async fn headers(&self) -> Result<HeaderMap> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| DalalError::auth("Not authenticated. Call login() first."))?;
        let mut headers = HeaderMap::new();
        headers.insert("X-Kite-Version", HeaderValue::from_static("3"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "token {}:{}",
                self.api_key.expose_secret(),
                session.access_token.expose_secret()
            ))?,
        );
        Ok(headers)
    }

    /// The live access token, for the ticker's connect query string.
    pub(crate) async fn access_token(&self) -> Result<String> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| DalalError::auth("Not authenticated. Call login() first."))?;
        Ok(session.access_token.expose_secret().clone())
    }

    pub(crate) fn api_key(&self) -> String {
        self.api_key.expose_secret().clone()
    }

    fn login_manual(&self) -> Result<SessionData> {
        let access_token = self.config.require_str(super::BROKER_ID, "access_token")?;
        Ok(SessionData::new(access_token, None, None))
    }

    /// The automated flow against `kite.zerodha.com`:
    ///
    /// 1. open a connect session and capture its `sess_id`,
    /// 2. password login (`client_id` + `pin`) yielding a `request_id`,
    /// 3. TOTP two-factor step,
    /// 4. walk the connect redirect chain until a `request_token` appears,
    /// 5. exchange it at `/session/token` with the SHA-256 checksum of
    ///    `api_key + request_token + api_secret`.
    async fn login_auto(&self) -> Result<SessionData> {
        let user_id = self.config.require_str(super::BROKER_ID, "client_id")?;
        let password = self.config.require_str(super::BROKER_ID, "pin")?;
        let totp_secret = self.config.require_str(super::BROKER_ID, "totp_secret")?;
        let api_secret = self.config.require_str(super::BROKER_ID, "api_secret")?;
        let api_key = self.api_key.expose_secret().clone();

        // The login hosts hand out session cookies and answer with bare
        // redirects, so this flow gets its own client.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .connect_timeout(std::time::Duration::from_secs(5))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        // Step 1: connect session id.
        let connect_url = format!("{}/connect/login?api_key={}&v=3", self.login_base, api_key);
        let response = client.get(connect_url.as_str()).send().await?;
        let mut sess_id = None;
        if response.status().is_redirection() {
            let location = self.location_url(&response)?;
            sess_id = query_param(&location, "sess_id");
            // Follow once to bind the sess_id to the cookie session.
            client.get(location).send().await?;
        }
        let sess_id = sess_id
            .ok_or_else(|| DalalError::auth("Kite connect session did not yield a sess_id"))?;

        // Step 2: password login.
        let body: Value = client
            .post(format!("{}/api/login", self.login_base))
            .form(&[("user_id", user_id.as_str()), ("password", password.as_str())])
            .send()
            .await?
            .json()
            .await?;
        if body.get("status").and_then(Value::as_str) != Some("success") {
            return Err(DalalError::auth(format!(
                "Kite login failed: {}",
                body.get("message").and_then(Value::as_str).unwrap_or("?")
            )));
        }
        let request_id = body["data"]["request_id"]
            .as_str()
            .ok_or_else(|| DalalError::auth("Kite login response without request_id"))?
            .to_string();

        // Step 3: TOTP two-factor.
        let code = totp::generate(&totp_secret)?;
        let body: Value = client
            .post(format!("{}/api/twofa", self.login_base))
            .form(&[
                ("user_id", user_id.as_str()),
                ("request_id", request_id.as_str()),
                ("twofa_value", code.as_str()),
                ("twofa_type", "totp"),
            ])
            .send()
            .await?
            .json()
            .await?;
        if body.get("status").and_then(Value::as_str) != Some("success") {
            return Err(DalalError::auth(format!(
                "Kite two-factor step failed: {}",
                body.get("message").and_then(Value::as_str).unwrap_or("?")
            )));
        }

        // Step 4: finalize the connect session and harvest request_token.
        let mut next_url = format!(
            "{}/connect/login?api_key={}&sess_id={}",
            self.login_base, api_key, sess_id
        );
        let mut request_token = None;
        for _ in 0..5 {
            let response = client.get(next_url.as_str()).send().await?;
            if !response.status().is_redirection() {
                break;
            }
            let location = self.location_url(&response)?;
            if let Some(token) = query_param(&location, "request_token") {
                request_token = Some(token);
                break;
            }
            next_url = location.to_string();
        }
        let request_token = request_token.ok_or_else(|| {
            DalalError::auth("request_token not found after Kite redirect chain")
        })?;

        // Step 5: checksummed token exchange.
        let checksum = hex::encode(Sha256::digest(format!(
            "{}{}{}",
            api_key, request_token, api_secret
        )));
        let body: Value = client
            .post(format!("{}/session/token", self.api_base))
            .header("X-Kite-Version", "3")
            .form(&[
                ("api_key", api_key.as_str()),
                ("request_token", request_token.as_str()),
                ("checksum", checksum.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        let access_token = body["data"]["access_token"]
            .as_str()
            .ok_or_else(|| {
                DalalError::auth(format!(
                    "Kite token exchange failed: {}",
                    body.get("message").and_then(Value::as_str).unwrap_or("?")
                ))
            })?
            .to_string();

        info!("[zerodha] automated login complete for {}", user_id);
        Ok(SessionData::new(access_token, None, None))
    }

    // Resolve a redirect Location header against the login base.
    fn location_url(&self, response: &reqwest::Response) -> Result<Url> {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| DalalError::auth("Kite redirect without a Location header"))?;
        Url::parse(location)
            .or_else(|_| {
                Url::parse(&self.login_base).and_then(|base| base.join(location))
            })
            .map_err(|e| DalalError::auth(format!("Unparseable Kite redirect: {}", e)))
    }
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_config() -> Config {
        Config::new()
            .set("api_key", "kite_key")
            .set("access_token", "daily_token")
    }

    #[tokio::test]
    async fn manual_login_reads_token_from_config() {
        let auth =
            ZerodhaAuth::new(&manual_config(), AuthMode::Manual, "http://unused".into()).unwrap();
        auth.login().await.unwrap();
        assert_eq!(auth.access_token().await.unwrap(), "daily_token");
        // The fresh session has not crossed midnight IST, so refresh-on-use
        // is a no-op and the token survives it.
        auth.ensure_fresh().await.unwrap();
        assert_eq!(auth.access_token().await.unwrap(), "daily_token");
    }

    #[tokio::test]
    async fn manual_login_without_token_fails_fast() {
        let config = Config::new().set("api_key", "kite_key");
        let auth = ZerodhaAuth::new(&config, AuthMode::Manual, "http://unused".into()).unwrap();
        let err = auth.login().await.unwrap_err();
        assert!(err.to_string().contains("access_token"));
    }

    #[tokio::test]
    async fn headers_carry_key_and_token() {
        let auth =
            ZerodhaAuth::new(&manual_config(), AuthMode::Manual, "http://unused".into()).unwrap();
        auth.login().await.unwrap();
        let headers = auth.headers().await.unwrap();
        assert_eq!(headers.get("X-Kite-Version").unwrap(), "3");
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap(),
            "token kite_key:daily_token"
        );
    }

    #[tokio::test]
    async fn headers_before_login_fail() {
        let auth =
            ZerodhaAuth::new(&manual_config(), AuthMode::Manual, "http://unused".into()).unwrap();
        assert!(auth.headers().await.is_err());
    }

    #[test]
    fn query_param_extraction() {
        let url = Url::parse("https://kite.zerodha.com/connect/login?sess_id=abc&v=3").unwrap();
        assert_eq!(query_param(&url, "sess_id"), Some("abc".into()));
        assert_eq!(query_param(&url, "request_token"), None);
    }
}
