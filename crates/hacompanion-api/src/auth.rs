use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Where and how to reach a Home Assistant instance.
///
/// The webhook id is issued by the server when the device registers with
/// the `mobile_app` integration; it authorizes webhook calls on its own.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Base URL of the instance (e.g. `https://ha.example.com:8123`).
    pub base_url: Url,
    /// Webhook id assigned at device registration.
    pub webhook_id: String,
    /// Cloudhook URL, preferred over the base URL for webhook calls when set.
    pub cloudhook_url: Option<Url>,
}

impl ConnectionInfo {
    pub fn new(base_url: Url, webhook_id: impl Into<String>) -> Self {
        Self {
            base_url,
            webhook_id: webhook_id.into(),
            cloudhook_url: None,
        }
    }

    /// The URL webhook payloads are posted to.
    ///
    /// A configured cloudhook wins; otherwise the local
    /// `/api/webhook/{id}` endpoint of the base URL is used.
    pub fn webhook_url(&self) -> Result<Url, url::ParseError> {
        if let Some(ref cloudhook) = self.cloudhook_url {
            return Ok(cloudhook.clone());
        }
        self.base_url
            .join(&format!("api/webhook/{}", self.webhook_id))
    }

    /// Resolve a URL string from a notification against the instance.
    ///
    /// Relative paths (`/lovelace/0`) and absolute URLs on the same host
    /// stay inside the app; anything else returns `None` and should be
    /// opened externally.
    pub fn webview_url(&self, raw: &str) -> Option<Url> {
        if raw.starts_with('/') {
            return self.base_url.join(raw.trim_start_matches('/')).ok();
        }
        let url = Url::parse(raw).ok()?;
        (url.host_str() == self.base_url.host_str() && url.port_or_known_default()
            == self.base_url.port_or_known_default())
        .then_some(url)
    }
}

/// Long-lived access token used for REST calls.
#[derive(Clone)]
pub struct TokenInfo {
    pub access_token: SecretString,
}

impl TokenInfo {
    pub fn new(access_token: SecretString) -> Self {
        Self { access_token }
    }

    /// The `Authorization` header value.
    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl std::fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenInfo")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}
