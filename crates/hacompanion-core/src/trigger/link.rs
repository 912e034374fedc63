// URL-scheme invocations and universal links.

use std::borrow::Cow;
use std::collections::BTreeMap;

use url::Url;

/// Activity type of a universal link opened from the web.
pub const BROWSING_WEB_ACTIVITY: &str = "NSUserActivityTypeBrowsingWeb";

/// A URL delivered through the app's scheme, split into routing parts.
///
/// `homeassistant://call_service/light.turn_on?entity_id=light.kitchen`
/// has host `call_service`, path components `["light.turn_on"]` and query
/// `{entity_id: light.kitchen}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlInvocation {
    pub url: Url,
    /// Lowercased host; empty if the URL has none.
    pub host: String,
    pub path_components: Vec<String>,
    /// Decoded query items. A repeated key keeps its last value.
    pub query: BTreeMap<String, String>,
}

impl UrlInvocation {
    pub fn new(url: Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let path_components = url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        urlencoding::decode(s).map_or_else(|_| s.to_owned(), Cow::into_owned)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let query = url.query_pairs().into_owned().collect();
        Self {
            url,
            host,
            path_components,
            query,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Url::parse(raw).map(Self::new)
    }

    pub fn first_path_component(&self) -> Option<&str> {
        self.path_components.first().map(String::as_str)
    }
}

/// A web link handed to the app by the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniversalLink {
    pub activity_type: String,
    pub webpage_url: Option<Url>,
}

impl UniversalLink {
    pub fn browsing(url: Url) -> Self {
        Self {
            activity_type: BROWSING_WEB_ACTIVITY.to_owned(),
            webpage_url: Some(url),
        }
    }

    /// The app URL carried in the link's `url` query item.
    pub fn embedded_url(&self) -> Option<Url> {
        if self.activity_type != BROWSING_WEB_ACTIVITY {
            return None;
        }
        let raw = self
            .webpage_url
            .as_ref()?
            .query_pairs()
            .find(|(key, _)| key == "url")?
            .1
            .into_owned();
        Url::parse(&raw).ok()
    }
}
