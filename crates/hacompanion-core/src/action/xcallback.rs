// x-callback-url reply handling.
//
// Callers pass `x-success`, `x-error` and `x-cancel` URLs in the query of
// an `x-callback-url` invocation. After the action settles exactly one of
// them is opened, decorated with result or error parameters.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use url::Url;

use super::Outcome;

const X_SUCCESS: &str = "x-success";
const X_ERROR: &str = "x-error";
const X_CANCEL: &str = "x-cancel";
const X_SOURCE: &str = "x-source";

/// Rejections reported to the caller's `x-error` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum XCallbackError {
    #[error("An error occurred")]
    General,
    #[error("eventName must be defined")]
    EventNameMissing,
    #[error("service (e.g. homeassistant.turn_on) must be defined")]
    ServiceMissing,
    #[error("A rendered template must be requested")]
    TemplateMissing,
}

impl XCallbackError {
    /// Numeric `errorCode`. Service and template rejections share code 2.
    pub fn code(self) -> u8 {
        match self {
            Self::General => 0,
            Self::EventNameMissing => 1,
            Self::ServiceMissing | Self::TemplateMissing => 2,
        }
    }
}

/// Reply targets extracted from an invocation's query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XCallbackUrls {
    pub success: Option<Url>,
    pub error: Option<Url>,
    pub cancel: Option<Url>,
    pub source: Option<String>,
}

impl XCallbackUrls {
    /// Remove the `x-*` keys from `query` and parse them.
    ///
    /// Unparseable reply URLs are dropped with a warning; the action still
    /// runs.
    pub fn extract(query: &mut BTreeMap<String, String>) -> Self {
        Self {
            success: take_url(query, X_SUCCESS),
            error: take_url(query, X_ERROR),
            cancel: take_url(query, X_CANCEL),
            source: query.remove(X_SOURCE),
        }
    }

    /// URL to open for a rejection detected before dispatch.
    pub fn rejection(&self, error: XCallbackError) -> Option<Url> {
        self.error_url(error.code(), &error.to_string())
    }

    /// URL to open once the action settled.
    ///
    /// On success, a result value (if any) is attached under `result_key`.
    pub fn reply(&self, outcome: &Outcome, result_key: &str) -> Option<Url> {
        match outcome {
            Outcome::Success(value) => {
                let mut url = self.success.clone()?;
                if let Some(value) = value {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    url.query_pairs_mut().append_pair(result_key, &text);
                }
                Some(url)
            }
            Outcome::Failure(err) => {
                self.error_url(XCallbackError::General.code(), &err.to_string())
            }
            Outcome::Cancelled => self.cancel.clone(),
        }
    }

    fn error_url(&self, code: u8, message: &str) -> Option<Url> {
        let mut url = self.error.clone()?;
        url.query_pairs_mut()
            .append_pair("errorCode", &code.to_string())
            .append_pair("errorMessage", message);
        Some(url)
    }
}

fn take_url(query: &mut BTreeMap<String, String>, key: &str) -> Option<Url> {
    let raw = query.remove(key)?;
    match Url::parse(&raw) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(key, raw, error = %e, "ignoring unparseable x-callback reply URL");
            None
        }
    }
}
