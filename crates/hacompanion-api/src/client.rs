// Home Assistant HTTP client
//
// Wraps `reqwest::Client` with webhook envelope construction, status
// classification, and response unwrapping. Webhook calls authenticate via
// the registered webhook id; REST calls use the bearer token.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::auth::{ConnectionInfo, TokenInfo};
use crate::error::Error;
use crate::models::{
    ApiStatus, LocationUpdate, SensorState, ServerConfig, TemplateRequest, WebhookRequest,
};
use crate::transport::TransportConfig;

/// Key used for single-template renders.
const TEMPLATE_KEY: &str = "template";

/// Raw HTTP client for one Home Assistant instance.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct HassClient {
    http: reqwest::Client,
    connection: ConnectionInfo,
    token: TokenInfo,
}

impl HassClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(
        connection: ConnectionInfo,
        token: TokenInfo,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, connection, token))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, connection: ConnectionInfo, token: TokenInfo) -> Self {
        Self {
            http,
            connection,
            token,
        }
    }

    /// The connection this client targets.
    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// The instance base URL.
    pub fn base_url(&self) -> &Url {
        &self.connection.base_url
    }

    // ── Webhook operations ────────────────────────────────────────────

    /// Fire an event on the server's event bus.
    pub async fn fire_event(
        &self,
        event_type: &str,
        event_data: Map<String, Value>,
    ) -> Result<(), Error> {
        let _: Value = self
            .webhook(&WebhookRequest::FireEvent {
                event_type: event_type.to_owned(),
                event_data,
            })
            .await?;
        Ok(())
    }

    /// Call a service (`domain.service`) with the given data.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        service_data: Map<String, Value>,
    ) -> Result<(), Error> {
        let _: Value = self
            .webhook(&WebhookRequest::CallService {
                domain: domain.to_owned(),
                service: service.to_owned(),
                service_data,
            })
            .await?;
        Ok(())
    }

    /// Render a single template server-side.
    pub async fn render_template(
        &self,
        template: &str,
        variables: Map<String, Value>,
    ) -> Result<String, Error> {
        let mut templates = BTreeMap::new();
        templates.insert(
            TEMPLATE_KEY.to_owned(),
            TemplateRequest {
                template: template.to_owned(),
                variables,
            },
        );

        let response: Map<String, Value> = self
            .webhook(&WebhookRequest::RenderTemplate(templates))
            .await?;

        match response.get(TEMPLATE_KEY) {
            Some(Value::String(rendered)) => Ok(rendered.clone()),
            Some(Value::Object(obj)) if obj.contains_key("error") => Err(Error::Template {
                message: obj
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown template error")
                    .to_owned(),
            }),
            Some(other) => Ok(other.to_string()),
            None => Err(Error::Deserialization {
                message: format!("missing '{TEMPLATE_KEY}' in render_template response"),
                body: Value::Object(response).to_string(),
            }),
        }
    }

    /// Report the device location.
    pub async fn update_location(&self, update: LocationUpdate) -> Result<(), Error> {
        let _: Value = self
            .webhook(&WebhookRequest::UpdateLocation(update))
            .await?;
        Ok(())
    }

    /// Push the current value of every registered sensor.
    pub async fn update_sensor_states(&self, states: Vec<SensorState>) -> Result<(), Error> {
        if states.is_empty() {
            debug!("no sensor states to send");
            return Ok(());
        }
        let _: Value = self
            .webhook(&WebhookRequest::UpdateSensorStates(states))
            .await?;
        Ok(())
    }

    /// Fetch the server configuration (used as the connect probe).
    pub async fn get_config(&self) -> Result<ServerConfig, Error> {
        self.webhook(&WebhookRequest::GetConfig).await
    }

    // ── REST operations ───────────────────────────────────────────────

    /// `GET /api/`: verifies the token and that the API is running.
    pub async fn api_status(&self) -> Result<ApiStatus, Error> {
        let url = self.connection.base_url.join("api/")?;
        debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.token.bearer())
            .send()
            .await?;
        self.parse_response(resp).await
    }

    // ── Transport mechanics ───────────────────────────────────────────

    async fn webhook<T: DeserializeOwned>(&self, request: &WebhookRequest) -> Result<T, Error> {
        let url = self.connection.webhook_url()?;
        debug!(kind = request.kind(), "POST webhook");
        let resp = self.http.post(url).json(request).send().await?;
        self.parse_response(resp).await
    }

    async fn parse_response<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        let body = resp.text().await?;
        trace!(status = status.as_u16(), body_len = body.len(), "response");

        match status.as_u16() {
            401 | 403 => {
                return Err(Error::Authentication {
                    message: format!("server returned HTTP {}", status.as_u16()),
                });
            }
            404 | 410 => {
                return Err(Error::WebhookGone {
                    webhook_id: self.connection.webhook_id.clone(),
                });
            }
            _ if !status.is_success() => {
                return Err(Error::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }
            _ => {}
        }

        // Several webhook kinds answer with an empty body.
        let text = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

impl std::fmt::Debug for HassClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HassClient")
            .field("base_url", &self.connection.base_url.as_str())
            .field("webhook_id", &self.connection.webhook_id)
            .finish_non_exhaustive()
    }
}
