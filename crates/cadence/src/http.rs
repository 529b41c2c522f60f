//! HTTP Collaborators
//!
//! Device clients for a generic HTTP device bridge plus the webhook caller
//! used for lock hooks, the abort webhook and custom HTTP accessories.
//!
//! Bridge endpoints:
//!
//! ```text
//! POST {base}/{class}/{target}/trigger   {"intensity": 25, "duration": 1}
//! GET  {base}/sensor/{target}            {"open": false}
//! GET  {base}/switch/{target}            {"on": true}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use cadence_runtime::{
    Actuator, ContactReading, ContactSensor, DeviceClients, DeviceError, DeviceResult,
    SwitchReading, SwitchSensor, TriggerParams, WebhookCaller,
};
use cadence_types::{
    ContactSensorConfig, DeviceClass, DeviceConfig, HttpMethod, KillswitchConfig,
};

/// Sent with every outbound request; some accessory hubs reject unknown agents
pub const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (compatible; cadence/",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn classify(error: reqwest::Error) -> DeviceError {
    if error.is_timeout() {
        DeviceError::Timeout
    } else if error.is_connect() {
        DeviceError::Unreachable(error.to_string())
    } else if error.is_decode() {
        DeviceError::Rejected(format!("unexpected response: {}", error))
    } else {
        DeviceError::Other(error.to_string())
    }
}

fn check_status(response: reqwest::Response) -> DeviceResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DeviceError::Rejected(format!("HTTP {}", status.as_u16())))
    }
}

fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook
// ─────────────────────────────────────────────────────────────────────────────

/// Plain HTTP caller; success means a 2xx response
#[derive(Clone)]
pub struct HttpWebhook {
    client: reqwest::Client,
}

impl HttpWebhook {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }

    fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookCaller for HttpWebhook {
    async fn invoke(
        &self,
        url: &str,
        method: HttpMethod,
        payload: Option<&str>,
    ) -> DeviceResult<()> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
        };

        if let Some(body) = payload.filter(|b| !b.trim().is_empty()) {
            // JSON bodies get a JSON content type; anything else is sent raw
            request = match serde_json::from_str::<serde_json::Value>(body) {
                Ok(value) => request.json(&value),
                Err(_) => request.body(body.to_string()),
            };
        }

        let response = request.send().await.map_err(classify)?;
        check_status(response)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Devices
// ─────────────────────────────────────────────────────────────────────────────

struct BridgeActuator {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl Actuator for BridgeActuator {
    async fn trigger(&self, params: TriggerParams) -> DeviceResult<()> {
        let mut body = json!({ "duration": params.duration_secs });
        if let Some(intensity) = params.intensity {
            body["intensity"] = json!(intensity);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;
        check_status(response)?;
        Ok(())
    }
}

/// Accessory fired by calling its own URL
struct CustomHttpActuator {
    webhook: HttpWebhook,
    url: String,
    method: HttpMethod,
    payload: Option<String>,
}

#[async_trait]
impl Actuator for CustomHttpActuator {
    async fn trigger(&self, _params: TriggerParams) -> DeviceResult<()> {
        self.webhook
            .invoke(&self.url, self.method, self.payload.as_deref())
            .await
    }
}

#[derive(Deserialize)]
struct ContactStatus {
    open: bool,
}

struct BridgeContactSensor {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl ContactSensor for BridgeContactSensor {
    async fn read(&self) -> DeviceResult<ContactReading> {
        let response = self.client.get(&self.url).send().await.map_err(classify)?;
        let status: ContactStatus = check_status(response)?.json().await.map_err(classify)?;
        Ok(if status.open {
            ContactReading::Open
        } else {
            ContactReading::Closed
        })
    }
}

#[derive(Deserialize)]
struct SwitchStatus {
    on: bool,
}

struct BridgeSwitch {
    client: reqwest::Client,
    url: String,
}

#[async_trait]
impl SwitchSensor for BridgeSwitch {
    async fn read(&self) -> DeviceResult<SwitchReading> {
        let response = self.client.get(&self.url).send().await.map_err(classify)?;
        let status: SwitchStatus = check_status(response)?.json().await.map_err(classify)?;
        Ok(if status.on {
            SwitchReading::On
        } else {
            SwitchReading::Off
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Clients
// ─────────────────────────────────────────────────────────────────────────────

/// [`DeviceClients`] backed by the HTTP device bridge
pub struct BridgeClients {
    base_url: String,
    client: reqwest::Client,
}

impl BridgeClients {
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn trigger_url(&self, class: DeviceClass, target: &str) -> String {
        format!("{}/{}/{}/trigger", self.base_url, class.as_str(), target)
    }

    fn sensor_url(&self, target: &str) -> String {
        format!("{}/sensor/{}", self.base_url, target)
    }

    fn switch_url(&self, target: &str) -> String {
        format!("{}/switch/{}", self.base_url, target)
    }
}

fn require_target(target: &str, what: &str) -> DeviceResult<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(DeviceError::NotConfigured(format!("{} has no target", what)));
    }
    Ok(target.to_string())
}

#[async_trait]
impl DeviceClients for BridgeClients {
    async fn actuator(&self, device: &DeviceConfig) -> DeviceResult<Arc<dyn Actuator>> {
        let key = device.key();
        let target = require_target(&device.target, &key.to_string())?;

        if device.class == DeviceClass::CustomHttp {
            return Ok(Arc::new(CustomHttpActuator {
                webhook: HttpWebhook::from_client(self.client.clone()),
                url: target,
                method: device.method,
                payload: device.payload.clone(),
            }));
        }

        Ok(Arc::new(BridgeActuator {
            client: self.client.clone(),
            url: self.trigger_url(device.class, &target),
        }))
    }

    async fn contact_sensor(
        &self,
        sensor: &ContactSensorConfig,
    ) -> DeviceResult<Arc<dyn ContactSensor>> {
        let target = require_target(&sensor.target, &sensor.display_name())?;
        Ok(Arc::new(BridgeContactSensor {
            client: self.client.clone(),
            url: self.sensor_url(&target),
        }))
    }

    async fn switch(&self, killswitch: &KillswitchConfig) -> DeviceResult<Arc<dyn SwitchSensor>> {
        let target = require_target(&killswitch.target, "Killswitch")?;
        Ok(Arc::new(BridgeSwitch {
            client: self.client.clone(),
            url: self.switch_url(&target),
        }))
    }
}
