//! ==============================================================================
//! notify.rs - outbound webhook notifications
//! ==============================================================================
//!
//! purpose:
//!     the two json payloads the hub pushes (alarm_triggered, scheduled_update)
//!     and the sink that delivers them over http.
//!
//! delivery contract:
//!     one attempt per notification. failures are logged and dropped; the next
//!     eligible tick sends again naturally. callers update cooldown/interval
//!     timestamps before delivery, so a failure never shortens a window.
//!
//! relationships:
//!     - built by: alarms.rs, scheduler.rs
//!     - delivered from: main.rs tick loop, api.rs (webhook test)
//!
//! ==============================================================================

use crate::error::{HubError, Result};
use crate::readings::{BusSensorValue, ChannelValues};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    AlarmTriggered {
        message: String,
        sensor_id: String,
        value: f64,
        device: String,
        timestamp: u64,
    },
    ScheduledUpdate {
        webhook_name: String,
        timestamp: u64,
        #[serde(flatten)]
        channels: ChannelValues,
        ds18b20_sensors: Vec<BusSensorValue>,
    },
}

/// A notification bound for one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub url: String,
    pub payload: Notification,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, url: &str, payload: &Notification) -> Result<()>;
}

/// reqwest-backed sink. The client's timeout bounds how long a tick can block.
pub struct HttpSink {
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sensor-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationSink for HttpSink {
    async fn send(&self, url: &str, payload: &Notification) -> Result<()> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HubError::Notification(format!("{} returned {}", url, status)));
        }
        Ok(())
    }
}

/// Send every notification once, in order. Returns how many were delivered.
pub async fn deliver(sink: &dyn NotificationSink, outbound: &[Outbound]) -> usize {
    let mut delivered = 0;
    for item in outbound {
        match sink.send(&item.url, &item.payload).await {
            Ok(()) => {
                debug!("Delivered {} to {}", event_name(&item.payload), item.url);
                delivered += 1;
            }
            Err(e) => warn!("Webhook {} failed: {}", item.url, e),
        }
    }
    delivered
}

fn event_name(payload: &Notification) -> &'static str {
    match payload {
        Notification::AlarmTriggered { .. } => "alarm_triggered",
        Notification::ScheduledUpdate { .. } => "scheduled_update",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every send; fails all of them when `fail` is set.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<(String, Notification)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, url: &str, payload: &Notification) -> Result<()> {
            self.sent.lock().unwrap().push((url.to_string(), payload.clone()));
            if self.fail {
                return Err(HubError::Notification("connection refused".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_alarm_payload_shape() {
        let payload = Notification::AlarmTriggered {
            message: "Pool above maximum".into(),
            sensor_id: "pool_temp".into(),
            value: 31.2,
            device: "hub".into(),
            timestamp: 42,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["event"], "alarm_triggered");
        assert_eq!(v["sensor_id"], "pool_temp");
        assert_eq!(v["value"], 31.2);
        assert_eq!(v["device"], "hub");
    }

    #[test]
    fn test_scheduled_payload_flattens_channels() {
        let payload = Notification::ScheduledUpdate {
            webhook_name: "Cloud".into(),
            timestamp: 7,
            channels: ChannelValues {
                temperature: Some(22.0),
                humidity: None,
                light: Some(100.0),
                motion: Some(true),
            },
            ds18b20_sensors: vec![BusSensorValue {
                id: "pool".into(),
                name: "Pool".into(),
                temperature: 24.0,
            }],
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["event"], "scheduled_update");
        assert_eq!(v["webhook_name"], "Cloud");
        assert_eq!(v["temperature"], 22.0);
        assert!(v["humidity"].is_null());
        assert_eq!(v["motion"], true);
        assert_eq!(v["ds18b20_sensors"][0]["temperature"], 24.0);
    }

    #[tokio::test]
    async fn test_deliver_counts_failures_without_stopping() {
        let sink = RecordingSink { fail: true, ..Default::default() };
        let outbound = vec![
            Outbound {
                url: "http://a".into(),
                payload: Notification::AlarmTriggered {
                    message: "m".into(),
                    sensor_id: "s".into(),
                    value: 1.0,
                    device: "d".into(),
                    timestamp: 0,
                },
            };
            2
        ];
        assert_eq!(deliver(&sink, &outbound).await, 0);
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }
}
