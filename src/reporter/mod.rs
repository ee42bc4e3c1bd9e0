//! North-bound alert reporting
//!
//! ## Responsibilities
//!
//! - HTTP POST delivery with bounded timeouts
//! - Persistent MQTT delivery (QoS 1, no retain), connected lazily on
//!   first publish and torn down when reporting is disabled
//! - Canonical alert payload shared by both transports

use crate::config_store::{AlertRecord, ReportConfig, ReportType};
use crate::error::Result;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::Mutex;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Canonical alert payload. The preview image is deliberately blanked;
/// north-bound consumers fetch the stored image over the REST surface
/// when they need it.
pub fn alert_payload(record: &AlertRecord) -> serde_json::Value {
    let detected: serde_json::Value = serde_json::from_str(&record.detected_objects)
        .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));

    serde_json::json!({
        "id": record.id,
        "channel_id": record.channel_id,
        "channel_name": record.channel_name,
        "alert_type": record.alert_type,
        "alert_rule_name": record.alert_rule_name,
        "image_data": "",
        "confidence": record.confidence,
        "detected_objects": detected,
        "created_at": record.created_at.to_rfc3339(),
    })
}

struct MqttHandle {
    client: AsyncClient,
    driver: tokio::task::JoinHandle<()>,
    fingerprint: String,
}

impl MqttHandle {
    fn fingerprint_of(config: &ReportConfig) -> String {
        format!(
            "{}:{}:{}:{}",
            config.mqtt_broker, config.mqtt_port, config.mqtt_client_id, config.mqtt_username
        )
    }
}

/// Delivers alert payloads north-bound over HTTP or MQTT
pub struct Reporter {
    http: reqwest::Client,
    mqtt: Mutex<Option<MqttHandle>>,
}

impl Reporter {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            mqtt: Mutex::new(None),
        })
    }

    /// Deliver one alert. Returns the delivery endpoint on success so
    /// the caller can persist it alongside the report status.
    pub async fn deliver(&self, config: &ReportConfig, record: &AlertRecord) -> Result<String> {
        let payload = alert_payload(record);
        match config.report_type {
            ReportType::Http => self.deliver_http(config, &payload).await,
            ReportType::Mqtt => self.deliver_mqtt(config, &payload).await,
        }
    }

    async fn deliver_http(
        &self,
        config: &ReportConfig,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let response = self
            .http
            .post(&config.http_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::Error::Transient(format!(
                "report endpoint returned {status}"
            )));
        }
        Ok(config.http_url.clone())
    }

    async fn deliver_mqtt(
        &self,
        config: &ReportConfig,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let body = serde_json::to_vec(payload)?;
        let mut guard = self.mqtt.lock().await;

        let fingerprint = MqttHandle::fingerprint_of(config);
        let stale = guard
            .as_ref()
            .map(|h| h.fingerprint != fingerprint)
            .unwrap_or(false);
        if stale {
            if let Some(handle) = guard.take() {
                let _ = handle.client.disconnect().await;
                handle.driver.abort();
            }
        }

        if guard.is_none() {
            *guard = Some(self.connect_mqtt(config, fingerprint));
        }

        let handle = match guard.as_ref() {
            Some(h) => h,
            None => return Err(crate::Error::Internal("mqtt client missing".to_string())),
        };

        handle
            .client
            .publish(&config.mqtt_topic, QoS::AtLeastOnce, false, body)
            .await
            .map_err(|e| crate::Error::Transient(format!("mqtt publish failed: {e}")))?;

        Ok(format!(
            "mqtt://{}:{}/{}",
            config.mqtt_broker, config.mqtt_port, config.mqtt_topic
        ))
    }

    fn connect_mqtt(&self, config: &ReportConfig, fingerprint: String) -> MqttHandle {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_broker.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(MQTT_KEEP_ALIVE);
        if !config.mqtt_username.is_empty() {
            options.set_credentials(config.mqtt_username.clone(), config.mqtt_password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let broker = config.mqtt_broker.clone();
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(broker = %broker, error = %e, "MQTT event loop error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        tracing::info!(
            broker = %config.mqtt_broker,
            port = config.mqtt_port,
            "MQTT reporter connecting"
        );

        MqttHandle {
            client,
            driver,
            fingerprint,
        }
    }

    /// Drop the MQTT connection. Called when reporting is disabled;
    /// the next publish reconnects lazily.
    pub async fn teardown(&self) {
        let mut guard = self.mqtt.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.client.disconnect().await;
            handle.driver.abort();
            tracing::info!("MQTT reporter torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> AlertRecord {
        AlertRecord {
            id: 7,
            channel_id: 1,
            channel_name: "gate".to_string(),
            alert_type: "person".to_string(),
            alert_rule_id: 3,
            alert_rule_name: "intrusion".to_string(),
            image_path: "alerts/alert_1_3_1700000000.jpg".to_string(),
            image_data: "base64-preview".to_string(),
            confidence: 0.91,
            detected_objects: r#"[{"class_name":"person","confidence":0.91}]"#.to_string(),
            bbox_x: 10.0,
            bbox_y: 20.0,
            bbox_w: 30.0,
            bbox_h: 40.0,
            report_status: "pending".to_string(),
            report_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_blanks_image_and_parses_detections() {
        let payload = alert_payload(&record());
        assert_eq!(payload["image_data"], "");
        assert_eq!(payload["detected_objects"][0]["class_name"], "person");
        assert_eq!(payload["alert_rule_name"], "intrusion");
        assert_eq!(payload["id"], 7);
    }

    #[test]
    fn test_payload_tolerates_malformed_detections() {
        let mut rec = record();
        rec.detected_objects = "not json".to_string();
        let payload = alert_payload(&rec);
        assert!(payload["detected_objects"].as_array().is_some_and(Vec::is_empty));
    }

    #[test]
    fn test_mqtt_fingerprint_changes_with_broker() {
        let mut cfg = ReportConfig::default();
        cfg.mqtt_broker = "a".to_string();
        let a = MqttHandle::fingerprint_of(&cfg);
        cfg.mqtt_broker = "b".to_string();
        let b = MqttHandle::fingerprint_of(&cfg);
        assert_ne!(a, b);
    }
}
