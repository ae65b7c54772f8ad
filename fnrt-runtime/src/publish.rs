use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("no event broker address configured")]
    NoBroker,
    #[error("publish request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Structured CloudEvents envelope for outbound delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CloudEventEnvelope {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: String,
    pub time: String,
    pub datacontenttype: String,
    pub data: Value,
}

/// One-shot outbound CloudEvent delivery to the configured broker address.
/// Superseded by routing events through the platform; kept for functions
/// that still call the old helpers.
#[derive(Clone)]
pub struct EventPublisher {
    client: reqwest::Client,
    broker_addr: Option<String>,
}

impl EventPublisher {
    pub fn new(broker_addr: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            broker_addr,
        }
    }

    #[deprecated(note = "deliver events through the platform event mesh")]
    pub fn build_cloudevent(
        event_type: &str,
        source: &str,
        data: Value,
    ) -> CloudEventEnvelope {
        CloudEventEnvelope {
            specversion: "1.0".to_string(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            time: chrono::Utc::now().to_rfc3339(),
            datacontenttype: "application/json".to_string(),
            data,
        }
    }

    /// POST a CloudEvent to the broker. Never fails synchronously: every
    /// error, including a missing broker address, surfaces only through the
    /// returned future, which the caller may await or drop.
    #[deprecated(note = "deliver events through the platform event mesh")]
    pub fn publish(
        &self,
        envelope: CloudEventEnvelope,
    ) -> impl Future<Output = Result<(), PublishError>> + Send + 'static {
        let client = self.client.clone();
        let broker_addr = self.broker_addr.clone();
        async move {
            let addr = broker_addr.ok_or(PublishError::NoBroker)?;
            let resp = client
                .post(&addr)
                .header(
                    http::header::CONTENT_TYPE,
                    "application/cloudevents+json",
                )
                .json(&envelope)
                .send()
                .await?;
            resp.error_for_status()?;
            Ok(())
        }
    }
}
