use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::address;
use crate::mailer::{
    DeliveryStatus, DispatchRecord, Envelope, Mailer, MailerError, MandrillConfig,
};

pub struct MandrillProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    status_timeout: Duration,
}

impl MandrillProvider {
    pub fn new(config: &MandrillConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            status_timeout: Duration::try_from_secs_f64(config.status_timeout_seconds)
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    key: &'a str,
    message: MessagePayload<'a>,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    text: &'a str,
    subject: &'a str,
    from_email: String,
    from_name: Option<String>,
    to: Vec<RecipientPayload>,
}

#[derive(Debug, Serialize)]
struct RecipientPayload {
    email: String,
    name: Option<String>,
    #[serde(rename = "type")]
    recipient_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    email: String,
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Serialize)]
struct InfoRequest<'a> {
    key: &'a str,
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    state: Option<String>,
}

fn map_state(state: &str) -> DeliveryStatus {
    match state {
        "sent" => DeliveryStatus::Sent,
        "bounced" => DeliveryStatus::Failed,
        "rejected" => DeliveryStatus::Failed,
        _ => DeliveryStatus::Unknown,
    }
}

#[async_trait]
impl Mailer for MandrillProvider {
    async fn send_message(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<DispatchRecord>, MailerError> {
        debug!(
            "Sending message via Mandrill to {} recipients",
            envelope.recipient_count()
        );

        // Every recipient goes into the single `to` array, tagged with its
        // field of origin
        let mut recipients = Vec::with_capacity(envelope.recipient_count());
        for (field, recipient_type) in [
            (&envelope.to, "to"),
            (&envelope.cc, "cc"),
            (&envelope.bcc, "bcc"),
        ] {
            for input in field {
                let parsed = address::parse_address(input)?;
                recipients.push(RecipientPayload {
                    email: parsed.address,
                    name: parsed.display_name,
                    recipient_type,
                });
            }
        }

        let from = address::parse_address(&envelope.from)?;

        let request = SendRequest {
            key: &self.api_key,
            message: MessagePayload {
                text: &envelope.text,
                subject: &envelope.subject,
                from_email: from.address,
                from_name: from.display_name,
                to: recipients,
            },
        };

        let response = self
            .client
            .post(format!("{}/messages/send.json", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                "Mandrill rejected the message: status {}, body {}",
                status, body
            );
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let results: Vec<SendResult> = serde_json::from_str(&body).map_err(|e| {
            MailerError::InvalidResponse(format!("unparsable send response: {}", e))
        })?;

        let records: Vec<DispatchRecord> = results
            .into_iter()
            .map(|result| DispatchRecord {
                email_address: result.email,
                provider_message_id: result.id,
            })
            .collect();

        debug!("Mandrill accepted message for {} recipients", records.len());

        Ok(records)
    }

    async fn get_message_status(
        &self,
        record: &DispatchRecord,
    ) -> Result<Option<DeliveryStatus>, MailerError> {
        let request = self
            .client
            .post(format!("{}/messages/info.json", self.base_url))
            .json(&InfoRequest {
                key: &self.api_key,
                id: &record.provider_message_id,
            })
            .timeout(self.status_timeout);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                debug!(
                    "Mandrill status poll timed out for message {}",
                    record.provider_message_id
                );
                return Ok(None);
            }
            Err(e) => return Err(MailerError::Transport(e)),
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(MailerError::Transport(e)),
        };

        let payload: InfoResponse = serde_json::from_str(&body).map_err(|e| {
            MailerError::InvalidResponse(format!("unparsable info response: {}", e))
        })?;

        // The info API leaves the state field out until the message reaches
        // a delivery queue, so an absent state reads as accepted
        let status = match payload.state.as_deref() {
            Some(state) => map_state(state),
            None => DeliveryStatus::Accepted,
        };

        Ok(Some(status))
    }

    fn name(&self) -> &str {
        "mandrill"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct StubState {
        body: Arc<Mutex<Option<Value>>>,
    }

    async fn spawn_stub(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn test_provider(base_url: &str, timeout_seconds: f64) -> MandrillProvider {
        MandrillProvider::new(
            &MandrillConfig {
                base_url: base_url.to_string(),
                api_key: "md-xyz789".to_string(),
                status_timeout_seconds: timeout_seconds,
            },
            reqwest::Client::new(),
        )
    }

    fn test_envelope() -> Envelope {
        Envelope::new(
            "Mr Fox <mr.fox@mail.com>",
            vec![
                "Alice <alice@wonderland.edu>".to_string(),
                "bob@builder.org".to_string(),
            ],
            "Greetings",
            "Hello from the den",
        )
        .with_bcc(vec!["carol@example.com".to_string()])
    }

    async fn capture_send(
        State(state): State<StubState>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        *state.body.lock().unwrap() = Some(body);
        Json(json!([
            {"email": "alice@wonderland.edu", "status": "sent", "_id": "m-1"},
            {"email": "bob@builder.org", "status": "sent", "_id": "m-2"},
            {"email": "carol@example.com", "status": "sent", "_id": "m-3"}
        ]))
    }

    async fn capture_info(
        State(state): State<StubState>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        *state.body.lock().unwrap() = Some(body);
        Json(json!({"state": "sent"}))
    }

    #[tokio::test]
    async fn test_send_builds_json_payload_and_collects_records() {
        let state = StubState::default();
        let app = Router::new()
            .route("/messages/send.json", post(capture_send))
            .with_state(state.clone());
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, 2.0);
        let records = provider.send_message(&test_envelope()).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].email_address, "alice@wonderland.edu");
        assert_eq!(records[0].provider_message_id, "m-1");
        assert_eq!(records[2].email_address, "carol@example.com");
        assert_eq!(records[2].provider_message_id, "m-3");

        let body = state.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["key"], "md-xyz789");

        let message = &body["message"];
        assert_eq!(message["text"], "Hello from the den");
        assert_eq!(message["subject"], "Greetings");
        assert_eq!(message["from_email"], "mr.fox@mail.com");
        assert_eq!(message["from_name"], "Mr Fox");

        let to = message["to"].as_array().unwrap();
        assert_eq!(to.len(), 3);
        assert_eq!(to[0]["email"], "alice@wonderland.edu");
        assert_eq!(to[0]["name"], "Alice");
        assert_eq!(to[0]["type"], "to");
        assert_eq!(to[1]["email"], "bob@builder.org");
        assert_eq!(to[1]["name"], Value::Null);
        assert_eq!(to[1]["type"], "to");
        assert_eq!(to[2]["email"], "carol@example.com");
        assert_eq!(to[2]["type"], "bcc");
    }

    #[tokio::test]
    async fn test_send_error_status_is_rejected() {
        let app = Router::new().route(
            "/messages/send.json",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "no can do") }),
        );
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, 2.0);
        let err = provider.send_message(&test_envelope()).await.unwrap_err();

        match err {
            MailerError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("no can do"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_non_array_response_is_invalid() {
        let app = Router::new().route(
            "/messages/send.json",
            post(|| async { Json(json!({"status": "queued"})) }),
        );
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, 2.0);
        let err = provider.send_message(&test_envelope()).await.unwrap_err();
        assert!(matches!(err, MailerError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_status_posts_id_and_maps_state() {
        let state = StubState::default();
        let app = Router::new()
            .route("/messages/info.json", post(capture_info))
            .with_state(state.clone());
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, 2.0);
        let record = DispatchRecord {
            email_address: "alice@wonderland.edu".to_string(),
            provider_message_id: "m-1".to_string(),
        };

        let status = provider.get_message_status(&record).await.unwrap();
        assert_eq!(status, Some(DeliveryStatus::Sent));

        let body = state.body.lock().unwrap().clone().unwrap();
        assert_eq!(body["key"], "md-xyz789");
        assert_eq!(body["id"], "m-1");
    }

    #[tokio::test]
    async fn test_status_without_state_is_accepted() {
        let app = Router::new().route(
            "/messages/info.json",
            post(|| async { Json(json!({"ts": 1750000000})) }),
        );
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, 2.0);
        let record = DispatchRecord {
            email_address: "a@x.com".to_string(),
            provider_message_id: "m-9".to_string(),
        };

        let status = provider.get_message_status(&record).await.unwrap();
        assert_eq!(status, Some(DeliveryStatus::Accepted));
    }

    #[tokio::test]
    async fn test_status_timeout_returns_none() {
        let app = Router::new().route(
            "/messages/info.json",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"state": "sent"}))
            }),
        );
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, 0.1);
        let record = DispatchRecord {
            email_address: "a@x.com".to_string(),
            provider_message_id: "m-5".to_string(),
        };

        let status = provider.get_message_status(&record).await.unwrap();
        assert_eq!(status, None);
    }

    // Paused clock: the zero-width timeout window must win the race against
    // the loopback stub deterministically
    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_acts_as_zero_window() {
        let app = Router::new().route(
            "/messages/info.json",
            post(|| async { Json(json!({"state": "sent"})) }),
        );
        let base_url = spawn_stub(app).await;

        let provider = test_provider(&base_url, f64::INFINITY);
        let record = DispatchRecord {
            email_address: "a@x.com".to_string(),
            provider_message_id: "m-6".to_string(),
        };

        let status = provider.get_message_status(&record).await.unwrap();
        assert_eq!(status, None);
    }

    #[test]
    fn test_state_mapping_table() {
        assert_eq!(map_state("sent"), DeliveryStatus::Sent);
        assert_eq!(map_state("bounced"), DeliveryStatus::Failed);
        assert_eq!(map_state("rejected"), DeliveryStatus::Failed);
        assert_eq!(map_state("soft-bounce"), DeliveryStatus::Unknown);
        assert_eq!(map_state("queued"), DeliveryStatus::Unknown);
    }
}
