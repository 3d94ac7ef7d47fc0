use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error};

use crate::address;
use crate::mailer::{DeliveryStatus, DispatchRecord, Envelope, Mailer, MailerError, MailgunConfig};

const BASIC_AUTH_USER: &str = "api";

pub struct MailgunProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    status_timeout: Duration,
}

impl MailgunProvider {
    pub fn new(config: &MailgunConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            // Values a Duration cannot hold collapse to a zero poll window
            status_timeout: Duration::try_from_secs_f64(config.status_timeout_seconds)
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    event: Option<String>,
}

fn map_event(event: &str) -> DeliveryStatus {
    match event {
        "rejected" => DeliveryStatus::Processing,
        "failed" => DeliveryStatus::Failed,
        "accepted" => DeliveryStatus::Accepted,
        "delivered" => DeliveryStatus::Sent,
        "complained" => DeliveryStatus::Sent,
        _ => DeliveryStatus::Unknown,
    }
}

#[async_trait]
impl Mailer for MailgunProvider {
    async fn send_message(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<DispatchRecord>, MailerError> {
        debug!(
            "Sending message via Mailgun to {} recipients",
            envelope.recipient_count()
        );

        // Recipient lists are form-encoded as repeated keys; cc and bcc are
        // omitted entirely when empty
        let mut form: Vec<(&str, &str)> = vec![
            ("from", envelope.from.as_str()),
            ("subject", envelope.subject.as_str()),
            ("text", envelope.text.as_str()),
        ];
        for to in &envelope.to {
            form.push(("to", to));
        }
        for cc in &envelope.cc {
            form.push(("cc", cc));
        }
        for bcc in &envelope.bcc {
            form.push(("bcc", bcc));
        }

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .basic_auth(BASIC_AUTH_USER, Some(&self.api_key))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Mailgun rejected the message: status {}, body {}", status, body);
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let payload: SendResponse = serde_json::from_str(&body).map_err(|e| {
            MailerError::InvalidResponse(format!("unparsable send response: {}", e))
        })?;
        let raw_id = payload.id.ok_or_else(|| {
            MailerError::InvalidResponse("send response is missing the message id".to_string())
        })?;

        // Mailgun wraps the id in angle brackets; every recipient of this
        // message shares the one id
        let message_id = raw_id.trim_matches(['<', '>']).to_string();

        let records = envelope
            .recipients()
            .map(|recipient| {
                let parsed = address::parse_address(recipient)?;
                Ok(DispatchRecord {
                    email_address: parsed.address,
                    provider_message_id: message_id.clone(),
                })
            })
            .collect::<Result<Vec<_>, MailerError>>()?;

        debug!(
            "Mailgun accepted message {} for {} recipients",
            message_id,
            records.len()
        );

        Ok(records)
    }

    async fn get_message_status(
        &self,
        record: &DispatchRecord,
    ) -> Result<Option<DeliveryStatus>, MailerError> {
        let begin = Utc::now().to_rfc2822();

        let request = self
            .client
            .get(format!("{}/events", self.base_url))
            .basic_auth(BASIC_AUTH_USER, Some(&self.api_key))
            .query(&[
                ("begin", begin.as_str()),
                ("limit", "1"),
                ("recipient", record.email_address.as_str()),
                ("message-id", record.provider_message_id.as_str()),
            ])
            .timeout(self.status_timeout);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                debug!(
                    "Mailgun status poll timed out for message {}",
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

        let payload: EventsResponse = serde_json::from_str(&body).map_err(|e| {
            MailerError::InvalidResponse(format!("unparsable events response: {}", e))
        })?;

        let status = payload
            .items
            .first()
            .and_then(|item| item.event.as_deref())
            .map(map_event)
            .unwrap_or(DeliveryStatus::Unknown);

        Ok(Some(status))
    }

    fn name(&self) -> &str {
        "mailgun"
    }
}
