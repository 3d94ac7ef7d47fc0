use axum::{
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use crate::address;
use crate::jobs::JobState;
use crate::mailer::{DeliveryStatus, Envelope};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub bcc: Option<Vec<String>>,
    pub subject: String,
    pub text: String,
    #[serde(default)]
    pub retries: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: String,
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusRequest {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: DeliveryStatus,
}

#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    InvalidAddresses(Vec<String>),
    JobNotFound,
    RecipientNotFound { id: Uuid, email: String },
    DeliveryFailed,
    StatusUnavailable,
    Internal,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::InvalidRequest(message) => write!(f, "{}", message),
            ApiError::InvalidAddresses(invalid) => {
                write!(f, "Invalid email addresses: {}", invalid.join(", "))
            }
            ApiError::JobNotFound => write!(f, "Cannot find result for supplied ID and email"),
            ApiError::RecipientNotFound { id, email } => {
                write!(
                    f,
                    "Cannot find message sent to {} during request with ID {}",
                    email, id
                )
            }
            ApiError::DeliveryFailed => {
                write!(f, "No provider was able to deliver the message")
            }
            ApiError::StatusUnavailable => {
                write!(f, "This request cannot be served right now. Please try again.")
            }
            ApiError::Internal => write!(f, "Internal server error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({"message": message}))
            }
            ApiError::InvalidAddresses(invalid) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "message": "Unable to send the message. Invalid email addresses provided",
                    "invalid_emails": invalid,
                }),
            ),
            ApiError::JobNotFound => (
                StatusCode::NOT_FOUND,
                json!({"message": "Cannot find result for supplied ID and email"}),
            ),
            ApiError::RecipientNotFound { id, email } => (
                StatusCode::NOT_FOUND,
                json!({
                    "message": format!(
                        "Cannot find message sent to {} during request with ID {}",
                        email, id
                    )
                }),
            ),
            ApiError::DeliveryFailed => (
                StatusCode::BAD_GATEWAY,
                json!({"message": "No provider was able to deliver the message"}),
            ),
            ApiError::StatusUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"message": "This request cannot be served right now. Please try again."}),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"message": "Internal server error"}),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Handler for /
/// Returns a short static page describing the two API endpoints
pub async fn index_handler(State(app_state): State<crate::AppState>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{name}</title></head>
<body>
<h1>{name}</h1>
<p>Send email through whichever configured delivery provider is available.</p>
<ul>
<li><code>POST /messages</code> with JSON <code>{{"from", "to", "cc", "bcc", "subject", "text", "retries"}}</code> queues a message and returns its job id.</li>
<li><code>POST /status</code> with JSON <code>{{"id", "email"}}</code> reports the delivery status for one recipient of a queued message.</li>
</ul>
</body>
</html>
"#,
        name = app_state.config.app.name
    ))
}

pub async fn send_message_handler(
    State(app_state): State<crate::AppState>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    if request.to.is_empty() {
        return Err(ApiError::InvalidRequest(
            "At least one to recipient is required".to_string(),
        ));
    }

    // Every address field is checked so the caller gets the complete list of
    // problems in one round trip
    let mut invalid_emails = Vec::new();
    for field in std::iter::once(&request.from)
        .chain(&request.to)
        .chain(request.cc.iter().flatten())
        .chain(request.bcc.iter().flatten())
    {
        if !address::is_valid(Some(field.as_str())) {
            invalid_emails.push(field.clone());
        }
    }
    if !invalid_emails.is_empty() {
        tracing::warn!(
            "Rejecting send request with {} invalid addresses",
            invalid_emails.len()
        );
        return Err(ApiError::InvalidAddresses(invalid_emails));
    }

    let mut envelope = Envelope::new(request.from, request.to, request.subject, request.text);
    if let Some(cc) = request.cc {
        envelope = envelope.with_cc(cc);
    }
    if let Some(bcc) = request.bcc {
        envelope = envelope.with_bcc(bcc);
    }
    if let Some(retries) = request.retries {
        envelope = envelope.with_retries(retries);
    }

    let id = app_state.jobs.create().await;
    tracing::info!(
        "Queued message job {} for {} recipients",
        id,
        envelope.recipient_count()
    );

    // The response returns as soon as the job is recorded; delivery happens
    // on its own task
    let dispatcher = app_state.dispatcher.clone();
    let jobs = app_state.jobs.clone();
    tokio::spawn(async move {
        match dispatcher.dispatch(&envelope).await {
            Ok(result) => jobs.complete(id, result).await,
            Err(e) => {
                tracing::error!("Dispatch for job {} failed: {}", id, e);
                jobs.fail(id).await;
            }
        }
    });

    let response = SendMessageResponse {
        message: "Message queued for delivery".to_string(),
        id,
    };
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

pub async fn message_status_handler(
    State(app_state): State<crate::AppState>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let parsed = address::parse_address(&request.email)
        .map_err(|_| ApiError::InvalidRequest("Invalid email address provided".to_string()))?;

    // An unparsable id cannot name a job, so it gets the same answer as an
    // unknown one
    let Ok(job_id) = Uuid::parse_str(&request.id) else {
        return Err(ApiError::JobNotFound);
    };

    let Some(record) = app_state.jobs.get(&job_id).await else {
        return Err(ApiError::JobNotFound);
    };

    match record.state {
        JobState::Pending => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Message is still being processed. Please try again later."
            })),
        )
            .into_response()),
        JobState::Failed => Err(ApiError::DeliveryFailed),
        JobState::Completed(result) => {
            let Some(dispatch_record) = result
                .dispatch_records
                .iter()
                .find(|r| r.email_address == parsed.address)
            else {
                return Err(ApiError::RecipientNotFound {
                    id: job_id,
                    email: parsed.address,
                });
            };

            let Some(provider) = app_state.dispatcher.provider(&result.handled_by) else {
                tracing::error!(
                    "Provider {} recorded for job {} is no longer configured",
                    result.handled_by,
                    job_id
                );
                return Err(ApiError::Internal);
            };

            match provider.get_message_status(dispatch_record).await {
                Ok(Some(status)) => {
                    Ok((StatusCode::OK, Json(StatusResponse { status })).into_response())
                }
                Ok(None) => Err(ApiError::StatusUnavailable),
                Err(e) => {
                    tracing::error!(
                        "Status poll via provider {} failed: {}",
                        result.handled_by,
                        e
                    );
                    Err(ApiError::Internal)
                }
            }
        }
    }
}
