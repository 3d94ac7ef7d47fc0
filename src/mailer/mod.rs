pub mod config;
pub mod dispatch;
pub mod error;
pub mod providers;
pub mod types;

pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// A single delivery provider. Implementations normalize their own wire
/// formats and status vocabulary into the canonical types, so callers never
/// see provider-specific shapes.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Submits the envelope and returns one record per resolved recipient.
    async fn send_message(&self, envelope: &Envelope) -> Result<Vec<DispatchRecord>, MailerError>;

    /// Polls the provider for the current delivery status of one record.
    /// `Ok(None)` means the provider could not answer in time and the caller
    /// should ask again later.
    async fn get_message_status(
        &self,
        record: &DispatchRecord,
    ) -> Result<Option<DeliveryStatus>, MailerError>;

    fn name(&self) -> &str;
}

pub type DynMailer = Arc<dyn Mailer>;

pub fn create_provider(config: &ProviderConfig, client: reqwest::Client) -> DynMailer {
    match config {
        ProviderConfig::Mailgun(mailgun_config) => Arc::new(
            providers::mailgun::MailgunProvider::new(mailgun_config, client),
        ),
        ProviderConfig::Mandrill(mandrill_config) => Arc::new(
            providers::mandrill::MandrillProvider::new(mandrill_config, client),
        ),
    }
}
