use rand::seq::SliceRandom;
use tracing::{error, info, warn};

use crate::mailer::{DispatchError, DynMailer, Envelope, JobResult, MailerError};

/// Decides the order providers are attempted in for one dispatch.
pub trait ProviderOrdering: Send + Sync {
    fn arrange(&self, providers: &mut [DynMailer]);
}

/// Default ordering: a fresh random permutation per dispatch.
pub struct Shuffle;

impl ProviderOrdering for Shuffle {
    fn arrange(&self, providers: &mut [DynMailer]) {
        providers.shuffle(&mut rand::rng());
    }
}

/// Keeps the configured order. Used where failover priority matters more
/// than load spreading, and in tests.
pub struct InOrder;

impl ProviderOrdering for InOrder {
    fn arrange(&self, _providers: &mut [DynMailer]) {}
}

pub struct Dispatcher {
    providers: Vec<DynMailer>,
    ordering: Box<dyn ProviderOrdering>,
}

impl Dispatcher {
    pub fn new(providers: Vec<DynMailer>) -> Self {
        Self {
            providers,
            ordering: Box::new(Shuffle),
        }
    }

    pub fn with_ordering(providers: Vec<DynMailer>, ordering: Box<dyn ProviderOrdering>) -> Self {
        Self {
            providers,
            ordering,
        }
    }

    /// Looks a provider up by its stable identity, the value recorded in
    /// `JobResult::handled_by`.
    pub fn provider(&self, name: &str) -> Option<DynMailer> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
            .cloned()
    }

    /// Tries providers in the arranged order for `retries + 1` rounds,
    /// stopping at the first success. Individual provider failures are
    /// logged and survived; only full exhaustion is an error.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<JobResult, DispatchError> {
        let mut ordered = self.providers.clone();
        self.ordering.arrange(&mut ordered);

        let rounds = envelope.retries.saturating_add(1);
        let mut attempts = 0u32;

        for round in 1..=rounds {
            for provider in &ordered {
                attempts += 1;
                match provider.send_message(envelope).await {
                    Ok(records) => {
                        info!(
                            "Provider {} accepted the message for {} recipients",
                            provider.name(),
                            records.len()
                        );
                        return Ok(JobResult {
                            handled_by: provider.name().to_string(),
                            dispatch_records: records,
                        });
                    }
                    Err(MailerError::Rejected { status, .. }) => {
                        warn!(
                            "Provider {} rejected the message with status {} (round {})",
                            provider.name(),
                            status,
                            round
                        );
                    }
                    Err(MailerError::Timeout) => {
                        warn!("Provider {} timed out (round {})", provider.name(), round);
                    }
                    Err(e) => {
                        warn!(
                            "Provider {} failed to send: {} (round {})",
                            provider.name(),
                            e,
                            round
                        );
                    }
                }
            }
        }

        error!(
            "No provider accepted the message after {} attempts",
            attempts
        );
        Err(DispatchError::Exhausted { attempts })
    }
}
