use thiserror::Error;

use crate::address::AddressError;

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Invalid email address: {0}")]
    Address(#[from] AddressError),

    #[error("Provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Provider request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for MailerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            MailerError::Timeout
        } else {
            MailerError::Transport(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No provider accepted the message after {attempts} attempts")]
    Exhausted { attempts: u32 },
}
