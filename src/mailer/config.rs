use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MailConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Mailgun(MailgunConfig),
    Mandrill(MandrillConfig),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailgunConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MandrillConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_seconds: f64,
}

fn default_status_timeout() -> f64 {
    2.0
}

impl ProviderConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderConfig::Mailgun(_) => "mailgun",
            ProviderConfig::Mandrill(_) => "mandrill",
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            ProviderConfig::Mailgun(config) => &config.base_url,
            ProviderConfig::Mandrill(config) => &config.base_url,
        }
    }

    pub fn api_key(&self) -> &str {
        match self {
            ProviderConfig::Mailgun(config) => &config.api_key,
            ProviderConfig::Mandrill(config) => &config.api_key,
        }
    }

    pub fn status_timeout_seconds(&self) -> f64 {
        match self {
            ProviderConfig::Mailgun(config) => config.status_timeout_seconds,
            ProviderConfig::Mandrill(config) => config.status_timeout_seconds,
        }
    }
}
