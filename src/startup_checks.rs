use crate::Config;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum StartupCheckError {
    #[error("No delivery providers configured")]
    NoProvidersConfigured,

    #[error("Provider '{0}' has an invalid base URL: {1}")]
    InvalidBaseUrl(String, String),

    #[error("Provider '{0}' has an empty API key")]
    EmptyApiKey(String),

    #[error("Provider '{0}' has an invalid status timeout: {1}")]
    InvalidStatusTimeout(String, f64),

    #[error("Provider '{0}' is configured more than once")]
    DuplicateProvider(String),
}

pub async fn perform_startup_checks(config: &Config) -> Result<(), Vec<StartupCheckError>> {
    let mut errors = Vec::new();

    info!("Performing startup checks...");

    // Check that at least one provider is available
    if config.mail.providers.is_empty() {
        error!("No delivery providers configured, nothing can be sent");
        errors.push(StartupCheckError::NoProvidersConfigured);
    }

    let mut seen_kinds = HashSet::new();
    for provider in &config.mail.providers {
        let kind = provider.kind();

        // Status lookups route through the provider that sent the message, so
        // each provider kind may appear only once
        if !seen_kinds.insert(kind) {
            error!("Provider '{}' is configured more than once", kind);
            errors.push(StartupCheckError::DuplicateProvider(kind.to_string()));
            continue;
        }

        match Url::parse(provider.base_url()) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                info!("Provider '{}' base URL: {}", kind, provider.base_url());
            }
            Ok(url) => {
                error!(
                    "Provider '{}' base URL has unsupported scheme '{}'",
                    kind,
                    url.scheme()
                );
                errors.push(StartupCheckError::InvalidBaseUrl(
                    kind.to_string(),
                    format!("unsupported scheme '{}'", url.scheme()),
                ));
            }
            Err(e) => {
                error!("Provider '{}' base URL is invalid: {}", kind, e);
                errors.push(StartupCheckError::InvalidBaseUrl(
                    kind.to_string(),
                    e.to_string(),
                ));
            }
        }

        if provider.api_key().trim().is_empty() {
            error!("Provider '{}' has an empty API key", kind);
            errors.push(StartupCheckError::EmptyApiKey(kind.to_string()));
        }

        let timeout = provider.status_timeout_seconds();
        if timeout <= 0.0 {
            warn!(
                "Provider '{}' status timeout is not positive, status lookups will always time out",
                kind
            );
        } else if Duration::try_from_secs_f64(timeout).is_err() {
            // NaN, infinite and astronomically large values cannot become a
            // Duration and would silently collapse to a zero window
            error!(
                "Provider '{}' status timeout {} is not representable",
                kind, timeout
            );
            errors.push(StartupCheckError::InvalidStatusTimeout(
                kind.to_string(),
                timeout,
            ));
        }
    }

    if config.jobs.result_ttl_seconds <= 0 {
        warn!(
            "Job result TTL is {} seconds, results will expire immediately",
            config.jobs.result_ttl_seconds
        );
    }
    if config.jobs.cleanup_interval_seconds == 0 {
        warn!("Job cleanup interval is 0 seconds, falling back to 1 second");
    }

    if errors.is_empty() {
        info!("All startup checks passed");
        Ok(())
    } else {
        error!("Startup checks failed with {} errors", errors.len());
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{MailgunConfig, MandrillConfig, ProviderConfig};

    fn config_with_providers(providers: Vec<ProviderConfig>) -> Config {
        let mut config = Config::default();
        config.mail.providers = providers;
        config
    }

    fn mailgun(base_url: &str, api_key: &str) -> ProviderConfig {
        ProviderConfig::Mailgun(MailgunConfig {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            status_timeout_seconds: 2.0,
        })
    }

    fn mandrill(base_url: &str, api_key: &str) -> ProviderConfig {
        ProviderConfig::Mandrill(MandrillConfig {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            status_timeout_seconds: 2.0,
        })
    }

    fn mailgun_with_timeout(timeout: f64) -> ProviderConfig {
        ProviderConfig::Mailgun(MailgunConfig {
            base_url: "https://api.mailgun.net/v3/example.com".to_string(),
            api_key: "key-abc".to_string(),
            status_timeout_seconds: timeout,
        })
    }

    #[tokio::test]
    async fn valid_config_passes() {
        let config = config_with_providers(vec![
            mailgun("https://api.mailgun.net/v3/example.com", "key-abc"),
            mandrill("https://mandrillapp.com/api/1.0", "key-def"),
        ]);

        assert!(perform_startup_checks(&config).await.is_ok());
    }

    #[tokio::test]
    async fn empty_provider_list_fails() {
        let config = config_with_providers(vec![]);

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            StartupCheckError::NoProvidersConfigured
        ));
    }

    #[tokio::test]
    async fn duplicate_provider_kind_fails() {
        let config = config_with_providers(vec![
            mailgun("https://api.mailgun.net/v3/example.com", "key-abc"),
            mailgun("https://api.mailgun.net/v3/other.com", "key-def"),
        ]);

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            StartupCheckError::DuplicateProvider(kind) if kind == "mailgun"
        ));
    }

    #[tokio::test]
    async fn broken_provider_reports_every_problem() {
        let config = config_with_providers(vec![mailgun("not a url", "  ")]);

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], StartupCheckError::InvalidBaseUrl(kind, _) if kind == "mailgun"));
        assert!(matches!(&errors[1], StartupCheckError::EmptyApiKey(kind) if kind == "mailgun"));
    }

    #[tokio::test]
    async fn unrepresentable_status_timeout_fails() {
        for timeout in [f64::INFINITY, f64::NAN, 1e20] {
            let config = config_with_providers(vec![mailgun_with_timeout(timeout)]);

            let errors = perform_startup_checks(&config).await.unwrap_err();
            assert_eq!(errors.len(), 1);
            assert!(matches!(
                &errors[0],
                StartupCheckError::InvalidStatusTimeout(kind, _) if kind == "mailgun"
            ));
        }
    }

    #[tokio::test]
    async fn nonpositive_status_timeout_is_only_a_warning() {
        let config = config_with_providers(vec![mailgun_with_timeout(-1.0)]);

        assert!(perform_startup_checks(&config).await.is_ok());
    }

    #[tokio::test]
    async fn non_http_scheme_fails() {
        let config = config_with_providers(vec![mandrill("ftp://mandrillapp.com/api/1.0", "key")]);

        let errors = perform_startup_checks(&config).await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            StartupCheckError::InvalidBaseUrl(kind, _) if kind == "mandrill"
        ));
    }
}
