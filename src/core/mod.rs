use crate::auth::{Credentials, SigV4Signer};
use crate::config::{Config, Profile};
use crate::http::engine::HttpExecutor;
use crate::http::retry::RetryPolicy;
use crate::http::transport::{HyperTransport, Transport};
use crate::multipart::{MultipartConfig, MultipartUploader};
use crate::s3::ScsClient;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Everything a command needs, built once from configuration
///
/// The client is created once; clones share the same connection pool,
/// signer and clock offset.
#[derive(Clone, Debug)]
pub struct Core {
    pub config: Arc<Config>,
    pub profile: Profile,
    client: ScsClient,
}

impl Core {
    /// Wire the default profile to a pooled HTTPS transport
    pub fn new(config: Config) -> Result<Self> {
        let transport = HyperTransport::new(config.client.request_timeout(), config.client.insecure_tls)
            .context("Failed to build TLS connector")?;
        if config.client.insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
        }
        Self::with_transport(config, Arc::new(transport))
    }

    /// Same wiring over any transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let profile = config
            .get_profile(None)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No profile found in configuration"))?;

        let settings = &config.client;
        let mut executor = HttpExecutor::new(transport, RetryPolicy::with_max_retries(settings.max_retries));
        if let Some(user_agent) = &settings.user_agent {
            executor = executor.with_user_agent(user_agent);
        }

        let endpoint = profile.endpoint_url(settings.protocol);
        let client = ScsClient::new(
            executor,
            endpoint.as_str(),
            SigV4Signer::new(Some(profile.region.clone())),
            Credentials::new(profile.access_key.clone(), profile.secret_key.clone()),
        )
        .with_virtual_host_style(settings.virtual_host_style);

        tracing::debug!(
            endpoint = %endpoint,
            region = %profile.region,
            max_retries = settings.max_retries,
            "Client configured"
        );

        Ok(Self {
            config: Arc::new(config),
            profile,
            client,
        })
    }

    /// Get a clone of the shared client
    pub fn client(&self) -> ScsClient {
        self.client.clone()
    }

    /// Multipart settings from configuration
    pub fn multipart_config(&self) -> MultipartConfig {
        let settings = &self.config.client;
        MultipartConfig::default()
            .with_part_size(settings.part_size)
            .with_concurrency(settings.part_concurrency)
            .with_threshold(settings.multipart_threshold)
            .with_abort_on_failure(settings.abort_on_failure)
    }

    pub fn uploader(&self) -> MultipartUploader {
        self.client.multipart(self.multipart_config())
    }

    /// Bucket from the profile, for commands given only a key
    pub fn default_bucket(&self) -> Option<&str> {
        self.profile.bucket.as_deref()
    }
}
