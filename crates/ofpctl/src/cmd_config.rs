use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use openflowplugin::ControllerConfig;

use crate::common;

/// Command line settings layered over an optional JSON config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub quota: Option<usize>,
    pub echo_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub versions: Option<String>,
    pub no_bitmap: bool,
    pub poll_interval_ms: Option<u64>,
    pub no_polling: bool,
}

impl ConfigOverrides {
    /// Defaults, then the config file, then command line flags.
    pub fn resolve(&self) -> Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => common::load_config(path)?,
            None => ControllerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        let session = &mut config.session;
        if let Some(quota) = self.quota {
            session.request_quota = quota;
        }
        if let Some(ms) = self.echo_timeout_ms {
            session.echo_reply_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.idle_timeout_ms {
            session.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(list) = &self.versions {
            session.supported_versions =
                common::parse_versions(list).context("parse --versions")?;
        }
        if self.no_bitmap {
            session.use_version_bitmap = false;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.polling.base_interval = Duration::from_millis(ms);
        }
        if self.no_polling {
            config.polling.enabled = false;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

/// Print the effective configuration as JSON.
pub fn run(overrides: &ConfigOverrides) -> Result<()> {
    let config = overrides.resolve()?;
    common::print_json(&config)
}
