//! Session configuration with documented defaults.

use std::time::Duration;

use ofp_wire::version;
use thiserror::Error;

/// Default values used by [`SessionConfig::default`].
pub mod consts {
    use std::time::Duration;

    use ofp_wire::version;

    /// Well-known OpenFlow controller port (IANA).
    pub const PORT: u16 = 6653;
    /// Concurrently outstanding requests per device.
    pub const REQUEST_QUOTA: usize = 1024;
    /// Outstanding control requests (features, echo) per connection.
    pub const CONTROL_QUOTA: usize = 16;
    /// Read inactivity after which the switch is sent an echo request.
    pub const IDLE_TIMEOUT: Duration = Duration::from_secs(15);
    /// Time allowed for the echo reply once the switch has been sent an echo request.
    pub const ECHO_REPLY_TIMEOUT: Duration = Duration::from_millis(2000);
    /// Time allowed from connection accept until the features reply arrives.
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
    /// First xid handed out on a new connection.
    pub const XID_START: u32 = 1;
    /// Supported versions, most preferred first.
    pub const SUPPORTED_VERSIONS: [u8; 2] = [version::OF13, version::OF10];
    /// Initial capacity of the per-connection read buffer.
    pub const READ_BUFFER: usize = 16 * 1024;
}

/// Errors reported by [`SessionConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("at least one protocol version must be supported")]
    NoVersions,
    #[error("unknown protocol version {0:#04x}")]
    UnknownVersion(u8),
    /// The echo keepalive would still be pending when the next idle period ends.
    #[error("echo_reply_timeout ({echo:?}) must be shorter than idle_timeout ({idle:?})")]
    EchoNotBelowIdle { echo: Duration, idle: Duration },
}

/// Tunables of the per-connection session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Maximum number of live request contexts per device.
    pub request_quota: usize,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "idle_timeout_ms", with = "duration_ms")
    )]
    pub idle_timeout: Duration,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "echo_reply_timeout_ms", with = "duration_ms")
    )]
    pub echo_reply_timeout: Duration,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "handshake_timeout_ms", with = "duration_ms")
    )]
    pub handshake_timeout: Duration,
    /// Advertise a version bitmap in the controller HELLO.
    pub use_version_bitmap: bool,
    /// Supported wire versions, most preferred first.
    pub supported_versions: Vec<u8>,
    pub xid_start: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_quota: consts::REQUEST_QUOTA,
            idle_timeout: consts::IDLE_TIMEOUT,
            echo_reply_timeout: consts::ECHO_REPLY_TIMEOUT,
            handshake_timeout: consts::HANDSHAKE_TIMEOUT,
            use_version_bitmap: true,
            supported_versions: consts::SUPPORTED_VERSIONS.to_vec(),
            xid_start: consts::XID_START,
        }
    }
}

impl SessionConfig {
    pub fn with_request_quota(mut self, quota: usize) -> Self {
        self.request_quota = quota;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_echo_reply_timeout(mut self, timeout: Duration) -> Self {
        self.echo_reply_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_version_bitmap(mut self, enable: bool) -> Self {
        self.use_version_bitmap = enable;
        self
    }

    pub fn with_supported_versions(mut self, versions: Vec<u8>) -> Self {
        self.supported_versions = versions;
        self
    }

    pub fn with_xid_start(mut self, start: u32) -> Self {
        self.xid_start = start;
        self
    }

    /// Highest supported version, used as the header version of our HELLO.
    pub fn highest_version(&self) -> u8 {
        self.supported_versions
            .iter()
            .copied()
            .max()
            .unwrap_or(version::OF13)
    }

    /// Check the configuration for values the session layer cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_quota == 0 {
            return Err(ConfigError::Zero("request_quota"));
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::Zero("idle_timeout"));
        }
        if self.echo_reply_timeout.is_zero() {
            return Err(ConfigError::Zero("echo_reply_timeout"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Zero("handshake_timeout"));
        }
        if self.echo_reply_timeout >= self.idle_timeout {
            return Err(ConfigError::EchoNotBelowIdle {
                echo: self.echo_reply_timeout,
                idle: self.idle_timeout,
            });
        }
        if self.supported_versions.is_empty() {
            return Err(ConfigError::NoVersions);
        }
        if let Some(&unknown) = self
            .supported_versions
            .iter()
            .find(|&&v| !(version::OF10..=version::OF15).contains(&v))
        {
            return Err(ConfigError::UnknownVersion(unknown));
        }
        Ok(())
    }
}

/// Serialize a [`Duration`] as whole milliseconds.
#[cfg(feature = "serde")]
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.highest_version(), version::OF13);
        assert_eq!(config.request_quota, consts::REQUEST_QUOTA);
    }

    #[test]
    fn zero_quota_is_rejected() {
        let config = SessionConfig::default().with_request_quota(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero("request_quota")));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let config = SessionConfig::default().with_supported_versions(vec![version::OF13, 0x2A]);
        assert_eq!(config.validate(), Err(ConfigError::UnknownVersion(0x2A)));
    }

    #[test]
    fn echo_timeout_must_fit_inside_idle_period() {
        let config = SessionConfig::default()
            .with_idle_timeout(Duration::from_secs(2))
            .with_echo_reply_timeout(Duration::from_secs(2));
        assert_eq!(
            config.validate(),
            Err(ConfigError::EchoNotBelowIdle {
                echo: Duration::from_secs(2),
                idle: Duration::from_secs(2),
            })
        );
        assert!(config
            .with_echo_reply_timeout(Duration::from_millis(1999))
            .validate()
            .is_ok());
    }
}
