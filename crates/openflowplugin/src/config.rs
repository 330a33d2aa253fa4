//! Controller configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use ofp_session::config::consts;
use ofp_session::SessionConfig;

use crate::ControllerError;

/// Capacity of the device event channel.
pub const EVENT_CAPACITY: usize = 1024;
/// Shortest pause between two statistics rounds of a device.
pub const POLL_BASE_INTERVAL: Duration = Duration::from_secs(3);
/// Longest pause the adaptive delay may grow to.
pub const POLL_MAX_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Periodic statistics gathering per device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PollingConfig {
    pub enabled: bool,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "base_interval_ms", with = "ofp_session::config::duration_ms")
    )]
    pub base_interval: Duration,
    #[cfg_attr(
        feature = "serde",
        serde(rename = "max_interval_ms", with = "ofp_session::config::duration_ms")
    )]
    pub max_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_interval: POLL_BASE_INTERVAL,
            max_interval: POLL_MAX_INTERVAL,
        }
    }
}

impl PollingConfig {
    /// No periodic gathering.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.base_interval.is_zero() {
            return Err(ControllerError::config(
                "polling base_interval must be greater than zero",
            ));
        }
        if self.max_interval < self.base_interval {
            return Err(ControllerError::config(
                "polling max_interval must not be shorter than base_interval",
            ));
        }
        Ok(())
    }
}

/// Top-level controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    /// Address the switch listener binds to.
    pub listen: SocketAddr,
    /// Buffered device events per subscriber before old ones are dropped.
    pub event_capacity: usize,
    pub session: SessionConfig,
    pub polling: PollingConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), consts::PORT),
            event_capacity: EVENT_CAPACITY,
            session: SessionConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.event_capacity == 0 {
            return Err(ControllerError::config("event_capacity must be greater than zero"));
        }
        self.polling.validate()?;
        self.session
            .validate()
            .map_err(|err| ControllerError::config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listens_on_well_known_port() {
        let config = ControllerConfig::default();
        assert_eq!(config.listen.port(), 6653);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_event_capacity_is_rejected() {
        let mut config = ControllerConfig::default();
        config.event_capacity = 0;
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
    }

    #[test]
    fn invalid_session_is_rejected() {
        let config = ControllerConfig::default()
            .with_session(SessionConfig::default().with_request_quota(0));
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
    }

    #[test]
    fn polling_max_below_base_is_rejected() {
        let config = ControllerConfig::default().with_polling(
            PollingConfig::default()
                .with_base_interval(Duration::from_secs(10))
                .with_max_interval(Duration::from_secs(5)),
        );
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
        assert!(ControllerConfig::default()
            .with_polling(PollingConfig::disabled())
            .validate()
            .is_ok());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "listen": "127.0.0.1:6633",
            "session": { "request_quota": 64, "echo_reply_timeout_ms": 500 }
        }"#;
        let config: ControllerConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.listen.port(), 6633);
        assert_eq!(config.session.request_quota, 64);
        assert_eq!(
            config.session.echo_reply_timeout,
            Duration::from_millis(500)
        );
        assert_eq!(config.session.idle_timeout, consts::IDLE_TIMEOUT);
        assert_eq!(config.event_capacity, EVENT_CAPACITY);
        assert_eq!(config.polling, PollingConfig::default());
        assert!(config.validate().is_ok());
    }
}
