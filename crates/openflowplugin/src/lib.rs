#![cfg_attr(docsrs, feature(doc_cfg))]
//! OpenFlow controller facade: accepts switch connections, keeps a registry
//! of connected devices and exposes statistics queries on them.
//!
//! ```rust,no_run
//! use openflowplugin::{Controller, ControllerConfig, ControllerError};
//!
//! # async fn run() -> Result<(), ControllerError> {
//! let controller = Controller::new(ControllerConfig::default())?;
//! let mut events = controller.subscribe();
//! let provider = controller.bind().await?;
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//! controller.serve(provider).await;
//! # Ok(())
//! # }
//! ```
//!
//! ```rust,no_run
//! # async fn stats(controller: &openflowplugin::Controller) -> Result<(), openflowplugin::ControllerError> {
//! use openflowplugin::statistics::TABLE_ALL;
//! if let Some(stats) = controller.statistics(0x1) {
//!     let fragments = stats.flow_stats(TABLE_ALL).await?;
//!     println!("{} flow stats fragments", fragments.len());
//! }
//! # Ok(())
//! # }
//! ```

pub use ofp_session as session;
pub use ofp_wire as wire;

pub mod config;
pub mod polling;
pub mod registry;
pub mod statistics;

use std::sync::Arc;
use std::time::Duration;

use ofp_session::{
    run_reader, ConnectionAdapter, ConnectionConductor, ConnectionContext,
    DeviceConnectedHandler, DeviceContext, DeviceEvent, Instrumentation, RequestError,
    SessionError, SwitchConnectionProvider, SystemListener, TcpConnectionAdapter,
};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

pub use config::{ControllerConfig, PollingConfig};
pub use registry::DeviceRegistry;
pub use statistics::StatisticsService;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type produced by the controller facade.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Configuration rejected before start-up.
    #[error("config: {0}")]
    Config(String),
    /// The negotiated protocol version has no such request.
    #[error("{what} not supported by OpenFlow {version}")]
    Unsupported { version: String, what: &'static str },
}

impl ControllerError {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        ControllerError::Config(msg.into())
    }
}

/// Switch-facing side of an OpenFlow controller.
pub struct Controller {
    config: ControllerConfig,
    registry: Arc<DeviceRegistry>,
    instrumentation: Arc<Instrumentation>,
    events: broadcast::Sender<DeviceEvent>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Validate `config` and build an idle controller.
    pub fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        config.validate()?;
        let instrumentation = Arc::new(Instrumentation::new());
        let (events, _) = broadcast::channel(config.event_capacity);
        let registry = Arc::new(
            DeviceRegistry::new(
                config.session.request_quota,
                Arc::clone(&instrumentation),
                events.clone(),
            )
            .with_polling(config.polling.clone()),
        );
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            registry,
            instrumentation,
            events,
            shutdown,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn instrumentation(&self) -> &Arc<Instrumentation> {
        &self.instrumentation
    }

    /// Receive device lifecycle changes and switch notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn device(&self, datapath_id: u64) -> Option<Arc<DeviceContext>> {
        self.registry.device(datapath_id)
    }

    /// Statistics service of a connected device.
    pub fn statistics(&self, datapath_id: u64) -> Option<StatisticsService> {
        self.device(datapath_id).map(StatisticsService::new)
    }

    /// Wrap a transport in a fresh connection and its conductor.
    ///
    /// The caller feeds inbound messages to the returned conductor and
    /// calls [`SystemListener::on_connection_ready`] to start the handshake.
    pub fn attach(&self, adapter: Arc<dyn ConnectionAdapter>) -> Arc<ConnectionConductor> {
        let session = self.config.session.clone();
        let connection = Arc::new(ConnectionContext::new(
            adapter,
            session.xid_start,
            Arc::clone(&self.instrumentation),
        ));
        let handler = Arc::clone(&self.registry) as Arc<dyn DeviceConnectedHandler>;
        Arc::new(ConnectionConductor::new(connection, session, handler).with_events(self.events.clone()))
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<SwitchConnectionProvider, ControllerError> {
        Ok(SwitchConnectionProvider::bind(self.config.listen).await?)
    }

    /// Accept switches from `provider` until [`Controller::shutdown`] is called.
    pub async fn serve(&self, provider: SwitchConnectionProvider) {
        let mut stop = self.shutdown.subscribe();
        if *stop.borrow() {
            return;
        }
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    debug!("accept loop stopped");
                    return;
                }
                accepted = provider.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let (adapter, reader) = match TcpConnectionAdapter::from_stream(stream) {
                            Ok(split) => split,
                            Err(err) => {
                                warn!(%remote, %err, "cannot set up switch connection");
                                continue;
                            }
                        };
                        let conductor = self.attach(adapter);
                        let idle_timeout = self.config.session.idle_timeout;
                        let instrumentation = Arc::clone(&self.instrumentation);
                        tokio::spawn(async move {
                            conductor.on_connection_ready().await;
                            run_reader(
                                reader.reader,
                                reader.shutdown,
                                conductor,
                                idle_timeout,
                                instrumentation,
                            )
                            .await;
                            debug!(%remote, "connection reader finished");
                        });
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    /// Bind and serve until shut down.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let provider = self.bind().await?;
        info!(listen = %provider.local_addr()?, "controller started");
        self.serve(provider).await;
        Ok(())
    }

    /// Stop accepting and close every connected device.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.registry.shutdown().await;
        info!("controller stopped");
    }
}
