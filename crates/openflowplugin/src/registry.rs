//! Registry of connected devices keyed by datapath id.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ofp_session::{
    ConnectionContext, DeviceAdmission, DeviceConnectedHandler, DeviceContext,
    DeviceDisconnectedHandler, DeviceEvent, Instrumentation, NodeId,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::polling;
use crate::statistics::StatisticsService;

/// Owns every [`DeviceContext`] of a controller.
///
/// Primary connections create devices, auxiliary connections attach to
/// them, and a primary reaching `RIP` removes its device together with
/// its auxiliaries and its statistics polling.
pub struct DeviceRegistry {
    devices: DashMap<u64, Arc<DeviceContext>>,
    pollers: DashMap<u64, JoinHandle<()>>,
    request_quota: usize,
    polling: PollingConfig,
    instrumentation: Arc<Instrumentation>,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceRegistry {
    /// Registry without statistics polling; see [`DeviceRegistry::with_polling`].
    pub fn new(
        request_quota: usize,
        instrumentation: Arc<Instrumentation>,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            devices: DashMap::new(),
            pollers: DashMap::new(),
            request_quota,
            polling: PollingConfig::disabled(),
            instrumentation,
            events,
        }
    }

    /// Poll statistics of every admitted device as configured.
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn device(&self, datapath_id: u64) -> Option<Arc<DeviceContext>> {
        self.devices.get(&datapath_id).map(|d| Arc::clone(d.value()))
    }

    pub fn device_by_node(&self, node: &NodeId) -> Option<Arc<DeviceContext>> {
        self.devices
            .iter()
            .find(|d| d.value().device_info().node_id() == node)
            .map(|d| Arc::clone(d.value()))
    }

    /// Datapath ids of every registered device, sorted.
    pub fn datapath_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.devices.iter().map(|d| *d.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices with a running statistics poller.
    pub fn polled_devices(&self) -> usize {
        self.pollers.len()
    }

    /// Remove and close every device.
    pub async fn shutdown(&self) {
        let ids = self.datapath_ids();
        for id in ids {
            self.stop_polling(id);
            if let Some((_, device)) = self.devices.remove(&id) {
                device.shutdown().await;
                let _ = self
                    .events
                    .send(DeviceEvent::Disconnected(device.device_info().node_id().clone()));
            }
        }
    }

    fn start_polling(&self, device: &Arc<DeviceContext>) {
        if !self.polling.enabled {
            return;
        }
        let datapath_id = device.device_info().datapath_id();
        let task = tokio::spawn(polling::poll_device(
            StatisticsService::new(Arc::clone(device)),
            self.polling.clone(),
        ));
        if let Some(previous) = self.pollers.insert(datapath_id, task) {
            previous.abort();
        }
    }

    fn stop_polling(&self, datapath_id: u64) {
        if let Some((_, task)) = self.pollers.remove(&datapath_id) {
            task.abort();
            debug!(datapath_id, "statistics polling stopped");
        }
    }

    /// Remove `device` if it is still the registered one for its datapath id.
    fn remove_device(&self, device: &Arc<DeviceContext>) -> bool {
        let datapath_id = device.device_info().datapath_id();
        let removed = self
            .devices
            .remove_if(&datapath_id, |_, current| Arc::ptr_eq(current, device))
            .is_some();
        if removed {
            self.stop_polling(datapath_id);
        }
        removed
    }

    fn admit_primary(self: &Arc<Self>, connection: Arc<ConnectionContext>, datapath_id: u64) -> DeviceAdmission {
        let device = match self.devices.entry(datapath_id) {
            Entry::Occupied(existing) if existing.get().is_valid() => {
                self.instrumentation.session.record_duplicate_connection();
                warn!(
                    datapath_id,
                    remote = ?connection.remote_addr(),
                    "duplicate primary connection"
                );
                return DeviceAdmission::Rejected("duplicate primary connection");
            }
            entry => {
                let device = match DeviceContext::new(
                    Arc::clone(&connection),
                    self.request_quota,
                    Arc::clone(&self.instrumentation),
                ) {
                    Ok(device) => Arc::new(device),
                    Err(err) => {
                        warn!(datapath_id, %err, "cannot build device context");
                        return DeviceAdmission::Rejected("device context unavailable");
                    }
                };
                match entry {
                    Entry::Occupied(mut stale) => {
                        debug!(datapath_id, "replacing stale device");
                        stale.insert(Arc::clone(&device));
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(Arc::clone(&device));
                    }
                }
                device
            }
        };
        let node = device.device_info().node_id().clone();
        info!(%node, remote = ?connection.remote_addr(), "device connected");
        let _ = self.events.send(DeviceEvent::Connected(node.clone()));
        self.start_polling(&device);

        // Disconnects are only propagated once the handler is installed; a
        // close that slipped in before that is caught by the state check.
        connection.set_disconnect_handler(Arc::clone(self) as Arc<dyn DeviceDisconnectedHandler>);
        if connection.is_closed() {
            if self.remove_device(&device) {
                info!(%node, "connection closed during admission; device removed");
                let _ = self.events.send(DeviceEvent::Disconnected(node));
            }
            return DeviceAdmission::Rejected("connection closed during admission");
        }
        DeviceAdmission::Primary(device)
    }

    fn admit_auxiliary(
        self: &Arc<Self>,
        connection: Arc<ConnectionContext>,
        datapath_id: u64,
        auxiliary_id: u8,
    ) -> DeviceAdmission {
        let Some(device) = self.device(datapath_id) else {
            warn!(datapath_id, auxiliary_id, "auxiliary connection without primary");
            return DeviceAdmission::Rejected("auxiliary connection without primary");
        };
        if !device.add_auxiliary_connection(Arc::clone(&connection)) {
            self.instrumentation.session.record_duplicate_connection();
            return DeviceAdmission::Rejected("duplicate auxiliary connection");
        }
        connection.set_disconnect_handler(Arc::clone(self) as Arc<dyn DeviceDisconnectedHandler>);
        if connection.is_closed() {
            if let Some(attached) = device.auxiliary_connection(auxiliary_id) {
                if Arc::ptr_eq(&attached, &connection) {
                    device.remove_auxiliary_connection(auxiliary_id);
                }
            }
            return DeviceAdmission::Rejected("connection closed during admission");
        }
        DeviceAdmission::Auxiliary(device)
    }
}

impl DeviceConnectedHandler for DeviceRegistry {
    fn on_device_connected(self: Arc<Self>, connection: Arc<ConnectionContext>) -> DeviceAdmission {
        if connection.is_closed() {
            debug!(remote = ?connection.remote_addr(), "closed connection not admitted");
            return DeviceAdmission::Rejected("connection closed");
        }
        let Some(features) = connection.features() else {
            return DeviceAdmission::Rejected("features not received");
        };
        if features.auxiliary_id == 0 {
            self.admit_primary(connection, features.datapath_id)
        } else {
            self.admit_auxiliary(connection, features.datapath_id, features.auxiliary_id)
        }
    }
}

impl DeviceDisconnectedHandler for DeviceRegistry {
    fn on_device_disconnected(&self, connection: &ConnectionContext) {
        let Some(features) = connection.features() else {
            return;
        };
        let datapath_id = features.datapath_id;
        if features.auxiliary_id != 0 {
            if let Some(device) = self.device(datapath_id) {
                device.remove_auxiliary_connection(features.auxiliary_id);
            }
            return;
        }

        let removed = self.devices.remove_if(&datapath_id, |_, device| {
            std::ptr::eq(Arc::as_ptr(device.primary_connection()), connection)
        });
        let Some((_, device)) = removed else {
            return;
        };
        self.stop_polling(datapath_id);
        let node = device.device_info().node_id().clone();
        info!(%node, "device disconnected");
        let auxiliaries = device.take_auxiliary_connections();
        if !auxiliaries.is_empty() {
            tokio::spawn(async move {
                for auxiliary in auxiliaries {
                    auxiliary.close_connection(false).await;
                }
            });
        }
        let _ = self.events.send(DeviceEvent::Disconnected(node));
    }
}
