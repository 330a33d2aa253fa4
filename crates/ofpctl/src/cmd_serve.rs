use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ofp_session::{DeviceContext, DeviceEvent};
use ofp_wire::version;
use openflowplugin::Controller;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::cmd_config::ConfigOverrides;
use crate::common;

#[derive(Debug, Clone)]
pub struct ServeArgs {
    pub overrides: ConfigOverrides,
    /// Seconds between statistics reports; 0 disables them.
    pub report_interval_s: u64,
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    node: String,
    datapath_id: String,
    version: String,
    remote: Option<String>,
    auxiliary: usize,
    outstanding: usize,
    connected_at: String,
}

impl DeviceReport {
    fn from_device(device: &DeviceContext) -> Result<Self> {
        let info = device.device_info();
        Ok(Self {
            node: info.node_id().to_string(),
            datapath_id: format!("{:016x}", info.datapath_id()),
            version: version::name(info.version()),
            remote: info.remote_addr().map(|addr| addr.to_string()),
            auxiliary: device.auxiliary_count(),
            outstanding: device.request_context_stack().outstanding(),
            connected_at: common::format_system_time(device.device_state().connected_at)?,
        })
    }
}

fn report(controller: &Controller, json: bool) -> Result<()> {
    let devices = controller
        .registry()
        .datapath_ids()
        .into_iter()
        .filter_map(|id| controller.device(id))
        .map(|device| DeviceReport::from_device(&device))
        .collect::<Result<Vec<_>>>()?;
    let snapshot = controller.instrumentation().snapshot();

    if json {
        #[derive(Serialize)]
        struct Report<'a> {
            devices: &'a [DeviceReport],
            instrumentation: &'a ofp_session::InstrumentationSnapshot,
        }
        return common::print_json(&Report {
            devices: &devices,
            instrumentation: &snapshot,
        });
    }

    let counters = snapshot.session;
    println!(
        "connections={} handshakes={} failures={} disconnects={} echo_timeouts={} quota_rejections={} misses={}",
        counters.connections_accepted,
        counters.handshakes_completed,
        counters.handshake_failures,
        counters.disconnects,
        counters.echo_timeouts,
        counters.quota_rejections,
        counters.correlation_misses,
    );
    if devices.is_empty() {
        println!("No devices connected.");
        return Ok(());
    }
    println!(
        "{:<24} {:<18} {:<5} {:<22} {:<4} {:<6} {}",
        "NODE", "DPID", "OF", "REMOTE", "AUX", "OUTST", "CONNECTED"
    );
    for dev in &devices {
        println!(
            "{:<24} {:<18} {:<5} {:<22} {:<4} {:<6} {}",
            dev.node,
            dev.datapath_id,
            dev.version,
            dev.remote.as_deref().unwrap_or("-"),
            dev.auxiliary,
            dev.outstanding,
            dev.connected_at,
        );
    }
    Ok(())
}

fn log_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Connected(node) => info!(%node, "device up"),
        DeviceEvent::Disconnected(node) => info!(%node, "device down"),
        DeviceEvent::PortStatus { node, status } => info!(
            node = ?node,
            port = status.port_no,
            reason = status.reason,
            "port status"
        ),
        DeviceEvent::PacketIn { node, data } => {
            info!(node = ?node, bytes = data.len(), "packet in")
        }
        DeviceEvent::FlowRemoved { node, data } => {
            info!(node = ?node, bytes = data.len(), "flow removed")
        }
        DeviceEvent::Experimenter { node, message } => info!(
            node = ?node,
            experimenter = message.experimenter,
            exp_type = message.exp_type,
            "experimenter message"
        ),
    }
}

/// Accept switches until Ctrl-C, reporting devices and counters periodically.
pub async fn run(args: ServeArgs, json: bool) -> Result<()> {
    let config = args.overrides.resolve()?;
    let controller = Arc::new(Controller::new(config).context("build controller")?);
    let provider = controller.bind().await.context("bind switch listener")?;
    info!(listen = %provider.local_addr()?, "accepting switches");

    let mut events = controller.subscribe();
    let server = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { controller.serve(provider).await })
    };
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
    let period = Duration::from_secs(args.report_interval_s.max(1));
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupt received; shutting down");
                break;
            }
            _ = ticker.tick(), if args.report_interval_s > 0 => report(&controller, json)?,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "device events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.shutdown().await;
    server.await.context("join accept loop")?;
    report(&controller, json)
}
