//! Assembles the registry, USB bridge, and client listener into the
//! running daemon and drives orderly shutdown.
//!
//! One current-thread runtime, no cross-task `Send` requirement, every
//! core structure owned by `Rc<RefCell<_>>` and shared only among
//! tasks local to this set.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StartupError;
use crate::net::listener::{self, ConnTable};
use crate::registry::DeviceRegistry;
use crate::rpc::dispatcher;
use crate::usb::bridge::UsbBridge;
use crate::wire::codec::encode_message;

const FTDI_VENDOR_ID: u16 = 0x0403;
const FTDI_PRODUCT_ID: u16 = 0x6010;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs the daemon until a shutdown signal arrives. Returns once every
/// client connection is closed, the listener is stopped, and the USB
/// context has been torn down.
pub async fn run(config: Config) -> Result<(), StartupError> {
    let port = config.port;
    let registry: Rc<RefCell<DeviceRegistry>> = Rc::new(RefCell::new(DeviceRegistry::new(config)));
    let conns = listener::new_conn_table();

    wire_broadcast_callbacks(&registry, &conns);

    let usb_bridge = UsbBridge::new(FTDI_VENDOR_ID, FTDI_PRODUCT_ID)?;

    let tcp_listener = listener::bind(port).map_err(|source| StartupError::Bind { port, source })?;
    info!(port, "listening for clients");

    let shutdown = CancellationToken::new();

    let accept_task = tokio::task::spawn_local(listener::accept_loop(
        tcp_listener,
        registry.clone(),
        conns.clone(),
        shutdown.clone(),
    ));

    let poll_task = tokio::task::spawn_local(run_usb_poll_loop(
        registry.clone(),
        usb_bridge,
        shutdown.clone(),
    ));

    let signal_name = crate::shutdown::wait_for_signal().await;
    info!(signal = signal_name, "shutdown signal received, stopping");
    shutdown.cancel();

    match accept_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%err, "accept loop exited with an error"),
        Err(err) => warn!(%err, "accept loop task panicked"),
    }
    if let Err(err) = poll_task.await {
        warn!(%err, "usb poll loop task panicked");
    }

    Ok(())
}

fn wire_broadcast_callbacks(registry: &Rc<RefCell<DeviceRegistry>>, conns: &ConnTable) {
    let mut registry = registry.borrow_mut();

    let added_conns = conns.clone();
    registry.set_added_callback(move |serial| {
        listener::send_all(&added_conns, encode_message(&dispatcher::event_added(serial)));
    });

    let removed_conns = conns.clone();
    registry.set_removed_callback(move |serial| {
        listener::send_all(&removed_conns, encode_message(&dispatcher::event_removed(serial)));
    });

    let reg_changed_conns = conns.clone();
    registry.set_reg_changed_callback(move |serial, change| {
        listener::send_all(
            &reg_changed_conns,
            encode_message(&dispatcher::event_reg_changed(serial, change)),
        );
    });
}

/// Periodically drains hotplug events off the USB bridge and polls
/// every registered device's tracked registers, on a 500 ms cadence.
/// Hotplug arrival/departure runs synchronously inside this same tick,
/// exactly as it would inside libusb's own event-handler call, so a
/// `reprogram`-on-arrival stall is visible as one slow tick rather than
/// a silently dropped event.
async fn run_usb_poll_loop(
    registry: Rc<RefCell<DeviceRegistry>>,
    mut usb_bridge: UsbBridge,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match usb_bridge.poll() {
                    Ok(events) => {
                        for event in events {
                            registry.borrow_mut().handle_hotplug_event(event);
                        }
                    }
                    Err(err) => warn!(%err, "usb event loop error"),
                }
                registry.borrow_mut().poll_tracked_registers();
            }
        }
    }
}
