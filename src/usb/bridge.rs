//! libusb context lifecycle and hotplug event delivery.
//!
//! Bridges libusb's own event sources into the single-thread reactor:
//! `poll()` drives `rusb::Context::handle_events_timeout` with a zero
//! timeout from a `tokio::time::interval` tick (see `registry`),
//! rather than wrapping libusb's raw pollfds in reactor-registered
//! file descriptors. Hotplug callbacks fire synchronously inside that same
//! call, on the reactor thread; they forward the raw `Device` through
//! an internal channel rather than touching `DeviceRegistry` directly,
//! since `rusb::Hotplug` requires `Send` and the registry's state does
//! not.

use std::time::Duration;

use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::UsbError;

#[derive(Debug)]
pub enum HotplugEvent {
    Arrived(Device<Context>),
    Left(Device<Context>),
}

struct HotplugSink {
    tx: UnboundedSender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugSink {
    fn device_arrived(&mut self, device: Device<Context>) {
        let _ = self.tx.send(HotplugEvent::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        let _ = self.tx.send(HotplugEvent::Left(device));
    }
}

pub struct UsbBridge {
    context: Context,
    _registration: Registration<Context>,
    events_rx: UnboundedReceiver<HotplugEvent>,
}

impl UsbBridge {
    /// Opens a libusb context and registers a hotplug filter for
    /// `(vendor_id, product_id)` (the caller passes the FTDI
    /// `0x0403`/`0x6010` pair this daemon watches for).
    pub fn new(vendor_id: u16, product_id: u16) -> Result<UsbBridge, UsbError> {
        let context = Context::new().map_err(UsbError::Init)?;
        if !rusb::has_hotplug() {
            return Err(UsbError::HotplugUnsupported);
        }

        let (tx, events_rx) = mpsc::unbounded_channel();
        let mut builder = HotplugBuilder::new();
        builder.vendor_id(vendor_id);
        builder.product_id(product_id);
        builder.enumerate(true);
        let registration = builder
            .register(&context, Box::new(HotplugSink { tx }))
            .map_err(UsbError::HotplugRegister)?;

        Ok(UsbBridge { context, _registration: registration, events_rx })
    }

    /// Drains libusb's event queue without blocking and returns every
    /// hotplug event that fired as a result. Call this on a fixed
    /// interval from the reactor (see `registry::run_usb_poll_loop`).
    pub fn poll(&mut self) -> Result<Vec<HotplugEvent>, UsbError> {
        match self.context.handle_events_timeout(Duration::ZERO) {
            Ok(()) => {}
            Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
            Err(e) => return Err(UsbError::EventLoop(e)),
        }

        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        Ok(events)
    }
}
