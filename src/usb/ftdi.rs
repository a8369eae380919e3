//! FTDI vendor control requests used during device bring-up.
//!
//! `rusb` exposes only generic control-transfer primitives, so the
//! three requests `libftdi` would normally issue (reset, set bitmode,
//! set latency timer) are reproduced here as raw vendor control
//! transfers.

use std::time::Duration;

use rusb::{DeviceHandle, Direction, Recipient, RequestType, UsbContext};

use crate::error::SessionError;

const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_SET_BITMODE_REQUEST: u8 = 0x0b;
const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;

const SIO_RESET_SIO: u16 = 0;

/// `ftdi_set_bitmode`'s `BITMODE_SYNCFF` (synchronous FIFO / FT245 mode).
pub const BITMODE_SYNCFF: u8 = 0x40;
/// `ftdi_set_bitmode`'s `BITMODE_RESET`, used when tearing a device down.
pub const BITMODE_RESET: u8 = 0x00;
/// `ftdi_set_bitmode`'s `BITMODE_MPSSE`, the mode interface B is switched
/// into for JTAG bit-banging during programming.
pub const BITMODE_MPSSE: u8 = 0x02;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

fn vendor_out_request_type() -> u8 {
    rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device)
}

fn control_out<T: UsbContext>(
    handle: &DeviceHandle<T>,
    request: u8,
    value: u16,
    index: u16,
) -> Result<(), SessionError> {
    handle
        .write_control(vendor_out_request_type(), request, value, index, &[], CONTROL_TIMEOUT)
        .map(|_| ())
        .map_err(|source| SessionError::Usb { context: "ftdi control request", source })
}

/// `ftdi_usb_reset`: resets the FTDI chip's internal state.
pub fn reset<T: UsbContext>(handle: &DeviceHandle<T>, interface_index: u16) -> Result<(), SessionError> {
    control_out(handle, SIO_RESET_REQUEST, SIO_RESET_SIO, interface_index)
}

/// `ftdi_set_bitmode`: `mode` selects the chip's bit-bang/FIFO personality;
/// `mask` is the per-pin direction mask packed into the request's high byte.
pub fn set_bitmode<T: UsbContext>(
    handle: &DeviceHandle<T>,
    interface_index: u16,
    mask: u8,
    mode: u8,
) -> Result<(), SessionError> {
    let value = u16::from(mask) | (u16::from(mode) << 8);
    control_out(handle, SIO_SET_BITMODE_REQUEST, value, interface_index)
}

/// `ftdi_set_latency_timer`: `latency_ms` must be in `1..=255`.
pub fn set_latency_timer<T: UsbContext>(
    handle: &DeviceHandle<T>,
    interface_index: u16,
    latency_ms: u8,
) -> Result<(), SessionError> {
    control_out(handle, SIO_SET_LATENCY_TIMER_REQUEST, u16::from(latency_ms), interface_index)
}
