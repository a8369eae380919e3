//! Owns an opened FTDI device handle through its bring-up sequence and
//! exposes it as a [`BulkIo`] for `usb::session::DeviceSession`.
//!
//! Bring-up claims interface A (the register protocol), briefly claims
//! and purges interface B (used only by JTAG programming, not held
//! open here), resets the chip, switches interface A into synchronous
//! FIFO mode and sets its latency timer.

use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

use crate::error::SessionError;
use crate::usb::ftdi;
use crate::usb::session::BulkIo;

const INTERFACE_A: u8 = 0;
pub(crate) const INTERFACE_B: u8 = 1;
const ENDPOINT_A_OUT: u8 = 0x02;
const ENDPOINT_A_IN: u8 = 0x81;
pub(crate) const ENDPOINT_B_OUT: u8 = 0x04;
pub(crate) const ENDPOINT_B_IN: u8 = 0x83;

const BULK_TIMEOUT: Duration = Duration::from_millis(500);
const RESET_SETTLE: Duration = Duration::from_millis(100);

pub struct UsbFtdiDevice {
    handle: DeviceHandle<Context>,
}

impl UsbFtdiDevice {
    pub fn open(handle: DeviceHandle<Context>) -> Result<UsbFtdiDevice, SessionError> {
        handle
            .claim_interface(INTERFACE_A)
            .map_err(|source| SessionError::Usb { context: "claim interface A", source })?;

        Self::purge_interface_b(&handle)?;

        ftdi::reset(&handle, u16::from(INTERFACE_A))?;
        std::thread::sleep(RESET_SETTLE);
        ftdi::set_bitmode(&handle, u16::from(INTERFACE_A), 0, ftdi::BITMODE_SYNCFF)?;
        ftdi::set_latency_timer(&handle, u16::from(INTERFACE_A), 1)?;

        Ok(UsbFtdiDevice { handle })
    }

    /// Borrows the device handle so a caller can open interface B (for
    /// JTAG programming) alongside this session's hold on interface A.
    pub fn handle(&self) -> &DeviceHandle<Context> {
        &self.handle
    }

    fn purge_interface_b(handle: &DeviceHandle<Context>) -> Result<(), SessionError> {
        handle
            .claim_interface(INTERFACE_B)
            .map_err(|source| SessionError::Usb { context: "claim interface B", source })?;
        let purge = handle
            .clear_halt(ENDPOINT_B_IN)
            .and_then(|_| handle.clear_halt(ENDPOINT_B_OUT))
            .map_err(|source| SessionError::Usb { context: "purge interface B", source });
        let _ = handle.release_interface(INTERFACE_B);
        purge
    }
}

impl BulkIo for UsbFtdiDevice {
    fn write_bulk(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        self.handle
            .write_bulk(ENDPOINT_A_OUT, data, BULK_TIMEOUT)
            .map_err(|source| SessionError::Usb { context: "bulk write", source })
    }

    fn read_bulk(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        self.handle
            .read_bulk(ENDPOINT_A_IN, buf, BULK_TIMEOUT)
            .map_err(|source| SessionError::Usb { context: "bulk read", source })
    }
}

impl Drop for UsbFtdiDevice {
    fn drop(&mut self) {
        let _ = ftdi::set_bitmode(&self.handle, u16::from(INTERFACE_A), 0xfb, ftdi::BITMODE_RESET);
        let _ = self.handle.release_interface(INTERFACE_A);
    }
}
