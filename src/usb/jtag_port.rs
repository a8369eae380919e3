//! MPSSE-driven [`JtagPort`] over a device's interface B, used to
//! actually run the chain-length/IDCODE verification `usb::jtag`
//! implements before the (external, out of scope) array-program
//! algorithm is invoked.
//!
//! Interface B is put into MPSSE mode (`BITMODE_MPSSE`) and driven with
//! the standard FTDI MPSSE command set: "Clock Data to TMS Pin (MSB
//! first) with read" shifts one TMS bit per call while holding a fixed
//! TDI value, which is all `JtagPort::shift` needs since both its
//! per-cycle TMS and TDI sequences are supplied explicitly. Pin wiring
//! follows the common FTDI JTAG convention: ADBUS0 = TCK, ADBUS1 = TDI,
//! ADBUS2 = TDO, ADBUS3 = TMS.

use std::time::Duration;

use rusb::{Context, DeviceHandle};

use crate::error::SessionError;
use crate::usb::device::{ENDPOINT_B_IN, ENDPOINT_B_OUT, INTERFACE_B};
use crate::usb::ftdi;
use crate::usb::jtag::JtagPort;

const MPSSE_SET_LOW_BYTE: u8 = 0x80;
const MPSSE_SET_CLOCK_DIVISOR: u8 = 0x86;
const MPSSE_CLOCK_TMS_READ: u8 = 0x6b;

/// TCK, TDI, TMS driven as outputs; TDO an input.
const GPIO_DIRECTION: u8 = 0b0000_1011;
/// TMS idles high so an unexpected reset lands in Test-Logic-Reset.
const GPIO_INITIAL: u8 = 0b0000_1000;

/// `~1 MHz`: `60 MHz / ((1 + divisor) * 2)`, slow enough for reliable
/// JTAG TAP navigation without tuning per board.
const CLOCK_DIVISOR: u16 = 29;

const BULK_TIMEOUT: Duration = Duration::from_millis(500);
const READ_RETRY_ATTEMPTS: usize = 50;
const READ_RETRY_DELAY: Duration = Duration::from_millis(2);

/// Every FTDI bulk-in transfer is prefixed with two modem-status bytes,
/// ahead of whatever MPSSE reply data follows.
const STATUS_PREFIX_LEN: usize = 2;

pub struct UsbJtagPort<'a> {
    handle: &'a DeviceHandle<Context>,
}

impl<'a> UsbJtagPort<'a> {
    /// Claims interface B and switches it into MPSSE mode. Interface A
    /// is untouched: the two interfaces are independent endpoints on
    /// the same device, so a live `DeviceSession` holding A can coexist
    /// with a transient `UsbJtagPort` on B, matching the original's own
    /// `m_ioftdi(dev, INTERFACE_B)` construction alongside a device
    /// that may already have interface A claimed.
    pub fn open(handle: &'a DeviceHandle<Context>) -> Result<Self, SessionError> {
        handle
            .claim_interface(INTERFACE_B)
            .map_err(|source| SessionError::Usb { context: "claim interface B for JTAG", source })?;

        ftdi::set_bitmode(handle, u16::from(INTERFACE_B), 0, ftdi::BITMODE_RESET)?;
        ftdi::set_bitmode(handle, u16::from(INTERFACE_B), GPIO_DIRECTION, ftdi::BITMODE_MPSSE)?;

        let port = UsbJtagPort { handle };
        port.send(&[MPSSE_SET_CLOCK_DIVISOR, (CLOCK_DIVISOR & 0xff) as u8, (CLOCK_DIVISOR >> 8) as u8])?;
        port.send(&[MPSSE_SET_LOW_BYTE, GPIO_INITIAL, GPIO_DIRECTION])?;
        Ok(port)
    }

    fn send(&self, bytes: &[u8]) -> Result<(), SessionError> {
        self.handle
            .write_bulk(ENDPOINT_B_OUT, bytes, BULK_TIMEOUT)
            .map(|_| ())
            .map_err(|source| SessionError::Usb { context: "jtag mpsse write", source })
    }

    /// Clocks a single TMS/TDI bit and returns the sampled TDO bit.
    fn clock_bit(&self, tms: bool, tdi: bool) -> Result<bool, SessionError> {
        let data = (u8::from(tdi) << 7) | u8::from(tms);
        self.send(&[MPSSE_CLOCK_TMS_READ, 0x00, data])?;
        let byte = self.read_reply_byte()?;
        Ok(byte & 0x01 == 1)
    }

    fn read_reply_byte(&self) -> Result<u8, SessionError> {
        let mut buf = [0u8; STATUS_PREFIX_LEN + 1];
        let mut received = 0;
        for attempt in 0..READ_RETRY_ATTEMPTS {
            let n = self
                .handle
                .read_bulk(ENDPOINT_B_IN, &mut buf[received..], BULK_TIMEOUT)
                .map_err(|source| SessionError::Usb { context: "jtag mpsse read", source })?;
            received += n;
            if received >= buf.len() {
                return Ok(buf[STATUS_PREFIX_LEN]);
            }
            if attempt + 1 < READ_RETRY_ATTEMPTS {
                std::thread::sleep(READ_RETRY_DELAY);
            }
        }
        Err(SessionError::ReadTimeout { expected: buf.len(), received })
    }
}

impl<'a> Drop for UsbJtagPort<'a> {
    fn drop(&mut self) {
        let _ = ftdi::set_bitmode(self.handle, u16::from(INTERFACE_B), 0, ftdi::BITMODE_RESET);
        let _ = self.handle.release_interface(INTERFACE_B);
    }
}

impl<'a> JtagPort for UsbJtagPort<'a> {
    fn shift(&mut self, tms: &[bool], tdi: &[bool]) -> Vec<bool> {
        tms.iter()
            .zip(tdi.iter())
            .map(|(&tms_bit, &tdi_bit)| self.clock_bit(tms_bit, tdi_bit).unwrap_or(false))
            .collect()
    }
}
