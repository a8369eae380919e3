//! USB-facing layer: libusb context/hotplug (`bridge`), opened-device
//! lifecycle (`device`), the register protocol (`session`), FTDI
//! vendor requests (`ftdi`), and FPGA programming (`bitfile`, `jtag`,
//! `jtag_port`).

pub mod bitfile;
pub mod bridge;
pub mod device;
pub mod ftdi;
pub mod jtag;
pub mod jtag_port;
pub mod session;
