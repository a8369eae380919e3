//! FPGA/FTDI USB bridge daemon core: USB hotplug and register I/O
//! (`usb`), the device table that serializes it all against client
//! RPCs (`registry`), the client-facing wire protocol (`wire`, `rpc`),
//! the network surface (`net`), and the ambient stack (`config`,
//! `error`, `cli`, `logging`, `shutdown`, `runtime`) that assembles
//! them into a running process.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod net;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod shutdown;
pub mod usb;
pub mod wire;
