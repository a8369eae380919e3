//! Crate-wide error types, one per module boundary.
//!
//! Handlers convert these into wire-level `[-1, msg]` replies or log
//! events rather than letting them unwind past the reactor loop; see
//! `rpc::dispatcher` and `registry`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("device description {index} ({name:?}): {reason}")]
    InvalidDescription { index: usize, name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum UsbError {
    #[error("libusb_init failed: {0}")]
    Init(rusb::Error),
    #[error("libusb hotplug is not supported by the underlying libusb build")]
    HotplugUnsupported,
    #[error("libusb_hotplug_register_callback failed: {0}")]
    HotplugRegister(rusb::Error),
    #[error("libusb event loop error: {0}")]
    EventLoop(rusb::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("libusb error during {context}: {source}")]
    Usb {
        context: &'static str,
        #[source]
        source: rusb::Error,
    },
    #[error("FTDI write error: expected to write {expected} bytes, wrote {actual}")]
    PartialWrite { expected: usize, actual: usize },
    #[error("FTDI read timeout: expected {expected} bytes, received {received}")]
    ReadTimeout { expected: usize, received: usize },
}

impl SessionError {
    /// Message surfaced to clients, matching the original's "FTDI ..." prefix convention.
    pub fn client_message(&self) -> String {
        format!("FTDI {self}")
    }
}

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("could not open bitfile {path}: {source}")]
    OpenBitfile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed bitfile {path}: {reason}")]
    MalformedBitfile { path: PathBuf, reason: String },
    #[error("JTAG chain error: expected exactly one device, found {found}")]
    ChainLength { found: usize },
    #[error("unexpected JTAG IDCODE 0x{idcode:08x}")]
    UnknownIdcode { idcode: u32 },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("programming algorithm failed: {0}")]
    Algorithm(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message exceeds the {limit} byte size cap")]
    TooLarge { limit: usize },
    #[error("malformed msgpack frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid message")]
    InvalidMessage,
    #[error("Invalid command")]
    InvalidCommand,
    #[error("Unknown device")]
    UnknownDevice,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Program(#[from] ProgramError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("libusb error: {0}")]
    Usb(#[from] rusb::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("duplicate serial number {0}, ignoring device")]
    DuplicateSerial(String),
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Usb(#[from] UsbError),
    #[error("failed to bind TCP listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
}

impl StartupError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Config(_) => 1,
            StartupError::Usb(_) => 2,
            StartupError::Bind { .. } => 3,
        }
    }
}
