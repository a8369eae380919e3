//! Request decoding (`command`) and dispatch against the device
//! registry (`dispatcher`).

pub mod command;
pub mod dispatcher;
