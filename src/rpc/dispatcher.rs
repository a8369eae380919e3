//! Turns a decoded request into the two-element `[code, payload]` reply
//! the wire protocol uses, and builds the out-of-band event messages
//! broadcast to every connected client.
//!
//! Reply/event codes: `0` ok, `-1` error, `1` device added, `2` device
//! removed, `3` register changed.

use crate::error::DispatchError;
use crate::registry::DeviceRegistry;
use crate::rpc::command::Command;
use crate::usb::session::RegChanged;
use crate::wire::value::Value;

const RPC_OK: i64 = 0;
const RPC_ERROR: i64 = -1;
const RPC_ADDED: i64 = 1;
const RPC_REMOVED: i64 = 2;
const RPC_REG_CHANGED: i64 = 3;

/// Decodes `request` and runs it against `registry`, returning the
/// reply to send back on the same connection.
pub fn handle_request(request: &Value, registry: &mut DeviceRegistry) -> Value {
    let result = Command::decode(request).and_then(|command| dispatch(command, registry));
    match result {
        Ok(value) => Value::Array(vec![Value::Int(RPC_OK), value]),
        Err(err) => Value::Array(vec![Value::Int(RPC_ERROR), Value::from(error_message(&err))]),
    }
}

fn dispatch(command: Command, registry: &mut DeviceRegistry) -> Result<Value, DispatchError> {
    match command {
        Command::DeviceList => {
            let list = registry.device_list().into_iter().map(Value::from).collect();
            Ok(Value::Array(list))
        }
        Command::Reprogram { serial } => {
            if !registry.has_serial(&serial) {
                return Err(DispatchError::UnknownDevice);
            }
            registry.reprogram(&serial)?;
            Ok(Value::UInt(0))
        }
        Command::WriteReg { serial, addr, port, value } => {
            let session = registry.session_mut(&serial).ok_or(DispatchError::UnknownDevice)?;
            session.write_reg(addr, port, value)?;
            Ok(Value::UInt(0))
        }
        Command::ReadReg { serial, addr, port } => {
            let session = registry.session_mut(&serial).ok_or(DispatchError::UnknownDevice)?;
            let value = session.read_reg(addr, port)?;
            Ok(Value::from(value))
        }
        Command::WriteRegN { serial, addr, port, data_be } => {
            let session = registry.session_mut(&serial).ok_or(DispatchError::UnknownDevice)?;
            session.write_reg_n(addr, port, &data_be)?;
            Ok(Value::UInt(0))
        }
        Command::ReadRegN { serial, addr, port, n_words } => {
            let session = registry.session_mut(&serial).ok_or(DispatchError::UnknownDevice)?;
            let data = session.read_reg_n(addr, port, n_words)?;
            Ok(Value::Bin(data))
        }
    }
}

fn error_message(err: &DispatchError) -> String {
    match err {
        DispatchError::InvalidMessage => "Invalid message".into(),
        DispatchError::InvalidCommand => "Invalid command".into(),
        DispatchError::UnknownDevice => "Unknown device".into(),
        DispatchError::InvalidArgument => "Invalid argument".into(),
        DispatchError::Session(source) => source.client_message(),
        DispatchError::Program(source) => source.to_string(),
    }
}

pub fn event_added(serial: &str) -> Value {
    Value::Array(vec![Value::Int(RPC_ADDED), Value::from(serial)])
}

pub fn event_removed(serial: &str) -> Value {
    Value::Array(vec![Value::Int(RPC_REMOVED), Value::from(serial)])
}

pub fn event_reg_changed(serial: &str, change: RegChanged) -> Value {
    Value::Array(vec![
        Value::Int(RPC_REG_CHANGED),
        Value::from(serial),
        Value::from(change.addr),
        Value::from(change.port),
        Value::from(change.value),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn empty_registry() -> DeviceRegistry {
        DeviceRegistry::new(Config { port: 0, device_descriptions: vec![] })
    }

    #[test]
    fn devicelist_on_empty_registry_returns_empty_array() {
        let mut registry = empty_registry();
        let request = Value::Array(vec![Value::str("devicelist")]);
        let reply = handle_request(&request, &mut registry);
        assert_eq!(reply, Value::Array(vec![Value::Int(RPC_OK), Value::Array(vec![])]));
    }

    #[test]
    fn unknown_command_replies_with_error_code_and_message() {
        let mut registry = empty_registry();
        let request = Value::Array(vec![Value::str("frobnicate")]);
        let reply = handle_request(&request, &mut registry);
        assert_eq!(
            reply,
            Value::Array(vec![Value::Int(RPC_ERROR), Value::from("Invalid command")])
        );
    }

    #[test]
    fn writereg_on_unknown_device_replies_with_unknown_device_error() {
        let mut registry = empty_registry();
        let request = Value::Array(vec![
            Value::str("writereg"),
            Value::str("NOPE"),
            Value::UInt(0),
            Value::UInt(0),
            Value::UInt(1),
        ]);
        let reply = handle_request(&request, &mut registry);
        assert_eq!(
            reply,
            Value::Array(vec![Value::Int(RPC_ERROR), Value::from("Unknown device")])
        );
    }

    #[test]
    fn malformed_request_replies_with_invalid_message_error() {
        let mut registry = empty_registry();
        let reply = handle_request(&Value::UInt(1), &mut registry);
        assert_eq!(
            reply,
            Value::Array(vec![Value::Int(RPC_ERROR), Value::from("Invalid message")])
        );
    }

    #[test]
    fn event_added_encodes_code_and_serial() {
        assert_eq!(
            event_added("FAOUT001"),
            Value::Array(vec![Value::Int(RPC_ADDED), Value::from("FAOUT001")])
        );
    }

    #[test]
    fn event_reg_changed_encodes_all_fields() {
        let change = RegChanged { addr: 3, port: 1, value: 0x1234 };
        assert_eq!(
            event_reg_changed("FAOUT001", change),
            Value::Array(vec![
                Value::Int(RPC_REG_CHANGED),
                Value::from("FAOUT001"),
                Value::from(3u8),
                Value::from(1u8),
                Value::from(0x1234u16),
            ])
        );
    }
}
