//! Per-connection read and write pumps.
//!
//! Mirrors the original `Connection` class's `doRead`/`doWrite` pair,
//! with the queue hop the original takes care to make explicit
//! (`spec.md` §4.6: "post a write task to the reactor, never re-enter
//! from the read completion directly") expressed naturally as two
//! independent tasks connected by a channel rather than as a manual
//! reentrancy guard.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::net::listener::{remove_connection, ConnTable};
use crate::registry::DeviceRegistry;
use crate::rpc::dispatcher;
use crate::wire::codec::{encode_message, FrameDecoder};

const READ_CHUNK: usize = 64 * 1024;

/// Reads frames off `read_half`, dispatches each complete request
/// against `registry`, and pushes the reply onto `out_tx`. Exits (and
/// tears the connection down) on EOF, a protocol violation, an
/// oversized message, or a closed outbound queue.
pub fn spawn_read_pump(
    id: u64,
    mut read_half: OwnedReadHalf,
    out_tx: Sender<Bytes>,
    registry: Rc<RefCell<DeviceRegistry>>,
    conns: ConnTable,
) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        let mut decoder = FrameDecoder::new();
        let mut chunk = BytesMut::with_capacity(READ_CHUNK);

        'pump: loop {
            chunk.clear();
            let n = match read_half.read_buf(&mut chunk).await {
                Ok(0) => {
                    debug!(conn = id, "client disconnected");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    warn!(conn = id, %err, "read error");
                    break;
                }
            };

            decoder.feed(&chunk[..n]);
            let messages = match decoder.drain() {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(conn = id, %err, "protocol violation, dropping connection");
                    break;
                }
            };

            for request in &messages {
                let reply = {
                    let mut registry = registry.borrow_mut();
                    dispatcher::handle_request(request, &mut registry)
                };
                if out_tx.send(encode_message(&reply)).await.is_err() {
                    break 'pump;
                }
            }
        }

        remove_connection(&conns, id);
    })
}

/// Drains `out_rx` in FIFO order, fully flushing each queued buffer to
/// the socket before moving to the next so replies and broadcast
/// events never interleave mid-message.
pub fn spawn_write_pump(
    id: u64,
    mut write_half: OwnedWriteHalf,
    mut out_rx: Receiver<Bytes>,
) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        while let Some(buf) = out_rx.recv().await {
            if let Err(err) = write_half.write_all(&buf).await {
                warn!(conn = id, %err, "write error, dropping connection");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    })
}

