//! Accept loop and the live connection table: a TCP listener handing
//! fresh sockets to per-connection state, plus the set that `send_all`
//! (broadcast) iterates.
//!
//! Connections live behind `Rc`, not `Arc`: everything here runs on
//! the single `LocalSet` reactor thread, so no mutex is needed anywhere
//! in this module.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;
use tokio::net::TcpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::net::conn;
use crate::registry::DeviceRegistry;

pub type ConnId = u64;

/// Per-connection bookkeeping the listener needs to broadcast to and
/// tear down a connection: the channel its write pump drains, and the
/// two pump tasks to cancel on forced teardown.
pub struct ConnHandle {
    pub out_tx: tokio::sync::mpsc::Sender<Bytes>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

/// Outbound queue depth per connection before a client is considered
/// stuck and dropped. An unbounded queue behind a slow reader is
/// exactly the unbounded-memory risk the 10 MiB message cap exists to
/// avoid on the read side, so the write side gets the same treatment.
const OUT_QUEUE_CAPACITY: usize = 1024;

pub type ConnTable = Rc<RefCell<HashMap<ConnId, ConnHandle>>>;

pub fn new_conn_table() -> ConnTable {
    Rc::new(RefCell::new(HashMap::new()))
}

/// Appends `payload` to every connection's out queue. A connection
/// whose queue is full is treated as stuck and torn down rather than
/// blocking the broadcast to every other client.
pub fn send_all(conns: &ConnTable, payload: Bytes) {
    let mut stuck = Vec::new();
    for (&id, handle) in conns.borrow().iter() {
        if handle.out_tx.try_send(payload.clone()).is_err() {
            stuck.push(id);
        }
    }
    for id in stuck {
        warn!(conn = id, "client outbound queue full, dropping connection");
        remove_connection(conns, id);
    }
}

/// Aborts both pump tasks and drops the entry. Already-pending pump
/// operations observe cancellation and do not re-arm.
pub fn remove_connection(conns: &ConnTable, id: ConnId) {
    if let Some(handle) = conns.borrow_mut().remove(&id) {
        handle.read_task.abort();
        handle.write_task.abort();
    }
}

/// Binds and starts listening on `port`, `SO_REUSEADDR` set. Split out
/// from `accept_loop` so a bind failure surfaces synchronously to
/// `runtime::run` as a fatal startup error, rather than only showing up
/// once the spawned accept task is later awaited at shutdown.
pub fn bind(port: u16) -> std::io::Result<tokio::net::TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket.bind(addr)?;
    socket.listen(1024)
}

pub async fn accept_loop(
    listener: tokio::net::TcpListener,
    registry: Rc<RefCell<DeviceRegistry>>,
    conns: ConnTable,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let mut next_id: ConnId = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);

                let id = next_id;
                next_id += 1;
                info!(conn = id, %peer, "client connected");

                let (out_tx, out_rx) = tokio::sync::mpsc::channel(OUT_QUEUE_CAPACITY);
                let (read_half, write_half) = stream.into_split();

                let write_task = conn::spawn_write_pump(id, write_half, out_rx);
                let read_task = conn::spawn_read_pump(
                    id,
                    read_half,
                    out_tx.clone(),
                    registry.clone(),
                    conns.clone(),
                );

                conns.borrow_mut().insert(id, ConnHandle { out_tx, read_task, write_task });
            }
        }
    }

    // Collect into an owned `Vec` first: the `Ref` produced by
    // `conns.borrow()` is scoped to the whole loop body if used
    // directly as the `for` head, which would deadlock against
    // `remove_connection`'s own `borrow_mut()`.
    let ids: Vec<ConnId> = conns.borrow().keys().copied().collect();
    for id in ids {
        remove_connection(&conns, id);
    }
    Ok(())
}
