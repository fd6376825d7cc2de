//! Per-connection handling: line framing and subscriber wiring

use fluxdb_core::manager::DatabaseManager;
use fluxdb_core::pubsub::{PubSubManager, Subscriber};
use fluxdb_core::query::QueryProcessor;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Socket read timeout; lets idle handlers notice closed peers
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected client, shared between its handler thread and pub/sub
///
/// Responses and published messages go through the same mutex so frames
/// never interleave on the wire.
pub struct ClientHandle {
    id: u64,
    stream: Mutex<TcpStream>,
}

impl Subscriber for ClientHandle {
    fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, message: &str) -> std::io::Result<()> {
        self.stream.lock().write_all(message.as_bytes())
    }
}

/// Serve one client until it disconnects
pub fn handle_client(
    stream: TcpStream,
    conn_id: u64,
    manager: Arc<DatabaseManager>,
    pubsub: Arc<PubSubManager>,
    password: &str,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    debug!("connection {} from {}", conn_id, peer);

    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!("connection {}: cannot set read timeout: {}", conn_id, e);
        return;
    }
    let mut reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            warn!("connection {}: cannot clone stream: {}", conn_id, e);
            return;
        }
    };

    let handle = Arc::new(ClientHandle {
        id: conn_id,
        stream: Mutex::new(stream),
    });
    let mut processor = QueryProcessor::new(manager, pubsub, handle.clone(), password);

    let mut pending = Vec::new();
    let mut buf = [0u8; 4096];

    'serve: loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(_) => break,
        };
        pending.extend_from_slice(&buf[..read]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                continue;
            }

            let response = processor.process(line);
            if handle.send(&response).is_err() {
                break 'serve;
            }
        }
    }

    processor.disconnect();
    debug!("connection {} closed", conn_id);
}
