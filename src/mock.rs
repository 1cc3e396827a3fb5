//! Built-in mock target server.
//!
//! A small in-memory RESP server answering SET, GET, PING and COMMAND.
//! It runs on its own tokio runtime in a background thread so the blocking
//! benchmark workers can talk to it from the same process, and it counts
//! connections, requests and responses so a run can be checked against
//! what the workers claim to have sent.

use crate::protocols::resp::{parse, Frame, ParseResult};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Counters observed by the mock target
#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    set_requests: AtomicU64,
    get_requests: AtomicU64,
    other_requests: AtomicU64,
    responses: AtomicU64,
}

/// Point-in-time copy of the mock target's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockStats {
    pub connections: u64,
    pub set_requests: u64,
    pub get_requests: u64,
    pub other_requests: u64,
    pub responses: u64,
}

/// State shared by every connection
#[derive(Debug, Default)]
struct Shared {
    store: Mutex<HashMap<Bytes, Bytes>>,
    counters: Counters,
}

/// Handle to a running mock target. Dropping it shuts the server down.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    /// Bind `addr` (port 0 picks a free port) and start serving.
    pub fn start(addr: &str) -> io::Result<Self> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mock-target")
            .enable_all()
            .build()?;

        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let server_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("mock-target-accept".to_string())
            .spawn(move || {
                runtime.block_on(serve(listener, server_shared, shutdown_rx));
            })?;

        info!(address = %local_addr, "Mock target listening");

        Ok(MockServer {
            addr: local_addr,
            shared,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> MockStats {
        let c = &self.shared.counters;
        MockStats {
            connections: c.connections.load(Ordering::SeqCst),
            set_requests: c.set_requests.load(Ordering::SeqCst),
            get_requests: c.get_requests.load(Ordering::SeqCst),
            other_requests: c.other_requests.load(Ordering::SeqCst),
            responses: c.responses.load(Ordering::SeqCst),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(
    listener: std::net::TcpListener,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Failed to register mock target listener");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Mock target shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "New connection");
                    shared.counters.connections.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(error = %e, "Failed to set TCP_NODELAY");
                    }

                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, shared).await {
                            debug!(error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Requests the mock target understands
#[derive(Debug)]
enum MockCommand {
    Ping,
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes },
    /// Redis COMMAND, answered with an empty array for client compatibility
    Command,
}

fn parse_command(frame: Frame) -> Result<MockCommand, String> {
    let frames = match frame {
        Frame::Array(Some(frames)) if !frames.is_empty() => frames,
        Frame::Array(_) => return Err("ERR empty command".to_string()),
        _ => return Err("ERR expected array".to_string()),
    };

    let name = frames[0]
        .as_bulk()
        .and_then(|data| std::str::from_utf8(data).ok())
        .map(str::to_uppercase)
        .ok_or_else(|| "ERR expected bulk string for command name".to_string())?;

    let arg = |i: usize| -> Result<Bytes, String> {
        match frames.get(i) {
            Some(Frame::Bulk(Some(data))) => Ok(data.clone()),
            Some(_) => Err("ERR invalid argument".to_string()),
            None => Err(format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            )),
        }
    };

    match name.as_str() {
        "PING" => Ok(MockCommand::Ping),
        "GET" => Ok(MockCommand::Get { key: arg(1)? }),
        "SET" => Ok(MockCommand::Set {
            key: arg(1)?,
            value: arg(2)?,
        }),
        "COMMAND" => Ok(MockCommand::Command),
        _ => Err(format!("ERR unknown command '{name}'")),
    }
}

fn execute(shared: &Shared, cmd: MockCommand) -> Frame {
    let counters = &shared.counters;
    match cmd {
        MockCommand::Ping => {
            counters.other_requests.fetch_add(1, Ordering::SeqCst);
            Frame::simple("PONG")
        }
        MockCommand::Get { key } => {
            counters.get_requests.fetch_add(1, Ordering::SeqCst);
            let store = match shared.store.lock() {
                Ok(store) => store,
                Err(poisoned) => poisoned.into_inner(),
            };
            match store.get(&key) {
                Some(value) => Frame::bulk(value.clone()),
                None => Frame::null(),
            }
        }
        MockCommand::Set { key, value } => {
            counters.set_requests.fetch_add(1, Ordering::SeqCst);
            let mut store = match shared.store.lock() {
                Ok(store) => store,
                Err(poisoned) => poisoned.into_inner(),
            };
            store.insert(key, value);
            Frame::simple("OK")
        }
        MockCommand::Command => {
            counters.other_requests.fetch_add(1, Ordering::SeqCst);
            Frame::Array(Some(Vec::new()))
        }
    }
}

/// Serve one client connection until it closes.
async fn handle_connection<S>(
    mut stream: S,
    shared: Arc<Shared>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        if buffer.is_empty() && stream.read_buf(&mut buffer).await? == 0 {
            trace!("Connection closed by client");
            return Ok(());
        }

        match parse(&buffer) {
            ParseResult::Complete(frame, consumed) => {
                trace!(?frame, "Processing RESP command");
                buffer.advance(consumed);

                let response = match parse_command(frame) {
                    Ok(cmd) => execute(&shared, cmd),
                    Err(msg) => Frame::error(msg),
                };

                // Counted before the write: a reply the client holds is
                // always already in the stats
                shared.counters.responses.fetch_add(1, Ordering::SeqCst);
                stream.write_all(&response.encode()).await?;
            }

            ParseResult::Incomplete => {
                if stream.read_buf(&mut buffer).await? == 0 {
                    if !buffer.is_empty() {
                        warn!("Connection closed with incomplete frame");
                    }
                    return Ok(());
                }
            }

            ParseResult::Error(e) => {
                warn!(error = %e, "RESP parse error");
                shared.counters.responses.fetch_add(1, Ordering::SeqCst);
                stream
                    .write_all(&Frame::error(format!("ERR {e}")).encode())
                    .await?;
                buffer.clear();
            }
        }
    }
}
