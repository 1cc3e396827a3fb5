//! Benchmark worker.
//!
//! A worker owns one blocking TCP connection and runs its share of
//! transactions over it, strictly one request in flight at a time:
//! send SET, wait for a reply, send GET for the same key, wait for a reply.
//! Replies are read into a fixed buffer and discarded.

use crate::protocols::resp::Command;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::debug;

/// Work assigned to one worker at launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTask {
    pub worker_id: usize,
    pub transaction_count: usize,
}

/// Connection parameters shared by every worker of a run
#[derive(Debug, Clone)]
pub struct Target {
    pub addr: SocketAddr,
    pub response_buffer: usize,
    /// Total time a worker may spend, connection setup included
    pub timeout: Option<Duration>,
}

/// The one value a worker hands back to the coordinator
#[derive(Debug)]
pub enum WorkerResult {
    Success { worker_id: usize, elapsed: Duration },
    Failure { worker_id: usize, cause: WorkerError },
}

impl WorkerResult {
    pub fn worker_id(&self) -> usize {
        match self {
            WorkerResult::Success { worker_id, .. } | WorkerResult::Failure { worker_id, .. } => {
                *worker_id
            }
        }
    }
}

/// Why a worker stopped before finishing its transactions
#[derive(Debug)]
pub enum WorkerError {
    Connect(io::Error),
    /// Setting a socket option failed
    Setup(io::Error),
    Send(io::Error),
    Receive(io::Error),
    /// Peer closed the connection before all replies arrived
    Closed,
    /// The worker's time budget ran out
    Timeout,
    Panicked,
    /// Still running when the run deadline passed
    Abandoned,
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerError::Connect(e) => write!(f, "connect failed: {e}"),
            WorkerError::Setup(e) => write!(f, "socket setup failed: {e}"),
            WorkerError::Send(e) => write!(f, "send failed: {e}"),
            WorkerError::Receive(e) => write!(f, "receive failed: {e}"),
            WorkerError::Closed => write!(f, "connection closed by peer"),
            WorkerError::Timeout => write!(f, "worker time budget exhausted"),
            WorkerError::Panicked => write!(f, "worker thread panicked"),
            WorkerError::Abandoned => write!(f, "no result before the run deadline"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Connect(e)
            | WorkerError::Setup(e)
            | WorkerError::Send(e)
            | WorkerError::Receive(e) => Some(e),
            _ => None,
        }
    }
}

/// `key_{worker_id}_{index}`
pub fn key_for(worker_id: usize, index: usize) -> String {
    format!("key_{worker_id}_{index}")
}

/// `value_{index}`
pub fn value_for(index: usize) -> String {
    format!("value_{index}")
}

/// Run one worker to completion.
///
/// Never panics on network errors; every failure is reported as
/// `WorkerResult::Failure`.
pub fn run(task: WorkerTask, target: &Target) -> WorkerResult {
    let worker_id = task.worker_id;
    debug!(
        worker = worker_id,
        transactions = task.transaction_count,
        "Worker starting"
    );

    match run_transactions(task, target) {
        Ok(elapsed) => {
            debug!(
                worker = worker_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Worker finished"
            );
            WorkerResult::Success { worker_id, elapsed }
        }
        Err(cause) => WorkerResult::Failure { worker_id, cause },
    }
}

fn run_transactions(task: WorkerTask, target: &Target) -> Result<Duration, WorkerError> {
    let mut budget = target.timeout.map(Budget::new);
    let mut stream = connect(target.addr, budget.as_ref())?;

    // Connection setup is excluded from the measured interval
    let start = Instant::now();

    let mut response = vec![0u8; target.response_buffer];

    for i in 0..task.transaction_count {
        let key = key_for(task.worker_id, i);
        let value = value_for(i);

        let set = Command::Set {
            key: &key,
            value: &value,
        };
        send(&mut stream, &set, budget.as_mut())?;
        receive(&mut stream, &mut response, budget.as_mut())?;

        let get = Command::Get { key: &key };
        send(&mut stream, &get, budget.as_mut())?;
        receive(&mut stream, &mut response, budget.as_mut())?;
    }

    let elapsed = start.elapsed();
    drop(stream);
    Ok(elapsed)
}

fn connect(addr: SocketAddr, budget: Option<&Budget>) -> Result<TcpStream, WorkerError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(WorkerError::Connect)?;

    match budget {
        Some(budget) => socket
            .connect_timeout(&addr.into(), budget.remaining()?)
            .map_err(|e| match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => WorkerError::Timeout,
                _ => WorkerError::Connect(e),
            })?,
        None => socket.connect(&addr.into()).map_err(WorkerError::Connect)?,
    }

    // Requests are tiny and strictly alternating with replies
    socket.set_nodelay(true).map_err(WorkerError::Setup)?;

    Ok(socket.into())
}

fn send(
    stream: &mut TcpStream,
    command: &Command<'_>,
    budget: Option<&mut Budget>,
) -> Result<(), WorkerError> {
    if let Some(budget) = budget {
        budget.arm(stream)?;
    }
    stream
        .write_all(&command.encode())
        .map_err(|e| io_failure(e, WorkerError::Send))
}

fn receive(
    stream: &mut TcpStream,
    buf: &mut [u8],
    budget: Option<&mut Budget>,
) -> Result<(), WorkerError> {
    if let Some(budget) = budget {
        budget.arm(stream)?;
    }
    loop {
        match stream.read(buf) {
            Ok(0) => return Err(WorkerError::Closed),
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_failure(e, WorkerError::Receive)),
        }
    }
}

/// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows
fn io_failure(e: io::Error, wrap: fn(io::Error) -> WorkerError) -> WorkerError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => WorkerError::Timeout,
        _ => wrap(e),
    }
}

/// Time left for one worker, enforced through socket timeouts.
///
/// The socket timeout is re-armed only once less than half of the armed
/// interval remains; a blocked call overruns the deadline by at most the
/// remaining budget.
struct Budget {
    deadline: Instant,
    armed: Option<Duration>,
}

impl Budget {
    fn new(timeout: Duration) -> Self {
        Budget {
            deadline: Instant::now() + timeout,
            armed: None,
        }
    }

    fn remaining(&self) -> Result<Duration, WorkerError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(WorkerError::Timeout)
        } else {
            Ok(remaining)
        }
    }

    fn arm(&mut self, stream: &TcpStream) -> Result<(), WorkerError> {
        let remaining = self.remaining()?;
        if self.armed.map_or(true, |armed| remaining < armed / 2) {
            stream
                .set_read_timeout(Some(remaining))
                .map_err(WorkerError::Setup)?;
            stream
                .set_write_timeout(Some(remaining))
                .map_err(WorkerError::Setup)?;
            self.armed = Some(remaining);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::resp::command::encode_set;
    use std::collections::HashSet;
    use std::net::TcpListener;
    use std::thread;

    fn target(addr: SocketAddr, timeout: Option<Duration>) -> Target {
        Target {
            addr,
            response_buffer: 1024,
            timeout,
        }
    }

    /// Accepts one connection and answers every read with `+OK\r\n`
    /// until `replies` reads have been served, then closes.
    fn spawn_replier(replies: usize) -> (SocketAddr, thread::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let mut served = 0;
            while served < replies {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        stream.write_all(b"+OK\r\n").unwrap();
                        served += 1;
                    }
                }
            }
            served
        });
        (addr, handle)
    }

    #[test]
    fn test_key_and_value_format() {
        assert_eq!(key_for(0, 0), "key_0_0");
        assert_eq!(key_for(3, 9999), "key_3_9999");
        assert_eq!(value_for(42), "value_42");
    }

    #[test]
    fn test_keys_unique_across_workers() {
        let mut seen = HashSet::new();
        for worker_id in 0..12 {
            for i in 0..120 {
                assert!(seen.insert(key_for(worker_id, i)));
            }
        }
        assert_eq!(seen.len(), 12 * 120);
    }

    #[test]
    fn test_worker_completes_transactions() {
        let (addr, server) = spawn_replier(6);
        let task = WorkerTask {
            worker_id: 1,
            transaction_count: 3,
        };

        match run(task, &target(addr, Some(Duration::from_secs(5)))) {
            WorkerResult::Success { worker_id, elapsed } => {
                assert_eq!(worker_id, 1);
                assert!(elapsed > Duration::ZERO);
            }
            WorkerResult::Failure { cause, .. } => panic!("worker failed: {cause}"),
        }
        assert_eq!(server.join().unwrap(), 6);
    }

    #[test]
    fn test_zero_transactions_still_connects() {
        let (addr, server) = spawn_replier(0);
        let task = WorkerTask {
            worker_id: 0,
            transaction_count: 0,
        };
        assert!(matches!(
            run(task, &target(addr, None)),
            WorkerResult::Success { worker_id: 0, .. }
        ));
        assert_eq!(server.join().unwrap(), 0);
    }

    #[test]
    fn test_early_close_is_reported() {
        // Serves one reply, then hangs up mid-run
        let (addr, server) = spawn_replier(1);
        let task = WorkerTask {
            worker_id: 7,
            transaction_count: 10,
        };

        match run(task, &target(addr, Some(Duration::from_secs(5)))) {
            WorkerResult::Failure { worker_id, cause } => {
                assert_eq!(worker_id, 7);
                // A reset may surface on the next send instead of the read
                assert!(matches!(
                    cause,
                    WorkerError::Closed | WorkerError::Send(_) | WorkerError::Receive(_)
                ));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_clean_close_is_closed() {
        // Consumes the SET, then shuts down cleanly without replying
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).unwrap();
            stream.shutdown(std::net::Shutdown::Both).unwrap();
            n
        });
        let task = WorkerTask {
            worker_id: 5,
            transaction_count: 3,
        };

        match run(task, &target(addr, Some(Duration::from_secs(5)))) {
            WorkerResult::Failure {
                worker_id: 5,
                cause: WorkerError::Closed,
            } => {}
            other => panic!("Expected Closed, got {other:?}"),
        }
        assert_eq!(server.join().unwrap(), encode_set("key_5_0", "value_0").len());
    }

    #[test]
    fn test_connect_refused_is_reported() {
        // Bind then drop to get a port with nothing listening
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let task = WorkerTask {
            worker_id: 2,
            transaction_count: 1,
        };

        match run(task, &target(addr, None)) {
            WorkerResult::Failure {
                worker_id: 2,
                cause: WorkerError::Connect(_),
            } => {}
            other => panic!("Expected connect failure, got {other:?}"),
        }
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let task = WorkerTask {
            worker_id: 4,
            transaction_count: 1,
        };

        let started = Instant::now();
        let result = run(task, &target(addr, Some(Duration::from_millis(200))));

        assert!(matches!(
            result,
            WorkerResult::Failure {
                worker_id: 4,
                cause: WorkerError::Timeout
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }
}
