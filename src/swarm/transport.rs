/// Blocking TCP transport for the peer protocol.
///
/// Each node runs one background [`Listener`] serving ping and pull
/// requests against the latest published snapshot, and opens short-lived
/// client connections to its peers when it merges.
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, warn};

use crate::swarm::wire::{Frame, ParamsMsg};
use crate::SwarmError;

/// Latest snapshot served to pulling peers. `None` until the node first
/// publishes.
pub type Published = Arc<Mutex<Option<ParamsMsg>>>;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const IO_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Background server answering peer requests until shut down or dropped.
pub struct Listener {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `addr` and start serving `published` on a background thread
    pub fn bind(addr: SocketAddr, published: Published, io_timeout: Duration) -> crate::Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| SwarmError::Sync(format!("failed to bind {}: {}", addr, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_flag = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name("swarm-listener".to_string())
            .spawn(move || serve(listener, published, thread_flag, io_timeout))?;

        debug!("listening for peers on {}", local_addr);
        Ok(Self {
            shutdown,
            handle: Some(handle),
            local_addr,
        })
    }

    /// Address the listener actually bound, useful when port 0 was requested
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the background thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve(
    listener: TcpListener,
    published: Published,
    shutdown: Arc<AtomicBool>,
    io_timeout: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = handle_conn(stream, &published, io_timeout) {
                    warn!("request from {} failed: {}", peer, e);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn handle_conn(
    mut stream: TcpStream,
    published: &Published,
    io_timeout: Duration,
) -> crate::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))?;

    match Frame::read_from(&mut stream)? {
        Frame::Ping => Frame::Pong.write_to(&mut stream),
        Frame::Pull => {
            let snapshot = published.lock().unwrap().clone();
            match snapshot {
                Some(msg) => Frame::Params(msg).write_to(&mut stream),
                None => Frame::NotReady.write_to(&mut stream),
            }
        }
        other => Err(SwarmError::Sync(format!(
            "unexpected request frame {:?}",
            other
        ))),
    }
}

fn connect(
    addr: SocketAddr,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> crate::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|e| SwarmError::Sync(format!("failed to connect to {}: {}", addr, e)))?;
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))?;
    Ok(stream)
}

/// Check that the peer at `addr` is up and speaking the protocol
pub fn ping(addr: SocketAddr, connect_timeout: Duration, io_timeout: Duration) -> crate::Result<()> {
    let mut stream = connect(addr, connect_timeout, io_timeout)?;
    Frame::Ping.write_to(&mut stream)?;
    match Frame::read_from(&mut stream)? {
        Frame::Pong => Ok(()),
        other => Err(SwarmError::Sync(format!(
            "expected pong from {}, got {:?}",
            addr, other
        ))),
    }
}

/// Fetch the peer's latest snapshot. `Ok(None)` means the peer is up but
/// has not published yet.
pub fn pull(
    addr: SocketAddr,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> crate::Result<Option<ParamsMsg>> {
    let mut stream = connect(addr, connect_timeout, io_timeout)?;
    Frame::Pull.write_to(&mut stream)?;
    match Frame::read_from(&mut stream)? {
        Frame::Params(msg) => Ok(Some(msg)),
        Frame::NotReady => Ok(None),
        other => Err(SwarmError::Sync(format!(
            "expected params from {}, got {:?}",
            addr, other
        ))),
    }
}
