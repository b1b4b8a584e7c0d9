//! WebSocket side of the preview. One thread accepts browser clients, one
//! thread pushes reload messages to them.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tungstenite::WebSocket;

use super::ReloadKind;
use crate::error::ServeError;

/// Sockets beyond this many are closed, oldest first.
const MAX_CLIENTS: usize = 10;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

#[derive(Debug, Default)]
struct Slot {
    pending: Option<ReloadKind>,
    closed: bool,
}

/// A single pending reload. Requests made while one is pending replace it,
/// except that a pending full reload is never narrowed to a stylesheet swap.
#[derive(Debug, Default)]
pub(crate) struct ReloadSignal {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl ReloadSignal {
    pub fn notify(&self, kind: ReloadKind) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.pending != Some(ReloadKind::Full) {
            slot.pending = Some(kind);
        }
        self.ready.notify_one();
    }

    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.closed = true;
        self.ready.notify_all();
    }

    /// Blocks until a reload is pending. Returns `None` once closed.
    pub fn wait(&self) -> Option<ReloadKind> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(kind) = slot.pending.take() {
                return Some(kind);
            }
            if slot.closed {
                return None;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub(crate) struct LiveServer {
    addr: SocketAddr,
    clients: Clients,
    signal: Arc<ReloadSignal>,
    stopped: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    reload: Option<JoinHandle<()>>,
}

impl LiveServer {
    pub fn start(host: IpAddr, port: u16) -> Result<Self, ServeError> {
        let listener = reserve_port(host, port)?;
        let addr = listener.local_addr()?;

        let clients: Clients = Arc::default();
        let signal = Arc::new(ReloadSignal::default());
        let stopped = Arc::new(AtomicBool::new(false));

        let accept = new_thread_ws_incoming(listener, clients.clone(), stopped.clone());
        let reload = new_thread_ws_reload(clients.clone(), signal.clone());

        Ok(Self {
            addr,
            clients,
            signal,
            stopped,
            accept: Some(accept),
            reload: Some(reload),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn reload(&self, kind: ReloadKind) {
        self.signal.notify(kind);
    }

    pub fn clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stop(&mut self) {
        let Some(accept) = self.accept.take() else {
            return;
        };

        self.stopped.store(true, Ordering::SeqCst);
        // Wake the accept loop so it notices.
        TcpStream::connect(reachable(self.addr)).ok();
        accept.join().ok();

        self.signal.close();
        if let Some(reload) = self.reload.take() {
            reload.join().ok();
        }
    }
}

impl Drop for LiveServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reserve_port(host: IpAddr, port: u16) -> Result<TcpListener, ServeError> {
    match TcpListener::bind((host, port)) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::debug!("port {port} is taken, picking another: {e}");
            let fallback = SocketAddr::new(host, 0);
            TcpListener::bind(fallback).map_err(|e| ServeError::Bind(fallback, e))
        }
    }
}

/// An unspecified address can be listened on but not connected to.
fn reachable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

fn new_thread_ws_incoming(
    server: TcpListener,
    clients: Clients,
    stopped: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            if stopped.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => handshake(stream, clients.clone(), stopped.clone()),
                Err(e) => tracing::warn!("couldn't accept live reload client: {e}"),
            }
        }
    })
}

/// Upgrades a connection on its own thread, so a client that never finishes
/// the handshake can't hold up the accept loop.
fn handshake(stream: TcpStream, clients: Clients, stopped: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        if let Err(e) = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)) {
            tracing::debug!("couldn't set handshake timeout: {e}");
            return;
        }

        let mut socket = match tungstenite::accept(stream) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!("websocket handshake failed: {e}");
                return;
            }
        };

        if let Err(e) = socket.get_ref().set_read_timeout(None) {
            tracing::debug!("couldn't clear handshake timeout: {e}");
        }

        let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
        if stopped.load(Ordering::SeqCst) {
            socket.close(None).ok();
            return;
        }
        tracing::debug!("live reload client connected");
        clients.push(socket);
    });
}

fn new_thread_ws_reload(clients: Clients, signal: Arc<ReloadSignal>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Some(kind) = signal.wait() {
            let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
            broadcast(&mut clients, kind);
            tracing::debug!(?kind, clients = clients.len(), "sent reload");
        }

        let mut clients = clients.lock().unwrap_or_else(PoisonError::into_inner);
        for mut socket in clients.drain(..) {
            socket.close(None).ok();
            socket.flush().ok();
        }
    })
}

fn broadcast(clients: &mut Vec<WebSocket<TcpStream>>, kind: ReloadKind) {
    clients.retain_mut(|socket| match socket.send(kind.message().into()) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("dropping live reload client: {e}");
            false
        }
    });

    let len = clients.len();
    if len > MAX_CLIENTS {
        for mut socket in clients.drain(0..len - MAX_CLIENTS) {
            socket.close(None).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn last_request_wins() {
        let signal = ReloadSignal::default();
        signal.notify(ReloadKind::Css);
        signal.notify(ReloadKind::Css);
        assert_eq!(signal.wait(), Some(ReloadKind::Css));

        signal.notify(ReloadKind::Css);
        signal.notify(ReloadKind::Full);
        assert_eq!(signal.wait(), Some(ReloadKind::Full));

        signal.close();
        assert_eq!(signal.wait(), None);
    }

    #[test]
    fn waiting_thread_wakes_up() {
        let signal = Arc::new(ReloadSignal::default());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };

        thread::sleep(Duration::from_millis(50));
        signal.notify(ReloadKind::Full);

        assert_eq!(waiter.join().unwrap(), Some(ReloadKind::Full));
    }

    #[test]
    fn taken_port_falls_back() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut live = LiveServer::start(Ipv4Addr::LOCALHOST.into(), port).unwrap();
        assert_ne!(live.addr().port(), port);
        live.stop();
    }

    #[test]
    fn full_reload_is_not_narrowed_to_css() {
        let signal = ReloadSignal::default();
        signal.notify(ReloadKind::Full);
        signal.notify(ReloadKind::Css);

        assert_eq!(signal.wait(), Some(ReloadKind::Full));
    }

    #[test]
    fn silent_connection_does_not_block_clients_or_stop() {
        let mut live = LiveServer::start(Ipv4Addr::LOCALHOST.into(), 0).unwrap();
        let _silent = TcpStream::connect(live.addr()).unwrap();

        let url = format!("ws://{}", live.addr());
        let (_socket, _) = tungstenite::connect(url.as_str()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while live.clients() != 1 {
            assert!(Instant::now() < deadline, "client never registered");
            thread::sleep(Duration::from_millis(20));
        }

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            live.stop();
            tx.send(()).ok();
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("stop() hung behind a silent connection");
    }

    #[test]
    fn unspecified_addresses_become_loopback() {
        let addr: SocketAddr = "0.0.0.0:1337".parse().unwrap();
        assert_eq!(reachable(addr), "127.0.0.1:1337".parse::<SocketAddr>().unwrap());
    }
}
