// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per connection): call `read_frame()` in a loop,
//   skip heartbeats, decode `Envelope`s, and send
//   `InternalEvent::MessageFrom` to the main thread. On EOF, I/O error, or
//   an idle connection (no frame within `idle_timeout`, enforced as the
//   socket read timeout), send `InternalEvent::Disconnected`.
// - **Writer threads** (one per connection): own the write half and drain
//   that connection's outbox. When the outbox stays empty for
//   `heartbeat_interval` they write a heartbeat frame, so clients can detect
//   a dead relay the same way the relay detects dead clients. Writes are
//   bounded by `write_timeout`; a peer that stops reading has its socket
//   shut down, which ends its reader thread as a disconnect.
// - **Main thread**: owns the `RoomRegistry` and the outbox of every
//   connection. It handles `room:join` itself and fans every other message
//   out to the sender's room by pushing the encoded frame onto each
//   recipient's outbox. Outboxes hold at most `OUTBOX_CAPACITY` frames; a
//   frame for a full outbox is dropped for that peer alone.
//
// Relayed messages are forwarded unchanged except for `host:state`, which is
// unwrapped to the bare snapshot (see `Envelope::into_relayed`). Messages
// from a connection that has not joined a room are dropped. A malformed
// message is logged and skipped; it does not cost the sender its
// connection.
//
// Shutdown: `RelayHandle::stop` clears `keep_running`; the main loop notices
// within `LOOP_WAKE`, shuts every socket down (which ends the reader and
// writer threads), and exits.

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use dune_timer_protocol::{Envelope, EventKind, Frame, read_frame, write_heartbeat, write_message};
use log::{debug, info, warn};

use crate::room::{ConnectionId, JoinOutcome, RoomRegistry};

/// How often the main loop wakes to check `keep_running` when idle.
const LOOP_WAKE: Duration = Duration::from_millis(100);

/// Frames queued for one connection before further frames to it are dropped.
pub const OUTBOX_CAPACITY: usize = 64;

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
        peer: SocketAddr,
    },
    MessageFrom {
        conn: ConnectionId,
        envelope: Envelope,
    },
    Disconnected {
        conn: ConnectionId,
    },
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    /// Outbound keep-alive cadence on an otherwise idle connection.
    pub heartbeat_interval: Duration,
    /// A connection that sends nothing (not even a heartbeat) for this long
    /// is dropped.
    pub idle_timeout: Duration,
    /// A write to a peer that has not drained within this long closes that
    /// peer's connection.
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3001,
            heartbeat_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(45),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Start the relay server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_relay(config: RelayConfig) -> io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.bind.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// One live connection as seen by the main thread.
struct Peer {
    outbox: SyncSender<Vec<u8>>,
    /// Kept to shut the socket down on disconnect or relay stop.
    stream: TcpStream,
}

/// State owned by the main thread.
struct Relay {
    config: RelayConfig,
    rooms: RoomRegistry,
    peers: BTreeMap<ConnectionId, Peer>,
    next_conn: u64,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
}

/// Main relay loop. Runs until `keep_running` is set to false.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Set the listener to non-blocking so the accept thread can check
    // keep_running periodically.
    listener.set_nonblocking(true).ok();
    if let Ok(addr) = listener.local_addr() {
        info!("relay listening on {addr}");
    }

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream, peer });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("accept failed, listener exiting: {e}");
                    break;
                }
            }
        }
    });

    let mut relay = Relay {
        config,
        rooms: RoomRegistry::new(),
        peers: BTreeMap::new(),
        next_conn: 0,
        tx,
        keep_running: keep_running.clone(),
    };

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(LOOP_WAKE) {
            Ok(event) => {
                relay.handle_event(event);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    relay.handle_event(event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("relay stopping, closing {} connections", relay.peers.len());
    for peer in relay.peers.values() {
        peer.stream.shutdown(Shutdown::Both).ok();
    }
}

impl Relay {
    fn handle_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::NewConnection { stream, peer } => self.accept(stream, peer),
            InternalEvent::MessageFrom { conn, envelope } => self.handle_message(conn, envelope),
            InternalEvent::Disconnected { conn } => self.disconnect(conn),
        }
    }

    /// Register a new connection and spawn its reader and writer threads.
    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let conn = ConnectionId(self.next_conn);
        self.next_conn += 1;

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(self.config.idle_timeout)).ok();
        stream.set_write_timeout(Some(self.config.write_timeout)).ok();
        let (read_half, write_half) = match (stream.try_clone(), stream.try_clone()) {
            (Ok(r), Ok(w)) => (r, w),
            (Err(e), _) | (_, Err(e)) => {
                warn!("{conn}: could not split stream from {peer}: {e}");
                return;
            }
        };

        let (outbox, outbox_rx) = mpsc::sync_channel(OUTBOX_CAPACITY);
        let heartbeat = self.config.heartbeat_interval;
        thread::spawn(move || {
            writer_loop(BufWriter::new(write_half), outbox_rx, heartbeat, conn);
        });

        let tx_reader = self.tx.clone();
        let keep_running_reader = self.keep_running.clone();
        thread::spawn(move || {
            reader_loop(BufReader::new(read_half), conn, tx_reader, keep_running_reader);
        });

        self.peers.insert(conn, Peer { outbox, stream });
        info!("{conn} connected from {peer}");
    }

    fn handle_message(&mut self, conn: ConnectionId, envelope: Envelope) {
        if envelope.event == EventKind::Join {
            match envelope.join_request() {
                Ok(join) => match self.rooms.join(conn, &join.room_code, join.role) {
                    JoinOutcome::Entered => {
                        info!("{conn} joined room {} as {}", join.room_code, join.role)
                    }
                    JoinOutcome::Rejoined => {
                        debug!("{conn} rejoined room {} as {}", join.room_code, join.role)
                    }
                    JoinOutcome::Moved { from } => info!(
                        "{conn} moved from room {from} to {} as {}",
                        join.room_code, join.role
                    ),
                },
                Err(e) => warn!("{conn}: ignoring bad room:join: {e}"),
            }
            return;
        }

        let Some((code, recipients)) = self.rooms.recipients(conn) else {
            debug!("{conn}: dropping {} sent before room:join", envelope.event);
            return;
        };
        let event = envelope.event;
        let bytes = match envelope.into_relayed().to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{conn}: could not re-encode {event}: {e}");
                return;
            }
        };
        debug!(
            "{conn}: {event} in room {code} to {} peer(s)",
            recipients.len()
        );
        for id in recipients {
            let Some(peer) = self.peers.get(&id) else {
                continue;
            };
            match peer.outbox.try_send(bytes.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("{id}: outbox full, dropping {event}")
                }
                // That peer is already on its way out.
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(peer) = self.peers.remove(&conn) {
            peer.stream.shutdown(Shutdown::Both).ok();
        }
        match self.rooms.leave(conn) {
            Some(code) => info!("{conn} disconnected from room {code}"),
            None => info!("{conn} disconnected"),
        }
    }
}

/// Reader loop for a single connection. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    conn: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_frame(&mut reader) {
            Ok(Frame::Heartbeat) => {}
            Ok(Frame::Message(bytes)) => match Envelope::from_bytes(&bytes) {
                Ok(envelope) => {
                    if tx.send(InternalEvent::MessageFrom { conn, envelope }).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("{conn}: skipping malformed message: {e}"),
            },
            Err(e) => {
                match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        info!("{conn} idle too long, closing")
                    }
                    io::ErrorKind::UnexpectedEof => {}
                    _ => debug!("{conn}: read failed: {e}"),
                }
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { conn });
}

/// Writer loop for a single connection. Exits when the main thread drops the
/// outbox or a write fails.
fn writer_loop(
    mut writer: BufWriter<TcpStream>,
    outbox: Receiver<Vec<u8>>,
    heartbeat_interval: Duration,
    conn: ConnectionId,
) {
    loop {
        let result = match outbox.recv_timeout(heartbeat_interval) {
            Ok(bytes) => write_message(&mut writer, &bytes),
            Err(RecvTimeoutError::Timeout) => write_heartbeat(&mut writer),
            Err(RecvTimeoutError::Disconnected) => return,
        };
        if let Err(e) = result {
            match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                    info!("{conn} stopped reading, closing")
                }
                _ => debug!("{conn}: write failed: {e}"),
            }
            // Wakes the reader, which reports the disconnect.
            writer.get_ref().shutdown(Shutdown::Both).ok();
            return;
        }
    }
}
