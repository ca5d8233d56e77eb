// Relay client: one device's connection to a room.
//
// `RelayConnection` is an owned handle; hosts and controllers each hold one
// (there is no process-wide socket). Architecture:
// - A **supervisor thread** dials the relay, sends `room:join` plus the
//   configured greetings (a controller greets with `host:requestState`),
//   then becomes the reader: it reads frames, skips heartbeats, and hands
//   each `Envelope` to every matching `Subscription`. When the connection
//   drops it waits out the `ReconnectPolicy` delay and dials again, joining
//   and greeting anew.
// - A **heartbeat thread** writes a zero-length frame every
//   `heartbeat_interval` so the relay's idle timeout only fires on dead
//   clients. The socket's read timeout (`idle_timeout`) plays the same role
//   in the other direction.
// - `send()` writes synchronously on the caller's thread under the link
//   lock. While not connected it drops the message and returns `false`;
//   nothing is queued for later. Writes are bounded by `write_timeout`: a
//   relay that stops reading costs the link (and a reconnect), never a
//   blocked caller.
//
// Subscriptions replace callback registration: `subscribe(kinds)` returns a
// handle with its own channel; dropping the handle unsubscribes. Subscribe
// before `start()` to be sure of seeing replies to the greetings.
//
// Shutdown happens on drop: the stop channels are closed (waking both
// threads), the live socket is shut down (unblocking the reader), and both
// threads are joined.

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dune_timer_protocol::{
    Envelope, EventKind, Frame, ProtocolError, Role, RoomCode, read_frame, write_heartbeat,
    write_message,
};
use log::{debug, info, warn};
use thiserror::Error;

/// Errors establishing one connection attempt. Reported through the log;
/// the supervisor keeps retrying per the `ReconnectPolicy`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("relay address {0:?} did not resolve")]
    Unresolvable(String),
    #[error("relay I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started, or gave up.
    Disconnected,
    /// First attempt in progress.
    Connecting,
    Connected,
    /// Lost the connection (or never got one) and retrying.
    Reconnecting,
}

/// Backoff between connection attempts: `initial_delay` doubling up to
/// `max_delay`. `max_attempts` bounds consecutive retries without a
/// successful connection; `None` retries forever.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Give up as soon as a connection attempt fails or drops.
    pub fn never() -> Self {
        Self {
            max_attempts: Some(0),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// `host:port` of the relay.
    pub addr: String,
    pub room_code: RoomCode,
    pub role: Role,
    /// Sent right after `room:join` on every (re)connect.
    pub greetings: Vec<Envelope>,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// A write that cannot finish in this long (peer not reading) drops the
    /// link instead of blocking the sender.
    pub write_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>, room_code: RoomCode, role: Role) -> Self {
        Self {
            addr: addr.into(),
            room_code,
            role,
            greetings: Vec::new(),
            heartbeat_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_greeting(mut self, envelope: Envelope) -> Self {
        self.greetings.push(envelope);
        self
    }
}

/// Write half of a live connection.
struct Link {
    writer: BufWriter<TcpStream>,
    stream: TcpStream,
}

struct Subscriber {
    /// Empty means every event.
    kinds: Vec<EventKind>,
    tx: Sender<Envelope>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: BTreeMap<u64, Subscriber>,
}

/// State shared between the handle and its threads.
struct Shared {
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    link: Mutex<Option<Link>>,
    subscribers: Mutex<Subscribers>,
    closing: AtomicBool,
    connects: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
        self.state_changed.notify_all();
    }

    fn drop_link(&self) {
        close_link(&mut lock(&self.link));
    }

    fn dispatch(&self, envelope: Envelope) {
        let subscribers = lock(&self.subscribers);
        for sub in subscribers.entries.values() {
            if sub.kinds.is_empty() || sub.kinds.contains(&envelope.event) {
                let _ = sub.tx.send(envelope.clone());
            }
        }
    }
}

fn close_link(link: &mut Option<Link>) {
    if let Some(link) = link.take() {
        link.stream.shutdown(Shutdown::Both).ok();
    }
}

/// Receiving end of `RelayConnection::subscribe`. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inbox: Receiver<Envelope>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Wait up to `timeout` for the next matching message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        self.inbox.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Envelope> {
        self.inbox.try_recv().ok()
    }

    /// Everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Envelope> {
        self.inbox.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers).entries.remove(&self.id);
        }
    }
}

/// A device's connection to one relay room.
pub struct RelayConnection {
    config: ClientConfig,
    shared: Arc<Shared>,
    /// Closed on drop to wake the supervisor and heartbeat threads.
    stop: Vec<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl RelayConnection {
    /// Create an unstarted connection. Nothing is dialed until `start()`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                state_changed: Condvar::new(),
                link: Mutex::new(None),
                subscribers: Mutex::new(Subscribers::default()),
                closing: AtomicBool::new(false),
                connects: AtomicU64::new(0),
            }),
            stop: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Spawn the supervisor and heartbeat threads. Calling it again is a
    /// no-op.
    pub fn start(&mut self) {
        if !self.threads.is_empty() {
            return;
        }
        self.shared.set_state(ConnectionState::Connecting);

        let (stop_supervisor, supervisor_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let config = self.config.clone();
        self.threads.push(thread::spawn(move || {
            supervise(shared, config, supervisor_rx);
        }));

        let (stop_heartbeat, heartbeat_rx) = mpsc::channel();
        let shared = self.shared.clone();
        let interval = self.config.heartbeat_interval;
        self.threads.push(thread::spawn(move || {
            heartbeat_loop(shared, interval, heartbeat_rx);
        }));

        self.stop = vec![stop_supervisor, stop_heartbeat];
    }

    /// `new` followed by `start`.
    pub fn open(config: ClientConfig) -> Self {
        let mut conn = Self::new(config);
        conn.start();
        conn
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.config.room_code
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Successful connections so far (1 after the first connect, 2 after
    /// the first reconnect, ...).
    pub fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Block until the connection reaches `target` or `timeout` passes.
    pub fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let guard = lock(&self.shared.state);
        let (guard, _) = self
            .shared
            .state_changed
            .wait_timeout_while(guard, timeout, |state| *state != target)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == target
    }

    /// Messages of the given kinds (all kinds if empty) from now on.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, inbox) = mpsc::channel();
        let mut subscribers = lock(&self.shared.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.entries.insert(
            id,
            Subscriber {
                kinds: kinds.to_vec(),
                tx,
            },
        );
        Subscription {
            id,
            inbox,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Fire-and-forget send. Returns `false` if the message was dropped
    /// because there is no live connection (or the write failed).
    pub fn send(&self, envelope: &Envelope) -> bool {
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("could not encode {}: {e}", envelope.event);
                return false;
            }
        };
        let mut link = lock(&self.shared.link);
        let Some(live) = link.as_mut() else {
            debug!("not connected, dropping {}", envelope.event);
            return false;
        };
        match write_message(&mut live.writer, &bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!("dropping {} and the link: {e}", envelope.event);
                // A failed or timed-out write may have left half a frame on
                // the wire; the supervisor reconnects.
                close_link(&mut link);
                false
            }
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.stop.clear();
        self.shared.drop_link();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

/// Connect, join, read until the connection drops, back off, repeat.
fn supervise(shared: Arc<Shared>, config: ClientConfig, stop: Receiver<()>) {
    let mut retries = 0u32;
    loop {
        match dial(&config).and_then(|stream| install(&shared, &config, stream)) {
            Ok(reader) => {
                retries = 0;
                shared.connects.fetch_add(1, Ordering::SeqCst);
                shared.set_state(ConnectionState::Connected);
                info!(
                    "connected to relay {} as {} in room {}",
                    config.addr, config.role, config.room_code
                );
                read_until_closed(&shared, reader);
                shared.drop_link();
                if !shared.closing.load(Ordering::SeqCst) {
                    warn!("lost connection to relay {}", config.addr);
                }
            }
            Err(e) => {
                if !shared.closing.load(Ordering::SeqCst) {
                    warn!("could not reach relay {}: {e}", config.addr);
                }
            }
        }

        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
        if config.reconnect.max_attempts.is_some_and(|max| retries >= max) {
            warn!("giving up on relay {} after {retries} retries", config.addr);
            break;
        }
        retries += 1;
        shared.set_state(ConnectionState::Reconnecting);
        match stop.recv_timeout(config.reconnect.delay_for(retries)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.set_state(ConnectionState::Disconnected);
}

fn dial(config: &ClientConfig) -> Result<TcpStream, ConnectError> {
    let addr = config
        .addr
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ConnectError::Unresolvable(config.addr.clone()))?;
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout)?;
    stream.set_nodelay(true).ok();
    stream.set_read_timeout(Some(config.idle_timeout))?;
    stream.set_write_timeout(Some(config.write_timeout))?;
    Ok(stream)
}

/// Join and greet on a fresh stream, then publish it as the live link.
/// Returns the read half for the supervisor.
fn install(
    shared: &Shared,
    config: &ClientConfig,
    stream: TcpStream,
) -> Result<BufReader<TcpStream>, ConnectError> {
    let reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream.try_clone()?);
    let join = Envelope::join(&config.room_code, config.role)?;
    write_message(&mut writer, &join.to_bytes()?)?;
    for greeting in &config.greetings {
        write_message(&mut writer, &greeting.to_bytes()?)?;
    }

    let mut link = lock(&shared.link);
    if shared.closing.load(Ordering::SeqCst) {
        stream.shutdown(Shutdown::Both).ok();
        return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "closing").into());
    }
    *link = Some(Link { writer, stream });
    Ok(reader)
}

fn read_until_closed(shared: &Shared, mut reader: BufReader<TcpStream>) {
    loop {
        match read_frame(&mut reader) {
            Ok(Frame::Heartbeat) => {}
            Ok(Frame::Message(bytes)) => match Envelope::from_bytes(&bytes) {
                Ok(envelope) => shared.dispatch(envelope),
                Err(e) => warn!("ignoring malformed relay message: {e}"),
            },
            Err(e) => {
                if !shared.closing.load(Ordering::SeqCst) {
                    debug!("relay read ended: {e}");
                }
                return;
            }
        }
    }
}

fn heartbeat_loop(shared: Arc<Shared>, interval: Duration, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let mut link = lock(&shared.link);
                if let Some(live) = link.as_mut()
                    && let Err(e) = write_heartbeat(&mut live.writer)
                {
                    debug!("heartbeat failed, dropping the link: {e}");
                    close_link(&mut link);
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
