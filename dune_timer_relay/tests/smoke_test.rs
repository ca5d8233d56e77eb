// Integration smoke test for the relay server.
//
// Starts a relay on localhost and drives it with plain TCP sockets using the
// protocol crate's framing and envelopes: joins, fan-out within a room,
// isolation between rooms, snapshot unwrapping, dropped pre-join traffic,
// disconnects, heartbeats, the idle timeout, and peers that stop reading.
// No timer or sync code is involved.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use dune_timer_protocol::{
    Command, Envelope, EventKind, Frame, PlayerColor, PlayerId, Role, RoomCode, Snapshot,
    SnapshotPlayer, read_frame, read_message, write_message,
};
use dune_timer_relay::server::{RelayConfig, RelayHandle, start_relay};

struct RawClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl RawClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self {
            reader,
            writer: BufWriter::new(stream),
        }
    }

    fn joined(addr: SocketAddr, code: &str, role: Role) -> Self {
        let mut client = Self::connect(addr);
        client.send(&Envelope::join(&RoomCode::parse(code).unwrap(), role).unwrap());
        client
    }

    fn send(&mut self, env: &Envelope) {
        write_message(&mut self.writer, &env.to_bytes().unwrap()).unwrap();
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        write_message(&mut self.writer, bytes).unwrap();
    }

    fn recv(&mut self) -> Envelope {
        Envelope::from_bytes(&read_message(&mut self.reader).unwrap()).unwrap()
    }

    /// Everything that arrives within a short window.
    fn drain(&mut self) -> Vec<Envelope> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_millis(150)))
            .unwrap();
        let mut out = Vec::new();
        while let Ok(bytes) = read_message(&mut self.reader) {
            out.push(Envelope::from_bytes(&bytes).unwrap());
        }
        self.reader
            .get_ref()
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        out
    }
}

fn start() -> (RelayHandle, SocketAddr) {
    let config = RelayConfig {
        port: 0,
        ..RelayConfig::default()
    };
    start_relay(config).unwrap()
}

/// Give the relay a moment to process joins before traffic that depends on
/// them.
fn settle() {
    std::thread::sleep(Duration::from_millis(100));
}

fn snapshot() -> Snapshot {
    Snapshot {
        sent_at: 1_234,
        players: vec![SnapshotPlayer {
            id: PlayerId(1),
            name: "Duncan".into(),
            color: PlayerColor::Orange,
            is_active: true,
            is_revealing: false,
            is_out_of_round: false,
            time_remaining: 420,
        }],
        current_round: 3,
        is_running: true,
        game_started: true,
    }
}

#[test]
fn room_fan_out_lifecycle() {
    let (handle, addr) = start();
    let mut host = RawClient::joined(addr, "ROOM01", Role::Host);
    let mut phone_a = RawClient::joined(addr, "ROOM01", Role::Controller);
    let mut phone_b = RawClient::joined(addr, "ROOM01", Role::Controller);
    settle();

    // Controller asks for state; everyone else in the room hears it.
    phone_a.send(&Envelope::request_state());
    assert_eq!(host.recv().event, EventKind::RequestState);
    assert_eq!(phone_b.recv().event, EventKind::RequestState);

    // Host answers; controllers get the bare snapshot, the host no echo.
    let code = RoomCode::parse("ROOM01").unwrap();
    host.send(&Envelope::host_state(&code, &snapshot()).unwrap());
    for phone in [&mut phone_a, &mut phone_b] {
        let env = phone.recv();
        assert_eq!(env.event, EventKind::HostState);
        assert!(env.payload.get("roomCode").is_none());
        assert_eq!(env.snapshot().unwrap(), snapshot());
    }

    // Commands reach the host in order.
    phone_b.send(&Envelope::command(Command::PauseResume));
    phone_b.send(&Envelope::command(Command::NextTurn));
    assert_eq!(host.recv().event, EventKind::PauseResume);
    assert_eq!(host.recv().event, EventKind::NextTurn);

    assert!(host.drain().is_empty(), "host must not hear its own state");
    let rest_a = phone_a.drain();
    assert_eq!(rest_a.len(), 2, "phone A sees phone B's commands: {rest_a:?}");

    // Phone A leaves; the rest of the room still works.
    drop(phone_a);
    settle();
    phone_b.send(&Envelope::command(Command::RevealTurn));
    assert_eq!(host.recv().event, EventKind::RevealTurn);

    handle.stop();
}

#[test]
fn rooms_are_isolated_and_unjoined_traffic_is_dropped() {
    let (handle, addr) = start();
    let mut host_a = RawClient::joined(addr, "AAAAAA", Role::Host);
    let mut host_b = RawClient::joined(addr, "BBBBBB", Role::Host);
    let mut phone_a = RawClient::joined(addr, "AAAAAA", Role::Controller);
    let mut stranger = RawClient::connect(addr);
    settle();

    stranger.send(&Envelope::command(Command::NextTurn));
    phone_a.send(&Envelope::command(Command::PauseResume));

    assert_eq!(host_a.recv().event, EventKind::PauseResume);
    assert!(host_a.drain().is_empty());
    assert!(host_b.drain().is_empty());
    assert!(stranger.drain().is_empty());

    handle.stop();
}

#[test]
fn rejoining_another_room_moves_the_connection() {
    let (handle, addr) = start();
    let mut host_a = RawClient::joined(addr, "AAAAAA", Role::Host);
    let mut host_b = RawClient::joined(addr, "BBBBBB", Role::Host);
    let mut phone = RawClient::joined(addr, "AAAAAA", Role::Controller);
    settle();

    phone.send(&Envelope::join(&RoomCode::parse("BBBBBB").unwrap(), Role::Controller).unwrap());
    phone.send(&Envelope::request_state());
    assert_eq!(host_b.recv().event, EventKind::RequestState);
    assert!(host_a.drain().is_empty());

    handle.stop();
}

#[test]
fn malformed_messages_are_skipped_without_disconnecting() {
    let (handle, addr) = start();
    let mut host = RawClient::joined(addr, "ROOM02", Role::Host);
    let mut phone = RawClient::joined(addr, "ROOM02", Role::Controller);
    settle();

    phone.send_raw(b"this is not json");
    phone.send_raw(br#"{"event":"chat:say","payload":"hi"}"#);
    phone.send(&Envelope::command(Command::NextTurn));
    assert_eq!(host.recv().event, EventKind::NextTurn);

    handle.stop();
}

#[test]
fn relay_sends_heartbeats_and_drops_silent_clients() {
    let config = RelayConfig {
        port: 0,
        heartbeat_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(400),
        ..RelayConfig::default()
    };
    let (handle, addr) = start_relay(config).unwrap();
    let mut client = RawClient::joined(addr, "ROOM03", Role::Host);

    assert_eq!(read_frame(&mut client.reader).unwrap(), Frame::Heartbeat);

    // Stay silent past the idle timeout: the relay closes the socket.
    let mut closed = false;
    for _ in 0..100 {
        match read_frame(&mut client.reader) {
            Ok(Frame::Heartbeat) => continue,
            Ok(Frame::Message(_)) => panic!("unexpected message"),
            Err(_) => {
                closed = true;
                break;
            }
        }
    }
    assert!(closed, "relay should drop a client that never heartbeats");

    handle.stop();
}

#[test]
fn a_peer_that_stops_reading_is_closed_without_stalling_others() {
    let config = RelayConfig {
        port: 0,
        write_timeout: Duration::from_millis(200),
        ..RelayConfig::default()
    };
    let (handle, addr) = start_relay(config).unwrap();
    let mut stalled = RawClient::joined(addr, "FLOOD1", Role::Controller);
    let mut flooder = RawClient::joined(addr, "FLOOD1", Role::Host);
    let mut host = RawClient::joined(addr, "CALM01", Role::Host);
    let mut phone = RawClient::joined(addr, "CALM01", Role::Controller);
    settle();

    // Far more than socket buffers plus a full outbox can hold.
    let bulky = Envelope {
        event: EventKind::RequestState,
        payload: serde_json::Value::String("x".repeat(200_000)),
    };
    for _ in 0..200 {
        flooder.send(&bulky);
    }

    // The relay keeps serving other rooms.
    phone.send(&Envelope::command(Command::NextTurn));
    assert_eq!(host.recv().event, EventKind::NextTurn);

    // Whatever made it into the stalled client's buffers arrives, then the
    // connection ends. A read timeout would mean the relay never closed it.
    let deadline = Instant::now() + Duration::from_secs(20);
    let err = loop {
        assert!(Instant::now() < deadline, "relay never closed the stalled peer");
        match read_frame(&mut stalled.reader) {
            Ok(_) => continue,
            Err(e) => break e,
        }
    };
    assert!(
        !matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ),
        "stalled peer was left open: {err}"
    );

    handle.stop();
}
