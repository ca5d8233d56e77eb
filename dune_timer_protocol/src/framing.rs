// Length-delimited frames over a byte stream.
//
// Wire format: a 4-byte big-endian length prefix followed by that many bytes
// of payload (one JSON `Envelope`, see `message.rs`). A zero-length frame is a
// heartbeat: it carries no message and exists only to keep idle connections
// from hitting the relay's idle timeout. Readers surface it as
// `Frame::Heartbeat` so callers can ignore it without special-casing empty
// payloads.
//
// `MAX_MESSAGE_SIZE` bounds the allocation a single length prefix can
// trigger. Snapshots are the largest messages and stay well under a few KB
// even for large rosters.

use std::io::{self, Read, Write};

/// Maximum allowed payload size (1 MB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

/// One frame read off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Zero-length keep-alive frame.
    Heartbeat,
    /// A non-empty message payload.
    Message(Vec<u8>),
}

/// Write a length-delimited message: 4-byte big-endian length, then payload.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = msg.len();
    if len > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(msg)?;
    writer.flush()?;
    Ok(())
}

/// Write a heartbeat (zero-length) frame.
pub fn write_heartbeat<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&0u32.to_be_bytes())?;
    writer.flush()
}

/// Read one frame.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame and
/// `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Ok(Frame::Heartbeat);
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(Frame::Message(buf))
}

/// Read frames until a message arrives, skipping heartbeats.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    loop {
        if let Frame::Message(bytes) = read_frame(reader)? {
            return Ok(bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn message_survives_framing() {
        let original = br#"{"event":"game:nextTurn"}"#;
        let mut buf = Vec::new();
        write_message(&mut buf, original).unwrap();
        assert_eq!(&buf[..4], &(original.len() as u32).to_be_bytes());

        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_message(&mut cursor).unwrap(), original.to_vec());
    }

    #[test]
    fn heartbeat_is_a_zero_length_frame() {
        let mut buf = Vec::new();
        write_heartbeat(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_frame(&mut cursor).unwrap(), Frame::Heartbeat);
    }

    #[test]
    fn read_message_skips_heartbeats() {
        let mut buf = Vec::new();
        write_heartbeat(&mut buf).unwrap();
        write_heartbeat(&mut buf).unwrap();
        write_message(&mut buf, b"payload").unwrap();

        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_message(&mut cursor).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_message(&mut buf, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_length_prefix() {
        let fake_len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_prefix_is_eof() {
        let mut cursor = Cursor::new(vec![0u8, 1]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_payload_is_eof() {
        let mut buf = 10u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
