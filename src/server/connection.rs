//! Per-client connection state: buffering, framing, keepalive
//!
//! Sockets are non-blocking; each connection keeps growable read and write
//! buffers so partial reads and writes never stall the server loop. Frame
//! extraction and the keepalive decision are pure functions over that state,
//! which keeps the protocol edge cases unit-testable without sockets.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// Inbound frames above this are a protocol violation
pub const MAX_FRAME: usize = 1024;

/// Length prefix plus type byte
pub const MIN_FRAME: usize = 5;

/// A ping goes out (or the connection dies) once the last one is this old
pub const PING_INTERVAL: Duration = Duration::from_secs(15);

/// How often the keepalive scan runs
pub const KEEPALIVE_SCAN: Duration = Duration::from_secs(10);

/// Outcome of a keepalive check for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    Wait,
    SendPing,
    Close,
}

/// Keepalive decision: a connection whose last ping is old enough is closed
/// if that ping went unanswered, otherwise it gets a new ping.
pub fn keepalive_check(now: Instant, last_ping: Instant, last_pong: Instant) -> Keepalive {
    if now.duration_since(last_ping) < PING_INTERVAL {
        return Keepalive::Wait;
    }
    if last_pong < last_ping {
        Keepalive::Close
    } else {
        Keepalive::SendPing
    }
}

/// Extract one complete frame from the front of `buf`, or report why none is
/// available. A declared length outside `[MIN_FRAME, MAX_FRAME]` is an error;
/// the caller closes the connection.
pub fn extract_frame(buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if declared > MAX_FRAME {
        return Err(Error::InvalidPacket(format!(
            "declared frame length {} exceeds maximum {}",
            declared, MAX_FRAME
        )));
    }
    if declared < MIN_FRAME {
        return Err(Error::InvalidPacket(format!(
            "declared frame length {} below minimum {}",
            declared, MIN_FRAME
        )));
    }
    if buf.len() < declared {
        return Ok(None);
    }
    let frame = buf[..declared].to_vec();
    buf.drain(..declared);
    Ok(Some(frame))
}

pub struct Connection {
    pub id: u32,
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    pub last_ping: Instant,
    pub last_pong: Instant,
    /// Set by PROFILE_LIST; gates profile event fan-out
    pub wants_profiles: bool,
    pub open: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, id: u32) -> Result<Connection> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let now = Instant::now();
        Ok(Connection {
            id,
            stream,
            read_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(128),
            last_ping: now,
            last_pong: now,
            wants_profiles: false,
            open: true,
        })
    }

    /// Pull whatever the socket has into the read buffer. Returns false when
    /// the peer has closed or the socket errored; the caller drops us.
    pub fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 512];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
                Err(e) => {
                    log::debug!("client #{} read error: {}", self.id, e);
                    return false;
                }
            }
        }
    }

    /// Next complete frame, if the buffer holds one
    pub fn take_frame(&mut self) -> Result<Option<Vec<u8>>> {
        extract_frame(&mut self.read_buf)
    }

    /// Queue an outbound frame; actual writing happens in [`flush`]
    pub fn queue(&mut self, frame: &[u8]) {
        self.write_buf.extend_from_slice(frame);
    }

    /// Write as much buffered data as the socket accepts. Returns false when
    /// the socket errored.
    pub fn flush(&mut self) -> bool {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
                Err(e) => {
                    log::debug!("client #{} write error: {}", self.id, e);
                    return false;
                }
            }
        }
        true
    }

    /// Final blocking push of anything still queued, used at shutdown
    pub fn flush_blocking(&mut self) {
        let _ = self.stream.set_nonblocking(false);
        let _ = self
            .stream
            .set_write_timeout(Some(Duration::from_millis(500)));
        let _ = self.stream.write_all(&self.write_buf);
        self.write_buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() + 5) as u32;
        let mut out = len.to_be_bytes().to_vec();
        out.push(7); // arbitrary type
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_split_reads_reassemble_one_frame() {
        let wire = frame_bytes(&[1, 2, 3, 4]);
        let mut buf = Vec::new();

        for (i, byte) in wire.iter().enumerate() {
            buf.push(*byte);
            let got = extract_frame(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(got.is_none(), "frame complete after {} bytes", i + 1);
            } else {
                assert_eq!(got.unwrap(), wire);
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let a = frame_bytes(&[1]);
        let b = frame_bytes(&[2, 3]);
        let mut buf = [a.clone(), b.clone()].concat();

        assert_eq!(extract_frame(&mut buf).unwrap().unwrap(), a);
        assert_eq!(extract_frame(&mut buf).unwrap().unwrap(), b);
        assert!(extract_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversize_declared_length_rejected() {
        let mut buf = 2000u32.to_be_bytes().to_vec();
        buf.push(1);
        assert!(extract_frame(&mut buf).is_err());
    }

    #[test]
    fn test_undersize_declared_length_rejected() {
        let mut buf = 4u32.to_be_bytes().to_vec();
        assert!(extract_frame(&mut buf).is_err());
        let mut buf = 0u32.to_be_bytes().to_vec();
        assert!(extract_frame(&mut buf).is_err());
    }

    #[test]
    fn test_keepalive_decision() {
        let base = Instant::now();
        let fresh = base + Duration::from_secs(5);
        let stale = base + Duration::from_secs(16);

        // Recent ping: nothing to do either way
        assert_eq!(keepalive_check(fresh, base, base), Keepalive::Wait);

        // Old ping that was answered: ping again
        assert_eq!(keepalive_check(stale, base, base), Keepalive::SendPing);
        assert_eq!(
            keepalive_check(stale, base, base + Duration::from_secs(1)),
            Keepalive::SendPing
        );

        // Old ping never answered: connection is dead
        assert_eq!(
            keepalive_check(
                stale + Duration::from_secs(16),
                stale,
                base
            ),
            Keepalive::Close
        );
    }
}
