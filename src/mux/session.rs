//! Per-connection session state.
//!
//! A session tracks one TCP connection's progress through its
//! send/receive exchange: the outbound payload with a send cursor, the
//! append-only inbound accumulation, and the lifecycle phase.

use std::io::{self, Read, Write};
use std::net::Shutdown;

use bytes::{Bytes, BytesMut};
use mio::net::TcpStream;

/// Read chunk size for draining a readable socket.
const RECV_CHUNK: usize = 1024;

/// Where a session stands in its exchange.
///
/// The client walks `Connecting -> Sending -> Receiving -> Done`; an
/// accepted server session enters at `Receiving` and passes through
/// `Sending` for the reply. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connect issued; the first writable wakeup completes it.
    Connecting,
    /// Streaming outbound bytes.
    Sending,
    /// Accumulating inbound bytes until the peer half-closes.
    Receiving,
    /// Fully processed; no further events expected.
    Done,
    /// Torn down after an unrecoverable socket error.
    Failed,
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, Copy)]
pub enum SendOutcome {
    /// The OS accepted this many bytes; the cursor advanced by the same.
    Sent(usize),
    /// The socket cannot take more right now.
    WouldBlock,
}

/// Outcome of draining a readable socket.
#[derive(Debug, Clone, Copy)]
pub enum RecvOutcome {
    /// Everything currently available was read; more may come later.
    WouldBlock,
    /// Zero-length read: the peer shut down its write side, so the
    /// accumulated inbound data is complete.
    Closed,
}

/// One TCP connection's mutable state, parameterized over a role-specific
/// context handed back on completion.
pub struct Session<C> {
    stream: TcpStream,
    outbound: Bytes,
    cursor: usize,
    inbound: BytesMut,
    ctx: C,
    phase: Phase,
}

impl<C> Session<C> {
    pub fn new(stream: TcpStream, outbound: Bytes, ctx: C, phase: Phase) -> Self {
        Self {
            stream,
            outbound,
            cursor: 0,
            inbound: BytesMut::with_capacity(RECV_CHUNK),
            ctx,
            phase,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    pub fn inbound(&self) -> &[u8] {
        &self.inbound
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Done | Phase::Failed)
    }

    /// Unsent outbound bytes.
    pub fn remaining(&self) -> usize {
        self.outbound.len() - self.cursor
    }

    pub fn all_sent(&self) -> bool {
        self.cursor == self.outbound.len()
    }

    /// Install a new outbound payload, resetting the cursor. Used by the
    /// server role once the reply is computed.
    pub fn set_outbound(&mut self, data: Bytes) {
        self.outbound = data;
        self.cursor = 0;
    }

    /// Write up to `limit` of the unsent outbound bytes, advancing the
    /// cursor by however many the OS accepted.
    pub fn send_slice(&mut self, limit: usize) -> io::Result<SendOutcome> {
        let end = self.outbound.len().min(self.cursor + limit);
        if self.cursor == end {
            return Ok(SendOutcome::Sent(0));
        }
        loop {
            return match self.stream.write(&self.outbound[self.cursor..end]) {
                Ok(0) => Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
                Ok(n) => {
                    self.cursor += n;
                    Ok(SendOutcome::Sent(n))
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SendOutcome::WouldBlock),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    /// Drain all currently available bytes into the inbound buffer,
    /// looping until the read would block or the peer half-closes.
    pub fn recv_available(&mut self) -> io::Result<RecvOutcome> {
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(RecvOutcome::Closed),
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(RecvOutcome::WouldBlock)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Half-close the write direction, signalling "no more data" while
    /// leaving the read side open.
    pub fn shutdown_write(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::thread;
    use std::time::Duration;

    /// Connected (mio, std) stream pair over loopback.
    fn pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (peer, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        (TcpStream::from_std(client), peer)
    }

    fn drain_until_closed<C>(session: &mut Session<C>) -> Vec<u8> {
        loop {
            match session.recv_available().unwrap() {
                RecvOutcome::Closed => return session.inbound().to_vec(),
                RecvOutcome::WouldBlock => thread::sleep(Duration::from_millis(1)),
            }
        }
    }

    #[test]
    fn test_phase_transitions() {
        let (stream, _peer) = pair();
        let mut session = Session::new(stream, Bytes::new(), (), Phase::Connecting);

        assert_eq!(session.phase(), Phase::Connecting);
        assert!(!session.is_terminal());

        session.set_phase(Phase::Sending);
        session.set_phase(Phase::Receiving);
        assert!(!session.is_terminal());

        session.set_phase(Phase::Done);
        assert!(session.is_terminal());
    }

    #[test]
    fn test_send_slice_advances_cursor() {
        let (stream, mut peer) = pair();
        let mut session = Session::new(
            stream,
            Bytes::from_static(b"12345678"),
            (),
            Phase::Sending,
        );

        assert_eq!(session.remaining(), 8);
        match session.send_slice(3).unwrap() {
            SendOutcome::Sent(n) => assert_eq!(n, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(session.remaining(), 5);

        match session.send_slice(100).unwrap() {
            SendOutcome::Sent(n) => assert_eq!(n, 5),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(session.all_sent());

        session.shutdown_write().unwrap();
        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"12345678");
    }

    #[test]
    fn test_recv_accumulates_fragments() {
        // Any fragmentation of the peer's writes must reconstruct the
        // original text, regardless of fragment boundaries.
        let (stream, mut peer) = pair();
        let mut session = Session::new(stream, Bytes::new(), (), Phase::Receiving);

        let fragments: [&[u8]; 5] = [b"2+", b"2 10", b"*", b"10 7/", b"2"];
        for frag in fragments {
            use std::io::Write as _;
            peer.write_all(frag).unwrap();
        }
        peer.shutdown(Shutdown::Write).unwrap();

        assert_eq!(drain_until_closed(&mut session), b"2+2 10*10 7/2");
    }

    #[test]
    fn test_recv_would_block_before_peer_closes() {
        let (stream, mut peer) = pair();
        let mut session = Session::new(stream, Bytes::new(), (), Phase::Receiving);

        {
            use std::io::Write as _;
            peer.write_all(b"partial").unwrap();
        }
        // The peer has not closed, so draining must keep reporting
        // WouldBlock while the fragment trickles in.
        while session.inbound().len() < 7 {
            match session.recv_available().unwrap() {
                RecvOutcome::WouldBlock => thread::sleep(Duration::from_millis(1)),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert_eq!(session.inbound(), b"partial");

        peer.shutdown(Shutdown::Write).unwrap();
        assert_eq!(drain_until_closed(&mut session), b"partial");
    }

    #[test]
    fn test_set_outbound_resets_cursor() {
        let (stream, _peer) = pair();
        let mut session = Session::new(stream, Bytes::new(), (), Phase::Receiving);
        assert!(session.all_sent());

        session.set_outbound(Bytes::from_static(b"4 100 3"));
        assert_eq!(session.remaining(), 7);
        assert!(!session.all_sent());
    }
}
