//! Server role: accepts connections, accumulates each request until the
//! peer half-closes, computes a reply, and writes it back.
//!
//! Accepted sessions enter at `Receiving`. Once the request is complete
//! the reply is installed as the session's outbound payload and flushed;
//! a reply bigger than the socket will take in one go re-arms OUT
//! interest and finishes on later writable wakeups, so short writes never
//! truncate it.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Interest, Token};
use tracing::{debug, info, warn};

use crate::mux::{drive, Multiplexer, MuxError, Phase, RecvOutcome, Role, SendOutcome, Session};

/// The acceptor role: one listening socket, many request sessions.
pub struct Acceptor<F> {
    listener: TcpListener,
    respond: F,
}

impl<F> Acceptor<F>
where
    F: FnMut(&str) -> String,
{
    /// Push the session's reply bytes out until done or the socket backs
    /// up. Returns true once the session is fully finished and removed.
    fn flush_reply(&mut self, mux: &mut Multiplexer<()>, key: Token) -> io::Result<bool> {
        let session = match mux.get_mut(key) {
            Some(session) => session,
            None => return Ok(true),
        };
        while !session.all_sent() {
            let remaining = session.remaining();
            match session.send_slice(remaining)? {
                SendOutcome::Sent(_) => {}
                SendOutcome::WouldBlock => return Ok(false),
            }
        }
        session.set_phase(Phase::Done);
        session.shutdown_write()?;
        mux.unregister(key);
        debug!(key = key.0, "reply sent, session closed");
        Ok(true)
    }
}

impl<F> Role for Acceptor<F>
where
    F: FnMut(&str) -> String,
{
    type Ctx = ();

    fn on_accept(&mut self, mux: &mut Multiplexer<()>) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let session = Session::new(stream, Bytes::new(), (), Phase::Receiving);
                    match mux.register(session, Interest::READABLE) {
                        Ok(key) => {
                            debug!(key = key.0, peer = %peer, live = mux.len(), "accepted connection");
                        }
                        Err(e) => {
                            // Rejecting one connection must not take the
                            // listener down with it.
                            warn!(peer = %peer, error = %e, "failed to register connection");
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn on_readable(&mut self, mux: &mut Multiplexer<()>, key: Token) -> io::Result<()> {
        let session = match mux.get_mut(key) {
            Some(session) => session,
            None => return Ok(()),
        };
        if session.phase() != Phase::Receiving {
            return Ok(());
        }
        match session.recv_available()? {
            RecvOutcome::WouldBlock => Ok(()),
            RecvOutcome::Closed => {
                // Peer half-close marks the request complete.
                let request = String::from_utf8_lossy(session.inbound()).into_owned();
                let reply = (self.respond)(&request);
                debug!(
                    key = key.0,
                    request_bytes = request.len(),
                    reply_bytes = reply.len(),
                    "request complete"
                );
                session.set_phase(Phase::Sending);
                session.set_outbound(Bytes::from(reply));
                if !self.flush_reply(mux, key)? {
                    mux.modify_interest(key, Interest::WRITABLE)?;
                }
                Ok(())
            }
        }
    }

    fn on_writable(&mut self, mux: &mut Multiplexer<()>, key: Token) -> io::Result<()> {
        if let Some(session) = mux.get_mut(key) {
            if session.phase() != Phase::Sending {
                return Ok(());
            }
        } else {
            return Ok(());
        }
        self.flush_reply(mux, key)?;
        Ok(())
    }

    fn on_error(&mut self, mux: &mut Multiplexer<()>, key: Token) {
        if let Some(mut session) = mux.unregister(key) {
            session.set_phase(Phase::Failed);
            warn!(key = key.0, "connection dropped");
        }
    }

    /// The acceptor runs until the process is killed.
    fn finished(&self) -> bool {
        false
    }
}

/// Create the listening socket: reuse-address, non-blocking, bound and
/// listening before the loop starts. Failure here is process-fatal.
pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, MuxError> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(MuxError::Bind)?;

    let setup = (|| {
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)
    })();
    setup.map_err(MuxError::Bind)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// Accept and serve connections indefinitely, computing each reply with
/// `respond`. Only returns on a poll-context failure.
pub fn run<F>(mut listener: TcpListener, max_events: usize, respond: F) -> Result<(), MuxError>
where
    F: FnMut(&str) -> String,
{
    let mut mux: Multiplexer<()> = Multiplexer::new(max_events)?;
    mux.register_listener(&mut listener)?;
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "listening");
    }

    let mut acceptor = Acceptor { listener, respond };
    drive(&mut mux, &mut acceptor)
}
