//! Readiness-driven connection multiplexer.
//!
//! One poll context and one session arena drive an arbitrary number of
//! sockets on a single thread. The slab slot index doubles as the poll
//! token, so the registration table and the session arena are the same
//! structure: a session lives in the slab iff its socket is registered.
//!
//! The two roles (client/initiator and server/acceptor) plug into one
//! shared dispatch loop through the [`Role`] trait rather than owning
//! near-identical loops of their own.

pub mod client;
pub mod server;
mod session;

pub use session::{Phase, RecvOutcome, SendOutcome, Session};

use std::fmt;
use std::io;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use tracing::debug;

/// Token reserved for the acceptor's listening socket. Slab keys are
/// dense from zero, so this never collides with a session slot.
const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Errors from the readiness layer.
#[derive(Debug)]
pub enum MuxError {
    /// The OS readiness subsystem rejected a registration call.
    Registration(io::Error),
    /// Creating or polling the readiness context failed.
    Poll(io::Error),
    /// Opening an outbound socket failed.
    Connect(io::Error),
    /// Setting up the listening socket failed. Process-fatal.
    Bind(io::Error),
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::Registration(e) => write!(f, "readiness registration failed: {e}"),
            MuxError::Poll(e) => write!(f, "readiness poll failed: {e}"),
            MuxError::Connect(e) => write!(f, "connect failed: {e}"),
            MuxError::Bind(e) => write!(f, "listener setup failed: {e}"),
        }
    }
}

impl std::error::Error for MuxError {}

impl From<MuxError> for io::Error {
    fn from(e: MuxError) -> Self {
        io::Error::other(e)
    }
}

/// Readiness conditions for one wakeup, copied out of the poll batch so
/// sessions can be mutated while the batch is dispatched.
#[derive(Debug, Clone, Copy)]
pub struct Wakeup {
    pub key: Token,
    pub readable: bool,
    pub writable: bool,
}

/// The multiplexer core: poll context plus session arena.
pub struct Multiplexer<C> {
    poll: Poll,
    events: Events,
    sessions: Slab<Session<C>>,
}

impl<C> Multiplexer<C> {
    /// `max_events` bounds the size of one wakeup batch, not the number
    /// of concurrent sessions.
    pub fn new(max_events: usize) -> Result<Self, MuxError> {
        Ok(Self {
            poll: Poll::new().map_err(MuxError::Poll)?,
            events: Events::with_capacity(max_events),
            sessions: Slab::new(),
        })
    }

    /// Add a session to the arena and register its socket. On a failed
    /// registration the slot is reclaimed and the session dropped, which
    /// closes the descriptor.
    pub fn register(&mut self, session: Session<C>, interest: Interest) -> Result<Token, MuxError> {
        let key = self.sessions.insert(session);
        let token = Token(key);
        let result = self
            .poll
            .registry()
            .register(self.sessions[key].stream_mut(), token, interest);
        if let Err(e) = result {
            self.sessions.remove(key);
            return Err(MuxError::Registration(e));
        }
        Ok(token)
    }

    /// Change which readiness conditions wake the session, e.g. when the
    /// client finishes sending and must wait to read instead.
    pub fn modify_interest(&mut self, token: Token, interest: Interest) -> Result<(), MuxError> {
        let session = match self.sessions.get_mut(token.0) {
            Some(session) => session,
            None => {
                return Err(MuxError::Registration(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no session for token",
                )))
            }
        };
        self.poll
            .registry()
            .reregister(session.stream_mut(), token, interest)
            .map_err(MuxError::Registration)
    }

    /// Remove a session from both the arena and the poll registration,
    /// returning ownership. Dropping the returned session closes the
    /// descriptor. A second call for the same token returns `None`.
    pub fn unregister(&mut self, token: Token) -> Option<Session<C>> {
        if !self.sessions.contains(token.0) {
            return None;
        }
        let mut session = self.sessions.remove(token.0);
        let _ = self.poll.registry().deregister(session.stream_mut());
        Some(session)
    }

    /// Register the acceptor's listening socket under the reserved token.
    pub fn register_listener(&mut self, listener: &mut TcpListener) -> Result<(), MuxError> {
        self.poll
            .registry()
            .register(listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(MuxError::Registration)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Session<C>> {
        self.sessions.get_mut(token.0)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.sessions.contains(token.0)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Block until at least one registered handle is ready and return the
    /// batch. Batch order is whatever the OS reports; no fairness beyond
    /// the OS readiness primitive is guaranteed. An interrupted wait
    /// yields an empty batch.
    pub fn wait(&mut self) -> Result<Vec<Wakeup>, MuxError> {
        if let Err(e) = self.poll.poll(&mut self.events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(MuxError::Poll(e));
        }
        // Error and hangup conditions are folded into readable/writable
        // so a failed connect (which may report neither) still reaches a
        // role callback, where the pending socket error surfaces.
        Ok(self
            .events
            .iter()
            .map(|event| Wakeup {
                key: event.token(),
                readable: event.is_readable() || event.is_error() || event.is_read_closed(),
                writable: event.is_writable() || event.is_error(),
            })
            .collect())
    }
}

/// Role-specific behavior plugged into the shared dispatch loop.
///
/// The loop owns polling and per-session error isolation; a role decides
/// what readable and writable mean for its sessions.
pub trait Role {
    /// Context carried by this role's sessions.
    type Ctx;

    /// The listening socket became readable. Acceptor only; the default
    /// ignores it.
    fn on_accept(&mut self, mux: &mut Multiplexer<Self::Ctx>) -> io::Result<()> {
        let _ = mux;
        Ok(())
    }

    /// A session's socket can be written without blocking.
    fn on_writable(&mut self, mux: &mut Multiplexer<Self::Ctx>, key: Token) -> io::Result<()>;

    /// A session's socket has bytes available (or a pending hangup).
    fn on_readable(&mut self, mux: &mut Multiplexer<Self::Ctx>, key: Token) -> io::Result<()>;

    /// Tear down a session after an unrecoverable socket error.
    fn on_error(&mut self, mux: &mut Multiplexer<Self::Ctx>, key: Token);

    /// True once the loop may stop waiting for events.
    fn finished(&self) -> bool;
}

/// Shared dispatch loop for both roles.
///
/// Per-session failures are isolated: a role callback returning an error
/// tears down that session alone via [`Role::on_error`]; one bad
/// connection never aborts the loop or touches other sessions.
pub fn drive<R: Role>(mux: &mut Multiplexer<R::Ctx>, role: &mut R) -> Result<(), MuxError> {
    while !role.finished() {
        for wakeup in mux.wait()? {
            if wakeup.key == LISTENER_TOKEN {
                if let Err(e) = role.on_accept(mux) {
                    debug!(error = %e, "accept batch failed");
                }
                continue;
            }
            // The session may already be gone: torn down earlier in this
            // batch, or a stale wakeup for a freed slot.
            if wakeup.writable && mux.contains(wakeup.key) {
                if let Err(e) = role.on_writable(mux, wakeup.key) {
                    debug!(key = wakeup.key.0, error = %e, "session write error");
                    role.on_error(mux, wakeup.key);
                    continue;
                }
            }
            if wakeup.readable && mux.contains(wakeup.key) {
                if let Err(e) = role.on_readable(mux, wakeup.key) {
                    debug!(key = wakeup.key.0, error = %e, "session read error");
                    role.on_error(mux, wakeup.key);
                }
            }
        }
    }
    Ok(())
}
