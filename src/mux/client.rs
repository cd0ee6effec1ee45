//! Client role: opens many concurrent connections, streams each request
//! in randomized fragments, half-closes, and collects the reply.
//!
//! Per-session state machine: `Connecting -> Sending -> Receiving ->
//! Done`, with `Failed` reachable from any non-terminal phase. The first
//! writable wakeup doubles as connect completion; a refused connect
//! surfaces as an error on the first send attempt.

use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use mio::net::TcpStream;
use mio::{Interest, Token};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::mux::{drive, Multiplexer, MuxError, Phase, RecvOutcome, Role, SendOutcome, Session};

/// Per-session request payload, handed back to the completion callback.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    /// Index of the originating request in the submitted batch.
    pub id: usize,
    /// The full request text this session sends.
    pub expr: String,
}

/// The initiator role: drives all client sessions to completion.
pub struct Initiator<F> {
    rng: StdRng,
    /// Number of non-terminal sessions; the run loop returns at zero.
    pending: usize,
    on_complete: F,
}

impl<F> Initiator<F>
where
    F: FnMut(&RequestCtx, &[u8]),
{
    pub fn new(seed: Option<u64>, on_complete: F) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            pending: 0,
            on_complete,
        }
    }

    /// Open a non-blocking connection for one request and register it
    /// with OUT interest; the first writable wakeup is the first send
    /// opportunity. A failure here affects this session only.
    pub fn connect(
        &mut self,
        mux: &mut Multiplexer<RequestCtx>,
        addr: SocketAddr,
        ctx: RequestCtx,
    ) -> Result<Token, MuxError> {
        let stream = TcpStream::connect(addr).map_err(MuxError::Connect)?;
        let outbound = Bytes::copy_from_slice(ctx.expr.as_bytes());
        let session = Session::new(stream, outbound, ctx, Phase::Connecting);
        let token = mux.register(session, Interest::WRITABLE)?;
        self.pending += 1;
        Ok(token)
    }
}

impl<F> Role for Initiator<F>
where
    F: FnMut(&RequestCtx, &[u8]),
{
    type Ctx = RequestCtx;

    fn on_writable(&mut self, mux: &mut Multiplexer<RequestCtx>, key: Token) -> io::Result<()> {
        let session = match mux.get_mut(key) {
            Some(session) => session,
            None => return Ok(()),
        };
        if !matches!(session.phase(), Phase::Connecting | Phase::Sending) {
            return Ok(());
        }
        session.set_phase(Phase::Sending);

        // Randomly sized fragments exercise the peer's partial-read
        // accumulation; looping until WouldBlock is what edge-triggered
        // readiness requires.
        while !session.all_sent() {
            let fragment = self.rng.random_range(1..=session.remaining());
            match session.send_slice(fragment)? {
                SendOutcome::Sent(n) => {
                    trace!(key = key.0, bytes = n, "sent fragment");
                }
                SendOutcome::WouldBlock => return Ok(()),
            }
        }

        // Request fully sent: half-close to signal completion, then wait
        // for the reply.
        session.set_phase(Phase::Receiving);
        session.shutdown_write()?;
        mux.modify_interest(key, Interest::READABLE)?;
        debug!(key = key.0, "request sent, awaiting reply");
        Ok(())
    }

    fn on_readable(&mut self, mux: &mut Multiplexer<RequestCtx>, key: Token) -> io::Result<()> {
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
                if let Some(mut session) = mux.unregister(key) {
                    session.set_phase(Phase::Done);
                    debug!(key = key.0, bytes = session.inbound().len(), "reply complete");
                    (self.on_complete)(session.ctx(), session.inbound());
                    self.pending -= 1;
                }
                Ok(())
            }
        }
    }

    fn on_error(&mut self, mux: &mut Multiplexer<RequestCtx>, key: Token) {
        // The session failed before completing: no callback, but the run
        // must still observe its termination.
        if let Some(mut session) = mux.unregister(key) {
            session.set_phase(Phase::Failed);
            warn!(key = key.0, id = session.ctx().id, "session failed");
            self.pending -= 1;
        }
    }

    fn finished(&self) -> bool {
        self.pending == 0
    }
}

/// Open one session per request against `addr` and dispatch events until
/// every session is `Done` or `Failed`. Completion callbacks run
/// synchronously on the calling thread and never overlap.
pub fn run<F>(
    addr: SocketAddr,
    requests: Vec<String>,
    seed: Option<u64>,
    max_events: usize,
    on_complete: F,
) -> Result<(), MuxError>
where
    F: FnMut(&RequestCtx, &[u8]),
{
    let mut mux = Multiplexer::new(max_events)?;
    let mut initiator = Initiator::new(seed, on_complete);

    for (id, expr) in requests.into_iter().enumerate() {
        let ctx = RequestCtx { id, expr };
        if let Err(e) = initiator.connect(&mut mux, addr, ctx) {
            warn!(id, error = %e, "connection setup failed");
        }
    }
    debug!(sessions = mux.len(), "all connections initiated");

    drive(&mut mux, &mut initiator)
}
