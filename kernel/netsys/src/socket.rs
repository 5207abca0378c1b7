//! Socket object and lifecycle state machine.
//!
//! # States
//!
//! ```text
//!             bind ok                         end-of-data / close
//!   Created ----------> Open{BOUND} -------------------------------> Closed
//!      |                     | listen
//!      | connect             v
//!      |               Open{BOUND|LISTENING} --(inbound)--> new Open{ACCEPTED}
//!      v
//!   InConnection --connect ok--> Open{CONNECTED}
//!      |
//!      +--connect failed--> Created
//!
//!   any --fatal stack error--> Undefined
//! ```
//!
//! `Open` is the aggregate "usable" state gating read/write; what the socket
//! is usable *as* lives in the [`Facets`] set.

use crate::buffer::NetBuf;
use crate::queue::BoundedQueue;
use crate::stack::{PcbHandle, StackError};
use crate::wait::{Continuation, Pid, PollEvents, UserBuffer, Watcher};
use bitflags::bitflags;

/// Descriptor number in the owning process.
pub type Fd = i32;

/// Generation-checked reference to a socket in the pool.
///
/// A callback carrying the id of a socket that has since been freed (and its
/// slot reused) fails the generation check instead of touching the new
/// occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl SocketId {
    /// Pack into a single word (for stacks with a `void *arg` slot).
    pub const fn to_raw(self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    pub const fn from_raw(raw: u64) -> Self {
        SocketId {
            slot: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Fatal stack error; the control block is gone.
    Undefined,
    /// Fresh from `socket()`.
    Created,
    /// Active open started, outcome pending.
    InConnection,
    /// Usable: bound, listening, connected or accepted.
    Open,
    /// Orderly end of stream or descriptor closed. Terminal.
    Closed,
}

bitflags! {
    /// What an open socket is usable as.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Facets: u8 {
        const BOUND = 1 << 0;
        const LISTENING = 1 << 1;
        const CONNECTED = 1 << 2;
        const ACCEPTED = 1 << 3;
    }
}

/// Entry of the inbound queue.
#[derive(Debug)]
pub enum Inbound {
    /// Payload on a connected socket.
    Data(NetBuf),
    /// Established connection waiting for `accept()` on a listener.
    Conn(SocketId),
}

/// Per-socket counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketStats {
    /// Bytes copied out to readers
    pub rx_bytes: u64,
    /// Bytes accepted by the stack for transmission
    pub tx_bytes: u64,
    /// Buffers queued by the data callback
    pub rx_buffers: u64,
    /// Buffers or connections refused because a queue was full
    pub refused: u64,
    /// Entries currently in the inbound queue
    pub inbound_len: usize,
}

/// One TCP endpoint as seen by its owning process.
pub struct Socket {
    pub(crate) id: SocketId,
    pub(crate) pid: Pid,
    pub(crate) fd: Fd,
    /// Control block; `None` once the stack has freed it.
    pub(crate) pcb: Option<PcbHandle>,
    state: SocketState,
    facets: Facets,
    /// Last non-fatal status reported alongside received data.
    pending: Option<StackError>,
    pub(crate) inbound: BoundedQueue<Inbound>,
    pub(crate) waiting: BoundedQueue<Continuation>,
    pub(crate) notify: BoundedQueue<Watcher>,
    pub(crate) stats: SocketStats,
}

impl core::fmt::Debug for Socket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .field("state", &self.state)
            .field("facets", &self.facets)
            .field("pcb", &self.pcb)
            .field("inbound", &self.inbound.len())
            .field("waiting", &self.waiting.len())
            .field("notify", &self.notify.len())
            .finish_non_exhaustive()
    }
}

impl Socket {
    pub(crate) fn new(id: SocketId, pid: Pid, pcb: PcbHandle, queue_len: usize) -> Self {
        Socket {
            id,
            pid,
            fd: -1,
            pcb: Some(pcb),
            state: SocketState::Created,
            facets: Facets::empty(),
            pending: None,
            inbound: BoundedQueue::new(queue_len),
            waiting: BoundedQueue::new(queue_len),
            notify: BoundedQueue::new(queue_len),
            stats: SocketStats::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> SocketState {
        self.state
    }

    #[inline]
    pub fn facets(&self) -> Facets {
        self.facets
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    #[inline]
    pub fn is_listening(&self) -> bool {
        self.is_open() && self.facets.contains(Facets::LISTENING)
    }

    /// Connected actively or accepted from a listener.
    #[inline]
    pub fn has_peer(&self) -> bool {
        self.facets.intersects(Facets::CONNECTED | Facets::ACCEPTED)
    }

    pub fn pending_error(&self) -> Option<StackError> {
        self.pending
    }

    pub(crate) fn record_error(&mut self, err: StackError) {
        self.pending = Some(err);
    }

    /// Move to `next`, keeping CLOSED terminal.
    ///
    /// Returns false (and leaves the state untouched) when the socket is
    /// already CLOSED and `next` is something else.
    pub(crate) fn transition(&mut self, next: SocketState) -> bool {
        if self.state == SocketState::Closed && next != SocketState::Closed {
            klog!(
                Debug,
                "fd {}: ignoring {:?} -> {:?}",
                self.fd,
                self.state,
                next
            );
            return false;
        }
        klog!(Trace, "fd {}: {:?} -> {:?}", self.fd, self.state, next);
        self.state = next;
        true
    }

    /// Enter OPEN, adding `facets` to what the socket already is.
    pub(crate) fn open_as(&mut self, facets: Facets) -> bool {
        if self.transition(SocketState::Open) {
            self.facets |= facets;
            true
        } else {
            false
        }
    }

    /// Payload is waiting at the head of the inbound queue.
    pub fn has_data(&self) -> bool {
        matches!(self.inbound.peek(), Some(Inbound::Data(_)))
    }

    /// A connection is waiting for `accept()`.
    pub fn has_connection(&self) -> bool {
        matches!(self.inbound.peek(), Some(Inbound::Conn(_)))
    }

    /// Copy from the head buffer into `dest`, dropping the buffer once it
    /// is fully drained. Returns the byte count (0 if no data is queued).
    pub(crate) fn consume_into(&mut self, dest: &mut dyn UserBuffer) -> usize {
        let (n, drained) = match self.inbound.peek_mut() {
            Some(Inbound::Data(buf)) => {
                let n = dest.write(buf.remaining());
                buf.consume(n);
                (n, buf.is_empty())
            }
            _ => return 0,
        };
        if drained {
            self.inbound.dequeue();
        }
        self.stats.rx_bytes += n as u64;
        n
    }

    /// Next pending connection, oldest first.
    pub(crate) fn pop_connection(&mut self) -> Option<SocketId> {
        match self.inbound.peek() {
            Some(Inbound::Conn(_)) => match self.inbound.dequeue() {
                Some(Inbound::Conn(id)) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Readiness snapshot handed to watchers.
    pub fn poll_events(&self) -> PollEvents {
        let mut events = PollEvents::empty();
        if !self.inbound.is_empty() {
            events |= PollEvents::POLLIN;
        }
        match self.state {
            SocketState::Open if self.has_peer() => events |= PollEvents::POLLOUT,
            SocketState::Open => {}
            SocketState::Closed => events |= PollEvents::POLLIN | PollEvents::POLLHUP,
            SocketState::Undefined => events |= PollEvents::POLLERR | PollEvents::POLLHUP,
            SocketState::Created | SocketState::InConnection => events |= PollEvents::POLLHUP,
        }
        events
    }

    pub fn stats(&self) -> SocketStats {
        SocketStats {
            inbound_len: self.inbound.len(),
            ..self.stats
        }
    }
}
