//! Blocking primitives: thread hooks, continuations and readiness watchers.
//!
//! A syscall that cannot complete immediately parks a [`Continuation`] on the
//! socket's waiter queue and returns [`Completion::Suspended`]. The kernel
//! then takes the calling thread off the CPU. Later, a stack callback resumes
//! the continuation through [`ThreadHooks::resume`], which stores the syscall
//! return value and makes the thread runnable again.
//!
//! [`Completion::Suspended`]: crate::syscall::Completion::Suspended

use alloc::boxed::Box;
use alloc::vec::Vec;
use bitflags::bitflags;

/// Kernel thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Process identifier (owner of a descriptor table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

/// Scheduler integration hooks.
///
/// Registered by the kernel at init time so this crate does not depend on
/// the process/scheduler implementation.
///
/// # Contract
///
/// `resume` is invoked with the socket layer lock held and must not call
/// back into [`NetSys`](crate::NetSys). It only records the return value and
/// queues the thread on the run queue.
pub trait ThreadHooks: Send + Sync {
    /// Thread issuing the current syscall.
    fn current_thread(&self) -> ThreadId;

    /// Process owning the current thread.
    fn current_process(&self) -> Pid;

    /// Complete a suspended syscall of `thread` with `ret` and wake it.
    fn resume(&self, thread: ThreadId, ret: isize);
}

/// Caller memory that a syscall fills, possibly after the caller suspended.
///
/// `write` copies into the start of the buffer and returns how many bytes
/// fit.
pub trait UserBuffer: Send {
    fn capacity(&self) -> usize;

    fn write(&mut self, bytes: &[u8]) -> usize;
}

impl<const N: usize> UserBuffer for [u8; N] {
    fn capacity(&self) -> usize {
        N
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(N);
        self[..n].copy_from_slice(&bytes[..n]);
        n
    }
}

impl UserBuffer for Vec<u8> {
    fn capacity(&self) -> usize {
        self.len()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.len());
        self[..n].copy_from_slice(&bytes[..n]);
        n
    }
}

/// A suspended syscall waiting on a socket.
pub enum Continuation {
    /// `read()` on an empty connected socket.
    Read {
        thread: ThreadId,
        dest: Box<dyn UserBuffer>,
    },
    /// `accept()` on a listener with no pending connection.
    Accept {
        thread: ThreadId,
        addr: Option<Box<dyn UserBuffer>>,
        addrlen: Option<Box<dyn UserBuffer>>,
    },
    /// `connect()` waiting for the handshake outcome.
    Connect { thread: ThreadId },
}

impl Continuation {
    pub fn thread(&self) -> ThreadId {
        match self {
            Continuation::Read { thread, .. }
            | Continuation::Accept { thread, .. }
            | Continuation::Connect { thread } => *thread,
        }
    }
}

impl core::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self {
            Continuation::Read { .. } => "Read",
            Continuation::Accept { .. } => "Accept",
            Continuation::Connect { .. } => "Connect",
        };
        f.debug_struct("Continuation")
            .field("kind", &kind)
            .field("thread", &self.thread())
            .finish()
    }
}

bitflags! {
    /// Readiness bits reported to watchers (Linux poll values).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u16 {
        const POLLIN = 0x0001;
        const POLLOUT = 0x0004;
        const POLLERR = 0x0008;
        const POLLHUP = 0x0010;
    }
}

/// Readiness callback registered by `check` (select/poll/epoll glue).
///
/// Watchers run after the socket layer lock is dropped and may register
/// themselves again.
pub type Watcher = Box<dyn FnOnce(PollEvents) + Send>;
