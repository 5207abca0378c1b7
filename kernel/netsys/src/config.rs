//! Socket layer limits.

/// Entries per socket queue (inbound, waiters, watchers).
pub const SOCK_QUEUE_LEN: usize = 32;

/// Default number of live sockets system-wide.
pub const DEFAULT_MAX_SOCKETS: usize = 256;

/// Default descriptors per process available to sockets.
pub const DEFAULT_MAX_FDS: usize = 64;

/// Upper bound applied to `listen()` backlogs.
pub const DEFAULT_MAX_BACKLOG: usize = 128;

/// Tunables for [`NetSys`](crate::NetSys).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConfig {
    pub queue_len: usize,
    pub max_sockets: usize,
    pub max_fds: usize,
    pub max_backlog: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            queue_len: SOCK_QUEUE_LEN,
            max_sockets: DEFAULT_MAX_SOCKETS,
            max_fds: DEFAULT_MAX_FDS,
            max_backlog: DEFAULT_MAX_BACKLOG,
        }
    }
}

impl NetConfig {
    /// Zero is clamped to 1: an empty queue could never hold a waiter.
    pub fn with_queue_len(mut self, len: usize) -> Self {
        self.queue_len = len.max(1);
        self
    }

    pub fn with_max_sockets(mut self, max: usize) -> Self {
        self.max_sockets = max;
        self
    }

    pub fn with_max_fds(mut self, max: usize) -> Self {
        self.max_fds = max;
        self
    }

    /// Backlogs are passed to the stack as `u8`.
    pub fn with_max_backlog(mut self, max: usize) -> Self {
        self.max_backlog = max.clamp(1, u8::MAX as usize);
        self
    }

    /// Effective backlog for a `listen(fd, backlog)` request.
    pub fn clamp_backlog(&self, requested: i32) -> u8 {
        let max = self.max_backlog.clamp(1, u8::MAX as usize);
        (requested.max(1) as usize).min(max) as u8
    }
}
