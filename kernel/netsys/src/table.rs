//! Socket storage and descriptor mapping.
//!
//! - [`SocketPool`]: fixed-capacity slot pool holding every live socket,
//!   reused across allocations. Slots carry a generation so stale
//!   [`SocketId`]s from late stack callbacks resolve to nothing.
//! - [`FileTable`]: per-process descriptor → socket mapping, owned by the
//!   kernel's file layer. [`FdTable`] is the bundled implementation.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use crate::socket::{Fd, Socket, SocketId};
use crate::wait::Pid;

struct Slot {
    generation: u32,
    socket: Option<Socket>,
}

/// Reusable socket slots, bounded by `capacity`.
pub struct SocketPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl SocketPool {
    pub fn new(capacity: usize) -> Self {
        SocketPool {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Place a socket built by `make` into a free slot.
    ///
    /// Returns `None` when the pool is exhausted.
    pub fn insert(&mut self, make: impl FnOnce(SocketId) -> Socket) -> Option<SocketId> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    socket: None,
                });
                (self.slots.len() - 1) as u32
            }
            None => return None,
        };
        let entry = &mut self.slots[slot as usize];
        entry.generation = entry.generation.wrapping_add(1);
        let id = SocketId {
            slot,
            generation: entry.generation,
        };
        entry.socket = Some(make(id));
        self.live += 1;
        Some(id)
    }

    pub fn get(&self, id: SocketId) -> Option<&Socket> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.socket.as_ref())
    }

    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut Socket> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.socket.as_mut())
    }

    pub fn contains(&self, id: SocketId) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: SocketId) -> Option<Socket> {
        let entry = self
            .slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)?;
        let socket = entry.socket.take()?;
        self.free.push(id.slot);
        self.live -= 1;
        Some(socket)
    }

    /// Number of live sockets.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Descriptor table collaborator.
pub trait FileTable: Send + Sync {
    /// Install `socket` in the lowest free descriptor of `pid`.
    fn allocate(&self, pid: Pid, socket: SocketId) -> Option<Fd>;

    fn resolve(&self, pid: Pid, fd: Fd) -> Option<SocketId>;

    /// Remove `fd`, returning the socket it referred to.
    fn release(&self, pid: Pid, fd: Fd) -> Option<SocketId>;
}

/// First descriptor handed out (0..=2 are stdio).
pub const FIRST_FD: Fd = 3;

/// Lowest-free descriptor allocator with a per-process limit.
pub struct FdTable {
    max_fds: usize,
    tables: Mutex<BTreeMap<Pid, BTreeMap<Fd, SocketId>>>,
}

impl FdTable {
    pub fn new(max_fds: usize) -> Self {
        FdTable {
            max_fds,
            tables: Mutex::new(BTreeMap::new()),
        }
    }
}

impl FileTable for FdTable {
    fn allocate(&self, pid: Pid, socket: SocketId) -> Option<Fd> {
        let mut tables = self.tables.lock();
        let table = tables.entry(pid).or_default();
        if table.len() >= self.max_fds {
            return None;
        }
        // Lowest free: first gap in the sorted key sequence.
        let mut fd = FIRST_FD;
        for &used in table.keys() {
            if used != fd {
                break;
            }
            fd += 1;
        }
        table.insert(fd, socket);
        Some(fd)
    }

    fn resolve(&self, pid: Pid, fd: Fd) -> Option<SocketId> {
        self.tables.lock().get(&pid)?.get(&fd).copied()
    }

    fn release(&self, pid: Pid, fd: Fd) -> Option<SocketId> {
        let mut tables = self.tables.lock();
        let table = tables.get_mut(&pid)?;
        let id = table.remove(&fd);
        if table.is_empty() {
            tables.remove(&pid);
        }
        id
    }
}
