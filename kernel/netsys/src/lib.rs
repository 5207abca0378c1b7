//! Blocking BSD socket syscalls over a callback-driven TCP stack.
//!
//! Userspace sees ordinary `socket`/`bind`/`listen`/`accept`/`connect`/
//! `read`/`write`/`close`; the TCP stack underneath only knows control
//! blocks and asynchronous callbacks. This crate bridges the two:
//!
//! - syscalls either complete at once or park a continuation on the socket
//!   and report [`Completion::Suspended`];
//! - stack events enter through [`NetSys::dispatch`], update the socket, and
//!   resume at most one parked syscall or readiness watcher.
//!
//! # Architecture
//!
//! ```text
//!   syscall entry                      TCP stack (callback context)
//!        |                                       |
//!        v                                       v
//!   NetSys::{socket, read, ...}          NetSys::dispatch(StackEvent)
//!        |                                       |
//!        +--------> Mutex<SocketPool> <----------+
//!                        |
//!          Socket { state, facets, inbound, waiting, notify }
//!                        |
//!        ThreadHooks::resume / Watcher(PollEvents)
//! ```
//!
//! The kernel provides the collaborators: a [`TcpStack`], [`ThreadHooks`]
//! for the scheduler, and a [`FileTable`] ([`FdTable`] is a ready-made one).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate klog;

pub mod addr;
pub mod buffer;
pub mod callback;
pub mod config;
pub mod errno;
pub mod queue;
pub mod socket;
pub mod stack;
pub mod syscall;
pub mod table;
pub mod wait;

#[cfg(test)]
mod testutil;

use alloc::sync::Arc;
use spin::Once;

pub use addr::{Endpoint, Ipv4Addr, SockAddrIn};
pub use buffer::NetBuf;
pub use callback::{Refused, StackEvent};
pub use config::NetConfig;
pub use errno::{Errno, SysResult};
pub use socket::{Facets, Fd, SocketId, SocketState, SocketStats};
pub use stack::{Callbacks, PcbHandle, StackError, StackResult, TcpStack};
pub use syscall::{syscall_return, Completion, NetSys, NetSyscall};
pub use table::{FdTable, FileTable};
pub use wait::{Pid, PollEvents, ThreadHooks, ThreadId, UserBuffer, Watcher};

static NETSYS: Once<NetSys> = Once::new();

/// Bring up the socket layer. Later calls return the first instance.
pub fn init(
    config: NetConfig,
    stack: Arc<dyn TcpStack>,
    threads: Arc<dyn ThreadHooks>,
    files: Arc<dyn FileTable>,
) -> &'static NetSys {
    let net = NETSYS.call_once(|| NetSys::new(config, stack, threads, files));
    klog!(
        Info,
        "netsys: ready ({} sockets, {} fds/process)",
        net.config().max_sockets,
        net.config().max_fds
    );
    net
}

/// The socket layer, if [`init`] has run.
#[inline]
pub fn net() -> Option<&'static NetSys> {
    NETSYS.get()
}
