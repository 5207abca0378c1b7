//! Interface to the embedded TCP/IP stack.
//!
//! The stack owns every protocol control block (PCB); this crate only holds
//! opaque [`PcbHandle`]s and drives them through [`TcpStack`]. The stack
//! reports asynchronous progress back through
//! [`NetSys::dispatch`](crate::NetSys::dispatch).
//!
//! # Error translation
//!
//! Stack status codes never escape to userspace. [`StackError::errno`] is the
//! single, exhaustive translation point:
//!
//! | Stack error                                   | errno  |
//! |-----------------------------------------------|--------|
//! | Mem, Buf, Timeout, Rte                        | ENOMEM |
//! | InProgress, WouldBlock                        | EAGAIN |
//! | Val, IsConn, Conn, If, Abrt, Rst, Arg         | EINVAL |
//! | Use, Already                                  | EBUSY  |
//! | Clsd                                          | EPIPE  |

use bitflags::bitflags;

use crate::addr::Endpoint;
use crate::errno::Errno;
use crate::socket::SocketId;

/// Opaque reference to a stack-owned TCP control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PcbHandle(pub u64);

/// Non-OK stack status codes (lwIP `err_t` numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum StackError {
    /// Out of memory
    Mem = -1,
    /// Buffer error
    Buf = -2,
    /// Timeout
    Timeout = -3,
    /// Routing problem
    Rte = -4,
    /// Operation in progress
    InProgress = -5,
    /// Illegal value
    Val = -6,
    /// Operation would block
    WouldBlock = -7,
    /// Address in use
    Use = -8,
    /// Already connecting
    Already = -9,
    /// Already connected
    IsConn = -10,
    /// Not connected
    Conn = -11,
    /// Low-level netif error
    If = -12,
    /// Connection aborted
    Abrt = -13,
    /// Connection reset
    Rst = -14,
    /// Connection closed
    Clsd = -15,
    /// Illegal argument
    Arg = -16,
}

/// Outcome of a stack operation.
pub type StackResult = Result<(), StackError>;

impl StackError {
    /// Decode a raw `err_t`.
    ///
    /// Returns `None` for codes outside the known range so a corrupted value
    /// can never be mistaken for success.
    pub const fn from_raw(code: i8) -> Option<StackResult> {
        let err = match code {
            0 => return Some(Ok(())),
            -1 => StackError::Mem,
            -2 => StackError::Buf,
            -3 => StackError::Timeout,
            -4 => StackError::Rte,
            -5 => StackError::InProgress,
            -6 => StackError::Val,
            -7 => StackError::WouldBlock,
            -8 => StackError::Use,
            -9 => StackError::Already,
            -10 => StackError::IsConn,
            -11 => StackError::Conn,
            -12 => StackError::If,
            -13 => StackError::Abrt,
            -14 => StackError::Rst,
            -15 => StackError::Clsd,
            -16 => StackError::Arg,
            _ => return None,
        };
        Some(Err(err))
    }

    #[inline]
    pub const fn raw(self) -> i8 {
        self as i8
    }

    /// POSIX error for this stack status.
    pub const fn errno(self) -> Errno {
        match self {
            StackError::Mem | StackError::Buf | StackError::Timeout | StackError::Rte => {
                Errno::ENOMEM
            }
            StackError::InProgress | StackError::WouldBlock => Errno::EAGAIN,
            StackError::Val
            | StackError::IsConn
            | StackError::Conn
            | StackError::If
            | StackError::Abrt
            | StackError::Rst
            | StackError::Arg => Errno::EINVAL,
            StackError::Use | StackError::Already => Errno::EBUSY,
            StackError::Clsd => Errno::EPIPE,
        }
    }
}

impl From<StackError> for Errno {
    fn from(e: StackError) -> Self {
        e.errno()
    }
}

/// Translate a stack outcome into a syscall return value (0 or -errno).
#[inline]
pub fn translate(result: StackResult) -> isize {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno().as_isize(),
    }
}

bitflags! {
    /// Callbacks a PCB should deliver to its owning socket.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Callbacks: u8 {
        /// Data arrival / orderly close
        const RECV = 1 << 0;
        /// Fatal error (abort, reset, ...)
        const ERROR = 1 << 1;
        /// Inbound connection on a listening PCB
        const ACCEPT = 1 << 2;
        /// Active open finished
        const CONNECTED = 1 << 3;
    }
}

/// Operations the socket layer needs from the TCP stack.
///
/// # Contract
///
/// Implementations must not deliver callbacks synchronously from inside
/// these methods; callbacks arrive later from stack context through
/// [`NetSys::dispatch`](crate::NetSys::dispatch).
pub trait TcpStack: Send + Sync {
    /// Allocate a fresh, unbound control block.
    fn new_pcb(&self) -> Option<PcbHandle>;

    /// Discard a control block that never became usable.
    fn free_pcb(&self, pcb: PcbHandle);

    /// Route the selected callbacks of `pcb` to `owner`.
    fn attach(&self, pcb: PcbHandle, owner: SocketId, callbacks: Callbacks);

    fn bind(&self, pcb: PcbHandle, local: Endpoint) -> StackResult;

    /// Turn `pcb` into a listener. The stack may hand back a different
    /// (smaller) control block; `pcb` is invalid afterwards on success.
    fn listen(&self, pcb: PcbHandle, backlog: u8) -> Option<PcbHandle>;

    /// Start an active open.
    fn connect(&self, pcb: PcbHandle, remote: Endpoint) -> StackResult;

    /// Queue a copy of `data` for transmission.
    fn write(&self, pcb: PcbHandle, data: &[u8]) -> StackResult;

    /// Flush queued segments.
    fn output(&self, pcb: PcbHandle) -> StackResult;

    /// Acknowledge `len` bytes taken by the application (opens the window).
    fn recved(&self, pcb: PcbHandle, len: usize);

    /// Graceful close.
    fn close(&self, pcb: PcbHandle) -> StackResult;

    /// Hard close (RST); never fails.
    fn abort(&self, pcb: PcbHandle);

    fn local_endpoint(&self, pcb: PcbHandle) -> Endpoint;

    fn remote_endpoint(&self, pcb: PcbHandle) -> Endpoint;
}
