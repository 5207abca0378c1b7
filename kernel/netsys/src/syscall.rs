//! Socket syscall surface.
//!
//! Every blocking syscall follows the same interlock:
//!
//! ```text
//! lock
//!   result available?  -> complete now            (Completion::Ready)
//!   else               -> park continuation       (Completion::Suspended)
//! unlock
//! ... stack callback (same lock) ...
//!   wakeup: waiter first, else one notify watcher
//!   waiter completes the syscall -> ThreadHooks::resume
//! ```
//!
//! Because the check and the enqueue happen under the lock that callbacks
//! also take, an event can never slip in between them and be missed.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::addr::{write_sockaddr, Endpoint, Ipv4Addr, SockAddrIn, AF_INET};
use crate::config::NetConfig;
use crate::errno::{Errno, SysResult};
use crate::socket::{Facets, Fd, Inbound, Socket, SocketId, SocketState, SocketStats};
use crate::stack::{Callbacks, PcbHandle, StackError, TcpStack};
use crate::table::{FileTable, SocketPool};
use crate::wait::{Continuation, Pid, PollEvents, ThreadHooks, UserBuffer, Watcher};

/// Linux SOCK_STREAM value
pub const SOCK_STREAM: u32 = 1;
/// Type/flag bit: non-blocking descriptor
pub const SOCK_NONBLOCK: u32 = 0o4000;
/// Type/flag bit: close on exec
pub const SOCK_CLOEXEC: u32 = 0o2000000;
/// Linux IPPROTO_TCP value
pub const IPPROTO_TCP: u32 = 6;

/// How a syscall left the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Completion {
    /// Finished; the value is the syscall return.
    Ready(usize),
    /// A continuation was parked; the thread must sleep until
    /// [`ThreadHooks::resume`] delivers its return value.
    Suspended,
}

/// Register value for a syscall outcome, or `None` if the thread sleeps.
pub fn syscall_return(result: SysResult<Completion>) -> Option<isize> {
    match result {
        Ok(Completion::Ready(v)) => Some(v as isize),
        Ok(Completion::Suspended) => None,
        Err(e) => Some(e.as_isize()),
    }
}

/// Socket syscalls handled by this crate (Linux x86_64 numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetSyscall {
    Socket,
    Connect,
    Accept,
    Bind,
    Listen,
    GetSockName,
    GetPeerName,
    SetSockOpt,
    Accept4,
}

impl NetSyscall {
    pub const fn from_nr(nr: u64) -> Option<Self> {
        Some(match nr {
            41 => NetSyscall::Socket,
            42 => NetSyscall::Connect,
            43 => NetSyscall::Accept,
            49 => NetSyscall::Bind,
            50 => NetSyscall::Listen,
            51 => NetSyscall::GetSockName,
            52 => NetSyscall::GetPeerName,
            54 => NetSyscall::SetSockOpt,
            288 => NetSyscall::Accept4,
            _ => return None,
        })
    }

    pub const fn nr(self) -> u64 {
        match self {
            NetSyscall::Socket => 41,
            NetSyscall::Connect => 42,
            NetSyscall::Accept => 43,
            NetSyscall::Bind => 49,
            NetSyscall::Listen => 50,
            NetSyscall::GetSockName => 51,
            NetSyscall::GetPeerName => 52,
            NetSyscall::SetSockOpt => 54,
            NetSyscall::Accept4 => 288,
        }
    }
}

/// Borrow an optional boxed user buffer for a synchronous write.
pub(crate) fn as_user(buf: &mut Option<Box<dyn UserBuffer>>) -> Option<&mut dyn UserBuffer> {
    buf.as_mut().map(|b| &mut **b as &mut dyn UserBuffer)
}

#[inline]
fn socket_mut(pool: &mut SocketPool, id: SocketId) -> SysResult<&mut Socket> {
    pool.get_mut(id).ok_or(Errno::EBADF)
}

/// The socket layer: all sockets plus the collaborators they drive.
pub struct NetSys {
    config: NetConfig,
    pub(crate) stack: Arc<dyn TcpStack>,
    pub(crate) threads: Arc<dyn ThreadHooks>,
    pub(crate) files: Arc<dyn FileTable>,
    /// Coarse lock taken by syscalls and stack callbacks alike.
    pub(crate) sockets: Mutex<SocketPool>,
}

impl NetSys {
    pub fn new(
        config: NetConfig,
        stack: Arc<dyn TcpStack>,
        threads: Arc<dyn ThreadHooks>,
        files: Arc<dyn FileTable>,
    ) -> Self {
        NetSys {
            sockets: Mutex::new(SocketPool::new(config.max_sockets)),
            config,
            stack,
            threads,
            files,
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Number of live sockets across all processes.
    pub fn socket_count(&self) -> usize {
        self.sockets.lock().len()
    }

    fn lookup(&self, fd: Fd) -> SysResult<SocketId> {
        let pid = self.threads.current_process();
        self.files.resolve(pid, fd).ok_or(Errno::EBADF)
    }

    // ========================================================================
    // Allocation / teardown (shared with the callback path)
    // ========================================================================

    /// Create a socket around `pcb` and give it a descriptor in `pid`.
    ///
    /// On failure nothing is left behind; `pcb` still belongs to the caller.
    pub(crate) fn allocate_socket(
        &self,
        pool: &mut SocketPool,
        pid: Pid,
        pcb: PcbHandle,
    ) -> SysResult<SocketId> {
        let queue_len = self.config.queue_len;
        let id = match pool.insert(|id| Socket::new(id, pid, pcb, queue_len)) {
            Some(id) => id,
            None => {
                klog!(Warn, "netsys: failed to allocate socket (pool exhausted)");
                return Err(Errno::ENOMEM);
            }
        };
        let fd = match self.files.allocate(pid, id) {
            Some(fd) => fd,
            None => {
                pool.remove(id);
                return Err(Errno::EMFILE);
            }
        };
        if let Some(sock) = pool.get_mut(id) {
            sock.fd = fd;
        }
        Ok(id)
    }

    /// Release everything a removed socket owns.
    ///
    /// Usable sockets are closed at the stack (aborted if the graceful
    /// close is refused); control blocks that never got that far are simply
    /// freed. Parked waiters get EBADF, watchers are collected for the caller
    /// to run after unlocking, and connections still waiting for `accept()`
    /// are torn down with their listener.
    pub(crate) fn teardown(
        &self,
        pool: &mut SocketPool,
        mut sock: Socket,
        watchers: &mut Vec<Watcher>,
    ) {
        if let Some(pcb) = sock.pcb.take() {
            match sock.state() {
                SocketState::Open | SocketState::Closed => {
                    if let Err(e) = self.stack.close(pcb) {
                        klog!(Warn, "fd {}: close refused ({:?}), aborting", sock.fd, e);
                        self.stack.abort(pcb);
                    }
                }
                SocketState::Created | SocketState::InConnection => self.stack.free_pcb(pcb),
                SocketState::Undefined => {}
            }
        }
        sock.transition(SocketState::Closed);

        for waiter in sock.waiting.drain() {
            self.threads.resume(waiter.thread(), Errno::EBADF.as_isize());
        }
        for entry in sock.inbound.drain() {
            if let Inbound::Conn(child_id) = entry {
                if let Some(child) = pool.remove(child_id) {
                    self.files.release(child.pid, child.fd);
                    self.teardown(pool, child, watchers);
                }
            }
        }
        watchers.extend(sock.notify.drain());
        klog!(Debug, "fd {}: released", sock.fd);
    }

    /// Copy queued payload into `dest` and open the receive window by the
    /// amount taken.
    pub(crate) fn complete_read(&self, sock: &mut Socket, dest: &mut dyn UserBuffer) -> usize {
        let n = sock.consume_into(dest);
        if n > 0 {
            if let Some(pcb) = sock.pcb {
                self.stack.recved(pcb, n);
            }
        }
        n
    }

    /// Hand the oldest pending connection of `listener` to the caller.
    ///
    /// Connections whose descriptor was closed before being accepted are
    /// skipped. Returns `None` when nothing is pending.
    pub(crate) fn finish_accept(
        &self,
        pool: &mut SocketPool,
        listener: SocketId,
        addr: Option<&mut dyn UserBuffer>,
        addrlen: Option<&mut dyn UserBuffer>,
    ) -> Option<Fd> {
        let child_id = loop {
            let id = pool.get_mut(listener)?.pop_connection()?;
            if pool.contains(id) {
                break id;
            }
        };
        let child = pool.get(child_id)?;
        if let Some(addr) = addr {
            let peer = child
                .pcb
                .map(|pcb| self.stack.remote_endpoint(pcb))
                .unwrap_or_default();
            write_sockaddr(peer, addr, addrlen);
        }
        Some(child.fd)
    }

    // ========================================================================
    // Syscalls
    // ========================================================================

    /// socket(2): only AF_INET / SOCK_STREAM / TCP.
    pub fn socket(&self, domain: u32, ty: u32, protocol: u32) -> SysResult<usize> {
        if domain != AF_INET as u32 {
            return Err(Errno::EAFNOSUPPORT);
        }
        if ty & !(SOCK_NONBLOCK | SOCK_CLOEXEC) != SOCK_STREAM {
            return Err(Errno::EPROTONOSUPPORT);
        }
        if protocol != 0 && protocol != IPPROTO_TCP {
            return Err(Errno::EPROTONOSUPPORT);
        }

        let pid = self.threads.current_process();
        let pcb = self.stack.new_pcb().ok_or(Errno::ENOMEM)?;
        let mut pool = self.sockets.lock();
        match self.allocate_socket(&mut pool, pid, pcb) {
            Ok(id) => {
                let fd = pool.get(id).map(|s| s.fd).ok_or(Errno::EBADF)?;
                klog!(Debug, "netsys: socket fd {} pcb {:?}", fd, pcb);
                Ok(fd as usize)
            }
            Err(e) => {
                self.stack.free_pcb(pcb);
                Err(e)
            }
        }
    }

    /// bind(2): binds the port on the wildcard address.
    pub fn bind(&self, fd: Fd, addr: &[u8]) -> SysResult<usize> {
        let sin = SockAddrIn::parse(addr)?;
        let id = self.lookup(fd)?;
        let mut pool = self.sockets.lock();
        let sock = socket_mut(&mut pool, id)?;

        if sock.state() != SocketState::Created {
            return Err(Errno::EINVAL);
        }
        let pcb = sock.pcb.ok_or(Errno::EINVAL)?;
        self.stack
            .bind(pcb, Endpoint::new(Ipv4Addr::ANY, sin.port()))?;
        sock.open_as(Facets::BOUND);
        Ok(0)
    }

    /// listen(2). A repeated listen is accepted without touching the stack.
    pub fn listen(&self, fd: Fd, backlog: i32) -> SysResult<usize> {
        if backlog < 0 {
            return Err(Errno::EINVAL);
        }
        let id = self.lookup(fd)?;
        let mut pool = self.sockets.lock();
        let sock = socket_mut(&mut pool, id)?;

        if sock.is_listening() {
            return Ok(0);
        }
        match sock.state() {
            SocketState::Created => {}
            SocketState::Open if sock.facets() == Facets::BOUND => {}
            _ => return Err(Errno::EINVAL),
        }
        let pcb = sock.pcb.ok_or(Errno::EINVAL)?;
        let lpcb = self
            .stack
            .listen(pcb, self.config.clamp_backlog(backlog))
            .ok_or(Errno::ENOMEM)?;
        sock.pcb = Some(lpcb);
        self.stack
            .attach(lpcb, id, Callbacks::ACCEPT | Callbacks::ERROR);
        sock.open_as(Facets::BOUND | Facets::LISTENING);
        Ok(0)
    }

    /// accept(2): blocks until a connection is pending.
    pub fn accept(
        &self,
        fd: Fd,
        addr: Option<Box<dyn UserBuffer>>,
        addrlen: Option<Box<dyn UserBuffer>>,
    ) -> SysResult<Completion> {
        self.accept4(fd, addr, addrlen, 0)
    }

    /// accept4(2). SOCK_NONBLOCK turns an empty accept into EAGAIN;
    /// SOCK_CLOEXEC is accepted and has no effect here.
    pub fn accept4(
        &self,
        fd: Fd,
        mut addr: Option<Box<dyn UserBuffer>>,
        mut addrlen: Option<Box<dyn UserBuffer>>,
        flags: u32,
    ) -> SysResult<Completion> {
        if flags & !(SOCK_NONBLOCK | SOCK_CLOEXEC) != 0 {
            return Err(Errno::EINVAL);
        }
        let id = self.lookup(fd)?;
        let mut pool = self.sockets.lock();
        if !socket_mut(&mut pool, id)?.is_listening() {
            return Err(Errno::EINVAL);
        }

        if let Some(child_fd) =
            self.finish_accept(&mut pool, id, as_user(&mut addr), as_user(&mut addrlen))
        {
            return Ok(Completion::Ready(child_fd as usize));
        }
        if flags & SOCK_NONBLOCK != 0 {
            return Err(Errno::EAGAIN);
        }

        let thread = self.threads.current_thread();
        socket_mut(&mut pool, id)?
            .waiting
            .enqueue(Continuation::Accept {
                thread,
                addr,
                addrlen,
            })
            .map_err(|_| Errno::EAGAIN)?;
        Ok(Completion::Suspended)
    }

    /// connect(2): blocks until the stack reports the handshake outcome.
    pub fn connect(&self, fd: Fd, addr: &[u8]) -> SysResult<Completion> {
        let sin = SockAddrIn::parse(addr)?;
        let id = self.lookup(fd)?;
        let mut pool = self.sockets.lock();
        let sock = socket_mut(&mut pool, id)?;

        match sock.state() {
            SocketState::InConnection => return Err(StackError::Already.into()),
            SocketState::Open => return Err(StackError::IsConn.into()),
            SocketState::Closed | SocketState::Undefined => return Err(Errno::EINVAL),
            SocketState::Created => {}
        }
        let pcb = sock.pcb.ok_or(Errno::EINVAL)?;
        if sock.waiting.is_full() {
            return Err(Errno::EAGAIN);
        }

        self.stack.attach(
            pcb,
            id,
            Callbacks::RECV | Callbacks::ERROR | Callbacks::CONNECTED,
        );
        sock.transition(SocketState::InConnection);
        if let Err(e) = self.stack.connect(pcb, sin.endpoint()) {
            klog!(Debug, "fd {}: connect to {} failed: {:?}", fd, sin.endpoint(), e);
            sock.transition(SocketState::Created);
            return Err(e.into());
        }

        let thread = self.threads.current_thread();
        sock.waiting
            .enqueue(Continuation::Connect { thread })
            .map_err(|_| Errno::EAGAIN)?;
        Ok(Completion::Suspended)
    }

    /// read(2) on a socket descriptor.
    ///
    /// Returns at most one buffer's worth of bytes. After an orderly close,
    /// queued bytes are still delivered and then 0 marks end of stream.
    pub fn read<B: UserBuffer + 'static>(&self, fd: Fd, mut dest: B) -> SysResult<Completion> {
        let id = self.lookup(fd)?;
        let mut pool = self.sockets.lock();
        let sock = socket_mut(&mut pool, id)?;

        match sock.state() {
            SocketState::Open if !sock.facets().contains(Facets::LISTENING) => {}
            SocketState::Closed => {}
            _ => return Err(Errno::ENOTCONN),
        }
        if dest.capacity() == 0 {
            return Ok(Completion::Ready(0));
        }
        if sock.has_data() {
            return Ok(Completion::Ready(self.complete_read(sock, &mut dest)));
        }
        if sock.state() == SocketState::Closed {
            return Ok(Completion::Ready(0));
        }

        let thread = self.threads.current_thread();
        sock.waiting
            .enqueue(Continuation::Read {
                thread,
                dest: Box::new(dest),
            })
            .map_err(|_| Errno::EAGAIN)?;
        Ok(Completion::Suspended)
    }

    /// write(2): all or nothing. Listeners carry no byte stream.
    pub fn write(&self, fd: Fd, src: &[u8]) -> SysResult<usize> {
        let id = self.lookup(fd)?;
        let mut pool = self.sockets.lock();
        let sock = socket_mut(&mut pool, id)?;

        if !sock.is_open() || sock.is_listening() {
            return Err(Errno::EPIPE);
        }
        let pcb = sock.pcb.ok_or(Errno::EPIPE)?;
        if src.is_empty() {
            return Ok(0);
        }
        self.stack.write(pcb, src)?;
        self.stack.output(pcb)?;
        sock.stats.tx_bytes += src.len() as u64;
        Ok(src.len())
    }

    /// close(2) on a socket descriptor.
    pub fn close(&self, fd: Fd) -> SysResult<usize> {
        let pid = self.threads.current_process();
        let id = self.files.release(pid, fd).ok_or(Errno::EBADF)?;
        let mut watchers = Vec::new();
        {
            let mut pool = self.sockets.lock();
            let sock = pool.remove(id).ok_or(Errno::EBADF)?;
            self.teardown(&mut pool, sock, &mut watchers);
        }
        for watcher in watchers {
            watcher(PollEvents::POLLHUP);
        }
        Ok(0)
    }

    /// getsockname(2)
    pub fn getsockname(
        &self,
        fd: Fd,
        addr: &mut dyn UserBuffer,
        addrlen: Option<&mut dyn UserBuffer>,
    ) -> SysResult<usize> {
        let id = self.lookup(fd)?;
        let pool = self.sockets.lock();
        let sock = pool.get(id).ok_or(Errno::EBADF)?;
        let pcb = sock.pcb.ok_or(Errno::EINVAL)?;
        write_sockaddr(self.stack.local_endpoint(pcb), addr, addrlen);
        Ok(0)
    }

    /// getpeername(2): ENOTCONN unless connected or accepted.
    pub fn getpeername(
        &self,
        fd: Fd,
        addr: &mut dyn UserBuffer,
        addrlen: Option<&mut dyn UserBuffer>,
    ) -> SysResult<usize> {
        let id = self.lookup(fd)?;
        let pool = self.sockets.lock();
        let sock = pool.get(id).ok_or(Errno::EBADF)?;
        if !sock.has_peer() {
            return Err(Errno::ENOTCONN);
        }
        let pcb = sock.pcb.ok_or(Errno::ENOTCONN)?;
        write_sockaddr(self.stack.remote_endpoint(pcb), addr, addrlen);
        Ok(0)
    }

    /// setsockopt(2): accepted and ignored.
    pub fn setsockopt(&self, fd: Fd, level: i32, optname: i32, optval: &[u8]) -> SysResult<usize> {
        klog!(
            Trace,
            "fd {}: setsockopt level {} opt {} ({} bytes) ignored",
            fd,
            level,
            optname,
            optval.len()
        );
        Ok(0)
    }

    /// Readiness check used by select/poll/epoll.
    ///
    /// Fires `watcher` at once when the socket is readable or can never
    /// become readable again; otherwise parks it on the notify queue.
    pub fn check(&self, fd: Fd, watcher: Watcher) -> SysResult<()> {
        let id = self.lookup(fd)?;
        let events = {
            let mut pool = self.sockets.lock();
            let sock = socket_mut(&mut pool, id)?;
            if !sock.inbound.is_empty() {
                sock.poll_events()
            } else if sock.is_open() {
                return sock.notify.enqueue(watcher).map_err(|_| Errno::EAGAIN);
            } else {
                sock.poll_events() | PollEvents::POLLHUP
            }
        };
        watcher(events);
        Ok(())
    }

    /// Per-socket counters.
    pub fn stats(&self, fd: Fd) -> SysResult<SocketStats> {
        let id = self.lookup(fd)?;
        let pool = self.sockets.lock();
        pool.get(id).map(Socket::stats).ok_or(Errno::EBADF)
    }
}
