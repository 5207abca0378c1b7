//! Stack callback entry point and the wakeup protocol.
//!
//! The stack reports progress on a control block by calling
//! [`NetSys::dispatch`] with the [`SocketId`] it was attached to. Every event
//! updates the socket under the socket lock and then runs one wakeup:
//!
//! 1. If a continuation is parked, try to complete it. A continuation that
//!    still cannot complete goes back to the head of the queue.
//! 2. Otherwise fire the oldest notify watcher, if any.
//!
//! Once a socket is CLOSED or UNDEFINED no further event can arrive, so the
//! wakeup after such an event resumes every parked continuation and fires
//! every watcher instead.
//!
//! Watchers run after the lock is dropped.

use alloc::vec::Vec;

use crate::buffer::NetBuf;
use crate::errno::{Errno, SysResult};
use crate::socket::{Facets, Inbound, SocketId, SocketState};
use crate::stack::{Callbacks, PcbHandle, StackError, StackResult};
use crate::syscall::{as_user, NetSys};
use crate::table::SocketPool;
use crate::wait::{Continuation, PollEvents, Watcher};

/// Asynchronous notification from the TCP stack.
#[derive(Debug)]
pub enum StackEvent {
    /// Data arrived (`Some`) or the peer closed its side (`None`).
    Recv {
        buf: Option<NetBuf>,
        status: StackResult,
    },
    /// The control block hit a fatal error and has already been freed.
    Error(StackError),
    /// Outcome of an active open.
    Connected(StackResult),
    /// A listener produced an established connection.
    Accept(PcbHandle),
}

/// Event the socket layer did not take ownership of.
///
/// For `Recv` the buffer is handed back; for `Accept` the stack should abort
/// the new control block.
#[derive(Debug)]
pub struct Refused {
    pub err: StackError,
    pub buf: Option<NetBuf>,
}

type Fire = Vec<(Watcher, PollEvents)>;

impl NetSys {
    /// Deliver a stack event to the socket it was attached to.
    ///
    /// Events for sockets that have since been closed are dropped; data and
    /// connections for them are refused so the stack can reclaim them.
    pub fn dispatch(&self, owner: SocketId, event: StackEvent) -> Result<(), Refused> {
        let fire = {
            let mut pool = self.sockets.lock();
            if !pool.contains(owner) {
                klog!(Debug, "netsys: stale callback for {:?}: {:?}", owner, event);
                return match event {
                    StackEvent::Recv { buf: Some(buf), .. } => Err(Refused {
                        err: StackError::Clsd,
                        buf: Some(buf),
                    }),
                    StackEvent::Accept(_) => Err(Refused {
                        err: StackError::Clsd,
                        buf: None,
                    }),
                    _ => Ok(()),
                };
            }
            match event {
                StackEvent::Recv { buf, status } => self.on_recv(&mut pool, owner, buf, status)?,
                StackEvent::Error(err) => self.on_error(&mut pool, owner, err),
                StackEvent::Connected(status) => self.on_connected(&mut pool, owner, status),
                StackEvent::Accept(pcb) => self.on_accept(&mut pool, owner, pcb)?,
            }
        };
        for (watcher, events) in fire {
            watcher(events);
        }
        Ok(())
    }

    fn on_recv(
        &self,
        pool: &mut SocketPool,
        id: SocketId,
        buf: Option<NetBuf>,
        status: StackResult,
    ) -> Result<Fire, Refused> {
        let Some(sock) = pool.get_mut(id) else {
            return Ok(Vec::new());
        };
        if let Err(err) = status {
            klog!(Debug, "fd {}: receive status {:?}", sock.fd, err);
            sock.record_error(err);
        }
        match buf {
            Some(buf) if buf.is_empty() => {}
            Some(buf) => {
                if sock.inbound.is_full() {
                    sock.stats.refused += 1;
                    klog!(
                        Warn,
                        "fd {}: inbound queue full, refusing {} bytes",
                        sock.fd,
                        buf.len()
                    );
                    return Err(Refused {
                        err: StackError::Mem,
                        buf: Some(buf),
                    });
                }
                if sock.inbound.enqueue(Inbound::Data(buf)).is_ok() {
                    sock.stats.rx_buffers += 1;
                }
            }
            None => {
                klog!(Debug, "fd {}: peer closed", sock.fd);
                sock.transition(SocketState::Closed);
            }
        }
        Ok(self.wakeup(pool, id, Ok(())))
    }

    fn on_error(&self, pool: &mut SocketPool, id: SocketId, err: StackError) -> Fire {
        let Some(sock) = pool.get_mut(id) else {
            return Vec::new();
        };
        match err {
            StackError::Abrt => {
                klog!(Error, "connection closed on fd {} due to abort or timer", sock.fd)
            }
            StackError::Rst => {
                klog!(Error, "connection closed on fd {} due to remote reset", sock.fd)
            }
            other => klog!(Error, "fd {}: unknown stack error {:?}", sock.fd, other),
        }
        // The stack has already freed the control block.
        sock.pcb = None;
        sock.transition(SocketState::Undefined);
        self.wakeup(pool, id, Err(err.errno()))
    }

    fn on_connected(&self, pool: &mut SocketPool, id: SocketId, status: StackResult) -> Fire {
        let Some(sock) = pool.get_mut(id) else {
            return Vec::new();
        };
        if sock.state() != SocketState::InConnection {
            klog!(Warn, "fd {}: connect completion in state {:?}", sock.fd, sock.state());
        }
        match status {
            Ok(()) => {
                sock.open_as(Facets::CONNECTED);
            }
            Err(err) => {
                klog!(Warn, "fd {}: connect failed: {:?}", sock.fd, err);
                sock.transition(SocketState::Created);
            }
        }
        self.wakeup(pool, id, status.map_err(StackError::errno))
    }

    fn on_accept(
        &self,
        pool: &mut SocketPool,
        listener: SocketId,
        pcb: PcbHandle,
    ) -> Result<Fire, Refused> {
        let refuse = Refused {
            err: StackError::Mem,
            buf: None,
        };
        let (pid, lfd) = match pool.get_mut(listener) {
            Some(l) if l.is_listening() && !l.inbound.is_full() => (l.pid, l.fd),
            Some(l) => {
                l.stats.refused += 1;
                klog!(Warn, "fd {}: cannot take inbound connection", l.fd);
                return Err(refuse);
            }
            None => return Err(refuse),
        };

        let child = match self.allocate_socket(pool, pid, pcb) {
            Ok(child) => child,
            Err(e) => {
                klog!(Warn, "fd {}: no socket for inbound connection: {:?}", lfd, e);
                return Err(refuse);
            }
        };
        if let Some(c) = pool.get_mut(child) {
            c.open_as(Facets::ACCEPTED);
            klog!(Debug, "fd {}: accepted fd {} pcb {:?}", lfd, c.fd, pcb);
        }
        self.stack
            .attach(pcb, child, Callbacks::RECV | Callbacks::ERROR);
        if let Some(l) = pool.get_mut(listener) {
            if l.inbound.enqueue(Inbound::Conn(child)).is_err() {
                if let Some(c) = pool.remove(child) {
                    self.files.release(c.pid, c.fd);
                }
                return Err(refuse);
            }
        }
        Ok(self.wakeup(pool, listener, Ok(())))
    }

    /// One wakeup step after an event on `id`.
    pub(crate) fn wakeup(&self, pool: &mut SocketPool, id: SocketId, status: SysResult<()>) -> Fire {
        let mut fire = Vec::new();
        let Some(sock) = pool.get_mut(id) else {
            return fire;
        };
        if matches!(sock.state(), SocketState::Closed | SocketState::Undefined) {
            self.wake_all(pool, id, status, &mut fire);
            return fire;
        }
        if let Some(waiter) = sock.waiting.dequeue() {
            if let Some(waiter) = self.resume_waiter(pool, id, waiter, status) {
                if let Some(sock) = pool.get_mut(id) {
                    sock.waiting.requeue(waiter);
                }
            }
            return fire;
        }
        let events = sock.poll_events();
        fire.extend(sock.notify.dequeue().map(|watcher| (watcher, events)));
        fire
    }

    /// Terminal wakeup: nothing further will arrive for `id`, so every
    /// parked caller gets its final result and every watcher fires.
    fn wake_all(&self, pool: &mut SocketPool, id: SocketId, status: SysResult<()>, fire: &mut Fire) {
        let waiters: Vec<Continuation> = match pool.get_mut(id) {
            Some(sock) => sock.waiting.drain().collect(),
            None => return,
        };
        let mut stuck = Vec::new();
        for waiter in waiters {
            if let Some(waiter) = self.resume_waiter(pool, id, waiter, status) {
                stuck.push(waiter);
            }
        }
        let Some(sock) = pool.get_mut(id) else {
            return;
        };
        for waiter in stuck.into_iter().rev() {
            sock.waiting.requeue(waiter);
        }
        let events = sock.poll_events();
        klog!(
            Debug,
            "fd {}: terminal wakeup, {} watchers",
            sock.fd,
            sock.notify.len()
        );
        fire.extend(sock.notify.drain().map(|watcher| (watcher, events)));
    }

    /// Complete a parked syscall if its result is available.
    ///
    /// Hands the continuation back when it must keep waiting.
    fn resume_waiter(
        &self,
        pool: &mut SocketPool,
        id: SocketId,
        waiter: Continuation,
        status: SysResult<()>,
    ) -> Option<Continuation> {
        if let Err(errno) = status {
            self.threads.resume(waiter.thread(), errno.as_isize());
            return None;
        }
        match waiter {
            Continuation::Connect { thread } => {
                self.threads.resume(thread, 0);
                None
            }
            Continuation::Read { thread, mut dest } => {
                let ret = match pool.get_mut(id) {
                    Some(sock) if sock.has_data() => self.complete_read(sock, &mut *dest) as isize,
                    Some(sock) if sock.state() == SocketState::Closed => 0,
                    Some(sock) if sock.is_open() => {
                        return Some(Continuation::Read { thread, dest });
                    }
                    Some(_) => Errno::ENOTCONN.as_isize(),
                    None => Errno::EBADF.as_isize(),
                };
                self.threads.resume(thread, ret);
                None
            }
            Continuation::Accept {
                thread,
                mut addr,
                mut addrlen,
            } => {
                let accepted =
                    self.finish_accept(pool, id, as_user(&mut addr), as_user(&mut addrlen));
                let ret = match accepted {
                    Some(fd) => fd as isize,
                    None if pool.get(id).map_or(false, |l| l.is_listening()) => {
                        return Some(Continuation::Accept {
                            thread,
                            addr,
                            addrlen,
                        });
                    }
                    None => Errno::EINVAL.as_isize(),
                };
                self.threads.resume(thread, ret);
                None
            }
        }
    }
}
