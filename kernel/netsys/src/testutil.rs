//! Test doubles for the stack, scheduler and user memory.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

use crate::addr::{Endpoint, Ipv4Addr, SockAddrIn, SOCKADDR_IN_LEN};
use crate::config::NetConfig;
use crate::socket::SocketId;
use crate::stack::{Callbacks, PcbHandle, StackResult, TcpStack};
use crate::syscall::NetSys;
use crate::table::FdTable;
use crate::wait::{Pid, ThreadHooks, ThreadId, UserBuffer};

/// Stack operation as observed by [`MockStack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FreePcb(PcbHandle),
    Attach(PcbHandle, SocketId, Callbacks),
    Bind(PcbHandle, Endpoint),
    Listen(PcbHandle, u8),
    Connect(PcbHandle, Endpoint),
    Write(PcbHandle, Vec<u8>),
    Output(PcbHandle),
    Recved(PcbHandle, usize),
    Close(PcbHandle),
    Abort(PcbHandle),
}

/// Recording stack with scriptable results.
pub struct MockStack {
    next_pcb: AtomicU64,
    no_pcbs: AtomicBool,
    calls: Mutex<Vec<Call>>,
    bind_result: Mutex<StackResult>,
    connect_result: Mutex<StackResult>,
    write_result: Mutex<StackResult>,
    close_result: Mutex<StackResult>,
    owners: Mutex<BTreeMap<PcbHandle, SocketId>>,
    local: Mutex<BTreeMap<PcbHandle, Endpoint>>,
    remote: Mutex<BTreeMap<PcbHandle, Endpoint>>,
}

impl MockStack {
    pub fn new() -> Self {
        MockStack {
            next_pcb: AtomicU64::new(1),
            no_pcbs: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            bind_result: Mutex::new(Ok(())),
            connect_result: Mutex::new(Ok(())),
            write_result: Mutex::new(Ok(())),
            close_result: Mutex::new(Ok(())),
            owners: Mutex::new(BTreeMap::new()),
            local: Mutex::new(BTreeMap::new()),
            remote: Mutex::new(BTreeMap::new()),
        }
    }

    fn alloc(&self) -> PcbHandle {
        PcbHandle(self.next_pcb.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Most recently allocated control block.
    pub fn last_pcb(&self) -> PcbHandle {
        PcbHandle(self.next_pcb.load(Ordering::SeqCst) - 1)
    }

    /// Socket the callbacks of `pcb` were routed to.
    pub fn owner(&self, pcb: PcbHandle) -> SocketId {
        *self.owners.lock().get(&pcb).expect("pcb not attached")
    }

    /// A control block for an inbound connection from `peer`.
    pub fn inbound(&self, peer: Endpoint) -> PcbHandle {
        let pcb = self.alloc();
        self.remote.lock().insert(pcb, peer);
        pcb
    }

    pub fn remote_of(&self, pcb: PcbHandle) -> Endpoint {
        self.remote.lock().get(&pcb).copied().unwrap_or_default()
    }

    /// Everything written on `pcb`, concatenated.
    pub fn written(&self, pcb: PcbHandle) -> Vec<u8> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Write(p, data) if *p == pcb => Some(data.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn recved_total(&self, pcb: PcbHandle) -> usize {
        self.calls
            .lock()
            .iter()
            .map(|c| match c {
                Call::Recved(p, n) if *p == pcb => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn fail_new_pcb(&self, fail: bool) {
        self.no_pcbs.store(fail, Ordering::SeqCst);
    }

    pub fn set_bind_result(&self, r: StackResult) {
        *self.bind_result.lock() = r;
    }

    pub fn set_connect_result(&self, r: StackResult) {
        *self.connect_result.lock() = r;
    }

    pub fn set_write_result(&self, r: StackResult) {
        *self.write_result.lock() = r;
    }

    pub fn set_close_result(&self, r: StackResult) {
        *self.close_result.lock() = r;
    }
}

impl TcpStack for MockStack {
    fn new_pcb(&self) -> Option<PcbHandle> {
        if self.no_pcbs.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.alloc())
    }

    fn free_pcb(&self, pcb: PcbHandle) {
        self.record(Call::FreePcb(pcb));
    }

    fn attach(&self, pcb: PcbHandle, owner: SocketId, callbacks: Callbacks) {
        self.owners.lock().insert(pcb, owner);
        self.record(Call::Attach(pcb, owner, callbacks));
    }

    fn bind(&self, pcb: PcbHandle, local: Endpoint) -> StackResult {
        self.record(Call::Bind(pcb, local));
        let r = *self.bind_result.lock();
        if r.is_ok() {
            self.local.lock().insert(pcb, local);
        }
        r
    }

    fn listen(&self, pcb: PcbHandle, backlog: u8) -> Option<PcbHandle> {
        self.record(Call::Listen(pcb, backlog));
        let lpcb = self.alloc();
        let local = self.local.lock().get(&pcb).copied();
        if let Some(ep) = local {
            self.local.lock().insert(lpcb, ep);
        }
        Some(lpcb)
    }

    fn connect(&self, pcb: PcbHandle, remote: Endpoint) -> StackResult {
        self.record(Call::Connect(pcb, remote));
        let r = *self.connect_result.lock();
        if r.is_ok() {
            self.remote.lock().insert(pcb, remote);
            self.local
                .lock()
                .insert(pcb, Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 49152));
        }
        r
    }

    fn write(&self, pcb: PcbHandle, data: &[u8]) -> StackResult {
        let r = *self.write_result.lock();
        if r.is_ok() {
            self.record(Call::Write(pcb, data.to_vec()));
        }
        r
    }

    fn output(&self, pcb: PcbHandle) -> StackResult {
        self.record(Call::Output(pcb));
        Ok(())
    }

    fn recved(&self, pcb: PcbHandle, len: usize) {
        self.record(Call::Recved(pcb, len));
    }

    fn close(&self, pcb: PcbHandle) -> StackResult {
        self.record(Call::Close(pcb));
        *self.close_result.lock()
    }

    fn abort(&self, pcb: PcbHandle) {
        self.record(Call::Abort(pcb));
    }

    fn local_endpoint(&self, pcb: PcbHandle) -> Endpoint {
        self.local.lock().get(&pcb).copied().unwrap_or_default()
    }

    fn remote_endpoint(&self, pcb: PcbHandle) -> Endpoint {
        self.remote_of(pcb)
    }
}

/// Scheduler double: a settable current thread and a log of resumes.
pub struct MockThreads {
    current: AtomicU64,
    pid: AtomicU64,
    resumed: Mutex<Vec<(ThreadId, isize)>>,
}

impl MockThreads {
    pub fn new() -> Self {
        MockThreads {
            current: AtomicU64::new(1),
            pid: AtomicU64::new(1),
            resumed: Mutex::new(Vec::new()),
        }
    }

    pub fn set_current(&self, thread: ThreadId) {
        self.current.store(thread.0, Ordering::SeqCst);
    }

    pub fn set_process(&self, pid: Pid) {
        self.pid.store(pid.0, Ordering::SeqCst);
    }

    pub fn resumed(&self) -> Vec<(ThreadId, isize)> {
        self.resumed.lock().clone()
    }

    pub fn take_resumed(&self) -> Vec<(ThreadId, isize)> {
        core::mem::take(&mut *self.resumed.lock())
    }
}

impl ThreadHooks for MockThreads {
    fn current_thread(&self) -> ThreadId {
        ThreadId(self.current.load(Ordering::SeqCst))
    }

    fn current_process(&self) -> Pid {
        Pid(self.pid.load(Ordering::SeqCst))
    }

    fn resume(&self, thread: ThreadId, ret: isize) {
        self.resumed.lock().push((thread, ret));
    }
}

/// User buffer the test keeps a handle to after handing it to a syscall.
#[derive(Clone)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new(len: usize) -> Self {
        SharedBuf(Arc::new(Mutex::new(alloc::vec![0; len])))
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl UserBuffer for SharedBuf {
    fn capacity(&self) -> usize {
        self.0.lock().len()
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        self.0.lock().write(bytes)
    }
}

pub struct Harness {
    pub net: NetSys,
    pub stack: Arc<MockStack>,
    pub threads: Arc<MockThreads>,
}

pub fn harness() -> Harness {
    harness_with(NetConfig::default())
}

pub fn harness_with(config: NetConfig) -> Harness {
    let stack = Arc::new(MockStack::new());
    let threads = Arc::new(MockThreads::new());
    let files = Arc::new(FdTable::new(config.max_fds));
    Harness {
        net: NetSys::new(config, stack.clone(), threads.clone(), files),
        stack,
        threads,
    }
}

/// Raw `sockaddr_in` bytes for `ip:port`.
pub fn sockaddr(ip: [u8; 4], port: u16) -> [u8; SOCKADDR_IN_LEN] {
    SockAddrIn::from_endpoint(Endpoint::new(Ipv4Addr(ip), port)).to_bytes()
}
