//! Received-data buffers handed up by the stack.

use alloc::vec::Vec;

/// A chunk of received TCP payload.
///
/// The buffer stays at the head of its socket's inbound queue until every
/// byte has been read; `consumed` tracks how far readers got.
///
/// ```text
/// +-----------------+--------------------+
/// |    consumed     |     remaining      |
/// +-----------------+--------------------+
/// ^                 ^                    ^
/// 0                 consumed             data.len()
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetBuf {
    data: Vec<u8>,
    consumed: usize,
}

impl NetBuf {
    pub fn new(data: Vec<u8>) -> Self {
        NetBuf { data, consumed: 0 }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    /// Bytes not yet read.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.consumed
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    /// Advance past `n` bytes that a reader copied out.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consume past end of NetBuf");
        self.consumed += n.min(self.len());
    }
}
