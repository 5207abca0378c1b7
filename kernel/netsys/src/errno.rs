//! POSIX error numbers returned by the socket syscalls.

/// Syscall error codes (Linux x86_64 ABI values, stored negated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    EBADF = -9,
    EAGAIN = -11,
    ENOMEM = -12,
    EBUSY = -16,
    EINVAL = -22,
    EMFILE = -24,
    EPIPE = -32,
    EPROTONOSUPPORT = -93,
    EAFNOSUPPORT = -97,
    ENOTCONN = -107,
}

impl Errno {
    /// Negative value as placed in the syscall return register.
    #[inline]
    pub const fn as_isize(self) -> isize {
        self as i32 as isize
    }

    /// Positive errno number (what userspace sees in `errno`).
    #[inline]
    pub const fn code(self) -> i32 {
        -(self as i32)
    }
}

/// Result type of every socket syscall.
pub type SysResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_match_linux_abi() {
        assert_eq!(Errno::EAGAIN.code(), 11);
        assert_eq!(Errno::ENOMEM.as_isize(), -12);
        assert_eq!(Errno::EPIPE.code(), 32);
        assert_eq!(Errno::ENOTCONN.as_isize(), -107);
    }
}
