//! One-shot readiness signal from parent to child.
//!
//! A connected `SOCK_SEQPACKET` pair: the parent writes one message once it
//! has finished confining the child; the child blocks reading it. If the
//! parent dies first the child's read returns EOF, which is fatal.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};

use corral_common::error::{CorralError, Result};

const READY: i32 = 0;
const MESSAGE_LEN: usize = std::mem::size_of::<i32>();

/// Something that can release a waiting child.
pub trait ReadyGate {
    /// Sends the readiness signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    fn release(&mut self) -> Result<()>;
}

/// The parent's end of the channel. Close-on-exec.
#[derive(Debug)]
pub struct ParentEnd(File);

/// The child's end of the channel.
#[derive(Debug)]
pub struct ChildEnd(File);

/// Opens a connected socket pair for the readiness handshake.
///
/// # Errors
///
/// Returns an error if the pair cannot be created or configured.
pub fn channel() -> Result<(ParentEnd, ChildEnd)> {
    let (parent, child) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )
    .map_err(|e| CorralError::syscall("socketpair", "readiness channel", e))?;
    set_cloexec(&parent)?;
    Ok((ParentEnd(File::from(parent)), ChildEnd(File::from(child))))
}

fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    // SAFETY: `fd` is an open descriptor owned for the duration of the call.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(CorralError::syscall(
            "fcntl",
            "readiness channel",
            Errno::last(),
        ));
    }
    Ok(())
}

impl ParentEnd {
    /// Raw descriptor, so the child can close its inherited copy.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl ReadyGate for ParentEnd {
    fn release(&mut self) -> Result<()> {
        self.0
            .write_all(&READY.to_ne_bytes())
            .map_err(|e| CorralError::Handshake {
                message: format!("could not signal child: {e}"),
            })?;
        tracing::debug!("child released");
        Ok(())
    }
}

impl ChildEnd {
    /// Blocks until the parent signals readiness, then closes the channel.
    ///
    /// # Errors
    ///
    /// Returns a handshake error on EOF, a short read, or a read failure.
    pub fn wait_ready(mut self) -> Result<()> {
        let mut buf = [0_u8; MESSAGE_LEN];
        let n = self.0.read(&mut buf).map_err(|e| CorralError::Handshake {
            message: format!("read failed: {e}"),
        })?;
        if n != MESSAGE_LEN {
            return Err(CorralError::Handshake {
                message: format!("expected {MESSAGE_LEN} bytes, got {n}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fd_flags(fd: RawFd) -> i32 {
        // SAFETY: test-only query of an open descriptor.
        unsafe { libc::fcntl(fd, libc::F_GETFD) }
    }

    #[test]
    fn released_child_proceeds() {
        let (mut parent, child) = channel().unwrap();
        parent.release().unwrap();
        child.wait_ready().unwrap();
    }

    #[test]
    fn dead_parent_is_eof_for_child() {
        let (parent, child) = channel().unwrap();
        drop(parent);
        let err = child.wait_ready().unwrap_err();
        assert!(matches!(err, CorralError::Handshake { .. }));
    }

    #[test]
    fn release_to_gone_child_fails() {
        let (mut parent, child) = channel().unwrap();
        drop(child);
        let err = parent.release().unwrap_err();
        assert!(matches!(err, CorralError::Handshake { .. }));
    }

    #[test]
    fn only_parent_end_is_close_on_exec() {
        let (parent, child) = channel().unwrap();
        assert_ne!(fd_flags(parent.as_raw_fd()) & libc::FD_CLOEXEC, 0);
        assert_eq!(fd_flags(child.0.as_raw_fd()) & libc::FD_CLOEXEC, 0);
    }
}
