//! Byte channels: the OS-level I/O endpoints of a boot session.
//!
//! A [`Channel`] wraps one readable and/or writable endpoint (the serial
//! device, the console streams, or one end of a pipe to the transfer helper)
//! together with its open/closed state and the processor chain reacting to
//! its input. Any I/O error moves the channel to the closed state, after
//! which it is skipped by the event loop and every operation on it is a
//! no-op.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::process::{ChildStdin, ChildStdout};

use log::{debug, warn};
use serialport::TTYPort;

use super::processor::Processor;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Stable handle to a channel owned by the registry.
///
/// Handles index into an append-only collection and channels are never
/// removed (a dead channel is closed and left inert), so a handle stays valid
/// for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelId(pub(super) usize);

/// Which I/O operations an endpoint takes part in.
///
/// Only readable channels enter the readiness set, and only writable ones
/// accept writes; wiring a write to an input-only channel is a programming
/// error and is dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub(crate) fn readable(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub(crate) fn writable(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// An OS-level I/O object a channel can be built on: it exposes its raw fd
/// for the readiness wait and whichever of read/write its kind supports.
pub(crate) trait Endpoint: AsRawFd {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl Endpoint for TTYPort {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

impl Endpoint for io::Stdin {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_bytes(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("console input is read-only"))
    }
}

impl Endpoint for io::Stdout {
    fn read_bytes(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("console output is write-only"))
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Serial traffic rarely ends in a newline; flush so the operator
        // sees prompts as they arrive.
        let written = Write::write(self, buf)?;
        Write::flush(self)?;
        Ok(written)
    }
}

impl Endpoint for ChildStdin {
    fn read_bytes(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("helper stdin is write-only"))
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

impl Endpoint for ChildStdout {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_bytes(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("helper stdout is read-only"))
    }
}

impl Endpoint for File {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, what)
}

/// One I/O endpoint of the session, with its direction, closed flag and the
/// chain of processors fed with every chunk read from it.
pub(crate) struct Channel {
    name: &'static str,
    endpoint: Box<dyn Endpoint>,
    direction: Direction,
    closed: bool,
    pub(super) chain: Vec<Box<dyn Processor>>,
}

impl Channel {
    pub(crate) fn new(name: &'static str, endpoint: Box<dyn Endpoint>, direction: Direction) -> Self {
        Channel {
            name,
            endpoint,
            direction,
            closed: false,
            chain: Vec::new(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.endpoint.as_raw_fd()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn is_readable(&self) -> bool {
        self.direction.readable()
    }

    /// Mark the channel closed. Its entry stays in the registry as an inert
    /// placeholder; the fd itself is released at process exit.
    pub(crate) fn close(&mut self) {
        if !self.closed {
            debug!("closing channel `{}`", self.name);
            self.closed = true;
        }
    }

    /// Read whatever is currently available, without blocking the session:
    /// the event loop only calls this after the readiness wait reported the
    /// channel ready. End of input and I/O errors both close the channel.
    pub(crate) fn read_available(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.closed || !self.direction.readable() {
            return None;
        }
        loop {
            match self.endpoint.read_bytes(buf) {
                Ok(0) => {
                    debug!("channel `{}` reached end of input", self.name);
                    self.close();
                    return None;
                }
                Ok(count) => return Some(count),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!("read error on `{}`: {}", self.name, e);
                    self.close();
                    return None;
                }
            }
        }
    }

    /// Write all of `bytes` to the endpoint. A closed channel swallows the
    /// write silently; an I/O error closes the channel and the rest of the
    /// data is dropped. Errors never propagate past the channel.
    pub(crate) fn write(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }
        if !self.direction.writable() {
            warn!("dropping write to non-writable channel `{}`", self.name);
            return;
        }
        let mut written = 0;
        while written < bytes.len() {
            match self.endpoint.write_bytes(&bytes[written..]) {
                Ok(0) => {
                    warn!("channel `{}` accepted no data", self.name);
                    self.close();
                    return;
                }
                Ok(count) => written += count,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Serial backpressure during a bulk transfer; keep pushing.
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    warn!("write error on `{}`: {}", self.name, e);
                    self.close();
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

/// Anonymous-pipe endpoints for exercising channels without a real device.
#[cfg(test)]
pub(super) mod test_support {
    use std::fs::File;
    use std::os::unix::io::FromRawFd;

    /// Returns `(read_end, write_end)` of a fresh anonymous pipe.
    pub(crate) fn pipe_pair() -> (File, File) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe(2) failed");
        let read_end = unsafe { File::from_raw_fd(fds[0]) };
        let write_end = unsafe { File::from_raw_fd(fds[1]) };
        (read_end, write_end)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::test_support::pipe_pair;
    use super::*;

    #[test]
    fn write_is_byte_exact() {
        let (mut read_end, write_end) = pipe_pair();
        let mut channel = Channel::new("out", Box::new(write_end), Direction::Out);

        channel.write(b"loady\n");
        drop(channel);

        let mut forwarded = Vec::new();
        read_end.read_to_end(&mut forwarded).unwrap();
        assert_eq!(forwarded, b"loady\n");
    }

    #[test]
    fn write_to_closed_channel_is_a_no_op() {
        let (mut read_end, write_end) = pipe_pair();
        let mut channel = Channel::new("out", Box::new(write_end), Direction::Out);

        channel.close();
        channel.write(b"dropped");
        assert!(channel.is_closed());
        drop(channel);

        let mut forwarded = Vec::new();
        read_end.read_to_end(&mut forwarded).unwrap();
        assert!(forwarded.is_empty());
    }

    #[test]
    fn write_to_input_only_channel_is_dropped() {
        let (read_end, _write_end) = pipe_pair();
        let mut channel = Channel::new("in", Box::new(read_end), Direction::In);

        channel.write(b"dropped");
        // The bad write does not close the channel; it stays usable.
        assert!(!channel.is_closed());
    }

    #[test]
    fn end_of_input_closes_the_channel() {
        let (read_end, write_end) = pipe_pair();
        let mut channel = Channel::new("in", Box::new(read_end), Direction::In);
        drop(write_end);

        let mut buf = [0u8; 64];
        assert_eq!(channel.read_available(&mut buf), None);
        assert!(channel.is_closed());

        // And every later read is a no-op.
        assert_eq!(channel.read_available(&mut buf), None);
    }

    #[test]
    fn read_returns_the_available_chunk() {
        use std::io::Write;

        let (read_end, mut write_end) = pipe_pair();
        let mut channel = Channel::new("in", Box::new(read_end), Direction::In);
        write_end.write_all(b"U-Boot# ").unwrap();

        let mut buf = [0u8; 64];
        let count = channel.read_available(&mut buf).unwrap();
        assert_eq!(&buf[..count], b"U-Boot# ");
    }
}
