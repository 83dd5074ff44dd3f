//! The session event loop and its channel registry.
//!
//! A [`Session`] owns every channel through the [`ChannelRegistry`] and runs
//! a single-threaded, level-triggered loop: block in `poll(2)` with no
//! timeout until at least one open readable channel has data, then service
//! the ready channels in registration order. Servicing a channel reads one
//! chunk and pushes it through the channel's processor chain; processors may
//! write to other channels or register brand-new ones (the transfer helper's
//! pipes) as a side effect, but all of that runs to completion before the
//! next wait — there is exactly one suspension point per iteration.

use std::io;
use std::mem;

use hexplay::HexViewBuilder;
use log::{debug, info, log_enabled, trace, Level::Debug};

use crate::settings::{TriggerAction, TriggerRule};

use super::channel::{Channel, ChannelId, Direction, Endpoint};
use super::error::SessionError;
use super::processor::{CopyProcessor, PipeProcessor, Processor, ReplyProcessor};

/// Upper bound on the bytes taken from a channel per read.
const READ_CHUNK: usize = 4096;

// =============================================================================
// Channel Registry
// =============================================================================

/// Owns the session's channels and hands out the narrow operations
/// processors are allowed to perform on them.
///
/// Channels are appended and never removed, so a [`ChannelId`] stays valid
/// for the whole session; closed channels remain as inert entries. The
/// serial and console channels are created up front and kept as named
/// shortcuts for wiring.
pub(crate) struct ChannelRegistry {
    channels: Vec<Channel>,
    serial: ChannelId,
    console_out: ChannelId,
    console_in: ChannelId,
}

impl ChannelRegistry {
    pub(crate) fn new(
        serial: Box<dyn Endpoint>,
        console_in: Box<dyn Endpoint>,
        console_out: Box<dyn Endpoint>,
    ) -> Self {
        let channels = vec![
            Channel::new("serial", serial, Direction::InOut),
            Channel::new("console-in", console_in, Direction::In),
            Channel::new("console-out", console_out, Direction::Out),
        ];
        ChannelRegistry {
            channels,
            serial: ChannelId(0),
            console_in: ChannelId(1),
            console_out: ChannelId(2),
        }
    }

    pub(crate) fn serial(&self) -> ChannelId {
        self.serial
    }

    pub(crate) fn console_in(&self) -> ChannelId {
        self.console_in
    }

    pub(crate) fn console_out(&self) -> ChannelId {
        self.console_out
    }

    /// Register a new channel and hand back its stable id.
    pub(crate) fn add_channel(&mut self, channel: Channel) -> ChannelId {
        let id = ChannelId(self.channels.len());
        debug!("registering channel `{}` as #{}", channel.name(), id.0);
        self.channels.push(channel);
        id
    }

    /// Append a processor to a channel's chain. Processors attached while
    /// the channel is being serviced do not see the chunk in flight.
    pub(crate) fn attach(&mut self, id: ChannelId, processor: Box<dyn Processor>) {
        self.channels[id.0].chain.push(processor);
    }

    /// Write to a channel; closed channels swallow the bytes and write
    /// failures close the channel, so this never fails upward.
    pub(crate) fn write_to(&mut self, id: ChannelId, bytes: &[u8]) {
        self.channels[id.0].write(bytes);
    }

    pub(crate) fn close_channel(&mut self, id: ChannelId) {
        self.channels[id.0].close();
    }

    pub(crate) fn is_closed(&self, id: ChannelId) -> bool {
        self.channels[id.0].is_closed()
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Read one chunk from a ready channel and dispatch it.
    fn service(&mut self, id: ChannelId) -> Result<(), SessionError> {
        let mut buf = [0u8; READ_CHUNK];
        let count = match self.channels[id.0].read_available(&mut buf) {
            Some(count) => count,
            None => return Ok(()),
        };
        trace!("{} bytes from `{}`", count, self.channels[id.0].name());
        if log_enabled!(Debug) {
            let view = HexViewBuilder::new(&buf[..count])
                .address_offset(0)
                .row_width(16)
                .finish();
            println!("{}", view);
        }
        self.dispatch(id, &buf[..count])
    }

    /// Push one chunk through the owning channel's processor chain, in
    /// attachment order.
    ///
    /// The chain is detached for the duration of the dispatch so processors
    /// are free to mutate the registry — including attaching new processors
    /// to the very channel being serviced, which the pipe processor does
    /// when it splices in the transfer helper.
    fn dispatch(&mut self, id: ChannelId, chunk: &[u8]) -> Result<(), SessionError> {
        let mut chain = mem::take(&mut self.channels[id.0].chain);
        let mut result = Ok(());
        for processor in chain.iter_mut() {
            if let Err(e) = processor.on_data(self, chunk) {
                result = Err(e);
                break;
            }
        }
        // Anything attached during the dispatch lands after the existing
        // processors, preserving attachment order.
        let mut attached = mem::take(&mut self.channels[id.0].chain);
        chain.append(&mut attached);
        self.channels[id.0].chain = chain;
        result
    }
}

// =============================================================================
// Session
// =============================================================================

/// One boot automation session over an open serial port.
///
/// Wires the standing channels and the trigger table, then multiplexes them
/// until the serial side disconnects (`Ok`) or the session hits an
/// unrecoverable condition such as a scan overflow (`Err`).
pub(crate) struct Session {
    registry: ChannelRegistry,
}

impl Session {
    pub(crate) fn new(
        serial: Box<dyn Endpoint>,
        console_in: Box<dyn Endpoint>,
        console_out: Box<dyn Endpoint>,
        rules: &[TriggerRule],
    ) -> Self {
        let mut registry = ChannelRegistry::new(serial, console_in, console_out);
        let serial = registry.serial();
        let console_in = registry.console_in();
        let console_out = registry.console_out();

        // The standing terminal paths: board output to the operator, operator
        // input to the board.
        registry.attach(serial, Box::new(CopyProcessor::new(console_out)));
        registry.attach(console_in, Box::new(CopyProcessor::new(serial)));

        // The automation rules all watch the serial stream.
        for rule in rules {
            let processor: Box<dyn Processor> = match &rule.action {
                TriggerAction::Reply { reply, occurrences } => Box::new(ReplyProcessor::new(
                    serial,
                    &rule.pattern,
                    reply,
                    *occurrences,
                )),
                TriggerAction::Transfer { command, args } => Box::new(PipeProcessor::new(
                    serial,
                    &rule.pattern,
                    command,
                    args.clone(),
                )),
            };
            registry.attach(serial, processor);
        }

        Session { registry }
    }

    /// Run the multiplexing loop.
    ///
    /// Returns `Ok(())` once the serial channel has closed (device unplugged
    /// or end of stream) so the caller can wait for the device to come back,
    /// or an error when the session cannot continue.
    pub(crate) fn run(&mut self) -> Result<(), SessionError> {
        info!("=> Session");
        loop {
            if self.registry.is_closed(self.registry.serial()) {
                info!("serial channel closed, ending session");
                return Ok(());
            }
            let ready = self.wait_ready()?;
            if ready.is_empty() {
                info!("no open channels left to watch, ending session");
                return Ok(());
            }
            for id in ready {
                self.registry.service(id)?;
            }
        }
    }

    /// Block until at least one open readable channel is ready, and return
    /// the ready channels in registration order. An empty readiness set is
    /// only returned when there is nothing left to poll.
    fn wait_ready(&mut self) -> Result<Vec<ChannelId>, SessionError> {
        let mut fds: Vec<libc::pollfd> = Vec::new();
        let mut ids: Vec<ChannelId> = Vec::new();
        for (index, channel) in self.registry.channels.iter().enumerate() {
            if channel.is_closed() || !channel.is_readable() {
                continue;
            }
            fds.push(libc::pollfd {
                fd: channel.raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            ids.push(ChannelId(index));
        }
        if fds.is_empty() {
            return Ok(Vec::new());
        }

        loop {
            // No timeout: the loop has nothing to do until a channel has
            // data or hangs up.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if rc >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(SessionError::Wait(err));
            }
        }

        Ok(fds
            .iter()
            .zip(ids)
            .filter(|(fd, _)| fd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            .map(|(_, id)| id)
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::unix::io::{AsRawFd, RawFd};

    use crate::settings::TriggerRule;

    use super::super::channel::test_support::pipe_pair;
    use super::*;

    /// A fake serial device made of two pipes: the session reads the board's
    /// output from one and writes its replies into the other.
    struct Loopback {
        from_board: File,
        to_board: File,
    }

    impl AsRawFd for Loopback {
        fn as_raw_fd(&self) -> RawFd {
            self.from_board.as_raw_fd()
        }
    }

    impl Endpoint for Loopback {
        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.from_board.read(buf)
        }

        fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.to_board.write(buf)
        }
    }

    struct Rig {
        session: Session,
        board_feed: File,
        board_capture: File,
        console_feed: File,
        console_capture: File,
    }

    fn rig(rules: &[TriggerRule]) -> Rig {
        let (from_board, board_feed) = pipe_pair();
        let (board_capture, to_board) = pipe_pair();
        let (console_in_read, console_feed) = pipe_pair();
        let (console_capture, console_out_write) = pipe_pair();
        let session = Session::new(
            Box::new(Loopback {
                from_board,
                to_board,
            }),
            Box::new(console_in_read),
            Box::new(console_out_write),
            rules,
        );
        Rig {
            session,
            board_feed,
            board_capture,
            console_feed,
            console_capture,
        }
    }

    fn read_all(mut capture: File) -> Vec<u8> {
        let mut bytes = Vec::new();
        capture.read_to_end(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn session_answers_the_prompt_and_ends_on_disconnect() {
        let rules = vec![TriggerRule::reply("login:", "root\n", 1)];
        let mut r = rig(&rules);

        r.board_feed.write_all(b"Welcome\nlogin:").unwrap();
        r.console_feed.write_all(b"ls\n").unwrap();
        // Both sides hang up once their data is drained.
        drop(r.board_feed);
        drop(r.console_feed);

        r.session.run().unwrap();
        drop(r.session);

        // Board output was mirrored to the operator's console.
        assert_eq!(read_all(r.console_capture), b"Welcome\nlogin:");
        // The board got the scripted reply, then the operator's keystrokes.
        assert_eq!(read_all(r.board_capture), b"root\nls\n");
    }

    #[test]
    fn console_eof_does_not_end_the_session() {
        let rules = vec![TriggerRule::reply("login:", "root\n", 1)];
        let mut r = rig(&rules);

        // The console hangs up before the board says anything.
        drop(r.console_feed);
        r.board_feed.write_all(b"login:").unwrap();
        drop(r.board_feed);

        r.session.run().unwrap();
        drop(r.session);

        assert_eq!(read_all(r.board_capture), b"root\n");
    }

    #[test]
    fn scan_overflow_ends_the_session_with_an_error() {
        let rules = vec![TriggerRule::reply("never", "x", 1)];
        let mut r = rig(&rules);

        // No newline and no match: the scanner cannot trim anything and
        // must give up once its buffer is full.
        r.board_feed.write_all(&vec![b'y'; 8192]).unwrap();

        match r.session.run() {
            Err(SessionError::ScanOverflow { pattern }) => assert_eq!(pattern, "never"),
            other => panic!("expected an overflow, got {:?}", other),
        }
    }

    #[test]
    fn channels_are_serviced_in_registration_order() {
        let mut r = rig(&[]);

        // Data is queued on both the serial and the console channel before
        // the first wait, so one sweep services serial first.
        r.board_feed.write_all(b"from-board").unwrap();
        r.console_feed.write_all(b"from-console").unwrap();
        drop(r.board_feed);
        drop(r.console_feed);

        r.session.run().unwrap();
        drop(r.session);

        assert_eq!(read_all(r.console_capture), b"from-board");
        assert_eq!(read_all(r.board_capture), b"from-console");
    }
}
