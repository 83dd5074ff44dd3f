//! Processors: stateful handlers attached to a channel's chain.
//!
//! Every chunk read from a channel is handed to each of its processors in
//! attachment order. A processor only ever reacts — it may write to other
//! channels, register new ones, or update its own state, but it never reads
//! or blocks. Three kinds exist:
//!
//! * [`CopyProcessor`] forwards chunks verbatim to a target channel,
//! * [`ReplyProcessor`] watches for a trigger substring and answers it with a
//!   scripted reply a configured number of times,
//! * [`PipeProcessor`] watches for a trigger substring and, on match, spawns
//!   the external transfer helper and splices its pipes into the session.

use std::io;
use std::process::{Child, Command, Stdio};

use log::{error, info};
use memchr::{memmem, memrchr};

use super::channel::{Channel, ChannelId, Direction};
use super::error::SessionError;
use super::event_loop::ChannelRegistry;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Contract shared by all processors: react to one freshly read chunk.
///
/// The registry is exposed so a processor can write to its target channel or
/// wire up new channels; the only error a processor may surface is one that
/// must end the whole session.
pub(crate) trait Processor {
    fn on_data(&mut self, ctx: &mut ChannelRegistry, chunk: &[u8]) -> Result<(), SessionError>;
}

// Scan buffer ================================================================

/// Bounded accumulation buffer searching for a trigger substring across
/// chunk boundaries.
///
/// Chunks are appended and the whole buffer is searched, so a trigger split
/// over any number of reads is still found. When no match is possible yet,
/// complete lines are discarded — a trigger never spans a newline, so only
/// the trailing partial line can hold the start of a future match. If the
/// buffer would exceed its capacity the stream has diverged from the
/// expected workflow and the scan fails with an overflow.
pub(crate) struct ScanBuffer {
    pattern: Vec<u8>,
    buf: Vec<u8>,
}

impl ScanBuffer {
    /// Usable capacity of the accumulation buffer.
    pub(crate) const CAPACITY: usize = 4095;

    pub(crate) fn new(pattern: &str) -> Self {
        ScanBuffer {
            pattern: pattern.as_bytes().to_vec(),
            buf: Vec::new(),
        }
    }

    pub(crate) fn pattern(&self) -> String {
        String::from_utf8_lossy(&self.pattern).into_owned()
    }

    /// Append a chunk and search. Returns `Ok(true)` on a match, with the
    /// buffer cleared so the same bytes can never match twice.
    pub(crate) fn scan(&mut self, chunk: &[u8]) -> Result<bool, SessionError> {
        if self.buf.len() + chunk.len() > Self::CAPACITY {
            return Err(SessionError::ScanOverflow {
                pattern: self.pattern(),
            });
        }
        self.buf.extend_from_slice(chunk);

        if memmem::find(&self.buf, &self.pattern).is_some() {
            self.buf.clear();
            return Ok(true);
        }

        if let Some(newline) = memrchr(b'\n', &self.buf) {
            self.buf.drain(..=newline);
        }
        Ok(false)
    }

    pub(crate) fn reset(&mut self) {
        self.buf.clear();
    }

    #[cfg(test)]
    fn pending(&self) -> &[u8] {
        &self.buf
    }
}

// Copy processor =============================================================

/// Stateless forwarding of every chunk to a target channel.
///
/// No buffering, no search. A closed target swallows the chunk silently and
/// a failing write closes the target; neither is an error for the session.
pub(crate) struct CopyProcessor {
    target: ChannelId,
}

impl CopyProcessor {
    pub(crate) fn new(target: ChannelId) -> Self {
        CopyProcessor { target }
    }
}

impl Processor for CopyProcessor {
    fn on_data(&mut self, ctx: &mut ChannelRegistry, chunk: &[u8]) -> Result<(), SessionError> {
        ctx.write_to(self.target, chunk);
        Ok(())
    }
}

// Reply processor ============================================================

/// Answers a recognized prompt with a scripted reply.
///
/// The processor stays armed for a configured number of occurrences; each
/// match sends the reply to the target channel and clears the scan buffer.
/// Once the count reaches zero the processor is permanently inert.
pub(crate) struct ReplyProcessor {
    scan: ScanBuffer,
    target: ChannelId,
    reply: Vec<u8>,
    remaining: u32,
}

impl ReplyProcessor {
    pub(crate) fn new(target: ChannelId, pattern: &str, reply: &str, occurrences: u32) -> Self {
        ReplyProcessor {
            scan: ScanBuffer::new(pattern),
            target,
            reply: reply.as_bytes().to_vec(),
            remaining: occurrences,
        }
    }
}

impl Processor for ReplyProcessor {
    fn on_data(&mut self, ctx: &mut ChannelRegistry, chunk: &[u8]) -> Result<(), SessionError> {
        if self.remaining == 0 {
            // Disarmed for good; not even accumulating anymore.
            return Ok(());
        }
        if self.scan.scan(chunk)? {
            info!("matched `{}`, sending scripted reply", self.scan.pattern());
            ctx.write_to(self.target, &self.reply);
            self.remaining -= 1;
        }
        Ok(())
    }
}

// Pipe processor =============================================================

/// Hands the session over to an external transfer helper when the bootloader
/// announces it is ready.
///
/// While waiting it scans exactly like a [`ReplyProcessor`]; a match spawns
/// the configured command with piped stdin/stdout, registers the parent-side
/// pipe ends as two fresh channels and wires copy processors so that helper
/// output reaches both the board and the operator's terminal, while board
/// output reaches the helper. While the helper runs, each invocation polls
/// it non-blockingly; once reaped, the processor re-arms so a later trigger
/// can start a new transfer.
pub(crate) struct PipeProcessor {
    scan: ScanBuffer,
    target: ChannelId,
    command: String,
    args: Vec<String>,
    state: PipeState,
}

enum PipeState {
    WaitingForTrigger,
    Running(Helper),
}

/// A spawned transfer helper and the channels splicing it into the session.
struct Helper {
    child: Child,
    to_child: ChannelId,
}

impl PipeProcessor {
    pub(crate) fn new(target: ChannelId, pattern: &str, command: &str, args: Vec<String>) -> Self {
        PipeProcessor {
            scan: ScanBuffer::new(pattern),
            target,
            command: command.into(),
            args,
            state: PipeState::WaitingForTrigger,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        matches!(self.state, PipeState::Running(_))
    }

    fn spawn_helper(&self, ctx: &mut ChannelRegistry) -> io::Result<Helper> {
        // stderr is inherited so the helper's own diagnostics reach the
        // operator directly.
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "helper stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "helper stdout was not piped"))?;

        let to_child = ctx.add_channel(Channel::new("helper-in", Box::new(stdin), Direction::Out));
        let from_child =
            ctx.add_channel(Channel::new("helper-out", Box::new(stdout), Direction::In));

        // Helper output goes to the board and to the operator's terminal;
        // whatever the board sends while the helper runs goes to its stdin.
        ctx.attach(from_child, Box::new(CopyProcessor::new(self.target)));
        ctx.attach(from_child, Box::new(CopyProcessor::new(ctx.console_out())));
        ctx.attach(self.target, Box::new(CopyProcessor::new(to_child)));

        Ok(Helper { child, to_child })
    }
}

impl Processor for PipeProcessor {
    fn on_data(&mut self, ctx: &mut ChannelRegistry, chunk: &[u8]) -> Result<(), SessionError> {
        match &mut self.state {
            PipeState::WaitingForTrigger => {
                if self.scan.scan(chunk)? {
                    info!("matched `{}`, starting `{}`", self.scan.pattern(), self.command);
                    match self.spawn_helper(ctx) {
                        Ok(helper) => self.state = PipeState::Running(helper),
                        // Not fatal: keep waiting, a later trigger retries.
                        Err(e) => error!("could not start `{}`: {}", self.command, e),
                    }
                }
            }
            PipeState::Running(helper) => match helper.child.try_wait() {
                Ok(Some(status)) => {
                    info!("transfer helper exited: {}", status);
                    // The write path to the helper is dead; close it now. The
                    // read path is left to drain any remaining helper output
                    // and closes itself on end of input.
                    ctx.close_channel(helper.to_child);
                    self.scan.reset();
                    self.state = PipeState::WaitingForTrigger;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("failed to poll transfer helper: {}", e);
                    ctx.close_channel(helper.to_child);
                    self.scan.reset();
                    self.state = PipeState::WaitingForTrigger;
                }
            },
        }
        Ok(())
    }
}

impl Drop for PipeProcessor {
    fn drop(&mut self) {
        // Best effort: do not leave a transfer helper behind when the
        // session winds down.
        if let PipeState::Running(helper) = &mut self.state {
            let _ = helper.child.kill();
            let _ = helper.child.wait();
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::super::channel::test_support::pipe_pair;
    use super::*;

    /// A registry over anonymous pipes, with the read ends kept around so a
    /// test can assert what was written to the serial and console channels.
    fn test_registry() -> (ChannelRegistry, File, File) {
        let (serial_capture, serial_write) = pipe_pair();
        let (console_in_read, _console_in_write) = pipe_pair();
        let (console_capture, console_write) = pipe_pair();
        let registry = ChannelRegistry::new(
            Box::new(serial_write),
            Box::new(console_in_read),
            Box::new(console_write),
        );
        (registry, serial_capture, console_capture)
    }

    fn read_all(mut capture: File) -> Vec<u8> {
        let mut bytes = Vec::new();
        capture.read_to_end(&mut bytes).unwrap();
        bytes
    }

    // Scan buffer ------------------------------------------------------------

    #[test]
    fn trigger_straddling_three_chunks_matches_once() {
        let mut scan = ScanBuffer::new("cdefg");
        assert!(!scan.scan(b"abc").unwrap());
        assert!(!scan.scan(b"def").unwrap());
        assert!(scan.scan(b"ghi").unwrap());
        // The buffer was cleared on match, so the same bytes cannot match
        // again.
        assert!(!scan.scan(b"hi").unwrap());
    }

    #[test]
    fn trimming_keeps_the_partial_trailing_line() {
        let mut scan = ScanBuffer::new("login:");
        assert!(!scan.scan(b"Welcome to the board\nlog").unwrap());
        // The complete line is gone but the partial tail survives, so the
        // trigger can still complete on the next read.
        assert_eq!(scan.pending(), b"log");
        assert!(scan.scan(b"in:").unwrap());
    }

    #[test]
    fn trimming_discards_all_complete_lines() {
        let mut scan = ScanBuffer::new("never");
        assert!(!scan.scan(b"one\ntwo\nthree\n").unwrap());
        assert_eq!(scan.pending(), b"");
    }

    #[test]
    fn overflow_without_a_match_fails_the_scan() {
        let mut scan = ScanBuffer::new("never");
        // No newline and no match: nothing can be trimmed.
        let filler = vec![b'x'; 4000];
        assert!(!scan.scan(&filler).unwrap());
        match scan.scan(&filler) {
            Err(SessionError::ScanOverflow { pattern }) => assert_eq!(pattern, "never"),
            other => panic!("expected an overflow, got {:?}", other.map(|_| ())),
        }
    }

    // Copy processor -----------------------------------------------------------

    #[test]
    fn copy_forwards_verbatim() {
        let (mut registry, serial_capture, _console) = test_registry();
        let serial = registry.serial();
        let mut copy = CopyProcessor::new(serial);

        copy.on_data(&mut registry, b"first ").unwrap();
        copy.on_data(&mut registry, b"\x00\xffsecond").unwrap();
        drop(registry);

        assert_eq!(read_all(serial_capture), b"first \x00\xffsecond");
    }

    #[test]
    fn copy_to_closed_target_is_silent() {
        let (mut registry, serial_capture, _console) = test_registry();
        let serial = registry.serial();
        registry.close_channel(serial);

        let mut copy = CopyProcessor::new(serial);
        copy.on_data(&mut registry, b"dropped").unwrap();
        drop(registry);

        assert_eq!(read_all(serial_capture), b"");
    }

    // Reply processor ----------------------------------------------------------

    #[test]
    fn login_prompt_gets_exactly_one_reply() {
        let (mut registry, serial_capture, _console) = test_registry();
        let serial = registry.serial();
        let mut reply = ReplyProcessor::new(serial, "login:", "root\n", 1);

        reply.on_data(&mut registry, b"Welcome\nlogin:").unwrap();
        // Buffer is reset on match.
        assert_eq!(reply.scan.pending(), b"");
        // A second prompt finds the processor disarmed.
        reply.on_data(&mut registry, b"login:").unwrap();
        drop(registry);

        assert_eq!(read_all(serial_capture), b"root\n");
    }

    #[test]
    fn reply_fires_once_per_configured_occurrence() {
        let (mut registry, serial_capture, _console) = test_registry();
        let serial = registry.serial();
        let mut reply = ReplyProcessor::new(serial, "U-Boot# ", "loady\n", 2);

        for _ in 0..4 {
            reply.on_data(&mut registry, b"U-Boot# \n").unwrap();
        }
        drop(registry);

        assert_eq!(read_all(serial_capture), b"loady\nloady\n");
    }

    #[test]
    fn reply_overflow_surfaces_as_a_session_error() {
        let (mut registry, _serial, _console) = test_registry();
        let serial = registry.serial();
        let mut reply = ReplyProcessor::new(serial, "never", "x", 1);

        let filler = vec![b'x'; ScanBuffer::CAPACITY + 1];
        match reply.on_data(&mut registry, &filler) {
            Err(SessionError::ScanOverflow { .. }) => {}
            other => panic!("expected an overflow, got {:?}", other.map(|_| ())),
        }
    }

    // Pipe processor -----------------------------------------------------------

    fn reap(pipe: &mut PipeProcessor, registry: &mut ChannelRegistry) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipe.is_running() {
            assert!(Instant::now() < deadline, "helper was never reaped");
            thread::sleep(Duration::from_millis(20));
            pipe.on_data(registry, b"").unwrap();
        }
    }

    #[test]
    fn trigger_spawns_helper_and_reap_re_arms() {
        let (mut registry, _serial, _console) = test_registry();
        let serial = registry.serial();
        let mut pipe = PipeProcessor::new(serial, "READY", "echo", vec![]);
        assert_eq!(registry.channel_count(), 3);

        // Trigger split across two reads, as it would come off the wire.
        pipe.on_data(&mut registry, b"REA").unwrap();
        assert!(!pipe.is_running());
        pipe.on_data(&mut registry, b"DY").unwrap();
        assert!(pipe.is_running());
        // Two fresh channels: helper stdin and helper stdout.
        assert_eq!(registry.channel_count(), 5);

        reap(&mut pipe, &mut registry);

        // Re-armed: the next occurrence starts a new helper on new channels.
        pipe.on_data(&mut registry, b"READY").unwrap();
        assert!(pipe.is_running());
        assert_eq!(registry.channel_count(), 7);
        reap(&mut pipe, &mut registry);
    }

    #[test]
    fn spawn_failure_keeps_waiting_for_the_trigger() {
        let (mut registry, _serial, _console) = test_registry();
        let serial = registry.serial();
        let mut pipe = PipeProcessor::new(
            serial,
            "READY",
            "/definitely/not/a/real/helper",
            vec![],
        );

        pipe.on_data(&mut registry, b"READY").unwrap();
        assert!(!pipe.is_running());
        assert_eq!(registry.channel_count(), 3);

        // Still armed: the next trigger tries again.
        pipe.on_data(&mut registry, b"READY").unwrap();
        assert!(!pipe.is_running());
    }
}
