//! The serial console multiplexing engine.
//!
//! A boot session is a small set of byte [channels](channel) — the serial
//! device, the operator's console, and the pipes of a spawned transfer helper
//! — serviced by a single-threaded, level-triggered event loop. Each channel
//! carries an ordered chain of [processors](processor) that react to every
//! chunk read from it: copying it elsewhere, answering a recognized
//! bootloader prompt, or starting the external transfer helper.
//!
//! The engine is purely reactive. Processors never read on their own; the
//! [event loop](event_loop) blocks until one of the open readable channels
//! has data, reads one chunk, and pushes it through the owning channel's
//! chain in attachment order.

mod channel;
mod error;
mod event_loop;
mod processor;

pub(crate) use event_loop::Session;
