//! States for the device manager state machine.
//!
//! This module is private and restricted to the
//! [`boot_server`](crate::boot_server) scope. The public interface of the
//! state machine is provided by [`boot_server`](crate::boot_server).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use std::io;

use console::style;
use log::{error, info};

use crate::session::Session;
use crate::settings::Settings;
use crate::utils;

use super::events::*;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into
/// it.
pub(crate) trait Runnable {
    /// During this call, the state does whatever work it stands for and,
    /// when finished, requests the transition to a new state by returning
    /// the appropriate `event`. The `event` is then consumed to create the
    /// new `state` through the corresponding `From` implementation; only
    /// transitions with such an implementation exist, anything else is a
    /// compile-time error.
    fn run(&mut self, settings: &Settings) -> Event;
}

// Init State ==================================================================

/// The initial state of the device manager.
///
/// From here the machine evolves via:
///
///  * **`WaitForPortEvent` => `WaitForPortState`** when a device path was
///    provided in the settings,
///  * **`SelectPortEvent` => `SelectPortState`** when no device path was
///    provided.
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Init");
        match settings.path {
            Some(_) => Event::WaitForPort(WaitForPortEvent {
                settings: settings.clone(),
            }),
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            }),
        }
    }
}

// WaitForPortState ============================================================

/// Holds on until the configured device node shows up on the system. The
/// user can cancel the wait with `ESC` to pick a port interactively instead.
#[derive(Debug)]
pub(crate) struct WaitForPortState {}
impl Runnable for WaitForPortState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> WaitForPort");
        let path = settings.path.as_ref().unwrap();
        if utils::wait_for_port(path) {
            // Cancelled by the user; fall back to interactive selection.
            Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            })
        } else {
            Event::PortReady(PortReadyEvent {
                settings: settings.clone(),
            })
        }
    }
}

// SelectPortState =============================================================

/// Offers the list of detected serial ports for interactive selection.
/// Cancelling the selection loops back here with a refreshed list, which is
/// how one waits for a device that is plugged in late.
#[derive(Debug)]
pub(crate) struct SelectPortState {}
impl Runnable for SelectPortState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> SelectPort");
        match utils::select_port() {
            Some(path) => {
                let mut selected_settings = settings.clone();
                selected_settings.path = Some(path);
                Event::PortReady(PortReadyEvent {
                    settings: selected_settings,
                })
            }
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
            }),
        }
    }
}

// ServiceState ================================================================

/// Runs one boot automation session over the ready port.
///
/// The state resolves the image to push, opens and configures the port,
/// builds the trigger table and hands everything to the session event loop.
/// A session that ends because the serial side went away fires `PortError`
/// so the machine goes back to waiting for the device; an unrecoverable
/// session error terminates the run.
#[derive(Debug)]
pub(crate) struct ServiceState {}
impl Runnable for ServiceState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Service");

        let image = match utils::resolve_image(settings) {
            Some(image) => image,
            None => {
                println!(
                    "{}",
                    style("[BM] 🙁 no image to push, nothing to do").yellow()
                );
                return Event::Done(DoneEvent {
                    settings: settings.clone(),
                    with_errors: true,
                });
            }
        };

        let port = match utils::open_and_setup_port(settings) {
            Ok(port) => port,
            // Not fatal for `bootmux`: go back to waiting for the device to
            // be ready, or for the user to select another one.
            Err(_) => {
                return Event::PortError(PortErrorEvent {
                    settings: settings.clone(),
                })
            }
        };

        println!(
            "[BM] 🚀 watching the console, pushing {} when asked",
            style(&image).green()
        );

        let rules = settings.boot_rules(&image);
        let mut session = Session::new(
            Box::new(port),
            Box::new(io::stdin()),
            Box::new(io::stdout()),
            &rules,
        );
        match session.run() {
            Ok(()) => {
                println!("[BM] 🔌 serial connection lost, waiting for the device...");
                Event::PortError(PortErrorEvent {
                    settings: settings.clone(),
                })
            }
            Err(e) => {
                error!("session failed: {}", e);
                println!("{}", style("[BM] 💥 Unrecoverable session error!").red());
                Event::Done(DoneEvent {
                    settings: settings.clone(),
                    with_errors: true,
                })
            }
        }
    }
}

// Done State ==================================================================

/// Reached when the run completes, normally or abnormally. The first pass
/// through `run` reports and fires `Exit`; the exit event flips
/// `should_exit` so the event loop terminates with a status code.
#[derive(Debug, Copy, Clone)]
pub(crate) struct DoneState {
    pub with_error: bool,
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!(
            "=> Done with{}errors",
            if self.with_error { " " } else { " no " }
        );
        Event::Exit(ExitEvent {
            settings: settings.clone(),
            with_error: self.with_error,
        })
    }
}
