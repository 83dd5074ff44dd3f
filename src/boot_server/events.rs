//! Events for the device manager state machine.
//!
//! This module is private and restricted to the
//! [`boot_server`](crate::boot_server) scope. The public interface of the
//! state machine is provided by [`boot_server`](crate::boot_server).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an
//! overview of states, events and transitions.

use crate::settings::Settings;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// WaitForPortEvent ============================================================

/// Fired to trigger a transition to the `WaitForPort` state, either because
/// a device path was given up front (we hold on until the device node shows
/// up) or because the running session lost the port (the device was removed
/// and we wait for it to come back).
#[derive(Debug)]
pub(crate) struct WaitForPortEvent {
    pub settings: Settings,
}

// SelectPortEvent =============================================================

/// Fired to trigger the transition to the `SelectPort` state: no device path
/// was configured, or the user cancelled a wait with `ESC` and wants to pick
/// a port out of the detected ones, or the selection itself was cancelled to
/// refresh the list.
#[derive(Debug)]
pub(crate) struct SelectPortEvent {
    pub settings: Settings,
}

// PortReadyEvent ==============================================================

/// Fired when a serial port with a valid device path is available on the
/// system, either because the port we were waiting on came up or because one
/// was selected interactively. Triggers the transition to the `Service`
/// state.
#[derive(Debug)]
pub(crate) struct PortReadyEvent {
    pub settings: Settings,
}

// PortErrorEvent ==============================================================

/// Fired when the port cannot be opened or the session loses it (usually the
/// device was unplugged). Can only be fired from the `Service` state and
/// triggers a transition back into the `WaitForPort` state.
#[derive(Debug)]
pub(crate) struct PortErrorEvent {
    pub settings: Settings,
}

// DoneEvent ===================================================================

/// Fired when the program is about to terminate, normally or because the
/// session hit an unrecoverable error. Triggers a transition to the `Done`
/// state.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub settings: Settings,
    pub with_errors: bool,
}

// ExitEvent ===================================================================

/// The last event of a run. It flips the `Done` state into its exiting
/// phase, which makes the event loop return an exit status to the caller
/// that started it (usable as the process exit code).
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub settings: Settings,
    pub with_error: bool,
}

// Events enum =================================================================

/// Events that can be triggered within the device manager state machine.
///
/// Each value carries the event data passed by the origin state for use by
/// the target state.
#[derive(Debug)]
pub(crate) enum Event {
    WaitForPort(WaitForPortEvent),
    SelectPort(SelectPortEvent),
    PortReady(PortReadyEvent),
    PortError(PortErrorEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
