//! Serial port device selection and state management.
//!
//! `bootmux` operates over a serial port which can be specified on the
//! command line or selected out of the ports detected on the system. Serial
//! devices are transient — they appear when a USB controller is plugged and
//! vanish when it is removed, possibly coming back under another name — so
//! the tool needs to keep working across disconnections without being
//! restarted. That lifecycle is managed here as a state machine; the actual
//! console automation runs inside the `Service` state.
//!
//! ```text
//!                            START
//!                              |
//!                              v
//!                          .-------.
//!                          | Init  |
//!                          '-------'
//!                              |
//!                              v
//!                    no  .----------.  yes
//!                  .----( port_name? )----.
//!      .-----.     |     '----------'     |
//!      |     |     v                      v
//!      |    .------------.         .-------------.
//!      '--->| SelectPort |<-----.--| WaitForPort |<---.
//!           '------------'      |  '-------------'    |
//!              |              port                    |
//!              |              ready                   |
//!              |                v                     |
//!             port     ******************             |
//!             ready    *    Service     *     port    |
//!              |       ******************     error   |
//!              '------>*  Mux Session   *-------------'
//!                      ******************
//!                               |
//!                               v
//!                              END
//! ```
//!
//! Transitions are driven by typed events: a state's `run` method returns an
//! `Event`, and the next state is created `From` that event. Only
//! transitions with a `From` implementation exist, so an illegal transition
//! is a compile-time error rather than a runtime surprise.

use super::events::*;
use super::states::*;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// The device manager: wraps the state machine and its event loop behind a
/// simple owner-driven interface.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().finalize();
/// let mut dm = DeviceManager::new(settings);
/// let status = dm.run();
/// ```
pub struct DeviceManager {
    states: DeviceManagerStates,
}

impl DeviceManager {
    pub fn new(settings: Settings) -> Self {
        DeviceManager {
            // The machine naturally starts in the `Init` state.
            states: DeviceManagerStates::Init(DeviceSM::new(settings)),
        }
    }

    /// The device manager event loop runs until the `Done` state is reached
    /// with its `should_exit` flag set. At that point the loop terminates
    /// and returns **`0`** for a clean run, non-zero otherwise. The returned
    /// value can be used as the exit code of `bootmux`.
    pub fn run(&mut self) -> i8 {
        loop {
            self.states = self.states.step();
            if let DeviceManagerStates::Done(sm) = &self.states {
                if sm.state.should_exit {
                    return if sm.state.with_error { 1 } else { 0 };
                }
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw state machine implementing the device lifecycle.
///
/// A generic type holds the current state. That keeps room for data shared
/// by all states (the settings) next to the per-state data, and makes
/// debugging nicer since the machine always shows which state it is holding.
#[derive(Debug)]
struct DeviceSM<S: Runnable> {
    settings: Settings,
    state: S,
}
impl<S: Runnable> DeviceSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.settings)
    }
}

/// The device manager starts in the `InitState`.
impl DeviceSM<InitState> {
    fn new(settings: Settings) -> Self {
        DeviceSM {
            settings,
            state: InitState {},
        }
    }
}

/// An enum wrapper around the states of the machine, used for pattern
/// matching during state transitions.
enum DeviceManagerStates {
    Init(DeviceSM<InitState>),
    WaitForPort(DeviceSM<WaitForPortState>),
    SelectPort(DeviceSM<SelectPortState>),
    Service(DeviceSM<ServiceState>),
    Done(DeviceSM<DoneState>),
}
impl DeviceManagerStates {
    /// The unit of work of the event loop: run the current state and consume
    /// the event it returns into the next state.
    fn step(&mut self) -> Self {
        match self {
            DeviceManagerStates::Init(sm) => {
                let event = sm.run();
                match event {
                    Event::WaitForPort(ev) => DeviceManagerStates::WaitForPort(ev.into()),
                    Event::SelectPort(ev) => DeviceManagerStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            DeviceManagerStates::WaitForPort(sm) => {
                let event = sm.run();
                match event {
                    Event::PortReady(ev) => DeviceManagerStates::Service(ev.into()),
                    Event::SelectPort(ev) => DeviceManagerStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            DeviceManagerStates::SelectPort(sm) => {
                let event = sm.run();
                match event {
                    Event::SelectPort(ev) => DeviceManagerStates::SelectPort(ev.into()),
                    Event::PortReady(ev) => DeviceManagerStates::Service(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            DeviceManagerStates::Service(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => DeviceManagerStates::Done(ev.into()),
                    Event::PortError(ev) => DeviceManagerStates::WaitForPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            DeviceManagerStates::Done(sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => DeviceManagerStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<WaitForPortEvent> for DeviceSM<WaitForPortState> {
    fn from(event: WaitForPortEvent) -> DeviceSM<WaitForPortState> {
        DeviceSM {
            settings: event.settings,
            state: WaitForPortState {},
        }
    }
}
impl From<PortErrorEvent> for DeviceSM<WaitForPortState> {
    fn from(event: PortErrorEvent) -> DeviceSM<WaitForPortState> {
        DeviceSM {
            settings: event.settings,
            state: WaitForPortState {},
        }
    }
}

impl From<SelectPortEvent> for DeviceSM<SelectPortState> {
    fn from(event: SelectPortEvent) -> DeviceSM<SelectPortState> {
        DeviceSM {
            settings: event.settings,
            state: SelectPortState {},
        }
    }
}

impl From<PortReadyEvent> for DeviceSM<ServiceState> {
    fn from(event: PortReadyEvent) -> DeviceSM<ServiceState> {
        DeviceSM {
            settings: event.settings,
            state: ServiceState {},
        }
    }
}

impl From<DoneEvent> for DeviceSM<DoneState> {
    fn from(event: DoneEvent) -> DeviceSM<DoneState> {
        DeviceSM {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_errors,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for DeviceSM<DoneState> {
    fn from(event: ExitEvent) -> DeviceSM<DoneState> {
        DeviceSM {
            settings: event.settings,
            state: DoneState {
                with_error: event.with_error,
                should_exit: true,
            },
        }
    }
}
