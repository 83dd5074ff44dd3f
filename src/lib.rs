//! Bootmux automates the interactive bring-up of an embedded bootloader
//! over a serial link. It behaves like a plain pass-through terminal —
//! whatever arrives from the board is printed, whatever the operator types
//! goes to the board — while watching the serial stream for the bootloader's
//! prompts. Recognized prompts are answered with scripted replies (stop the
//! autoboot countdown, start a `loady` transfer, jump to the load address),
//! and when the bootloader announces it is ready for the download, `bootmux`
//! spawns an external transfer helper (`sx --ymodem <image>` by default) and
//! splices its stdin/stdout into the console session through a pair of
//! pipes.
//!
//! Two cooperating layers make this work:
//!
//! * The [session engine](session): a single-threaded, level-triggered event
//!   loop multiplexing a registry of byte **channels** (serial device,
//!   console streams, helper pipes). Each channel carries an ordered chain
//!   of **processors** that react to every chunk read from it — copying it
//!   to another channel, scanning for a trigger substring across chunk
//!   boundaries, or managing the transfer helper's lifecycle. Channels are
//!   level-triggered and fail soft: an I/O error closes the channel and the
//!   session carries on without it.
//!
//! * The device manager: a state machine handling the transient nature of
//!   serial devices — waiting for a configured device node, interactive
//!   port selection, and re-entering the wait when the device is unplugged
//!   mid-session. Its states and transitions are typed: a state's run
//!   returns an event, and the next state is created `From` that event, so
//!   only explicitly defined transitions compile.
//!
//! The trigger/response table itself is plain data ([`TriggerRule`]), built
//! by default for the U-Boot workflow but configurable by library users.

mod boot_server;
mod session;
mod settings;
mod utils;

pub use boot_server::DeviceManager;
pub use settings::{Settings, SettingsBuilder, TriggerAction, TriggerRule};
