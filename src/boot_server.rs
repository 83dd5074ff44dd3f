//! Serial device lifecycle management for `bootmux`.
//!
//! **Example** - Running the device manager event loop:
//! ```no_run
//! use bootmux as bm;
//!
//! let settings = bm::SettingsBuilder::default().finalize();
//! let mut dm = bm::DeviceManager::new(settings);
//! let status = dm.run(); // status code returned after the `Exit` event
//! std::process::exit(status.into());
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::DeviceManager;
