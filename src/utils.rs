//! Helpers for the interactive outer layer: serial ports, image files and
//! the keyboard.

mod image;
mod keyboard;
mod ports;

pub(crate) use image::resolve_image;
pub(crate) use keyboard::poll_escape;
pub(crate) use ports::{open_and_setup_port, select_port, wait_for_port};
