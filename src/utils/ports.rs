//! Serial port discovery, selection and setup.

use std::time::Duration;

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serialport::{available_ports, SerialPort, SerialPortType, TTYPort};

use crate::utils::poll_escape;
use crate::Settings;

//==============================================================================
// Crate-Public Interface
//==============================================================================

/// Present the list of connected serial devices and let the user pick one.
///
/// While no device is detected, the function spins until at least one shows
/// up. Cancelling the selection (with `ESC`) returns `None`, which callers
/// use to refresh the list — that is how one waits for a device that gets
/// plugged in late, without restarting `bootmux`.
pub(crate) fn select_port() -> Option<String> {
    let pb = spinner();

    // Avoid cursor flicker while the spinner is live.
    Term::stdout().hide_cursor().unwrap();
    let mut waited: usize = 0;
    let found_ports = loop {
        let found_ports = enumerate_usb_serial_ports();
        if !found_ports.is_empty() {
            pb.finish_with_message("Select a port to be used:");
            break found_ports;
        }
        pb.set_message(format!(
            "[{:03}s] ⌛ Waiting for a USB serial controller to be connected...",
            style(waited).dim(),
        ));
        waited += 1;
        std::thread::sleep(Duration::from_secs(1));
    };
    Term::stdout().show_cursor().unwrap();

    let selection = select_port_interactive(&found_ports);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing...");
        }
    }
    selection
}

/// Wait for the device with the given path to show up on the system,
/// checking every couple of seconds. Returns `true` when the user cancelled
/// the wait by hitting `ESC`.
pub(crate) fn wait_for_port(path: &str) -> bool {
    let pb = spinner();

    let mut waited: usize = 0;
    loop {
        let found_ports = enumerate_usb_serial_ports();
        if check_requested_port(&found_ports, path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            return false;
        }

        pb.set_message(format!(
            "[{:03}s {}] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            found_ports.len(),
            style(path).cyan()
        ));

        // Four polls of half a second each give the device two seconds
        // between enumerations while staying responsive to the keyboard.
        for _ in 0..4 {
            if let Ok(true) = poll_escape() {
                pb.finish_with_message(format!(
                    "❌ Waiting on port {} canceled after {} seconds",
                    style(path).cyan(),
                    style(waited).dim()
                ));
                return true;
            }
        }
        waited += 2;
    }
}

/// Open the configured port and apply the line settings, retrying for a few
/// seconds since the device node may need a moment after being plugged.
///
/// Returns the native port type so its descriptor can be handed to the
/// session's readiness wait.
pub(crate) fn open_and_setup_port(settings: &Settings) -> Result<TTYPort, serialport::Error> {
    use retry::{delay, retry_with_index};

    let path = settings.path.clone().unwrap();
    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |attempt| -> Result<TTYPort, serialport::Error> {
            debug!("opening {} (attempt {})", &path, attempt);
            serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                // Reads go through the readiness wait and return available
                // data; the timeout only bounds writes against a stuck line.
                .timeout(Duration::from_millis(500))
                .open_native()
        },
    );

    match result {
        Ok(mut port) => {
            // Re-apply the line settings; opening alone does not configure
            // the port on all platforms.
            port.set_baud_rate(settings.baud_rate)?;
            port.set_data_bits(settings.data_bits)?;
            port.set_stop_bits(settings.stop_bits)?;
            port.set_parity(settings.parity)?;
            port.set_flow_control(settings.flow_control)?;

            info!(
                "Connected to {} at {} baud",
                port.name().unwrap_or_else(|| path.clone()),
                settings.baud_rate
            );
            debug!("data_bits    : {:#?}", port.data_bits()?);
            debug!("stop_bits    : {:#?}", port.stop_bits()?);
            debug!("parity       : {:#?}", port.parity()?);
            debug!("flow control : {:#?}", port.flow_control()?);
            Ok(port)
        }
        Err(err) => match err {
            retry::Error::Operation {
                error,
                total_delay,
                tries,
            } => {
                info!(
                    "Failed to open the port after {:?} and {} tries: {}",
                    total_delay, tries, error,
                );
                Err(error)
            }
            retry::Error::Internal(_) => {
                info!("Internal retry error while opening port");
                Err(serialport::Error::new(
                    serialport::ErrorKind::Unknown,
                    "internal error while retrying to open the port",
                ))
            }
        },
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[BM] {spinner:.blue} {msg}"),
    );
    pb
}

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|detected| detected.starts_with(path))
}

/// Enumerates serial devices on the system. USB ports come with controller
/// details; other types (e.g. virtual ports used for testing) are listed by
/// name only.
fn enumerate_usb_serial_ports() -> Vec<String> {
    let mut usb_ports = vec![];
    match available_ports() {
        Ok(ports) => {
            for p in ports {
                match p.port_type {
                    SerialPortType::UsbPort(port_info) => {
                        usb_ports.push(format!(
                            "{}: ({} / {})",
                            p.port_name,
                            port_info.manufacturer.as_ref().map_or("", String::as_str),
                            port_info.product.as_ref().map_or("", String::as_str)
                        ));
                    }
                    _ => {
                        usb_ports.push(p.port_name);
                    }
                }
            }
        }
        Err(ref e) => {
            info!("error: {}", e.to_string());
        }
    }
    usb_ports
}

fn select_port_interactive(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    let selection = select.default(0).interact_on_opt(&term).unwrap();
    selection.map(|index| String::from(ports.get(index).unwrap().split(':').next().unwrap()))
}
