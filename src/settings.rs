//! Settings for the serial link and the boot automation session.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

pub use serialport::{DataBits, FlowControl, Parity, StopBits};

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings related to the serial port and the boot session, and
/// acts as a [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
/// for these values.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The port name, usually the device path.
    pub path: Option<String>,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Number of bits used to represent a character sent on the line.
    pub data_bits: DataBits,
    /// The type of signalling to use for controlling data transfer.
    pub flow_control: FlowControl,
    /// The type of parity to use for error checking.
    pub parity: Parity,
    /// Number of bits to use to signal the end of a character.
    pub stop_bits: StopBits,

    /// Path to the kernel image to be pushed. Optional, when not set,
    /// `bootmux` will look for `kernel8.img` in the current working directory
    /// and if none was found, it will offer the list of files ending with
    /// `.img` in the current working directory for selection by the user.
    pub kernel_image: Option<String>,

    /// The external program invoked to do the actual image transfer once the
    /// bootloader announces it is ready. It receives the serial byte stream
    /// on its stdin and talks the transfer protocol on its stdout.
    pub transfer_command: String,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}

impl Settings {
    /// Build the trigger table driving a U-Boot session for the given image.
    ///
    /// The table answers the autoboot countdown, starts a `loady` transfer,
    /// hands the upload itself to the configured transfer helper and finally
    /// jumps to the load address once U-Boot reports the received size.
    pub fn boot_rules(&self, image: &str) -> Vec<TriggerRule> {
        vec![
            TriggerRule::reply("Hit any key to stop autoboot:", " ", 1),
            TriggerRule::reply("U-Boot# ", "loady\n", 1),
            TriggerRule::transfer(
                "## Ready for binary (ymodem) download to 0x82000000 at 115200 bps...",
                &self.transfer_command,
                vec!["--ymodem".into(), image.into()],
            ),
            TriggerRule::reply("## Total Size ", "go 0x82000000\n", 1),
        ]
    }
}

/// What to do when a trigger substring shows up in the serial stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TriggerAction {
    /// Send a scripted reply back, at most `occurrences` times.
    Reply { reply: String, occurrences: u32 },
    /// Spawn an external transfer helper wired into the session via pipes.
    Transfer { command: String, args: Vec<String> },
}

/// One entry of the trigger/response table: a substring to watch for in the
/// serial stream and the action taken when it appears.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TriggerRule {
    pub pattern: String,
    pub action: TriggerAction,
}

impl TriggerRule {
    pub fn reply(pattern: &str, reply: &str, occurrences: u32) -> Self {
        TriggerRule {
            pattern: pattern.into(),
            action: TriggerAction::Reply {
                reply: reply.into(),
                occurrences,
            },
        }
    }

    pub fn transfer(pattern: &str, command: &str, args: Vec<String>) -> Self {
        TriggerRule {
            pattern: pattern.into(),
            action: TriggerAction::Transfer {
                command: command.into(),
                args,
            },
        }
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```ignore
/// let settings = SettingsBuilder::new().path("/dev/ttyUSB1").finalize();
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl SettingsBuilder {
    /// Start building the settings using default values and no path for the
    /// port.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                path: None,
                baud_rate: 115_200,
                data_bits: DataBits::Eight,
                flow_control: FlowControl::None,
                parity: Parity::None,
                stop_bits: StopBits::One,
                kernel_image: None,
                transfer_command: "sx".into(),
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn path<'a>(mut self, path: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.path = Some(path.into().as_ref().to_owned());
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the number of bits used to represent a character sent on the line
    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.settings.data_bits = data_bits;
        self
    }

    /// Set the type of signalling to use for controlling data transfer
    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.settings.flow_control = flow_control;
        self
    }

    /// Set the type of parity to use for error checking
    pub fn parity(mut self, parity: Parity) -> Self {
        self.settings.parity = parity;
        self
    }

    /// Set the number of bits to use to signal the end of a character
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.settings.stop_bits = stop_bits;
        self
    }

    /// Set the path to the kernel image to be pushed
    pub fn kernel_image<'a>(mut self, kernel_image: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.kernel_image = Some(kernel_image.into().as_ref().to_owned());
        self
    }

    /// Set the external transfer helper command
    pub fn transfer_command<'a>(mut self, command: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.transfer_command = command.into().as_ref().to_owned();
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        SettingsBuilder::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(
        settings,
        Settings {
            path: None,
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            kernel_image: None,
            transfer_command: "sx".into(),
            _private_use_builder: (),
        }
    )
}

#[test]
fn path() {
    let settings = SettingsBuilder::new().path("/dev/ttyUSB1").finalize();
    assert_eq!(settings.path.unwrap(), "/dev/ttyUSB1");
}

#[test]
fn baud_rate() {
    let baud_rate = 230_400;
    let settings = SettingsBuilder::new().baud_rate(baud_rate).finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn data_bits() {
    let data_bits = DataBits::Seven;
    let settings = SettingsBuilder::new().data_bits(data_bits).finalize();
    assert_eq!(settings.data_bits, data_bits);
}

#[test]
fn flow_control() {
    let flow_control = FlowControl::Hardware;
    let settings = SettingsBuilder::new().flow_control(flow_control).finalize();
    assert_eq!(settings.flow_control, flow_control);
}

#[test]
fn stop_bits() {
    let stop_bits = StopBits::Two;
    let settings = SettingsBuilder::new().stop_bits(stop_bits).finalize();
    assert_eq!(settings.stop_bits, stop_bits);
}

#[test]
fn parity() {
    let parity = Parity::Even;
    let settings = SettingsBuilder::new().parity(parity).finalize();
    assert_eq!(settings.parity, parity);
}

#[test]
fn kernel_image() {
    let settings = SettingsBuilder::new()
        .kernel_image("test_kernel8.img")
        .finalize();
    assert_eq!(settings.kernel_image.unwrap(), "test_kernel8.img");
}

#[test]
fn transfer_command() {
    let settings = SettingsBuilder::new().transfer_command("lsz").finalize();
    assert_eq!(settings.transfer_command, "lsz");
}

#[test]
fn boot_rules_cover_the_full_workflow() {
    let settings = SettingsBuilder::new().finalize();
    let rules = settings.boot_rules("kernel8.img");
    assert_eq!(rules.len(), 4);
    assert_eq!(
        rules[0],
        TriggerRule::reply("Hit any key to stop autoboot:", " ", 1)
    );
    match &rules[2].action {
        TriggerAction::Transfer { command, args } => {
            assert_eq!(command, "sx");
            assert_eq!(args, &["--ymodem".to_string(), "kernel8.img".to_string()]);
        }
        other => panic!("expected a transfer action, got {:?}", other),
    }
}
