//! Bootmux command line interface.

use std::process;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
};
use console::style;
use log::{debug, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use bootmux::{self as bm, DeviceManager};

fn main() {
    println!("[BM] bootmux v{}", crate_version!());

    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        process::exit(0);
    })
    .expect("Failed to install the Ctrl-C handler!");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Bootmux drives the bootloader on the other side of a serial \
            line through its interactive bring-up. It starts as a simple \
            terminal: input from stdin is passed to the board, and data \
            from the board is printed to stdout.\n\
            \n\
            At the same time it watches the serial stream for the \
            bootloader's prompts and answers them on its own: \n\
               \t* stop the autoboot countdown \n\
               \t* request a `loady` transfer \n\
               \t* run the external transfer helper to push the image \n\
               \t* jump to the load address once the size is confirmed \n\
            \n\
            After the transfer it goes back to being a terminal.\n\
            \n\
            Bootmux can be started before or after the board is powered. \
            It also properly manages unplugging and re-plugging of the USB \
            cable.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; may change when the board \
                     is unplugged and re-plugged and may differ between \
                     systems. You can opt for selecting a new device while \
                     `bootmux` is running.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .long_help("serial baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("TRANSFER_CMD")
                .help("external helper program doing the image transfer")
                .long_help(
                    "external helper program doing the image transfer; it \
                     is started when the bootloader announces it is ready, \
                     with its stdin and stdout spliced into the serial \
                     session.",
                )
                .short("-x")
                .long("--transfer-cmd")
                .takes_value(true)
                .default_value("sx")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("KERNEL_IMAGE")
                .help("path to the image to be pushed")
                .long_help(
                    "path to the image to be pushed; when not set, \
                     `bootmux` will look for `kernel8.img` in the current \
                     working directory.",
                )
                .index(1),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose"
    // flag (i.e. 'bootmux -v -v -v' or 'bootmux -vvv' vs 'bootmux -v')
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value will either be what the user input at
    // runtime or the default value

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style("baud-rate").cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of("BAUD_RATE").unwrap()).on_red()
        );
        process::exit(-1);
    });

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    // END - Arguments with default values =====================================

    let mut settings = bm::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .transfer_command(matches.value_of("TRANSFER_CMD").unwrap())
        .finalize();

    // START - Arguments with NO default values ================================

    if matches.is_present("DEVICE_TTY") {
        settings.path = Some(matches.value_of("DEVICE_TTY").unwrap().into());
    }

    if matches.is_present("KERNEL_IMAGE") {
        settings.kernel_image = Some(matches.value_of("KERNEL_IMAGE").unwrap().into());
    }

    // END - Arguments =========================================================

    // Run the device manager ==================================================

    let mut dm = DeviceManager::new(settings);
    let exit_code = dm.run();
    debug!("exit code: {}", exit_code);
    std::process::exit(exit_code.into());
}
