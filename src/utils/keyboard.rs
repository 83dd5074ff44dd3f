//! Non-blocking keyboard polling.

use std::io::stdout;
use std::{process, time::Duration};

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

/// Check for the `ESC` key, blocking for at most half a second.
///
/// The terminal goes into raw mode only for the duration of the poll, so
/// regular console output keeps working between calls.
pub(crate) fn poll_escape() -> Result<bool> {
    enable_raw_mode()?;
    execute!(stdout(), Hide)?;
    let pending = poll(Duration::from_millis(500))?;
    execute!(stdout(), MoveToColumn(0), Show)?;
    disable_raw_mode()?;

    let mut esc_pressed = false;
    if pending {
        // `read()` is guaranteed not to block after `poll` returned true.
        let event = read()?;
        if event == Event::Key(KeyCode::Esc.into()) {
            esc_pressed = true;
        } else if event
            == Event::Key(KeyEvent {
                modifiers: KeyModifiers::CONTROL,
                code: KeyCode::Char('c'),
            })
        {
            // In raw mode Ctrl+C arrives as a key event instead of a
            // signal; honor it here.
            process::exit(0);
        }
    }

    Ok(esc_pressed)
}
