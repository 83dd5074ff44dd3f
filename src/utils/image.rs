//! Locating the image file handed to the transfer helper.

use std::fs;

use console::{style, Term};
use dialoguer::{theme::ColorfulTheme, Select};
use log::{debug, info};

use crate::Settings;

/// Resolve the image to push: the configured path if it exists, otherwise
/// `kernel8.img` in the current working directory, otherwise an interactive
/// pick among the `.img` files found there. Returns `None` when the user
/// gives up.
pub(crate) fn resolve_image(settings: &Settings) -> Option<String> {
    let candidate = settings
        .kernel_image
        .clone()
        .unwrap_or_else(|| "kernel8.img".into());
    if fs::metadata(&candidate).is_ok() {
        return Some(candidate);
    }
    debug!("`{}` not found, offering a selection", candidate);

    loop {
        match select_image_file_interactive() {
            Some(name) => {
                if name.ends_with("cancel and go back...") {
                    return None;
                }
                if fs::metadata(&name).is_ok() {
                    return Some(name);
                }
                println!(
                    "{}",
                    style(format!("[BM] 🙁 could not open `{}`, try again...", name)).yellow()
                );
            }
            None => {
                debug!("no image file was selected, refreshing the list");
            }
        }
    }
}

/// List the files ending with `.img` in the current working directory and
/// ask the user to pick one of them.
fn select_image_file_interactive() -> Option<String> {
    match fs::read_dir(".") {
        Ok(files) => {
            let mut items: Vec<String> = Vec::new();
            files
                .filter_map(Result::ok)
                .filter(|f| f.path().extension().unwrap_or_default() == "img")
                .for_each(|f| {
                    items.push(f.file_name().to_string_lossy().into_owned());
                });

            if items.is_empty() {
                debug!("there are no image files in the current directory");
            }

            items.push("🔙cancel and go back...".into());

            let selection = Select::with_theme(&ColorfulTheme::default())
                .items(&items)
                .with_prompt(format!(
                    "Select an image file to push (`{}` to refresh):",
                    style("Esc").cyan()
                ))
                .default(0)
                .interact_on_opt(&Term::stdout());

            match selection {
                Ok(Some(index)) => Some(items[index].clone()),
                Ok(None) => None,
                Err(ref e) => {
                    info!("error: {}", e.to_string());
                    None
                }
            }
        }
        Err(ref e) => {
            info!("error: {}", e.to_string());
            None
        }
    }
}
