//! ANSI color helpers for the progress line.

use console::style;

pub fn red(text: &str) -> String {
    style(text).red().force_styling(true).to_string()
}

pub fn green(text: &str) -> String {
    style(text).green().force_styling(true).to_string()
}

pub fn yellow(text: &str) -> String {
    style(text).yellow().force_styling(true).to_string()
}
