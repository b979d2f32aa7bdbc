//! Console narration for workflow progress.
//!
//! Colored text here is narration only; the success/failure signal of every task is its
//! returned `Result`. Color support and `NO_COLOR` are handled by the `console` crate's
//! terminal detection.

use console::style;

/// Announces a workflow step, e.g. "Preparing package...".
pub fn step(message: impl AsRef<str>) {
    println!("{}", style(message.as_ref()).green().bold());
}

/// Announces a transfer or other noteworthy detail.
pub fn notice(message: impl AsRef<str>) {
    println!("{}", style(message.as_ref()).yellow());
}

/// Announces a destructive step.
pub fn danger(message: impl AsRef<str>) {
    println!("{}", style(message.as_ref()).red().bold());
}

/// Reports a fatal error on stderr.
pub fn error(message: impl AsRef<str>) {
    eprintln!("{}", style(message.as_ref()).red().bold());
}
