//! isrcache.
//!
//! isrcache is a standalone web service that serves rendered pages and page data from memory.
//! Expired artifacts are served while they are regenerated in the background, and every page is
//! regenerated by at most one task at a time.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

#[cfg(test)]
mod e2e;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
