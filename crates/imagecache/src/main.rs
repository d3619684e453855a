//! Imagecache.
//!
//! Imagecache is a web service that serves images from local directories and remote HTTP
//! origins. Local images are kept in a cache as resized copies, remote images are cached
//! verbatim after their first download.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
