//! pullcache.
//!
//! pullcache is a standalone web service that serves remote binary resources,
//! such as images, through a local pull-through cache: the first request for a
//! URL streams the resource from its origin onto disk, subsequent requests are
//! served from the local copy until it ages out.

#![warn(missing_docs, missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
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
