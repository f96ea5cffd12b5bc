// Background Job Dispatcher - Core
//
// This crate runs the background work behind the API: transactional mail and
// image optimization, persisted as jobs and executed by a polling worker with
// per-type concurrency limits and retries.
//
// Job payloads and handlers are organized per-domain in domains/*/.

pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
