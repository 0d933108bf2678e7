//! JSON-lines protocol: one `Request` per stdin line, one response object
//! per stdout line.

mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
