mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::HandlerErr;
pub use handlers::core::select_workspace;
pub use handlers::sessions::resolve_session;
pub use router::handle_request;
pub use types::{AppState, Request};
