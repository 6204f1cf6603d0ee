//! Gateway server, router, and the personalization wrapper

pub mod personalization;
pub mod router;
pub mod server;

pub use personalization::{ContentSource, Personalizer, StaticContentSource, resolve_persona};
pub use router::{AppState, create_router};
pub use server::Gateway;
