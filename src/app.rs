mod handlers;
mod state;

pub use handlers::router;
pub use state::{AppConfig, AppState};
