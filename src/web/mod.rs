pub mod converter;
pub mod responses;
pub mod router;
pub mod session;
pub mod state;
pub mod storage;
pub mod templates;
pub mod uploads;

pub use responses::{ApiError, json_error};
pub use state::AppState;
