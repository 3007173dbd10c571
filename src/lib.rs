pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;

pub use config::OutputConfig;
pub use error::UploadError;
pub use models::TaskReport;
pub use services::session::{SessionStatus, UploadSession};
