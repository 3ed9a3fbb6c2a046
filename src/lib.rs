pub mod audio;
pub mod backend;
pub mod capture;
pub mod config;
pub mod engine;
pub mod history;
mod logging;
pub mod speech;
pub mod stt;
mod telemetry;
pub mod tts;

pub use logging::{init_logging, log_debug, log_debug_content, log_file_path, log_panic};
pub use telemetry::init_tracing;
