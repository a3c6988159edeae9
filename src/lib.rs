pub mod config;
pub mod core;
pub mod services;
pub mod session;

pub use config::StudioConfig;
pub use session::Session;
