pub mod api_key;
pub mod config;

pub use config::RunConfig;
