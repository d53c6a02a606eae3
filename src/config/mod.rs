pub mod env;
mod loader;

pub use env::{AppConfig, DirectoryConfig, ScanConfig, SupabaseConfig, WebhookConfig};
pub use loader::load_config;
