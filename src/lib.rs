pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use server::{build_router, AppState};
