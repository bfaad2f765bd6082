pub mod client;
pub mod refresh;

pub use client::ApiClient;
pub use refresh::{RefreshCoordinator, RefreshError};
