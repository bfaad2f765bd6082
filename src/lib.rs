//! Client core for the road infrastructure monitoring dashboard.
//!
//! Two cooperating subsystems:
//! - the session/authorization manager ([`session`], [`api`]): token
//!   lifecycle, role/permission gating, and the transparent
//!   refresh-on-401 interceptor with single-flight de-duplication;
//! - the realtime subscription channel ([`realtime`]): one logical broker
//!   connection with topic subscribe/unsubscribe and bounded reconnect.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod realtime;
pub mod session;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use realtime::RealtimeChannel;
pub use session::SessionManager;
