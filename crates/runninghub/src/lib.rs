//! RunningHub REST client and webhook payload types.
//!
//! Provides the [`TaskService`](service::TaskService) contract the
//! pipeline dispatches through, its HTTP implementation
//! [`RunningHubApi`](api::RunningHubApi), workflow node-parameter
//! builders, and typed parsing of inbound completion callbacks.

pub mod api;
pub mod config;
pub mod messages;
pub mod service;
pub mod workflow;

pub use api::{RunningHubApi, RunningHubError};
pub use config::RunningHubConfig;
pub use messages::{parse_callback, parse_callback_str, CallbackEvent};
pub use service::TaskService;
pub use workflow::{NodeInfo, Workflows};
