#![doc = "The `taskmesh` library crate."]
#![doc = ""]
#![doc = "Three cooperating services built from one crate: an identity service that"]
#![doc = "issues credentials, a gateway that verifies them and forwards the caller's"]
#![doc = "identity, and a tasks service that publishes every mutation to real-time"]
#![doc = "subscribers. The binary (`main.rs`) picks the role from the environment."]

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod store;

pub use crate::config::{Config, ServiceRole};
pub use crate::error::{AppError, AuthError, BusError};
