//! Client registry, client instances, and user/worker records (spec.md §3,
//! §4.2).

pub mod client;
pub mod manager;
pub mod user;

pub use client::{Client, ClientTransport, RecordingTransport};
pub use manager::ClientRegistry;
pub use user::{AuthBackoff, User, Worker};
