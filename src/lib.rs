//! A client-side configuration provider.
//!
//! Loads a remote, hierarchically-keyed configuration store into an
//! in-memory mapping, keeps it fresh against an HTTP-shaped store, resolves
//! secret references through an injected vault client, and surfaces
//! feature-flag definitions enriched with experimentation telemetry.
//!
//! The crate only ever emits [`tracing`] spans and events; it never installs
//! a global subscriber. A typical application wires one up once at startup:
//!
//! ```no_run
//! tracing_subscriber::fmt()
//!     .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
//!     .init();
//! ```
//!
//! Start with [`provider::Provider::load`].

pub mod adapters;
pub mod backoff;
pub mod client;
pub mod content_type;
pub mod engine;
pub mod error;
pub mod failover;
pub mod feature_flags;
pub mod mapping;
pub mod options;
pub mod projection;
pub mod provider;
pub mod secret_client;
pub mod secrets;
pub mod selector;
pub mod setting;
pub mod store;
pub mod timer;
pub mod watcher;

pub use error::{Error, Result};
pub use provider::Provider;
