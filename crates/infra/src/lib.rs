//! Infrastructure for the billing core: event store, command dispatch,
//! projections, the association directory, external collaborators and the
//! application services built on top of them.

pub mod collaborators;
pub mod command_dispatcher;
pub mod config;
pub mod directory;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod services;

pub use config::{BillingConfig, ConfigError};
pub use services::{BillingServices, ServiceError};
