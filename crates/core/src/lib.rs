//! `levy-core`: domain building blocks shared by every billing crate.
//!
//! Pure primitives only: identifiers, the domain error model and the
//! aggregate contract. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, OwnerId, PaymentId, PropertyId};
pub use value_object::ValueObject;
