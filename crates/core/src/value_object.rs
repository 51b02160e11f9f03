//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. To
/// "modify" one, build a new value. OCR numbers and fee definitions are the
/// typical examples in billing; invoices and payments are entities.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
