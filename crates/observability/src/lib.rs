//! Process-wide tracing setup for the levy binaries.

pub mod tracing;

/// Install the JSON subscriber. Later calls are no-ops.
pub fn init() {
    tracing::init("info");
}
