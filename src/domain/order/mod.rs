// ============================================================================
// Order Domain - fulfillment progression for a purchased order
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderStatus, StatusEntry, DeliveryPartner, ...)
// - Errors (OrderError enum)
// - Aggregate (the Order record and its invariants)
// - Dispatch (delivery partner selection)
// - Transition (the stage-by-stage state machine)
//
// Nothing in here performs I/O.
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod aggregate;
pub mod dispatch;
pub mod transition;

// Re-export for convenience
pub use value_objects::*;
pub use errors::*;
pub use aggregate::*;
pub use dispatch::*;
pub use transition::*;
