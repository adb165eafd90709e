// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Pure order-fulfillment rules. Scheduling, storage and actors live outside
// this layer and only call into it.
//
// ============================================================================

pub mod order;
