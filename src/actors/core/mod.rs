// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Generic health types shared by the actors and the components they watch.
//
// ============================================================================

pub mod health;

// Re-export core types
pub use health::*;
