use std::sync::Mutex;
use uuid::Uuid;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::errors::OrderError;

// ============================================================================
// Delivery Partner Dispatch
// ============================================================================
//
// The transition engine asks a dispatcher for a partner exactly once, when
// an order first reaches PartnerAssigned. The roster dispatcher is a stand-in
// for real courier dispatch and can be swapped without touching the engine.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PartnerProfile {
    pub name: String,
    pub phone: String,
    pub vehicle_number: String,
}

impl PartnerProfile {
    pub fn new(
        name: impl Into<String>,
        phone: impl Into<String>,
        vehicle_number: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            vehicle_number: vehicle_number.into(),
        }
    }
}

pub trait PartnerDispatcher: Send + Sync {
    /// Pick the partner who will carry `order_id`.
    fn select(&self, order_id: Uuid) -> PartnerProfile;
}

/// Uniform random choice from a fixed, non-empty roster.
pub struct RosterDispatcher {
    roster: Vec<PartnerProfile>,
    rng: Mutex<StdRng>,
}

impl RosterDispatcher {
    pub fn new(roster: Vec<PartnerProfile>) -> Result<Self, OrderError> {
        Self::with_rng(roster, StdRng::from_entropy())
    }

    /// Deterministic selection sequence, for tests and replays.
    pub fn seeded(roster: Vec<PartnerProfile>, seed: u64) -> Result<Self, OrderError> {
        Self::with_rng(roster, StdRng::seed_from_u64(seed))
    }

    fn with_rng(roster: Vec<PartnerProfile>, rng: StdRng) -> Result<Self, OrderError> {
        if roster.is_empty() {
            return Err(OrderError::EmptyRoster);
        }
        Ok(Self {
            roster,
            rng: Mutex::new(rng),
        })
    }

    pub fn roster(&self) -> &[PartnerProfile] {
        &self.roster
    }

    pub fn default_roster() -> Vec<PartnerProfile> {
        vec![
            PartnerProfile::new("Rajesh Kumar", "+91 98765 43210", "MH 12 AB 1234"),
            PartnerProfile::new("Priya Sharma", "+91 87654 32109", "DL 08 CD 5678"),
            PartnerProfile::new("Amit Singh", "+91 76543 21098", "KA 03 EF 9012"),
            PartnerProfile::new("Sneha Patel", "+91 65432 10987", "GJ 01 GH 3456"),
            PartnerProfile::new("Ravi Verma", "+91 54321 09876", "UP 16 IJ 7890"),
            PartnerProfile::new("Kavya Reddy", "+91 43210 98765", "TN 09 KL 2345"),
            PartnerProfile::new("Suresh Gupta", "+91 32109 87654", "RJ 14 MN 6789"),
            PartnerProfile::new("Pooja Jain", "+91 21098 76543", "WB 06 OP 0123"),
        ]
    }
}

impl PartnerDispatcher for RosterDispatcher {
    fn select(&self, order_id: Uuid) -> PartnerProfile {
        // Poisoning leaves the RNG state intact.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let index = rng.gen_range(0..self.roster.len());
        let partner = self.roster[index].clone();

        tracing::debug!(
            order_id = %order_id,
            partner = %partner.name,
            "Selected delivery partner"
        );

        partner
    }
}
