//! UUID utilities and the injectable identity provider

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Mints identities for new aggregates and events
pub trait IdentityProvider: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Random UUIDv4 identities
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdentityProvider for RandomIds {
    fn next_id(&self) -> Uuid {
        generate()
    }
}

/// Predictable identities (`00000000-...-0001`, `...-0002`, ...)
///
/// Never repeats within one instance.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityProvider for SequentialIds {
    fn next_id(&self) -> Uuid {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u128(n as u128)
    }
}

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}
