use crate::types::PageId;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityObservation {
    /// The id was empty and has now been set.
    Learned,
    Unchanged,
    /// The observed id differs from the one already set, which points at a
    /// multi-page deployment configured with a single page token.
    Conflict { known: PageId },
}

/// Page id of the bot. Written at most once, from configuration or from the
/// first inbound update.
#[derive(Debug, Default)]
pub struct BotIdentity {
    id: OnceLock<PageId>,
}

impl BotIdentity {
    pub fn preset(id: Option<PageId>) -> Self {
        let identity = Self::default();
        if let Some(id) = id.filter(|id| !id.trim().is_empty()) {
            let _ = identity.id.set(id);
        }
        identity
    }

    pub fn get(&self) -> Option<&PageId> {
        self.id.get()
    }

    pub fn observe(&self, candidate: &str) -> IdentityObservation {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return IdentityObservation::Unchanged;
        }
        let mut learned = false;
        let known = self.id.get_or_init(|| {
            learned = true;
            PageId::new(candidate)
        });
        if learned {
            IdentityObservation::Learned
        } else if known.as_str() == candidate {
            IdentityObservation::Unchanged
        } else {
            IdentityObservation::Conflict {
                known: known.clone(),
            }
        }
    }
}
