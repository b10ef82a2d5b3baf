//! Leadership oracle.
//!
//! Consensus and leader election are handled by an external module; the
//! master only ever asks "am I the leader right now?". Growth and the
//! leader-gated RPCs consult this before acting. The answer can flip at
//! any moment: state mutated by work that was already in flight when
//! leadership was lost is discarded with the rest of the in-memory
//! topology on demotion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait Leadership: Send + Sync + 'static {
    fn is_leader(&self) -> bool;
}

/// Single-node deployments: always the leader.
pub struct AlwaysLeader;

impl Leadership for AlwaysLeader {
    fn is_leader(&self) -> bool {
        true
    }
}

/// Leadership flag shared with the election module (and with tests,
/// which flip it to simulate demotion).
#[derive(Clone, Default)]
pub struct SharedLeadership {
    leading: Arc<AtomicBool>,
}

impl SharedLeadership {
    pub fn new(leading: bool) -> Self {
        Self {
            leading: Arc::new(AtomicBool::new(leading)),
        }
    }

    pub fn set_leader(&self, leading: bool) {
        self.leading.store(leading, Ordering::SeqCst);
    }
}

impl Leadership for SharedLeadership {
    fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }
}
