use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{CadError, CadResult};
use crate::models::DesignId;

/// Single-writer registry keyed by design id.
///
/// A flow that changes a design holds its guard for the whole flow; a second
/// writer is turned away with `DesignBusy` instead of queueing.
#[derive(Clone, Default)]
pub struct DesignLocks {
    held: Arc<Mutex<HashSet<DesignId>>>,
}

pub struct DesignGuard {
    held: Arc<Mutex<HashSet<DesignId>>>,
    id: DesignId,
}

impl DesignLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, id: &DesignId) -> CadResult<DesignGuard> {
        let mut held = self.held.lock().expect("design lock registry poisoned");
        if !held.insert(id.clone()) {
            return Err(CadError::DesignBusy(id.clone()));
        }
        Ok(DesignGuard {
            held: Arc::clone(&self.held),
            id: id.clone(),
        })
    }

    pub fn is_held(&self, id: &DesignId) -> bool {
        self.held
            .lock()
            .expect("design lock registry poisoned")
            .contains(id)
    }
}

impl Drop for DesignGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_writer_is_busy() {
        let locks = DesignLocks::new();
        let id: DesignId = "abc123".parse().unwrap();
        let guard = locks.acquire(&id).unwrap();
        assert!(matches!(locks.acquire(&id), Err(CadError::DesignBusy(_))));
        drop(guard);
        assert!(!locks.is_held(&id));
        assert!(locks.acquire(&id).is_ok());
    }

    #[test]
    fn test_distinct_designs_do_not_contend() {
        let locks = DesignLocks::new();
        let a: DesignId = "aaaa".parse().unwrap();
        let b: DesignId = "bbbb".parse().unwrap();
        let _a = locks.acquire(&a).unwrap();
        assert!(locks.acquire(&b).is_ok());
    }
}
