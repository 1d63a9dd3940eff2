//! Page-level shared/exclusive locking with upgrade and wait-for deadlock
//! detection.

use crate::error::{Error, Result};
use crate::page::HeapPageId;
use crate::transaction::TransactionId;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};

/// Access mode requested on a page. Read-only maps to a shared lock,
/// read-write to an exclusive lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Perm {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Default)]
struct LockTables {
    /// Transactions holding a shared lock, per page.
    shared: HashMap<HeapPageId, HashSet<TransactionId>>,
    /// The single exclusive holder, per page.
    exclusive: HashMap<HeapPageId, TransactionId>,
    /// Pages locked by each transaction.
    pages_of: HashMap<TransactionId, HashSet<HeapPageId>>,
    /// Outgoing wait-for edges of currently blocked transactions.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

/// The lock manager. Blocked acquirers park on the condition variable and
/// re-check compatibility on every release; there is no FIFO guarantee.
#[derive(Debug, Default)]
pub struct LockManager {
    tables: Mutex<LockTables>,
    cvar: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lock, blocking until it is granted. If waiting would
    /// close a cycle in the wait-for graph, the acquirer is the victim and
    /// the call fails with a transaction abort.
    pub fn acquire(&self, tid: TransactionId, pid: HeapPageId, perm: Perm) -> Result<()> {
        let mut t = self.tables.lock().unwrap();
        loop {
            if Self::compatible(&t, tid, pid, perm) {
                Self::grant(&mut t, tid, pid, perm);
                t.waits_for.remove(&tid);
                return Ok(());
            }

            // Blocked: rebuild this transaction's outgoing edges, then look
            // for a cycle reachable from it.
            let holders = Self::holders(&t, pid, tid);
            t.waits_for.insert(tid, holders);
            if Self::cycle_from(&t, tid) {
                debug!("[lock] deadlock, aborting {tid} waiting on {pid}");
                t.waits_for.remove(&tid);
                self.cvar.notify_all();
                return Err(Error::TransactionAborted);
            }

            t = self.cvar.wait(t).unwrap();
        }
    }

    fn compatible(t: &LockTables, tid: TransactionId, pid: HeapPageId, perm: Perm) -> bool {
        match perm {
            // Shared: allowed unless another transaction holds exclusive.
            // Holding exclusive ourselves satisfies the request implicitly.
            Perm::ReadOnly => match t.exclusive.get(&pid) {
                Some(&holder) => holder == tid,
                None => true,
            },
            Perm::ReadWrite => {
                if t.exclusive.get(&pid) == Some(&tid) {
                    return true;
                }
                if t.exclusive.contains_key(&pid) {
                    return false;
                }
                match t.shared.get(&pid) {
                    // Upgrade is allowed when we are the sole sharer.
                    Some(sharers) if !sharers.is_empty() => {
                        sharers.len() == 1 && sharers.contains(&tid)
                    }
                    _ => true,
                }
            }
        }
    }

    fn grant(t: &mut LockTables, tid: TransactionId, pid: HeapPageId, perm: Perm) {
        match perm {
            Perm::ReadOnly => {
                // An exclusive holder already covers the shared request.
                if t.exclusive.get(&pid) != Some(&tid) {
                    t.shared.entry(pid).or_default().insert(tid);
                }
            }
            Perm::ReadWrite => {
                // The only possible sharer at this point is tid itself.
                t.shared.remove(&pid);
                t.exclusive.insert(pid, tid);
            }
        }
        t.pages_of.entry(tid).or_default().insert(pid);
    }

    /// Every current holder of `pid` other than `tid`.
    fn holders(t: &LockTables, pid: HeapPageId, tid: TransactionId) -> HashSet<TransactionId> {
        let mut out: HashSet<TransactionId> = t
            .shared
            .get(&pid)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        if let Some(&x) = t.exclusive.get(&pid) {
            out.insert(x);
        }
        out.remove(&tid);
        out
    }

    fn cycle_from(t: &LockTables, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        Self::dfs(t, start, &mut visited, &mut path)
    }

    fn dfs(
        t: &LockTables,
        node: TransactionId,
        visited: &mut HashSet<TransactionId>,
        path: &mut HashSet<TransactionId>,
    ) -> bool {
        visited.insert(node);
        path.insert(node);
        if let Some(next) = t.waits_for.get(&node) {
            for &n in next {
                if path.contains(&n) {
                    return true;
                }
                if !visited.contains(&n) && Self::dfs(t, n, visited, path) {
                    return true;
                }
            }
        }
        path.remove(&node);
        false
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: HeapPageId) -> bool {
        let t = self.tables.lock().unwrap();
        t.shared.get(&pid).is_some_and(|s| s.contains(&tid))
            || t.exclusive.get(&pid) == Some(&tid)
    }

    /// Pages currently locked by the transaction.
    pub fn locked_pages(&self, tid: TransactionId) -> HashSet<HeapPageId> {
        self.tables
            .lock()
            .unwrap()
            .pages_of
            .get(&tid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn release(&self, tid: TransactionId, pid: HeapPageId) {
        let mut t = self.tables.lock().unwrap();
        Self::release_one(&mut t, tid, pid);
        self.cvar.notify_all();
    }

    /// Releases every page held by the transaction.
    pub fn release_all(&self, tid: TransactionId) {
        let mut t = self.tables.lock().unwrap();
        if let Some(pages) = t.pages_of.remove(&tid) {
            for pid in pages {
                Self::release_one(&mut t, tid, pid);
            }
        }
        t.waits_for.remove(&tid);
        self.cvar.notify_all();
    }

    fn release_one(t: &mut LockTables, tid: TransactionId, pid: HeapPageId) {
        if let Some(sharers) = t.shared.get_mut(&pid) {
            sharers.remove(&tid);
            if sharers.is_empty() {
                t.shared.remove(&pid);
            }
        }
        if t.exclusive.get(&pid) == Some(&tid) {
            t.exclusive.remove(&pid);
        }
        if let Some(pages) = t.pages_of.get_mut(&tid) {
            pages.remove(&pid);
            if pages.is_empty() {
                t.pages_of.remove(&tid);
            }
        }
        t.waits_for.remove(&tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: usize) -> HeapPageId {
        HeapPageId::new(7, n)
    }

    #[test]
    fn shared_locks_coexist() {
        let lm = LockManager::new();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        lm.acquire(t1, pid(0), Perm::ReadOnly).unwrap();
        lm.acquire(t2, pid(0), Perm::ReadOnly).unwrap();
        assert!(lm.holds_lock(t1, pid(0)));
        assert!(lm.holds_lock(t2, pid(0)));
    }

    #[test]
    fn exclusive_holder_satisfies_own_shared_request() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        lm.acquire(t1, pid(0), Perm::ReadWrite).unwrap();
        lm.acquire(t1, pid(0), Perm::ReadOnly).unwrap();
        assert!(lm.holds_lock(t1, pid(0)));
        // No shared entry appears alongside the exclusive one.
        let t = lm.tables.lock().unwrap();
        assert!(t.shared.get(&pid(0)).is_none());
        assert_eq!(t.exclusive.get(&pid(0)), Some(&t1));
    }

    #[test]
    fn sole_sharer_upgrades_in_place() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        lm.acquire(t1, pid(0), Perm::ReadOnly).unwrap();
        lm.acquire(t1, pid(0), Perm::ReadWrite).unwrap();
        let t = lm.tables.lock().unwrap();
        assert_eq!(t.exclusive.get(&pid(0)), Some(&t1));
        assert!(t.shared.get(&pid(0)).is_none());
    }

    #[test]
    fn release_all_clears_every_table() {
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        lm.acquire(t1, pid(0), Perm::ReadOnly).unwrap();
        lm.acquire(t1, pid(1), Perm::ReadWrite).unwrap();
        assert_eq!(lm.locked_pages(t1).len(), 2);

        lm.release_all(t1);
        assert!(!lm.holds_lock(t1, pid(0)));
        assert!(!lm.holds_lock(t1, pid(1)));
        assert!(lm.locked_pages(t1).is_empty());
    }

    #[test]
    fn immediate_self_deadlock_is_impossible() {
        // A lone transaction can never be its own victim.
        let lm = LockManager::new();
        let t1 = TransactionId::new();
        lm.acquire(t1, pid(0), Perm::ReadOnly).unwrap();
        lm.acquire(t1, pid(0), Perm::ReadWrite).unwrap();
        lm.acquire(t1, pid(0), Perm::ReadOnly).unwrap();
    }
}
