use std::collections::{HashMap, HashSet};

use crate::common::TransactionID;

/// Directed "waits-for" relation between transactions. An edge `a -> b`
/// means `a` is blocked behind a lock `b` holds.
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    edges: HashMap<TransactionID, HashSet<TransactionID>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, txn: TransactionID) {
        self.edges.entry(txn).or_default();
    }

    pub fn add_edge(&mut self, waiter: TransactionID, holder: TransactionID) {
        self.add_vertex(waiter);
        if waiter == holder {
            return;
        }
        self.add_vertex(holder);
        if let Some(targets) = self.edges.get_mut(&waiter) {
            targets.insert(holder);
        }
    }

    pub fn remove_edge(&mut self, waiter: TransactionID, holder: TransactionID) {
        if let Some(targets) = self.edges.get_mut(&waiter) {
            targets.remove(&holder);
        }
    }

    /// Drops `txn` and every edge touching it.
    pub fn remove_vertex(&mut self, txn: TransactionID) {
        self.edges.remove(&txn);
        for targets in self.edges.values_mut() {
            targets.remove(&txn);
        }
    }

    /// Drops the edges leaving `txn`; edges pointing at it stay.
    pub fn clear_waits(&mut self, txn: TransactionID) {
        if let Some(targets) = self.edges.get_mut(&txn) {
            targets.clear();
        }
    }

    pub fn contains_vertex(&self, txn: TransactionID) -> bool {
        self.edges.contains_key(&txn)
    }

    pub fn has_edge(&self, waiter: TransactionID, holder: TransactionID) -> bool {
        self.edges
            .get(&waiter)
            .map_or(false, |targets| targets.contains(&holder))
    }

    pub fn waits_on(&self, txn: TransactionID) -> Vec<TransactionID> {
        self.edges
            .get(&txn)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn vertex_count(&self) -> usize {
        self.edges.len()
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Depth-first search from every vertex. Returns the path of the first
    /// cycle found, starting and ending at the same transaction.
    pub fn find_cycle(&self) -> Option<Vec<TransactionID>> {
        let mut finished = HashSet::new();
        let mut path = Vec::new();
        let mut on_path = HashSet::new();

        for &start in self.edges.keys() {
            if finished.contains(&start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut finished, &mut path, &mut on_path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit(
        &self,
        txn: TransactionID,
        finished: &mut HashSet<TransactionID>,
        path: &mut Vec<TransactionID>,
        on_path: &mut HashSet<TransactionID>,
    ) -> Option<Vec<TransactionID>> {
        path.push(txn);
        on_path.insert(txn);

        if let Some(targets) = self.edges.get(&txn) {
            for &next in targets {
                if on_path.contains(&next) {
                    // Back edge: the cycle is the path suffix starting at `next`.
                    let start = path.iter().position(|&t| t == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                if finished.contains(&next) {
                    continue;
                }
                if let Some(cycle) = self.visit(next, finished, path, on_path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_path.remove(&txn);
        finished.insert(txn);
        None
    }
}
