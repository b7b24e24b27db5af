//! Waits-for graph between transactions.
//!
//! The graph is never maintained incrementally: the transaction manager rebuilds it from the
//! live lock tables whenever a request is denied, then searches it for a cycle through the
//! newly blocked transaction.

use std::collections::{BTreeMap, BTreeSet};

use repcrec_common::TxnId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the edge `waiter -> holder`. Self edges are ignored.
    pub fn add_wait(&mut self, waiter: TxnId, holder: TxnId) {
        if waiter != holder {
            self.edges.entry(waiter).or_default().insert(holder);
        }
    }

    pub fn waits_for(&self, txn: TxnId) -> impl Iterator<Item = TxnId> + '_ {
        self.edges.get(&txn).into_iter().flatten().copied()
    }

    /// Depth-first search from `start`. Returns the transactions of the first cycle reached, in
    /// edge order, starting from the node where the search closed the loop.
    pub fn find_cycle_from(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();
        self.dfs(start, &mut visited, &mut stack)
    }

    /// A cycle anywhere in the graph, if there is one.
    pub fn find_any_cycle(&self) -> Option<Vec<TxnId>> {
        let mut visited = BTreeSet::new();
        for &node in self.edges.keys() {
            if visited.contains(&node) {
                continue;
            }
            let mut stack = Vec::new();
            if let Some(cycle) = self.dfs(node, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        stack: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        if let Some(pos) = stack.iter().position(|&n| n == node) {
            return Some(stack[pos..].to_vec());
        }
        if !visited.insert(node) {
            return None;
        }
        stack.push(node);
        for next in self.waits_for(node) {
            if let Some(cycle) = self.dfs(next, visited, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        None
    }
}
