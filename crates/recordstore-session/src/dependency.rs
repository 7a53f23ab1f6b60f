//! Commit ordering for a transaction's records.
//!
//! A record that references another uncommitted record of the *same*
//! transaction must not be created before it: the referenced record's id is
//! needed first. This module keeps those constraints as an explicit graph
//! (record → set of records blocking it) and partitions a commit's records
//! into the ones that can be submitted now and the ones that must wait.
//!
//! References to records owned by a different transaction, or to records
//! already saved, never become edges.

use recordstore_core::ClientId;
use std::collections::{BTreeMap, BTreeSet};

/// Same-transaction dependency graph.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Record -> records it waits for.
    blockers: BTreeMap<ClientId, BTreeSet<ClientId>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `dependent` must wait for `blocker`.
    pub fn add_dependency(&mut self, dependent: ClientId, blocker: ClientId) {
        self.blockers.entry(dependent).or_default().insert(blocker);
    }

    /// Replace every blocker of `dependent`.
    pub fn set_blockers(&mut self, dependent: ClientId, blockers: BTreeSet<ClientId>) {
        if blockers.is_empty() {
            self.blockers.remove(&dependent);
        } else {
            self.blockers.insert(dependent, blockers);
        }
    }

    /// Drop a record from the graph, both as a dependent and as a blocker.
    ///
    /// Called once a record is saved or leaves the transaction; whatever
    /// waited only on it becomes unblocked.
    pub fn remove_record(&mut self, record: ClientId) {
        self.blockers.remove(&record);
        self.blockers.retain(|_, set| {
            set.remove(&record);
            !set.is_empty()
        });
    }

    /// Records `record` is waiting for.
    pub fn blockers_of(&self, record: ClientId) -> impl Iterator<Item = ClientId> + '_ {
        self.blockers
            .get(&record)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Whether `record` waits for anything.
    pub fn is_blocked(&self, record: ClientId) -> bool {
        self.blockers.contains_key(&record)
    }

    /// Records waiting directly on `record`, in creation order.
    pub fn dependents_of(&self, record: ClientId) -> Vec<ClientId> {
        self.blockers
            .iter()
            .filter(|(_, set)| set.contains(&record))
            .map(|(dependent, _)| *dependent)
            .collect()
    }

    /// Records waiting on `record` directly or through other records.
    pub fn transitive_dependents(&self, record: ClientId) -> Vec<ClientId> {
        let mut seen = BTreeSet::new();
        let mut work = vec![record];
        while let Some(current) = work.pop() {
            for dependent in self.dependents_of(current) {
                if dependent != record && seen.insert(dependent) {
                    work.push(dependent);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Partition `candidates` into ready and blocked records.
    ///
    /// Ready records keep creation order (the order of `ClientId`), which is
    /// the tie-break for records with no constraint between them.
    pub fn plan(&self, candidates: impl IntoIterator<Item = ClientId>) -> CommitPlan {
        let ordered: BTreeSet<ClientId> = candidates.into_iter().collect();
        let mut plan = CommitPlan::default();
        for record in ordered {
            let blockers: Vec<ClientId> = self.blockers_of(record).collect();
            if blockers.is_empty() {
                plan.ready.push(record);
            } else {
                plan.blocked.push((record, blockers));
            }
        }
        plan
    }

    /// Find a dependency cycle among `nodes`, if one exists.
    ///
    /// Edges leaving `nodes` are ignored. The returned path starts and ends
    /// with the same record.
    pub fn find_cycle(&self, nodes: &BTreeSet<ClientId>) -> Option<Vec<ClientId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            nodes: &BTreeSet<ClientId>,
            node: ClientId,
            marks: &mut BTreeMap<ClientId, Mark>,
            path: &mut Vec<ClientId>,
        ) -> Option<Vec<ClientId>> {
            match marks.get(&node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == node).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(node);
                    return Some(cycle);
                }
                None => {}
            }

            marks.insert(node, Mark::Visiting);
            path.push(node);
            for next in graph.blockers_of(node).filter(|n| nodes.contains(n)) {
                if let Some(cycle) = visit(graph, nodes, next, marks, path) {
                    return Some(cycle);
                }
            }
            path.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for node in nodes {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, nodes, *node, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Number of blocked records.
    pub fn len(&self) -> usize {
        self.blockers.len()
    }

    /// Whether no record is blocked.
    pub fn is_empty(&self) -> bool {
        self.blockers.is_empty()
    }
}

/// Result of partitioning a commit's records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitPlan {
    /// Records that can be submitted now, in submission order.
    pub ready: Vec<ClientId>,
    /// Records that must wait, each with its blockers.
    pub blocked: Vec<(ClientId, Vec<ClientId>)>,
}

impl CommitPlan {
    /// Check if the plan has any records.
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.blocked.is_empty()
    }

    /// Total number of records in the plan.
    pub fn len(&self) -> usize {
        self.ready.len() + self.blocked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> ClientId {
        ClientId::new(n)
    }

    #[test]
    fn test_plan_parent_before_child() {
        let mut graph = DependencyGraph::new();
        // child (0) was created before its parent (1)
        graph.add_dependency(id(0), id(1));

        let plan = graph.plan([id(0), id(1)]);
        assert_eq!(plan.ready, vec![id(1)]);
        assert_eq!(plan.blocked, vec![(id(0), vec![id(1)])]);
    }

    #[test]
    fn test_plan_ties_break_by_creation_order() {
        let graph = DependencyGraph::new();
        let plan = graph.plan([id(3), id(1), id(2)]);
        assert_eq!(plan.ready, vec![id(1), id(2), id(3)]);
        assert!(plan.blocked.is_empty());
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_remove_record_unblocks_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id(1), id(0));
        graph.add_dependency(id(2), id(0));
        graph.add_dependency(id(2), id(1));

        graph.remove_record(id(0));
        assert!(!graph.is_blocked(id(1)));
        assert_eq!(graph.blockers_of(id(2)).collect::<Vec<_>>(), vec![id(1)]);

        graph.remove_record(id(1));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_set_blockers_replaces() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id(1), id(0));
        graph.set_blockers(id(1), BTreeSet::from([id(2)]));
        assert_eq!(graph.blockers_of(id(1)).collect::<Vec<_>>(), vec![id(2)]);

        graph.set_blockers(id(1), BTreeSet::new());
        assert!(!graph.is_blocked(id(1)));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id(1), id(0));
        graph.add_dependency(id(2), id(1));
        graph.add_dependency(id(3), id(9));

        assert_eq!(graph.dependents_of(id(0)), vec![id(1)]);
        assert_eq!(graph.transitive_dependents(id(0)), vec![id(1), id(2)]);
    }

    #[test]
    fn test_find_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id(0), id(1));
        graph.add_dependency(id(1), id(0));

        let nodes = BTreeSet::from([id(0), id(1)]);
        let cycle = graph.find_cycle(&nodes).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
    }

    #[test]
    fn test_find_cycle_ignores_outside_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id(0), id(1));
        graph.add_dependency(id(1), id(0));

        // Only one side of the loop is considered
        assert!(graph.find_cycle(&BTreeSet::from([id(0)])).is_none());
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(id(2), id(1));
        graph.add_dependency(id(1), id(0));
        let nodes = BTreeSet::from([id(0), id(1), id(2)]);
        assert!(graph.find_cycle(&nodes).is_none());
    }
}
