use std::collections::{BTreeMap, HashMap};

use crate::scheduler::exclusive::ScopeKey;

/// Flat queue of collection indices waiting to be dispatched.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    items: Vec<usize>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue holding every index of a collection of `len` items, in order.
    pub fn with_range(len: usize) -> Self {
        Self {
            items: (0..len).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.items.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.items.iter().copied()
    }

    /// Remove and return up to `limit` indices matching `predicate`, scanning
    /// front to back. The remainder keeps its relative order.
    pub fn take_matching<F>(&mut self, mut predicate: F, limit: usize) -> Vec<usize>
    where
        F: FnMut(usize) -> bool,
    {
        let mut taken = Vec::new();
        let mut write = 0;
        let mut read = 0;
        while read < self.items.len() && taken.len() < limit {
            let index = self.items[read];
            if predicate(index) {
                taken.push(index);
            } else {
                self.items[write] = index;
                write += 1;
            }
            read += 1;
        }
        self.items.drain(write..read);
        taken
    }

    /// Remove a single index. Absent indices are ignored.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.items.iter().position(|&i| i == index) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Append indices to the back, skipping any already queued.
    pub fn requeue<I: IntoIterator<Item = usize>>(&mut self, indices: I) {
        for index in indices {
            if !self.contains(index) {
                self.items.push(index);
            }
        }
    }
}

/// Indices of one scope still waiting, in collection order.
pub type WorkUnit = Vec<usize>;

/// Pending work grouped by scope, iterated in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct ScopeMap {
    order: BTreeMap<u64, ScopeKey>,
    units: HashMap<ScopeKey, (u64, WorkUnit)>,
    next_seq: u64,
}

impl ScopeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an index to its scope, creating the scope at the back if needed.
    pub fn push(&mut self, scope: ScopeKey, index: usize) {
        if let Some((_, unit)) = self.units.get_mut(&scope) {
            if !unit.contains(&index) {
                unit.push(index);
            }
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, scope.clone());
        self.units.insert(scope, (seq, vec![index]));
    }

    /// Number of scopes.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Total number of pending indices across all scopes.
    pub fn item_count(&self) -> usize {
        self.units.values().map(|(_, unit)| unit.len()).sum()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.units.values().any(|(_, unit)| unit.contains(&index))
    }

    pub fn get(&self, scope: &ScopeKey) -> Option<&WorkUnit> {
        self.units.get(scope).map(|(_, unit)| unit)
    }

    /// Scopes in iteration order.
    pub fn iter(&self) -> impl Iterator<Item = (&ScopeKey, &WorkUnit)> {
        self.order.values().filter_map(move |scope| {
            self.units.get(scope).map(|(_, unit)| (scope, unit))
        })
    }

    /// Remove a scope and return everything left in it.
    pub fn pop_scope(&mut self, scope: &ScopeKey) -> Option<WorkUnit> {
        let (seq, unit) = self.units.remove(scope)?;
        self.order.remove(&seq);
        Some(unit)
    }

    /// Remove the first scope whose key satisfies `predicate`.
    pub fn pop_first_where<F>(&mut self, predicate: F) -> Option<(ScopeKey, WorkUnit)>
    where
        F: Fn(&ScopeKey) -> bool,
    {
        let scope = self.order.values().find(|scope| predicate(scope))?.clone();
        let unit = self.pop_scope(&scope)?;
        Some((scope, unit))
    }

    /// First scope, by iteration order, with a member matching `predicate`.
    pub fn scope_containing_any<F>(&self, mut predicate: F) -> Option<(&ScopeKey, &WorkUnit)>
    where
        F: FnMut(usize) -> bool,
    {
        self.iter()
            .find(|(_, unit)| unit.iter().any(|&index| predicate(index)))
    }

    /// Remove one index from a scope, dropping the scope once empty.
    /// Absent scopes or indices are ignored.
    pub fn remove(&mut self, scope: &ScopeKey, index: usize) -> bool {
        let Some((_, unit)) = self.units.get_mut(scope) else {
            return false;
        };
        let Some(pos) = unit.iter().position(|&i| i == index) else {
            return false;
        };
        unit.remove(pos);
        if unit.is_empty() {
            self.pop_scope(scope);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str) -> ScopeKey {
        ScopeKey::Group(name.to_string())
    }

    #[test]
    fn take_matching_is_stable() {
        let mut queue = PendingQueue::with_range(8);
        let taken = queue.take_matching(|i| i % 2 == 1, 2);
        assert_eq!(taken, vec![1, 3]);
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec![0, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn take_matching_zero_limit_is_noop() {
        let mut queue = PendingQueue::with_range(3);
        assert!(queue.take_matching(|_| true, 0).is_empty());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn take_matching_stops_at_end() {
        let mut queue = PendingQueue::with_range(3);
        assert_eq!(queue.take_matching(|_| true, 10), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut queue = PendingQueue::with_range(3);
        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn requeue_appends_without_duplicates() {
        let mut queue = PendingQueue::with_range(2);
        queue.requeue([7, 1, 9]);
        assert_eq!(queue.iter().collect::<Vec<_>>(), vec![0, 1, 7, 9]);
    }

    #[test]
    fn scope_map_keeps_first_seen_order() {
        let mut map = ScopeMap::new();
        map.push(group("b.py"), 0);
        map.push(group("a.py"), 1);
        map.push(group("b.py"), 2);
        let order: Vec<_> = map.iter().map(|(k, u)| (k.to_string(), u.clone())).collect();
        assert_eq!(
            order,
            vec![("b.py".to_string(), vec![0, 2]), ("a.py".to_string(), vec![1])]
        );
        assert_eq!(map.item_count(), 3);
    }

    #[test]
    fn scope_containing_any_uses_iteration_order() {
        let mut map = ScopeMap::new();
        map.push(group("a.py"), 0);
        map.push(ScopeKey::Exclusive("x".to_string()), 1);
        map.push(ScopeKey::Exclusive("y".to_string()), 2);
        let (scope, unit) = map.scope_containing_any(|i| i >= 1).unwrap();
        assert_eq!(scope, &ScopeKey::Exclusive("x".to_string()));
        assert_eq!(unit, &vec![1]);
    }

    #[test]
    fn pop_scope_and_recreate_at_back() {
        let mut map = ScopeMap::new();
        map.push(group("a.py"), 0);
        map.push(group("b.py"), 1);
        assert_eq!(map.pop_scope(&group("a.py")), Some(vec![0]));
        assert_eq!(map.pop_scope(&group("a.py")), None);
        map.push(group("a.py"), 0);
        let order: Vec<_> = map.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(order, vec!["b.py", "a.py"]);
    }

    #[test]
    fn scope_remove_drops_empty_scope() {
        let mut map = ScopeMap::new();
        map.push(group("a.py"), 0);
        assert!(map.remove(&group("a.py"), 0));
        assert!(!map.remove(&group("a.py"), 0));
        assert!(map.is_empty());
    }
}
