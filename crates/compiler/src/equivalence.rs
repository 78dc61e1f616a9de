//! Equivalence classes over operand values, used by constant/value
//! propagation.
//!
//! The structure is a set-of-sets view: every known symbol maps to the
//! index of its equivalence set, and sets with fewer than two members are
//! dropped eagerly. Besides `union` and `find` it supports `kill`
//! (detaching a single symbol, needed when an instruction overwrites its
//! destination) and `merge` (intersecting several instances, needed when
//! control-flow edges join).

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone, Default)]
pub struct EquivalenceClasses<T: Clone + Eq + Ord + Hash> {
    sets: Vec<BTreeSet<T>>,
    index: HashMap<T, usize>,
}

impl<T: Clone + Eq + Ord + Hash> EquivalenceClasses<T> {
    pub fn new() -> Self {
        EquivalenceClasses {
            sets: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// All symbols known to any set.
    pub fn symbols(&self) -> Vec<T> {
        self.index.keys().cloned().collect()
    }

    /// The set of everything equivalent to `a`; a singleton if `a` is
    /// unknown.
    pub fn find(&self, a: &T) -> BTreeSet<T> {
        match self.index.get(a) {
            Some(&set) => self.sets[set].clone(),
            None => BTreeSet::from([a.clone()]),
        }
    }

    pub fn union(&mut self, a: T, b: T) {
        match (self.index.get(&a).copied(), self.index.get(&b).copied()) {
            (None, None) => {
                let id = self.sets.len();
                self.sets.push(BTreeSet::from([a.clone(), b.clone()]));
                self.index.insert(a, id);
                self.index.insert(b, id);
            }
            (Some(sa), None) => {
                self.sets[sa].insert(b.clone());
                self.index.insert(b, sa);
            }
            (None, Some(sb)) => {
                self.sets[sb].insert(a.clone());
                self.index.insert(a, sb);
            }
            (Some(sa), Some(sb)) if sa != sb => {
                let moved = std::mem::take(&mut self.sets[sb]);
                for elem in moved {
                    self.index.insert(elem.clone(), sa);
                    self.sets[sa].insert(elem);
                }
            }
            _ => {}
        }
    }

    /// Detach `a` from its equivalence set. A set reduced to one member
    /// is dropped entirely.
    pub fn kill(&mut self, a: &T) {
        let Some(set) = self.index.remove(a) else {
            return;
        };
        self.sets[set].remove(a);
        if self.sets[set].len() == 1 {
            let last = self.sets[set].pop_first().expect("set has one member");
            self.index.remove(&last);
        }
    }

    /// Intersect several instances: two symbols stay equivalent only if
    /// they are equivalent in every instance.
    pub fn merge(instances: &[EquivalenceClasses<T>]) -> Self {
        let mut result = EquivalenceClasses::new();
        let mut pending: BTreeSet<T> = instances
            .iter()
            .flat_map(|ec| ec.index.keys().cloned())
            .collect();

        while let Some(symbol) = pending.pop_first() {
            let mut equivalent = instances
                .first()
                .map(|ec| ec.find(&symbol))
                .unwrap_or_default();
            for ec in &instances[1..] {
                let other = ec.find(&symbol);
                equivalent = equivalent.intersection(&other).cloned().collect();
            }
            for covered in &equivalent {
                pending.remove(covered);
            }
            if equivalent.len() > 1 {
                let id = result.sets.len();
                for elem in &equivalent {
                    result.index.insert(elem.clone(), id);
                }
                result.sets.push(equivalent);
            }
        }
        result
    }

    fn canonical(&self) -> BTreeSet<&BTreeSet<T>> {
        self.sets.iter().filter(|s| s.len() > 1).collect()
    }
}

impl<T: Clone + Eq + Ord + Hash> PartialEq for EquivalenceClasses<T> {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_unknown_is_singleton() {
        let ec: EquivalenceClasses<i32> = EquivalenceClasses::new();
        assert_eq!(ec.find(&7), BTreeSet::from([7]));
    }

    #[test]
    fn test_union_is_transitive() {
        let mut ec = EquivalenceClasses::new();
        ec.union(1, 2);
        ec.union(2, 3);
        assert_eq!(ec.find(&1), BTreeSet::from([1, 2, 3]));
        assert_eq!(ec.find(&3), BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn test_union_of_two_sets() {
        let mut ec = EquivalenceClasses::new();
        ec.union(1, 2);
        ec.union(3, 4);
        ec.union(2, 3);
        assert_eq!(ec.find(&4), BTreeSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn test_kill_detaches_one_symbol() {
        let mut ec = EquivalenceClasses::new();
        ec.union(1, 2);
        ec.union(2, 3);
        ec.kill(&2);
        assert_eq!(ec.find(&2), BTreeSet::from([2]));
        assert_eq!(ec.find(&1), BTreeSet::from([1, 3]));
    }

    #[test]
    fn test_kill_drops_trivial_set() {
        let mut ec = EquivalenceClasses::new();
        ec.union(1, 2);
        ec.kill(&1);
        assert_eq!(ec.find(&2), BTreeSet::from([2]));
        assert!(ec.symbols().is_empty());
    }

    #[test]
    fn test_merge_intersects() {
        let mut x = EquivalenceClasses::new();
        x.union(1, 2);
        x.union(2, 3);
        let mut y = EquivalenceClasses::new();
        y.union(1, 2);

        let z = EquivalenceClasses::merge(&[x, y]);
        assert_eq!(z.find(&1), BTreeSet::from([1, 2]));
        assert_eq!(z.find(&3), BTreeSet::from([3]));
    }

    #[test]
    fn test_merge_with_empty_instance_clears_everything() {
        let mut x = EquivalenceClasses::new();
        x.union(1, 2);
        let y = EquivalenceClasses::new();
        let z = EquivalenceClasses::merge(&[x, y]);
        assert!(z.symbols().is_empty());
    }

    #[test]
    fn test_equality_ignores_set_order() {
        let mut a = EquivalenceClasses::new();
        a.union(1, 2);
        a.union(5, 6);
        let mut b = EquivalenceClasses::new();
        b.union(5, 6);
        b.union(2, 1);
        assert_eq!(a, b);
        b.union(6, 7);
        assert_ne!(a, b);
    }
}
