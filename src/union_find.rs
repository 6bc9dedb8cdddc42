//! Union-Find (Disjoint Set Union) data structure.
//!
//! Dense, index-based implementation with path compression and union by rank.
//! Used twice per clustering pass: once to snap raw segment endpoints into
//! graph nodes, once to group nodes into connected clusters.
//!
//! Group extraction is canonical: members are sorted and groups are ordered
//! by their smallest member, so the output never depends on union order.

/// Union-Find over the indices `0..len`.
///
/// # Example
/// ```
/// use route_stitcher::union_find::UnionFind;
///
/// let mut uf = UnionFind::new(3);
/// uf.union(0, 1);
/// assert!(uf.connected(0, 1));
/// assert!(!uf.connected(0, 2));
/// assert_eq!(uf.groups(), vec![vec![0, 1], vec![2]]);
/// ```
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
    sets: usize,
}

impl UnionFind {
    /// Create `len` singleton sets.
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
            sets: len,
        }
    }

    /// Find the representative of the set containing `item`.
    ///
    /// Iterative two-pass path compression; long snapping chains along a
    /// densely sampled path would otherwise recurse deeply.
    pub fn find(&mut self, item: usize) -> usize {
        let mut root = item;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        let mut current = item;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }

        root
    }

    /// Union the sets containing `a` and `b`.
    ///
    /// Returns true if the sets were different (union performed),
    /// false if they were already in the same set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);

        if root_a == root_b {
            return false;
        }

        // Union by rank: attach smaller tree under larger tree
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_b] = root_a;
                self.rank[root_a] += 1;
            }
        }

        self.sets -= 1;
        true
    }

    /// Check if two elements are in the same set.
    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// All sets, each sorted ascending, ordered by smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut slot_of_root: Vec<Option<usize>> = vec![None; self.parent.len()];
        let mut groups: Vec<Vec<usize>> = Vec::with_capacity(self.sets);

        // Ascending iteration makes both member order and group order canonical
        for item in 0..self.parent.len() {
            let root = self.find(item);
            match slot_of_root[root] {
                Some(slot) => groups[slot].push(item),
                None => {
                    slot_of_root[root] = Some(groups.len());
                    groups.push(vec![item]);
                }
            }
        }

        groups
    }

    /// Number of disjoint sets.
    pub fn set_count(&self) -> usize {
        self.sets
    }

    /// Get the number of elements in the structure.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Check if the structure is empty.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let mut uf = UnionFind::new(3);

        assert!(!uf.connected(0, 1));

        assert!(uf.union(0, 1));
        assert!(!uf.union(1, 0));
        assert!(uf.connected(0, 1));
        assert!(!uf.connected(0, 2));
        assert_eq!(uf.set_count(), 2);
    }

    #[test]
    fn test_path_compression() {
        let mut uf = UnionFind::new(4);

        // Create chain: 0 -> 1 -> 2 -> 3
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(2, 3);

        let root = uf.find(0);
        assert_eq!(uf.find(1), root);
        assert_eq!(uf.find(2), root);
        assert_eq!(uf.find(3), root);
    }

    #[test]
    fn test_groups_are_canonical() {
        let mut forward = UnionFind::new(6);
        forward.union(4, 1);
        forward.union(5, 3);
        forward.union(1, 0);

        let mut backward = UnionFind::new(6);
        backward.union(0, 1);
        backward.union(3, 5);
        backward.union(1, 4);

        let expected = vec![vec![0, 1, 4], vec![2], vec![3, 5]];
        assert_eq!(forward.groups(), expected);
        assert_eq!(backward.groups(), expected);
    }

    #[test]
    fn test_empty() {
        let mut uf = UnionFind::new(0);
        assert!(uf.is_empty());
        assert!(uf.groups().is_empty());
    }
}
