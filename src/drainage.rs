use core::hash::Hash;
use std::collections::{HashMap, VecDeque};




/**
 * A minimal directed graph of drainage links, stored as edges only. An edge
 * a -> b means water leaving a enters b. A valid drainage network must be
 * acyclic; `topological_order` is how that is checked.
 */
pub struct DrainageGraph<K> {
    outgoing: HashMap<K, Vec<K>>,
    incoming: HashMap<K, Vec<K>>,
}




// ============================================================================
impl<K> DrainageGraph<K> where K: Hash + Eq + Clone {


    pub fn new() -> Self {
        Self::default()
    }


    /**
     * Return the number of links in the graph.
     */
    pub fn len(&self) -> usize {
        self.incoming.values().map(|edges| edges.len()).sum()
    }


    /**
     * Determine whether there are any links in the graph.
     */
    pub fn is_empty(&self) -> bool {
        self.incoming.values().all(|edges| edges.is_empty())
    }


    /**
     * Register a vertex that may have no links, so that it still appears in
     * the topological order.
     */
    pub fn insert_vertex(&mut self, a: K) {
        self.outgoing.entry(a).or_default();
    }


    /**
     * Insert a link a -> b.
     */
    pub fn insert(&mut self, a0: K, b0: K) {
        let a1 = a0.clone();
        let b1 = b0.clone();
        self.outgoing.entry(a0).or_default().push(b0);
        self.outgoing.entry(b1.clone()).or_default();
        self.incoming.entry(b1).or_default().push(a1);
    }


    /**
     * Return an iterator over the vertices that the given vertex drains into.
     */
    pub fn downstream(&self, a: &K) -> impl Iterator<Item = &K> {
        self.outgoing.get(a).into_iter().flat_map(|edges| edges.iter())
    }


    /**
     * Return an iterator over the vertices draining into the given vertex.
     */
    pub fn upstream(&self, b: &K) -> impl Iterator<Item = &K> {
        self.incoming.get(b).into_iter().flat_map(|edges| edges.iter())
    }


    /**
     * Return the vertices ordered from headwaters to outlets. If the graph
     * contains a cycle, one of the vertices on it is returned as the error.
     */
    pub fn topological_order(&self) -> Result<Vec<K>, K> {
        let mut in_degree: HashMap<&K, usize> = self
            .outgoing
            .keys()
            .map(|k| (k, self.upstream(k).count()))
            .collect();

        let mut ready: VecDeque<&K> = in_degree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(&k, _)| k)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(a) = ready.pop_front() {
            order.push(a.clone());

            for b in self.downstream(a) {
                if let Some(n) = in_degree.get_mut(b) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push_back(b)
                    }
                }
            }
        }

        if order.len() == in_degree.len() {
            Ok(order)
        } else {
            let stuck = in_degree
                .into_iter()
                .find(|(_, n)| *n > 0)
                .map(|(k, _)| k.clone());
            Err(stuck.expect("a cyclic graph has a vertex with unresolved links"))
        }
    }
}

impl<K> Default for DrainageGraph<K> {
    fn default() -> Self {
        Self {
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }
}
