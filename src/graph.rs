//! LinkGraph — bidirectional adjacency over note identifiers, derived
//! entirely from each note's parsed links (spec invariant I4: reconstructable
//! from scratch from the note set).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use crate::error::Error;
use crate::id::Identifier;
use crate::link::{parse_links, Link, Resolver};

/// Aggregate counters returned by [`LinkGraph::statistics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphStatistics {
    pub total_notes: usize,
    pub total_edges: usize,
    pub orphan_count: usize,
    pub avg_degree: f64,
}

#[derive(Default)]
struct GraphState {
    forward: HashMap<Identifier, BTreeSet<Identifier>>,
    backward: HashMap<Identifier, BTreeSet<Identifier>>,
    edges: HashMap<(Identifier, Identifier), Link>,
    titles: HashMap<Identifier, String>,
    nodes: HashSet<Identifier>,
}

/// Bidirectional link graph. All mutating operations take a write lock;
/// queries take a read lock, so readers never block on each other.
pub struct LinkGraph {
    state: RwLock<GraphState>,
}

impl Default for LinkGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkGraph {
    pub fn new() -> Self {
        LinkGraph {
            state: RwLock::new(GraphState::default()),
        }
    }

    /// Registers a note so it can be resolved as a link target and
    /// participates in orphan/statistics accounting, without yet parsing
    /// its own outgoing links. Used by the builder's first pass.
    pub fn register_note(&self, id: Identifier, title: impl Into<String>) {
        let mut state = self.state.write().expect("graph lock poisoned");
        state.nodes.insert(id);
        state.titles.insert(id, title.into());
    }

    /// Replaces all outgoing edges for `id` with the links parsed from
    /// `content` against `resolver`. Called once per note during the
    /// builder's second pass, or whenever a note's content changes.
    pub fn set_links(&self, id: Identifier, content: &str, resolver: &dyn Resolver) {
        let links = parse_links(id, content, resolver);
        let mut state = self.state.write().expect("graph lock poisoned");
        if let Some(old_targets) = state.forward.remove(&id) {
            for target in old_targets {
                if let Some(back) = state.backward.get_mut(&target) {
                    back.remove(&id);
                }
                state.edges.remove(&(id, target));
            }
        }
        let mut targets = BTreeSet::new();
        for link in links {
            if let Some(target) = link.target_id {
                targets.insert(target);
                state.backward.entry(target).or_default().insert(id);
                state.edges.insert((id, target), link);
            }
        }
        state.forward.insert(id, targets);
    }

    /// Removes a note and every edge touching it.
    pub fn remove_note(&self, id: Identifier) {
        let mut state = self.state.write().expect("graph lock poisoned");
        state.nodes.remove(&id);
        state.titles.remove(&id);
        if let Some(targets) = state.forward.remove(&id) {
            for target in targets {
                if let Some(back) = state.backward.get_mut(&target) {
                    back.remove(&id);
                }
                state.edges.remove(&(id, target));
            }
        }
        if let Some(sources) = state.backward.remove(&id) {
            for source in sources {
                if let Some(fwd) = state.forward.get_mut(&source) {
                    fwd.remove(&id);
                }
                state.edges.remove(&(source, id));
            }
        }
    }

    /// Outgoing links from `id`, in ascending byte position within the
    /// source note (reading order).
    pub fn outgoing(&self, id: Identifier) -> Vec<Link> {
        let state = self.state.read().expect("graph lock poisoned");
        let Some(targets) = state.forward.get(&id) else {
            return Vec::new();
        };
        let mut links: Vec<Link> = targets
            .iter()
            .filter_map(|t| state.edges.get(&(id, *t)).cloned())
            .collect();
        links.sort_by_key(|l| l.position);
        links
    }

    /// Incoming links to `id`, ordered by source note title (alphabetical),
    /// identifier as tie-break.
    pub fn incoming(&self, id: Identifier) -> Vec<Link> {
        let state = self.state.read().expect("graph lock poisoned");
        let Some(sources) = state.backward.get(&id) else {
            return Vec::new();
        };
        let mut entries: Vec<(&str, Identifier, Link)> = sources
            .iter()
            .filter_map(|s| {
                state
                    .edges
                    .get(&(*s, id))
                    .map(|link| (state.titles.get(s).map(|t| t.as_str()).unwrap_or(""), *s, link.clone()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
        entries.into_iter().map(|(_, _, link)| link).collect()
    }

    /// Identifiers with zero outgoing and zero incoming edges, sorted.
    pub fn orphans(&self) -> Vec<Identifier> {
        let state = self.state.read().expect("graph lock poisoned");
        let mut out: Vec<Identifier> = state
            .nodes
            .iter()
            .filter(|id| {
                state.forward.get(id).map(|s| s.is_empty()).unwrap_or(true)
                    && state.backward.get(id).map(|s| s.is_empty()).unwrap_or(true)
            })
            .copied()
            .collect();
        out.sort();
        out
    }

    /// Top-`k` identifiers by incoming edge count, ties broken by identifier.
    pub fn most_linked(&self, k: usize) -> Vec<(Identifier, usize)> {
        let state = self.state.read().expect("graph lock poisoned");
        let mut counts: Vec<(Identifier, usize)> = state
            .nodes
            .iter()
            .map(|id| (*id, state.backward.get(id).map(|s| s.len()).unwrap_or(0)))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(k);
        counts
    }

    /// Top-`k` identifiers by outgoing + incoming edge count, ties broken by
    /// identifier, excluding identifiers with zero connections.
    pub fn most_connected(&self, k: usize) -> Vec<(Identifier, usize)> {
        let state = self.state.read().expect("graph lock poisoned");
        let mut counts: Vec<(Identifier, usize)> = state
            .nodes
            .iter()
            .map(|id| {
                let out = state.forward.get(id).map(|s| s.len()).unwrap_or(0);
                let inc = state.backward.get(id).map(|s| s.len()).unwrap_or(0);
                (*id, out + inc)
            })
            .filter(|(_, degree)| *degree > 0)
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts.truncate(k);
        counts
    }

    /// Shortest directed path from `source` to `target` by breadth-first
    /// search. `Some([source])` when `source == target`; `None` when no
    /// path exists.
    pub fn find_path(&self, source: Identifier, target: Identifier) -> Option<Vec<Identifier>> {
        if source == target {
            return Some(vec![source]);
        }
        let state = self.state.read().expect("graph lock poisoned");
        let mut visited = HashSet::new();
        let mut parent: HashMap<Identifier, Identifier> = HashMap::new();
        let mut queue = VecDeque::new();
        visited.insert(source);
        queue.push_back(source);
        while let Some(current) = queue.pop_front() {
            let Some(targets) = state.forward.get(&current) else {
                continue;
            };
            for &next in targets {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == target {
                    let mut path = vec![next];
                    let mut cursor = next;
                    while let Some(&p) = parent.get(&cursor) {
                        path.push(p);
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    pub fn statistics(&self) -> GraphStatistics {
        let state = self.state.read().expect("graph lock poisoned");
        let total_notes = state.nodes.len();
        let total_edges = state.edges.len();
        let orphan_count = state
            .nodes
            .iter()
            .filter(|id| {
                state.forward.get(id).map(|s| s.is_empty()).unwrap_or(true)
                    && state.backward.get(id).map(|s| s.is_empty()).unwrap_or(true)
            })
            .count();
        let avg_degree = if total_notes == 0 {
            0.0
        } else {
            (2 * total_edges) as f64 / total_notes as f64
        };
        GraphStatistics {
            total_notes,
            total_edges,
            orphan_count,
            avg_degree,
        }
    }

    /// Rebuilds the graph from scratch given the full note set, per
    /// invariant I4. Two passes: register every note, then parse links.
    pub fn rebuild(
        &self,
        notes: &[(Identifier, String, String)],
        resolver: &dyn Resolver,
    ) -> Result<(), Error> {
        {
            let mut state = self.state.write().expect("graph lock poisoned");
            *state = GraphState::default();
        }
        for (id, title, _) in notes {
            self.register_note(*id, title.clone());
        }
        for (id, _, content) in notes {
            self.set_links(*id, content, resolver);
        }
        Ok(())
    }
}
