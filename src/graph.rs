use crate::cost::{link_cost, CostParams};
use crate::error::{Error, Result};
use crate::fragment::{Direction, Fragment};
use crate::track::Track;

use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

pub type NodeId = u64;

// augmentations must improve the matching by more than this
const IMPROVEMENT_EPS: f64 = 1e-9;

/// A committed link to a neighbouring node and the cost that justified it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub node: NodeId,
    pub cost: f64,
}

/// A scored candidate link, kept on both endpoints.
#[derive(Debug, Clone, Copy)]
struct Edge {
    node: NodeId,
    cost: f64,
    gap: f64,
}

#[derive(Debug)]
struct Node {
    fragment_id: String,
    track: Track,
    pred: Option<Link>,
    succ: Option<Link>,

    // candidate predecessors / successors, sorted by (gap, node)
    in_edges: Vec<Edge>,
    out_edges: Vec<Edge>,
}

/// Which port of a node an alternating path leaves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    In,
    Out,
}

impl Side {
    #[inline]
    fn flip(self) -> Self {
        match self {
            Side::In => Side::Out,
            Side::Out => Side::In,
        }
    }
}

/// `from` takes `to` as its partner on the searched side.
#[derive(Debug, Clone, Copy)]
struct Step {
    from: NodeId,
    to: NodeId,
    cost: f64,
}

#[derive(Debug)]
struct Augmentation {
    gain: f64,
    release: Option<NodeId>,
    steps: Vec<Step>,
}

/// Incremental min-cost chain cover of the fragments of one direction.
///
/// Every resident node has at most one predecessor and one successor link,
/// so the links form disjoint simple chains. The matching minimises
/// `sum(cost - stitch_thresh)` over its links and is kept optimal for the
/// resident nodes by one shortest augmenting path per port of each new node.
pub struct StitchGraph {
    direction: Direction,
    time_win: f64,
    params: CostParams,
    next_id: NodeId,
    nodes: HashMap<NodeId, Node>,
    index: HashMap<String, NodeId>,
    cache: HashMap<NodeId, Fragment>,
    residency: BTreeSet<(OrderedFloat<f64>, NodeId)>,
}

impl StitchGraph {
    pub fn new(direction: Direction, time_win: f64, params: CostParams) -> Self {
        Self {
            direction,
            time_win,
            params,
            next_id: 0,
            nodes: HashMap::new(),
            index: HashMap::new(),
            cache: HashMap::new(),
            residency: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Inserts an unmatched node and caches the fragment payload.
    ///
    /// Fragments the cost model cannot score are refused with
    /// [`Error::InvalidFragment`].
    pub fn add_node(&mut self, fragment: Fragment) -> Result<NodeId> {
        fragment.validate()?;

        if fragment.direction != self.direction {
            return Err(Error::DirectionMismatch {
                id: fragment.id,
                expected: self.direction,
                found: fragment.direction,
            });
        }

        if self.index.contains_key(&fragment.id) {
            return Err(Error::DuplicateFragment(fragment.id));
        }

        let id = self.next_id;
        self.next_id += 1;

        let track = Track::from_fragment(&fragment, self.params.anchor_samples);
        self.residency.insert((OrderedFloat(track.last_timestamp), id));
        self.index.insert(fragment.id.clone(), id);
        self.nodes.insert(
            id,
            Node {
                fragment_id: fragment.id.clone(),
                track,
                pred: None,
                succ: None,
                in_edges: Vec::new(),
                out_edges: Vec::new(),
            },
        );
        self.cache.insert(id, fragment);

        Ok(id)
    }

    /// Scores the candidate links of `id` and integrates it into the
    /// matching. Returns the matching cost improvement, `None` if the node
    /// stays unmatched and nothing else moved.
    pub fn augment_path(&mut self, id: NodeId) -> Result<Option<f64>> {
        self.score_candidates(id)?;

        let mut improvement = 0.0;
        let mut changed = false;

        for side in [Side::In, Side::Out] {
            if let Some(aug) = self.search(id, side) {
                tracing::trace!(
                    node = id,
                    ?side,
                    gain = aug.gain,
                    rerouted = aug.steps.len() - 1,
                    "augment"
                );

                improvement -= aug.gain;
                changed = true;
                self.apply(side, aug);
            }
        }

        Ok(if changed { Some(improvement) } else { None })
    }

    /// Chains whose tail ended before `time_thresh`, oldest tail first.
    /// Each chain is listed head to tail.
    pub fn pop_path(&self, time_thresh: f64) -> Vec<Vec<NodeId>> {
        self.chains(self.residency.range(..(OrderedFloat(time_thresh), 0)))
    }

    /// Every chain in the graph, including singletons, oldest tail first.
    pub fn all_paths(&self) -> Vec<Vec<NodeId>> {
        self.chains(self.residency.iter())
    }

    /// Resolves a path through the fragment cache.
    pub fn traj_dicts(&self, path: &[NodeId]) -> Result<Vec<Fragment>> {
        path.iter()
            .map(|id| self.cache.get(id).cloned().ok_or(Error::MissingFragment(*id)))
            .collect()
    }

    /// Drops the nodes of `path` from every structure of the graph.
    pub fn clean_graph(&mut self, path: &[NodeId]) -> Result<()> {
        for &id in path {
            let node = self.nodes.remove(&id).ok_or(Error::UnknownNode(id))?;

            if let Some(link) = node.pred {
                if let Some(n) = self.nodes.get_mut(&link.node) {
                    n.succ = None;
                }
            }

            if let Some(link) = node.succ {
                if let Some(n) = self.nodes.get_mut(&link.node) {
                    n.pred = None;
                }
            }

            for e in &node.in_edges {
                if let Some(n) = self.nodes.get_mut(&e.node) {
                    n.out_edges.retain(|x| x.node != id);
                }
            }

            for e in &node.out_edges {
                if let Some(n) = self.nodes.get_mut(&e.node) {
                    n.in_edges.retain(|x| x.node != id);
                }
            }

            self.residency.remove(&(OrderedFloat(node.track.last_timestamp), id));
            self.index.remove(&node.fragment_id);
            self.cache.remove(&id);
        }

        Ok(())
    }

    #[inline]
    pub fn node_id(&self, fragment_id: &str) -> Option<NodeId> {
        self.index.get(fragment_id).copied()
    }

    #[inline]
    pub fn fragment_id(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.fragment_id.as_str())
    }

    pub fn fragment_ids(&self, path: &[NodeId]) -> Vec<String> {
        path.iter()
            .filter_map(|id| self.fragment_id(*id))
            .map(str::to_string)
            .collect()
    }

    #[inline]
    pub fn pred(&self, id: NodeId) -> Option<Link> {
        self.nodes.get(&id).and_then(|n| n.pred)
    }

    #[inline]
    pub fn succ(&self, id: NodeId) -> Option<Link> {
        self.nodes.get(&id).and_then(|n| n.succ)
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Committed links.
    pub fn num_edges(&self) -> usize {
        self.nodes.values().filter(|n| n.succ.is_some()).count()
    }

    pub fn num_candidate_edges(&self) -> usize {
        self.nodes.values().map(|n| n.out_edges.len()).sum()
    }

    #[inline]
    pub fn num_resident(&self) -> usize {
        self.residency.len()
    }

    #[inline]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Sum of the costs of all committed links.
    pub fn total_cost(&self) -> f64 {
        self.nodes
            .values()
            .filter_map(|n| n.succ)
            .map(|l| l.cost)
            .sum()
    }

    fn chains<'a, I>(&self, entries: I) -> Vec<Vec<NodeId>>
    where
        I: Iterator<Item = &'a (OrderedFloat<f64>, NodeId)>,
    {
        entries
            .filter(|(_, id)| self.nodes.get(id).map_or(false, |n| n.succ.is_none()))
            .map(|&(_, id)| self.chain_ending_at(id))
            .collect()
    }

    fn chain_ending_at(&self, tail: NodeId) -> Vec<NodeId> {
        let mut chain = vec![tail];
        let mut cur = tail;

        while let Some(link) = self.pred(cur) {
            if chain.len() > self.nodes.len() {
                tracing::error!(node = tail, "cycle while walking chain");
                break;
            }

            chain.push(link.node);
            cur = link.node;
        }

        chain.reverse();
        chain
    }

    fn score(&self, pred: &Track, succ: &Track) -> Option<f64> {
        link_cost(pred, succ, self.time_win, &self.params)
    }

    fn score_candidates(&mut self, id: NodeId) -> Result<()> {
        let node = self.nodes.get(&id).ok_or(Error::UnknownNode(id))?;
        let track = &node.track;

        let mut found = Vec::new();

        // predecessors: ended within the window before this node starts
        let lo = OrderedFloat(track.first_timestamp - self.time_win);
        let hi = OrderedFloat(track.first_timestamp);
        let preds = if lo <= hi {
            Some(self.residency.range((lo, 0)..=(hi, NodeId::MAX)))
        } else {
            None
        };

        for &(_, other_id) in preds.into_iter().flatten() {
            if other_id == id {
                continue;
            }

            let Some(other) = self.nodes.get(&other_id) else {
                continue;
            };

            if let Some(cost) = self.score(&other.track, track) {
                let gap = track.first_timestamp - other.track.last_timestamp;
                found.push((Side::In, Edge { node: other_id, cost, gap }));
            }
        }

        // successors: start within the window after this node ends
        for &(_, other_id) in self
            .residency
            .range((OrderedFloat(track.last_timestamp), 0)..)
        {
            if other_id == id {
                continue;
            }

            let Some(other) = self.nodes.get(&other_id) else {
                continue;
            };

            if let Some(cost) = self.score(track, &other.track) {
                let gap = other.track.first_timestamp - track.last_timestamp;
                found.push((Side::Out, Edge { node: other_id, cost, gap }));
            }
        }

        for (side, edge) in found {
            let back = Edge { node: id, ..edge };

            if let Some(n) = self.nodes.get_mut(&id) {
                insert_sorted(edges_mut(n, side), edge);
            }

            if let Some(n) = self.nodes.get_mut(&edge.node) {
                insert_sorted(edges_mut(n, side.flip()), back);
            }
        }

        Ok(())
    }

    /// Shortest alternating path from the free `side` port of `root`.
    ///
    /// Labels live on nodes of `side`: a label is the cost change of letting
    /// that node give up its current partner. The path ends either at a free
    /// node across (a new link is added) or by releasing a labelled node.
    /// Candidates are explored in (gap, id) order and only a strictly better
    /// result replaces the incumbent.
    fn search(&self, root: NodeId, side: Side) -> Option<Augmentation> {
        let root_node = self.nodes.get(&root)?;
        if port(root_node, side).is_some() {
            return None;
        }

        let thresh = self.params.stitch_thresh;
        let limit = self.nodes.len() + 1;

        let mut dist: HashMap<NodeId, f64> = HashMap::from([(root, 0.0)]);
        let mut parent: HashMap<NodeId, Step> = HashMap::new();
        let mut pops: HashMap<NodeId, usize> = HashMap::new();
        let mut queue = VecDeque::from([root]);
        let mut queued = HashSet::from([root]);
        let mut best: Option<(f64, Step, Option<NodeId>)> = None;

        while let Some(x) = queue.pop_front() {
            queued.remove(&x);

            let count = pops.entry(x).or_insert(0);
            *count += 1;
            if *count > limit {
                tracing::warn!(node = root, "negative alternating cycle, skipping augmentation");
                return None;
            }

            let d = dist[&x];
            let node = self.nodes.get(&x)?;
            let current = port(node, side).map(|l| l.node);

            for e in edges(node, side) {
                if Some(e.node) == current {
                    continue;
                }

                let Some(other) = self.nodes.get(&e.node) else {
                    continue;
                };

                let val = d + (e.cost - thresh);
                let step = Step {
                    from: x,
                    to: e.node,
                    cost: e.cost,
                };

                match port(other, side.flip()) {
                    None => {
                        if best.map_or(true, |(b, _, _)| val < b) {
                            best = Some((val, step, None));
                        }
                    }
                    Some(link) => {
                        let next = link.node;
                        let nd = val - (link.cost - thresh);

                        if dist.get(&next).map_or(true, |&old| nd < old) {
                            dist.insert(next, nd);
                            parent.insert(next, step);

                            if best.map_or(true, |(b, _, _)| nd < b) {
                                best = Some((nd, step, Some(next)));
                            }

                            if queued.insert(next) {
                                queue.push_back(next);
                            }
                        }
                    }
                }
            }
        }

        let (gain, first, release) = best?;
        if gain >= -IMPROVEMENT_EPS {
            return None;
        }

        let mut steps = vec![first];
        let mut seen = HashSet::from([first.from]);
        let mut cur = first.from;

        while cur != root {
            let step = *parent.get(&cur)?;
            if !seen.insert(step.from) {
                tracing::warn!(node = root, "cyclic augmenting path, skipping augmentation");
                return None;
            }

            steps.push(step);
            cur = step.from;
        }

        Some(Augmentation {
            gain,
            release,
            steps,
        })
    }

    fn apply(&mut self, side: Side, aug: Augmentation) {
        if let Some(id) = aug.release {
            if let Some(n) = self.nodes.get_mut(&id) {
                *port_mut(n, side) = None;
            }
        }

        for step in aug.steps {
            if let Some(n) = self.nodes.get_mut(&step.from) {
                *port_mut(n, side) = Some(Link {
                    node: step.to,
                    cost: step.cost,
                });
            }

            if let Some(n) = self.nodes.get_mut(&step.to) {
                *port_mut(n, side.flip()) = Some(Link {
                    node: step.from,
                    cost: step.cost,
                });
            }
        }
    }
}

#[inline]
fn port(node: &Node, side: Side) -> Option<Link> {
    match side {
        Side::In => node.pred,
        Side::Out => node.succ,
    }
}

#[inline]
fn port_mut(node: &mut Node, side: Side) -> &mut Option<Link> {
    match side {
        Side::In => &mut node.pred,
        Side::Out => &mut node.succ,
    }
}

#[inline]
fn edges(node: &Node, side: Side) -> &[Edge] {
    match side {
        Side::In => &node.in_edges,
        Side::Out => &node.out_edges,
    }
}

#[inline]
fn edges_mut(node: &mut Node, side: Side) -> &mut Vec<Edge> {
    match side {
        Side::In => &mut node.in_edges,
        Side::Out => &mut node.out_edges,
    }
}

fn insert_sorted(list: &mut Vec<Edge>, edge: Edge) {
    let pos = list.partition_point(|e| (e.gap, e.node) < (edge.gap, edge.node));
    list.insert(pos, edge);
}
