//! Reconstruct structured control flow from an arbitrary block graph.
//!
//! The input is a directed graph of opaque block bodies with a single entry. Each block ends in
//! an ordered list of exits: any number of conditional exits (taken if their condition holds,
//! tried in order) followed by one unconditional exit, or no exits at all for a block whose body
//! leaves the function.
//!
//! Structuring runs in two phases:
//!
//! 1. Irreducible regions are made reducible. Every strongly connected region with more than one
//!    entry block gets a synthetic dispatcher block; each edge into one of the entries is
//!    redirected to the dispatcher and records the real target in a dispatch variable. The
//!    dispatcher then branches on that variable. The region minus its (now unique) header is
//!    processed recursively.
//! 2. The reducible graph is laid out along its dominator tree. Loop headers open a `Loop`
//!    whose label is the target of back edges. Blocks with more than one forward predecessor
//!    ("merge" blocks) are placed after a `Block` whose label branches to them. Every other
//!    block is inlined at its only forward predecessor. Branches may leave several constructs
//!    at once.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use thiserror::Error;

use crate::shape::{LabelId, Shape, Test};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("block graph is empty")]
    Empty,
    #[error("block {node} branches to nonexistent block {target}")]
    UnknownTarget { node: usize, target: usize },
    #[error("block {node} must end in exactly one unconditional exit")]
    MalformedExits { node: usize },
    #[error("no enclosing label for edge {from} -> {to}")]
    MissingLabel { from: usize, to: usize },
    #[error("block {0} placed twice")]
    DuplicatePlacement(usize),
    #[error("retreating edge {from} -> {to} survived irreducible-region splitting")]
    Irreducible { from: usize, to: usize },
}

struct Exit<C> {
    test: Option<Test<C>>,
    target: usize,
    /// Dispatch value to store before taking the edge (set when the edge was rerouted through a
    /// dispatcher).
    set_dispatch: Option<u32>,
}

struct Node<B, C> {
    body: Option<B>,
    exits: Vec<Exit<C>>,
    absorbed: bool,
}

/// Block graph handed to [`BlockGraph::structurize`]. Blocks are identified by the index
/// returned from [`BlockGraph::add_block`].
pub struct BlockGraph<B, C> {
    nodes: Vec<Node<B, C>>,
    entry: usize,
}

impl<B, C> Default for BlockGraph<B, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, C> BlockGraph<B, C> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            entry: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.absorbed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_block(&mut self, body: B) -> usize {
        self.nodes.push(Node {
            body: Some(body),
            exits: Vec::new(),
            absorbed: false,
        });
        self.nodes.len() - 1
    }

    /// Append an exit to `from`. Conditional exits must be added before the final
    /// unconditional one.
    pub fn add_exit(&mut self, from: usize, cond: Option<C>, to: usize) {
        self.nodes[from].exits.push(Exit {
            test: cond.map(Test::Cond),
            target: to,
            set_dispatch: None,
        });
    }

    pub fn set_entry(&mut self, entry: usize) {
        self.entry = entry;
    }

    fn targets(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[node].exits.iter().map(|e| e.target)
    }

    fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        if self.nodes.is_empty() {
            return seen;
        }
        let mut stack = vec![self.entry];
        seen[self.entry] = true;
        while let Some(node) = stack.pop() {
            for target in self.targets(node) {
                if !seen[target] {
                    seen[target] = true;
                    stack.push(target);
                }
            }
        }
        seen
    }

    fn validate(&self) -> Result<(), StructureError> {
        if self.nodes.is_empty() {
            return Err(StructureError::Empty);
        }
        if self.entry >= self.nodes.len() {
            return Err(StructureError::UnknownTarget {
                node: self.entry,
                target: self.entry,
            });
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            let count = node.exits.len();
            for (pos, exit) in node.exits.iter().enumerate() {
                if exit.target >= self.nodes.len() {
                    return Err(StructureError::UnknownTarget {
                        node: idx,
                        target: exit.target,
                    });
                }
                let is_last = pos + 1 == count;
                if is_last == exit.test.is_some() {
                    return Err(StructureError::MalformedExits { node: idx });
                }
            }
        }
        Ok(())
    }

    /// Merge straight-line chains: a block whose only exit is unconditional absorbs its target
    /// when the target has no other predecessor and is not the entry.
    pub fn coalesce(&mut self, mut join: impl FnMut(&mut B, B)) {
        let live = self.reachable();
        let mut incoming = vec![0usize; self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            if live[idx] {
                for exit in &node.exits {
                    incoming[exit.target] += 1;
                }
            }
        }

        for a in 0..self.nodes.len() {
            if !live[a] || self.nodes[a].absorbed {
                continue;
            }
            loop {
                let b = match self.nodes[a].exits.as_slice() {
                    [only] if only.test.is_none() => only.target,
                    _ => break,
                };
                if b == a
                    || b == self.entry
                    || incoming[b] != 1
                    || self.nodes[b].absorbed
                    || self.nodes[a].body.is_none()
                    || self.nodes[b].body.is_none()
                {
                    break;
                }
                let absorbed_body = self.nodes[b].body.take();
                let absorbed_exits = std::mem::take(&mut self.nodes[b].exits);
                self.nodes[b].absorbed = true;
                if let (Some(dst), Some(src)) = (self.nodes[a].body.as_mut(), absorbed_body) {
                    join(dst, src);
                }
                self.nodes[a].exits = absorbed_exits;
            }
        }
    }

    /// Consume the graph and produce an equivalent structured program.
    pub fn structurize(mut self) -> Result<Shape<B, C>, StructureError> {
        self.validate()?;
        let mut live = self.reachable();

        // Give the entry a predecessor-free header so it can never sit inside a cycle.
        let entry_has_preds = (0..self.nodes.len())
            .filter(|&n| live[n])
            .any(|n| self.targets(n).any(|t| t == self.entry));
        if entry_has_preds {
            self.nodes.push(Node {
                body: None,
                exits: vec![Exit {
                    test: None,
                    target: self.entry,
                    set_dispatch: None,
                }],
                absorbed: false,
            });
            live.push(true);
            self.entry = self.nodes.len() - 1;
        }

        let region: BTreeSet<usize> = (0..self.nodes.len()).filter(|&n| live[n]).collect();
        self.split_irreducible(&region, &mut live);

        let analysis = Analysis::compute(&self)?;
        let entry = self.entry;
        let placed = vec![false; self.nodes.len()];
        let mut emitter = Emitter {
            graph: &mut self,
            analysis,
            frames: Vec::new(),
            next_label: 0,
            placed,
        };
        emitter.do_tree(entry)
    }

    fn split_irreducible(&mut self, region: &BTreeSet<usize>, live: &mut Vec<bool>) {
        for scc in self.sccs(region) {
            let cyclic = scc.len() > 1 || self.targets(scc[0]).any(|t| t == scc[0]);
            if !cyclic {
                continue;
            }
            let members: BTreeSet<usize> = scc.into_iter().collect();
            let entries = self.region_entries(&members, live);
            let header = match entries.as_slice() {
                [single] => *single,
                _ => self.insert_dispatcher(&entries, live),
            };
            let mut inner = members;
            inner.remove(&header);
            self.split_irreducible(&inner, live);
        }
    }

    fn region_entries(&self, members: &BTreeSet<usize>, live: &[bool]) -> Vec<usize> {
        let mut entries = BTreeSet::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if !live[idx] || members.contains(&idx) {
                continue;
            }
            for exit in &node.exits {
                if members.contains(&exit.target) {
                    entries.insert(exit.target);
                }
            }
        }
        if members.contains(&self.entry) {
            entries.insert(self.entry);
        }
        entries.into_iter().collect()
    }

    fn insert_dispatcher(&mut self, entries: &[usize], live: &mut Vec<bool>) -> usize {
        let dispatcher = self.nodes.len();
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if !live[idx] {
                continue;
            }
            for exit in &mut node.exits {
                if entries.contains(&exit.target) {
                    exit.set_dispatch = Some(exit.target as u32);
                    exit.target = dispatcher;
                }
            }
        }
        let exits = entries
            .iter()
            .enumerate()
            .map(|(pos, &target)| Exit {
                test: (pos + 1 < entries.len()).then_some(Test::DispatchIs(target as u32)),
                target,
                set_dispatch: None,
            })
            .collect();
        self.nodes.push(Node {
            body: None,
            exits,
            absorbed: false,
        });
        live.push(true);
        dispatcher
    }

    /// Strongly connected components of the subgraph induced by `region` (Tarjan, iterative).
    fn sccs(&self, region: &BTreeSet<usize>) -> Vec<Vec<usize>> {
        const UNVISITED: u32 = u32::MAX;
        let n = self.nodes.len();
        let mut index = vec![UNVISITED; n];
        let mut low = vec![0u32; n];
        let mut on_stack = vec![false; n];
        let mut stack = Vec::new();
        let mut next = 0u32;
        let mut out = Vec::new();

        for &root in region {
            if index[root] != UNVISITED {
                continue;
            }
            index[root] = next;
            low[root] = next;
            next += 1;
            stack.push(root);
            on_stack[root] = true;
            let mut calls: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(top) = calls.last_mut() {
                let v = top.0;
                if top.1 < self.nodes[v].exits.len() {
                    let w = self.nodes[v].exits[top.1].target;
                    top.1 += 1;
                    if !region.contains(&w) {
                        continue;
                    }
                    if index[w] == UNVISITED {
                        index[w] = next;
                        low[w] = next;
                        next += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        calls.push((w, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                    continue;
                }

                calls.pop();
                if let Some(&(parent, _)) = calls.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    out.push(component);
                }
            }
        }
        out
    }
}

/// Dominator-tree facts about a reducible graph.
struct Analysis {
    rpo: Vec<u32>,
    children: Vec<Vec<usize>>,
    loop_header: Vec<bool>,
    merge: Vec<bool>,
}

impl Analysis {
    fn compute<B, C>(graph: &BlockGraph<B, C>) -> Result<Self, StructureError> {
        let n = graph.nodes.len();
        let entry = graph.entry;

        // Reverse postorder.
        let mut visited = vec![false; n];
        let mut post = Vec::with_capacity(n);
        let mut stack = vec![(entry, 0usize)];
        visited[entry] = true;
        while let Some(top) = stack.last_mut() {
            let v = top.0;
            if let Some(exit) = graph.nodes[v].exits.get(top.1) {
                top.1 += 1;
                let w = exit.target;
                if !visited[w] {
                    visited[w] = true;
                    stack.push((w, 0));
                }
            } else {
                post.push(v);
                stack.pop();
            }
        }
        let order: Vec<usize> = post.into_iter().rev().collect();
        let mut rpo = vec![u32::MAX; n];
        for (pos, &node) in order.iter().enumerate() {
            rpo[node] = pos as u32;
        }

        let mut preds = vec![Vec::new(); n];
        for &u in &order {
            for v in graph.targets(u) {
                preds[v].push(u);
            }
        }

        // Cooper, Harvey & Kennedy iterative dominators.
        const UNDEF: usize = usize::MAX;
        let mut idom = vec![UNDEF; n];
        idom[entry] = entry;
        let intersect = |idom: &[usize], mut a: usize, mut b: usize| {
            while a != b {
                while rpo[a] > rpo[b] {
                    a = idom[a];
                }
                while rpo[b] > rpo[a] {
                    b = idom[b];
                }
            }
            a
        };
        let mut changed = true;
        while changed {
            changed = false;
            for &b in order.iter().skip(1) {
                let mut new_idom = UNDEF;
                for &p in &preds[b] {
                    if idom[p] == UNDEF {
                        continue;
                    }
                    new_idom = if new_idom == UNDEF {
                        p
                    } else {
                        intersect(&idom, p, new_idom)
                    };
                }
                if new_idom != UNDEF && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let dominates = |a: usize, mut b: usize| loop {
            if a == b {
                return true;
            }
            if b == entry {
                return false;
            }
            b = idom[b];
        };

        let mut loop_header = vec![false; n];
        let mut forward_in = vec![0u32; n];
        for &u in &order {
            for v in graph.targets(u) {
                if rpo[v] <= rpo[u] {
                    if !dominates(v, u) {
                        return Err(StructureError::Irreducible { from: u, to: v });
                    }
                    loop_header[v] = true;
                } else {
                    forward_in[v] += 1;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for &v in order.iter().skip(1) {
            children[idom[v]].push(v);
        }

        Ok(Self {
            rpo,
            children,
            loop_header,
            merge: forward_in.iter().map(|&c| c >= 2).collect(),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    /// `Br` continues the loop headed by the node.
    Loop,
    /// `Br` exits the block that the node follows.
    Block,
}

struct Emitter<'g, B, C> {
    graph: &'g mut BlockGraph<B, C>,
    analysis: Analysis,
    frames: Vec<(usize, FrameKind, LabelId)>,
    next_label: u32,
    placed: Vec<bool>,
}

impl<B, C> Emitter<'_, B, C> {
    fn fresh_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    fn label_for(
        &self,
        from: usize,
        to: usize,
        kind: FrameKind,
    ) -> Result<LabelId, StructureError> {
        self.frames
            .iter()
            .rev()
            .find(|(node, k, _)| *node == to && *k == kind)
            .map(|(_, _, label)| *label)
            .ok_or(StructureError::MissingLabel { from, to })
    }

    fn do_tree(&mut self, x: usize) -> Result<Shape<B, C>, StructureError> {
        if std::mem::replace(&mut self.placed[x], true) {
            return Err(StructureError::DuplicatePlacement(x));
        }
        let mut merges: Vec<usize> = self.analysis.children[x]
            .iter()
            .copied()
            .filter(|&y| self.analysis.merge[y])
            .collect();
        merges.sort_by_key(|&y| Reverse(self.analysis.rpo[y]));

        if self.analysis.loop_header[x] {
            let label = self.fresh_label();
            self.frames.push((x, FrameKind::Loop, label));
            let body = self.node_within(x, &merges);
            self.frames.pop();
            Ok(Shape::Loop {
                label,
                body: Box::new(body?),
            })
        } else {
            self.node_within(x, &merges)
        }
    }

    /// Place `x` followed by its merge children `ys` (latest in reverse postorder first).
    fn node_within(&mut self, x: usize, ys: &[usize]) -> Result<Shape<B, C>, StructureError> {
        match ys.split_first() {
            None => {
                let body = self.graph.nodes[x].body.take();
                let exits = std::mem::take(&mut self.graph.nodes[x].exits);
                let mut items = Vec::with_capacity(2);
                if let Some(body) = body {
                    items.push(Shape::Body(body));
                }
                items.push(self.branch_chain(x, exits)?);
                Ok(Shape::seq(items))
            }
            Some((&y, rest)) => {
                let label = self.fresh_label();
                self.frames.push((y, FrameKind::Block, label));
                let inner = self.node_within(x, rest);
                self.frames.pop();
                let follow = self.do_tree(y)?;
                Ok(Shape::seq(vec![
                    Shape::Block {
                        label,
                        body: Box::new(inner?),
                    },
                    follow,
                ]))
            }
        }
    }

    fn branch_chain(
        &mut self,
        x: usize,
        exits: Vec<Exit<C>>,
    ) -> Result<Shape<B, C>, StructureError> {
        let mut tail: Option<Shape<B, C>> = None;
        for exit in exits.into_iter().rev() {
            let jump = self.do_branch(x, exit.target, exit.set_dispatch)?;
            tail = Some(match exit.test {
                None => jump,
                Some(test) => Shape::If {
                    test,
                    then: Box::new(jump),
                    otherwise: Box::new(tail.unwrap_or_else(Shape::empty)),
                },
            });
        }
        Ok(tail.unwrap_or_else(Shape::empty))
    }

    fn do_branch(
        &mut self,
        x: usize,
        y: usize,
        set_dispatch: Option<u32>,
    ) -> Result<Shape<B, C>, StructureError> {
        let a = &self.analysis;
        let jump = if a.rpo[y] <= a.rpo[x] {
            Shape::Br(self.label_for(x, y, FrameKind::Loop)?)
        } else if a.merge[y] {
            Shape::Br(self.label_for(x, y, FrameKind::Block)?)
        } else {
            self.do_tree(y)?
        };
        Ok(match set_dispatch {
            Some(id) => Shape::seq(vec![Shape::SetDispatch(id), jump]),
            None => jump,
        })
    }
}
