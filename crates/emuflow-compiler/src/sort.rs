//! Execution ordering of blocks.
//!
//! Blocks are placed depth-first: a ready block is emitted, then the
//! Set-Global sinks it unlocks, then its other ready dependents. A FOR block
//! and its body form a cluster that is placed contiguously, so the runtime
//! can execute the body as the `chain_len` blocks that follow the FOR.
//!
//! Ties always break on the construction id, never on the current label, so
//! sorting a sorted program yields the same order.

use std::collections::{BTreeSet, HashMap};

use emuflow_codegen::{Block, BlockType};
use emuflow_types::{Diagnostic, ErrorCode};
use tracing::{debug, warn};

/// Result of ordering a block list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schedule {
    /// Positions into the input slice, in execution order.
    pub order: Vec<usize>,
    /// `(position, chain_len)` for every FOR block.
    pub chain_lens: Vec<(usize, u16)>,
    pub warnings: Vec<Diagnostic>,
}

/// Order `blocks` for execution.
///
/// Block-output references name their source by construction id.
pub fn schedule(blocks: &[Block]) -> Schedule {
    let graph = Graph::new(blocks);
    let mut sorter = Sorter::new(&graph);
    sorter.run();
    debug!(blocks = blocks.len(), "blocks ordered");
    Schedule {
        order: sorter.order,
        chain_lens: sorter.chain_lens,
        warnings: sorter.warnings,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Dependency graph
// ══════════════════════════════════════════════════════════════════════════════

struct Graph<'a> {
    blocks: &'a [Block],
    /// Innermost FOR whose body holds the block.
    owner: Vec<Option<usize>>,
    /// The block plus, for a FOR, its whole body (nested bodies included).
    cluster: Vec<Vec<usize>>,
    /// Number of blocks outside the cluster that it depends on.
    in_degree: Vec<usize>,
    /// Clusters waiting on each block.
    dependents: Vec<Vec<usize>>,
}

impl<'a> Graph<'a> {
    fn new(blocks: &'a [Block]) -> Self {
        let n = blocks.len();
        let by_id: HashMap<u32, usize> =
            blocks.iter().enumerate().map(|(i, b)| (b.id, i)).collect();

        let deps: Vec<BTreeSet<usize>> = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let mut set = BTreeSet::new();
                for r in b.refs() {
                    r.walk(&mut |r| {
                        let source = r.block_output_parts().and_then(|(id, _)| by_id.get(&id));
                        if let Some(&j) = source {
                            if j != i {
                                set.insert(j);
                            }
                        }
                    });
                }
                set
            })
            .collect();
        let mut readers: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                readers[d].push(i);
            }
        }

        // Blocks enabled directly by each FOR's loop output.
        let mut enabled: HashMap<usize, Vec<usize>> = HashMap::new();
        for (b, block) in blocks.iter().enumerate() {
            if let Some(&f) = en_source(block).and_then(|id| by_id.get(&id)) {
                if f != b && blocks[f].ty == BlockType::For {
                    enabled.entry(f).or_default().push(b);
                }
            }
        }

        let mut owner_key: Vec<Option<(usize, u32, usize)>> = vec![None; n];
        let mut cluster: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        for (f, seeds) in enabled {
            let mut body: BTreeSet<usize> = seeds.iter().copied().collect();
            let mut queue: Vec<usize> = seeds;
            while let Some(m) = queue.pop() {
                for &r in &readers[m] {
                    if r != f && body.insert(r) {
                        queue.push(r);
                    }
                }
            }
            let key = (body.len(), blocks[f].id, f);
            for &b in &body {
                match owner_key[b] {
                    Some(k) if k <= key => {}
                    _ => owner_key[b] = Some(key),
                }
            }
            cluster[f].extend(body);
        }
        let owner = owner_key.iter().map(|k| k.map(|(_, _, f)| f)).collect();

        let mut in_degree = vec![0; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (c, members) in cluster.iter().enumerate() {
            let inside: BTreeSet<usize> = members.iter().copied().collect();
            let external: BTreeSet<usize> = members
                .iter()
                .flat_map(|&m| deps[m].iter().copied())
                .filter(|d| !inside.contains(d))
                .collect();
            in_degree[c] = external.len();
            for d in external {
                dependents[d].push(c);
            }
        }

        Self {
            blocks,
            owner,
            cluster,
            in_degree,
            dependents,
        }
    }

    fn id(&self, i: usize) -> u32 {
        self.blocks[i].id
    }

    /// Scope 0 is the top level; scope `f + 1` is the body of FOR `f`.
    fn scope_of(&self, i: usize) -> usize {
        self.owner[i].map_or(0, |f| f + 1)
    }
}

/// Construction id of the block driving `block`'s EN input, when EN is
/// bound to a plain first output.
fn en_source(block: &Block) -> Option<u32> {
    let slot = block.inputs.iter().position(|d| d.name == "EN")?;
    let r = block.in_conn[slot].as_ref()?;
    if !r.indices.is_empty() {
        return None;
    }
    match r.block_output_parts()? {
        (id, 0) => Some(id),
        _ => None,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Placement
// ══════════════════════════════════════════════════════════════════════════════

/// Unplaced blocks of one scope, keyed by `(construction id, position)`.
#[derive(Default)]
struct Scope {
    waiting: BTreeSet<(u32, usize)>,
    ready: BTreeSet<(u32, usize)>,
}

enum Frame {
    /// Place every block of a scope. `chain` is the FOR owning the scope and
    /// the order length when its body started.
    Scope {
        scope: usize,
        chain: Option<(usize, usize)>,
    },
    /// Try the dependents unlocked by a placed block or cluster.
    Dependents { list: Vec<usize>, next: usize },
}

struct Sorter<'g, 'a> {
    graph: &'g Graph<'a>,
    placed: Vec<bool>,
    missing: Vec<usize>,
    scopes: Vec<Scope>,
    order: Vec<usize>,
    chain_lens: Vec<(usize, u16)>,
    warnings: Vec<Diagnostic>,
}

impl<'g, 'a> Sorter<'g, 'a> {
    fn new(graph: &'g Graph<'a>) -> Self {
        let n = graph.blocks.len();
        let mut scopes: Vec<Scope> = (0..=n).map(|_| Scope::default()).collect();
        for i in 0..n {
            let scope = &mut scopes[graph.scope_of(i)];
            if graph.in_degree[i] == 0 {
                scope.ready.insert((graph.id(i), i));
            } else {
                scope.waiting.insert((graph.id(i), i));
            }
        }
        Self {
            graph,
            placed: vec![false; n],
            missing: graph.in_degree.clone(),
            scopes,
            order: Vec::with_capacity(n),
            chain_lens: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn run(&mut self) {
        let mut stack = vec![Frame::Scope {
            scope: 0,
            chain: None,
        }];
        while let Some(frame) = stack.last_mut() {
            match frame {
                Frame::Scope { scope, chain } => {
                    let (scope, chain) = (*scope, *chain);
                    if let Some(i) = self.next_in(scope) {
                        let pushed = self.place(i);
                        stack.push(pushed);
                        continue;
                    }
                    stack.pop();
                    if let Some((f, start)) = chain {
                        let len = (self.order.len() - start) as u16;
                        self.chain_lens.push((f, len));
                        stack.push(self.unlocked(f));
                    }
                }
                Frame::Dependents { list, next } => {
                    let Some(&d) = list.get(*next) else {
                        stack.pop();
                        continue;
                    };
                    *next += 1;
                    if !self.placed[d] && self.missing[d] == 0 {
                        let pushed = self.place(d);
                        stack.push(pushed);
                    }
                }
            }
        }
    }

    /// First ready block of `scope` by id, or a forced one if none is ready.
    fn next_in(&mut self, scope: usize) -> Option<usize> {
        if let Some(&(_, i)) = self.scopes[scope].ready.first() {
            return Some(i);
        }
        let forced = self.scopes[scope]
            .waiting
            .iter()
            .map(|&(id, i)| (self.missing[i], id, i))
            .min()?;
        let (unplaced, _, i) = forced;
        let graph = self.graph;
        let block = &graph.blocks[i];
        warn!(block = block.id, unplaced, "cycle or unreachable dependency, forcing placement");
        self.warnings.push(Diagnostic::warning(
            ErrorCode::CYCLE_OR_UNREACHABLE,
            format!(
                "{} block {} placed with {unplaced} unplaced dependencies",
                block.ty, block.id
            ),
        ));
        Some(i)
    }

    /// Emit block `i` and return the frame that continues after it.
    fn place(&mut self, i: usize) -> Frame {
        let graph = self.graph;
        let key = (graph.id(i), i);
        let scope = &mut self.scopes[graph.scope_of(i)];
        scope.ready.remove(&key);
        scope.waiting.remove(&key);
        self.placed[i] = true;
        self.order.push(i);

        for &c in &graph.dependents[i] {
            self.missing[c] -= 1;
            if self.missing[c] == 0 && !self.placed[c] {
                let key = (graph.id(c), c);
                let scope = &mut self.scopes[graph.scope_of(c)];
                scope.waiting.remove(&key);
                scope.ready.insert(key);
            }
        }

        if graph.blocks[i].ty == BlockType::For {
            Frame::Scope {
                scope: i + 1,
                chain: Some((i, self.order.len())),
            }
        } else {
            self.unlocked(i)
        }
    }

    /// Unplaced dependents of `i`'s cluster in the same scope, sinks first.
    fn unlocked(&self, i: usize) -> Frame {
        let graph = self.graph;
        let owner = graph.owner[i];
        let mut keyed: Vec<(bool, u32, usize)> = graph.cluster[i]
            .iter()
            .flat_map(|&m| graph.dependents[m].iter().copied())
            .filter(|&d| !self.placed[d] && graph.owner[d] == owner)
            .map(|d| (graph.blocks[d].ty != BlockType::SetGlobal, graph.id(d), d))
            .collect();
        keyed.sort_unstable();
        keyed.dedup();
        Frame::Dependents {
            list: keyed.into_iter().map(|(_, _, d)| d).collect(),
            next: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emuflow_codegen::blocks::{Compare, For, Math, SetGlobal};
    use emuflow_codegen::BlockSpec;
    use emuflow_types::Ref;

    fn with_id(mut b: Block, id: u32) -> Block {
        b.id = id;
        b.label = id;
        b
    }

    fn order_ids(blocks: &[Block]) -> Vec<u32> {
        schedule(blocks).order.iter().map(|&i| blocks[i].id).collect()
    }

    #[test]
    fn chain_is_ordered_by_dependency() {
        // 0 reads 2, 2 reads 1: expected 1, 2, 0.
        let blocks = vec![
            with_id(Math::new("a").var("a", Ref::block_output(2, 0)).build().unwrap(), 0),
            with_id(Math::new("a").var("a", Ref::new("x")).build().unwrap(), 1),
            with_id(Math::new("a").var("a", Ref::block_output(1, 0)).build().unwrap(), 2),
        ];
        assert_eq!(order_ids(&blocks), vec![1, 2, 0]);
    }

    #[test]
    fn sinks_follow_their_source() {
        let blocks = vec![
            with_id(Math::new("a").var("a", Ref::new("x")).build().unwrap(), 0),
            with_id(Math::new("a").var("a", Ref::new("x")).build().unwrap(), 1),
            with_id(
                SetGlobal {
                    value: Ref::block_output(0, 0).into(),
                    target: Ref::new("y"),
                }
                .build()
                .unwrap(),
                2,
            ),
        ];
        assert_eq!(order_ids(&blocks), vec![0, 2, 1]);
    }

    #[test]
    fn for_body_is_contiguous() {
        // Constructed out of order: body first, FOR last.
        let blocks = vec![
            with_id(Math::new("a").var("a", Ref::new("x")).en(Ref::block_output(3, 0)).build().unwrap(), 0),
            with_id(Math::new("a").var("a", Ref::new("x")).build().unwrap(), 1),
            with_id(Math::new("a").var("a", Ref::block_output(0, 0)).build().unwrap(), 2),
            with_id(For { en: Ref::block_output(1, 0).into(), limit: 3.0.into(), ..Default::default() }.build().unwrap(), 3),
        ];
        let s = schedule(&blocks);
        let ids: Vec<u32> = s.order.iter().map(|&i| blocks[i].id).collect();
        assert_eq!(ids, vec![1, 3, 0, 2]);
        assert_eq!(s.chain_lens, vec![(3, 2)]);
        assert!(s.warnings.is_empty());
    }

    #[test]
    fn nested_for_counts_inner_body() {
        let blocks = vec![
            with_id(For { limit: 2.0.into(), ..Default::default() }.build().unwrap(), 0),
            with_id(For { en: Ref::block_output(0, 0).into(), ..Default::default() }.build().unwrap(), 1),
            with_id(Math::new("1").en(Ref::block_output(1, 0)).build().unwrap(), 2),
            with_id(Math::new("2").en(Ref::block_output(0, 0)).build().unwrap(), 3),
        ];
        let s = schedule(&blocks);
        let ids: Vec<u32> = s.order.iter().map(|&i| blocks[i].id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        let mut lens = s.chain_lens.clone();
        lens.sort();
        assert_eq!(lens, vec![(0, 3), (1, 1)]);
    }

    #[test]
    fn long_chain_is_ordered_without_recursion() {
        // Block i reads block i + 1; the last one reads a variable.
        const N: u32 = 20_000;
        let blocks: Vec<Block> = (0..N)
            .map(|i| {
                let src = if i + 1 == N { Ref::new("x") } else { Ref::block_output(i + 1, 0) };
                with_id(Math::new("v").var("v", src).build().unwrap(), i)
            })
            .collect();
        let s = schedule(&blocks);
        assert!(s.warnings.is_empty());
        let ids: Vec<u32> = s.order.iter().map(|&i| blocks[i].id).collect();
        assert_eq!(ids, (0..N).rev().collect::<Vec<_>>());
    }

    #[test]
    fn body_readers_of_a_loop_join_its_body() {
        // 1 is enabled by FOR 0; 2 reads 1 so it runs inside the loop too.
        let blocks = vec![
            with_id(For { limit: 4.0.into(), ..Default::default() }.build().unwrap(), 0),
            with_id(Math::new("a").var("a", Ref::new("x")).en(Ref::block_output(0, 0)).build().unwrap(), 1),
            with_id(Math::new("a").var("a", Ref::block_output(1, 0)).build().unwrap(), 2),
            with_id(Math::new("a").var("a", Ref::new("x")).build().unwrap(), 3),
        ];
        let s = schedule(&blocks);
        let ids: Vec<u32> = s.order.iter().map(|&i| blocks[i].id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(s.chain_lens, vec![(0, 2)]);
    }

    #[test]
    fn cycles_are_forced_with_warning() {
        let blocks = vec![
            with_id(Compare::new("a > 0").var("a", Ref::block_output(1, 0)).build().unwrap(), 0),
            with_id(Math::new("a").var("a", Ref::block_output(0, 0)).build().unwrap(), 1),
        ];
        let s = schedule(&blocks);
        assert_eq!(s.order.len(), 2);
        assert_eq!(s.warnings.len(), 1);
        assert_eq!(s.warnings[0].code, ErrorCode::CYCLE_OR_UNREACHABLE);
        // Tie on unplaced deps: the lowest id goes first.
        assert_eq!(blocks[s.order[0]].id, 0);
    }
}
