//! Dominator tree and dominance frontiers.
//!
//! Built with the Lengauer-Tarjan algorithm (the simple eval-link variant).
//! Blocks not reachable from the entry are absent from the tree: they have no
//! immediate dominator, dominate nothing, and have empty frontiers.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::entities::Block;
use crate::function::Function;

/// The immediate-dominator tree of a function's CFG, with dominance
/// frontiers.
#[derive(Debug)]
pub struct DomTree {
    idom: HashMap<Block, Block>,
    children: HashMap<Block, Vec<Block>>,
    frontiers: HashMap<Block, Vec<Block>>,
    // Euler intervals over the dominator tree for O(1) dominance queries.
    intervals: HashMap<Block, (u32, u32)>,
    entry: Block,
}

struct LengauerTarjan<'f> {
    func: &'f Function,
    dfnum: HashMap<Block, usize>,
    vertex: Vec<Block>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    ancestor: Vec<Option<usize>>,
    label: Vec<usize>,
    idom: Vec<usize>,
    buckets: Vec<Vec<usize>>,
}

impl<'f> LengauerTarjan<'f> {
    fn new(func: &'f Function) -> Self {
        Self {
            func,
            dfnum: HashMap::new(),
            vertex: Vec::new(),
            parent: Vec::new(),
            semi: Vec::new(),
            ancestor: Vec::new(),
            label: Vec::new(),
            idom: Vec::new(),
            buckets: Vec::new(),
        }
    }

    fn dfs(&mut self, entry: Block) {
        let mut stack = vec![(entry, usize::MAX)];
        while let Some((block, parent)) = stack.pop() {
            if self.dfnum.contains_key(&block) {
                continue;
            }
            let number = self.vertex.len();
            self.dfnum.insert(block, number);
            self.vertex.push(block);
            self.parent.push(parent);
            self.semi.push(number);
            self.ancestor.push(None);
            self.label.push(number);
            self.idom.push(usize::MAX);
            self.buckets.push(Vec::new());
            // Push in reverse so successors are visited in terminator order.
            for succ in self.func.succs(block).into_iter().rev() {
                if !self.dfnum.contains_key(&succ) {
                    stack.push((succ, number));
                }
            }
        }
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v].is_none() {
            return self.label[v];
        }
        self.compress(v);
        self.label[v]
    }

    fn compress(&mut self, v: usize) {
        // Iterative path compression.
        let mut path = Vec::new();
        let mut current = v;
        while let Some(a) = self.ancestor[current] {
            if self.ancestor[a].is_none() {
                break;
            }
            path.push(current);
            current = a;
        }
        for &node in path.iter().rev() {
            let a = self.ancestor[node].unwrap();
            if self.semi[self.label[a]] < self.semi[self.label[node]] {
                self.label[node] = self.label[a];
            }
            self.ancestor[node] = self.ancestor[a];
        }
    }

    fn run(mut self, entry: Block) -> HashMap<Block, Block> {
        self.dfs(entry);
        let n = self.vertex.len();
        for w in (1..n).rev() {
            let block = self.vertex[w];
            for pred in self.func.preds(block) {
                let Some(&u) = self.dfnum.get(&pred) else {
                    continue; // Unreachable predecessor.
                };
                let evaluated = self.eval(u);
                if self.semi[evaluated] < self.semi[w] {
                    self.semi[w] = self.semi[evaluated];
                }
            }
            let semi_w = self.semi[w];
            self.buckets[semi_w].push(w);
            let parent = self.parent[w];
            self.ancestor[w] = Some(parent);
            let bucket = std::mem::take(&mut self.buckets[parent]);
            for v in bucket {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] < self.semi[v] { u } else { parent };
            }
        }
        for w in 1..n {
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }
        let mut result = HashMap::new();
        for w in 1..n {
            result.insert(self.vertex[w], self.vertex[self.idom[w]]);
        }
        result
    }
}

impl DomTree {
    /// Computes the dominator tree of `func`.
    pub fn compute(func: &Function) -> Self {
        let entry = func.entry();
        let idom = LengauerTarjan::new(func).run(entry);
        let mut children: HashMap<Block, Vec<Block>> = HashMap::new();
        // Deterministic child order: layout order.
        for block in func.blocks() {
            if let Some(&parent) = idom.get(&block) {
                children.entry(parent).or_default().push(block);
            }
        }
        let mut tree = Self {
            idom,
            children,
            frontiers: HashMap::new(),
            intervals: HashMap::new(),
            entry,
        };
        tree.number_tree();
        tree.compute_frontiers(func);
        tree
    }

    fn number_tree(&mut self) {
        let mut counter = 0u32;
        let mut stack = vec![(self.entry, false)];
        let mut starts: HashMap<Block, u32> = HashMap::new();
        while let Some((block, closing)) = stack.pop() {
            if closing {
                let start = starts[&block];
                self.intervals.insert(block, (start, counter));
                continue;
            }
            starts.insert(block, counter);
            counter += 1;
            stack.push((block, true));
            if let Some(children) = self.children.get(&block) {
                for &child in children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
    }

    fn compute_frontiers(&mut self, func: &Function) {
        for block in func.blocks() {
            let preds: Vec<Block> = func
                .preds(block)
                .into_iter()
                .filter(|p| self.is_reachable(*p))
                .collect();
            if preds.len() < 2 {
                continue;
            }
            let Some(&idom) = self.idom.get(&block) else {
                continue;
            };
            for pred in preds {
                let mut runner = pred;
                while runner != idom {
                    let frontier = self.frontiers.entry(runner).or_default();
                    if !frontier.contains(&block) {
                        frontier.push(block);
                    }
                    match self.idom.get(&runner) {
                        Some(&next) => runner = next,
                        None => break,
                    }
                }
            }
        }
    }

    /// The entry block.
    pub fn entry(&self) -> Block {
        self.entry
    }

    /// `true` if `block` is reachable from the entry.
    pub fn is_reachable(&self, block: Block) -> bool {
        self.intervals.contains_key(&block)
    }

    /// The immediate dominator, `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.idom.get(&block).copied()
    }

    /// The blocks immediately dominated by `block`.
    pub fn children(&self, block: Block) -> &[Block] {
        self.children.get(&block).map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// `true` if `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        match (self.intervals.get(&a), self.intervals.get(&b)) {
            (Some(&(a_in, a_out)), Some(&(b_in, _))) => a_in <= b_in && b_in < a_out,
            _ => false,
        }
    }

    /// `true` if `a` strictly dominates `b`.
    pub fn strictly_dominates(&self, a: Block, b: Block) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The dominance frontier of `block`.
    pub fn frontier(&self, block: Block) -> &[Block] {
        self.frontiers
            .get(&block)
            .map(|f| f.as_slice())
            .unwrap_or(&[])
    }

    /// Preorder walk of the dominator tree.
    pub fn preorder(&self) -> Vec<Block> {
        let mut order = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            order.push(block);
            for &child in self.children(block).iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

impl Function {
    /// The function's dominator tree, cached until the CFG changes.
    pub fn dominator_tree(&self) -> Rc<DomTree> {
        let epoch = self.cfg_epoch();
        if let Some((cached_epoch, tree)) = &*self.dom_cache.borrow() {
            if *cached_epoch == epoch {
                return Rc::clone(tree);
            }
        }
        let tree = Rc::new(DomTree::compute(self));
        *self.dom_cache.borrow_mut() = Some((epoch, Rc::clone(&tree)));
        tree
    }
}
