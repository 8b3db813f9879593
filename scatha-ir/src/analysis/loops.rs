//! Loop nesting forest.
//!
//! Loops are discovered from back edges over the dominator tree; every
//! proper loop has a unique header, and loops nest or are disjoint. Latches
//! with a common header form one loop.

use std::rc::Rc;

use hashbrown::{HashMap, HashSet};

use crate::entities::Block;
use crate::function::Function;

/// A natural loop.
#[derive(Debug)]
pub struct Loop {
    /// The unique header; dominates every block of the loop.
    pub header: Block,
    /// All blocks of the loop, including the header.
    pub blocks: HashSet<Block>,
    /// Blocks with a back edge to the header.
    pub latches: Vec<Block>,
    /// Index of the innermost enclosing loop.
    pub parent: Option<usize>,
    /// Indices of the directly nested loops.
    pub children: Vec<usize>,
}

impl Loop {
    /// Blocks outside the loop with a predecessor inside.
    pub fn exit_blocks(&self, func: &Function) -> Vec<Block> {
        let mut exits = Vec::new();
        for &block in &self.blocks {
            for succ in func.succs(block) {
                if !self.blocks.contains(&succ) && !exits.contains(&succ) {
                    exits.push(succ);
                }
            }
        }
        exits
    }
}

/// All loops of a function, with their nesting.
#[derive(Debug, Default)]
pub struct LoopForest {
    loops: Vec<Loop>,
    header_of: HashMap<Block, usize>,
    innermost: HashMap<Block, usize>,
}

impl LoopForest {
    /// Computes the loop forest of `func`.
    pub fn compute(func: &Function) -> Self {
        let dom = func.dominator_tree();
        // Back edges, grouped by header in layout order.
        let mut latches_of: HashMap<Block, Vec<Block>> = HashMap::new();
        let mut headers = Vec::new();
        for block in func.blocks() {
            for succ in func.succs(block) {
                if dom.dominates(succ, block) {
                    if !latches_of.contains_key(&succ) {
                        headers.push(succ);
                    }
                    latches_of.entry(succ).or_default().push(block);
                }
            }
        }
        let mut loops = Vec::new();
        for header in headers {
            let latches = latches_of.remove(&header).unwrap();
            let mut blocks = HashSet::new();
            blocks.insert(header);
            let mut stack = latches.clone();
            while let Some(block) = stack.pop() {
                if !blocks.insert(block) {
                    continue;
                }
                for pred in func.preds(block) {
                    if !blocks.contains(&pred) && dom.is_reachable(pred) {
                        stack.push(pred);
                    }
                }
            }
            loops.push(Loop {
                header,
                blocks,
                latches,
                parent: None,
                children: Vec::new(),
            });
        }
        // Nesting: the parent is the smallest other loop containing the
        // header.
        let mut order: Vec<usize> = (0..loops.len()).collect();
        order.sort_by_key(|&i| loops[i].blocks.len());
        for position in 0..order.len() {
            let child = order[position];
            for &candidate in &order[position + 1..] {
                if loops[candidate].blocks.contains(&loops[child].header) {
                    loops[child].parent = Some(candidate);
                    loops[candidate].children.push(child);
                    break;
                }
            }
        }
        let mut header_of = HashMap::new();
        let mut innermost: HashMap<Block, usize> = HashMap::new();
        // Assign blocks to loops from outermost to innermost so the smaller
        // loop wins.
        let mut by_size_desc = order;
        by_size_desc.reverse();
        for &index in &by_size_desc {
            header_of.insert(loops[index].header, index);
            for &block in &loops[index].blocks {
                innermost.insert(block, index);
            }
        }
        Self {
            loops,
            header_of,
            innermost,
        }
    }

    /// All loops.
    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// The loop headed by `block`, if any.
    pub fn loop_with_header(&self, block: Block) -> Option<&Loop> {
        self.header_of.get(&block).map(|&i| &self.loops[i])
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost_loop(&self, block: Block) -> Option<&Loop> {
        self.innermost.get(&block).map(|&i| &self.loops[i])
    }

    /// Loop nesting depth of `block`; 0 outside any loop.
    pub fn depth(&self, block: Block) -> usize {
        let mut depth = 0;
        let mut current = self.innermost.get(&block).copied();
        while let Some(index) = current {
            depth += 1;
            current = self.loops[index].parent;
        }
        depth
    }
}

impl Function {
    /// The function's loop forest, cached until the CFG changes.
    pub fn loop_forest(&self) -> Rc<LoopForest> {
        let epoch = self.cfg_epoch();
        if let Some((cached_epoch, forest)) = &*self.loop_cache.borrow() {
            if *cached_epoch == epoch {
                return Rc::clone(forest);
            }
        }
        let forest = Rc::new(LoopForest::compute(self));
        *self.loop_cache.borrow_mut() = Some((epoch, Rc::clone(&forest)));
        forest
    }
}
