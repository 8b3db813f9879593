//! Per-block live sets of IR values.

use hashbrown::{HashMap, HashSet};

use crate::entities::Block;
use crate::function::Function;
use crate::instruction::InstData;
use crate::value::Value;

/// Live-in and live-out sets of one block.
#[derive(Debug, Default)]
pub struct LiveSet {
    /// Values live at block entry.
    pub live_in: HashSet<Value>,
    /// Values live at block exit.
    pub live_out: HashSet<Value>,
}

/// Liveness of instruction results and parameters across a function.
#[derive(Debug, Default)]
pub struct LiveSets {
    sets: HashMap<Block, LiveSet>,
}

fn is_tracked(value: Value) -> bool {
    matches!(value, Value::Inst(_) | Value::Param(_))
}

impl LiveSets {
    /// Computes liveness by backward dataflow to a fixpoint.
    ///
    /// A phi's incoming value is live out of the corresponding predecessor,
    /// not live in to the phi's block; the phi result is defined at the head
    /// of its block.
    pub fn compute(func: &Function) -> Self {
        let blocks = func.blocks();
        let mut use_def: HashMap<Block, (HashSet<Value>, HashSet<Value>)> = HashMap::new();
        for &block in &blocks {
            let mut uses = HashSet::new();
            let mut defs = HashSet::new();
            for &inst in func.block_insts(block) {
                match func.data(inst) {
                    InstData::Phi { .. } => {
                        // Incoming values are edge uses, handled below.
                    }
                    data => {
                        for operand in data.operands() {
                            if is_tracked(operand) && !defs.contains(&operand) {
                                uses.insert(operand);
                            }
                        }
                    }
                }
                defs.insert(Value::Inst(inst));
            }
            use_def.insert(block, (uses, defs));
        }
        let mut sets: HashMap<Block, LiveSet> = blocks
            .iter()
            .map(|&b| (b, LiveSet::default()))
            .collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in blocks.iter().rev() {
                let mut live_out: HashSet<Value> = HashSet::new();
                for succ in func.succs(block) {
                    let succ_in = &sets[&succ].live_in;
                    for &value in succ_in {
                        live_out.insert(value);
                    }
                    for phi in func.phis(succ) {
                        // The phi result is a def of the successor.
                        live_out.remove(&Value::Inst(phi));
                        if let Some(incoming) = func.data(phi).phi_incoming(block) {
                            if is_tracked(incoming) {
                                live_out.insert(incoming);
                            }
                        }
                    }
                }
                let (uses, defs) = &use_def[&block];
                let mut live_in: HashSet<Value> = uses.clone();
                for &value in &live_out {
                    if !defs.contains(&value) {
                        live_in.insert(value);
                    }
                }
                // Phi results are defined at block entry and thus live in.
                for phi in func.phis(block) {
                    if sets[&block].live_out.contains(&Value::Inst(phi))
                        || !func.users(Value::Inst(phi)).is_empty()
                    {
                        live_in.insert(Value::Inst(phi));
                    }
                }
                let entry = sets.get_mut(&block).unwrap();
                if entry.live_in != live_in || entry.live_out != live_out {
                    entry.live_in = live_in;
                    entry.live_out = live_out;
                    changed = true;
                }
            }
        }
        Self { sets }
    }

    /// The live sets of `block`.
    pub fn find(&self, block: Block) -> Option<&LiveSet> {
        self.sets.get(&block)
    }
}
