//! Register liveness.

use hashbrown::{HashMap, HashSet};

use crate::function::Function;
use crate::inst::{Block, InstData};
use crate::reg::Reg;

/// Live-in/live-out registers of one block.
#[derive(Debug, Default)]
pub struct LiveSet {
    /// Registers live at block entry.
    pub live_in: HashSet<Reg>,
    /// Registers live at block exit.
    pub live_out: HashSet<Reg>,
}

/// Liveness over a MIR function.
#[derive(Debug, Default)]
pub struct Liveness {
    sets: HashMap<Block, LiveSet>,
}

impl Liveness {
    /// Backward dataflow to a fixpoint. Phi operands count as live out of
    /// the corresponding predecessor; phi destinations are defined at block
    /// entry.
    pub fn compute(func: &Function) -> Self {
        let blocks = func.blocks();
        let mut use_def: HashMap<Block, (HashSet<Reg>, HashSet<Reg>)> = HashMap::new();
        for &block in &blocks {
            let mut uses = HashSet::new();
            let mut defs = HashSet::new();
            for &inst in func.block_insts(block) {
                let data = func.data(inst);
                if !matches!(data, InstData::Phi { .. }) {
                    data.for_each_use(|reg| {
                        if !defs.contains(&reg) {
                            uses.insert(reg);
                        }
                    });
                }
                if let Some(dest) = data.dest() {
                    defs.insert(dest);
                }
            }
            use_def.insert(block, (uses, defs));
        }
        let mut sets: HashMap<Block, LiveSet> =
            blocks.iter().map(|&b| (b, LiveSet::default())).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in blocks.iter().rev() {
                let mut live_out: HashSet<Reg> = HashSet::new();
                for succ in func.succs(block) {
                    for &reg in &sets[&succ].live_in {
                        live_out.insert(reg);
                    }
                    for &inst in func.block_insts(succ) {
                        let InstData::Phi { dest, args, .. } = func.data(inst) else {
                            break;
                        };
                        live_out.remove(dest);
                        if let Some((_, value)) = args.iter().find(|(pred, _)| *pred == block) {
                            if let Some(reg) = value.as_reg() {
                                live_out.insert(reg);
                            }
                        }
                    }
                }
                let (uses, defs) = &use_def[&block];
                let mut live_in: HashSet<Reg> = uses.clone();
                for &reg in &live_out {
                    if !defs.contains(&reg) {
                        live_in.insert(reg);
                    }
                }
                for &inst in func.block_insts(block) {
                    let InstData::Phi { dest, .. } = func.data(inst) else {
                        break;
                    };
                    live_in.insert(*dest);
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
    pub fn of(&self, block: Block) -> &LiveSet {
        &self.sets[&block]
    }
}
