//! Interference graph and graph-coloring register allocation.

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::function::Function;
use crate::inst::{Address, InstData, Value};
use crate::liveness::Liveness;
use crate::reg::{Reg, RegClass};

/// Pairwise interference of registers: an edge connects two registers that
/// are simultaneously live at some program point.
#[derive(Debug, Default)]
pub struct InterferenceGraph {
    adj: HashMap<Reg, HashSet<Reg>>,
}

impl InterferenceGraph {
    /// Builds the graph from liveness. The source and destination of a plain
    /// copy do not interfere through the copy itself, which is what lets the
    /// coalescer merge them.
    pub fn build(func: &Function) -> Self {
        let liveness = Liveness::compute(func);
        let mut graph = Self::default();
        for block in func.blocks() {
            let mut live: HashSet<Reg> = liveness.of(block).live_out.clone();
            for &inst in func.block_insts(block).to_vec().iter().rev() {
                let data = func.data(inst);
                let copy_src = match data {
                    InstData::Copy { src, .. } => src.as_reg(),
                    _ => None,
                };
                if let Some(dest) = data.dest() {
                    for &other in &live {
                        if other != dest && Some(other) != copy_src {
                            graph.add_edge(dest, other);
                        }
                    }
                    live.remove(&dest);
                }
                data.for_each_use(|reg| {
                    live.insert(reg);
                });
            }
        }
        graph
    }

    fn add_edge(&mut self, a: Reg, b: Reg) {
        self.adj.entry(a).or_default().insert(b);
        self.adj.entry(b).or_default().insert(a);
    }

    /// `true` if the registers interfere.
    pub fn interfere(&self, a: Reg, b: Reg) -> bool {
        self.adj.get(&a).is_some_and(|n| n.contains(&b))
    }

    /// The neighbors of `reg`.
    pub fn neighbors(&self, reg: Reg) -> impl Iterator<Item = Reg> + '_ {
        self.adj.get(&reg).into_iter().flatten().copied()
    }
}

/// Assigns every virtual register a hardware index from a palette of `k`
/// colors, spilling live ranges to stack slots when the graph is not
/// k-colorable.
///
/// Chaitin-Briggs shape: simplify nodes of insignificant degree, pick spill
/// candidates by spill weight (uses over degree) when stuck, optimistically
/// select on unwind. Ties break toward the smallest register index.
pub fn allocate(func: &mut Function, k: u32) {
    loop {
        let spilled = try_allocate(func, k);
        if spilled.is_empty() {
            break;
        }
        rewrite_spills(func, &spilled);
    }
    let mut max_index = func.num_params.max(func.num_ret_words);
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            let data = func.data(inst);
            if let Some(dest) = data.dest() {
                if dest.class == RegClass::Hardware {
                    max_index = max_index.max(dest.index + 1);
                }
            }
            data.for_each_use(|reg| {
                if reg.class == RegClass::Hardware {
                    max_index = max_index.max(reg.index + 1);
                }
            });
        }
    }
    func.num_hardware_regs = max_index;
}

/// One coloring attempt. Returns the registers chosen for spilling; empty
/// means every virtual register was colored and rewritten.
fn try_allocate(func: &mut Function, k: u32) -> Vec<Reg> {
    let graph = InterferenceGraph::build(func);
    let virtuals: Vec<Reg> = (0..func.reg_count(RegClass::Virtual))
        .map(Reg::virt)
        .filter(|&reg| !func.defs(reg).is_empty() || !func.uses(reg).is_empty())
        .collect();
    let mut degree: HashMap<Reg, usize> = virtuals
        .iter()
        .map(|&reg| {
            let d = graph
                .neighbors(reg)
                .filter(|n| n.class == RegClass::Virtual || n.class == RegClass::Hardware)
                .count();
            (reg, d)
        })
        .collect();
    let weight = |func: &Function, reg: Reg| func.uses(reg).len() + func.defs(reg).len();

    // Simplify phase, in deterministic register-index order. Precolored
    // virtuals never enter the stack.
    let mut stack: Vec<Reg> = Vec::new();
    let mut remaining: Vec<Reg> = virtuals
        .iter()
        .copied()
        .filter(|reg| !func.precolored.contains_key(reg))
        .sorted()
        .collect();
    while !remaining.is_empty() {
        let position = remaining
            .iter()
            .position(|&reg| degree.get(&reg).copied().unwrap_or(0) < k as usize);
        let index = match position {
            Some(index) => index,
            None => {
                // Blocked: push the cheapest live range optimistically; if
                // selection cannot color it, it spills.
                remaining
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, &reg)| {
                        let d = degree.get(&reg).copied().unwrap_or(1).max(1);
                        (weight(func, reg) * 1000 / d, reg)
                    })
                    .map(|(i, _)| i)
                    .unwrap()
            }
        };
        let reg = remaining.remove(index);
        stack.push(reg);
        for neighbor in graph.neighbors(reg) {
            if let Some(d) = degree.get_mut(&neighbor) {
                *d = d.saturating_sub(1);
            }
        }
    }

    // Select phase.
    let mut colors: HashMap<Reg, u32> = func.precolored.clone();
    let mut spilled: Vec<Reg> = Vec::new();
    while let Some(reg) = stack.pop() {
        let mut taken: HashSet<u32> = HashSet::new();
        for neighbor in graph.neighbors(reg) {
            match neighbor.class {
                RegClass::Hardware => {
                    taken.insert(neighbor.index);
                }
                RegClass::Virtual => {
                    if let Some(&color) = colors.get(&neighbor) {
                        taken.insert(color);
                    }
                }
                _ => {}
            }
        }
        match (0..k).find(|color| !taken.contains(color)) {
            Some(color) => {
                colors.insert(reg, color);
            }
            None => spilled.push(reg),
        }
    }
    if !spilled.is_empty() {
        return spilled;
    }
    // Rewrite every virtual register to its hardware color.
    for reg in virtuals {
        let color = colors[&reg];
        let hardware = Reg::hardware(color);
        func.replace_uses(reg, Value::Reg(hardware));
        func.replace_defs(reg, hardware);
    }
    func.precolored.clear();
    Vec::new()
}

/// Materializes spilled registers as stack slots: a frame allocated at
/// entry, a load before every use, a store after every def.
fn rewrite_spills(func: &mut Function, spilled: &[Reg]) {
    let frame = func.new_reg(RegClass::Virtual);
    let total = (spilled.len() * 8) as u64;
    let entry = func.entry();
    func.insert_inst_at(
        entry,
        0,
        InstData::LIncSP {
            dest: frame,
            size: Value::Const(crate::inst::Constant {
                value: total,
                bytes: 2,
            }),
        },
    );
    for (slot, &reg) in spilled.iter().enumerate() {
        let offset = (slot * 8) as u8;
        let addr = Address {
            base: frame,
            dynamic: None,
            factor: 0,
            term: offset,
        };
        for inst in func.uses(reg).to_vec() {
            let temp = func.new_reg(RegClass::Virtual);
            func.insert_inst_before(
                inst,
                InstData::Load {
                    dest: temp,
                    addr,
                    bytes: 8,
                },
            );
            let mut data = func.data(inst).clone();
            data.replace_use(reg, Value::Reg(temp));
            func.replace_inst_data(inst, data);
        }
        for inst in func.defs(reg).to_vec() {
            let temp = func.new_reg(RegClass::Virtual);
            let mut data = func.data(inst).clone();
            data.set_dest(temp);
            func.replace_inst_data(inst, data);
            let block = func.inst_block(inst);
            let position = func
                .block_insts(block)
                .iter()
                .position(|&i| i == inst)
                .unwrap();
            func.insert_inst_at(
                block,
                position + 1,
                InstData::Store {
                    addr,
                    src: Value::Reg(temp),
                    bytes: 8,
                },
            );
        }
    }
    tracing::debug!(function = func.name.as_str(), count = spilled.len(), "spilled registers");
}
