//! Sparse conditional constant propagation.

use hashbrown::{HashMap, HashSet};

use crate::context::{ConstData, Context};
use crate::entities::{Block, Const, Inst};
use crate::function::Function;
use crate::instruction::InstData;
use crate::passes::util;
use crate::passes::{FunctionPassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: FunctionPassDesc = FunctionPassDesc {
    name: "propconst",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lattice {
    /// Not yet known; may still become constant.
    Top,
    /// Known constant on every executable path.
    Known(Const),
    /// Provably not a constant.
    Bottom,
}

struct Solver<'f> {
    func: &'f Function,
    values: HashMap<Inst, Lattice>,
    executable_edges: HashSet<(Block, Block)>,
    executable_blocks: HashSet<Block>,
    cfg_worklist: Vec<(Block, Block)>,
    ssa_worklist: Vec<Inst>,
}

impl<'f> Solver<'f> {
    fn lattice_of(&self, value: Value) -> Lattice {
        match value {
            Value::Const(c) => Lattice::Known(c),
            Value::Inst(inst) => self.values.get(&inst).copied().unwrap_or(Lattice::Top),
            _ => Lattice::Bottom,
        }
    }

    fn meet(a: Lattice, b: Lattice) -> Lattice {
        match (a, b) {
            (Lattice::Top, x) | (x, Lattice::Top) => x,
            (Lattice::Known(x), Lattice::Known(y)) if x == y => Lattice::Known(x),
            _ => Lattice::Bottom,
        }
    }

    fn set(&mut self, inst: Inst, lattice: Lattice) {
        let old = self.values.get(&inst).copied().unwrap_or(Lattice::Top);
        if old == lattice {
            return;
        }
        // The lattice only descends: Top -> Known -> Bottom.
        self.values.insert(inst, lattice);
        for &user in self.func.users(Value::Inst(inst)) {
            self.ssa_worklist.push(user);
        }
    }

    fn mark_edge(&mut self, from: Block, to: Block) {
        if self.executable_edges.insert((from, to)) {
            self.cfg_worklist.push((from, to));
        }
    }

    fn evaluate(&mut self, ctx: &mut Context, inst: Inst) {
        let block = self.func.inst_block(inst);
        if !self.executable_blocks.contains(&block) {
            return;
        }
        let data = self.func.data(inst).clone();
        match &data {
            InstData::Phi { args } => {
                let mut result = Lattice::Top;
                for (pred, value) in args {
                    if self.executable_edges.contains(&(*pred, block)) {
                        result = Self::meet(result, self.lattice_of(*value));
                    }
                }
                self.set(inst, result);
            }
            InstData::Arith { op, lhs, rhs } => {
                let result = match (self.lattice_of(*lhs), self.lattice_of(*rhs)) {
                    (Lattice::Known(a), Lattice::Known(b)) => {
                        match util::fold_arith(ctx, *op, a, b) {
                            Some(folded) => Lattice::Known(folded),
                            None => Lattice::Bottom,
                        }
                    }
                    (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                    _ => Lattice::Top,
                };
                self.set(inst, result);
            }
            InstData::UnaryArith { op, operand } => {
                let result = match self.lattice_of(*operand) {
                    Lattice::Known(a) => match util::fold_unary(ctx, *op, a) {
                        Some(folded) => Lattice::Known(folded),
                        None => Lattice::Bottom,
                    },
                    other => other,
                };
                self.set(inst, result);
            }
            InstData::Cmp {
                mode,
                rel,
                lhs,
                rhs,
            } => {
                let result = match (self.lattice_of(*lhs), self.lattice_of(*rhs)) {
                    (Lattice::Known(a), Lattice::Known(b)) => {
                        match util::fold_cmp(ctx, *mode, *rel, a, b) {
                            Some(folded) => Lattice::Known(folded),
                            None => Lattice::Bottom,
                        }
                    }
                    (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
                    _ => Lattice::Top,
                };
                self.set(inst, result);
            }
            InstData::Conv { op, operand } => {
                let target = self.func.inst_ty(inst);
                let result = match self.lattice_of(*operand) {
                    Lattice::Known(a) => match util::fold_conv(ctx, *op, a, target) {
                        Some(folded) => Lattice::Known(folded),
                        None => Lattice::Bottom,
                    },
                    other => other,
                };
                self.set(inst, result);
            }
            InstData::Select {
                cond,
                then_value,
                else_value,
            } => {
                let result = match self.lattice_of(*cond) {
                    Lattice::Known(c) => match ctx.const_info(c).data {
                        ConstData::Int(v) if v.is_one() => self.lattice_of(*then_value),
                        ConstData::Int(_) => self.lattice_of(*else_value),
                        _ => Lattice::Bottom,
                    },
                    Lattice::Top => Lattice::Top,
                    Lattice::Bottom => Self::meet(
                        self.lattice_of(*then_value),
                        self.lattice_of(*else_value),
                    ),
                };
                self.set(inst, result);
            }
            InstData::Goto { target } => self.mark_edge(block, *target),
            InstData::Branch {
                cond,
                then_block,
                else_block,
            } => match self.lattice_of(*cond) {
                Lattice::Known(c) => match ctx.const_info(c).data {
                    ConstData::Int(v) if v.is_one() => self.mark_edge(block, *then_block),
                    ConstData::Int(_) => self.mark_edge(block, *else_block),
                    _ => {
                        self.mark_edge(block, *then_block);
                        self.mark_edge(block, *else_block);
                    }
                },
                Lattice::Top => {}
                Lattice::Bottom => {
                    self.mark_edge(block, *then_block);
                    self.mark_edge(block, *else_block);
                }
            },
            _ => {
                if !self.func.inst_ty(inst).is_void() {
                    self.set(inst, Lattice::Bottom);
                }
            }
        }
    }
}

/// Forward sparse conditional constant propagation.
///
/// Propagates constants through SSA and CFG edges simultaneously, folding
/// conversions (including bitcasts) along the way. Instructions proved
/// constant are replaced; branches on constant conditions become gotos.
fn run(ctx: &mut Context, func: &mut Function, _args: &PassArgs) -> bool {
    let entry = func.entry();
    let mut solver = Solver {
        func,
        values: HashMap::new(),
        executable_edges: HashSet::new(),
        executable_blocks: HashSet::new(),
        cfg_worklist: Vec::new(),
        ssa_worklist: Vec::new(),
    };
    solver.executable_blocks.insert(entry);
    for &inst in solver.func.block_insts(entry).to_vec().iter() {
        solver.evaluate(ctx, inst);
    }
    loop {
        if let Some((_, to)) = solver.cfg_worklist.pop() {
            let first_visit = solver.executable_blocks.insert(to);
            if first_visit {
                for &inst in solver.func.block_insts(to) {
                    solver.ssa_worklist.push(inst);
                }
            } else {
                // A new incoming edge refines the phis.
                for phi in solver.func.phis(to) {
                    solver.ssa_worklist.push(phi);
                }
            }
            continue;
        }
        if let Some(inst) = solver.ssa_worklist.pop() {
            solver.evaluate(ctx, inst);
            continue;
        }
        break;
    }

    let values = solver.values;
    let executable_blocks = solver.executable_blocks;
    let mut modified = false;

    // Substitute proven constants.
    for block in func.blocks() {
        if !executable_blocks.contains(&block) {
            continue;
        }
        for inst in func.block_insts(block).to_vec() {
            let Some(Lattice::Known(c)) = values.get(&inst).copied() else {
                continue;
            };
            if func.data(inst).has_side_effects() {
                continue;
            }
            func.replace_inst_with_value(inst, Value::Const(c));
            modified = true;
        }
    }

    // Fold branches whose condition settled on a constant.
    for block in func.blocks() {
        if !executable_blocks.contains(&block) {
            continue;
        }
        let Some(term) = func.terminator(block) else {
            continue;
        };
        let InstData::Branch {
            cond,
            then_block,
            else_block,
        } = *func.data(term)
        else {
            continue;
        };
        let Value::Const(c) = cond else { continue };
        let ConstData::Int(v) = ctx.const_info(c).data else {
            continue;
        };
        let (taken, untaken) = if v.is_one() {
            (then_block, else_block)
        } else {
            (else_block, then_block)
        };
        func.replace_inst_data(term, InstData::Goto { target: taken });
        if untaken != taken {
            func.remove_phi_edges(untaken, block);
        }
        modified = true;
    }

    // Drop code in blocks the solver proved unreachable.
    let reachable = util::reachable_blocks(func);
    let dead: HashSet<Block> = func
        .blocks()
        .into_iter()
        .filter(|b| !reachable.contains(b))
        .collect();
    if !dead.is_empty() {
        util::erase_blocks(ctx, func, &dead);
        modified = true;
    }
    modified
}
