//! The per-block selection DAG.
//!
//! Nodes are the block's instructions; an operand edge from `n` to `m`
//! means `m` computes an operand of `n`. Side-effecting nodes are linked by
//! a chain edge in block order. The matchers query the DAG to decide when a
//! value may be folded into its user (addressing-mode and load fusion).

use hashbrown::HashMap;
use scatha_ir as ir;

/// The DAG of one basic block.
#[derive(Debug)]
pub struct SelectionDag {
    block: ir::Block,
    /// Position of every instruction within the block.
    position: HashMap<ir::Inst, usize>,
    /// Chain positions of side-effecting instructions, in block order.
    chain: Vec<usize>,
}

impl SelectionDag {
    /// Builds the DAG for `block`.
    pub fn build(func: &ir::Function, block: ir::Block) -> Self {
        let mut position = HashMap::new();
        let mut chain = Vec::new();
        for (index, &inst) in func.block_insts(block).iter().enumerate() {
            position.insert(inst, index);
            if func.data(inst).has_side_effects() || matches!(func.data(inst), ir::InstData::Load { .. }) {
                chain.push(index);
            }
        }
        Self {
            block,
            position,
            chain,
        }
    }

    /// `true` if `def`'s only dependent is `user`, both sit in this block,
    /// and no chained (side-effecting) node lies between them. Only then may
    /// `user` absorb `def` into one of its operand positions.
    pub fn can_fold_into(&self, func: &ir::Function, def: ir::Inst, user: ir::Inst) -> bool {
        let (Some(&def_pos), Some(&user_pos)) = (self.position.get(&def), self.position.get(&user))
        else {
            return false;
        };
        if def_pos >= user_pos {
            return false;
        }
        let users = func.users(ir::Value::Inst(def));
        if users.len() != 1 || users[0] != user {
            return false;
        }
        // A chained node strictly between the pair orders a memory effect
        // before the deferred use.
        !self
            .chain
            .iter()
            .any(|&index| index > def_pos && index < user_pos)
    }

    /// The block this DAG describes.
    pub fn block(&self) -> ir::Block {
        self.block
    }
}
