//! Jump elision by block reordering.

use hashbrown::HashSet;

use crate::function::Function;
use crate::inst::{Block, InstData};

/// Reorders blocks depth-first so unconditional jump targets become
/// fall-throughs, then deletes every `jump next` pair.
pub fn run(func: &mut Function) -> bool {
    let original = func.blocks();
    let mut order: Vec<Block> = Vec::new();
    let mut visited: HashSet<Block> = HashSet::new();
    let mut stack = vec![func.entry()];
    while let Some(block) = stack.pop() {
        if !visited.insert(block) {
            continue;
        }
        order.push(block);
        // Visit the unconditional target last so it lands directly after
        // this block in the order; the stack reverses.
        let insts = func.block_insts(block);
        let mut jump_target = None;
        let mut cond_targets = Vec::new();
        for &inst in insts {
            match func.data(inst) {
                InstData::Jump { target } => jump_target = Some(*target),
                InstData::CondJump { target, .. } => cond_targets.push(*target),
                _ => {}
            }
        }
        for target in cond_targets {
            if !visited.contains(&target) {
                stack.push(target);
            }
        }
        if let Some(target) = jump_target {
            if !visited.contains(&target) {
                stack.push(target);
            }
        }
    }
    // Unreachable blocks keep their relative order at the end.
    for block in original {
        if !visited.contains(&block) {
            order.push(block);
        }
    }
    func.set_layout(order);

    // Remove jumps to the next block in emission order.
    let layout = func.blocks();
    let mut modified = false;
    for (position, &block) in layout.iter().enumerate() {
        let Some(&next) = layout.get(position + 1) else {
            continue;
        };
        let Some(&last) = func.block_insts(block).last() else {
            continue;
        };
        if matches!(*func.data(last), InstData::Jump { target } if target == next) {
            func.erase_inst(last);
            modified = true;
        }
    }
    modified
}
