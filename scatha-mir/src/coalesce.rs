//! Copy coalescing.

use crate::function::Function;
use crate::inst::{InstData, Value};
use crate::reg::RegClass;
use crate::regalloc::InterferenceGraph;

/// Merges `copy a <- b` pairs whose live ranges do not interfere, removing
/// the copy. Conservative about precoloring: two registers with different
/// hardware constraints never merge. The interference graph is rebuilt
/// after every merge, so the pass is quadratic but safe.
pub fn run(func: &mut Function) -> bool {
    let mut modified = false;
    loop {
        let graph = InterferenceGraph::build(func);
        let mut merged = false;
        'search: for block in func.blocks() {
            for inst in func.block_insts(block).to_vec() {
                let InstData::Copy { dest, src, .. } = *func.data(inst) else {
                    continue;
                };
                let Value::Reg(src) = src else { continue };
                if dest.class != RegClass::Virtual || src.class != RegClass::Virtual {
                    continue;
                }
                if dest == src {
                    func.erase_inst(inst);
                    merged = true;
                    break 'search;
                }
                if graph.interfere(dest, src) {
                    continue;
                }
                match (func.precolored.get(&dest), func.precolored.get(&src)) {
                    (Some(a), Some(b)) if a != b => continue,
                    _ => {}
                }
                // Merge src into dest; the graph is stale afterwards, so
                // restart the sweep.
                if let Some(&color) = func.precolored.get(&src) {
                    func.precolored.insert(dest, color);
                }
                func.erase_inst(inst);
                func.replace_uses(src, Value::Reg(dest));
                func.replace_defs(src, dest);
                func.precolored.remove(&src);
                merged = true;
                break 'search;
            }
        }
        if !merged {
            return modified;
        }
        modified = true;
    }
}
