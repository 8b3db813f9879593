//! Module-level dead code elimination: unreferenced functions and globals.

use hashbrown::HashSet;

use crate::analysis::CallGraph;
use crate::context::Context;
use crate::entities::{FuncId, GlobalId};
use crate::function::Visibility;
use crate::module::Module;
use crate::passes::{LocalPasses, ModulePassDesc, PassArgs, PassCategory};
use crate::value::Value;

pub(super) const DESC: ModulePassDesc = ModulePassDesc {
    name: "deadfuncelim",
    category: PassCategory::Simplification,
    params: &[],
    run,
};

pub(super) const GLOBAL_DCE_DESC: ModulePassDesc = ModulePassDesc {
    name: "globaldce",
    category: PassCategory::Simplification,
    params: &[],
    run: run_global_dce,
};

/// Deletes functions not reachable from any externally visible function.
fn run(ctx: &mut Context, module: &mut Module, _local: &LocalPasses, _args: &PassArgs) -> bool {
    let _ = ctx;
    let graph = CallGraph::compute(module);
    let mut live: HashSet<FuncId> = HashSet::new();
    let mut worklist: Vec<FuncId> = Vec::new();
    for id in module.function_ids() {
        if module.function(id).visibility() == Visibility::External {
            live.insert(id);
            worklist.push(id);
        }
    }
    while let Some(id) = worklist.pop() {
        for &callee in graph.callees(id) {
            if module.callable(callee).as_defined().is_some() && live.insert(callee) {
                worklist.push(callee);
            }
        }
    }
    let dead: Vec<FuncId> = module
        .function_ids()
        .into_iter()
        .filter(|id| !live.contains(id))
        .collect();
    if dead.is_empty() {
        return false;
    }
    for id in &dead {
        tracing::debug!(function = module.function(*id).name(), "removing dead function");
        module.erase_function(*id);
    }
    true
}

/// Deletes internal globals no live function references.
fn run_global_dce(
    ctx: &mut Context,
    module: &mut Module,
    _local: &LocalPasses,
    _args: &PassArgs,
) -> bool {
    let _ = ctx;
    let mut used: HashSet<GlobalId> = HashSet::new();
    for id in module.function_ids() {
        let func = module.function(id);
        for block in func.blocks() {
            for &inst in func.block_insts(block) {
                for operand in func.data(inst).operands() {
                    if let Value::Global(global) = operand {
                        used.insert(global);
                    }
                }
            }
        }
    }
    let dead: Vec<GlobalId> = module
        .global_ids()
        .into_iter()
        .filter(|&id| {
            module.global(id).visibility == Visibility::Internal && !used.contains(&id)
        })
        .collect();
    if dead.is_empty() {
        return false;
    }
    for id in dead {
        module.erase_global(id);
    }
    true
}
