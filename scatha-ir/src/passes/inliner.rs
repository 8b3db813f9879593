//! Function inlining.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::analysis::CallGraph;
use crate::context::Context;
use crate::entities::{Block, FuncId, Inst};
use crate::function::Function;
use crate::instruction::InstData;
use crate::module::Module;
use crate::passes::{
    DefaultValue, LocalPasses, ModulePassDesc, ParamDesc, PassArgs, PassCategory,
};
use crate::value::Value;

pub(super) const DESC: ModulePassDesc = ModulePassDesc {
    name: "inline",
    category: PassCategory::Other,
    params: &[
        ParamDesc {
            name: "maxsize",
            default: DefaultValue::Number(128),
        },
        ParamDesc {
            name: "maxdepth",
            default: DefaultValue::Number(4),
        },
    ],
    run,
};

fn function_size(func: &Function) -> usize {
    func.blocks()
        .into_iter()
        .map(|b| func.block_insts(b).len())
        .sum()
}

/// Bottom-up inlining over the call graph.
///
/// Callees are processed (and locally optimized) before their callers, so
/// size decisions see the simplified form. Members of recursive SCCs are
/// never inlined. `maxdepth` bounds how many rounds of newly exposed call
/// sites a single caller absorbs.
fn run(ctx: &mut Context, module: &mut Module, local: &LocalPasses, args: &PassArgs) -> bool {
    let max_size = args.number("maxsize").max(0) as usize;
    let max_depth = args.number("maxdepth").max(0) as usize;
    let graph = CallGraph::compute(module);
    let mut modified = false;
    for scc in graph.sccs().to_vec() {
        for id in scc {
            if module.callable(id).as_defined().is_none() {
                continue;
            }
            modified |= module.with_function_mut(id, |_, func| local.run(ctx, func));
            for _round in 0..max_depth {
                let sites = collect_sites(module, &graph, id, max_size);
                if sites.is_empty() {
                    break;
                }
                for call in sites {
                    inline_call(ctx, module, id, call);
                }
                modified = true;
                module.with_function_mut(id, |_, func| {
                    local.run(ctx, func);
                });
            }
        }
    }
    modified
}

fn collect_sites(
    module: &Module,
    graph: &CallGraph,
    caller: FuncId,
    max_size: usize,
) -> Vec<Inst> {
    let func = module.function(caller);
    let mut sites = Vec::new();
    for block in func.blocks() {
        for &inst in func.block_insts(block) {
            let InstData::Call { callee, .. } = func.data(inst) else {
                continue;
            };
            let Value::Func(callee) = *callee else {
                continue;
            };
            if callee == caller || graph.is_recursive(callee) {
                continue;
            }
            let Some(target) = module.callable(callee).as_defined() else {
                continue;
            };
            if function_size(target) > max_size {
                continue;
            }
            // Cloning walks the dominator tree; unreachable callee blocks
            // would be lost. simplifycfg removes them beforehand.
            if crate::passes::util::reachable_blocks(target).len() != target.num_blocks() {
                continue;
            }
            sites.push(inst);
        }
    }
    sites
}

/// Splices the callee body in place of one call site.
fn inline_call(ctx: &mut Context, module: &mut Module, caller_id: FuncId, call: Inst) {
    module.with_function_mut(caller_id, |module, caller| {
        let InstData::Call { callee, args, .. } = caller.data(call).clone() else {
            unreachable!()
        };
        let Value::Func(callee_id) = callee else {
            unreachable!()
        };
        let site_block = caller.inst_block(call);
        let call_ty = caller.inst_ty(call);

        // Split the site: everything after the call moves to a continuation
        // block.
        let cont = caller.add_block("inline.cont");
        let site_insts = caller.block_insts(site_block).to_vec();
        let call_pos = site_insts.iter().position(|&i| i == call).unwrap();
        for &inst in &site_insts[call_pos + 1..] {
            caller.move_inst_to_end(inst, cont);
        }
        // Successor phis must name the continuation as their predecessor
        // now.
        for succ in caller.succs(cont) {
            for phi in caller.phis(succ) {
                let InstData::Phi { args } = caller.data(phi) else {
                    unreachable!()
                };
                let mut args = args.clone();
                for arg in &mut args {
                    if arg.0 == site_block {
                        arg.0 = cont;
                    }
                }
                caller.replace_inst_data(phi, InstData::Phi { args });
            }
        }

        let callee_func = module.function(callee_id);
        let callee_blocks = callee_func.blocks();
        // Pre-create every block so labels resolve during cloning.
        let mut block_map: HashMap<Block, Block> = HashMap::new();
        for &block in &callee_blocks {
            let name = format!("inline.{}", callee_func.block_name(block));
            let new_block = caller.add_block(&name);
            block_map.insert(block, new_block);
        }

        let mut value_map: HashMap<Inst, Value> = HashMap::new();
        let mut fixups: Vec<(Inst, usize, Inst)> = Vec::new();
        let mut returns: Vec<(Block, Option<Value>)> = Vec::new();
        // Dominator preorder clones every definition before its non-phi
        // uses; phi incomings are patched afterwards.
        let clone_order = callee_func.dominator_tree().preorder();
        for &block in &clone_order {
            let new_block = block_map[&block];
            for &inst in module.function(callee_id).block_insts(block) {
                let callee_func = module.function(callee_id);
                let data = callee_func.data(inst).clone();
                if let InstData::Return { value } = data {
                    let mapped = value.map(|v| {
                        map_operand(ctx, v, &args, &block_map, &value_map, None).0
                    });
                    // Forward-referenced return values cannot occur: a
                    // return's operand dominates it.
                    returns.push((new_block, mapped));
                    let void = ctx.void_type();
                    caller.append_inst(new_block, InstData::Goto { target: cont }, void, None);
                    continue;
                }
                let ty = callee_func.inst_ty(inst);
                let name = callee_func.inst_name(inst).map(str::to_owned);
                let mut pending: Vec<(usize, Inst)> = Vec::new();
                let mut new_data = data;
                let operands = new_data.operands();
                for (index, operand) in operands.iter().enumerate() {
                    let (mapped, fixup) =
                        map_operand(ctx, *operand, &args, &block_map, &value_map, Some(ty));
                    if *operand != mapped {
                        new_data.set_operand(index, mapped);
                    }
                    if let Some(unresolved) = fixup {
                        pending.push((index, unresolved));
                    }
                }
                let new_inst =
                    caller.append_inst(new_block, new_data, ty, name.as_deref());
                value_map.insert(inst, Value::Inst(new_inst));
                for (index, unresolved) in pending {
                    fixups.push((new_inst, index, unresolved));
                }
            }
        }
        for (inst, index, unresolved) in fixups {
            let value = value_map
                .get(&unresolved)
                .copied()
                .expect("callee instruction was never cloned");
            caller.set_operand(inst, index, value);
        }

        // Join the return values.
        let result: Option<Value> = if call_ty.is_void() {
            None
        } else {
            match returns.as_slice() {
                [] => {
                    let undef = ctx.undef(call_ty);
                    Some(Value::Const(undef))
                }
                [(_, value)] => Some(value.expect("non-void return without value")),
                many => {
                    let phi_args: SmallVec<[(Block, Value); 2]> = many
                        .iter()
                        .map(|(block, value)| {
                            (*block, value.expect("non-void return without value"))
                        })
                        .collect();
                    let phi = caller.insert_inst_at(
                        cont,
                        0,
                        InstData::Phi { args: phi_args },
                        call_ty,
                        Some("inline.result"),
                    );
                    Some(Value::Inst(phi))
                }
            }
        };
        if let Some(result) = result {
            caller.replace_all_uses(Value::Inst(call), result);
        }
        caller.erase_inst(call);
        let entry_clone = block_map[&callee_blocks[0]];
        let void = ctx.void_type();
        caller.append_inst(
            site_block,
            InstData::Goto {
                target: entry_clone,
            },
            void,
            None,
        );
        // Layout: the continuation reads best after the spliced body.
        let end = caller.num_blocks() - 1;
        caller.move_block(cont, end);
    });
}

/// Maps a callee operand into the caller. Returns the mapped value and, for
/// instruction results not yet cloned, the original instruction to patch in
/// later (the returned value is then a placeholder).
fn map_operand(
    ctx: &mut Context,
    operand: Value,
    args: &SmallVec<[Value; 4]>,
    block_map: &HashMap<Block, Block>,
    value_map: &HashMap<Inst, Value>,
    placeholder_ty: Option<crate::entities::Type>,
) -> (Value, Option<Inst>) {
    match operand {
        Value::Inst(inst) => match value_map.get(&inst) {
            Some(&mapped) => (mapped, None),
            None => {
                // Forward reference (phis only); patched after cloning.
                let ty = placeholder_ty.expect("forward reference outside a phi");
                let undef = ctx.undef(ty);
                (Value::Const(undef), Some(inst))
            }
        },
        Value::Param(index) => (args[index as usize], None),
        Value::Block(block) => (Value::Block(block_map[&block]), None),
        other => (other, None),
    }
}
