//! Optimization passes, their registry, and the pipeline language.
//!
//! Passes come in two shapes. A *function pass* rewrites one function; a
//! *module pass* owns the traversal over the module and receives a sequence
//! of function passes to run where it sees fit (`foreach` runs them on every
//! function, `inline` runs them bottom-up over the call graph). The
//! process-wide registry is built once by [`PassManager::builtin`] and read
//! only afterwards.

mod dce;
mod dead_func_elim;
mod gvn;
mod inliner;
mod instcombine;
mod loop_rotate;
mod mem2reg;
mod pipeline;
mod propconst;
mod returns;
mod simplifycfg;
mod sroa;
mod tre;
pub(crate) mod util;

use std::sync::OnceLock;

use hashbrown::HashMap;

use crate::context::Context;
use crate::function::Function;
use crate::module::Module;

pub use pipeline::{Pipeline, PipelineError};

/// What a pass is allowed to assume and must preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassCategory {
    /// Rewrites toward the canonical form other passes expect.
    Canonicalization,
    /// Removes or simplifies code without changing the canonical shape.
    Simplification,
    /// Orders other passes; has no effect of its own.
    Schedule,
    /// Everything else.
    Other,
}

/// Type and default of one named pass parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamDesc {
    /// Parameter name.
    pub name: &'static str,
    /// Default value, which also fixes the type.
    pub default: DefaultValue,
}

/// Schema default of a pass parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    /// Boolean flag.
    Flag(bool),
    /// Integer.
    Number(i64),
    /// String.
    String(&'static str),
}

/// A pass argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Boolean flag.
    Flag(bool),
    /// Integer.
    Number(i64),
    /// String.
    String(String),
}

/// Arguments of one pass invocation, with defaults filled in.
#[derive(Debug, Clone, Default)]
pub struct PassArgs {
    values: HashMap<String, ArgValue>,
}

impl PassArgs {
    /// Arguments holding exactly the schema defaults.
    pub fn defaults(params: &[ParamDesc]) -> Self {
        let mut args = Self::default();
        for param in params {
            let value = match param.default {
                DefaultValue::Flag(v) => ArgValue::Flag(v),
                DefaultValue::Number(v) => ArgValue::Number(v),
                DefaultValue::String(v) => ArgValue::String(v.to_owned()),
            };
            args.values.insert(param.name.to_owned(), value);
        }
        args
    }

    pub(crate) fn set(&mut self, name: &str, value: ArgValue) {
        self.values.insert(name.to_owned(), value);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// A flag argument.
    ///
    /// # Panics
    /// If the argument is missing or not a flag; the pipeline parser
    /// guarantees both.
    pub fn flag(&self, name: &str) -> bool {
        match self.values.get(name) {
            Some(ArgValue::Flag(v)) => *v,
            _ => panic!("missing flag argument '{name}'"),
        }
    }

    /// A number argument.
    pub fn number(&self, name: &str) -> i64 {
        match self.values.get(name) {
            Some(ArgValue::Number(v)) => *v,
            _ => panic!("missing number argument '{name}'"),
        }
    }

    /// A string argument.
    pub fn string(&self, name: &str) -> &str {
        match self.values.get(name) {
            Some(ArgValue::String(v)) => v,
            _ => panic!("missing string argument '{name}'"),
        }
    }
}

/// Entry point of a function pass. Returns `true` if the IR changed.
pub type FunctionPassFn = fn(&mut Context, &mut Function, &PassArgs) -> bool;

/// Entry point of a module pass. Returns `true` if the IR changed.
pub type ModulePassFn = fn(&mut Context, &mut Module, &LocalPasses, &PassArgs) -> bool;

/// Entry point of a loop pass. Returns `true` if the IR changed.
pub type LoopPassFn = fn(&mut Context, &mut Function, &crate::analysis::Loop) -> bool;

/// Registered function pass.
#[derive(Debug, Clone, Copy)]
pub struct FunctionPassDesc {
    /// Unique pass name.
    pub name: &'static str,
    /// Category.
    pub category: PassCategory,
    /// Argument schema.
    pub params: &'static [ParamDesc],
    /// Entry point.
    pub run: FunctionPassFn,
}

/// Registered module pass.
#[derive(Debug, Clone, Copy)]
pub struct ModulePassDesc {
    /// Unique pass name.
    pub name: &'static str,
    /// Category.
    pub category: PassCategory,
    /// Argument schema.
    pub params: &'static [ParamDesc],
    /// Entry point.
    pub run: ModulePassFn,
}

/// The function passes a module pass applies where its traversal decides.
#[derive(Debug, Clone, Default)]
pub struct LocalPasses {
    passes: Vec<(FunctionPassDesc, PassArgs)>,
}

impl LocalPasses {
    /// Creates the sequence.
    pub fn new(passes: Vec<(FunctionPassDesc, PassArgs)>) -> Self {
        Self { passes }
    }

    /// `true` if no passes were supplied.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// The contained pass descriptors and arguments.
    pub fn passes(&self) -> &[(FunctionPassDesc, PassArgs)] {
        &self.passes
    }

    /// Runs the sequence once over `func`.
    pub fn run(&self, ctx: &mut Context, func: &mut Function) -> bool {
        let mut modified = false;
        for (desc, args) in &self.passes {
            let changed = (desc.run)(ctx, func, args);
            tracing::debug!(pass = desc.name, function = func.name(), changed);
            modified |= changed;
        }
        modified
    }
}

/// Runs a loop pass over every loop of `func`, innermost loops first.
pub fn run_loop_pass(ctx: &mut Context, func: &mut Function, pass: LoopPassFn) -> bool {
    let forest = func.loop_forest();
    // Innermost first: deeper loops sort later, so iterate by depth
    // descending.
    let mut order: Vec<usize> = (0..forest.loops().len()).collect();
    order.sort_by_key(|&i| core::cmp::Reverse(forest.depth(forest.loops()[i].header)));
    let mut modified = false;
    for index in order {
        modified |= pass(ctx, func, &forest.loops()[index]);
    }
    modified
}

fn foreach(ctx: &mut Context, module: &mut Module, local: &LocalPasses, _args: &PassArgs) -> bool {
    let mut modified = false;
    for id in module.function_ids() {
        modified |= module.with_function_mut(id, |_, func| local.run(ctx, func));
    }
    modified
}

fn run_default(ctx: &mut Context, module: &mut Module, _local: &LocalPasses, _args: &PassArgs) -> bool {
    default_pipeline().run(ctx, module)
}

/// The pipeline `scathac --optimize` runs.
pub fn default_pipeline() -> &'static Pipeline {
    static PIPELINE: OnceLock<Pipeline> = OnceLock::new();
    PIPELINE.get_or_init(|| {
        Pipeline::parse(
            "inline(unifyreturns, sroa, memtoreg, instcombine, propconst, dce, simplifycfg, \
             gvn, tre, loopro, instcombine, propconst, dce, simplifycfg), \
             deadfuncelim, globaldce",
        )
        .expect("default pipeline must parse")
    })
}

/// The process-wide pass registry.
#[derive(Debug, Default)]
pub struct PassManager {
    function: Vec<FunctionPassDesc>,
    module: Vec<ModulePassDesc>,
}

impl PassManager {
    /// Builds a registry holding every builtin pass.
    pub fn builtin() -> Self {
        let mut pm = Self::default();
        pm.register_function_pass(dce::DESC);
        pm.register_function_pass(gvn::DESC);
        pm.register_function_pass(instcombine::DESC);
        pm.register_function_pass(loop_rotate::DESC);
        pm.register_function_pass(mem2reg::DESC);
        pm.register_function_pass(propconst::DESC);
        pm.register_function_pass(returns::SPLIT_DESC);
        pm.register_function_pass(returns::UNIFY_DESC);
        pm.register_function_pass(simplifycfg::DESC);
        pm.register_function_pass(simplifycfg::SPLIT_EDGES_DESC);
        pm.register_function_pass(sroa::DESC);
        pm.register_function_pass(tre::DESC);
        pm.register_module_pass(ModulePassDesc {
            name: "foreach",
            category: PassCategory::Schedule,
            params: &[],
            run: foreach,
        });
        pm.register_module_pass(ModulePassDesc {
            name: "default",
            category: PassCategory::Schedule,
            params: &[],
            run: run_default,
        });
        pm.register_module_pass(inliner::DESC);
        pm.register_module_pass(dead_func_elim::DESC);
        pm.register_module_pass(dead_func_elim::GLOBAL_DCE_DESC);
        pm
    }

    /// The registry the pipeline parser uses, built on first access.
    pub fn global() -> &'static PassManager {
        static REGISTRY: OnceLock<PassManager> = OnceLock::new();
        REGISTRY.get_or_init(PassManager::builtin)
    }

    /// Registers a function pass.
    ///
    /// # Panics
    /// If the name is already registered.
    pub fn register_function_pass(&mut self, desc: FunctionPassDesc) {
        assert!(
            self.function_pass(desc.name).is_none() && self.module_pass(desc.name).is_none(),
            "pass '{}' registered twice",
            desc.name
        );
        self.function.push(desc);
    }

    /// Registers a module pass.
    ///
    /// # Panics
    /// If the name is already registered.
    pub fn register_module_pass(&mut self, desc: ModulePassDesc) {
        assert!(
            self.function_pass(desc.name).is_none() && self.module_pass(desc.name).is_none(),
            "pass '{}' registered twice",
            desc.name
        );
        self.module.push(desc);
    }

    /// Looks up a function pass by name.
    pub fn function_pass(&self, name: &str) -> Option<&FunctionPassDesc> {
        self.function.iter().find(|d| d.name == name)
    }

    /// Looks up a module pass by name.
    pub fn module_pass(&self, name: &str) -> Option<&ModulePassDesc> {
        self.module.iter().find(|d| d.name == name)
    }

    /// All registered function passes.
    pub fn function_passes(&self) -> &[FunctionPassDesc] {
        &self.function
    }

    /// All registered module passes.
    pub fn module_passes(&self) -> &[ModulePassDesc] {
        &self.module
    }
}
