//! Static call graph with strongly connected components.

use hashbrown::{HashMap, HashSet};

use crate::entities::FuncId;
use crate::module::Module;
use crate::value::Value;

/// The module's call graph.
///
/// An edge `a → b` exists for every operand of `a` referencing `b`, so
/// address-taken functions count as called; that keeps dead function
/// elimination conservative for indirect calls.
#[derive(Debug, Default)]
pub struct CallGraph {
    callees: HashMap<FuncId, Vec<FuncId>>,
    sccs: Vec<Vec<FuncId>>,
    scc_of: HashMap<FuncId, usize>,
}

impl CallGraph {
    /// Computes the call graph of `module`.
    pub fn compute(module: &Module) -> Self {
        let mut callees: HashMap<FuncId, Vec<FuncId>> = HashMap::new();
        for id in module.function_ids() {
            let func = module.function(id);
            let mut targets = Vec::new();
            let mut seen = HashSet::new();
            for block in func.blocks() {
                for &inst in func.block_insts(block) {
                    for operand in func.data(inst).operands() {
                        if let Value::Func(target) = operand {
                            if seen.insert(target) {
                                targets.push(target);
                            }
                        }
                    }
                }
            }
            callees.insert(id, targets);
        }
        let mut graph = Self {
            callees,
            sccs: Vec::new(),
            scc_of: HashMap::new(),
        };
        graph.compute_sccs(module);
        graph
    }

    // Iterative Tarjan.
    fn compute_sccs(&mut self, module: &Module) {
        struct State {
            index: HashMap<FuncId, usize>,
            lowlink: HashMap<FuncId, usize>,
            on_stack: HashSet<FuncId>,
            stack: Vec<FuncId>,
            counter: usize,
            sccs: Vec<Vec<FuncId>>,
        }
        let mut state = State {
            index: HashMap::new(),
            lowlink: HashMap::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            counter: 0,
            sccs: Vec::new(),
        };
        for root in module.function_ids() {
            if state.index.contains_key(&root) {
                continue;
            }
            // Explicit DFS stack: (node, next child position).
            let mut dfs: Vec<(FuncId, usize)> = vec![(root, 0)];
            state.index.insert(root, state.counter);
            state.lowlink.insert(root, state.counter);
            state.counter += 1;
            state.stack.push(root);
            state.on_stack.insert(root);
            while let Some(&mut (node, ref mut child)) = dfs.last_mut() {
                let callees = self.callees.get(&node).cloned().unwrap_or_default();
                if *child < callees.len() {
                    let target = callees[*child];
                    *child += 1;
                    // Foreign callees have no node.
                    if !self.callees.contains_key(&target) {
                        continue;
                    }
                    if !state.index.contains_key(&target) {
                        state.index.insert(target, state.counter);
                        state.lowlink.insert(target, state.counter);
                        state.counter += 1;
                        state.stack.push(target);
                        state.on_stack.insert(target);
                        dfs.push((target, 0));
                    } else if state.on_stack.contains(&target) {
                        let low = state.lowlink[&node].min(state.index[&target]);
                        state.lowlink.insert(node, low);
                    }
                } else {
                    dfs.pop();
                    if let Some(&(parent, _)) = dfs.last() {
                        let low = state.lowlink[&parent].min(state.lowlink[&node]);
                        state.lowlink.insert(parent, low);
                    }
                    if state.lowlink[&node] == state.index[&node] {
                        let mut scc = Vec::new();
                        loop {
                            let member = state.stack.pop().unwrap();
                            state.on_stack.remove(&member);
                            scc.push(member);
                            if member == node {
                                break;
                            }
                        }
                        state.sccs.push(scc);
                    }
                }
            }
        }
        // Tarjan emits components in reverse topological order: callees
        // before callers.
        self.sccs = state.sccs;
        for (index, scc) in self.sccs.iter().enumerate() {
            for &member in scc {
                self.scc_of.insert(member, index);
            }
        }
    }

    /// The functions referenced by `func`, each once.
    pub fn callees(&self, func: FuncId) -> &[FuncId] {
        self.callees.get(&func).map(|c| c.as_slice()).unwrap_or(&[])
    }

    /// Strongly connected components, callees before callers.
    pub fn sccs(&self) -> &[Vec<FuncId>] {
        &self.sccs
    }

    /// `true` if `func` sits on a call cycle (including self recursion).
    pub fn is_recursive(&self, func: FuncId) -> bool {
        match self.scc_of.get(&func) {
            Some(&index) => {
                self.sccs[index].len() > 1 || self.callees(func).contains(&func)
            }
            None => false,
        }
    }
}
