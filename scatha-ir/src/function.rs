//! Functions, basic blocks, and use-def maintenance.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::context::Context;
use crate::entities::{Block, FuncId, Inst, Type};
use crate::instruction::InstData;
use crate::value::Value;

bitflags::bitflags! {
    /// Function attributes relevant to optimization.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FunctionAttributes: u8 {
        /// The function reads no memory observable by the caller.
        const MEMORY_READ_NONE = 1 << 0;
        /// The function writes no memory observable by the caller.
        const MEMORY_WRITE_NONE = 1 << 1;
    }
}

/// Linkage visibility of globals and functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Not visible outside the module; may be removed if unreferenced.
    #[default]
    Internal,
    /// Part of the module's interface; roots dead code elimination.
    External,
}

/// A function parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Unique name within the function.
    pub name: String,
    /// Parameter type.
    pub ty: Type,
}

/// Generates names unique within one function.
///
/// Blocks, parameters, and instruction results share one namespace. A taken
/// name gets a `.N` suffix; anonymous values draw sequential numbers.
#[derive(Debug, Default)]
pub struct NameFactory {
    used: HashSet<String>,
    next_auto: u32,
}

impl NameFactory {
    /// Claims `base`, or the first free `base.N`.
    pub fn make_unique(&mut self, base: &str) -> String {
        if self.used.insert(base.to_owned()) {
            return base.to_owned();
        }
        for n in 0u32.. {
            let candidate = format!("{base}.{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
        unreachable!()
    }

    /// Claims the next sequential numeric name.
    pub fn fresh(&mut self) -> String {
        loop {
            let candidate = self.next_auto.to_string();
            self.next_auto += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Releases a name for reuse.
    pub fn release(&mut self, name: &str) {
        self.used.remove(name);
    }
}

#[derive(Debug)]
struct BlockData {
    name: String,
    insts: Vec<Inst>,
}

#[derive(Debug)]
struct InstNode {
    data: InstData,
    ty: Type,
    name: Option<String>,
    block: Block,
}

/// A function: an ordered list of basic blocks holding instructions in SSA
/// form.
///
/// Blocks and instructions live in arenas indexed by [`Block`] and [`Inst`]
/// keys; erased entities leave tombstones, so keys are never reused within a
/// function. The function maintains the reverse user edges for every operand
/// reference.
#[derive(Debug)]
pub struct Function {
    name: String,
    ty: Type,
    params: Vec<Parameter>,
    visibility: Visibility,
    attributes: FunctionAttributes,
    self_id: Option<FuncId>,
    blocks: Vec<Option<BlockData>>,
    layout: Vec<Block>,
    insts: Vec<Option<InstNode>>,
    users: HashMap<Value, SmallVec<[Inst; 4]>>,
    names: NameFactory,
    cfg_epoch: Cell<u64>,
    pub(crate) dom_cache: RefCell<Option<(u64, Rc<crate::analysis::DomTree>)>>,
    pub(crate) loop_cache: RefCell<Option<(u64, Rc<crate::analysis::LoopForest>)>>,
}

impl Function {
    /// Creates an empty function with no blocks.
    ///
    /// `ty` must be a function type whose parameter list matches
    /// `param_types`. Parameters are named `0`, `1`, … unless `param_names`
    /// provides names.
    pub fn new(
        name: String,
        ty: Type,
        param_types: &[Type],
        param_names: Option<&[String]>,
    ) -> Self {
        let mut names = NameFactory::default();
        let params = param_types
            .iter()
            .enumerate()
            .map(|(i, &ty)| {
                let name = match param_names.and_then(|n| n.get(i)) {
                    Some(given) => names.make_unique(given),
                    None => names.fresh(),
                };
                Parameter { name, ty }
            })
            .collect();
        Self {
            name,
            ty,
            params,
            visibility: Visibility::default(),
            attributes: FunctionAttributes::default(),
            self_id: None,
            blocks: Vec::new(),
            layout: Vec::new(),
            insts: Vec::new(),
            users: HashMap::new(),
            names,
            cfg_epoch: Cell::new(0),
            dom_cache: RefCell::new(None),
            loop_cache: RefCell::new(None),
        }
    }

    /// The function name, unique within its module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The function's id within its module, set when it is added.
    pub fn self_id(&self) -> Option<FuncId> {
        self.self_id
    }

    pub(crate) fn set_self_id(&mut self, id: FuncId) {
        self.self_id = Some(id);
    }

    /// The function type.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// The parameters.
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    /// The visibility.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Sets the visibility.
    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// The attribute set.
    pub fn attributes(&self) -> FunctionAttributes {
        self.attributes
    }

    /// Sets the attribute set.
    pub fn set_attributes(&mut self, attributes: FunctionAttributes) {
        self.attributes = attributes;
    }

    /// Monotone counter bumped on every CFG edge mutation. Analyses cache
    /// against it.
    pub fn cfg_epoch(&self) -> u64 {
        self.cfg_epoch.get()
    }

    fn invalidate_cfg(&self) {
        self.cfg_epoch.set(self.cfg_epoch.get() + 1);
    }

    // ---- blocks -----------------------------------------------------------

    /// The entry block.
    ///
    /// # Panics
    /// If the function has no blocks.
    pub fn entry(&self) -> Block {
        self.layout[0]
    }

    /// `true` if the function has no blocks (a declaration in progress).
    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// The blocks in layout order.
    pub fn blocks(&self) -> Vec<Block> {
        self.layout.clone()
    }

    /// `true` while the block has not been erased. Passes that delete
    /// blocks mid-iteration use this to skip stale snapshot entries.
    pub fn is_block_alive(&self, block: Block) -> bool {
        self.blocks
            .get(block.index())
            .is_some_and(|slot| slot.is_some())
    }

    /// Number of live blocks.
    pub fn num_blocks(&self) -> usize {
        self.layout.len()
    }

    /// Appends a new empty block.
    pub fn add_block(&mut self, name: &str) -> Block {
        let unique = self.names.make_unique(name);
        let block = Block::from_index(self.blocks.len());
        self.blocks.push(Some(BlockData {
            name: unique,
            insts: Vec::new(),
        }));
        self.layout.push(block);
        self.invalidate_cfg();
        block
    }

    /// Removes an empty, unused block.
    ///
    /// # Panics
    /// If the block still has instructions or users.
    pub fn erase_block(&mut self, block: Block) {
        assert!(
            self.block_data(block).insts.is_empty(),
            "erasing non-empty block %{}",
            self.block_name(block)
        );
        assert!(
            self.users(Value::Block(block)).is_empty(),
            "erasing block %{} that still has users",
            self.block_name(block)
        );
        self.layout.retain(|&b| b != block);
        let data = self.blocks[block.index()].take().expect("double erase");
        self.names.release(&data.name);
        self.invalidate_cfg();
    }

    /// Moves `block` to the given position in the layout.
    pub fn move_block(&mut self, block: Block, position: usize) {
        self.layout.retain(|&b| b != block);
        self.layout.insert(position, block);
        self.invalidate_cfg();
    }

    fn block_data(&self, block: Block) -> &BlockData {
        self.blocks[block.index()].as_ref().expect("erased block")
    }

    fn block_data_mut(&mut self, block: Block) -> &mut BlockData {
        self.blocks[block.index()].as_mut().expect("erased block")
    }

    /// The block's name, without the `%` sigil.
    pub fn block_name(&self, block: Block) -> &str {
        &self.block_data(block).name
    }

    /// The block's instructions in order.
    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.block_data(block).insts
    }

    /// The block's terminator, if its last instruction is one.
    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let &last = self.block_data(block).insts.last()?;
        self.data(last).is_terminator().then_some(last)
    }

    /// Successors of `block`, in terminator operand order.
    pub fn succs(&self, block: Block) -> SmallVec<[Block; 2]> {
        match self.terminator(block) {
            Some(term) => self.data(term).block_targets(),
            None => SmallVec::new(),
        }
    }

    /// Predecessors of `block`: the parent blocks of terminators using it,
    /// deduplicated in first-use order.
    pub fn preds(&self, block: Block) -> SmallVec<[Block; 2]> {
        let mut preds = SmallVec::new();
        for &user in self.users(Value::Block(block)) {
            if !self.data(user).is_terminator() {
                continue;
            }
            let parent = self.inst_block(user);
            if !preds.contains(&parent) {
                preds.push(parent);
            }
        }
        preds
    }

    /// The phi instructions at the head of `block`.
    pub fn phis(&self, block: Block) -> Vec<Inst> {
        self.block_insts(block)
            .iter()
            .copied()
            .take_while(|&inst| matches!(self.data(inst), InstData::Phi { .. }))
            .collect()
    }

    // ---- instructions -----------------------------------------------------

    fn node(&self, inst: Inst) -> &InstNode {
        self.insts[inst.index()].as_ref().expect("erased instruction")
    }

    fn node_mut(&mut self, inst: Inst) -> &mut InstNode {
        self.insts[inst.index()].as_mut().expect("erased instruction")
    }

    /// The instruction's operation.
    pub fn data(&self, inst: Inst) -> &InstData {
        &self.node(inst).data
    }

    /// `true` while the instruction has not been erased. Worklist passes use
    /// this to skip stale entries.
    pub fn is_inst_alive(&self, inst: Inst) -> bool {
        self.insts[inst.index()].is_some()
    }

    /// The instruction's result type.
    pub fn inst_ty(&self, inst: Inst) -> Type {
        self.node(inst).ty
    }

    /// The instruction's result name, if it produces a value.
    pub fn inst_name(&self, inst: Inst) -> Option<&str> {
        self.node(inst).name.as_deref()
    }

    /// The block containing the instruction.
    pub fn inst_block(&self, inst: Inst) -> Block {
        self.node(inst).block
    }

    /// Renames the instruction's result, uniquing the name.
    pub fn rename_inst(&mut self, inst: Inst, name: &str) {
        let unique = self.names.make_unique(name);
        if let Some(old) = self.node_mut(inst).name.replace(unique) {
            self.names.release(&old);
        }
    }

    fn new_inst_node(&mut self, block: Block, data: InstData, ty: Type, name: Option<&str>) -> Inst {
        let inst = Inst::from_index(self.insts.len());
        let unique = if !ty.is_void() {
            Some(match name {
                Some(given) => self.names.make_unique(given),
                None => self.names.fresh(),
            })
        } else {
            None
        };
        for operand in data.operands() {
            self.add_user(operand, inst);
        }
        if data.is_terminator() || !data.block_targets().is_empty() {
            self.invalidate_cfg();
        }
        self.insts.push(Some(InstNode {
            data,
            ty,
            name: unique,
            block,
        }));
        inst
    }

    /// Appends an instruction to `block`.
    pub fn append_inst(&mut self, block: Block, data: InstData, ty: Type, name: Option<&str>) -> Inst {
        if data.is_terminator() {
            self.invalidate_cfg();
        }
        let inst = self.new_inst_node(block, data, ty, name);
        self.block_data_mut(block).insts.push(inst);
        inst
    }

    /// Inserts an instruction before `before` in the same block.
    pub fn insert_inst_before(
        &mut self,
        before: Inst,
        data: InstData,
        ty: Type,
        name: Option<&str>,
    ) -> Inst {
        let block = self.inst_block(before);
        let inst = self.new_inst_node(block, data, ty, name);
        let insts = &mut self.block_data_mut(block).insts;
        let pos = insts.iter().position(|&i| i == before).expect("unlinked");
        insts.insert(pos, inst);
        inst
    }

    /// Inserts an instruction at the given position of `block`.
    pub fn insert_inst_at(
        &mut self,
        block: Block,
        position: usize,
        data: InstData,
        ty: Type,
        name: Option<&str>,
    ) -> Inst {
        let inst = self.new_inst_node(block, data, ty, name);
        self.block_data_mut(block).insts.insert(position, inst);
        inst
    }

    /// Moves an instruction to the end of `block`.
    pub fn move_inst_to_end(&mut self, inst: Inst, block: Block) {
        let old = self.inst_block(inst);
        self.block_data_mut(old).insts.retain(|&i| i != inst);
        self.node_mut(inst).block = block;
        self.block_data_mut(block).insts.push(inst);
        if self.data(inst).is_terminator() {
            self.invalidate_cfg();
        }
    }

    // ---- use-def maintenance ---------------------------------------------

    fn add_user(&mut self, value: Value, user: Inst) {
        self.users.entry(value).or_default().push(user);
    }

    fn remove_user(&mut self, value: Value, user: Inst) {
        let set = self.users.get_mut(&value).expect("missing user edge");
        let pos = set.iter().position(|&u| u == user).expect("missing user edge");
        set.remove(pos);
        if set.is_empty() {
            self.users.remove(&value);
        }
    }

    /// The instructions using `value`, one entry per operand occurrence.
    pub fn users(&self, value: Value) -> &[Inst] {
        self.users.get(&value).map(|s| s.as_slice()).unwrap_or(&[])
    }

    /// Replaces operand `index` of `inst` with `value`, maintaining the
    /// reverse edges on both sides.
    pub fn set_operand(&mut self, inst: Inst, index: usize, value: Value) {
        let old = self.data(inst).operands()[index];
        if old == value {
            return;
        }
        self.remove_user(old, inst);
        self.node_mut(inst).data.set_operand(index, value);
        self.add_user(value, inst);
        if matches!(old, Value::Block(_)) || matches!(value, Value::Block(_)) {
            self.invalidate_cfg();
        }
    }

    /// Rewrites every use of `old` to `new`.
    ///
    /// The user set is snapshotted first; rewriting must not race with other
    /// mutation of the same sets.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        if old == new {
            return;
        }
        let snapshot: Vec<Inst> = self.users(old).to_vec();
        for user in snapshot {
            let operands = self.data(user).operands();
            for (index, operand) in operands.iter().enumerate() {
                if *operand == old {
                    self.set_operand(user, index, new);
                }
            }
        }
    }

    /// Removes `inst` from its block and severs its operand edges.
    ///
    /// # Panics
    /// If the instruction still has users.
    pub fn erase_inst(&mut self, inst: Inst) {
        assert!(
            self.users(Value::Inst(inst)).is_empty(),
            "erasing instruction %{} that still has users",
            self.inst_name(inst).unwrap_or("?")
        );
        for operand in self.data(inst).operands() {
            self.remove_user(operand, inst);
        }
        if self.data(inst).is_terminator() {
            self.invalidate_cfg();
        }
        let block = self.inst_block(inst);
        self.block_data_mut(block).insts.retain(|&i| i != inst);
        let node = self.insts[inst.index()].take().expect("double erase");
        if let Some(name) = node.name {
            self.names.release(&name);
        }
    }

    /// Replaces all uses of `inst` with `value` and erases it.
    pub fn replace_inst_with_value(&mut self, inst: Inst, value: Value) {
        self.replace_all_uses(Value::Inst(inst), value);
        self.erase_inst(inst);
    }

    /// Replaces the operation of `inst`, rewiring operand edges.
    pub fn replace_inst_data(&mut self, inst: Inst, data: InstData) {
        for operand in self.data(inst).operands() {
            self.remove_user(operand, inst);
        }
        for operand in data.operands() {
            self.add_user(operand, inst);
        }
        let was_terminator = self.data(inst).is_terminator();
        self.node_mut(inst).data = data;
        if was_terminator || self.data(inst).is_terminator() {
            self.invalidate_cfg();
        }
    }

    /// Removes the phi entry for edge `pred` from every phi in `block`.
    pub fn remove_phi_edges(&mut self, block: Block, pred: Block) {
        for phi in self.phis(block) {
            let InstData::Phi { args } = self.data(phi) else {
                unreachable!()
            };
            let mut args = args.clone();
            if let Some(pos) = args.iter().position(|(b, _)| *b == pred) {
                args.remove(pos);
                self.replace_inst_data(phi, InstData::Phi { args });
            }
        }
    }

    // ---- typing -----------------------------------------------------------

    /// The type of any value referenced from this function.
    pub fn value_type(&self, ctx: &Context, value: Value) -> Type {
        match value {
            Value::Inst(inst) => self.inst_ty(inst),
            Value::Param(index) => self.params[index as usize].ty,
            Value::Block(_) => panic!("labels have no type"),
            Value::Const(c) => ctx.const_info(c).ty,
            Value::Global(_) | Value::Func(_) => ctx.ptr_type(),
        }
    }

    /// The name of a value for diagnostics and printing.
    pub fn value_name(&self, value: Value) -> String {
        match value {
            Value::Inst(inst) => format!("%{}", self.inst_name(inst).unwrap_or("?")),
            Value::Param(index) => format!("%{}", self.params[index as usize].name),
            Value::Block(block) => format!("%{}", self.block_name(block)),
            Value::Const(c) => format!("{c:?}"),
            Value::Global(g) => format!("{g:?}"),
            Value::Func(f) => format!("{f:?}"),
        }
    }
}
