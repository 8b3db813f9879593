//! MIR functions and the module owning them.

use hashbrown::HashMap;
use scatha_types::ForeignFunction;
use smallvec::SmallVec;

use crate::inst::{Block, Inst, InstData, Value};
use crate::reg::{Reg, RegClass};

#[derive(Debug)]
struct BlockData {
    name: String,
    insts: Vec<Inst>,
}

/// A MIR function.
///
/// Registers live in four index spaces (see [`RegClass`]); the function
/// tracks how many of each are in use, the def and use sites of every
/// register, and the hardware precoloring constraints SSA destruction
/// introduces for parameter and return registers.
#[derive(Debug, Default)]
pub struct Function {
    /// Function name, unique within the module.
    pub name: String,
    /// Recorded in the binary symbol table when set.
    pub is_public: bool,
    /// Number of parameter words.
    pub num_params: u32,
    /// Number of return value words (0 or 1).
    pub num_ret_words: u32,
    blocks: Vec<Option<BlockData>>,
    layout: Vec<Block>,
    insts: Vec<Option<InstData>>,
    inst_block: Vec<Block>,
    counters: HashMap<RegClass, u32>,
    defs: HashMap<Reg, SmallVec<[Inst; 2]>>,
    uses: HashMap<Reg, SmallVec<[Inst; 4]>>,
    /// Hardware color a register must receive, if constrained.
    pub precolored: HashMap<Reg, u32>,
    /// Number of hardware registers in use after allocation.
    pub num_hardware_regs: u32,
    /// Largest argument count over all call sites.
    pub max_call_args: u32,
}

impl Function {
    /// Creates an empty function.
    pub fn new(name: String, num_params: u32, num_ret_words: u32) -> Self {
        Self {
            name,
            num_params,
            num_ret_words,
            ..Self::default()
        }
    }

    /// Allocates a fresh register of the given class.
    pub fn new_reg(&mut self, class: RegClass) -> Reg {
        let counter = self.counters.entry(class).or_insert(0);
        let reg = Reg {
            class,
            index: *counter,
        };
        *counter += 1;
        reg
    }

    /// Number of registers allocated in a class.
    pub fn reg_count(&self, class: RegClass) -> u32 {
        self.counters.get(&class).copied().unwrap_or(0)
    }

    /// Bumps the register counter of `class` to at least `count`.
    pub fn reserve_regs(&mut self, class: RegClass, count: u32) {
        let counter = self.counters.entry(class).or_insert(0);
        *counter = (*counter).max(count);
    }

    // ---- blocks -----------------------------------------------------------

    /// Appends a new empty block.
    pub fn add_block(&mut self, name: impl Into<String>) -> Block {
        let block = Block::from_index(self.blocks.len());
        self.blocks.push(Some(BlockData {
            name: name.into(),
            insts: Vec::new(),
        }));
        self.layout.push(block);
        block
    }

    /// The entry block.
    pub fn entry(&self) -> Block {
        self.layout[0]
    }

    /// Blocks in layout order.
    pub fn blocks(&self) -> Vec<Block> {
        self.layout.clone()
    }

    /// Reorders the layout. Every live block must appear exactly once.
    pub fn set_layout(&mut self, layout: Vec<Block>) {
        debug_assert_eq!(layout.len(), self.layout.len());
        self.layout = layout;
    }

    /// The block's name.
    pub fn block_name(&self, block: Block) -> &str {
        &self.blocks[block.index()].as_ref().expect("erased block").name
    }

    /// The block's instructions in order.
    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block.index()]
            .as_ref()
            .expect("erased block")
            .insts
    }

    /// Successors: targets of the block's trailing jump instructions.
    pub fn succs(&self, block: Block) -> SmallVec<[Block; 2]> {
        let mut succs = SmallVec::new();
        for &inst in self.block_insts(block) {
            for target in self.data(inst).block_targets() {
                if !succs.contains(&target) {
                    succs.push(target);
                }
            }
        }
        succs
    }

    /// Predecessors, in layout order.
    pub fn preds(&self, block: Block) -> SmallVec<[Block; 2]> {
        let mut preds = SmallVec::new();
        for &candidate in &self.layout {
            if self.succs(candidate).contains(&block) && !preds.contains(&candidate) {
                preds.push(candidate);
            }
        }
        preds
    }

    /// Removes an empty block.
    pub fn erase_block(&mut self, block: Block) {
        assert!(self.block_insts(block).is_empty());
        self.layout.retain(|&b| b != block);
        self.blocks[block.index()] = None;
    }

    // ---- instructions -----------------------------------------------------

    /// The instruction's data.
    pub fn data(&self, inst: Inst) -> &InstData {
        self.insts[inst.index()].as_ref().expect("erased instruction")
    }

    /// `true` while the instruction is not erased.
    pub fn is_alive(&self, inst: Inst) -> bool {
        self.insts
            .get(inst.index())
            .is_some_and(|slot| slot.is_some())
    }

    /// The block holding the instruction.
    pub fn inst_block(&self, inst: Inst) -> Block {
        self.inst_block[inst.index()]
    }

    fn register(&mut self, inst: Inst, data: &InstData) {
        if let Some(dest) = data.dest() {
            self.defs.entry(dest).or_default().push(inst);
        }
        data.for_each_use(|reg| self.uses.entry(reg).or_default().push(inst));
    }

    fn unregister(&mut self, inst: Inst, data: &InstData) {
        if let Some(dest) = data.dest() {
            let defs = self.defs.get_mut(&dest).expect("missing def edge");
            let pos = defs.iter().position(|&i| i == inst).expect("missing def");
            defs.remove(pos);
        }
        let uses = &mut self.uses;
        data.for_each_use(|reg| {
            let set = uses.get_mut(&reg).expect("missing use edge");
            let pos = set.iter().position(|&i| i == inst).expect("missing use");
            set.remove(pos);
        });
    }

    /// Appends an instruction to `block`.
    pub fn append_inst(&mut self, block: Block, data: InstData) -> Inst {
        let inst = Inst::from_index(self.insts.len());
        self.register(inst, &data);
        self.insts.push(Some(data));
        self.inst_block.push(block);
        self.blocks[block.index()]
            .as_mut()
            .expect("erased block")
            .insts
            .push(inst);
        inst
    }

    /// Inserts an instruction at `position` of `block`.
    pub fn insert_inst_at(&mut self, block: Block, position: usize, data: InstData) -> Inst {
        let inst = Inst::from_index(self.insts.len());
        self.register(inst, &data);
        self.insts.push(Some(data));
        self.inst_block.push(block);
        self.blocks[block.index()]
            .as_mut()
            .expect("erased block")
            .insts
            .insert(position, inst);
        inst
    }

    /// Inserts an instruction directly before `before`.
    pub fn insert_inst_before(&mut self, before: Inst, data: InstData) -> Inst {
        let block = self.inst_block(before);
        let position = self
            .block_insts(block)
            .iter()
            .position(|&i| i == before)
            .expect("unlinked instruction");
        self.insert_inst_at(block, position, data)
    }

    /// Replaces the instruction's data, rewiring def and use edges.
    pub fn replace_inst_data(&mut self, inst: Inst, data: InstData) {
        let old = self.insts[inst.index()].take().expect("erased instruction");
        self.unregister(inst, &old);
        self.register(inst, &data);
        self.insts[inst.index()] = Some(data);
    }

    /// Erases an instruction.
    pub fn erase_inst(&mut self, inst: Inst) {
        let data = self.insts[inst.index()].take().expect("double erase");
        self.unregister(inst, &data);
        let block = self.inst_block[inst.index()];
        self.blocks[block.index()]
            .as_mut()
            .expect("erased block")
            .insts
            .retain(|&i| i != inst);
    }

    /// The instructions defining `reg`.
    pub fn defs(&self, reg: Reg) -> &[Inst] {
        self.defs.get(&reg).map(|d| d.as_slice()).unwrap_or(&[])
    }

    /// The instructions reading `reg`, one entry per operand occurrence.
    pub fn uses(&self, reg: Reg) -> &[Inst] {
        self.uses.get(&reg).map(|u| u.as_slice()).unwrap_or(&[])
    }

    /// Rewrites every read of `old` to `new` across the function.
    pub fn replace_uses(&mut self, old: Reg, new: Value) {
        for inst in self.uses(old).to_vec() {
            let mut data = self.data(inst).clone();
            data.replace_use(old, new);
            self.replace_inst_data(inst, data);
        }
    }

    /// Rewrites every definition of `old` to define `new`.
    pub fn replace_defs(&mut self, old: Reg, new: Reg) {
        for inst in self.defs(old).to_vec() {
            let mut data = self.data(inst).clone();
            data.set_dest(new);
            self.replace_inst_data(inst, data);
        }
    }
}

/// A MIR module: functions plus the foreign function table collected during
/// lowering.
#[derive(Debug, Default)]
pub struct Module {
    /// The functions, indexed by [`CallTarget::Static`](crate::CallTarget).
    pub functions: Vec<Function>,
    /// Foreign functions, indexed by
    /// [`CallTarget::Foreign`](crate::CallTarget).
    pub foreign: Vec<ForeignFunction>,
    /// Static data section contents.
    pub data: Vec<u8>,
    /// Offsets of globals within the data section, by name.
    pub data_symbols: HashMap<String, u64>,
}

impl Module {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the function named `name`.
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}
