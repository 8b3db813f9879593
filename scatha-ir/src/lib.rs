//! Typed SSA intermediate representation of the Scatha compiler.
//!
//! The [`Context`] interns types and constants; a [`Module`] owns functions
//! and globals; a [`Function`] owns its blocks and instructions and
//! maintains the use-def edges between them. [`parse`] and [`print_module`]
//! convert between modules and their textual form. The [`passes`] module
//! holds the optimization passes, their registry, and the pipeline language
//! that schedules them.

#![warn(missing_docs)]

pub mod analysis;
mod context;
mod entities;
mod function;
mod instruction;
mod module;
mod parse;
pub mod passes;
mod print;
mod types;
mod validate;
mod value;

pub use context::{ConstData, ConstInfo, Context};
pub use entities::{Block, Const, FuncId, GlobalId, Inst, Type};
pub use function::{Function, FunctionAttributes, NameFactory, Parameter, Visibility};
pub use instruction::{ArithOp, CmpMode, CmpRel, ConvOp, InstData, UnaryArithOp};
pub use module::{Callable, ForeignFunctionDecl, GlobalData, Module};
pub use parse::{parse, ParseError};
pub use print::{print_function, print_module, type_to_string};
pub use types::{TypeData, TypeInfo};
pub use validate::{assert_invariants, validate, validate_function, InvariantViolation};
pub use value::Value;
