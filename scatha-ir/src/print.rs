//! Textual IR printing.
//!
//! The output parses back with [`crate::parse`]; printing then parsing a
//! module yields an equivalent module up to the numbering of anonymous
//! temporaries.

use core::fmt::Write;

use itertools::Itertools;

use crate::context::{ConstData, Context};
use crate::entities::{Block, Const, Inst, Type};
use crate::function::{Function, Visibility};
use crate::instruction::InstData;
use crate::module::{Callable, Module};
use crate::types::TypeData;
use crate::value::Value;

/// Renders a type.
pub fn type_to_string(ctx: &Context, ty: Type) -> String {
    match &ctx.type_info(ty).data {
        TypeData::Void => "void".into(),
        TypeData::Int { bits } => format!("i{bits}"),
        TypeData::Float { bits } => format!("f{bits}"),
        TypeData::Ptr => "ptr".into(),
        TypeData::Array { elem, count } => {
            format!("[{} x {}]", count, type_to_string(ctx, *elem))
        }
        TypeData::Struct { name, members } => {
            if !name.is_empty() {
                return format!("@{name}");
            }
            let inner = members.iter().map(|&m| type_to_string(ctx, m)).join(", ");
            format!("{{ {inner} }}")
        }
        TypeData::Function { ret, params } => {
            let inner = params.iter().map(|&p| type_to_string(ctx, p)).join(", ");
            format!("{} ({inner})", type_to_string(ctx, *ret))
        }
    }
}

fn const_to_string(ctx: &Context, c: Const) -> String {
    match &ctx.const_info(c).data {
        ConstData::Int(v) => v.to_string(),
        ConstData::Float(v) => v.to_string(),
        ConstData::Undef => "undef".into(),
        ConstData::Null => "null".into(),
        ConstData::Record(members) => {
            let inner = members
                .iter()
                .map(|&m| {
                    format!(
                        "{} {}",
                        type_to_string(ctx, ctx.const_info(m).ty),
                        const_to_string(ctx, m)
                    )
                })
                .join(", ");
            format!("{{ {inner} }}")
        }
    }
}

fn value_to_string(ctx: &Context, module: &Module, func: &Function, value: Value) -> String {
    match value {
        Value::Inst(inst) => format!("%{}", func.inst_name(inst).expect("unnamed value")),
        Value::Param(index) => format!("%{}", func.params()[index as usize].name),
        Value::Block(block) => format!("label %{}", func.block_name(block)),
        Value::Const(c) => const_to_string(ctx, c),
        Value::Global(g) => format!("@{}", module.global(g).name),
        Value::Func(f) => format!("@{}", module.callable(f).name()),
    }
}

/// Renders `<type> <value>`, the standard operand form.
fn operand(ctx: &Context, module: &Module, func: &Function, value: Value) -> String {
    match value {
        Value::Block(_) => value_to_string(ctx, module, func, value),
        _ => format!(
            "{} {}",
            type_to_string(ctx, func.value_type(ctx, value)),
            value_to_string(ctx, module, func, value)
        ),
    }
}

fn print_inst(
    out: &mut String,
    ctx: &Context,
    module: &Module,
    func: &Function,
    inst: Inst,
) {
    let op = |v: Value| operand(ctx, module, func, v);
    if let Some(name) = func.inst_name(inst) {
        write!(out, "%{name} = ").unwrap();
    }
    match func.data(inst) {
        InstData::Alloca { allocated, count } => {
            write!(out, "alloca {}, {}", type_to_string(ctx, *allocated), op(*count)).unwrap();
        }
        InstData::Load { addr } => {
            write!(
                out,
                "load {}, {}",
                type_to_string(ctx, func.inst_ty(inst)),
                op(*addr)
            )
            .unwrap();
        }
        InstData::Store { addr, value } => {
            write!(out, "store {}, {}", op(*addr), op(*value)).unwrap();
        }
        InstData::GetElementPtr {
            pointee,
            base,
            index,
            members,
        } => {
            write!(
                out,
                "getelementptr inbounds {}, {}, {}",
                type_to_string(ctx, *pointee),
                op(*base),
                op(*index)
            )
            .unwrap();
            for member in members {
                write!(out, ", {member}").unwrap();
            }
        }
        InstData::Arith { op: arith, lhs, rhs } => {
            write!(out, "{} {}, {}", arith.mnemonic(), op(*lhs), op(*rhs)).unwrap();
        }
        InstData::UnaryArith { op: unary, operand } => {
            write!(out, "{} {}", unary.mnemonic(), op(*operand)).unwrap();
        }
        InstData::Cmp {
            mode,
            rel,
            lhs,
            rhs,
        } => {
            write!(
                out,
                "{} {} {}, {}",
                mode.mnemonic(),
                rel.mnemonic(),
                op(*lhs),
                op(*rhs)
            )
            .unwrap();
        }
        InstData::Conv { op: conv, operand } => {
            write!(
                out,
                "{} {} to {}",
                conv.mnemonic(),
                op(*operand),
                type_to_string(ctx, func.inst_ty(inst))
            )
            .unwrap();
        }
        InstData::Phi { args } => {
            write!(out, "phi {}", type_to_string(ctx, func.inst_ty(inst))).unwrap();
            for (i, (block, value)) in args.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(
                    out,
                    "{sep}[label %{} : {}]",
                    func.block_name(*block),
                    value_to_string(ctx, module, func, *value)
                )
                .unwrap();
            }
        }
        InstData::Select {
            cond,
            then_value,
            else_value,
        } => {
            write!(
                out,
                "select {}, {}, {}",
                op(*cond),
                op(*then_value),
                op(*else_value)
            )
            .unwrap();
        }
        InstData::Call { callee, args, tail } => {
            if *tail {
                write!(out, "tail ").unwrap();
            }
            let ret = type_to_string(ctx, func.inst_ty(inst));
            write!(
                out,
                "call {ret} {}",
                value_to_string(ctx, module, func, *callee)
            )
            .unwrap();
            for arg in args {
                write!(out, ", {}", op(*arg)).unwrap();
            }
        }
        InstData::ExtractValue { aggregate, indices } => {
            write!(out, "extract_value {}", op(*aggregate)).unwrap();
            for index in indices {
                write!(out, ", {index}").unwrap();
            }
        }
        InstData::InsertValue {
            aggregate,
            value,
            indices,
        } => {
            write!(out, "insert_value {}, {}", op(*aggregate), op(*value)).unwrap();
            for index in indices {
                write!(out, ", {index}").unwrap();
            }
        }
        InstData::Return { value } => match value {
            Some(value) => write!(out, "return {}", op(*value)).unwrap(),
            None => write!(out, "return").unwrap(),
        },
        InstData::Goto { target } => {
            write!(out, "goto label %{}", func.block_name(*target)).unwrap();
        }
        InstData::Branch {
            cond,
            then_block,
            else_block,
        } => {
            write!(
                out,
                "branch {}, label %{}, label %{}",
                op(*cond),
                func.block_name(*then_block),
                func.block_name(*else_block)
            )
            .unwrap();
        }
        InstData::Unreachable => write!(out, "unreachable").unwrap(),
    }
}

fn print_block(out: &mut String, ctx: &Context, module: &Module, func: &Function, block: Block) {
    writeln!(out, "  %{}:", func.block_name(block)).unwrap();
    for &inst in func.block_insts(block) {
        out.push_str("    ");
        print_inst(out, ctx, module, func, inst);
        out.push('\n');
    }
}

/// Renders one function definition.
pub fn print_function(ctx: &Context, module: &Module, func: &Function) -> String {
    let mut out = String::new();
    if func.visibility() == Visibility::External {
        out.push_str("pub ");
    }
    let ret = match &ctx.type_info(func.ty()).data {
        TypeData::Function { ret, .. } => *ret,
        _ => panic!("function with non-function type"),
    };
    write!(out, "func {} @{}(", type_to_string(ctx, ret), func.name()).unwrap();
    for (i, param) in func.params().iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{} %{}", type_to_string(ctx, param.ty), param.name).unwrap();
    }
    out.push_str(") {\n");
    for (i, block) in func.blocks().into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_block(&mut out, ctx, module, func, block);
    }
    out.push_str("}\n");
    out
}

/// Renders a whole module: struct declarations, globals, foreign function
/// declarations, then function definitions.
pub fn print_module(ctx: &Context, module: &Module) -> String {
    let mut out = String::new();
    for &ty in module.struct_decls() {
        let TypeData::Struct { name, members } = &ctx.type_info(ty).data else {
            continue;
        };
        let inner = members.iter().map(|&m| type_to_string(ctx, m)).join(", ");
        writeln!(out, "struct @{name} {{ {inner} }}").unwrap();
        out.push('\n');
    }
    for id in module.global_ids() {
        let global = module.global(id);
        if global.visibility == Visibility::External {
            out.push_str("pub ");
        }
        let keyword = if global.is_const { "constant" } else { "global" };
        writeln!(
            out,
            "{keyword} @{} = {} {}",
            global.name,
            type_to_string(ctx, global.value_ty),
            const_to_string(ctx, global.init)
        )
        .unwrap();
        out.push('\n');
    }
    for id in module.callable_ids() {
        match module.callable(id) {
            Callable::Foreign(decl) => {
                let TypeData::Function { ret, params } = &ctx.type_info(decl.ty).data else {
                    panic!("foreign function with non-function type");
                };
                let inner = params.iter().map(|&p| type_to_string(ctx, p)).join(", ");
                writeln!(
                    out,
                    "ext func {} @{}({inner})",
                    type_to_string(ctx, *ret),
                    decl.name
                )
                .unwrap();
                out.push('\n');
            }
            Callable::Defined(func) => {
                out.push_str(&print_function(ctx, module, func));
                out.push('\n');
            }
        }
    }
    // Drop the final separating blank line.
    if out.ends_with("\n\n") {
        out.pop();
    }
    out
}
