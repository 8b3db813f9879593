//! Textual IR parsing.
//!
//! Accepts the output of [`crate::print_module`]. Struct types must be
//! declared before use; functions may reference each other in any order
//! because signatures are registered in a first pass before any body is
//! parsed.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::context::{ConstData, Context};
use crate::entities::{Block, FuncId, GlobalId, Inst, Type};
use crate::function::{Function, Visibility};
use crate::instruction::{ArithOp, CmpMode, CmpRel, ConvOp, InstData, UnaryArithOp};
use crate::module::{ForeignFunctionDecl, GlobalData, Module};
use crate::types::TypeData;
use crate::value::Value;

/// Error produced by the IR parser.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    /// A character that starts no token.
    #[error("{line}:{col}: unexpected character '{ch}'")]
    Lexical {
        /// 1-based source line.
        line: u32,
        /// 1-based source column.
        col: u32,
        /// The offending character.
        ch: char,
    },
    /// Token stream does not match the grammar.
    #[error("{line}:{col}: expected {expected}, found '{found}'")]
    Syntax {
        /// 1-based source line.
        line: u32,
        /// 1-based source column.
        col: u32,
        /// Description of what the parser wanted.
        expected: String,
        /// The token it saw.
        found: String,
    },
    /// Grammatically valid input with inconsistent meaning.
    #[error("{line}:{col}: {message}")]
    Semantic {
        /// 1-based source line.
        line: u32,
        /// 1-based source column.
        col: u32,
        /// Explanation.
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Local(String),
    Global(String),
    Int(i64),
    Float(f64),
    Punct(char),
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => s.clone(),
            Tok::Local(s) => format!("%{s}"),
            Tok::Global(s) => format!("@{s}"),
            Tok::Int(v) => v.to_string(),
            Tok::Float(v) => v.to_string(),
            Tok::Punct(c) => c.to_string(),
            Tok::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    col: u32,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

fn lex(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let (mut line, mut col) = (1u32, 1u32);
    macro_rules! bump {
        () => {{
            let c = chars.next().unwrap();
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
            c
        }};
    }
    while let Some(&c) = chars.peek() {
        let (tline, tcol) = (line, col);
        if c.is_whitespace() {
            bump!();
            continue;
        }
        if c == '#' {
            // Line comment.
            while chars.peek().is_some_and(|&c| c != '\n') {
                bump!();
            }
            continue;
        }
        let tok = if c == '%' || c == '@' {
            bump!();
            let mut name = String::new();
            while chars.peek().is_some_and(|&c| is_name_char(c)) {
                name.push(bump!());
            }
            if name.is_empty() {
                return Err(ParseError::Lexical {
                    line: tline,
                    col: tcol,
                    ch: c,
                });
            }
            if c == '%' {
                Tok::Local(name)
            } else {
                Tok::Global(name)
            }
        } else if c.is_ascii_digit() || c == '-' {
            let mut text = String::new();
            text.push(bump!());
            while chars
                .peek()
                .is_some_and(|&c| c.is_ascii_digit() || c == '.' || c == 'e' || c == '-' || c == '+')
            {
                text.push(bump!());
            }
            if text.contains('.') || text.contains('e') {
                let value = text.parse::<f64>().map_err(|_| ParseError::Lexical {
                    line: tline,
                    col: tcol,
                    ch: c,
                })?;
                Tok::Float(value)
            } else {
                let value = text.parse::<i64>().map_err(|_| ParseError::Lexical {
                    line: tline,
                    col: tcol,
                    ch: c,
                })?;
                Tok::Int(value)
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut name = String::new();
            while chars.peek().is_some_and(|&c| is_name_char(c)) {
                name.push(bump!());
            }
            Tok::Ident(name)
        } else if "{}()[],:=".contains(c) {
            bump!();
            Tok::Punct(c)
        } else {
            return Err(ParseError::Lexical {
                line: tline,
                col: tcol,
                ch: c,
            });
        };
        tokens.push(Token {
            tok,
            line: tline,
            col: tcol,
        });
    }
    tokens.push(Token {
        tok: Tok::Eof,
        line,
        col,
    });
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ctx: Context,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn next(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_ident(&self, word: &str) -> bool {
        matches!(&self.peek().tok, Tok::Ident(s) if s == word)
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if self.at_ident(word) {
            self.next();
            true
        } else {
            false
        }
    }

    fn syntax_error<T>(&self, expected: impl Into<String>) -> Result<T, ParseError> {
        let token = self.peek();
        Err(ParseError::Syntax {
            line: token.line,
            col: token.col,
            expected: expected.into(),
            found: token.tok.describe(),
        })
    }

    fn semantic_error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        let token = self.peek();
        Err(ParseError::Semantic {
            line: token.line,
            col: token.col,
            message: message.into(),
        })
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_ident(word) {
            Ok(())
        } else {
            self.syntax_error(format!("'{word}'"))
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ParseError> {
        match self.peek().tok {
            Tok::Punct(p) if p == c => {
                self.next();
                Ok(())
            }
            _ => self.syntax_error(format!("'{c}'")),
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        match self.peek().tok {
            Tok::Punct(p) if p == c => {
                self.next();
                true
            }
            _ => false,
        }
    }

    fn local_name(&mut self) -> Result<String, ParseError> {
        match self.peek().tok.clone() {
            Tok::Local(name) => {
                self.next();
                Ok(name)
            }
            _ => self.syntax_error("local name"),
        }
    }

    fn global_name(&mut self) -> Result<String, ParseError> {
        match self.peek().tok.clone() {
            Tok::Global(name) => {
                self.next();
                Ok(name)
            }
            _ => self.syntax_error("global name"),
        }
    }

    fn int_lit(&mut self) -> Result<i64, ParseError> {
        match self.peek().tok {
            Tok::Int(value) => {
                self.next();
                Ok(value)
            }
            _ => self.syntax_error("integer literal"),
        }
    }

    // ---- types ------------------------------------------------------------

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        match self.peek().tok.clone() {
            Tok::Ident(word) => {
                if word == "void" {
                    self.next();
                    return Ok(self.ctx.void_type());
                }
                if word == "ptr" {
                    self.next();
                    return Ok(self.ctx.ptr_type());
                }
                if let Some(bits) = word.strip_prefix('i').and_then(|s| s.parse::<u32>().ok()) {
                    if bits >= 1 && bits <= 64 {
                        self.next();
                        return Ok(self.ctx.int_type(bits));
                    }
                }
                if let Some(bits) = word.strip_prefix('f').and_then(|s| s.parse::<u32>().ok()) {
                    if bits == 32 || bits == 64 {
                        self.next();
                        return Ok(self.ctx.float_type(bits));
                    }
                }
                self.syntax_error("type")
            }
            Tok::Global(name) => match self.ctx.named_struct(&name) {
                Some(ty) => {
                    self.next();
                    Ok(ty)
                }
                None => self.semantic_error(format!("unknown struct @{name}")),
            },
            Tok::Punct('[') => {
                self.next();
                let count = self.int_lit()? as u64;
                self.expect_ident("x")?;
                let elem = self.parse_type()?;
                self.expect_punct(']')?;
                Ok(self.ctx.array_type(elem, count))
            }
            Tok::Punct('{') => {
                self.next();
                let mut members = Vec::new();
                if !self.eat_punct('}') {
                    loop {
                        members.push(self.parse_type()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct('}')?;
                }
                Ok(self.ctx.anonymous_struct(members))
            }
            _ => self.syntax_error("type"),
        }
    }

    // ---- constants --------------------------------------------------------

    fn parse_const(&mut self, ty: Type) -> Result<crate::entities::Const, ParseError> {
        match self.peek().tok.clone() {
            Tok::Ident(word) if word == "undef" => {
                self.next();
                Ok(self.ctx.undef(ty))
            }
            Tok::Ident(word) if word == "null" => {
                self.next();
                Ok(self.ctx.null_ptr())
            }
            Tok::Int(value) => {
                self.next();
                match self.ctx.type_info(ty).data {
                    TypeData::Int { bits } => {
                        Ok(self.ctx.apint_const(scatha_types::ApInt::from_i64(value, bits)))
                    }
                    TypeData::Float { bits } => Ok(self
                        .ctx
                        .apfloat_const(scatha_types::ApFloat::with_width(value as f64, bits))),
                    _ => self.semantic_error("integer literal for non-numeric type"),
                }
            }
            Tok::Float(value) => {
                self.next();
                match self.ctx.type_info(ty).data {
                    TypeData::Float { bits } => Ok(self
                        .ctx
                        .apfloat_const(scatha_types::ApFloat::with_width(value, bits))),
                    _ => self.semantic_error("float literal for non-float type"),
                }
            }
            Tok::Punct('{') => {
                self.next();
                let mut members = Vec::new();
                if !self.eat_punct('}') {
                    loop {
                        let member_ty = self.parse_type()?;
                        members.push(self.parse_const(member_ty)?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct('}')?;
                }
                Ok(self.ctx.record_const(ty, members))
            }
            _ => self.syntax_error("constant"),
        }
    }
}

#[derive(Default)]
struct Scope {
    values: HashMap<String, Value>,
    blocks: HashMap<String, Block>,
    // (inst, operand index, name, line, col) patched after the body.
    fixups: Vec<(Inst, usize, String, u32, u32)>,
}

/// Parses a module from text.
pub fn parse(text: &str) -> Result<(Context, Module), ParseError> {
    let tokens = lex(text)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx: Context::new(),
    };
    let mut module = Module::new();
    // First pass: declarations. Function bodies are skipped by brace
    // matching and parsed in the second pass, so call operands can reference
    // functions defined later.
    let mut bodies: Vec<(FuncId, usize)> = Vec::new();
    loop {
        if matches!(parser.peek().tok, Tok::Eof) {
            break;
        }
        let public = parser.eat_ident("pub");
        if parser.eat_ident("struct") {
            let name = parser.global_name()?;
            parser.expect_punct('{')?;
            let mut members = Vec::new();
            if !parser.eat_punct('}') {
                loop {
                    members.push(parser.parse_type()?);
                    if !parser.eat_punct(',') {
                        break;
                    }
                }
                parser.expect_punct('}')?;
            }
            if parser.ctx.named_struct(&name).is_some() {
                return parser.semantic_error(format!("redefinition of struct @{name}"));
            }
            let ty = parser.ctx.declare_named_struct(&name, members);
            module.declare_struct(ty);
        } else if parser.at_ident("global") || parser.at_ident("constant") {
            let is_const = parser.eat_ident("constant");
            if !is_const {
                parser.expect_ident("global")?;
            }
            let name = parser.global_name()?;
            parser.expect_punct('=')?;
            let value_ty = parser.parse_type()?;
            let init = parser.parse_const(value_ty)?;
            if module.global_by_name(&name).is_some() {
                return parser.semantic_error(format!("redefinition of @{name}"));
            }
            module.add_global(GlobalData {
                name,
                value_ty,
                init,
                is_const,
                visibility: if public {
                    Visibility::External
                } else {
                    Visibility::Internal
                },
            });
        } else if parser.eat_ident("ext") {
            parser.expect_ident("func")?;
            let ret = parser.parse_type()?;
            let name = parser.global_name()?;
            parser.expect_punct('(')?;
            let mut params = Vec::new();
            if !parser.eat_punct(')') {
                loop {
                    params.push(parser.parse_type()?);
                    if !parser.eat_punct(',') {
                        break;
                    }
                }
                parser.expect_punct(')')?;
            }
            let ty = parser.ctx.function_type(ret, params);
            if module.function_by_name(&name).is_some() {
                return parser.semantic_error(format!("redefinition of @{name}"));
            }
            module.add_foreign_function(ForeignFunctionDecl { name, ty });
        } else if parser.eat_ident("func") {
            let ret = parser.parse_type()?;
            let name = parser.global_name()?;
            parser.expect_punct('(')?;
            let mut param_types = Vec::new();
            let mut param_names = Vec::new();
            if !parser.eat_punct(')') {
                loop {
                    param_types.push(parser.parse_type()?);
                    param_names.push(parser.local_name()?);
                    if !parser.eat_punct(',') {
                        break;
                    }
                }
                parser.expect_punct(')')?;
            }
            let ty = parser.ctx.function_type(ret, param_types.clone());
            let mut function = Function::new(name.clone(), ty, &param_types, Some(&param_names));
            function.set_visibility(if public {
                Visibility::External
            } else {
                Visibility::Internal
            });
            if module.function_by_name(&name).is_some() {
                return parser.semantic_error(format!("redefinition of @{name}"));
            }
            let id = module.add_function(function);
            parser.expect_punct('{')?;
            bodies.push((id, parser.pos));
            let mut depth = 1usize;
            while depth > 0 {
                match parser.next().tok {
                    Tok::Punct('{') => depth += 1,
                    Tok::Punct('}') => depth -= 1,
                    Tok::Eof => return parser.syntax_error("'}'"),
                    _ => {}
                }
            }
        } else {
            return parser.syntax_error("top level declaration");
        }
    }
    // Second pass: function bodies.
    for (id, pos) in bodies {
        parser.pos = pos;
        parse_body(&mut parser, &mut module, id)?;
    }
    Ok((parser.ctx, module))
}

fn parse_body(parser: &mut Parser, module: &mut Module, id: FuncId) -> Result<(), ParseError> {
    let mut scope = Scope::default();
    module.with_function_mut(id, |module, func| {
        for (index, param) in func.params().iter().enumerate() {
            scope
                .values
                .insert(param.name.clone(), Value::Param(index as u32));
        }
        let mut current: Option<Block> = None;
        let mut defined_blocks = 0usize;
        loop {
            if parser.eat_punct('}') {
                break;
            }
            // A block label: `%name:`.
            if matches!(parser.peek().tok, Tok::Local(_))
                && matches!(parser.tokens[parser.pos + 1].tok, Tok::Punct(':'))
            {
                let name = parser.local_name()?;
                parser.expect_punct(':')?;
                let block = block_ref(func, &mut scope, &name);
                if !func.block_insts(block).is_empty() {
                    return parser.semantic_error(format!("redefinition of block %{name}"));
                }
                // Label order, not first-reference order, decides the layout.
                func.move_block(block, defined_blocks);
                defined_blocks += 1;
                current = Some(block);
                continue;
            }
            let Some(block) = current else {
                return parser.syntax_error("block label");
            };
            parse_inst(parser, module, func, &mut scope, block)?;
        }
        // Patch forward references now that every name is known.
        for (inst, index, name, line, col) in std::mem::take(&mut scope.fixups) {
            match scope.values.get(&name) {
                Some(&value) => func.set_operand(inst, index, value),
                None => {
                    return Err(ParseError::Semantic {
                        line,
                        col,
                        message: format!("unknown value %{name}"),
                    })
                }
            }
        }
        // A label referenced but never defined leaves an empty block behind.
        for (name, &block) in &scope.blocks {
            if func.block_insts(block).is_empty() {
                return Err(ParseError::Semantic {
                    line: 0,
                    col: 0,
                    message: format!("undefined block %{name}"),
                });
            }
        }
        Ok(())
    })
}

/// Looks up a block by name, creating it on first reference.
fn block_ref(func: &mut Function, scope: &mut Scope, name: &str) -> Block {
    if let Some(&block) = scope.blocks.get(name) {
        return block;
    }
    let block = func.add_block(name);
    scope.blocks.insert(name.to_owned(), block);
    block
}

/// Parses `label %name`.
fn parse_label(
    parser: &mut Parser,
    func: &mut Function,
    scope: &mut Scope,
) -> Result<Block, ParseError> {
    parser.expect_ident("label")?;
    let name = parser.local_name()?;
    Ok(block_ref(func, scope, &name))
}

/// Parses a value of known type. Unknown local names yield an `undef`
/// placeholder and a fixup entry.
fn parse_value(
    parser: &mut Parser,
    module: &Module,
    scope: &mut Scope,
    ty: Type,
) -> Result<(Value, Option<(String, u32, u32)>), ParseError> {
    match parser.peek().tok.clone() {
        Tok::Local(name) => {
            let token = parser.next();
            match scope.values.get(&name) {
                Some(&value) => Ok((value, None)),
                None => {
                    let placeholder = Value::Const(parser.ctx.undef(ty));
                    Ok((placeholder, Some((name, token.line, token.col))))
                }
            }
        }
        Tok::Global(name) => {
            parser.next();
            if let Some(id) = module.global_by_name(&name) {
                Ok((Value::Global(id), None))
            } else if let Some(id) = module.function_by_name(&name) {
                Ok((Value::Func(id), None))
            } else {
                parser.semantic_error(format!("unknown global @{name}"))
            }
        }
        _ => Ok((Value::Const(parser.parse_const(ty)?), None)),
    }
}

/// Parses `type value`.
fn parse_typed_value(
    parser: &mut Parser,
    module: &Module,
    scope: &mut Scope,
    ty_out: Option<&mut Type>,
) -> Result<(Value, Option<(String, u32, u32)>), ParseError> {
    let ty = parser.parse_type()?;
    if let Some(out) = ty_out {
        *out = ty;
    }
    parse_value(parser, module, scope, ty)
}

fn arith_op(word: &str) -> Option<ArithOp> {
    Some(match word {
        "add" => ArithOp::Add,
        "sub" => ArithOp::Sub,
        "mul" => ArithOp::Mul,
        "sdiv" => ArithOp::SDiv,
        "udiv" => ArithOp::UDiv,
        "srem" => ArithOp::SRem,
        "urem" => ArithOp::URem,
        "shl" => ArithOp::Shl,
        "lshr" => ArithOp::LShr,
        "ashr" => ArithOp::AShr,
        "and" => ArithOp::And,
        "or" => ArithOp::Or,
        "xor" => ArithOp::Xor,
        "fadd" => ArithOp::FAdd,
        "fsub" => ArithOp::FSub,
        "fmul" => ArithOp::FMul,
        "fdiv" => ArithOp::FDiv,
        _ => return None,
    })
}

fn unary_op(word: &str) -> Option<UnaryArithOp> {
    Some(match word {
        "neg" => UnaryArithOp::Neg,
        "bnt" => UnaryArithOp::BitNot,
        "lnt" => UnaryArithOp::LogNot,
        _ => return None,
    })
}

fn cmp_mode(word: &str) -> Option<CmpMode> {
    Some(match word {
        "scmp" => CmpMode::Signed,
        "ucmp" => CmpMode::Unsigned,
        "fcmp" => CmpMode::Float,
        _ => return None,
    })
}

fn cmp_rel(word: &str) -> Option<CmpRel> {
    Some(match word {
        "eq" => CmpRel::Eq,
        "ne" => CmpRel::Ne,
        "lt" => CmpRel::Lt,
        "le" => CmpRel::Le,
        "gt" => CmpRel::Gt,
        "ge" => CmpRel::Ge,
        _ => return None,
    })
}

fn conv_op(word: &str) -> Option<ConvOp> {
    Some(match word {
        "sext" => ConvOp::Sext,
        "zext" => ConvOp::Zext,
        "trunc" => ConvOp::Trunc,
        "sitofp" => ConvOp::Sitofp,
        "uitofp" => ConvOp::Uitofp,
        "fptosi" => ConvOp::Fptosi,
        "fptoui" => ConvOp::Fptoui,
        "fpext" => ConvOp::Fpext,
        "fptrunc" => ConvOp::Fptrunc,
        "bitcast" => ConvOp::Bitcast,
        "ptrtoint" => ConvOp::Ptrtoint,
        "inttoptr" => ConvOp::Inttoptr,
        _ => return None,
    })
}

fn parse_inst(
    parser: &mut Parser,
    module: &Module,
    func: &mut Function,
    scope: &mut Scope,
    block: Block,
) -> Result<(), ParseError> {
    let result_name = if matches!(parser.peek().tok, Tok::Local(_))
        && matches!(parser.tokens[parser.pos + 1].tok, Tok::Punct('='))
    {
        let name = parser.local_name()?;
        parser.expect_punct('=')?;
        Some(name)
    } else {
        None
    };
    let mnemonic = match parser.peek().tok.clone() {
        Tok::Ident(word) => {
            parser.next();
            word
        }
        _ => return parser.syntax_error("instruction"),
    };
    let mut fixups: Vec<(usize, String, u32, u32)> = Vec::new();
    let mut record = |slot: usize, pending: Option<(String, u32, u32)>| {
        if let Some((name, line, col)) = pending {
            fixups.push((slot, name, line, col));
        }
    };
    let (data, ty) = match mnemonic.as_str() {
        "alloca" => {
            let allocated = parser.parse_type()?;
            parser.expect_punct(',')?;
            let (count, pending) = parse_typed_value(parser, module, scope, None)?;
            record(0, pending);
            (InstData::Alloca { allocated, count }, parser.ctx.ptr_type())
        }
        "load" => {
            let loaded = parser.parse_type()?;
            parser.expect_punct(',')?;
            let (addr, pending) = parse_typed_value(parser, module, scope, None)?;
            record(0, pending);
            (InstData::Load { addr }, loaded)
        }
        "store" => {
            let (addr, p0) = parse_typed_value(parser, module, scope, None)?;
            record(0, p0);
            parser.expect_punct(',')?;
            let (value, p1) = parse_typed_value(parser, module, scope, None)?;
            record(1, p1);
            (InstData::Store { addr, value }, parser.ctx.void_type())
        }
        "getelementptr" => {
            parser.eat_ident("inbounds");
            let pointee = parser.parse_type()?;
            parser.expect_punct(',')?;
            let (base, p0) = parse_typed_value(parser, module, scope, None)?;
            record(0, p0);
            parser.expect_punct(',')?;
            let (index, p1) = parse_typed_value(parser, module, scope, None)?;
            record(1, p1);
            let mut members = SmallVec::new();
            while parser.eat_punct(',') {
                members.push(parser.int_lit()? as u32);
            }
            (
                InstData::GetElementPtr {
                    pointee,
                    base,
                    index,
                    members,
                },
                parser.ctx.ptr_type(),
            )
        }
        "phi" => {
            let ty = parser.parse_type()?;
            let mut args = SmallVec::new();
            let mut slot = 0usize;
            loop {
                parser.expect_punct('[')?;
                parser.expect_ident("label")?;
                let name = parser.local_name()?;
                let pred = block_ref(func, scope, &name);
                parser.expect_punct(':')?;
                let (value, pending) = parse_value(parser, module, scope, ty)?;
                record(slot * 2 + 1, pending);
                parser.expect_punct(']')?;
                args.push((pred, value));
                slot += 1;
                if !parser.eat_punct(',') {
                    break;
                }
            }
            (InstData::Phi { args }, ty)
        }
        "select" => {
            let (cond, p0) = parse_typed_value(parser, module, scope, None)?;
            record(0, p0);
            parser.expect_punct(',')?;
            let mut ty = parser.ctx.void_type();
            let (then_value, p1) = parse_typed_value(parser, module, scope, Some(&mut ty))?;
            record(1, p1);
            parser.expect_punct(',')?;
            let (else_value, p2) = parse_typed_value(parser, module, scope, None)?;
            record(2, p2);
            (
                InstData::Select {
                    cond,
                    then_value,
                    else_value,
                },
                ty,
            )
        }
        "tail" | "call" => {
            let tail = mnemonic == "tail";
            if tail {
                parser.expect_ident("call")?;
            }
            let ret = parser.parse_type()?;
            let ptr_ty = parser.ctx.ptr_type();
            let (callee, p0) = parse_value(parser, module, scope, ptr_ty)?;
            record(0, p0);
            let mut args = SmallVec::new();
            let mut slot = 1usize;
            while parser.eat_punct(',') {
                let (arg, pending) = parse_typed_value(parser, module, scope, None)?;
                record(slot, pending);
                args.push(arg);
                slot += 1;
            }
            (InstData::Call { callee, args, tail }, ret)
        }
        "extract_value" => {
            let mut agg_ty = parser.ctx.void_type();
            let (aggregate, p0) = parse_typed_value(parser, module, scope, Some(&mut agg_ty))?;
            record(0, p0);
            let mut indices = SmallVec::new();
            while parser.eat_punct(',') {
                indices.push(parser.int_lit()? as u32);
            }
            let mut member_ty = agg_ty;
            for &index in &indices {
                member_ty = match &parser.ctx.type_info(member_ty).data {
                    TypeData::Struct { members, .. } => members[index as usize],
                    TypeData::Array { elem, .. } => *elem,
                    _ => return parser.semantic_error("extract_value into non-aggregate"),
                };
            }
            (
                InstData::ExtractValue { aggregate, indices },
                member_ty,
            )
        }
        "insert_value" => {
            let mut agg_ty = parser.ctx.void_type();
            let (aggregate, p0) = parse_typed_value(parser, module, scope, Some(&mut agg_ty))?;
            record(0, p0);
            parser.expect_punct(',')?;
            let (value, p1) = parse_typed_value(parser, module, scope, None)?;
            record(1, p1);
            let mut indices = SmallVec::new();
            while parser.eat_punct(',') {
                indices.push(parser.int_lit()? as u32);
            }
            (
                InstData::InsertValue {
                    aggregate,
                    value,
                    indices,
                },
                agg_ty,
            )
        }
        "return" => {
            // A value follows unless the next token ends the block: `}` or a
            // label line. `return void` is also accepted for the bare form.
            let value = if matches!(parser.peek().tok, Tok::Ident(ref w) if w == "void") {
                parser.next();
                None
            } else if starts_type(parser) {
                let (value, pending) = parse_typed_value(parser, module, scope, None)?;
                record(0, pending);
                Some(value)
            } else {
                None
            };
            (InstData::Return { value }, parser.ctx.void_type())
        }
        "goto" => {
            let target = parse_label(parser, func, scope)?;
            (InstData::Goto { target }, parser.ctx.void_type())
        }
        "branch" => {
            let (cond, p0) = parse_typed_value(parser, module, scope, None)?;
            record(0, p0);
            parser.expect_punct(',')?;
            let then_block = parse_label(parser, func, scope)?;
            parser.expect_punct(',')?;
            let else_block = parse_label(parser, func, scope)?;
            (
                InstData::Branch {
                    cond,
                    then_block,
                    else_block,
                },
                parser.ctx.void_type(),
            )
        }
        "unreachable" => (InstData::Unreachable, parser.ctx.void_type()),
        word => {
            if let Some(op) = arith_op(word) {
                let mut ty = parser.ctx.void_type();
                let (lhs, p0) = parse_typed_value(parser, module, scope, Some(&mut ty))?;
                record(0, p0);
                parser.expect_punct(',')?;
                let (rhs, p1) = parse_typed_value(parser, module, scope, None)?;
                record(1, p1);
                (InstData::Arith { op, lhs, rhs }, ty)
            } else if let Some(op) = unary_op(word) {
                let mut ty = parser.ctx.void_type();
                let (value, p0) = parse_typed_value(parser, module, scope, Some(&mut ty))?;
                record(0, p0);
                (InstData::UnaryArith { op, operand: value }, ty)
            } else if let Some(mode) = cmp_mode(word) {
                let rel = match parser.peek().tok.clone() {
                    Tok::Ident(w) => match cmp_rel(&w) {
                        Some(rel) => {
                            parser.next();
                            rel
                        }
                        None => return parser.syntax_error("compare relation"),
                    },
                    _ => return parser.syntax_error("compare relation"),
                };
                let (lhs, p0) = parse_typed_value(parser, module, scope, None)?;
                record(0, p0);
                parser.expect_punct(',')?;
                let (rhs, p1) = parse_typed_value(parser, module, scope, None)?;
                record(1, p1);
                (
                    InstData::Cmp {
                        mode,
                        rel,
                        lhs,
                        rhs,
                    },
                    parser.ctx.bool_type(),
                )
            } else if let Some(op) = conv_op(word) {
                let (value, p0) = parse_typed_value(parser, module, scope, None)?;
                record(0, p0);
                parser.expect_ident("to")?;
                let target = parser.parse_type()?;
                (InstData::Conv { op, operand: value }, target)
            } else {
                return parser.syntax_error("instruction");
            }
        }
    };
    let inst = func.append_inst(block, data, ty, result_name.as_deref());
    if let Some(name) = result_name {
        if scope.values.contains_key(&name) {
            return parser.semantic_error(format!("redefinition of %{name}"));
        }
        scope.values.insert(name, Value::Inst(inst));
    }
    for (slot, name, line, col) in fixups {
        scope.fixups.push((inst, slot, name, line, col));
    }
    Ok(())
}

/// `true` if the next token can start a type.
fn starts_type(parser: &Parser) -> bool {
    match &parser.peek().tok {
        Tok::Ident(word) => {
            word == "void"
                || word == "ptr"
                || word
                    .strip_prefix('i')
                    .is_some_and(|s| s.parse::<u32>().is_ok())
                || word
                    .strip_prefix('f')
                    .is_some_and(|s| s.parse::<u32>().is_ok())
        }
        Tok::Global(_) | Tok::Punct('[') | Tok::Punct('{') => true,
        _ => false,
    }
}
