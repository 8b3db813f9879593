//! The pipeline language.
//!
//! ```text
//! pipeline   ::= mpass ("," mpass)*
//! mpass      ::= id ["[" args "]"] ["(" fpass-list ")"] | fpass
//! fpass-list ::= fpass ("," fpass)*
//! fpass      ::= id ["[" args "]"]
//! args       ::= arg ("," arg)*
//! arg        ::= id [":" value]
//! value      ::= id | number | string
//! ```
//!
//! A bare function pass at module level is sugar for `foreach(fpass)`.

use core::fmt;

use crate::context::Context;
use crate::module::Module;

use super::{
    ArgValue, DefaultValue, FunctionPassDesc, LocalPasses, ModulePassDesc, PassArgs, PassManager,
};

/// Error from parsing a pipeline description.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    /// A character that starts no token.
    #[error("{line}:{col}: {message}")]
    Lexical {
        /// 1-based source line.
        line: u32,
        /// 1-based source column.
        col: u32,
        /// Description.
        message: String,
    },
    /// Token stream does not match the pipeline grammar.
    #[error("{line}:{col}: {message}")]
    Syntax {
        /// 1-based source line.
        line: u32,
        /// 1-based source column.
        col: u32,
        /// Description.
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Id(String),
    Number(i64),
    Str(String),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    col: u32,
}

fn lex(text: &str) -> Result<Vec<Token>, PipelineError> {
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
        let tok = if c.is_ascii_alphabetic() || c == '_' {
            let mut word = String::new();
            while chars
                .peek()
                .is_some_and(|&c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                word.push(bump!());
            }
            Tok::Id(word)
        } else if c.is_ascii_digit() || c == '-' {
            let mut text = String::new();
            text.push(bump!());
            while chars.peek().is_some_and(|&c| c.is_ascii_digit()) {
                text.push(bump!());
            }
            match text.parse::<i64>() {
                Ok(value) => Tok::Number(value),
                Err(_) => {
                    return Err(PipelineError::Lexical {
                        line: tline,
                        col: tcol,
                        message: format!("invalid number '{text}'"),
                    })
                }
            }
        } else if c == '"' {
            bump!();
            let mut value = String::new();
            loop {
                match chars.peek() {
                    Some('"') => {
                        bump!();
                        break;
                    }
                    Some(_) => value.push(bump!()),
                    None => {
                        return Err(PipelineError::Lexical {
                            line: tline,
                            col: tcol,
                            message: "unterminated string".into(),
                        })
                    }
                }
            }
            Tok::Str(value)
        } else if "[](),:".contains(c) {
            bump!();
            Tok::Punct(c)
        } else {
            return Err(PipelineError::Lexical {
                line: tline,
                col: tcol,
                message: format!("unexpected character '{c}'"),
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

#[derive(Debug, Clone)]
struct PipelineNode {
    pass: ModulePassDesc,
    args: PassArgs,
    explicit_args: Vec<(String, ArgValue)>,
    local: LocalPasses,
    explicit_local: bool,
}

/// A parsed, executable pass schedule.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    nodes: Vec<PipelineNode>,
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'a PassManager,
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

    fn error<T>(&self, message: impl Into<String>) -> Result<T, PipelineError> {
        let token = self.peek();
        Err(PipelineError::Syntax {
            line: token.line,
            col: token.col,
            message: message.into(),
        })
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if matches!(self.peek().tok, Tok::Punct(p) if p == c) {
            self.next();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<String, PipelineError> {
        match self.peek().tok.clone() {
            Tok::Id(word) => {
                self.next();
                Ok(word)
            }
            ref other => self.error(format!("expected pass name, found '{other:?}'")),
        }
    }

    fn parse_args(
        &mut self,
        params: &[super::ParamDesc],
        pass_name: &str,
    ) -> Result<(PassArgs, Vec<(String, ArgValue)>), PipelineError> {
        let mut args = PassArgs::defaults(params);
        let mut explicit = Vec::new();
        if !self.eat_punct('[') {
            return Ok((args, explicit));
        }
        loop {
            let name = self.ident()?;
            let Some(param) = params.iter().find(|p| p.name == name) else {
                return self.error(format!("pass '{pass_name}' has no parameter '{name}'"));
            };
            let value = if self.eat_punct(':') {
                match (self.next().tok, param.default) {
                    (Tok::Id(word), DefaultValue::Flag(_)) if word == "true" => ArgValue::Flag(true),
                    (Tok::Id(word), DefaultValue::Flag(_)) if word == "false" => {
                        ArgValue::Flag(false)
                    }
                    (Tok::Number(v), DefaultValue::Number(_)) => ArgValue::Number(v),
                    (Tok::Str(v), DefaultValue::String(_)) | (Tok::Id(v), DefaultValue::String(_)) => {
                        ArgValue::String(v)
                    }
                    _ => {
                        return self
                            .error(format!("invalid value for parameter '{name}' of '{pass_name}'"))
                    }
                }
            } else {
                // A bare flag name means true.
                match param.default {
                    DefaultValue::Flag(_) => ArgValue::Flag(true),
                    _ => return self.error(format!("parameter '{name}' needs a value")),
                }
            };
            args.set(&name, value.clone());
            explicit.push((name, value));
            if !self.eat_punct(',') {
                break;
            }
        }
        if !self.eat_punct(']') {
            return self.error("expected ']'");
        }
        Ok((args, explicit))
    }

    fn parse_fpass(&mut self) -> Result<(FunctionPassDesc, PassArgs, Vec<(String, ArgValue)>), PipelineError> {
        let (line, col) = (self.peek().line, self.peek().col);
        let name = self.ident()?;
        let Some(desc) = self.registry.function_pass(&name) else {
            return Err(PipelineError::Syntax {
                line,
                col,
                message: format!("unknown function pass '{name}'"),
            });
        };
        let desc = *desc;
        let (args, explicit) = self.parse_args(desc.params, desc.name)?;
        Ok((desc, args, explicit))
    }

    fn parse_mpass(&mut self) -> Result<PipelineNode, PipelineError> {
        let (line, col) = (self.peek().line, self.peek().col);
        let name = self.ident()?;
        if let Some(desc) = self.registry.module_pass(&name).copied() {
            let (args, explicit_args) = self.parse_args(desc.params, desc.name)?;
            let mut local = Vec::new();
            let mut explicit_local = false;
            if self.eat_punct('(') {
                explicit_local = true;
                loop {
                    let (fdesc, fargs, fexplicit) = self.parse_fpass()?;
                    let _ = fexplicit;
                    local.push((fdesc, fargs));
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                if !self.eat_punct(')') {
                    return self.error("expected ')'");
                }
            }
            return Ok(PipelineNode {
                pass: desc,
                args,
                explicit_args,
                local: LocalPasses::new(local),
                explicit_local,
            });
        }
        // A bare function pass: sugar for `foreach(fpass)`.
        let Some(fdesc) = self.registry.function_pass(&name).copied() else {
            return Err(PipelineError::Syntax {
                line,
                col,
                message: format!("unknown pass '{name}'"),
            });
        };
        let (fargs, _) = self.parse_args(fdesc.params, fdesc.name)?;
        let foreach = *self
            .registry
            .module_pass("foreach")
            .expect("foreach is always registered");
        Ok(PipelineNode {
            pass: foreach,
            args: PassArgs::defaults(foreach.params),
            explicit_args: Vec::new(),
            local: LocalPasses::new(vec![(fdesc, fargs)]),
            explicit_local: false,
        })
    }
}

impl Pipeline {
    /// Parses a pipeline against the global registry.
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        Self::parse_with(text, PassManager::global())
    }

    /// Parses a pipeline against a caller-supplied registry.
    pub fn parse_with(text: &str, registry: &PassManager) -> Result<Self, PipelineError> {
        let mut parser = Parser {
            tokens: lex(text)?,
            pos: 0,
            registry,
        };
        let mut nodes = Vec::new();
        loop {
            nodes.push(parser.parse_mpass()?);
            if !parser.eat_punct(',') {
                break;
            }
        }
        if !matches!(parser.peek().tok, Tok::Eof) {
            return parser.error("expected ',' or end of pipeline");
        }
        Ok(Self { nodes })
    }

    /// Executes the pipeline. Returns `true` if any pass changed the module.
    pub fn run(&self, ctx: &mut Context, module: &mut Module) -> bool {
        let mut modified = false;
        for node in &self.nodes {
            let changed = (node.pass.run)(ctx, module, &node.local, &node.args);
            tracing::debug!(pass = node.pass.name, changed);
            modified |= changed;
        }
        modified
    }
}

impl fmt::Display for Pipeline {
    /// Prints the canonical form: explicit arguments only, stable order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            // `foreach` sugar prints as its bare function pass.
            if node.pass.name == "foreach" && !node.explicit_local && node.local.passes().len() == 1
            {
                let (desc, _) = &node.local.passes()[0];
                write!(f, "{}", desc.name)?;
                continue;
            }
            write!(f, "{}", node.pass.name)?;
            if !node.explicit_args.is_empty() {
                write!(f, "[")?;
                for (j, (name, value)) in node.explicit_args.iter().enumerate() {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    match value {
                        ArgValue::Flag(v) => write!(f, "{name}: {v}")?,
                        ArgValue::Number(v) => write!(f, "{name}: {v}")?,
                        ArgValue::String(v) => write!(f, "{name}: \"{v}\"")?,
                    }
                }
                write!(f, "]")?;
            }
            if node.explicit_local {
                write!(f, "(")?;
                for (j, (desc, _)) in node.local.passes().iter().enumerate() {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", desc.name)?;
                }
                write!(f, ")")?;
            }
        }
        Ok(())
    }
}
