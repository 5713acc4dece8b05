//! AST → program lowering
//!
//! Resolves names to value slots and buffer indices, inlines `defines`,
//! and enforces the structural rules the executors rely on: exactly one
//! `@outer` loop at the top of the kernel body, unit step on that loop,
//! no writes through `const` pointers.

use std::collections::HashMap;

use super::{Expr, Param, ParamKind, Program, SlotType, Stmt, Value};
use crate::error::{BackendError, Result};
use crate::lang::ast;
use crate::types::{BuildOptions, ScalarType};

/// What a name refers to during lowering
#[derive(Debug, Clone, Copy)]
enum Binding {
    Slot(usize),
    Buffer(usize),
    Const(Value),
}

struct Lowerer {
    scopes: Vec<HashMap<String, Binding>>,
    slot_types: Vec<SlotType>,
    /// Writability per buffer index, in parameter declaration order
    buffer_writable: Vec<bool>,
}

fn err(line: u32, message: impl Into<String>) -> BackendError {
    BackendError::Compile(format!("line {line}: {}", message.into()))
}

fn scalar_type(ty: ast::Type, line: u32, what: &str) -> Result<ScalarType> {
    match ty {
        ast::Type::Int => Ok(ScalarType::I32),
        ast::Type::Long => Ok(ScalarType::I64),
        ast::Type::Float => Ok(ScalarType::F32),
        ast::Type::Double => Ok(ScalarType::F64),
        ast::Type::Bool => Err(err(line, format!("bool is not a valid {what} type"))),
    }
}

/// Parse a define value as a literal
fn define_value(name: &str, text: &str) -> Result<Value> {
    let trimmed = text.trim();
    match trimmed {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        if let Ok(narrow) = i32::try_from(v) {
            return Ok(Value::I32(narrow));
        }
        return Ok(Value::I64(v));
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Ok(Value::F64(v));
    }
    Err(BackendError::Compile(format!(
        "define '{name}' must be a numeric or boolean literal, got '{text}'"
    )))
}

/// Lower the kernel named `entry` from a parsed source file
pub(super) fn lower(kernels: &[ast::Kernel], entry: &str, options: &BuildOptions) -> Result<Program> {
    let kernel = kernels.iter().find(|k| k.name == entry).ok_or_else(|| {
        let names: Vec<&str> = kernels.iter().map(|k| k.name.as_str()).collect();
        BackendError::Compile(format!(
            "entry point '{entry}' not found in kernel source (kernels: {})",
            names.join(", ")
        ))
    })?;

    let mut lowerer = Lowerer {
        scopes: vec![HashMap::new()],
        slot_types: Vec::new(),
        buffer_writable: Vec::new(),
    };

    // Defines sit in the outermost scope; parameters may shadow them.
    for (name, text) in &options.defines {
        let value = define_value(name, text)?;
        lowerer.scopes[0].insert(name.clone(), Binding::Const(value));
    }
    lowerer.scopes.push(HashMap::new());

    let mut params = Vec::with_capacity(kernel.params.len());
    for param in &kernel.params {
        if lowerer.scopes.last().unwrap().contains_key(&param.name) {
            return Err(err(param.line, format!("duplicate parameter '{}'", param.name)));
        }
        let kind = if param.is_pointer {
            let elem = scalar_type(param.ty, param.line, "buffer element")?;
            let buffer = lowerer.buffer_writable.len();
            lowerer.buffer_writable.push(!param.is_const);
            lowerer
                .scopes
                .last_mut()
                .unwrap()
                .insert(param.name.clone(), Binding::Buffer(buffer));
            ParamKind::Buffer {
                elem,
                writable: !param.is_const,
            }
        } else {
            let st = scalar_type(param.ty, param.line, "scalar parameter")?;
            let slot = lowerer.alloc_slot(SlotType::Scalar(st));
            lowerer
                .scopes
                .last_mut()
                .unwrap()
                .insert(param.name.clone(), Binding::Slot(slot));
            ParamKind::Scalar(st)
        };
        params.push(Param {
            name: param.name.clone(),
            kind,
        });
    }

    // The kernel body must be exactly one @outer loop.
    let outer = match kernel.body.as_slice() {
        [ast::Stmt::For {
            outer: true,
            var,
            start,
            bound,
            step,
            body,
            line,
        }] => {
            if !matches!(step, ast::Step::Inc) {
                return Err(err(*line, "the @outer loop must step by one (++)"));
            }
            (var, start, bound, body, *line)
        }
        [single] => {
            return Err(err(
                single.line(),
                "kernel body must be a single @outer loop over the launch index",
            ));
        }
        _ => {
            return Err(err(
                kernel.line,
                "kernel body must be a single @outer loop over the launch index",
            ));
        }
    };
    let (var, start, bound, body, line) = outer;

    let range_start = lowerer.lower_expr(start, line)?;
    let range_bound = lowerer.lower_expr(bound, line)?;

    lowerer.scopes.push(HashMap::new());
    let index_slot = lowerer.alloc_slot(SlotType::Scalar(ScalarType::I32));
    lowerer
        .scopes
        .last_mut()
        .unwrap()
        .insert(var.clone(), Binding::Slot(index_slot));

    let body = lowerer.lower_block(body)?;
    lowerer.scopes.pop();

    Ok(Program {
        entry: kernel.name.clone(),
        params,
        index_slot,
        range_start,
        range_bound,
        slot_types: lowerer.slot_types,
        body,
    })
}

impl Lowerer {
    fn alloc_slot(&mut self, ty: SlotType) -> usize {
        self.slot_types.push(ty);
        self.slot_types.len() - 1
    }

    fn resolve(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn lower_block(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<Stmt>> {
        self.scopes.push(HashMap::new());
        let lowered: Result<Vec<Stmt>> = stmts.iter().map(|stmt| self.lower_stmt(stmt)).collect();
        self.scopes.pop();
        lowered
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt) -> Result<Stmt> {
        match stmt {
            ast::Stmt::Decl { ty, name, init, line } => {
                let st = match ty {
                    ast::Type::Bool => SlotType::Bool,
                    other => SlotType::Scalar(scalar_type(*other, *line, "local variable")?),
                };
                let value = self.lower_expr(init, *line)?;
                let slot = self.alloc_slot(st);
                // Insert after lowering the initializer so `int x = x;`
                // resolves the right-hand side in the enclosing scope.
                self.scopes.last_mut().unwrap().insert(name.clone(), Binding::Slot(slot));
                Ok(Stmt::Set { slot, value })
            }
            ast::Stmt::Assign { target, op, value, line } => self.lower_assign(target, *op, value, *line),
            ast::Stmt::For {
                outer,
                var,
                start,
                bound,
                step,
                body,
                line,
            } => {
                if *outer {
                    return Err(err(*line, "@outer loops cannot be nested"));
                }
                let start = self.lower_expr(start, *line)?;
                let bound = self.lower_expr(bound, *line)?;
                let step = match step {
                    ast::Step::Inc => Expr::Const(Value::I32(1)),
                    ast::Step::AddAssign(amount) => self.lower_expr(amount, *line)?,
                };

                self.scopes.push(HashMap::new());
                let slot = self.alloc_slot(SlotType::Scalar(ScalarType::I32));
                self.scopes.last_mut().unwrap().insert(var.clone(), Binding::Slot(slot));
                let body = self.lower_block(body)?;
                self.scopes.pop();

                Ok(Stmt::For {
                    slot,
                    start,
                    bound,
                    step,
                    body,
                })
            }
            ast::Stmt::If {
                cond,
                then_body,
                else_body,
                line,
            } => Ok(Stmt::If {
                cond: self.lower_expr(cond, *line)?,
                then_body: self.lower_block(then_body)?,
                else_body: self.lower_block(else_body)?,
            }),
        }
    }

    fn lower_assign(&mut self, target: &ast::LValue, op: ast::AssignOp, value: &ast::Expr, line: u32) -> Result<Stmt> {
        let value = self.lower_expr(value, line)?;

        match target {
            ast::LValue::Name(name) => {
                let slot = match self.resolve(name) {
                    Some(Binding::Slot(slot)) => slot,
                    Some(Binding::Buffer(_)) => {
                        return Err(err(line, format!("buffer '{name}' cannot be assigned as a scalar")));
                    }
                    Some(Binding::Const(_)) => {
                        return Err(err(line, format!("'{name}' is a define and cannot be assigned")));
                    }
                    None => return Err(err(line, format!("unknown identifier '{name}'"))),
                };
                let value = combine(op, Expr::Slot(slot), value);
                Ok(Stmt::Set { slot, value })
            }
            ast::LValue::Index { name, index } => {
                let buffer = match self.resolve(name) {
                    Some(Binding::Buffer(buffer)) => buffer,
                    Some(_) => return Err(err(line, format!("'{name}' is not a buffer"))),
                    None => return Err(err(line, format!("unknown identifier '{name}'"))),
                };
                if !self.buffer_writable[buffer] {
                    return Err(err(line, format!("cannot write to const buffer '{name}'")));
                }
                let index = self.lower_expr(index, line)?;
                let value = combine(
                    op,
                    Expr::Load {
                        buffer,
                        index: Box::new(index.clone()),
                    },
                    value,
                );
                Ok(Stmt::Store { buffer, index, value })
            }
        }
    }

    fn lower_expr(&mut self, expr: &ast::Expr, line: u32) -> Result<Expr> {
        match expr {
            ast::Expr::Int(v) => {
                if let Ok(narrow) = i32::try_from(*v) {
                    Ok(Expr::Const(Value::I32(narrow)))
                } else {
                    Ok(Expr::Const(Value::I64(*v)))
                }
            }
            ast::Expr::Float(v) => Ok(Expr::Const(Value::F64(*v))),
            ast::Expr::Bool(v) => Ok(Expr::Const(Value::Bool(*v))),
            ast::Expr::Name(name) => match self.resolve(name) {
                Some(Binding::Slot(slot)) => Ok(Expr::Slot(slot)),
                Some(Binding::Const(value)) => Ok(Expr::Const(value)),
                Some(Binding::Buffer(_)) => Err(err(line, format!("buffer '{name}' used without an index"))),
                None => Err(err(line, format!("unknown identifier '{name}'"))),
            },
            ast::Expr::Index { name, index } => {
                let buffer = match self.resolve(name) {
                    Some(Binding::Buffer(buffer)) => buffer,
                    Some(_) => return Err(err(line, format!("'{name}' is not a buffer"))),
                    None => return Err(err(line, format!("unknown identifier '{name}'"))),
                };
                Ok(Expr::Load {
                    buffer,
                    index: Box::new(self.lower_expr(index, line)?),
                })
            }
            ast::Expr::Unary { op, operand } => Ok(Expr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand, line)?),
            }),
            ast::Expr::Binary { op, lhs, rhs } => Ok(Expr::Binary {
                op: *op,
                lhs: Box::new(self.lower_expr(lhs, line)?),
                rhs: Box::new(self.lower_expr(rhs, line)?),
            }),
        }
    }
}

/// Expand a compound assignment into its binary form
fn combine(op: ast::AssignOp, current: Expr, value: Expr) -> Expr {
    let bin = match op {
        ast::AssignOp::Set => return value,
        ast::AssignOp::Add => ast::BinOp::Add,
        ast::AssignOp::Sub => ast::BinOp::Sub,
        ast::AssignOp::Mul => ast::BinOp::Mul,
        ast::AssignOp::Div => ast::BinOp::Div,
    };
    Expr::Binary {
        op: bin,
        lhs: Box::new(current),
        rhs: Box::new(value),
    }
}
