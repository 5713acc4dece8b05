//! Lowered kernel programs
//!
//! The front end's AST is lowered into a slot-indexed program: named
//! variables become slot indices into a per-work-item value table, buffer
//! parameters become buffer indices, and `defines` become inlined
//! constants. Drivers execute the program once per launch index; the
//! representation is shared by every host driver, each applying its own
//! dispatch strategy.

mod interp;
mod lower;

pub(crate) use interp::{BufferBinding, LaunchPlan};

use crate::error::{BackendError, Result};
use crate::lang::ast::{BinOp, UnaryOp};
use crate::types::{BuildOptions, ScalarType};

/// A runtime value flowing through kernel expressions
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Declared type of a value slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotType {
    Bool,
    Scalar(ScalarType),
}

impl SlotType {
    pub(crate) fn default_value(self) -> Value {
        match self {
            SlotType::Bool => Value::Bool(false),
            SlotType::Scalar(ScalarType::I32) => Value::I32(0),
            SlotType::Scalar(ScalarType::I64) => Value::I64(0),
            SlotType::Scalar(ScalarType::F32) => Value::F32(0.0),
            SlotType::Scalar(ScalarType::F64) => Value::F64(0.0),
        }
    }
}

/// Kind of a formal kernel parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Pass-by-value scalar
    Scalar(ScalarType),
    /// Device buffer reference; `writable` is false for `const` pointers
    Buffer { elem: ScalarType, writable: bool },
}

/// A formal kernel parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
}

/// Lowered expression
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Const(Value),
    Slot(usize),
    Load { buffer: usize, index: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

/// Lowered statement
#[derive(Debug, Clone)]
pub(crate) enum Stmt {
    /// Write a value slot (declarations and scalar assignments)
    Set { slot: usize, value: Expr },
    /// Write a buffer element
    Store { buffer: usize, index: Expr, value: Expr },
    /// Sequential inner loop
    For {
        slot: usize,
        start: Expr,
        bound: Expr,
        step: Expr,
        body: Vec<Stmt>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
}

/// A compiled kernel program
///
/// Immutable after lowering; shared between launches via `Arc`.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) entry: String,
    pub(crate) params: Vec<Param>,
    /// Slot holding the launch index inside the body
    pub(crate) index_slot: usize,
    /// Launch range, evaluated against scalar arguments at bind time
    pub(crate) range_start: Expr,
    pub(crate) range_bound: Expr,
    pub(crate) slot_types: Vec<SlotType>,
    pub(crate) body: Vec<Stmt>,
}

impl Program {
    /// Entry-point name
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Ordered formal parameters
    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

/// Parse and lower kernel source, selecting `entry`.
///
/// This is the backend-agnostic half of every host driver's `compile`
/// step; failures carry the front-end diagnostic text.
pub(crate) fn build_program(source: &str, entry: &str, options: &BuildOptions) -> Result<Program> {
    let kernels = crate::lang::parse_source(source).map_err(|diag| BackendError::Compile(diag.to_string()))?;
    lower::lower(&kernels, entry, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_VECTORS: &str = r#"
        @kernel void addVectors(const int entries,
                                const float *a,
                                const float *b,
                                float *ab) {
          @outer for (int i = 0; i < entries; ++i) {
            ab[i] = a[i] + b[i];
          }
        }
    "#;

    #[test]
    fn test_build_program_params() {
        let program = build_program(ADD_VECTORS, "addVectors", &BuildOptions::new()).unwrap();
        assert_eq!(program.entry(), "addVectors");
        assert_eq!(program.params().len(), 4);
        assert_eq!(program.params()[0].kind, ParamKind::Scalar(ScalarType::I32));
        assert_eq!(
            program.params()[1].kind,
            ParamKind::Buffer {
                elem: ScalarType::F32,
                writable: false
            }
        );
        assert_eq!(
            program.params()[3].kind,
            ParamKind::Buffer {
                elem: ScalarType::F32,
                writable: true
            }
        );
    }

    #[test]
    fn test_build_program_unknown_entry() {
        let err = build_program(ADD_VECTORS, "missingKernel", &BuildOptions::new()).unwrap_err();
        match err {
            BackendError::Compile(diag) => assert!(diag.contains("missingKernel"), "{diag}"),
            other => panic!("expected compile error, got {other}"),
        }
    }

    #[test]
    fn test_build_program_syntax_error() {
        let err = build_program("@kernel void broken( {", "broken", &BuildOptions::new()).unwrap_err();
        match err {
            BackendError::Compile(diag) => assert!(!diag.is_empty()),
            other => panic!("expected compile error, got {other}"),
        }
    }
}
