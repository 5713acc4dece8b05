//! Per-work-item program execution
//!
//! A launch is bound once into a [`LaunchPlan`] (scalar slots filled,
//! buffer handles resolved to raw views, index range evaluated) and then
//! executed over any sub-range of the launch index. Drivers pick the
//! dispatch strategy: the plan itself is `Sync`, so ranges may run on the
//! calling thread, across a worker pool, or on a queue worker.

use super::{Expr, ParamKind, Program, SlotType, Stmt, Value};
use crate::error::{BackendError, Result};
use crate::lang::ast::{BinOp, UnaryOp};
use crate::types::{BufferHandle, LaunchArg, ScalarType, ScalarValue};

/// Raw buffer pointer shared across worker threads.
///
/// # Safety
///
/// The pointee outlives the launch (drivers hold the owning allocation
/// alive for the call's duration). Work items may write concurrently;
/// the runtime's shared-resource policy makes overlapping writes the
/// caller's responsibility, so no synchronization is added here.
#[derive(Clone, Copy)]
struct RawPtr(*mut u8);

unsafe impl Send for RawPtr {}
unsafe impl Sync for RawPtr {}

/// A buffer resolved for one launch: element type, length, storage
pub(crate) struct BufferBinding {
    elem: ScalarType,
    len: usize,
    ptr: RawPtr,
}

impl BufferBinding {
    /// `len` is in elements, not bytes
    pub(crate) fn new(elem: ScalarType, len: usize, ptr: *mut u8) -> Self {
        Self {
            elem,
            len,
            ptr: RawPtr(ptr),
        }
    }

    fn offset(&self, index: i64) -> Result<usize> {
        if index < 0 || index as usize >= self.len {
            return Err(BackendError::execution(format!(
                "index {index} out of range for buffer of {} elements",
                self.len
            )));
        }
        Ok(index as usize * self.elem.size_bytes())
    }

    fn load(&self, index: i64) -> Result<Value> {
        let offset = self.offset(index)?;
        // Unaligned access: buffer storage is byte-addressed.
        unsafe {
            let ptr = self.ptr.0.add(offset);
            Ok(match self.elem {
                ScalarType::I32 => Value::I32(ptr.cast::<i32>().read_unaligned()),
                ScalarType::I64 => Value::I64(ptr.cast::<i64>().read_unaligned()),
                ScalarType::F32 => Value::F32(ptr.cast::<f32>().read_unaligned()),
                ScalarType::F64 => Value::F64(ptr.cast::<f64>().read_unaligned()),
            })
        }
    }

    fn store(&self, index: i64, value: Value) -> Result<()> {
        let offset = self.offset(index)?;
        let value = cast(value, SlotType::Scalar(self.elem));
        unsafe {
            let ptr = self.ptr.0.add(offset);
            match value {
                Value::I32(v) => ptr.cast::<i32>().write_unaligned(v),
                Value::I64(v) => ptr.cast::<i64>().write_unaligned(v),
                Value::F32(v) => ptr.cast::<f32>().write_unaligned(v),
                Value::F64(v) => ptr.cast::<f64>().write_unaligned(v),
                Value::Bool(_) => unreachable!("cast yields the buffer element type"),
            }
        }
        Ok(())
    }
}

/// A bound launch: program + filled slots + resolved buffers + index range
pub(crate) struct LaunchPlan<'a> {
    program: &'a Program,
    slots: Vec<Value>,
    buffers: Vec<BufferBinding>,
    pub(crate) start: i64,
    pub(crate) bound: i64,
}

impl<'a> LaunchPlan<'a> {
    /// Validate arguments against the program's formals and evaluate the
    /// launch range. `resolve` maps a buffer handle to its storage view.
    pub(crate) fn bind(
        program: &'a Program,
        args: &[LaunchArg],
        mut resolve: impl FnMut(BufferHandle, ScalarType) -> Result<BufferBinding>,
    ) -> Result<Self> {
        if args.len() != program.params.len() {
            return Err(BackendError::execution(format!(
                "kernel '{}' expects {} arguments, got {}",
                program.entry,
                program.params.len(),
                args.len()
            )));
        }

        let mut slots: Vec<Value> = program.slot_types.iter().map(|ty| ty.default_value()).collect();
        let mut buffers = Vec::new();
        // Scalar parameters occupy the first slots in declaration order;
        // lowering allocates them before any other slot.
        let mut next_scalar_slot = 0usize;

        for (param, arg) in program.params.iter().zip(args) {
            match (param.kind, arg) {
                (ParamKind::Scalar(st), LaunchArg::Scalar(value)) => {
                    let widened = value.widen_to(st).ok_or_else(|| {
                        BackendError::execution(format!(
                            "argument '{}': expected {st}, got {}",
                            param.name,
                            value.scalar_type()
                        ))
                    })?;
                    slots[next_scalar_slot] = value_of(widened);
                    next_scalar_slot += 1;
                }
                (ParamKind::Buffer { elem, .. }, LaunchArg::Buffer(handle)) => {
                    buffers.push(resolve(*handle, elem)?);
                }
                (ParamKind::Scalar(_), LaunchArg::Buffer(_)) => {
                    return Err(BackendError::execution(format!(
                        "argument '{}': expected a scalar, got a buffer",
                        param.name
                    )));
                }
                (ParamKind::Buffer { .. }, LaunchArg::Scalar(_)) => {
                    return Err(BackendError::execution(format!(
                        "argument '{}': expected a buffer, got a scalar",
                        param.name
                    )));
                }
            }
        }

        let mut plan = Self {
            program,
            slots,
            buffers,
            start: 0,
            bound: 0,
        };
        plan.start = as_index(plan.eval_with(&program.range_start, &plan.slots)?)?;
        plan.bound = as_index(plan.eval_with(&program.range_bound, &plan.slots)?)?;
        Ok(plan)
    }

    /// Number of work items in the launch
    pub(crate) fn len(&self) -> usize {
        (self.bound - self.start).max(0) as usize
    }

    /// Execute work items `lo..hi` on the calling thread
    pub(crate) fn run_range(&self, lo: i64, hi: i64) -> Result<()> {
        for index in lo..hi {
            let mut item = WorkItem {
                program: self.program,
                buffers: &self.buffers,
                slots: self.slots.clone(),
            };
            item.slots[self.program.index_slot] = Value::I32(index as i32);
            for stmt in &self.program.body {
                item.exec(stmt)?;
            }
        }
        Ok(())
    }

    fn eval_with(&self, expr: &Expr, slots: &[Value]) -> Result<Value> {
        let item = WorkItem {
            program: self.program,
            buffers: &self.buffers,
            slots: slots.to_vec(),
        };
        item.eval(expr)
    }
}

/// Execution state for a single work item
struct WorkItem<'a> {
    program: &'a Program,
    buffers: &'a [BufferBinding],
    slots: Vec<Value>,
}

impl WorkItem<'_> {
    fn exec(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Set { slot, value } => {
                let value = self.eval(value)?;
                self.slots[*slot] = cast(value, self.program.slot_types[*slot]);
                Ok(())
            }
            Stmt::Store { buffer, index, value } => {
                let index = as_index(self.eval(index)?)?;
                let value = self.eval(value)?;
                self.buffers[*buffer].store(index, value)
            }
            Stmt::For {
                slot,
                start,
                bound,
                step,
                body,
            } => {
                let start = self.eval(start)?;
                self.slots[*slot] = cast(start, SlotType::Scalar(ScalarType::I32));
                loop {
                    let var = as_index(self.slots[*slot])?;
                    let bound = as_index(self.eval(bound)?)?;
                    if var >= bound {
                        break;
                    }
                    for stmt in body {
                        self.exec(stmt)?;
                    }
                    let step = as_index(self.eval(step)?)?;
                    let var = as_index(self.slots[*slot])?;
                    self.slots[*slot] = Value::I32((var + step) as i32);
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let branch = if as_bool(self.eval(cond)?) { then_body } else { else_body };
                for stmt in branch {
                    self.exec(stmt)?;
                }
                Ok(())
            }
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Const(value) => Ok(*value),
            Expr::Slot(slot) => Ok(self.slots[*slot]),
            Expr::Load { buffer, index } => {
                let index = as_index(self.eval(index)?)?;
                self.buffers[*buffer].load(index)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                unary(*op, operand)
            }
            Expr::Binary { op, lhs, rhs } => {
                // Logical operators short-circuit like their C counterparts.
                match op {
                    BinOp::And => {
                        if !as_bool(self.eval(lhs)?) {
                            return Ok(Value::Bool(false));
                        }
                        return Ok(Value::Bool(as_bool(self.eval(rhs)?)));
                    }
                    BinOp::Or => {
                        if as_bool(self.eval(lhs)?) {
                            return Ok(Value::Bool(true));
                        }
                        return Ok(Value::Bool(as_bool(self.eval(rhs)?)));
                    }
                    _ => {}
                }
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs)
            }
        }
    }
}

fn value_of(value: ScalarValue) -> Value {
    match value {
        ScalarValue::I32(v) => Value::I32(v),
        ScalarValue::I64(v) => Value::I64(v),
        ScalarValue::F32(v) => Value::F32(v),
        ScalarValue::F64(v) => Value::F64(v),
    }
}

fn as_bool(value: Value) -> bool {
    match value {
        Value::Bool(v) => v,
        Value::I32(v) => v != 0,
        Value::I64(v) => v != 0,
        Value::F32(v) => v != 0.0,
        Value::F64(v) => v != 0.0,
    }
}

fn as_index(value: Value) -> Result<i64> {
    match value {
        Value::I32(v) => Ok(v as i64),
        Value::I64(v) => Ok(v),
        other => Err(BackendError::execution(format!(
            "expected an integer value, got {other:?}"
        ))),
    }
}

/// C-style value conversion to a slot's declared type
fn cast(value: Value, ty: SlotType) -> Value {
    match ty {
        SlotType::Bool => Value::Bool(as_bool(value)),
        SlotType::Scalar(ScalarType::I32) => Value::I32(match value {
            Value::Bool(v) => v as i32,
            Value::I32(v) => v,
            Value::I64(v) => v as i32,
            Value::F32(v) => v as i32,
            Value::F64(v) => v as i32,
        }),
        SlotType::Scalar(ScalarType::I64) => Value::I64(match value {
            Value::Bool(v) => v as i64,
            Value::I32(v) => v as i64,
            Value::I64(v) => v,
            Value::F32(v) => v as i64,
            Value::F64(v) => v as i64,
        }),
        SlotType::Scalar(ScalarType::F32) => Value::F32(match value {
            Value::Bool(v) => v as i32 as f32,
            Value::I32(v) => v as f32,
            Value::I64(v) => v as f32,
            Value::F32(v) => v,
            Value::F64(v) => v as f32,
        }),
        SlotType::Scalar(ScalarType::F64) => Value::F64(match value {
            Value::Bool(v) => v as i32 as f64,
            Value::I32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
        }),
    }
}

/// Usual arithmetic conversions: widest operand type wins
fn promote(lhs: Value, rhs: Value) -> (Value, Value) {
    let widest = [lhs, rhs]
        .iter()
        .map(|v| match v {
            Value::F64(_) => ScalarType::F64,
            Value::F32(_) => ScalarType::F32,
            Value::I64(_) => ScalarType::I64,
            Value::I32(_) | Value::Bool(_) => ScalarType::I32,
        })
        .max_by_key(|ty| match ty {
            ScalarType::I32 => 0,
            ScalarType::I64 => 1,
            ScalarType::F32 => 2,
            ScalarType::F64 => 3,
        })
        .unwrap_or(ScalarType::I32);
    (cast(lhs, SlotType::Scalar(widest)), cast(rhs, SlotType::Scalar(widest)))
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!as_bool(operand))),
        UnaryOp::Neg => Ok(match operand {
            Value::Bool(v) => Value::I32(-(v as i32)),
            Value::I32(v) => Value::I32(v.wrapping_neg()),
            Value::I64(v) => Value::I64(v.wrapping_neg()),
            Value::F32(v) => Value::F32(-v),
            Value::F64(v) => Value::F64(-v),
        }),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    let (lhs, rhs) = promote(lhs, rhs);

    if matches!(op, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne) {
        let result = match (lhs, rhs) {
            (Value::I32(a), Value::I32(b)) => compare(op, a.cmp(&b)),
            (Value::I64(a), Value::I64(b)) => compare(op, a.cmp(&b)),
            (Value::F32(a), Value::F32(b)) => float_compare(op, a as f64, b as f64),
            (Value::F64(a), Value::F64(b)) => float_compare(op, a, b),
            _ => unreachable!("promote yields matching variants"),
        };
        return Ok(Value::Bool(result));
    }

    match (lhs, rhs) {
        (Value::I32(a), Value::I32(b)) => int_arith(op, a as i64, b as i64).map(|v| Value::I32(v as i32)),
        (Value::I64(a), Value::I64(b)) => int_arith(op, a, b).map(Value::I64),
        (Value::F32(a), Value::F32(b)) => float_arith(op, a as f64, b as f64).map(|v| Value::F32(v as f32)),
        (Value::F64(a), Value::F64(b)) => float_arith(op, a, b).map(Value::F64),
        _ => unreachable!("promote yields matching variants"),
    }
}

fn compare(op: BinOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        BinOp::Lt => ordering == Less,
        BinOp::Le => ordering != Greater,
        BinOp::Gt => ordering == Greater,
        BinOp::Ge => ordering != Less,
        BinOp::Eq => ordering == Equal,
        BinOp::Ne => ordering != Equal,
        _ => unreachable!(),
    }
}

fn float_compare(op: BinOp, a: f64, b: f64) -> bool {
    match op {
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        _ => unreachable!(),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<i64> {
    match op {
        BinOp::Add => Ok(a.wrapping_add(b)),
        BinOp::Sub => Ok(a.wrapping_sub(b)),
        BinOp::Mul => Ok(a.wrapping_mul(b)),
        BinOp::Div => {
            if b == 0 {
                Err(BackendError::execution("integer division by zero"))
            } else {
                Ok(a.wrapping_div(b))
            }
        }
        BinOp::Rem => {
            if b == 0 {
                Err(BackendError::execution("integer remainder by zero"))
            } else {
                Ok(a.wrapping_rem(b))
            }
        }
        _ => unreachable!(),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> Result<f64> {
    match op {
        BinOp::Add => Ok(a + b),
        BinOp::Sub => Ok(a - b),
        BinOp::Mul => Ok(a * b),
        BinOp::Div => Ok(a / b),
        BinOp::Rem => Err(BackendError::execution("'%' is not defined for floating-point operands")),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::build_program;
    use super::*;
    use crate::types::BuildOptions;

    /// Run `entry` from `src` with f32 buffers and scalar args
    fn run_f32(
        src: &str,
        entry: &str,
        scalars: &[ScalarValue],
        buffers: &mut [Vec<f32>],
    ) -> Result<()> {
        let program = build_program(src, entry, &BuildOptions::new())?;

        let mut args = Vec::new();
        let mut scalar_iter = scalars.iter();
        let mut buffer_ids = Vec::new();
        for param in program.params() {
            match param.kind {
                ParamKind::Scalar(_) => {
                    args.push(LaunchArg::Scalar(*scalar_iter.next().expect("missing scalar")));
                }
                ParamKind::Buffer { .. } => {
                    let id = buffer_ids.len() as u64;
                    buffer_ids.push(id);
                    args.push(LaunchArg::Buffer(BufferHandle::new(id)));
                }
            }
        }

        let plan = LaunchPlan::bind(&program, &args, |handle, elem| {
            let data = &mut buffers[handle.id() as usize];
            Ok(BufferBinding::new(elem, data.len(), data.as_mut_ptr().cast()))
        })?;
        plan.run_range(plan.start, plan.bound)
    }

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
    fn test_add_vectors_executes() {
        let n = 12;
        let a: Vec<f32> = (0..n).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..n).map(|i| 1.0 - i as f32).collect();
        let mut buffers = vec![a.clone(), b.clone(), vec![0.0; n]];

        run_f32(ADD_VECTORS, "addVectors", &[ScalarValue::I32(n as i32)], &mut buffers).unwrap();

        for i in 0..n {
            assert_eq!(buffers[2][i].to_bits(), (a[i] + b[i]).to_bits());
        }
    }

    #[test]
    fn test_nested_loop_and_locals() {
        let src = r#"
            @kernel void rowSums(const int rows, const int cols,
                                 const float *m, float *sums) {
              @outer for (int r = 0; r < rows; ++r) {
                float acc = 0.0;
                for (int c = 0; c < cols; ++c) {
                  acc += m[r * cols + c];
                }
                sums[r] = acc;
              }
            }
        "#;
        let m: Vec<f32> = (0..6).map(|i| i as f32).collect(); // 2x3
        let mut buffers = vec![m, vec![0.0; 2]];
        run_f32(
            src,
            "rowSums",
            &[ScalarValue::I32(2), ScalarValue::I32(3)],
            &mut buffers,
        )
        .unwrap();
        assert_eq!(buffers[1], vec![3.0, 12.0]);
    }

    #[test]
    fn test_conditionals() {
        let src = r#"
            @kernel void clampNeg(const int n, float *x) {
              @outer for (int i = 0; i < n; ++i) {
                if (x[i] < 0.0) {
                  x[i] = 0.0;
                }
              }
            }
        "#;
        let mut buffers = vec![vec![-1.0, 2.0, -3.0, 4.0]];
        run_f32(src, "clampNeg", &[ScalarValue::I32(4)], &mut buffers).unwrap();
        assert_eq!(buffers[0], vec![0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_out_of_bounds_index_fails() {
        let src = r#"
            @kernel void oob(const int n, float *x) {
              @outer for (int i = 0; i < n; ++i) {
                x[i + 1] = 0.0;
              }
            }
        "#;
        let mut buffers = vec![vec![0.0; 4]];
        let err = run_f32(src, "oob", &[ScalarValue::I32(4)], &mut buffers).unwrap_err();
        assert!(matches!(err, BackendError::Execution(_)), "{err}");
    }

    #[test]
    fn test_integer_division_by_zero_fails() {
        let src = r#"
            @kernel void divz(const int n, float *x) {
              @outer for (int i = 0; i < n; ++i) {
                int d = 0;
                x[i] = 1 / d;
              }
            }
        "#;
        let mut buffers = vec![vec![0.0; 1]];
        let err = run_f32(src, "divz", &[ScalarValue::I32(1)], &mut buffers).unwrap_err();
        assert!(err.to_string().contains("division by zero"), "{err}");
    }

    #[test]
    fn test_empty_range_runs_nothing() {
        let mut buffers = vec![vec![1.0; 4], vec![1.0; 4], vec![7.0; 4]];
        run_f32(ADD_VECTORS, "addVectors", &[ScalarValue::I32(0)], &mut buffers).unwrap();
        assert_eq!(buffers[2], vec![7.0; 4]);
    }

    #[test]
    fn test_bind_checks_argument_kinds() {
        let program = build_program(ADD_VECTORS, "addVectors", &BuildOptions::new()).unwrap();
        let args = [
            LaunchArg::Buffer(BufferHandle::new(0)),
            LaunchArg::Buffer(BufferHandle::new(0)),
            LaunchArg::Buffer(BufferHandle::new(0)),
            LaunchArg::Buffer(BufferHandle::new(0)),
        ];
        let mut data = vec![0.0f32; 4];
        let result = LaunchPlan::bind(&program, &args, |_, elem| {
            Ok(BufferBinding::new(elem, data.len(), data.as_mut_ptr().cast()))
        });
        assert!(result.is_err());
    }
}
