// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A tree-walking interpreter for validated naga modules.
//!
//! Vertex, fragment and compute entry points all run through [`Stage::run`]. An
//! invocation walks the entry function's statements in order and caches expression
//! results per call frame; `Emit` recomputes its range so loads observe earlier
//! stores. Uniform and storage globals live in byte buffers laid out by the module's
//! own member offsets and array strides, every other variable in a typed [`Value`].
//!
//! Memory accesses are robust: reads past the end of a buffer return zero, writes
//! past the end are dropped, and indices into sized values are clamped.

use super::error::SoftGpuError;
use super::memory::Image;
use super::sampler;
use lunex_core::math::LinearRgba;
use lunex_core::renderer::{SamplerState, UniformValue};
use naga::{
    AddressSpace, ArraySize, AtomicFunction, BinaryOperator, Expression, Handle, ImageClass, ImageDimension,
    ImageQuery, Literal, MathFunction, RelationalFunction, SampleLevel, ScalarKind, Statement, SwitchValue,
    TypeInner, UnaryOperator, VectorSize,
};

/// Statements a single invocation may execute before it counts as a runaway loop.
pub const STEP_LIMIT: u64 = 1 << 22;
const CALL_DEPTH_LIMIT: usize = 64;

type Result<T> = std::result::Result<T, SoftGpuError>;

fn fault(msg: impl Into<String>) -> SoftGpuError {
    SoftGpuError::ShaderFault(msg.into())
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    /// Scalars of a vector.
    Vector(Vec<Value>),
    /// Column vectors of a matrix.
    Matrix(Vec<Value>),
    /// Struct members or array elements.
    Composite(Vec<Value>),
    Pointer(Pointer),
    /// An image or sampler global.
    Handle(Handle<naga::GlobalVariable>),
}

/// Where a pointer value points.
#[derive(Debug, Clone, PartialEq)]
pub enum Pointer {
    /// Into a value-backed variable, following member/element indices.
    Slot { root: Root, path: Vec<u32> },
    /// Into the bytes behind a uniform or storage global.
    Memory {
        global: Handle<naga::GlobalVariable>,
        offset: u64,
        layout: Layout,
    },
}

/// A value-backed variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Root {
    Local { frame: usize, index: usize },
    Private(Handle<naga::GlobalVariable>),
    WorkGroup(Handle<naga::GlobalVariable>),
}

/// Shape of the data behind a memory pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Layout {
    Type(Handle<naga::Type>),
    Vector(VectorSize, naga::Scalar),
    Scalar(naga::Scalar),
}

impl Value {
    pub fn as_f32(&self) -> Result<f32> {
        match *self {
            Value::F32(v) => Ok(v),
            Value::I32(v) => Ok(v as f32),
            Value::U32(v) => Ok(v as f32),
            Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            _ => Err(fault(format!("expected a scalar, found {self:?}"))),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match *self {
            Value::F32(v) => Ok(v as i32),
            Value::I32(v) => Ok(v),
            Value::U32(v) => Ok(v as i32),
            Value::Bool(b) => Ok(i32::from(b)),
            _ => Err(fault(format!("expected a scalar, found {self:?}"))),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match *self {
            Value::F32(v) => Ok(v as u32),
            Value::I32(v) => Ok(v as u32),
            Value::U32(v) => Ok(v),
            Value::Bool(b) => Ok(u32::from(b)),
            _ => Err(fault(format!("expected a scalar, found {self:?}"))),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Value::Bool(b) => Ok(b),
            Value::I32(v) => Ok(v != 0),
            Value::U32(v) => Ok(v != 0),
            Value::F32(v) => Ok(v != 0.0),
            _ => Err(fault(format!("expected a scalar, found {self:?}"))),
        }
    }

    /// Components of a scalar or vector as `f32`.
    pub fn floats(&self) -> Result<Vec<f32>> {
        match self {
            Value::Vector(items) => items.iter().map(Value::as_f32).collect(),
            other => Ok(vec![other.as_f32()?]),
        }
    }

    fn items(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(items) | Value::Matrix(items) | Value::Composite(items) => Some(items),
            _ => None,
        }
    }

    fn component(&self, i: usize) -> Option<&Value> {
        match self {
            Value::Vector(items) => items.get(i),
            scalar if i == 0 => Some(scalar),
            _ => None,
        }
    }
}

// --- Types and constants ---

fn scalar_zero(scalar: naga::Scalar) -> Value {
    match scalar.kind {
        ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(0.0),
        ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(0),
        ScalarKind::Uint => Value::U32(0),
        ScalarKind::Bool => Value::Bool(false),
    }
}

/// The zero value of `ty`. Runtime-sized arrays are empty.
pub fn zero_value(module: &naga::Module, ty: Handle<naga::Type>) -> Value {
    match module.types[ty].inner {
        TypeInner::Scalar(s) | TypeInner::Atomic(s) => scalar_zero(s),
        TypeInner::Vector { size, scalar } => Value::Vector(vec![scalar_zero(scalar); size as usize]),
        TypeInner::Matrix { columns, rows, scalar } => {
            Value::Matrix(vec![Value::Vector(vec![scalar_zero(scalar); rows as usize]); columns as usize])
        }
        TypeInner::Array {
            base,
            size: ArraySize::Constant(n),
            ..
        } => Value::Composite(vec![zero_value(module, base); n.get() as usize]),
        TypeInner::Struct { ref members, .. } => {
            Value::Composite(members.iter().map(|m| zero_value(module, m.ty)).collect())
        }
        _ => Value::Composite(Vec::new()),
    }
}

/// Bytes occupied by a value of `ty`.
pub fn type_size(module: &naga::Module, ty: Handle<naga::Type>) -> u64 {
    u64::from(module.types[ty].inner.size(module.to_ctx()))
}

fn literal(lit: Literal) -> Value {
    match lit {
        Literal::F64(v) => Value::F32(v as f32),
        Literal::F32(v) => Value::F32(v),
        Literal::U32(v) => Value::U32(v),
        Literal::I32(v) => Value::I32(v),
        Literal::U64(v) => Value::U32(v as u32),
        Literal::I64(v) => Value::I32(v as i32),
        Literal::Bool(b) => Value::Bool(b),
        Literal::AbstractInt(v) => Value::I32(v as i32),
        Literal::AbstractFloat(v) => Value::F32(v as f32),
    }
}

fn compose(module: &naga::Module, ty: Handle<naga::Type>, values: Vec<Value>) -> Value {
    match module.types[ty].inner {
        TypeInner::Vector { .. } => {
            let mut flat = Vec::with_capacity(4);
            for value in values {
                match value {
                    Value::Vector(items) => flat.extend(items),
                    scalar => flat.push(scalar),
                }
            }
            Value::Vector(flat)
        }
        TypeInner::Matrix { .. } => Value::Matrix(values),
        _ => Value::Composite(values),
    }
}

fn const_eval(module: &naga::Module, handle: Handle<Expression>) -> Result<Value> {
    match module.global_expressions[handle] {
        Expression::Literal(lit) => Ok(literal(lit)),
        Expression::Constant(c) => const_eval(module, module.constants[c].init),
        Expression::ZeroValue(ty) => Ok(zero_value(module, ty)),
        Expression::Compose { ty, ref components } => {
            let values = components
                .iter()
                .map(|&c| const_eval(module, c))
                .collect::<Result<Vec<_>>>()?;
            Ok(compose(module, ty, values))
        }
        Expression::Splat { size, value } => Ok(Value::Vector(vec![const_eval(module, value)?; size as usize])),
        Expression::Swizzle { size, vector, pattern } => swizzle(&const_eval(module, vector)?, size, pattern),
        Expression::AccessIndex { base, index } => child(&const_eval(module, base)?, index),
        Expression::Unary { op, expr } => unary(op, &const_eval(module, expr)?),
        Expression::Binary { op, left, right } => {
            binary(op, &const_eval(module, left)?, &const_eval(module, right)?)
        }
        Expression::As { expr, kind, convert } => cast(&const_eval(module, expr)?, kind, convert),
        ref other => Err(fault(format!("unsupported constant expression {other:?}"))),
    }
}

fn global_init(module: &naga::Module, global: Handle<naga::GlobalVariable>) -> Result<Value> {
    let var = &module.global_variables[global];
    match var.init {
        Some(init) => const_eval(module, init),
        None => Ok(zero_value(module, var.ty)),
    }
}

// --- Memory ---

fn scalar_width(scalar: naga::Scalar) -> u64 {
    u64::from(scalar.width).max(4)
}

fn column_stride(rows: VectorSize, scalar: naga::Scalar) -> u64 {
    match rows {
        VectorSize::Bi => 2 * scalar_width(scalar),
        _ => 4 * scalar_width(scalar),
    }
}

fn read_scalar(bytes: &[u8], offset: u64, scalar: naga::Scalar) -> Value {
    let word = usize::try_from(offset)
        .ok()
        .and_then(|o| bytes.get(o..o.checked_add(4)?))
        .map(|b| [b[0], b[1], b[2], b[3]]);
    let Some(word) = word else {
        return scalar_zero(scalar);
    };
    match scalar.kind {
        ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(f32::from_le_bytes(word)),
        ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(i32::from_le_bytes(word)),
        ScalarKind::Uint => Value::U32(u32::from_le_bytes(word)),
        ScalarKind::Bool => Value::Bool(u32::from_le_bytes(word) != 0),
    }
}

fn write_scalar(bytes: &mut [u8], offset: u64, scalar: naga::Scalar, value: &Value) -> Result<()> {
    let word = match scalar.kind {
        ScalarKind::Float | ScalarKind::AbstractFloat => value.as_f32()?.to_le_bytes(),
        ScalarKind::Sint | ScalarKind::AbstractInt => value.as_i32()?.to_le_bytes(),
        ScalarKind::Uint => value.as_u32()?.to_le_bytes(),
        ScalarKind::Bool => u32::from(value.as_bool()?).to_le_bytes(),
    };
    if let Some(dst) = usize::try_from(offset)
        .ok()
        .and_then(|o| bytes.get_mut(o..o.checked_add(4)?))
    {
        dst.copy_from_slice(&word);
    }
    Ok(())
}

fn read_vector(bytes: &[u8], offset: u64, size: VectorSize, scalar: naga::Scalar) -> Value {
    let width = scalar_width(scalar);
    Value::Vector(
        (0..size as u64)
            .map(|i| read_scalar(bytes, offset.saturating_add(i * width), scalar))
            .collect(),
    )
}

fn write_vector(bytes: &mut [u8], offset: u64, size: VectorSize, scalar: naga::Scalar, value: &Value) -> Result<()> {
    let width = scalar_width(scalar);
    for i in 0..size as usize {
        if let Some(c) = value.component(i) {
            write_scalar(bytes, offset.saturating_add(i as u64 * width), scalar, c)?;
        }
    }
    Ok(())
}

/// Decodes a value from `bytes` at `offset`.
pub fn load_memory(module: &naga::Module, bytes: &[u8], offset: u64, layout: Layout) -> Result<Value> {
    let ty = match layout {
        Layout::Scalar(s) => return Ok(read_scalar(bytes, offset, s)),
        Layout::Vector(size, s) => return Ok(read_vector(bytes, offset, size, s)),
        Layout::Type(ty) => ty,
    };
    match module.types[ty].inner {
        TypeInner::Scalar(s) | TypeInner::Atomic(s) => Ok(read_scalar(bytes, offset, s)),
        TypeInner::Vector { size, scalar } => Ok(read_vector(bytes, offset, size, scalar)),
        TypeInner::Matrix { columns, rows, scalar } => {
            let stride = column_stride(rows, scalar);
            Ok(Value::Matrix(
                (0..columns as u64)
                    .map(|c| read_vector(bytes, offset.saturating_add(c * stride), rows, scalar))
                    .collect(),
            ))
        }
        TypeInner::Array { base, size, stride } => {
            let count = match size {
                ArraySize::Constant(n) => u64::from(n.get()),
                _ => (bytes.len() as u64).saturating_sub(offset) / u64::from(stride.max(1)),
            };
            let items = (0..count)
                .map(|i| load_memory(module, bytes, offset.saturating_add(i * u64::from(stride)), Layout::Type(base)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Composite(items))
        }
        TypeInner::Struct { ref members, .. } => {
            let items = members
                .iter()
                .map(|m| load_memory(module, bytes, offset.saturating_add(u64::from(m.offset)), Layout::Type(m.ty)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Composite(items))
        }
        ref other => Err(fault(format!("cannot load {other:?} from memory"))),
    }
}

/// Encodes `value` into `bytes` at `offset`. Bytes past the end are dropped.
pub fn store_memory(module: &naga::Module, bytes: &mut [u8], offset: u64, layout: Layout, value: &Value) -> Result<()> {
    let ty = match layout {
        Layout::Scalar(s) => return write_scalar(bytes, offset, s, value),
        Layout::Vector(size, s) => return write_vector(bytes, offset, size, s, value),
        Layout::Type(ty) => ty,
    };
    let items = || value.items().ok_or_else(|| fault(format!("cannot store {value:?} as an aggregate")));
    match module.types[ty].inner {
        TypeInner::Scalar(s) | TypeInner::Atomic(s) => write_scalar(bytes, offset, s, value),
        TypeInner::Vector { size, scalar } => write_vector(bytes, offset, size, scalar, value),
        TypeInner::Matrix { columns, rows, scalar } => {
            let stride = column_stride(rows, scalar);
            for (c, column) in items()?.iter().take(columns as usize).enumerate() {
                write_vector(bytes, offset.saturating_add(c as u64 * stride), rows, scalar, column)?;
            }
            Ok(())
        }
        TypeInner::Array { base, stride, .. } => {
            for (i, item) in items()?.iter().enumerate() {
                let at = offset.saturating_add(i as u64 * u64::from(stride));
                store_memory(module, bytes, at, Layout::Type(base), item)?;
            }
            Ok(())
        }
        TypeInner::Struct { ref members, .. } => {
            for (member, item) in members.iter().zip(items()?) {
                let at = offset.saturating_add(u64::from(member.offset));
                store_memory(module, bytes, at, Layout::Type(member.ty), item)?;
            }
            Ok(())
        }
        ref other => Err(fault(format!("cannot store {other:?} to memory"))),
    }
}

fn memory_index(module: &naga::Module, layout: Layout, offset: u64, index: u32) -> Result<(u64, Layout)> {
    let i = u64::from(index);
    let vector = |size: VectorSize, scalar: naga::Scalar| {
        let i = i.min(size as u64 - 1);
        (offset + i * scalar_width(scalar), Layout::Scalar(scalar))
    };
    let ty = match layout {
        Layout::Scalar(_) => return Err(fault("cannot index into a scalar")),
        Layout::Vector(size, scalar) => return Ok(vector(size, scalar)),
        Layout::Type(ty) => ty,
    };
    match module.types[ty].inner {
        TypeInner::Vector { size, scalar } => Ok(vector(size, scalar)),
        TypeInner::Matrix { columns, rows, scalar } => {
            let c = i.min(columns as u64 - 1);
            Ok((offset + c * column_stride(rows, scalar), Layout::Vector(rows, scalar)))
        }
        TypeInner::Array { base, size, stride } => {
            let i = match size {
                ArraySize::Constant(n) => i.min(u64::from(n.get()) - 1),
                _ => i,
            };
            Ok((offset.saturating_add(i * u64::from(stride)), Layout::Type(base)))
        }
        TypeInner::Struct { ref members, .. } => members
            .get(index as usize)
            .map(|m| (offset + u64::from(m.offset), Layout::Type(m.ty)))
            .ok_or_else(|| fault(format!("struct has no member {index}"))),
        ref other => Err(fault(format!("cannot index into {other:?}"))),
    }
}

// --- Value access ---

fn child(value: &Value, index: u32) -> Result<Value> {
    child_ref(value, index).cloned()
}

fn child_ref(value: &Value, index: u32) -> Result<&Value> {
    let items = value
        .items()
        .ok_or_else(|| fault(format!("cannot index into {value:?}")))?;
    let last = items.len().checked_sub(1).ok_or_else(|| fault("index into an empty value"))?;
    Ok(&items[(index as usize).min(last)])
}

fn child_mut(value: &mut Value, index: u32) -> Result<&mut Value> {
    let items = match value {
        Value::Vector(items) | Value::Matrix(items) | Value::Composite(items) => items,
        other => return Err(fault(format!("cannot index into {other:?}"))),
    };
    let last = items.len().checked_sub(1).ok_or_else(|| fault("index into an empty value"))?;
    Ok(&mut items[(index as usize).min(last)])
}

fn access(module: &naga::Module, base: Value, index: u32) -> Result<Value> {
    match base {
        Value::Pointer(Pointer::Slot { root, mut path }) => {
            path.push(index);
            Ok(Value::Pointer(Pointer::Slot { root, path }))
        }
        Value::Pointer(Pointer::Memory { global, offset, layout }) => {
            let (offset, layout) = memory_index(module, layout, offset, index)?;
            Ok(Value::Pointer(Pointer::Memory { global, offset, layout }))
        }
        value => child(&value, index),
    }
}

fn swizzle(value: &Value, size: VectorSize, pattern: [naga::SwizzleComponent; 4]) -> Result<Value> {
    let items = match value {
        Value::Vector(items) => items.as_slice(),
        scalar => std::slice::from_ref(scalar),
    };
    let last = items.len().checked_sub(1).ok_or_else(|| fault("swizzle of an empty vector"))?;
    Ok(Value::Vector(
        pattern[..size as usize]
            .iter()
            .map(|&c| items[(c as usize).min(last)].clone())
            .collect(),
    ))
}

// --- Arithmetic ---

type Unary<'f> = &'f dyn Fn(&Value) -> Result<Value>;
type Binary<'f> = &'f dyn Fn(&Value, &Value) -> Result<Value>;
type Ternary<'f> = &'f dyn Fn(&Value, &Value, &Value) -> Result<Value>;

fn map1(v: &Value, f: Unary<'_>) -> Result<Value> {
    match v {
        Value::Vector(items) => Ok(Value::Vector(items.iter().map(|x| map1(x, f)).collect::<Result<_>>()?)),
        Value::Matrix(items) => Ok(Value::Matrix(items.iter().map(|x| map1(x, f)).collect::<Result<_>>()?)),
        scalar => f(scalar),
    }
}

/// Applies `f` componentwise, broadcasting a scalar against a vector or matrix.
fn map2(a: &Value, b: &Value, f: Binary<'_>) -> Result<Value> {
    let pairs = |xs: &[Value], ys: &[Value]| xs.iter().zip(ys).map(|(x, y)| map2(x, y, f)).collect::<Result<Vec<_>>>();
    match (a, b) {
        (Value::Vector(x), Value::Vector(y)) => Ok(Value::Vector(pairs(x, y)?)),
        (Value::Matrix(x), Value::Matrix(y)) => Ok(Value::Matrix(pairs(x, y)?)),
        (Value::Vector(x), s) => Ok(Value::Vector(x.iter().map(|x| map2(x, s, f)).collect::<Result<_>>()?)),
        (s, Value::Vector(y)) => Ok(Value::Vector(y.iter().map(|y| map2(s, y, f)).collect::<Result<_>>()?)),
        (Value::Matrix(x), s) => Ok(Value::Matrix(x.iter().map(|x| map2(x, s, f)).collect::<Result<_>>()?)),
        (s, Value::Matrix(y)) => Ok(Value::Matrix(y.iter().map(|y| map2(s, y, f)).collect::<Result<_>>()?)),
        _ => f(a, b),
    }
}

fn map3(a: &Value, b: &Value, c: &Value, f: Ternary<'_>) -> Result<Value> {
    let len = [a, b, c]
        .iter()
        .filter_map(|v| match v {
            Value::Vector(items) => Some(items.len()),
            _ => None,
        })
        .max();
    let pick = |v: &'_ Value, i: usize| -> Value {
        match v {
            Value::Vector(items) => items[i.min(items.len() - 1)].clone(),
            scalar => scalar.clone(),
        }
    };
    match len {
        None => f(a, b, c),
        Some(n) => Ok(Value::Vector(
            (0..n)
                .map(|i| f(&pick(a, i), &pick(b, i), &pick(c, i)))
                .collect::<Result<_>>()?,
        )),
    }
}

fn compare<T: PartialOrd>(op: BinaryOperator, x: T, y: T) -> Option<bool> {
    Some(match op {
        BinaryOperator::Equal => x == y,
        BinaryOperator::NotEqual => x != y,
        BinaryOperator::Less => x < y,
        BinaryOperator::LessEqual => x <= y,
        BinaryOperator::Greater => x > y,
        BinaryOperator::GreaterEqual => x >= y,
        _ => return None,
    })
}

fn scalar_binary(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value> {
    use BinaryOperator as B;
    let unsupported = || fault(format!("{op:?} is not defined for {a:?} and {b:?}"));
    Ok(match (a, b) {
        (&Value::F32(x), &Value::F32(y)) => {
            if let Some(c) = compare(op, x, y) {
                return Ok(Value::Bool(c));
            }
            Value::F32(match op {
                B::Add => x + y,
                B::Subtract => x - y,
                B::Multiply => x * y,
                B::Divide => x / y,
                B::Modulo => x % y,
                _ => return Err(unsupported()),
            })
        }
        (&Value::I32(x), &Value::I32(y)) => {
            if let Some(c) = compare(op, x, y) {
                return Ok(Value::Bool(c));
            }
            Value::I32(match op {
                B::Add => x.wrapping_add(y),
                B::Subtract => x.wrapping_sub(y),
                B::Multiply => x.wrapping_mul(y),
                B::Divide => x.checked_div(y).unwrap_or(x),
                B::Modulo => x.checked_rem(y).unwrap_or(0),
                B::And => x & y,
                B::InclusiveOr => x | y,
                B::ExclusiveOr => x ^ y,
                _ => return Err(unsupported()),
            })
        }
        (&Value::U32(x), &Value::U32(y)) => {
            if let Some(c) = compare(op, x, y) {
                return Ok(Value::Bool(c));
            }
            Value::U32(match op {
                B::Add => x.wrapping_add(y),
                B::Subtract => x.wrapping_sub(y),
                B::Multiply => x.wrapping_mul(y),
                B::Divide => x.checked_div(y).unwrap_or(x),
                B::Modulo => x.checked_rem(y).unwrap_or(0),
                B::And => x & y,
                B::InclusiveOr => x | y,
                B::ExclusiveOr => x ^ y,
                _ => return Err(unsupported()),
            })
        }
        (&Value::Bool(x), &Value::Bool(y)) => Value::Bool(match op {
            B::Equal => x == y,
            B::NotEqual => x != y,
            B::LogicalAnd | B::And => x && y,
            B::LogicalOr | B::InclusiveOr => x || y,
            B::ExclusiveOr => x ^ y,
            _ => return Err(unsupported()),
        }),
        // Leftover abstract literals meet concrete operands here.
        (&Value::F32(_), _) | (_, &Value::F32(_)) => {
            return scalar_binary(op, &Value::F32(a.as_f32()?), &Value::F32(b.as_f32()?));
        }
        (&Value::I32(x), &Value::U32(y)) => return scalar_binary(op, &Value::I32(x), &Value::I32(y as i32)),
        (&Value::U32(x), &Value::I32(y)) => return scalar_binary(op, &Value::U32(x), &Value::U32(y as u32)),
        _ => return Err(unsupported()),
    })
}

fn shift(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value> {
    let amount = b.as_u32()? & 31;
    match (op, a) {
        (BinaryOperator::ShiftLeft, &Value::I32(x)) => Ok(Value::I32(x.wrapping_shl(amount))),
        (BinaryOperator::ShiftLeft, &Value::U32(x)) => Ok(Value::U32(x.wrapping_shl(amount))),
        (BinaryOperator::ShiftRight, &Value::I32(x)) => Ok(Value::I32(x >> amount)),
        (BinaryOperator::ShiftRight, &Value::U32(x)) => Ok(Value::U32(x >> amount)),
        _ => Err(fault(format!("{op:?} is not defined for {a:?}"))),
    }
}

fn dot(x: &[f32], y: &[f32]) -> f32 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

fn columns(value: &Value) -> Result<Vec<Vec<f32>>> {
    match value {
        Value::Matrix(cols) => cols.iter().map(Value::floats).collect(),
        other => Err(fault(format!("expected a matrix, found {other:?}"))),
    }
}

fn from_columns(cols: &[Vec<f32>]) -> Value {
    Value::Matrix(
        cols.iter()
            .map(|c| Value::Vector(c.iter().map(|&x| Value::F32(x)).collect()))
            .collect(),
    )
}

fn floats_value(xs: &[f32]) -> Value {
    Value::Vector(xs.iter().map(|&x| Value::F32(x)).collect())
}

fn mat_vec(cols: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    let rows = cols.first().map_or(0, Vec::len);
    (0..rows).map(|r| cols.iter().zip(v).map(|(c, x)| c[r] * x).sum()).collect()
}

fn binary(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value> {
    if op == BinaryOperator::Multiply {
        match (a, b) {
            (Value::Matrix(_), Value::Vector(_)) => return Ok(floats_value(&mat_vec(&columns(a)?, &b.floats()?))),
            (Value::Vector(_), Value::Matrix(_)) => {
                let v = a.floats()?;
                let out: Vec<f32> = columns(b)?.iter().map(|c| dot(&v, c)).collect();
                return Ok(floats_value(&out));
            }
            (Value::Matrix(_), Value::Matrix(_)) => {
                let lhs = columns(a)?;
                let out: Vec<Vec<f32>> = columns(b)?.iter().map(|c| mat_vec(&lhs, c)).collect();
                return Ok(from_columns(&out));
            }
            _ => {}
        }
    }
    if matches!(op, BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight) {
        return map2(a, b, &|x: &Value, y: &Value| -> Result<Value> { shift(op, x, y) });
    }
    map2(a, b, &|x: &Value, y: &Value| -> Result<Value> { scalar_binary(op, x, y) })
}

fn unary(op: UnaryOperator, v: &Value) -> Result<Value> {
    map1(v, &|x: &Value| -> Result<Value> {
        Ok(match (op, x) {
            (UnaryOperator::Negate, &Value::F32(v)) => Value::F32(-v),
            (UnaryOperator::Negate, &Value::I32(v)) => Value::I32(v.wrapping_neg()),
            (UnaryOperator::LogicalNot | UnaryOperator::BitwiseNot, &Value::Bool(b)) => Value::Bool(!b),
            (UnaryOperator::BitwiseNot, &Value::I32(v)) => Value::I32(!v),
            (UnaryOperator::BitwiseNot, &Value::U32(v)) => Value::U32(!v),
            _ => return Err(fault(format!("{op:?} is not defined for {x:?}"))),
        })
    })
}

fn cast(v: &Value, kind: ScalarKind, convert: Option<u8>) -> Result<Value> {
    map1(v, &|x: &Value| -> Result<Value> {
        if convert.is_some() {
            return Ok(match kind {
                ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(x.as_f32()?),
                ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(x.as_i32()?),
                ScalarKind::Uint => Value::U32(x.as_u32()?),
                ScalarKind::Bool => Value::Bool(x.as_bool()?),
            });
        }
        let bits = match *x {
            Value::F32(f) => f.to_bits(),
            Value::I32(i) => i as u32,
            Value::U32(u) => u,
            Value::Bool(b) => u32::from(b),
            _ => return Err(fault(format!("cannot bitcast {x:?}"))),
        };
        Ok(match kind {
            ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(f32::from_bits(bits)),
            ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(bits as i32),
            ScalarKind::Uint => Value::U32(bits),
            ScalarKind::Bool => Value::Bool(bits != 0),
        })
    })
}

fn select(condition: &Value, accept: Value, reject: Value) -> Result<Value> {
    match (condition, accept, reject) {
        (Value::Vector(mask), Value::Vector(a), Value::Vector(r)) => Ok(Value::Vector(
            mask.iter()
                .zip(a.into_iter().zip(r))
                .map(|(m, (a, r))| -> Result<Value> { Ok(if m.as_bool()? { a } else { r }) })
                .collect::<Result<_>>()?,
        )),
        (condition, accept, reject) => Ok(if condition.as_bool()? { accept } else { reject }),
    }
}

fn relational(fun: RelationalFunction, v: &Value) -> Result<Value> {
    let all = |v: &Value| -> Result<Vec<bool>> {
        match v {
            Value::Vector(items) => items.iter().map(Value::as_bool).collect(),
            scalar => Ok(vec![scalar.as_bool()?]),
        }
    };
    match fun {
        RelationalFunction::All => Ok(Value::Bool(all(v)?.into_iter().all(|b| b))),
        RelationalFunction::Any => Ok(Value::Bool(all(v)?.into_iter().any(|b| b))),
        RelationalFunction::IsNan => map1(v, &|x: &Value| -> Result<Value> { Ok(Value::Bool(x.as_f32()?.is_nan())) }),
        RelationalFunction::IsInf => {
            map1(v, &|x: &Value| -> Result<Value> { Ok(Value::Bool(x.as_f32()?.is_infinite())) })
        }
    }
}

fn determinant(cols: &[Vec<f32>]) -> f32 {
    let n = cols.len();
    let mut m: Vec<Vec<f32>> = cols.to_vec();
    let mut det = 1.0;
    for i in 0..n {
        let Some(pivot) = (i..n).max_by(|&a, &b| m[a][i].abs().total_cmp(&m[b][i].abs())) else {
            return 0.0;
        };
        if m[pivot][i] == 0.0 {
            return 0.0;
        }
        if pivot != i {
            m.swap(pivot, i);
            det = -det;
        }
        det *= m[i][i];
        for r in i + 1..n {
            let factor = m[r][i] / m[i][i];
            for c in i..n {
                m[r][c] -= factor * m[i][c];
            }
        }
    }
    det
}

/// Gauss-Jordan inverse; a singular matrix inverts to zero.
fn inverse(cols: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let n = cols.len();
    let mut m: Vec<Vec<f32>> = cols.to_vec();
    let mut inv: Vec<Vec<f32>> = (0..n).map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect()).collect();
    for i in 0..n {
        let Some(pivot) = (i..n).max_by(|&a, &b| m[a][i].abs().total_cmp(&m[b][i].abs())) else {
            return vec![vec![0.0; n]; n];
        };
        if m[pivot][i] == 0.0 {
            return vec![vec![0.0; n]; n];
        }
        m.swap(pivot, i);
        inv.swap(pivot, i);
        let p = m[i][i];
        for c in 0..n {
            m[i][c] /= p;
            inv[i][c] /= p;
        }
        for r in 0..n {
            if r != i {
                let factor = m[r][i];
                for c in 0..n {
                    m[r][c] -= factor * m[i][c];
                    inv[r][c] -= factor * inv[i][c];
                }
            }
        }
    }
    inv
}

fn math(fun: MathFunction, args: &[Value]) -> Result<Value> {
    use MathFunction as M;
    let arg = |i: usize| args.get(i).ok_or_else(|| fault(format!("{fun:?} is missing argument {i}")));
    let f1 = |f: fn(f32) -> f32| -> Result<Value> {
        map1(arg(0)?, &|x: &Value| -> Result<Value> { Ok(Value::F32(f(x.as_f32()?))) })
    };
    let f2 = |f: fn(f32, f32) -> f32| -> Result<Value> {
        map2(arg(0)?, arg(1)?, &|x: &Value, y: &Value| -> Result<Value> {
            Ok(Value::F32(f(x.as_f32()?, y.as_f32()?)))
        })
    };
    let f3 = |f: fn(f32, f32, f32) -> f32| -> Result<Value> {
        map3(arg(0)?, arg(1)?, arg(2)?, &|x: &Value, y: &Value, z: &Value| -> Result<Value> {
            Ok(Value::F32(f(x.as_f32()?, y.as_f32()?, z.as_f32()?)))
        })
    };
    let ints = |f: fn(u32) -> u32| -> Result<Value> {
        map1(arg(0)?, &|x: &Value| -> Result<Value> {
            Ok(match *x {
                Value::I32(v) => Value::I32(f(v as u32) as i32),
                _ => Value::U32(f(x.as_u32()?)),
            })
        })
    };
    match fun {
        M::Abs => map1(arg(0)?, &|x: &Value| -> Result<Value> {
            Ok(match *x {
                Value::F32(v) => Value::F32(v.abs()),
                Value::I32(v) => Value::I32(v.wrapping_abs()),
                ref other => other.clone(),
            })
        }),
        M::Min | M::Max => {
            let max = fun == M::Max;
            map2(arg(0)?, arg(1)?, &|x: &Value, y: &Value| -> Result<Value> {
                Ok(match (x, y) {
                    (&Value::I32(p), &Value::I32(q)) => Value::I32(if max { p.max(q) } else { p.min(q) }),
                    (&Value::U32(p), &Value::U32(q)) => Value::U32(if max { p.max(q) } else { p.min(q) }),
                    _ => {
                        let (p, q) = (x.as_f32()?, y.as_f32()?);
                        Value::F32(if max { p.max(q) } else { p.min(q) })
                    }
                })
            })
        }
        M::Clamp => map3(arg(0)?, arg(1)?, arg(2)?, &|x: &Value, lo: &Value, hi: &Value| -> Result<Value> {
            Ok(match (x, lo, hi) {
                (&Value::I32(v), &Value::I32(l), &Value::I32(h)) => Value::I32(v.max(l).min(h)),
                (&Value::U32(v), &Value::U32(l), &Value::U32(h)) => Value::U32(v.max(l).min(h)),
                _ => Value::F32(x.as_f32()?.max(lo.as_f32()?).min(hi.as_f32()?)),
            })
        }),
        M::Saturate => f1(|x| x.max(0.0).min(1.0)),
        M::Cos => f1(f32::cos),
        M::Cosh => f1(f32::cosh),
        M::Sin => f1(f32::sin),
        M::Sinh => f1(f32::sinh),
        M::Tan => f1(f32::tan),
        M::Tanh => f1(f32::tanh),
        M::Acos => f1(f32::acos),
        M::Asin => f1(f32::asin),
        M::Atan => f1(f32::atan),
        M::Atan2 => f2(f32::atan2),
        M::Asinh => f1(f32::asinh),
        M::Acosh => f1(f32::acosh),
        M::Atanh => f1(f32::atanh),
        M::Radians => f1(f32::to_radians),
        M::Degrees => f1(f32::to_degrees),
        M::Ceil => f1(f32::ceil),
        M::Floor => f1(f32::floor),
        M::Round => f1(f32::round_ties_even),
        M::Fract => f1(|x| x - x.floor()),
        M::Trunc => f1(f32::trunc),
        M::Exp => f1(f32::exp),
        M::Exp2 => f1(f32::exp2),
        M::Log => f1(f32::ln),
        M::Log2 => f1(f32::log2),
        M::Pow => f2(f32::powf),
        M::Sqrt => f1(f32::sqrt),
        M::InverseSqrt => f1(|x| 1.0 / x.sqrt()),
        M::Sign => map1(arg(0)?, &|x: &Value| -> Result<Value> {
            Ok(match *x {
                Value::F32(v) if v > 0.0 => Value::F32(1.0),
                Value::F32(v) if v < 0.0 => Value::F32(-1.0),
                Value::F32(_) => Value::F32(0.0),
                Value::I32(v) => Value::I32(v.signum()),
                ref other => other.clone(),
            })
        }),
        M::Fma => f3(f32::mul_add),
        M::Mix => map3(arg(0)?, arg(1)?, arg(2)?, &|x: &Value, y: &Value, t: &Value| -> Result<Value> {
            Ok(match *t {
                Value::Bool(pick_y) => {
                    if pick_y {
                        y.clone()
                    } else {
                        x.clone()
                    }
                }
                _ => {
                    let (x, y) = (x.as_f32()?, y.as_f32()?);
                    Value::F32(x + (y - x) * t.as_f32()?)
                }
            })
        }),
        M::Step => f2(|edge, x| if x < edge { 0.0 } else { 1.0 }),
        M::SmoothStep => f3(|lo, hi, x| {
            let t = ((x - lo) / (hi - lo)).max(0.0).min(1.0);
            t * t * (3.0 - 2.0 * t)
        }),
        M::Ldexp => map2(arg(0)?, arg(1)?, &|x: &Value, e: &Value| -> Result<Value> {
            Ok(Value::F32(x.as_f32()? * 2f32.powi(e.as_i32()?)))
        }),
        M::Modf => {
            let x = arg(0)?;
            let fract = map1(x, &|v: &Value| -> Result<Value> { Ok(Value::F32(v.as_f32()?.fract())) })?;
            let whole = map1(x, &|v: &Value| -> Result<Value> { Ok(Value::F32(v.as_f32()?.trunc())) })?;
            Ok(Value::Composite(vec![fract, whole]))
        }
        M::Dot => {
            let (x, y) = (arg(0)?, arg(1)?);
            match (x, y) {
                (Value::Vector(a), Value::Vector(b)) if matches!(a.first(), Some(Value::I32(_) | Value::U32(_))) => {
                    let mut acc = Value::I32(0);
                    if matches!(a.first(), Some(Value::U32(_))) {
                        acc = Value::U32(0);
                    }
                    for (p, q) in a.iter().zip(b) {
                        acc = scalar_binary(BinaryOperator::Add, &acc, &scalar_binary(BinaryOperator::Multiply, p, q)?)?;
                    }
                    Ok(acc)
                }
                _ => Ok(Value::F32(dot(&x.floats()?, &y.floats()?))),
            }
        }
        M::Cross => {
            let (a, b) = (arg(0)?.floats()?, arg(1)?.floats()?);
            if a.len() < 3 || b.len() < 3 {
                return Err(fault("cross needs two 3-component vectors"));
            }
            Ok(floats_value(&[
                a[1] * b[2] - a[2] * b[1],
                a[2] * b[0] - a[0] * b[2],
                a[0] * b[1] - a[1] * b[0],
            ]))
        }
        M::Length => {
            let v = arg(0)?.floats()?;
            Ok(Value::F32(dot(&v, &v).sqrt()))
        }
        M::Distance => {
            let d: Vec<f32> = arg(0)?.floats()?.iter().zip(arg(1)?.floats()?).map(|(a, b)| a - b).collect();
            Ok(Value::F32(dot(&d, &d).sqrt()))
        }
        M::Normalize => {
            let v = arg(0)?.floats()?;
            let len = dot(&v, &v).sqrt();
            let n: Vec<f32> = v.iter().map(|x| x / len).collect();
            Ok(match arg(0)? {
                Value::Vector(_) => floats_value(&n),
                _ => Value::F32(n[0]),
            })
        }
        M::FaceForward => {
            let (n, i, nref) = (arg(0)?, arg(1)?.floats()?, arg(2)?.floats()?);
            if dot(&nref, &i) < 0.0 {
                Ok(n.clone())
            } else {
                unary(UnaryOperator::Negate, n)
            }
        }
        M::Reflect => {
            let (i, n) = (arg(0)?.floats()?, arg(1)?.floats()?);
            let d = 2.0 * dot(&n, &i);
            Ok(floats_value(&i.iter().zip(&n).map(|(i, n)| i - d * n).collect::<Vec<_>>()))
        }
        M::Refract => {
            let (i, n, eta) = (arg(0)?.floats()?, arg(1)?.floats()?, arg(2)?.as_f32()?);
            let d = dot(&n, &i);
            let k = 1.0 - eta * eta * (1.0 - d * d);
            if k < 0.0 {
                return Ok(floats_value(&vec![0.0; i.len()]));
            }
            let s = eta * d + k.sqrt();
            Ok(floats_value(&i.iter().zip(&n).map(|(i, n)| eta * i - s * n).collect::<Vec<_>>()))
        }
        M::Outer => {
            let (a, b) = (arg(0)?.floats()?, arg(1)?.floats()?);
            let cols: Vec<Vec<f32>> = b.iter().map(|y| a.iter().map(|x| x * y).collect()).collect();
            Ok(from_columns(&cols))
        }
        M::Transpose => {
            let cols = columns(arg(0)?)?;
            let rows = cols.first().map_or(0, Vec::len);
            let t: Vec<Vec<f32>> = (0..rows).map(|r| cols.iter().map(|c| c[r]).collect()).collect();
            Ok(from_columns(&t))
        }
        M::Determinant => Ok(Value::F32(determinant(&columns(arg(0)?)?))),
        M::Inverse => Ok(from_columns(&inverse(&columns(arg(0)?)?))),
        M::CountOneBits => ints(u32::count_ones),
        M::ReverseBits => ints(u32::reverse_bits),
        M::CountTrailingZeros => ints(u32::trailing_zeros),
        M::CountLeadingZeros => ints(u32::leading_zeros),
        M::FirstTrailingBit => ints(|x| if x == 0 { u32::MAX } else { x.trailing_zeros() }),
        M::FirstLeadingBit => map1(arg(0)?, &|x: &Value| -> Result<Value> {
            Ok(match *x {
                Value::I32(v) => {
                    let bits = (if v < 0 { !v } else { v }) as u32;
                    Value::I32(if bits == 0 { -1 } else { 31 - bits.leading_zeros() as i32 })
                }
                _ => {
                    let v = x.as_u32()?;
                    Value::U32(if v == 0 { u32::MAX } else { 31 - v.leading_zeros() })
                }
            })
        }),
        M::Pack4x8unorm => {
            let v = arg(0)?.floats()?;
            Ok(Value::U32(v.iter().take(4).enumerate().fold(0, |acc, (i, x)| {
                acc | (((x.max(0.0).min(1.0) * 255.0).round() as u32) << (8 * i))
            })))
        }
        M::Unpack4x8unorm => {
            let v = arg(0)?.as_u32()?;
            Ok(floats_value(&[0, 1, 2, 3].map(|i| ((v >> (8 * i)) & 0xff) as f32 / 255.0)))
        }
        _ => Err(fault(format!("{fun:?} is not supported"))),
    }
}

// --- Images ---

/// A texture bound to an image global.
#[derive(Debug)]
pub enum ImageBinding<'i> {
    /// Read through a sampler.
    Sampled { image: &'i Image, sampler: SamplerState },
    /// Loaded from and stored to texel by texel at one mip level.
    Storage { image: &'i mut Image, mip: u32 },
}

fn color_value(color: LinearRgba, kind: ScalarKind) -> Value {
    let c = [color.r, color.g, color.b, color.a];
    Value::Vector(
        c.iter()
            .map(|&x| match kind {
                ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(x as i32),
                ScalarKind::Uint => Value::U32(x as u32),
                ScalarKind::Bool => Value::Bool(x != 0.0),
                ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(x),
            })
            .collect(),
    )
}

fn class_kind(class: ImageClass) -> ScalarKind {
    match class {
        ImageClass::Sampled { kind, .. } => kind,
        ImageClass::Depth { .. } => ScalarKind::Float,
        ImageClass::Storage { format, .. } => naga::Scalar::from(format).kind,
    }
}

/// Everything an invocation reads or writes outside its own variables.
#[derive(Debug, Default)]
pub struct Resources<'i> {
    memory: Vec<Option<Vec<u8>>>,
    images: Vec<Option<ImageBinding<'i>>>,
    workgroup: Vec<Option<Value>>,
}

impl<'i> Resources<'i> {
    /// Empty bindings for every global of `module`.
    pub fn new(module: &naga::Module) -> Self {
        let n = module.global_variables.len();
        Self {
            memory: vec![None; n],
            images: (0..n).map(|_| None).collect(),
            workgroup: vec![None; n],
        }
    }

    /// Backs a uniform or storage global with `bytes`.
    pub fn bind_memory(&mut self, global: Handle<naga::GlobalVariable>, bytes: Vec<u8>) {
        if let Some(slot) = self.memory.get_mut(global.index()) {
            *slot = Some(bytes);
        }
    }

    pub fn bind_image(&mut self, global: Handle<naga::GlobalVariable>, binding: ImageBinding<'i>) {
        if let Some(slot) = self.images.get_mut(global.index()) {
            *slot = Some(binding);
        }
    }

    /// Current bytes behind a memory global.
    pub fn memory(&self, global: Handle<naga::GlobalVariable>) -> Option<&[u8]> {
        self.memory.get(global.index()).and_then(Option::as_deref)
    }

    /// Forgets workgroup-shared variables; each work group starts from zero.
    pub fn reset_workgroup(&mut self) {
        self.workgroup.iter_mut().for_each(|v| *v = None);
    }
}

// --- Execution ---

enum Flow {
    Next,
    Break,
    Continue,
    Return(Option<Value>),
    Kill,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Returned(Option<Value>),
    /// The fragment was discarded.
    Discarded,
}

struct Frame<'m> {
    function: &'m naga::Function,
    arguments: Vec<Value>,
    values: Vec<Option<Value>>,
    depth: usize,
}

struct Invocation<'m, 'r, 'i> {
    module: &'m naga::Module,
    resources: &'r mut Resources<'i>,
    privates: Vec<Option<Value>>,
    locals: Vec<Vec<Value>>,
    steps: u64,
    step_limit: u64,
}

impl<'m> Invocation<'m, '_, '_> {
    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(fault("step limit exceeded; the shader does not terminate"));
        }
        Ok(())
    }

    fn call(&mut self, function: &'m naga::Function, arguments: Vec<Value>) -> Result<Flow> {
        let depth = self.locals.len();
        if depth >= CALL_DEPTH_LIMIT {
            return Err(fault("call depth limit exceeded"));
        }
        let mut frame = Frame {
            function,
            arguments,
            values: vec![None; function.expressions.len()],
            depth,
        };
        self.locals.push(Vec::with_capacity(function.local_variables.len()));
        for (_, local) in function.local_variables.iter() {
            let value = match local.init {
                Some(init) => self.eval(&mut frame, init)?,
                None => zero_value(self.module, local.ty),
            };
            self.locals[depth].push(value);
        }
        let flow = self.block(&mut frame, &function.body);
        self.locals.truncate(depth);
        flow
    }

    fn block(&mut self, frame: &mut Frame<'m>, block: &'m naga::Block) -> Result<Flow> {
        for statement in block.iter() {
            self.tick()?;
            match *statement {
                Statement::Emit(ref range) => {
                    for handle in range.clone() {
                        let value = self.compute(frame, handle)?;
                        frame.values[handle.index()] = Some(value);
                    }
                }
                Statement::Block(ref inner) => match self.block(frame, inner)? {
                    Flow::Next => {}
                    flow => return Ok(flow),
                },
                Statement::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    let branch = if self.eval(frame, condition)?.as_bool()? { accept } else { reject };
                    match self.block(frame, branch)? {
                        Flow::Next => {}
                        flow => return Ok(flow),
                    }
                }
                Statement::Switch { selector, ref cases } => {
                    let selector = self.eval(frame, selector)?;
                    let start = cases.iter().position(|case| match case.value {
                        SwitchValue::I32(v) => selector == Value::I32(v),
                        SwitchValue::U32(v) => selector == Value::U32(v),
                        SwitchValue::Default => false,
                    });
                    let start = start.or_else(|| cases.iter().position(|case| case.value == SwitchValue::Default));
                    if let Some(start) = start {
                        for case in &cases[start..] {
                            match self.block(frame, &case.body)? {
                                Flow::Next if case.fall_through => continue,
                                Flow::Next | Flow::Break => break,
                                flow => return Ok(flow),
                            }
                        }
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => loop {
                    self.tick()?;
                    match self.block(frame, body)? {
                        Flow::Break => break,
                        Flow::Next | Flow::Continue => {}
                        flow => return Ok(flow),
                    }
                    match self.block(frame, continuing)? {
                        Flow::Next => {}
                        flow => return Ok(flow),
                    }
                    if let Some(condition) = break_if {
                        if self.eval(frame, condition)?.as_bool()? {
                            break;
                        }
                    }
                },
                Statement::Break => return Ok(Flow::Break),
                Statement::Continue => return Ok(Flow::Continue),
                Statement::Return { value } => {
                    let value = match value {
                        Some(h) => Some(self.eval(frame, h)?),
                        None => None,
                    };
                    return Ok(Flow::Return(value));
                }
                Statement::Kill => return Ok(Flow::Kill),
                // Invocations run one after another, so every barrier is already satisfied.
                Statement::Barrier(_) => {}
                Statement::Store { pointer, value } => {
                    let pointer = self.eval(frame, pointer)?;
                    let value = self.eval(frame, value)?;
                    self.store(&pointer, value)?;
                }
                Statement::ImageStore {
                    image,
                    coordinate,
                    array_index,
                    value,
                } => self.image_store(frame, image, coordinate, array_index, value)?,
                Statement::Atomic {
                    pointer,
                    ref fun,
                    value,
                    result,
                } => {
                    let pointer = self.eval(frame, pointer)?;
                    let operand = self.eval(frame, value)?;
                    let old = self.load(&pointer)?;
                    let (new, reported) = match *fun {
                        AtomicFunction::Add => (binary(BinaryOperator::Add, &old, &operand)?, old),
                        AtomicFunction::Subtract => (binary(BinaryOperator::Subtract, &old, &operand)?, old),
                        AtomicFunction::And => (binary(BinaryOperator::And, &old, &operand)?, old),
                        AtomicFunction::InclusiveOr => (binary(BinaryOperator::InclusiveOr, &old, &operand)?, old),
                        AtomicFunction::ExclusiveOr => (binary(BinaryOperator::ExclusiveOr, &old, &operand)?, old),
                        AtomicFunction::Min => (math(MathFunction::Min, &[old.clone(), operand])?, old),
                        AtomicFunction::Max => (math(MathFunction::Max, &[old.clone(), operand])?, old),
                        AtomicFunction::Exchange { compare: None } => (operand, old),
                        AtomicFunction::Exchange { compare: Some(c) } => {
                            let expected = self.eval(frame, c)?;
                            let exchanged = old == expected;
                            let new = if exchanged { operand } else { old.clone() };
                            (new, Value::Composite(vec![old, Value::Bool(exchanged)]))
                        }
                    };
                    self.store(&pointer, new)?;
                    if let Some(result) = result {
                        frame.values[result.index()] = Some(reported);
                    }
                }
                Statement::WorkGroupUniformLoad { pointer, result } => {
                    let pointer = self.eval(frame, pointer)?;
                    frame.values[result.index()] = Some(self.load(&pointer)?);
                }
                Statement::Call {
                    function,
                    ref arguments,
                    result,
                } => {
                    let args = arguments
                        .iter()
                        .map(|&a| self.eval(frame, a))
                        .collect::<Result<Vec<_>>>()?;
                    let module = self.module;
                    match self.call(&module.functions[function], args)? {
                        Flow::Kill => return Ok(Flow::Kill),
                        Flow::Return(Some(value)) => {
                            if let Some(result) = result {
                                frame.values[result.index()] = Some(value);
                            }
                        }
                        _ => {}
                    }
                }
                ref other => return Err(fault(format!("unsupported statement {other:?}"))),
            }
        }
        Ok(Flow::Next)
    }

    fn eval(&mut self, frame: &mut Frame<'m>, handle: Handle<Expression>) -> Result<Value> {
        if let Some(value) = &frame.values[handle.index()] {
            return Ok(value.clone());
        }
        let value = self.compute(frame, handle)?;
        frame.values[handle.index()] = Some(value.clone());
        Ok(value)
    }

    fn compute(&mut self, frame: &mut Frame<'m>, handle: Handle<Expression>) -> Result<Value> {
        let module = self.module;
        let function = frame.function;
        match function.expressions[handle] {
            Expression::Literal(lit) => Ok(literal(lit)),
            Expression::Constant(c) => const_eval(module, module.constants[c].init),
            Expression::ZeroValue(ty) => Ok(zero_value(module, ty)),
            Expression::Compose { ty, ref components } => {
                let values = components
                    .iter()
                    .map(|&c| self.eval(frame, c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(compose(module, ty, values))
            }
            Expression::Access { base, index } => {
                let base = self.eval(frame, base)?;
                let index = self.eval(frame, index)?.as_u32()?;
                access(module, base, index)
            }
            Expression::AccessIndex { base, index } => {
                let base = self.eval(frame, base)?;
                access(module, base, index)
            }
            Expression::Splat { size, value } => Ok(Value::Vector(vec![self.eval(frame, value)?; size as usize])),
            Expression::Swizzle { size, vector, pattern } => swizzle(&self.eval(frame, vector)?, size, pattern),
            Expression::FunctionArgument(i) => frame
                .arguments
                .get(i as usize)
                .cloned()
                .ok_or_else(|| fault(format!("missing argument {i}"))),
            Expression::GlobalVariable(global) => Ok(self.global_pointer(global)),
            Expression::LocalVariable(local) => Ok(Value::Pointer(Pointer::Slot {
                root: Root::Local {
                    frame: frame.depth,
                    index: local.index(),
                },
                path: Vec::new(),
            })),
            Expression::Load { pointer } => {
                let pointer = self.eval(frame, pointer)?;
                self.load(&pointer)
            }
            Expression::ImageSample {
                image,
                gather,
                coordinate,
                array_index,
                offset,
                ref level,
                depth_ref,
                ..
            } => {
                let global = self.image_global(frame, image)?;
                let coords = self.eval(frame, coordinate)?.floats()?;
                let layer = match array_index {
                    Some(h) => self.eval(frame, h)?.as_f32()?.round().max(0.0) as u32,
                    None => 0,
                };
                let lod = match *level {
                    SampleLevel::Auto | SampleLevel::Gradient { .. } => None,
                    SampleLevel::Zero => Some(0.0),
                    SampleLevel::Exact(h) | SampleLevel::Bias(h) => Some(self.eval(frame, h)?.as_f32()?),
                };
                let reference = match depth_ref {
                    Some(h) => Some(self.eval(frame, h)?.as_f32()?),
                    None => None,
                };
                let texel_offset = match offset {
                    Some(h) => const_eval(module, h)?.floats()?,
                    None => Vec::new(),
                };
                self.image_sample(global, &coords, layer, lod, reference, &texel_offset, gather)
            }
            Expression::ImageLoad {
                image,
                coordinate,
                array_index,
                level,
                ..
            } => {
                let global = self.image_global(frame, image)?;
                let coords = self.texel_coords(frame, coordinate)?;
                let layer = match array_index {
                    Some(h) => self.eval(frame, h)?.as_u32()?,
                    None => 0,
                };
                let level = match level {
                    Some(h) => Some(self.eval(frame, h)?.as_u32()?),
                    None => None,
                };
                self.image_load(global, coords, layer, level)
            }
            Expression::ImageQuery { image, query } => {
                let global = self.image_global(frame, image)?;
                let level = match query {
                    ImageQuery::Size { level: Some(h) } => self.eval(frame, h)?.as_u32()?,
                    _ => 0,
                };
                self.image_query(global, query, level)
            }
            Expression::Unary { op, expr } => unary(op, &self.eval(frame, expr)?),
            Expression::Binary { op, left, right } => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                binary(op, &left, &right)
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let condition = self.eval(frame, condition)?;
                let accept = self.eval(frame, accept)?;
                let reject = self.eval(frame, reject)?;
                select(&condition, accept, reject)
            }
            // Invocations do not run in quads.
            Expression::Derivative { expr, .. } => {
                map1(&self.eval(frame, expr)?, &|_: &Value| -> Result<Value> { Ok(Value::F32(0.0)) })
            }
            Expression::Relational { fun, argument } => relational(fun, &self.eval(frame, argument)?),
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => {
                let mut args = vec![self.eval(frame, arg)?];
                for extra in [arg1, arg2, arg3].into_iter().flatten() {
                    args.push(self.eval(frame, extra)?);
                }
                math(fun, &args)
            }
            Expression::As { expr, kind, convert } => cast(&self.eval(frame, expr)?, kind, convert),
            Expression::ArrayLength(expr) => {
                let pointer = self.eval(frame, expr)?;
                self.array_length(&pointer)
            }
            Expression::CallResult(_) | Expression::AtomicResult { .. } | Expression::WorkGroupUniformLoadResult { .. } => {
                Err(fault("result read before the statement producing it ran"))
            }
            ref other => Err(fault(format!("unsupported expression {other:?}"))),
        }
    }

    fn global_pointer(&self, global: Handle<naga::GlobalVariable>) -> Value {
        let var = &self.module.global_variables[global];
        match var.space {
            AddressSpace::Uniform | AddressSpace::Storage { .. } | AddressSpace::PushConstant => {
                Value::Pointer(Pointer::Memory {
                    global,
                    offset: 0,
                    layout: Layout::Type(var.ty),
                })
            }
            AddressSpace::Handle => Value::Handle(global),
            AddressSpace::WorkGroup => Value::Pointer(Pointer::Slot {
                root: Root::WorkGroup(global),
                path: Vec::new(),
            }),
            AddressSpace::Private | AddressSpace::Function => Value::Pointer(Pointer::Slot {
                root: Root::Private(global),
                path: Vec::new(),
            }),
        }
    }

    fn root(&mut self, root: Root) -> Result<&mut Value> {
        let module = self.module;
        let (slot, global) = match root {
            Root::Local { frame, index } => {
                return self
                    .locals
                    .get_mut(frame)
                    .and_then(|locals| locals.get_mut(index))
                    .ok_or_else(|| fault("dangling local pointer"));
            }
            Root::Private(global) => (self.privates.get_mut(global.index()), global),
            Root::WorkGroup(global) => (self.resources.workgroup.get_mut(global.index()), global),
        };
        let slot = slot.ok_or_else(|| fault("pointer to an unknown global"))?;
        if slot.is_none() {
            *slot = Some(global_init(module, global)?);
        }
        slot.as_mut().ok_or_else(|| fault("uninitialized global"))
    }

    fn load(&mut self, pointer: &Value) -> Result<Value> {
        match pointer {
            Value::Pointer(Pointer::Slot { root, path }) => {
                let mut current: &Value = self.root(*root)?;
                for &i in path {
                    current = child_ref(current, i)?;
                }
                Ok(current.clone())
            }
            Value::Pointer(Pointer::Memory { global, offset, layout }) => {
                let bytes = self.resources.memory(*global).unwrap_or(&[]);
                load_memory(self.module, bytes, *offset, *layout)
            }
            other => Err(fault(format!("load through {other:?}"))),
        }
    }

    fn store(&mut self, pointer: &Value, value: Value) -> Result<()> {
        match pointer {
            Value::Pointer(Pointer::Slot { root, path }) => {
                let mut current = self.root(*root)?;
                for &i in path {
                    current = child_mut(current, i)?;
                }
                *current = value;
                Ok(())
            }
            Value::Pointer(Pointer::Memory { global, offset, layout }) => {
                let module = self.module;
                match self.resources.memory.get_mut(global.index()).and_then(Option::as_mut) {
                    Some(bytes) => store_memory(module, bytes, *offset, *layout, &value),
                    None => Ok(()),
                }
            }
            other => Err(fault(format!("store through {other:?}"))),
        }
    }

    fn array_length(&self, pointer: &Value) -> Result<Value> {
        let Value::Pointer(Pointer::Memory {
            global,
            offset,
            layout: Layout::Type(ty),
        }) = pointer
        else {
            return Err(fault(format!("array length of {pointer:?}")));
        };
        let stride = match self.module.types[*ty].inner {
            TypeInner::Array { stride, .. } => u64::from(stride.max(1)),
            ref other => return Err(fault(format!("array length of {other:?}"))),
        };
        let len = self.resources.memory(*global).map_or(0, <[u8]>::len) as u64;
        Ok(Value::U32((len.saturating_sub(*offset) / stride) as u32))
    }

    fn image_global(&mut self, frame: &mut Frame<'m>, image: Handle<Expression>) -> Result<Handle<naga::GlobalVariable>> {
        match self.eval(frame, image)? {
            Value::Handle(global) => Ok(global),
            other => Err(fault(format!("expected an image, found {other:?}"))),
        }
    }

    fn image_type(&self, global: Handle<naga::GlobalVariable>) -> Result<(ImageDimension, ImageClass)> {
        match self.module.types[self.module.global_variables[global].ty].inner {
            TypeInner::Image { dim, class, .. } => Ok((dim, class)),
            ref other => Err(fault(format!("expected an image type, found {other:?}"))),
        }
    }

    fn texel_coords(&mut self, frame: &mut Frame<'m>, coordinate: Handle<Expression>) -> Result<[u32; 3]> {
        let value = self.eval(frame, coordinate)?;
        let items = match &value {
            Value::Vector(items) => items.clone(),
            scalar => vec![scalar.clone()],
        };
        let mut coords = [0; 3];
        for (c, item) in coords.iter_mut().zip(&items) {
            // Negative coordinates land out of range and read as zero.
            *c = u32::try_from(item.as_i32()?).unwrap_or(u32::MAX);
        }
        Ok(coords)
    }

    #[allow(clippy::too_many_arguments)]
    fn image_sample(
        &self,
        global: Handle<naga::GlobalVariable>,
        coords: &[f32],
        layer: u32,
        lod: Option<f32>,
        reference: Option<f32>,
        texel_offset: &[f32],
        gather: Option<naga::SwizzleComponent>,
    ) -> Result<Value> {
        let (dim, class) = self.image_type(global)?;
        let kind = class_kind(class);
        let binding = self.resources.images.get(global.index()).and_then(Option::as_ref);
        let Some(ImageBinding::Sampled { image, sampler }) = binding else {
            return Ok(match (class, reference) {
                (ImageClass::Depth { .. }, _) => Value::F32(0.0),
                _ => color_value(LinearRgba::TRANSPARENT, kind),
            });
        };
        let c = |i: usize| coords.get(i).copied().unwrap_or(0.0);
        let extent = image.mip_extent(0);
        let shift = |i: usize, size: u32| texel_offset.get(i).map_or(0.0, |o| o / size.max(1) as f32);
        let (layer, uvw) = match dim {
            ImageDimension::D1 => (layer, [c(0) + shift(0, extent.width), 0.5, 0.0]),
            ImageDimension::D2 => (
                layer,
                [c(0) + shift(0, extent.width), c(1) + shift(1, extent.height), 0.0],
            ),
            ImageDimension::D3 => (layer, [c(0), c(1), c(2)]),
            ImageDimension::Cube => {
                let (face, u, v) = sampler::cube_face([c(0), c(1), c(2)]);
                (face + 6 * layer, [u, v, 0.0])
            }
        };
        if let Some(reference) = reference {
            return Ok(Value::F32(sampler::sample_compare(image, sampler, uvw[0], uvw[1], reference)));
        }
        let color = sampler::sample_level(image, sampler, layer, uvw, lod);
        if let Some(component) = gather {
            let channel = [color.r, color.g, color.b, color.a][component as usize];
            return Ok(color_value(LinearRgba::new(channel, channel, channel, channel), kind));
        }
        Ok(match class {
            ImageClass::Depth { .. } => Value::F32(color.r),
            _ => color_value(color, kind),
        })
    }

    fn image_load(
        &self,
        global: Handle<naga::GlobalVariable>,
        [x, y, z]: [u32; 3],
        layer: u32,
        level: Option<u32>,
    ) -> Result<Value> {
        let (dim, class) = self.image_type(global)?;
        let (y, z) = match dim {
            ImageDimension::D1 => (0, 0),
            ImageDimension::D2 | ImageDimension::Cube => (y, 0),
            ImageDimension::D3 => (y, z),
        };
        let color = match self.resources.images.get(global.index()).and_then(Option::as_ref) {
            Some(ImageBinding::Sampled { image, .. }) => image.load(level.unwrap_or(0), layer, x, y, z),
            Some(ImageBinding::Storage { image, mip }) => image.load(*mip, layer, x, y, z),
            None => LinearRgba::TRANSPARENT,
        };
        Ok(match class {
            ImageClass::Depth { .. } => Value::F32(color.r),
            _ => color_value(color, class_kind(class)),
        })
    }

    fn image_query(&self, global: Handle<naga::GlobalVariable>, query: ImageQuery, level: u32) -> Result<Value> {
        let (dim, _) = self.image_type(global)?;
        let image: &Image = match self.resources.images.get(global.index()).and_then(Option::as_ref) {
            Some(ImageBinding::Sampled { image, .. }) => *image,
            Some(ImageBinding::Storage { image, .. }) => &**image,
            None => return Ok(Value::U32(0)),
        };
        let desc = image.desc();
        Ok(match query {
            ImageQuery::Size { .. } => {
                let e = image.mip_extent(level);
                match dim {
                    ImageDimension::D1 => Value::U32(e.width),
                    ImageDimension::D2 | ImageDimension::Cube => Value::Vector(vec![Value::U32(e.width), Value::U32(e.height)]),
                    ImageDimension::D3 => {
                        Value::Vector(vec![Value::U32(e.width), Value::U32(e.height), Value::U32(e.depth)])
                    }
                }
            }
            ImageQuery::NumLevels => Value::U32(desc.mip_levels),
            ImageQuery::NumLayers => Value::U32(if dim == ImageDimension::Cube {
                desc.array_layers / 6
            } else {
                desc.array_layers
            }),
            ImageQuery::NumSamples => Value::U32(desc.sample_count),
        })
    }

    fn image_store(
        &mut self,
        frame: &mut Frame<'m>,
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        value: Handle<Expression>,
    ) -> Result<()> {
        let global = self.image_global(frame, image)?;
        let [x, y, z] = self.texel_coords(frame, coordinate)?;
        let layer = match array_index {
            Some(h) => self.eval(frame, h)?.as_u32()?,
            None => 0,
        };
        let texel = self.eval(frame, value)?.floats()?;
        let at = |i: usize| texel.get(i).copied().unwrap_or(0.0);
        let color = LinearRgba::new(at(0), at(1), at(2), at(3));
        let (dim, _) = self.image_type(global)?;
        let (y, z) = match dim {
            ImageDimension::D1 => (0, 0),
            ImageDimension::D2 | ImageDimension::Cube => (y, 0),
            ImageDimension::D3 => (y, z),
        };
        if let Some(Some(ImageBinding::Storage { image, mip })) = self.resources.images.get_mut(global.index()) {
            image.store(*mip, layer, x, y, z, color);
        }
        Ok(())
    }
}

/// One entry point of a module, ready to run.
#[derive(Debug, Clone, Copy)]
pub struct Stage<'m> {
    module: &'m naga::Module,
    entry: &'m naga::EntryPoint,
    step_limit: u64,
}

impl<'m> Stage<'m> {
    /// The first entry point of `stage` in `module`.
    pub fn new(module: &'m naga::Module, stage: naga::ShaderStage) -> Option<Self> {
        module
            .entry_points
            .iter()
            .find(|entry| entry.stage == stage)
            .map(|entry| Self {
                module,
                entry,
                step_limit: STEP_LIMIT,
            })
    }

    /// Caps the statements one invocation may execute.
    pub fn with_step_limit(self, step_limit: u64) -> Self {
        Self { step_limit, ..self }
    }

    pub fn module(&self) -> &'m naga::Module {
        self.module
    }

    pub fn arguments(&self) -> &'m [naga::FunctionArgument] {
        let entry: &'m naga::EntryPoint = self.entry;
        &entry.function.arguments
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.entry.workgroup_size
    }

    /// Bindings of the values the entry point returns, flattening a result struct.
    pub fn outputs(&self) -> Vec<(&'m naga::Binding, Handle<naga::Type>)> {
        let entry: &'m naga::EntryPoint = self.entry;
        let Some(result) = &entry.function.result else {
            return Vec::new();
        };
        match (&result.binding, &self.module.types[result.ty].inner) {
            (Some(binding), _) => vec![(binding, result.ty)],
            (None, TypeInner::Struct { members, .. }) => members
                .iter()
                .filter_map(|m| m.binding.as_ref().map(|b| (b, m.ty)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Splits a returned value along [`Stage::outputs`].
    pub fn split_outputs(&self, value: Value) -> Vec<(&'m naga::Binding, Value)> {
        let entry: &'m naga::EntryPoint = self.entry;
        let Some(result) = &entry.function.result else {
            return Vec::new();
        };
        match (&result.binding, &self.module.types[result.ty].inner, value) {
            (Some(binding), _, value) => vec![(binding, value)],
            (None, TypeInner::Struct { members, .. }, Value::Composite(items)) => members
                .iter()
                .zip(items)
                .filter_map(|(m, v)| m.binding.as_ref().map(|b| (b, v)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Runs one invocation of the entry point.
    pub fn run(&self, resources: &mut Resources<'_>, arguments: Vec<Value>) -> Result<Outcome> {
        let entry: &'m naga::EntryPoint = self.entry;
        let mut invocation = Invocation {
            module: self.module,
            resources,
            privates: vec![None; self.module.global_variables.len()],
            locals: Vec::new(),
            steps: 0,
            step_limit: self.step_limit,
        };
        match invocation.call(&entry.function, arguments)? {
            Flow::Kill => Ok(Outcome::Discarded),
            Flow::Return(value) => Ok(Outcome::Returned(value)),
            Flow::Next | Flow::Break | Flow::Continue => Ok(Outcome::Returned(None)),
        }
    }
}

// --- Conversions for the executor ---

/// Builds an input of type `ty` from up to four packed components.
///
/// Vertex attributes arrive as numbers; varyings carry integer bits unchanged.
pub fn input_value(module: &naga::Module, ty: Handle<naga::Type>, data: [f32; 4], bits: bool) -> Value {
    let scalar = |kind: ScalarKind, x: f32| match kind {
        ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(x),
        ScalarKind::Sint | ScalarKind::AbstractInt if bits => Value::I32(x.to_bits() as i32),
        ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(x as i32),
        ScalarKind::Uint if bits => Value::U32(x.to_bits()),
        ScalarKind::Uint => Value::U32(x as u32),
        ScalarKind::Bool => Value::Bool(x != 0.0),
    };
    match module.types[ty].inner {
        TypeInner::Scalar(s) => scalar(s.kind, data[0]),
        TypeInner::Vector { size, scalar: s } => {
            Value::Vector(data[..size as usize].iter().map(|&x| scalar(s.kind, x)).collect())
        }
        _ => zero_value(module, ty),
    }
}

/// Packs a scalar or vector into four components; integers keep their bits.
pub fn pack_value(value: &Value) -> [f32; 4] {
    let mut out = [0.0, 0.0, 0.0, 1.0];
    let items = match value {
        Value::Vector(items) => items.as_slice(),
        scalar => std::slice::from_ref(scalar),
    };
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = match *item {
            Value::F32(x) => x,
            Value::I32(x) => f32::from_bits(x as u32),
            Value::U32(x) => f32::from_bits(x),
            Value::Bool(b) => f32::from_bits(u32::from(b)),
            _ => 0.0,
        };
    }
    out
}

/// `true` if values of `ty` are floating point.
pub fn is_float(module: &naga::Module, ty: Handle<naga::Type>) -> bool {
    match module.types[ty].inner {
        TypeInner::Scalar(s) | TypeInner::Vector { scalar: s, .. } | TypeInner::Matrix { scalar: s, .. } => {
            matches!(s.kind, ScalarKind::Float | ScalarKind::AbstractFloat)
        }
        _ => false,
    }
}

/// Converts a host uniform into a value of `ty`.
pub fn uniform_value(module: &naga::Module, ty: Handle<naga::Type>, value: &UniformValue) -> Value {
    let floats = |v: &[f32]| Value::Vector(v.iter().map(|&x| Value::F32(x)).collect());
    let matrix = |m: &[f32], n: usize| Value::Matrix(m.chunks(n).map(floats).collect());
    match value {
        UniformValue::Int(i) => match module.types[ty].inner {
            TypeInner::Scalar(s) => match s.kind {
                ScalarKind::Uint => Value::U32(*i as u32),
                ScalarKind::Float | ScalarKind::AbstractFloat => Value::F32(*i as f32),
                ScalarKind::Bool => Value::Bool(*i != 0),
                ScalarKind::Sint | ScalarKind::AbstractInt => Value::I32(*i),
            },
            _ => Value::I32(*i),
        },
        UniformValue::Float(f) => Value::F32(*f),
        UniformValue::Vec2(v) => floats(&v[..]),
        UniformValue::Vec3(v) => floats(&v[..]),
        UniformValue::Vec4(v) => floats(&v[..]),
        UniformValue::Mat3(m) => matrix(&m[..], 3),
        UniformValue::Mat4(m) => matrix(&m[..], 4),
        UniformValue::IntArray(v) => Value::Composite(v.iter().map(|&i| Value::I32(i)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::soft::shader::compile_program;
    use lunex_core::renderer::traits::ShaderStageSource;
    use lunex_core::renderer::ShaderStage;
    use std::sync::Arc;

    fn module(stage: ShaderStage, source: &str) -> Arc<naga::Module> {
        let program = compile_program(
            "Test",
            &[ShaderStageSource {
                stage,
                source: source.to_owned(),
            }],
        )
        .expect("test shader compiles");
        program.modules[0].1.clone()
    }

    fn fragment_module(body: &str) -> Arc<naga::Module> {
        let vs = "#version 450 core\nvoid main() { gl_Position = vec4(0.0); }\n";
        let program = compile_program(
            "Test",
            &[
                ShaderStageSource {
                    stage: ShaderStage::VERTEX,
                    source: vs.to_owned(),
                },
                ShaderStageSource {
                    stage: ShaderStage::FRAGMENT,
                    source: body.to_owned(),
                },
            ],
        )
        .expect("test shader compiles");
        program.module(naga::ShaderStage::Fragment).unwrap().clone()
    }

    fn run_fragment(module: &naga::Module, resources: &mut Resources<'_>) -> Vec<(u32, Value)> {
        let stage = Stage::new(module, naga::ShaderStage::Fragment).unwrap();
        let args = stage
            .arguments()
            .iter()
            .map(|a| zero_value(module, a.ty))
            .collect();
        match stage.run(resources, args).unwrap() {
            Outcome::Returned(Some(value)) => stage
                .split_outputs(value)
                .into_iter()
                .filter_map(|(binding, v)| match *binding {
                    naga::Binding::Location { location, .. } => Some((location, v)),
                    _ => None,
                })
                .collect(),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn color(v: &Value) -> [f32; 4] {
        let f = v.floats().unwrap();
        [f[0], f[1], f[2], f[3]]
    }

    #[test]
    fn constant_outputs_are_returned() {
        let m = fragment_module(
            "#version 450 core\nlayout(location = 0) out vec4 o_Color;\nvoid main() { o_Color = vec4(0.0, 1.0, 0.0, 1.0); }\n",
        );
        let mut resources = Resources::new(&m);
        let outputs = run_fragment(&m, &mut resources);
        assert_eq!(outputs.len(), 1);
        assert_eq!(color(&outputs[0].1), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn loops_and_branches_follow_control_flow() {
        let m = fragment_module(
            r#"#version 450 core
layout(location = 0) out vec4 o_Color;
float halve(float x) { return x * 0.5; }
void main() {
    int n = 0;
    for (int i = 0; i < 10; i++) {
        if (i == 7) { break; }
        if (i % 2 == 0) { continue; }
        n += i;
    }
    // 1 + 3 + 5
    o_Color = vec4(float(n) / 9.0, halve(1.0), clamp(2.0, 0.0, 1.0), 1.0);
}
"#,
        );
        let mut resources = Resources::new(&m);
        let outputs = run_fragment(&m, &mut resources);
        let c = color(&outputs[0].1);
        assert!(approx::abs_diff_eq!(c[0], 1.0, epsilon = 1e-6));
        assert_eq!(c[1], 0.5);
        assert_eq!(c[2], 1.0);
    }

    #[test]
    fn discard_ends_the_invocation() {
        let m = fragment_module(
            "#version 450 core\nlayout(location = 0) out vec4 o_Color;\nvoid main() { o_Color = vec4(1.0); discard; }\n",
        );
        let mut resources = Resources::new(&m);
        let stage = Stage::new(&m, naga::ShaderStage::Fragment).unwrap();
        assert_eq!(stage.run(&mut resources, Vec::new()).unwrap(), Outcome::Discarded);
    }

    #[test]
    fn uniform_blocks_read_from_memory() {
        let m = fragment_module(
            r#"#version 450 core
layout(location = 0) out vec4 o_Color;
layout(std140, binding = 0) uniform Material { vec4 u_Tint; float u_Scale; };
void main() { o_Color = u_Tint * u_Scale; }
"#,
        );
        let (global, _) = m
            .global_variables
            .iter()
            .find(|(_, g)| g.space == AddressSpace::Uniform)
            .unwrap();
        let mut bytes = vec![0u8; 32];
        bytes[..16].copy_from_slice(bytemuck::cast_slice(&[0.25f32, 0.5, 1.0, 1.0]));
        bytes[16..20].copy_from_slice(&2.0f32.to_le_bytes());
        let mut resources = Resources::new(&m);
        resources.bind_memory(global, bytes);
        let outputs = run_fragment(&m, &mut resources);
        assert_eq!(color(&outputs[0].1), [0.5, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn compute_invocations_write_storage_buffers() {
        let m = module(
            ShaderStage::COMPUTE,
            r#"#version 450 core
layout(local_size_x = 4) in;
layout(std430, binding = 0) buffer Values { uint values[]; };
void main() {
    uint i = gl_GlobalInvocationID.x;
    values[i] = i * i;
}
"#,
        );
        let (global, _) = m
            .global_variables
            .iter()
            .find(|(_, g)| matches!(g.space, AddressSpace::Storage { .. }))
            .unwrap();
        let stage = Stage::new(&m, naga::ShaderStage::Compute).unwrap();
        assert_eq!(stage.workgroup_size(), [4, 1, 1]);
        let mut resources = Resources::new(&m);
        resources.bind_memory(global, vec![0; 16]);
        for x in 0..4u32 {
            let args = stage
                .arguments()
                .iter()
                .map(|a| match a.binding {
                    Some(naga::Binding::BuiltIn(naga::BuiltIn::GlobalInvocationId)) => {
                        Value::Vector(vec![Value::U32(x), Value::U32(0), Value::U32(0)])
                    }
                    _ => zero_value(&m, a.ty),
                })
                .collect();
            stage.run(&mut resources, args).unwrap();
        }
        let values: Vec<u32> = bytemuck::pod_collect_to_vec(resources.memory(global).unwrap());
        assert_eq!(values, vec![0, 1, 4, 9]);
    }

    #[test]
    fn runaway_loops_fault() {
        let m = fragment_module(
            r#"#version 450 core
layout(location = 0) out vec4 o_Color;
layout(std140, binding = 0) uniform Params { int u_Stop; };
void main() {
    int i = 0;
    while (u_Stop == 0) { i++; }
    o_Color = vec4(float(i));
}
"#,
        );
        let stage = Stage::new(&m, naga::ShaderStage::Fragment)
            .unwrap()
            .with_step_limit(10_000);
        let mut resources = Resources::new(&m);
        let err = stage.run(&mut resources, Vec::new()).unwrap_err();
        assert!(matches!(err, SoftGpuError::ShaderFault(_)));
    }

    #[test]
    fn memory_reads_past_the_end_are_zero() {
        let m = module(
            ShaderStage::COMPUTE,
            "#version 450 core\nlayout(local_size_x = 1) in;\nlayout(std430, binding = 0) buffer B { vec4 v; };\nvoid main() { v = v + vec4(1.0); }\n",
        );
        let (_, global) = m
            .global_variables
            .iter()
            .find(|(_, g)| matches!(g.space, AddressSpace::Storage { .. }))
            .unwrap();
        let value = load_memory(&m, &[0u8; 4], 0, Layout::Type(global.ty)).unwrap();
        assert_eq!(value, Value::Composite(vec![Value::Vector(vec![Value::F32(0.0); 4])]));
        let mut short = [0u8; 8];
        let four = Value::Composite(vec![floats_value(&[1.0, 2.0, 3.0, 4.0])]);
        store_memory(&m, &mut short, 0, Layout::Type(global.ty), &four).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&short), &[1.0, 2.0]);
    }

    #[test]
    fn matrices_multiply_column_major() {
        // Columns (1, 2) and (3, 4).
        let m = from_columns(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        let v = floats_value(&[1.0, 1.0]);
        assert_eq!(binary(BinaryOperator::Multiply, &m, &v).unwrap(), floats_value(&[4.0, 6.0]));
        assert_eq!(binary(BinaryOperator::Multiply, &v, &m).unwrap(), floats_value(&[3.0, 7.0]));
        assert_eq!(math(MathFunction::Determinant, &[m.clone()]).unwrap(), Value::F32(-2.0));
        let inv = math(MathFunction::Inverse, &[m.clone()]).unwrap();
        let identity = binary(BinaryOperator::Multiply, &m, &inv).unwrap();
        let cols = columns(&identity).unwrap();
        assert!(approx::abs_diff_eq!(cols[0][0], 1.0, epsilon = 1e-5));
        assert!(approx::abs_diff_eq!(cols[1][0], 0.0, epsilon = 1e-5));
    }

    #[test]
    fn integer_division_by_zero_does_not_trap() {
        let div = scalar_binary(BinaryOperator::Divide, &Value::I32(7), &Value::I32(0)).unwrap();
        let rem = scalar_binary(BinaryOperator::Modulo, &Value::U32(7), &Value::U32(0)).unwrap();
        assert_eq!(div, Value::I32(7));
        assert_eq!(rem, Value::U32(0));
    }
}
