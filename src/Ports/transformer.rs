// Send-side adaptation of a message to the receiving port's contract.

use crate::error::{MessagingError, Result};
use crate::Structs::{DType, Metadata};

/// One step of a virtual port's adaptation
#[derive(Clone, Debug, PartialEq)]
pub enum TransformOp {
    /// Same elements under a new row-major shape
    Reshape(Vec<usize>),
    /// Permute axes; `axes[i]` is the source axis of output axis `i`
    Transpose(Vec<usize>),
    /// Convert every element to another type
    Cast(DType),
}

/// Message-to-message adaptation applied before a message enters a channel
pub trait AbstractTransformer {
    fn transform(&self, message: Metadata) -> Result<Metadata>;
}

/// Passes messages through untouched
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityTransformer;

impl AbstractTransformer for IdentityTransformer {
    fn transform(&self, message: Metadata) -> Result<Metadata> {
        Ok(message)
    }
}

/// Applies a fixed list of [`TransformOp`]s in order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualPortTransformer {
    ops: Vec<TransformOp>,
}

impl VirtualPortTransformer {
    pub fn new(ops: Vec<TransformOp>) -> Self {
        Self { ops }
    }

    pub fn reshape(shape: &[usize]) -> Self {
        Self::new(vec![TransformOp::Reshape(shape.to_vec())])
    }

    /// The configured adaptation, without running it
    pub fn get_transform(&self) -> &[TransformOp] {
        &self.ops
    }
}

impl AbstractTransformer for VirtualPortTransformer {
    fn transform(&self, message: Metadata) -> Result<Metadata> {
        self.ops.iter().try_fold(message, |msg, op| match op {
            TransformOp::Reshape(shape) => reshape(msg, shape),
            TransformOp::Transpose(axes) => transpose(msg, axes),
            TransformOp::Cast(dtype) => cast(msg, *dtype),
        })
    }
}

/// The transformer set ports accept
#[derive(Clone, Debug, PartialEq)]
pub enum Transformer {
    Identity(IdentityTransformer),
    VirtualPort(VirtualPortTransformer),
}

impl Default for Transformer {
    fn default() -> Self {
        Transformer::Identity(IdentityTransformer)
    }
}

impl From<VirtualPortTransformer> for Transformer {
    fn from(t: VirtualPortTransformer) -> Self {
        Transformer::VirtualPort(t)
    }
}

impl Transformer {
    pub fn is_identity(&self) -> bool {
        matches!(self, Transformer::Identity(_))
    }

    /// Configured ops; empty for the identity
    pub fn get_transform(&self) -> &[TransformOp] {
        match self {
            Transformer::Identity(_) => &[],
            Transformer::VirtualPort(t) => t.get_transform(),
        }
    }
}

impl AbstractTransformer for Transformer {
    fn transform(&self, message: Metadata) -> Result<Metadata> {
        match self {
            Transformer::Identity(t) => t.transform(message),
            Transformer::VirtualPort(t) => t.transform(message),
        }
    }
}

fn reshape(msg: Metadata, shape: &[usize]) -> Result<Metadata> {
    let wanted: usize = shape.iter().product();
    if wanted != msg.total_size() {
        return Err(MessagingError::transform(format!(
            "cannot reshape {:?} ({} elements) to {:?} ({} elements)",
            msg.shape(),
            msg.total_size(),
            shape,
            wanted
        )));
    }
    msg.with_shape(shape)
        .map_err(|e| MessagingError::transform(e.to_string()))
}

fn transpose(msg: Metadata, axes: &[usize]) -> Result<Metadata> {
    let shape = msg.shape();
    let nd = shape.len();
    let mut seen = vec![false; nd];
    let valid = axes.len() == nd
        && axes.iter().all(|&a| a < nd && !std::mem::replace(&mut seen[a], true));
    if !valid {
        return Err(MessagingError::transform(format!(
            "{:?} is not a permutation of {} axes",
            axes, nd
        )));
    }

    let out_shape: Vec<usize> = axes.iter().map(|&a| shape[a]).collect();
    let src_strides = msg.strides();
    let elsize = msg.dtype().elsize();
    let src = msg.payload();
    let mut out = Vec::with_capacity(src.len());
    let mut index = vec![0usize; nd];
    for _ in 0..msg.total_size() {
        let element: usize = (0..nd).map(|i| index[i] * src_strides[axes[i]]).sum();
        let offset = element * elsize;
        out.extend_from_slice(&src[offset..offset + elsize]);
        for axis in (0..nd).rev() {
            index[axis] += 1;
            if index[axis] < out_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Metadata::new(msg.dtype(), &out_shape, out)
}

#[derive(Copy, Clone)]
enum Value {
    Int(i64),
    Float(f64),
}

fn read_values(msg: &Metadata) -> Result<Vec<Value>> {
    Ok(match msg.dtype() {
        DType::Int8 => msg.to_vec::<i8>()?.into_iter().map(|v| Value::Int(v.into())).collect(),
        DType::Int16 => msg.to_vec::<i16>()?.into_iter().map(|v| Value::Int(v.into())).collect(),
        DType::Int32 => msg.to_vec::<i32>()?.into_iter().map(|v| Value::Int(v.into())).collect(),
        DType::Int64 => msg.to_vec::<i64>()?.into_iter().map(Value::Int).collect(),
        DType::Float32 => msg
            .to_vec::<f32>()?
            .into_iter()
            .map(|v| Value::Float(v.into()))
            .collect(),
        DType::Float64 => msg.to_vec::<f64>()?.into_iter().map(Value::Float).collect(),
    })
}

macro_rules! narrow_int {
    ($v:expr, $ty:ty, $out:expr) => {{
        let narrowed = <$ty>::try_from($v).map_err(|_| {
            MessagingError::transform(format!("{} does not fit in {}", $v, stringify!($ty)))
        })?;
        $out.extend_from_slice(&narrowed.to_le_bytes());
    }};
}

fn cast(msg: Metadata, to: DType) -> Result<Metadata> {
    let from = msg.dtype();
    if from == to {
        return Ok(msg);
    }
    let unsupported = || {
        MessagingError::transform(format!("unsupported cast from {:?} to {:?}", from, to))
    };
    if from.is_float() && !to.is_float() {
        return Err(unsupported());
    }
    let mut out = Vec::with_capacity(msg.total_size() * to.elsize());
    for value in read_values(&msg)? {
        match (value, to) {
            (Value::Int(v), DType::Int8) => narrow_int!(v, i8, out),
            (Value::Int(v), DType::Int16) => narrow_int!(v, i16, out),
            (Value::Int(v), DType::Int32) => narrow_int!(v, i32, out),
            (Value::Int(v), DType::Int64) => out.extend_from_slice(&v.to_le_bytes()),
            (Value::Int(v), DType::Float32) => out.extend_from_slice(&(v as f32).to_le_bytes()),
            (Value::Int(v), DType::Float64) => out.extend_from_slice(&(v as f64).to_le_bytes()),
            (Value::Float(v), DType::Float32) => {
                out.extend_from_slice(&(v as f32).to_le_bytes())
            }
            (Value::Float(v), DType::Float64) => out.extend_from_slice(&v.to_le_bytes()),
            (Value::Float(_), _) => return Err(unsupported()),
        }
    }
    Metadata::new(to, &msg.shape(), out)
}
