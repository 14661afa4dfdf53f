// Port payloads and their mapping onto wire messages.
//
// Dense vector:  one message of the port shape
// Sparse vector: indices (Int64, [nnz]) then values (T, [nnz])
// Dense scalar:  one message of shape [1]
// Sparse scalar: index (Int64, [1]) then value (T, [1])
//
// Two-message payloads always travel as one batch.

use crate::error::{MessagingError, Result};
use crate::Structs::{Array, DType, Element, Metadata, SparseArray};
use crate::Transport::PortInitializer;

/// Shape/sparsity class of a port
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortKind {
    VectorDense,
    VectorSparse,
    ScalarDense,
    ScalarSparse,
}

impl PortKind {
    pub fn is_sparse(self) -> bool {
        matches!(self, PortKind::VectorSparse | PortKind::ScalarSparse)
    }

    pub fn is_scalar(self) -> bool {
        matches!(self, PortKind::ScalarDense | PortKind::ScalarSparse)
    }

    /// Wire messages per payload
    pub fn message_count(self) -> usize {
        if self.is_sparse() {
            2
        } else {
            1
        }
    }
}

/// One value sent or received through a port
#[derive(Clone, Debug, PartialEq)]
pub enum PortData<T> {
    Dense(Array<T>),
    Sparse(SparseArray<T>),
    Scalar(T),
    SparseScalar { index: i64, value: T },
}

impl<T: Element> PortData<T> {
    pub fn kind(&self) -> PortKind {
        match self {
            PortData::Dense(_) => PortKind::VectorDense,
            PortData::Sparse(_) => PortKind::VectorSparse,
            PortData::Scalar(_) => PortKind::ScalarDense,
            PortData::SparseScalar { .. } => PortKind::ScalarSparse,
        }
    }

    /// Zero value for a port of `kind` and `shape`
    pub fn zeros(kind: PortKind, shape: &[usize]) -> Self {
        match kind {
            PortKind::VectorDense => PortData::Dense(Array::zeros(shape)),
            PortKind::VectorSparse => PortData::Sparse(SparseArray::empty(shape.iter().product())),
            PortKind::ScalarDense => PortData::Scalar(T::default()),
            PortKind::ScalarSparse => PortData::SparseScalar {
                index: 0,
                value: T::default(),
            },
        }
    }

    /// Dense view of the payload
    pub fn to_dense(&self) -> Array<T> {
        match self {
            PortData::Dense(a) => a.clone(),
            PortData::Sparse(s) => s.to_dense(),
            PortData::Scalar(v) => Array::from_vec(vec![*v]),
            PortData::SparseScalar { value, .. } => Array::from_vec(vec![*value]),
        }
    }

    /// Fails with ShapeMismatch unless this payload fits `port`
    pub(crate) fn check(&self, port: &PortInitializer, kind: PortKind) -> Result<()> {
        if self.kind() != kind {
            return Err(MessagingError::shape_mismatch(&port.name, kind, self.kind()));
        }
        match self {
            PortData::Dense(a) if a.shape() != port.shape.as_slice() => Err(
                MessagingError::shape_mismatch(&port.name, &port.shape, a.shape()),
            ),
            PortData::Sparse(s) if s.dense_len() != port.elements() => {
                Err(MessagingError::shape_mismatch(
                    &port.name,
                    &port.shape,
                    [s.dense_len()],
                ))
            }
            _ => Ok(()),
        }
    }

    /// Split into the optional index message and the value message
    pub(crate) fn to_messages(&self) -> Result<(Option<Metadata>, Metadata)> {
        Ok(match self {
            PortData::Dense(a) => (None, Metadata::from_array(a)?),
            PortData::Sparse(s) => (
                Some(Metadata::from_slice(&[s.nnz()], s.indices())?),
                Metadata::from_slice(&[s.nnz()], s.values())?,
            ),
            PortData::Scalar(v) => (None, Metadata::scalar(*v)?),
            PortData::SparseScalar { index, value } => {
                (Some(Metadata::scalar(*index)?), Metadata::scalar(*value)?)
            }
        })
    }

    /// Rebuild a payload from the messages of one batch
    pub(crate) fn from_messages(
        kind: PortKind,
        port: &PortInitializer,
        messages: &[Metadata],
    ) -> Result<Self> {
        if messages.len() != kind.message_count() {
            return Err(MessagingError::invalid_metadata(format!(
                "{:?} payload needs {} messages, got {}",
                kind,
                kind.message_count(),
                messages.len()
            )));
        }
        let data = match kind {
            PortKind::VectorDense => PortData::Dense(messages[0].to_array()?),
            PortKind::VectorSparse => PortData::Sparse(SparseArray::new(
                port.elements(),
                messages[0].to_vec::<i64>()?,
                messages[1].to_vec::<T>()?,
            )?),
            PortKind::ScalarDense => PortData::Scalar(single(&messages[0])?),
            PortKind::ScalarSparse => PortData::SparseScalar {
                index: single(&messages[0])?,
                value: single(&messages[1])?,
            },
        };
        data.check(port, kind)?;
        Ok(data)
    }
}

fn single<E: Element>(message: &Metadata) -> Result<E> {
    message
        .to_vec::<E>()?
        .first()
        .copied()
        .ok_or_else(|| MessagingError::invalid_metadata("empty scalar message"))
}

/// Fails with TransformError unless `message` conforms to the channel's
/// declared dtype and shape. Untyped channels accept anything.
pub(crate) fn check_conformant(
    kind: PortKind,
    message: &Metadata,
    dtype: Option<DType>,
    shape: Option<&[usize]>,
) -> Result<()> {
    if let Some(dtype) = dtype {
        if message.dtype() != dtype {
            return Err(MessagingError::transform(format!(
                "channel carries {:?}, transformed message is {:?}",
                dtype,
                message.dtype()
            )));
        }
    }
    if let Some(shape) = shape {
        let fits = match kind {
            PortKind::VectorDense => message.shape() == shape,
            // sparse values never outnumber the dense slots
            _ => message.total_size() <= shape.iter().product::<usize>(),
        };
        if !fits {
            return Err(MessagingError::transform(format!(
                "channel carries shape {:?}, transformed message is {:?}",
                shape,
                message.shape()
            )));
        }
    }
    Ok(())
}
