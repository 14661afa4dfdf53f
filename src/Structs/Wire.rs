// Metadata record: the fixed header that precedes every array payload,
// both inside shared-memory slots and in DDS samples.

use crate::error::{MessagingError, Result};
use crate::Structs::Arrays::{Array, Element};

/// Maximum number of dimensions a message can describe
pub const MAX_DIMS: usize = 5;

/// Size in bytes of the encoded header
pub const METADATA_HEADER_SIZE: usize = std::mem::size_of::<MetadataHeader>();

/// Element type tag. Codes match numpy type numbers so actors written
/// against numpy can share a segment.
#[repr(i64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Int8 = 1,
    Int16 = 3,
    Int32 = 5,
    Int64 = 7,
    Float32 = 11,
    Float64 = 12,
}

impl DType {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Int8),
            3 => Some(Self::Int16),
            5 => Some(Self::Int32),
            7 => Some(Self::Int64),
            11 => Some(Self::Float32),
            12 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Element size in bytes
    pub fn elsize(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// ABI-stable header; all fields are little-endian i64 on the wire.
/// `dims` and `strides` count elements, not bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataHeader {
    pub nd: i64,
    pub dtype: i64,
    pub elsize: i64,
    pub total_size: i64,
    pub dims: [i64; MAX_DIMS],
    pub strides: [i64; MAX_DIMS],
}

impl MetadataHeader {
    /// Build a row-major header for `shape`
    pub fn new(dtype: DType, shape: &[usize]) -> Result<Self> {
        if shape.len() > MAX_DIMS {
            return Err(MessagingError::invalid_metadata(format!(
                "{} dimensions exceed the maximum of {}",
                shape.len(),
                MAX_DIMS
            )));
        }
        let too_large = || MessagingError::invalid_metadata(format!("shape {:?} too large", shape));
        let dims = shape
            .iter()
            .map(|&d| i64::try_from(d).ok())
            .collect::<Option<Vec<i64>>>()
            .ok_or_else(too_large)?;
        let total_size = checked_product(&dims).ok_or_else(too_large)?;
        let mut header = Self {
            nd: dims.len() as i64,
            dtype: dtype.code(),
            elsize: dtype.elsize() as i64,
            total_size,
            ..Default::default()
        };
        let mut stride = 1i64;
        for axis in (0..dims.len()).rev() {
            header.dims[axis] = dims[axis];
            header.strides[axis] = stride;
            // a zero dim keeps total_size small while a suffix overflows
            stride = stride.saturating_mul(dims[axis]);
        }
        header.nbytes().ok_or_else(too_large)?;
        Ok(header)
    }

    pub fn dtype(&self) -> Result<DType> {
        DType::from_code(self.dtype).ok_or_else(|| {
            MessagingError::invalid_metadata(format!("unknown dtype code {}", self.dtype))
        })
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dims[..self.nd.clamp(0, MAX_DIMS as i64) as usize]
            .iter()
            .map(|&d| d as usize)
            .collect()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.strides[..self.nd.clamp(0, MAX_DIMS as i64) as usize]
            .iter()
            .map(|&s| s as usize)
            .collect()
    }

    /// Payload length in bytes, `None` if the header describes more than
    /// fits in memory
    pub fn nbytes(&self) -> Option<usize> {
        let elsize = usize::try_from(self.elsize).ok()?;
        let total = usize::try_from(self.total_size).ok()?;
        elsize.checked_mul(total).filter(|&n| n <= isize::MAX as usize)
    }

    fn validate(&self) -> Result<()> {
        if !(0..=MAX_DIMS as i64).contains(&self.nd) {
            return Err(MessagingError::invalid_metadata(format!("nd {} out of range", self.nd)));
        }
        let dtype = self.dtype()?;
        if self.elsize != dtype.elsize() as i64 {
            return Err(MessagingError::invalid_metadata(format!(
                "elsize {} does not match {:?}",
                self.elsize, dtype
            )));
        }
        let dims = &self.dims[..self.nd as usize];
        if checked_product(dims) != Some(self.total_size) {
            return Err(MessagingError::invalid_metadata(format!(
                "dims {:?} do not multiply to total_size {}",
                dims, self.total_size
            )));
        }
        if self.nbytes().is_none() {
            return Err(MessagingError::invalid_metadata(format!(
                "{} elements of {} bytes overflow",
                self.total_size, self.elsize
            )));
        }
        Ok(())
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        for field in [self.nd, self.dtype, self.elsize, self.total_size] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        for d in self.dims.iter().chain(self.strides.iter()) {
            out.extend_from_slice(&d.to_le_bytes());
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut words = bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
        let mut next = || words.next().unwrap_or_default();
        let mut header = Self {
            nd: next(),
            dtype: next(),
            elsize: next(),
            total_size: next(),
            ..Default::default()
        };
        for d in header.dims.iter_mut() {
            *d = next();
        }
        for s in header.strides.iter_mut() {
            *s = next();
        }
        header
    }
}

/// Product of non-negative dims, `None` on a negative dim or overflow
fn checked_product(dims: &[i64]) -> Option<i64> {
    dims.iter()
        .try_fold(1i64, |acc, &d| if d < 0 { None } else { acc.checked_mul(d) })
}

/// One array message: header plus the owned payload it describes.
///
/// Ownership moves sender → channel → receiver; the channel copies the
/// bytes into its slot, so the sender can reuse its buffer once `send`
/// returns `Ok(true)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    header: MetadataHeader,
    data: Vec<u8>,
}

impl Metadata {
    /// Wrap raw little-endian payload bytes
    pub fn new(dtype: DType, shape: &[usize], data: Vec<u8>) -> Result<Self> {
        let header = MetadataHeader::new(dtype, shape)?;
        let expected = header.nbytes().unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(MessagingError::invalid_metadata(format!(
                "payload is {} bytes, header describes {}",
                data.len(),
                expected
            )));
        }
        Ok(Self { header, data })
    }

    pub fn from_array<T: Element>(array: &Array<T>) -> Result<Self> {
        Self::from_slice(array.shape(), array.data())
    }

    pub fn from_slice<T: Element>(shape: &[usize], values: &[T]) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * T::DTYPE.elsize());
        for v in values {
            v.write_le(&mut data);
        }
        Self::new(T::DTYPE, shape, data)
    }

    /// Single-element message of shape [1]
    pub fn scalar<T: Element>(value: T) -> Result<Self> {
        Self::from_slice(&[1], &[value])
    }

    pub fn header(&self) -> &MetadataHeader {
        &self.header
    }

    pub fn dtype(&self) -> DType {
        // validated on every construction path
        DType::from_code(self.header.dtype).unwrap_or(DType::Int8)
    }

    pub fn shape(&self) -> Vec<usize> {
        self.header.shape()
    }

    pub fn strides(&self) -> Vec<usize> {
        self.header.strides()
    }

    pub fn total_size(&self) -> usize {
        self.header.total_size as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.data
    }

    /// Decode the payload as `T`, failing if the tag differs
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if self.dtype() != T::DTYPE {
            return Err(MessagingError::invalid_metadata(format!(
                "message holds {:?}, requested {:?}",
                self.dtype(),
                T::DTYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(T::DTYPE.elsize())
            .map(T::read_le)
            .collect())
    }

    pub fn to_array<T: Element>(&self) -> Result<Array<T>> {
        Array::new(self.shape(), self.to_vec()?)
    }

    /// Same payload under a different row-major shape
    pub(crate) fn with_shape(self, shape: &[usize]) -> Result<Self> {
        let header = MetadataHeader::new(self.dtype(), shape)?;
        if header.total_size != self.header.total_size {
            return Err(MessagingError::invalid_metadata(format!(
                "cannot view {} elements as {:?}",
                self.header.total_size, shape
            )));
        }
        Ok(Self {
            header,
            data: self.data,
        })
    }

    /// Encoded length on the wire
    pub fn encoded_len(&self) -> usize {
        METADATA_HEADER_SIZE + self.data.len()
    }

    /// Header followed by payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.header.encode_into(&mut out);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < METADATA_HEADER_SIZE {
            return Err(MessagingError::invalid_metadata(format!(
                "{} bytes is shorter than the {} byte header",
                bytes.len(),
                METADATA_HEADER_SIZE
            )));
        }
        let header = MetadataHeader::decode(&bytes[..METADATA_HEADER_SIZE]);
        header.validate()?;
        let payload = &bytes[METADATA_HEADER_SIZE..];
        let expected = header.nbytes().unwrap_or(usize::MAX);
        if payload.len() != expected {
            return Err(MessagingError::invalid_metadata(format!(
                "payload is {} bytes, header describes {}",
                payload.len(),
                expected
            )));
        }
        Ok(Self {
            header,
            data: payload.to_vec(),
        })
    }
}
