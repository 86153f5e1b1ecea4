use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type tag carried by every socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::I8 => "int8",
            Self::U8 => "uint8",
            Self::I16 => "int16",
            Self::U16 => "uint16",
            Self::I32 => "int32",
            Self::U32 => "uint32",
            Self::I64 => "int64",
            Self::U64 => "uint64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Contiguous typed storage behind a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketBuffer {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! for_each_variant {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            SocketBuffer::I8($v) => $body,
            SocketBuffer::U8($v) => $body,
            SocketBuffer::I16($v) => $body,
            SocketBuffer::U16($v) => $body,
            SocketBuffer::I32($v) => $body,
            SocketBuffer::U32($v) => $body,
            SocketBuffer::I64($v) => $body,
            SocketBuffer::U64($v) => $body,
            SocketBuffer::F32($v) => $body,
            SocketBuffer::F64($v) => $body,
        }
    };
}

macro_rules! for_each_pair {
    ($dst:expr, $src:expr, $d:ident, $s:ident => $body:expr, _ => $mismatch:expr) => {
        match ($dst, $src) {
            (SocketBuffer::I8($d), SocketBuffer::I8($s)) => $body,
            (SocketBuffer::U8($d), SocketBuffer::U8($s)) => $body,
            (SocketBuffer::I16($d), SocketBuffer::I16($s)) => $body,
            (SocketBuffer::U16($d), SocketBuffer::U16($s)) => $body,
            (SocketBuffer::I32($d), SocketBuffer::I32($s)) => $body,
            (SocketBuffer::U32($d), SocketBuffer::U32($s)) => $body,
            (SocketBuffer::I64($d), SocketBuffer::I64($s)) => $body,
            (SocketBuffer::U64($d), SocketBuffer::U64($s)) => $body,
            (SocketBuffer::F32($d), SocketBuffer::F32($s)) => $body,
            (SocketBuffer::F64($d), SocketBuffer::F64($s)) => $body,
            _ => $mismatch,
        }
    };
}

impl SocketBuffer {
    /// Zero-initialized buffer of `len` elements
    pub fn zeroed(datatype: DataType, len: usize) -> Self {
        match datatype {
            DataType::I8 => Self::I8(vec![0; len]),
            DataType::U8 => Self::U8(vec![0; len]),
            DataType::I16 => Self::I16(vec![0; len]),
            DataType::U16 => Self::U16(vec![0; len]),
            DataType::I32 => Self::I32(vec![0; len]),
            DataType::U32 => Self::U32(vec![0; len]),
            DataType::I64 => Self::I64(vec![0; len]),
            DataType::U64 => Self::U64(vec![0; len]),
            DataType::F32 => Self::F32(vec![0.0; len]),
            DataType::F64 => Self::F64(vec![0.0; len]),
        }
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Self::I8(_) => DataType::I8,
            Self::U8(_) => DataType::U8,
            Self::I16(_) => DataType::I16,
            Self::U16(_) => DataType::U16,
            Self::I32(_) => DataType::I32,
            Self::U32(_) => DataType::U32,
            Self::I64(_) => DataType::I64,
            Self::U64(_) => DataType::U64,
            Self::F32(_) => DataType::F32,
            Self::F64(_) => DataType::F64,
        }
    }

    pub fn len(&self) -> usize {
        for_each_variant!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow or shrink, keeping the existing prefix intact
    pub fn resize(&mut self, len: usize) {
        for_each_variant!(self, v => v.resize(len, Default::default()))
    }

    /// Copy `len` elements starting at `start` into a new buffer.
    /// Returns `None` when the window is out of range.
    pub fn copy_window(&self, start: usize, len: usize) -> Option<SocketBuffer> {
        let end = start.checked_add(len)?;
        if end > self.len() {
            return None;
        }
        Some(match self {
            Self::I8(v) => Self::I8(v[start..end].to_vec()),
            Self::U8(v) => Self::U8(v[start..end].to_vec()),
            Self::I16(v) => Self::I16(v[start..end].to_vec()),
            Self::U16(v) => Self::U16(v[start..end].to_vec()),
            Self::I32(v) => Self::I32(v[start..end].to_vec()),
            Self::U32(v) => Self::U32(v[start..end].to_vec()),
            Self::I64(v) => Self::I64(v[start..end].to_vec()),
            Self::U64(v) => Self::U64(v[start..end].to_vec()),
            Self::F32(v) => Self::F32(v[start..end].to_vec()),
            Self::F64(v) => Self::F64(v[start..end].to_vec()),
        })
    }

    /// Overwrite the elements starting at `start` with the content of `src`.
    /// Returns false on element type mismatch or out of range window.
    pub fn write_window(&mut self, start: usize, src: &SocketBuffer) -> bool {
        for_each_pair!(self, src, d, s => {
            match start.checked_add(s.len()) {
                Some(end) if end <= d.len() => {
                    d[start..end].copy_from_slice(s);
                    true
                }
                _ => false,
            }
        }, _ => false)
    }
}

/// Rust element types that can back a socket.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const DATATYPE: DataType;

    fn slice(buffer: &SocketBuffer) -> Option<&[Self]>;
    fn slice_mut(buffer: &mut SocketBuffer) -> Option<&mut [Self]>;
    fn into_buffer(data: Vec<Self>) -> SocketBuffer;
    fn from_buffer(buffer: SocketBuffer) -> Result<Vec<Self>, SocketBuffer>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DATATYPE: DataType = DataType::$variant;

            fn slice(buffer: &SocketBuffer) -> Option<&[Self]> {
                match buffer {
                    SocketBuffer::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn slice_mut(buffer: &mut SocketBuffer) -> Option<&mut [Self]> {
                match buffer {
                    SocketBuffer::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn into_buffer(data: Vec<Self>) -> SocketBuffer {
                SocketBuffer::$variant(data)
            }

            fn from_buffer(buffer: SocketBuffer) -> Result<Vec<Self>, SocketBuffer> {
                match buffer {
                    SocketBuffer::$variant(v) => Ok(v),
                    other => Err(other),
                }
            }
        }
    };
}

impl_element!(i8, I8);
impl_element!(u8, U8);
impl_element!(i16, I16);
impl_element!(u16, U16);
impl_element!(i32, I32);
impl_element!(u32, U32);
impl_element!(i64, I64);
impl_element!(u64, U64);
impl_element!(f32, F32);
impl_element!(f64, F64);
