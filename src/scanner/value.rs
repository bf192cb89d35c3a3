use crate::error::{Error, Result};

/// Scalar (or pseudo-scalar, for AOB/String) type a scan operates on.
///
/// `Byte` decodes as signed `i8` to match the grounding tool's scan semantics
/// (`int8_t`), not `u8` — an exact-value scan of `"-5"` must behave as issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Byte,
    I16,
    I32,
    I64,
    F32,
    F64,
    Aob,
    String,
}

impl ValueType {
    pub fn default_alignment(self) -> usize {
        match self {
            ValueType::Byte => 1,
            ValueType::I16 => 2,
            ValueType::I32 => 4,
            ValueType::I64 => 8,
            ValueType::F32 => 4,
            ValueType::F64 => 8,
            ValueType::Aob | ValueType::String => 1,
        }
    }

    pub fn size(self) -> usize {
        self.default_alignment()
    }

    pub fn is_scalar(self) -> bool {
        !matches!(self, ValueType::Aob | ValueType::String)
    }
}

/// Packs `value`'s little-endian bytes into a zeroed 64-bit buffer, mirroring the
/// `memcpy`-into-`uint64_t` representation `ScanResult::raw` uses for every scalar
/// type so delta predicates can compare regardless of width.
pub fn pack_raw<T: Scalar>(value: T) -> u64 {
    let mut buf = [0u8; 8];
    let bytes = value.to_le_bytes_vec();
    buf[..bytes.len()].copy_from_slice(&bytes);
    u64::from_le_bytes(buf)
}

pub trait Scalar: Copy + PartialOrd {
    fn to_le_bytes_vec(self) -> Vec<u8>;
    fn from_le_bytes_slice(bytes: &[u8]) -> Self;
    fn from_raw(raw: u64) -> Self;
    fn parse(s: &str) -> Result<Self>;
    const SIZE: usize;
}

macro_rules! impl_scalar_int {
    ($t:ty) => {
        impl Scalar for $t {
            fn to_le_bytes_vec(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
            fn from_le_bytes_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(buf)
            }
            fn from_raw(raw: u64) -> Self {
                <$t>::from_le_bytes_slice(&raw.to_le_bytes())
            }
            fn parse(s: &str) -> Result<Self> {
                let s = s.trim();
                let (s, radix) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    (rest, 16)
                } else {
                    (s, 10)
                };
                if radix == 16 {
                    <$t>::from_str_radix(s, 16).map_err(|e| Error::ParseFailed {
                        what: "scan value",
                        detail: e.to_string(),
                    })
                } else {
                    s.parse::<$t>().map_err(|e| Error::ParseFailed {
                        what: "scan value",
                        detail: e.to_string(),
                    })
                }
            }
            const SIZE: usize = std::mem::size_of::<$t>();
        }
    };
}

impl_scalar_int!(i8);
impl_scalar_int!(i16);
impl_scalar_int!(i32);
impl_scalar_int!(i64);

macro_rules! impl_scalar_float {
    ($t:ty) => {
        impl Scalar for $t {
            fn to_le_bytes_vec(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
            fn from_le_bytes_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(buf)
            }
            fn from_raw(raw: u64) -> Self {
                <$t>::from_le_bytes_slice(&raw.to_le_bytes())
            }
            fn parse(s: &str) -> Result<Self> {
                s.trim().parse::<$t>().map_err(|e| Error::ParseFailed {
                    what: "scan value",
                    detail: e.to_string(),
                })
            }
            const SIZE: usize = std::mem::size_of::<$t>();
        }
    };
}

impl_scalar_float!(f32);
impl_scalar_float!(f64);
