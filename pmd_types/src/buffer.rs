//! Shared, typed slabs exchanged between the frontend and the backends.

use crate::{Attribute, Datatype};
use num_complex::{Complex32, Complex64};
use std::sync::Arc;

/// A reference-counted, homogeneously typed buffer of dataset elements.
///
/// This replaces the usual untyped pointer-plus-tag pair: write tasks hold
/// the user's data through one of these until the flush that commits them,
/// read tasks produce one for the caller to take afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Char(Arc<Vec<i8>>),
    Uchar(Arc<Vec<u8>>),
    Short(Arc<Vec<i16>>),
    Ushort(Arc<Vec<u16>>),
    Int(Arc<Vec<i32>>),
    Uint(Arc<Vec<u32>>),
    Long(Arc<Vec<i64>>),
    Ulong(Arc<Vec<u64>>),
    Float(Arc<Vec<f32>>),
    Double(Arc<Vec<f64>>),
    Cfloat(Arc<Vec<Complex32>>),
    Cdouble(Arc<Vec<Complex64>>),
    Bool(Arc<Vec<bool>>),
}

impl Buffer {
    pub fn dtype(&self) -> Datatype {
        use Buffer::*;
        match self {
            Char(_) => Datatype::Char,
            Uchar(_) => Datatype::Uchar,
            Short(_) => Datatype::Short,
            Ushort(_) => Datatype::Ushort,
            Int(_) => Datatype::Int,
            Uint(_) => Datatype::Uint,
            Long(_) => Datatype::Long,
            Ulong(_) => Datatype::Ulong,
            Float(_) => Datatype::Float,
            Double(_) => Datatype::Double,
            Cfloat(_) => Datatype::Cfloat,
            Cdouble(_) => Datatype::Cdouble,
            Bool(_) => Datatype::Bool,
        }
    }

    pub fn len(&self) -> usize {
        use Buffer::*;
        match self {
            Char(v) => v.len(),
            Uchar(v) => v.len(),
            Short(v) => v.len(),
            Ushort(v) => v.len(),
            Int(v) => v.len(),
            Uint(v) => v.len(),
            Long(v) => v.len(),
            Ulong(v) => v.len(),
            Float(v) => v.len(),
            Double(v) => v.len(),
            Cfloat(v) => v.len(),
            Cdouble(v) => v.len(),
            Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty buffer of the given element type; `None` for tags that have
    /// no slab representation (strings, pseudo-types).
    pub fn empty(dtype: Datatype) -> Option<Self> {
        use Datatype as D;
        let buffer = match dtype.basic() {
            D::Char => Self::Char(Arc::new(Vec::new())),
            D::Uchar => Self::Uchar(Arc::new(Vec::new())),
            D::Short => Self::Short(Arc::new(Vec::new())),
            D::Ushort => Self::Ushort(Arc::new(Vec::new())),
            D::Int => Self::Int(Arc::new(Vec::new())),
            D::Uint => Self::Uint(Arc::new(Vec::new())),
            D::Long | D::Longlong => Self::Long(Arc::new(Vec::new())),
            D::Ulong | D::Ulonglong => Self::Ulong(Arc::new(Vec::new())),
            D::Float => Self::Float(Arc::new(Vec::new())),
            D::Double => Self::Double(Arc::new(Vec::new())),
            D::Cfloat => Self::Cfloat(Arc::new(Vec::new())),
            D::Cdouble => Self::Cdouble(Arc::new(Vec::new())),
            D::Bool => Self::Bool(Arc::new(Vec::new())),
            _ => return None,
        };
        Some(buffer)
    }

    /// A buffer of `n` copies of a constant value. Used to materialize loads
    /// from constant record components without touching any backend.
    pub fn filled(value: &Attribute, n: usize) -> Option<Self> {
        let buffer = match value {
            Attribute::Char(v) => Self::Char(Arc::new(vec![*v; n])),
            Attribute::Uchar(v) => Self::Uchar(Arc::new(vec![*v; n])),
            Attribute::Short(v) => Self::Short(Arc::new(vec![*v; n])),
            Attribute::Ushort(v) => Self::Ushort(Arc::new(vec![*v; n])),
            Attribute::Int(v) => Self::Int(Arc::new(vec![*v; n])),
            Attribute::Uint(v) => Self::Uint(Arc::new(vec![*v; n])),
            Attribute::Long(v) | Attribute::Longlong(v) => Self::Long(Arc::new(vec![*v; n])),
            Attribute::Ulong(v) | Attribute::Ulonglong(v) => Self::Ulong(Arc::new(vec![*v; n])),
            Attribute::Float(v) => Self::Float(Arc::new(vec![*v; n])),
            Attribute::Double(v) => Self::Double(Arc::new(vec![*v; n])),
            Attribute::Cfloat(v) => Self::Cfloat(Arc::new(vec![*v; n])),
            Attribute::Cdouble(v) => Self::Cdouble(Arc::new(vec![*v; n])),
            Attribute::Bool(v) => Self::Bool(Arc::new(vec![*v; n])),
            _ => return None,
        };
        Some(buffer)
    }
}

/// Element types that can live in datasets.
///
/// Connects a Rust scalar to its [`Datatype`] tag and its [`Buffer`]
/// variant, so that the typed frontend calls (`store_chunk::<T>` and
/// friends) dispatch without unsafe casts.
pub trait PmdScalar: Sized + Clone + Send + Sync + 'static {
    const DATATYPE: Datatype;

    fn into_buffer(data: Vec<Self>) -> Buffer;

    fn slice_of(buffer: &Buffer) -> Option<&[Self]>;

    fn to_attribute(self) -> Attribute;

    fn from_attribute(attribute: &Attribute) -> Option<Self>;
}

macro_rules! pmd_scalar {
    ($($ty:ty => ($tag:ident, $variant:ident)),* $(,)?) => {
        $(
            impl PmdScalar for $ty {
                const DATATYPE: Datatype = Datatype::$tag;

                fn into_buffer(data: Vec<Self>) -> Buffer {
                    Buffer::$variant(Arc::new(data))
                }

                fn slice_of(buffer: &Buffer) -> Option<&[Self]> {
                    match buffer {
                        Buffer::$variant(v) => Some(v.as_slice()),
                        _ => None,
                    }
                }

                fn to_attribute(self) -> Attribute {
                    Attribute::$variant(self)
                }

                fn from_attribute(attribute: &Attribute) -> Option<Self> {
                    match attribute {
                        Attribute::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

pmd_scalar! {
    i8 => (Char, Char),
    u8 => (Uchar, Uchar),
    i16 => (Short, Short),
    u16 => (Ushort, Ushort),
    i32 => (Int, Int),
    u32 => (Uint, Uint),
    i64 => (Long, Long),
    u64 => (Ulong, Ulong),
    f32 => (Float, Float),
    f64 => (Double, Double),
    Complex32 => (Cfloat, Cfloat),
    Complex64 => (Cdouble, Cdouble),
    bool => (Bool, Bool),
}
