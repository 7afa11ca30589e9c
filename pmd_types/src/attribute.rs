//! Dynamically typed attribute values.

use crate::Datatype;
use num_complex::{Complex32, Complex64};
use tracing::warn;

/// The 7-tuple of base-unit exponents (L, M, T, I, θ, N, J).
pub type UnitDimension = [f64; 7];

/// A self-describing value: a tagged union over every [`Datatype`] variant,
/// carrying its payload by value.
///
/// Attributes are cheap to copy and compare. The reflective `Dtype` variant
/// stores a datatype tag as a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Char(i8),
    Uchar(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Longlong(i64),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Ulonglong(u64),
    Float(f32),
    Double(f64),
    Cfloat(Complex32),
    Cdouble(Complex64),
    String(String),
    VecChar(Vec<i8>),
    VecShort(Vec<i16>),
    VecInt(Vec<i32>),
    VecLong(Vec<i64>),
    VecLonglong(Vec<i64>),
    VecUchar(Vec<u8>),
    VecUshort(Vec<u16>),
    VecUint(Vec<u32>),
    VecUlong(Vec<u64>),
    VecUlonglong(Vec<u64>),
    VecFloat(Vec<f32>),
    VecDouble(Vec<f64>),
    VecCfloat(Vec<Complex32>),
    VecCdouble(Vec<Complex64>),
    VecString(Vec<String>),
    ArrDbl7(UnitDimension),
    Bool(bool),
    Dtype(Datatype),
}

impl Attribute {
    /// The tag describing this value.
    pub fn dtype(&self) -> Datatype {
        use Attribute::*;
        match self {
            Char(_) => Datatype::Char,
            Uchar(_) => Datatype::Uchar,
            Short(_) => Datatype::Short,
            Int(_) => Datatype::Int,
            Long(_) => Datatype::Long,
            Longlong(_) => Datatype::Longlong,
            Ushort(_) => Datatype::Ushort,
            Uint(_) => Datatype::Uint,
            Ulong(_) => Datatype::Ulong,
            Ulonglong(_) => Datatype::Ulonglong,
            Float(_) => Datatype::Float,
            Double(_) => Datatype::Double,
            Cfloat(_) => Datatype::Cfloat,
            Cdouble(_) => Datatype::Cdouble,
            String(_) => Datatype::String,
            VecChar(_) => Datatype::VecChar,
            VecShort(_) => Datatype::VecShort,
            VecInt(_) => Datatype::VecInt,
            VecLong(_) => Datatype::VecLong,
            VecLonglong(_) => Datatype::VecLonglong,
            VecUchar(_) => Datatype::VecUchar,
            VecUshort(_) => Datatype::VecUshort,
            VecUint(_) => Datatype::VecUint,
            VecUlong(_) => Datatype::VecUlong,
            VecUlonglong(_) => Datatype::VecUlonglong,
            VecFloat(_) => Datatype::VecFloat,
            VecDouble(_) => Datatype::VecDouble,
            VecCfloat(_) => Datatype::VecCfloat,
            VecCdouble(_) => Datatype::VecCdouble,
            VecString(_) => Datatype::VecString,
            ArrDbl7(_) => Datatype::ArrDbl7,
            Bool(_) => Datatype::Bool,
            Dtype(_) => Datatype::Datatype,
        }
    }

    /// Read the value as `f64`, casting across numeric variants.
    ///
    /// A cast from a differently classed type logs a warning, since it may
    /// lose precision.
    pub fn as_f64(&self) -> Option<f64> {
        use Attribute::*;
        match self {
            Double(v) => Some(*v),
            Float(v) => Some(f64::from(*v)),
            other => {
                let v = match other {
                    Char(v) => f64::from(*v),
                    Uchar(v) => f64::from(*v),
                    Short(v) => f64::from(*v),
                    Ushort(v) => f64::from(*v),
                    Int(v) => f64::from(*v),
                    Uint(v) => f64::from(*v),
                    Long(v) | Longlong(v) => *v as f64,
                    Ulong(v) | Ulonglong(v) => *v as f64,
                    _ => return None,
                };
                warn!(
                    stored = %other.dtype(),
                    "attribute read as DOUBLE, casting with possible loss of precision"
                );
                Some(v)
            }
        }
    }

    /// Read the value as `u64`, accepting any unsigned integer variant.
    pub fn as_u64(&self) -> Option<u64> {
        use Attribute::*;
        match self {
            Uchar(v) => Some(u64::from(*v)),
            Ushort(v) => Some(u64::from(*v)),
            Uint(v) => Some(u64::from(*v)),
            Ulong(v) | Ulonglong(v) => Some(*v),
            _ => None,
        }
    }

    /// Read the value as `i64`, accepting any signed integer variant.
    pub fn as_i64(&self) -> Option<i64> {
        use Attribute::*;
        match self {
            Char(v) => Some(i64::from(*v)),
            Short(v) => Some(i64::from(*v)),
            Int(v) => Some(i64::from(*v)),
            Long(v) | Longlong(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datatype(&self) -> Option<Datatype> {
        match self {
            Self::Dtype(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Read the value as a sequence of `u64`, accepting unsigned integer
    /// vectors as well as a single unsigned scalar (a rank-1 shape).
    pub fn as_vec_u64(&self) -> Option<Vec<u64>> {
        use Attribute::*;
        match self {
            VecUchar(v) => Some(v.iter().map(|e| u64::from(*e)).collect()),
            VecUshort(v) => Some(v.iter().map(|e| u64::from(*e)).collect()),
            VecUint(v) => Some(v.iter().map(|e| u64::from(*e)).collect()),
            VecUlong(v) | VecUlonglong(v) => Some(v.clone()),
            _ => self.as_u64().map(|scalar| vec![scalar]),
        }
    }

    /// Read the value as a sequence of `f64`, casting element-wise.
    pub fn as_vec_f64(&self) -> Option<Vec<f64>> {
        use Attribute::*;
        match self {
            VecFloat(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecDouble(v) => Some(v.clone()),
            ArrDbl7(v) => Some(v.to_vec()),
            VecChar(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecShort(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecInt(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecLong(v) | VecLonglong(v) => Some(v.iter().map(|e| *e as f64).collect()),
            VecUchar(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecUshort(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecUint(v) => Some(v.iter().map(|e| f64::from(*e)).collect()),
            VecUlong(v) | VecUlonglong(v) => Some(v.iter().map(|e| *e as f64).collect()),
            _ => None,
        }
    }

    pub fn as_unit_dimension(&self) -> Option<UnitDimension> {
        match self {
            Self::ArrDbl7(v) => Some(*v),
            Self::VecDouble(v) if v.len() == 7 => {
                let mut arr = [0.0; 7];
                arr.copy_from_slice(v);
                Some(arr)
            }
            _ => None,
        }
    }

    pub fn as_vec_string(&self) -> Option<Vec<String>> {
        match self {
            Self::VecString(v) => Some(v.clone()),
            Self::String(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }
}

macro_rules! attribute_from {
    ($($from:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$from> for Attribute {
                fn from(v: $from) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

attribute_from! {
    i8 => Char,
    u8 => Uchar,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    u16 => Ushort,
    u32 => Uint,
    u64 => Ulong,
    f32 => Float,
    f64 => Double,
    Complex32 => Cfloat,
    Complex64 => Cdouble,
    bool => Bool,
    String => String,
    Vec<i8> => VecChar,
    Vec<i16> => VecShort,
    Vec<i32> => VecInt,
    Vec<i64> => VecLong,
    Vec<u8> => VecUchar,
    Vec<u16> => VecUshort,
    Vec<u32> => VecUint,
    Vec<u64> => VecUlong,
    Vec<f32> => VecFloat,
    Vec<f64> => VecDouble,
    Vec<Complex32> => VecCfloat,
    Vec<Complex64> => VecCdouble,
    Vec<String> => VecString,
    UnitDimension => ArrDbl7,
    Datatype => Dtype,
}

impl From<&str> for Attribute {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_variant() {
        assert_eq!(Attribute::from(1.5f64).dtype(), Datatype::Double);
        assert_eq!(Attribute::from("abc").dtype(), Datatype::String);
        assert_eq!(
            Attribute::from(vec![1u64, 2, 3]).dtype(),
            Datatype::VecUlong
        );
        assert_eq!(Attribute::from([0.0f64; 7]).dtype(), Datatype::ArrDbl7);
    }

    #[test]
    fn numeric_casts() {
        assert_eq!(Attribute::from(2.0f32).as_f64(), Some(2.0));
        assert_eq!(Attribute::from(7i32).as_f64(), Some(7.0));
        assert_eq!(Attribute::from("x").as_f64(), None);
        assert_eq!(Attribute::from(3u64).as_u64(), Some(3));
        assert_eq!(Attribute::from(-3i64).as_i64(), Some(-3));
    }

    #[test]
    fn shape_accepts_scalar_and_vector() {
        assert_eq!(Attribute::from(5u64).as_vec_u64(), Some(vec![5]));
        assert_eq!(
            Attribute::from(vec![2u32, 3]).as_vec_u64(),
            Some(vec![2, 3])
        );
        assert_eq!(Attribute::from(-1i32).as_vec_u64(), None);
    }

    #[test]
    fn unit_dimension_from_plain_vector() {
        let a = Attribute::from(vec![1.0, 0.0, -2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            a.as_unit_dimension(),
            Some([1.0, 0.0, -2.0, 0.0, 0.0, 0.0, 0.0])
        );
        assert_eq!(Attribute::from(vec![1.0]).as_unit_dimension(), None);
    }
}
