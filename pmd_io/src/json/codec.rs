//! Encoding of attributes and dataset slabs into JSON values.
//!
//! Attributes are stored self-describing as `{"datatype": <tag>, "value":
//! <payload>}`; dataset payloads are nested arrays mirroring the extent,
//! with complex numbers as two-element `[re, im]` arrays.

use crate::{Error, Result};
use num_complex::{Complex32, Complex64};
use pmd_types::{Attribute, Buffer, Datatype, Extent, Offset};
use serde_json::{json, Map, Value};
use std::sync::Arc;

fn unexpected(what: &str, message: impl Into<String>) -> Error {
    Error::ReadUnexpectedContent {
        what: what.to_owned(),
        message: message.into(),
    }
}

/// Encode an attribute as its self-describing JSON node.
pub fn encode_attribute(attribute: &Attribute) -> Value {
    let mut node = Map::new();
    node.insert(
        "datatype".to_owned(),
        Value::String(attribute.dtype().to_string()),
    );
    node.insert("value".to_owned(), attribute_payload(attribute));
    Value::Object(node)
}

fn attribute_payload(attribute: &Attribute) -> Value {
    use Attribute::*;
    match attribute {
        Char(v) => json!(v),
        Uchar(v) => json!(v),
        Short(v) => json!(v),
        Int(v) => json!(v),
        Long(v) | Longlong(v) => json!(v),
        Ushort(v) => json!(v),
        Uint(v) => json!(v),
        Ulong(v) | Ulonglong(v) => json!(v),
        Float(v) => json!(v),
        Double(v) => json!(v),
        Cfloat(v) => json!([v.re, v.im]),
        Cdouble(v) => json!([v.re, v.im]),
        String(v) => json!(v),
        VecChar(v) => json!(v),
        VecShort(v) => json!(v),
        VecInt(v) => json!(v),
        VecLong(v) | VecLonglong(v) => json!(v),
        VecUchar(v) => json!(v),
        VecUshort(v) => json!(v),
        VecUint(v) => json!(v),
        VecUlong(v) | VecUlonglong(v) => json!(v),
        VecFloat(v) => json!(v),
        VecDouble(v) => json!(v),
        VecCfloat(v) => Value::Array(v.iter().map(|c| json!([c.re, c.im])).collect()),
        VecCdouble(v) => Value::Array(v.iter().map(|c| json!([c.re, c.im])).collect()),
        VecString(v) => json!(v),
        ArrDbl7(v) => json!(v.to_vec()),
        Bool(v) => json!(v),
        Dtype(v) => Value::String(v.to_string()),
    }
}

/// Decode a self-describing attribute node.
pub fn decode_attribute(name: &str, node: &Value) -> Result<Attribute> {
    let object = node
        .as_object()
        .ok_or_else(|| unexpected(name, "attribute node is not an object"))?;
    let dtype: Datatype = object
        .get("datatype")
        .and_then(Value::as_str)
        .ok_or_else(|| unexpected(name, "attribute node lacks a datatype tag"))?
        .parse()
        .map_err(|e| unexpected(name, format!("{e}")))?;
    let payload = object
        .get("value")
        .ok_or_else(|| unexpected(name, "attribute node lacks a value"))?;
    decode_payload(name, dtype, payload)
}

fn decode_payload(name: &str, dtype: Datatype, payload: &Value) -> Result<Attribute> {
    use Datatype as D;
    let fail = |msg: &str| unexpected(name, format!("{msg} (datatype {dtype})"));
    let as_i = |v: &Value| v.as_i64().ok_or_else(|| fail("expected a signed integer"));
    let as_u = |v: &Value| {
        v.as_u64()
            .ok_or_else(|| fail("expected an unsigned integer"))
    };
    let as_f = |v: &Value| v.as_f64().ok_or_else(|| fail("expected a number"));
    fn elements<'a>(v: &'a Value, name: &str, dtype: Datatype) -> Result<&'a [Value]> {
        v.as_array()
            .map(|a| a.as_slice())
            .ok_or_else(|| unexpected(name, format!("expected an array (datatype {dtype})")))
    }

    let attribute = match dtype {
        D::Char => Attribute::Char(as_i(payload)? as i8),
        D::Uchar => Attribute::Uchar(as_u(payload)? as u8),
        D::Short => Attribute::Short(as_i(payload)? as i16),
        D::Int => Attribute::Int(as_i(payload)? as i32),
        D::Long => Attribute::Long(as_i(payload)?),
        D::Longlong => Attribute::Longlong(as_i(payload)?),
        D::Ushort => Attribute::Ushort(as_u(payload)? as u16),
        D::Uint => Attribute::Uint(as_u(payload)? as u32),
        D::Ulong => Attribute::Ulong(as_u(payload)?),
        D::Ulonglong => Attribute::Ulonglong(as_u(payload)?),
        D::Float => Attribute::Float(as_f(payload)? as f32),
        D::Double => Attribute::Double(as_f(payload)?),
        D::Cfloat => {
            let (re, im) = complex_parts(payload).ok_or_else(|| fail("expected [re, im]"))?;
            Attribute::Cfloat(Complex32::new(re as f32, im as f32))
        }
        D::Cdouble => {
            let (re, im) = complex_parts(payload).ok_or_else(|| fail("expected [re, im]"))?;
            Attribute::Cdouble(Complex64::new(re, im))
        }
        D::String => Attribute::String(
            payload
                .as_str()
                .ok_or_else(|| fail("expected a string"))?
                .to_owned(),
        ),
        D::Bool => Attribute::Bool(payload.as_bool().ok_or_else(|| fail("expected a bool"))?),
        D::Datatype => Attribute::Dtype(
            payload
                .as_str()
                .ok_or_else(|| fail("expected a datatype string"))?
                .parse()
                .map_err(|e| unexpected(name, format!("{e}")))?,
        ),
        D::VecChar => Attribute::VecChar(collect(elements(payload, name, dtype)?, |v| as_i(v).map(|e| e as i8))?),
        D::VecShort => {
            Attribute::VecShort(collect(elements(payload, name, dtype)?, |v| as_i(v).map(|e| e as i16))?)
        }
        D::VecInt => Attribute::VecInt(collect(elements(payload, name, dtype)?, |v| as_i(v).map(|e| e as i32))?),
        D::VecLong => Attribute::VecLong(collect(elements(payload, name, dtype)?, as_i)?),
        D::VecLonglong => Attribute::VecLonglong(collect(elements(payload, name, dtype)?, as_i)?),
        D::VecUchar => {
            Attribute::VecUchar(collect(elements(payload, name, dtype)?, |v| as_u(v).map(|e| e as u8))?)
        }
        D::VecUshort => {
            Attribute::VecUshort(collect(elements(payload, name, dtype)?, |v| as_u(v).map(|e| e as u16))?)
        }
        D::VecUint => {
            Attribute::VecUint(collect(elements(payload, name, dtype)?, |v| as_u(v).map(|e| e as u32))?)
        }
        D::VecUlong => Attribute::VecUlong(collect(elements(payload, name, dtype)?, as_u)?),
        D::VecUlonglong => Attribute::VecUlonglong(collect(elements(payload, name, dtype)?, as_u)?),
        D::VecFloat => {
            Attribute::VecFloat(collect(elements(payload, name, dtype)?, |v| as_f(v).map(|e| e as f32))?)
        }
        D::VecDouble => Attribute::VecDouble(collect(elements(payload, name, dtype)?, as_f)?),
        D::VecCfloat => Attribute::VecCfloat(collect(elements(payload, name, dtype)?, |v| {
            complex_parts(v)
                .map(|(re, im)| Complex32::new(re as f32, im as f32))
                .ok_or_else(|| fail("expected [re, im]"))
        })?),
        D::VecCdouble => Attribute::VecCdouble(collect(elements(payload, name, dtype)?, |v| {
            complex_parts(v)
                .map(|(re, im)| Complex64::new(re, im))
                .ok_or_else(|| fail("expected [re, im]"))
        })?),
        D::VecString => Attribute::VecString(collect(elements(payload, name, dtype)?, |v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| fail("expected a string"))
        })?),
        D::ArrDbl7 => {
            let values = collect(elements(payload, name, dtype)?, as_f)?;
            if values.len() != 7 {
                return Err(fail("expected exactly 7 doubles"));
            }
            let mut arr = [0.0; 7];
            arr.copy_from_slice(&values);
            Attribute::ArrDbl7(arr)
        }
        D::Undefined => return Err(fail("cannot decode an undefined datatype")),
    };
    Ok(attribute)
}

fn collect<T>(values: &[Value], f: impl Fn(&Value) -> Result<T>) -> Result<Vec<T>> {
    values.iter().map(f).collect()
}

fn complex_parts(value: &Value) -> Option<(f64, f64)> {
    let parts = value.as_array()?;
    if parts.len() != 2 {
        return None;
    }
    Some((parts[0].as_f64()?, parts[1].as_f64()?))
}

/// A nested array of zeros with the given shape.
pub fn zero_filled(dtype: Datatype, extent: &[u64]) -> Result<Value> {
    let zero = zero_element(dtype)?;
    Ok(nest(&zero, extent))
}

fn nest(element: &Value, extent: &[u64]) -> Value {
    match extent.split_first() {
        None => element.clone(),
        Some((first, rest)) => {
            let inner = nest(element, rest);
            Value::Array(vec![inner; *first as usize])
        }
    }
}

fn zero_element(dtype: Datatype) -> Result<Value> {
    use Datatype as D;
    match dtype.basic() {
        D::Float | D::Double => Ok(json!(0.0)),
        D::Cfloat | D::Cdouble => Ok(json!([0.0, 0.0])),
        D::Bool => Ok(json!(false)),
        D::Char | D::Short | D::Int | D::Long | D::Longlong => Ok(json!(0)),
        D::Uchar | D::Ushort | D::Uint | D::Ulong | D::Ulonglong => Ok(json!(0)),
        other => Err(Error::NoSlabRepresentation { dtype: other }),
    }
}

/// Grow a nested data array in place to a larger extent, zero-filling new
/// cells.
pub fn grow_nested(data: &mut Value, dtype: Datatype, old: &[u64], new: &[u64]) -> Result<()> {
    let zero = zero_element(dtype)?;
    grow_level(data, &zero, old, new);
    Ok(())
}

fn grow_level(data: &mut Value, zero: &Value, old: &[u64], new: &[u64]) {
    let (Some(array), Some((new_len, new_rest))) = (data.as_array_mut(), new.split_first()) else {
        return;
    };
    let old_rest = old.split_first().map(|(_, rest)| rest).unwrap_or(&[]);
    for entry in array.iter_mut() {
        grow_level(entry, zero, old_rest, new_rest);
    }
    while (array.len() as u64) < *new_len {
        array.push(nest(zero, new_rest));
    }
}

/// Reconstruct the extent of a dataset from its nested data array.
///
/// Complex datasets store their elements as two-element `[re, im]` leaf
/// arrays; that innermost level is not a dimension.
pub fn shape_of(data: &Value, complex: bool) -> Extent {
    let mut shape = Extent::new();
    let mut current = data;
    while let Some(array) = current.as_array() {
        shape.push(array.len() as u64);
        match array.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    if complex && shape.last() == Some(&2) {
        shape.pop();
    }
    shape
}

fn unflatten(mut linear: u64, extent: &[u64]) -> Vec<u64> {
    let mut index = vec![0; extent.len()];
    for (i, dim) in extent.iter().enumerate().rev() {
        index[i] = linear % dim;
        linear /= dim;
    }
    index
}

fn nested_slot<'v>(data: &'v mut Value, index: &[u64]) -> Result<&'v mut Value> {
    let mut current = data;
    for component in index {
        current = current
            .as_array_mut()
            .and_then(|array| array.get_mut(*component as usize))
            .ok_or_else(|| unexpected("dataset", "data array is smaller than its extent"))?;
    }
    Ok(current)
}

fn nested_value<'v>(data: &'v Value, index: &[u64]) -> Result<&'v Value> {
    let mut current = data;
    for component in index {
        current = current
            .as_array()
            .and_then(|array| array.get(*component as usize))
            .ok_or_else(|| unexpected("dataset", "data array is smaller than its extent"))?;
    }
    Ok(current)
}

/// Write a typed slab into the nested data array, row-major.
pub fn write_slab(data: &mut Value, offset: &Offset, extent: &Extent, buffer: &Buffer) -> Result<()> {
    let points: u64 = extent.iter().product();
    if buffer.len() as u64 != points {
        return Err(unexpected(
            "dataset",
            format!(
                "buffer holds {} elements, slab covers {} points",
                buffer.len(),
                points
            ),
        ));
    }
    for linear in 0..points {
        let mut index = unflatten(linear, extent);
        for (i, o) in index.iter_mut().zip(offset.iter()) {
            *i += o;
        }
        *nested_slot(data, &index)? = element_at(buffer, linear as usize);
    }
    Ok(())
}

fn element_at(buffer: &Buffer, i: usize) -> Value {
    use Buffer::*;
    match buffer {
        Char(v) => json!(v[i]),
        Uchar(v) => json!(v[i]),
        Short(v) => json!(v[i]),
        Ushort(v) => json!(v[i]),
        Int(v) => json!(v[i]),
        Uint(v) => json!(v[i]),
        Long(v) => json!(v[i]),
        Ulong(v) => json!(v[i]),
        Float(v) => json!(v[i]),
        Double(v) => json!(v[i]),
        Cfloat(v) => json!([v[i].re, v[i].im]),
        Cdouble(v) => json!([v[i].re, v[i].im]),
        Bool(v) => json!(v[i]),
    }
}

/// Read a typed slab out of the nested data array, row-major.
pub fn read_slab(data: &Value, offset: &Offset, extent: &Extent, dtype: Datatype) -> Result<Buffer> {
    let points: u64 = extent.iter().product();
    let mut values = Vec::with_capacity(points as usize);
    for linear in 0..points {
        let mut index = unflatten(linear, extent);
        for (i, o) in index.iter_mut().zip(offset.iter()) {
            *i += o;
        }
        values.push(nested_value(data, &index)?);
    }
    typed_buffer(dtype, &values)
}

fn typed_buffer(dtype: Datatype, values: &[&Value]) -> Result<Buffer> {
    use Datatype as D;
    let fail = || unexpected("dataset", format!("element does not match datatype {dtype}"));
    macro_rules! gather {
        ($variant:ident, $conv:expr) => {{
            let data: Result<Vec<_>> = values.iter().map(|v| $conv(*v).ok_or_else(fail)).collect();
            Buffer::$variant(Arc::new(data?))
        }};
    }
    let buffer = match dtype.basic() {
        D::Char => gather!(Char, |v: &Value| v.as_i64().map(|e| e as i8)),
        D::Uchar => gather!(Uchar, |v: &Value| v.as_u64().map(|e| e as u8)),
        D::Short => gather!(Short, |v: &Value| v.as_i64().map(|e| e as i16)),
        D::Ushort => gather!(Ushort, |v: &Value| v.as_u64().map(|e| e as u16)),
        D::Int => gather!(Int, |v: &Value| v.as_i64().map(|e| e as i32)),
        D::Uint => gather!(Uint, |v: &Value| v.as_u64().map(|e| e as u32)),
        D::Long | D::Longlong => gather!(Long, |v: &Value| v.as_i64()),
        D::Ulong | D::Ulonglong => gather!(Ulong, |v: &Value| v.as_u64()),
        D::Float => gather!(Float, |v: &Value| v.as_f64().map(|e| e as f32)),
        D::Double => gather!(Double, |v: &Value| v.as_f64()),
        D::Cfloat => gather!(Cfloat, |v: &Value| complex_parts(v)
            .map(|(re, im)| Complex32::new(re as f32, im as f32))),
        D::Cdouble => gather!(Cdouble, |v: &Value| complex_parts(v)
            .map(|(re, im)| Complex64::new(re, im))),
        D::Bool => gather!(Bool, |v: &Value| v.as_bool()),
        other => return Err(Error::NoSlabRepresentation { dtype: other }),
    };
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_round_trip() {
        let samples = vec![
            Attribute::Double(1.5),
            Attribute::Ulong(u64::MAX),
            Attribute::String("fileBased".to_owned()),
            Attribute::VecDouble(vec![0.5, 1.5]),
            Attribute::VecString(vec!["x".to_owned(), "y".to_owned()]),
            Attribute::ArrDbl7([1.0, 0.0, -2.0, 0.0, 0.0, 0.0, 0.0]),
            Attribute::Bool(true),
            Attribute::Cdouble(Complex64::new(1.0, -1.0)),
            Attribute::Dtype(Datatype::VecFloat),
        ];
        for attribute in samples {
            let encoded = encode_attribute(&attribute);
            let decoded = decode_attribute("test", &encoded).unwrap();
            assert_eq!(decoded, attribute);
        }
    }

    #[test]
    fn mismatched_payload_is_unexpected_content() {
        let node = json!({"datatype": "DOUBLE", "value": "not a number"});
        assert!(matches!(
            decode_attribute("broken", &node).unwrap_err(),
            Error::ReadUnexpectedContent { .. }
        ));
    }

    #[test]
    fn slab_round_trip_2d() {
        let mut data = zero_filled(Datatype::Long, &[4, 4]).unwrap();
        let buffer = Buffer::Long(Arc::new((0..4).collect()));
        write_slab(&mut data, &vec![1, 1], &vec![2, 2], &buffer).unwrap();

        let read = read_slab(&data, &vec![1, 1], &vec![2, 2], Datatype::Long).unwrap();
        assert_eq!(read, buffer);

        // untouched cells stay zero
        let corner = read_slab(&data, &vec![0, 0], &vec![1, 1], Datatype::Long).unwrap();
        assert_eq!(corner, Buffer::Long(Arc::new(vec![0])));
    }

    #[test]
    fn shape_reconstruction() {
        let data = zero_filled(Datatype::Double, &[3, 2]).unwrap();
        assert_eq!(shape_of(&data, false), vec![3, 2]);

        let empty = zero_filled(Datatype::Double, &[0]).unwrap();
        assert_eq!(shape_of(&empty, false), vec![0]);

        // a [2] vector of scalars is a dimension, not a complex element
        let data = zero_filled(Datatype::Double, &[2]).unwrap();
        assert_eq!(shape_of(&data, false), vec![2]);
    }

    #[test]
    fn complex_leaves_are_not_dimensions() {
        let data = zero_filled(Datatype::Cdouble, &[3]).unwrap();
        assert_eq!(shape_of(&data, true), vec![3]);
    }

    #[test]
    fn growing_preserves_content() {
        let mut data = zero_filled(Datatype::Long, &[2, 2]).unwrap();
        let buffer = Buffer::Long(Arc::new(vec![1, 2, 3, 4]));
        write_slab(&mut data, &vec![0, 0], &vec![2, 2], &buffer).unwrap();

        grow_nested(&mut data, Datatype::Long, &[2, 2], &[3, 4]).unwrap();
        assert_eq!(shape_of(&data, false), vec![3, 4]);
        let read = read_slab(&data, &vec![0, 0], &vec![2, 2], Datatype::Long).unwrap();
        assert_eq!(read, buffer);
    }
}
