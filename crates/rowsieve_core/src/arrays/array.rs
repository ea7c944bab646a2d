use rowsieve_error::{DbError, Result};

use super::datatype::DataType;
use super::scalar::{ScalarValue, canonical_f32_bits, canonical_f64_bits};
use super::validity::Validity;

/// Physical storage for an array's values.
///
/// Values for invalid rows are still present in the storage, but their
/// contents are unspecified.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Null,
    Boolean(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Binary(Vec<Vec<u8>>),
}

/// Applies `$expr` to the inner vec of every non-null variant of `ArrayData`,
/// rewrapping the result in the same variant.
macro_rules! map_array_data {
    ($data:expr, $vals:ident => $expr:expr) => {
        match $data {
            ArrayData::Null => ArrayData::Null,
            ArrayData::Boolean($vals) => ArrayData::Boolean($expr),
            ArrayData::Int8($vals) => ArrayData::Int8($expr),
            ArrayData::Int16($vals) => ArrayData::Int16($expr),
            ArrayData::Int32($vals) => ArrayData::Int32($expr),
            ArrayData::Int64($vals) => ArrayData::Int64($expr),
            ArrayData::UInt8($vals) => ArrayData::UInt8($expr),
            ArrayData::UInt16($vals) => ArrayData::UInt16($expr),
            ArrayData::UInt32($vals) => ArrayData::UInt32($expr),
            ArrayData::UInt64($vals) => ArrayData::UInt64($expr),
            ArrayData::Float32($vals) => ArrayData::Float32($expr),
            ArrayData::Float64($vals) => ArrayData::Float64($expr),
            ArrayData::Utf8($vals) => ArrayData::Utf8($expr),
            ArrayData::Binary($vals) => ArrayData::Binary($expr),
        }
    };
}

impl ArrayData {
    /// Number of values stored, None for the untyped null storage.
    fn len(&self) -> Option<usize> {
        Some(match self {
            Self::Null => return None,
            Self::Boolean(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt8(v) => v.len(),
            Self::UInt16(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Utf8(v) => v.len(),
            Self::Binary(v) => v.len(),
        })
    }

    fn datatype(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int8(_) => DataType::Int8,
            Self::Int16(_) => DataType::Int16,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt8(_) => DataType::UInt8,
            Self::UInt16(_) => DataType::UInt16,
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::Binary(_) => DataType::Binary,
        }
    }

    fn empty_for_type(datatype: DataType, capacity: usize) -> Self {
        match datatype {
            DataType::Null => Self::Null,
            DataType::Boolean => Self::Boolean(Vec::with_capacity(capacity)),
            DataType::Int8 => Self::Int8(Vec::with_capacity(capacity)),
            DataType::Int16 => Self::Int16(Vec::with_capacity(capacity)),
            DataType::Int32 => Self::Int32(Vec::with_capacity(capacity)),
            DataType::Int64 => Self::Int64(Vec::with_capacity(capacity)),
            DataType::UInt8 => Self::UInt8(Vec::with_capacity(capacity)),
            DataType::UInt16 => Self::UInt16(Vec::with_capacity(capacity)),
            DataType::UInt32 => Self::UInt32(Vec::with_capacity(capacity)),
            DataType::UInt64 => Self::UInt64(Vec::with_capacity(capacity)),
            DataType::Float32 => Self::Float32(Vec::with_capacity(capacity)),
            DataType::Float64 => Self::Float64(Vec::with_capacity(capacity)),
            DataType::Utf8 => Self::Utf8(Vec::with_capacity(capacity)),
            DataType::Binary => Self::Binary(Vec::with_capacity(capacity)),
        }
    }
}

/// A column of values with a single data type.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub(crate) datatype: DataType,
    pub(crate) len: usize,
    pub(crate) validity: Validity,
    pub(crate) data: ArrayData,
}

impl Array {
    /// Create a new array from its parts.
    ///
    /// Errors if the storage doesn't match the data type, or if the validity
    /// mask length doesn't match the storage length.
    pub fn try_new(datatype: DataType, validity: Validity, data: ArrayData) -> Result<Self> {
        if data.datatype() != datatype {
            return Err(DbError::new("Array storage does not match data type")
                .with_field("datatype", datatype)
                .with_field("storage", data.datatype()));
        }

        let len = match (data.len(), validity.mask_len()) {
            (Some(len), Some(mask_len)) if len != mask_len => {
                return Err(DbError::new("Validity mask length does not match array length")
                    .with_field("len", len)
                    .with_field("mask_len", mask_len));
            }
            (Some(len), _) => len,
            (None, Some(mask_len)) => mask_len,
            (None, None) => 0,
        };

        Ok(Array {
            datatype,
            len,
            validity,
            data,
        })
    }

    /// Create an array containing only NULLs.
    pub fn new_null(len: usize) -> Self {
        Array {
            datatype: DataType::Null,
            len,
            validity: Validity::Mask(vec![false; len]),
            data: ArrayData::Null,
        }
    }

    /// Create an empty array with zero rows.
    pub fn new_empty(datatype: DataType) -> Self {
        Array {
            datatype,
            len: 0,
            validity: Validity::AllValid,
            data: ArrayData::empty_for_type(datatype, 0),
        }
    }

    /// Build an array from scalars, all of which must either be NULL or be of
    /// `datatype`.
    pub fn try_from_scalars(
        datatype: DataType,
        scalars: impl IntoIterator<Item = ScalarValue>,
    ) -> Result<Self> {
        let scalars = scalars.into_iter();
        let mut data = ArrayData::empty_for_type(datatype, scalars.size_hint().0);
        let mut mask = Vec::with_capacity(scalars.size_hint().0);

        macro_rules! push_value {
            ($vals:expr, $scalar:expr, $variant:ident, $default:expr) => {
                match $scalar {
                    ScalarValue::$variant(v) => {
                        $vals.push(v);
                        mask.push(true);
                    }
                    ScalarValue::Null => {
                        $vals.push($default);
                        mask.push(false);
                    }
                    other => {
                        return Err(DbError::new("Scalar does not match array data type")
                            .with_field("datatype", datatype)
                            .with_field("scalar", other.datatype()));
                    }
                }
            };
        }

        for scalar in scalars {
            match &mut data {
                ArrayData::Null => {
                    if !scalar.is_null() {
                        return Err(DbError::new("Expected only NULLs for Null array")
                            .with_field("scalar", scalar));
                    }
                    mask.push(false);
                }
                ArrayData::Boolean(vals) => push_value!(vals, scalar, Boolean, false),
                ArrayData::Int8(vals) => push_value!(vals, scalar, Int8, 0),
                ArrayData::Int16(vals) => push_value!(vals, scalar, Int16, 0),
                ArrayData::Int32(vals) => push_value!(vals, scalar, Int32, 0),
                ArrayData::Int64(vals) => push_value!(vals, scalar, Int64, 0),
                ArrayData::UInt8(vals) => push_value!(vals, scalar, UInt8, 0),
                ArrayData::UInt16(vals) => push_value!(vals, scalar, UInt16, 0),
                ArrayData::UInt32(vals) => push_value!(vals, scalar, UInt32, 0),
                ArrayData::UInt64(vals) => push_value!(vals, scalar, UInt64, 0),
                ArrayData::Float32(vals) => push_value!(vals, scalar, Float32, 0.0),
                ArrayData::Float64(vals) => push_value!(vals, scalar, Float64, 0.0),
                ArrayData::Utf8(vals) => push_value!(vals, scalar, Utf8, String::new()),
                ArrayData::Binary(vals) => push_value!(vals, scalar, Binary, Vec::new()),
            }
        }

        let validity = match data {
            ArrayData::Null => Validity::Mask(mask),
            _ => Validity::from_mask(mask),
        };

        Self::try_new(datatype, validity, data)
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn validity(&self) -> &Validity {
        &self.validity
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity.is_valid(idx)
    }

    /// Get an owned scalar for the value at `idx`.
    pub fn get_scalar(&self, idx: usize) -> Result<ScalarValue> {
        if idx >= self.len {
            return Err(DbError::new("Row index out of bounds")
                .with_field("idx", idx)
                .with_field("len", self.len));
        }

        if !self.validity.is_valid(idx) {
            return Ok(ScalarValue::Null);
        }

        Ok(match &self.data {
            ArrayData::Null => ScalarValue::Null,
            ArrayData::Boolean(v) => ScalarValue::Boolean(v[idx]),
            ArrayData::Int8(v) => ScalarValue::Int8(v[idx]),
            ArrayData::Int16(v) => ScalarValue::Int16(v[idx]),
            ArrayData::Int32(v) => ScalarValue::Int32(v[idx]),
            ArrayData::Int64(v) => ScalarValue::Int64(v[idx]),
            ArrayData::UInt8(v) => ScalarValue::UInt8(v[idx]),
            ArrayData::UInt16(v) => ScalarValue::UInt16(v[idx]),
            ArrayData::UInt32(v) => ScalarValue::UInt32(v[idx]),
            ArrayData::UInt64(v) => ScalarValue::UInt64(v[idx]),
            ArrayData::Float32(v) => ScalarValue::Float32(v[idx]),
            ArrayData::Float64(v) => ScalarValue::Float64(v[idx]),
            ArrayData::Utf8(v) => ScalarValue::Utf8(v[idx].clone()),
            ArrayData::Binary(v) => ScalarValue::Binary(v[idx].clone()),
        })
    }

    /// Check if the value at `idx` is equal to `scalar` using DISTINCT
    /// semantics.
    ///
    /// Avoids materializing an owned scalar for the row.
    pub fn scalar_eq(&self, idx: usize, scalar: &ScalarValue) -> bool {
        if !self.validity.is_valid(idx) {
            return scalar.is_null();
        }

        match (&self.data, scalar) {
            (ArrayData::Null, ScalarValue::Null) => true,
            (ArrayData::Boolean(v), ScalarValue::Boolean(s)) => v[idx] == *s,
            (ArrayData::Int8(v), ScalarValue::Int8(s)) => v[idx] == *s,
            (ArrayData::Int16(v), ScalarValue::Int16(s)) => v[idx] == *s,
            (ArrayData::Int32(v), ScalarValue::Int32(s)) => v[idx] == *s,
            (ArrayData::Int64(v), ScalarValue::Int64(s)) => v[idx] == *s,
            (ArrayData::UInt8(v), ScalarValue::UInt8(s)) => v[idx] == *s,
            (ArrayData::UInt16(v), ScalarValue::UInt16(s)) => v[idx] == *s,
            (ArrayData::UInt32(v), ScalarValue::UInt32(s)) => v[idx] == *s,
            (ArrayData::UInt64(v), ScalarValue::UInt64(s)) => v[idx] == *s,
            (ArrayData::Float32(v), ScalarValue::Float32(s)) => {
                canonical_f32_bits(v[idx]) == canonical_f32_bits(*s)
            }
            (ArrayData::Float64(v), ScalarValue::Float64(s)) => {
                canonical_f64_bits(v[idx]) == canonical_f64_bits(*s)
            }
            (ArrayData::Utf8(v), ScalarValue::Utf8(s)) => v[idx] == *s,
            (ArrayData::Binary(v), ScalarValue::Binary(s)) => v[idx] == *s,
            _ => false,
        }
    }

    /// Create a new array by selecting rows from this array.
    ///
    /// Indices in `sel` may repeat and may appear in any order.
    pub fn select(&self, sel: &[usize]) -> Result<Array> {
        if let Some(&max) = sel.iter().max() {
            if max >= self.len {
                return Err(DbError::new("Selection index out of bounds")
                    .with_field("idx", max)
                    .with_field("len", self.len));
            }
        }

        let data = map_array_data!(&self.data, vals => sel.iter().map(|&idx| vals[idx].clone()).collect());

        Ok(Array {
            datatype: self.datatype,
            len: sel.len(),
            validity: self.validity.select(sel),
            data,
        })
    }
}

/// Conversion into an array, mostly for constructing arrays in tests.
pub trait IntoArray {
    fn into_array(self) -> Array;
}

impl IntoArray for Array {
    fn into_array(self) -> Array {
        self
    }
}

impl<T, const N: usize> IntoArray for [T; N]
where
    Vec<T>: IntoArray,
{
    fn into_array(self) -> Array {
        Vec::from(self).into_array()
    }
}

impl<T> FromIterator<T> for Array
where
    Vec<T>: IntoArray,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into_array()
    }
}

macro_rules! impl_into_array {
    ($prim:ty, $variant:ident) => {
        impl IntoArray for Vec<$prim> {
            fn into_array(self) -> Array {
                Array {
                    datatype: DataType::$variant,
                    len: self.len(),
                    validity: Validity::AllValid,
                    data: ArrayData::$variant(self),
                }
            }
        }

        impl IntoArray for Vec<Option<$prim>> {
            fn into_array(self) -> Array {
                let mask: Vec<bool> = self.iter().map(|v| v.is_some()).collect();
                let vals: Vec<$prim> = self.into_iter().map(|v| v.unwrap_or_default()).collect();
                Array {
                    datatype: DataType::$variant,
                    len: vals.len(),
                    validity: Validity::from_mask(mask),
                    data: ArrayData::$variant(vals),
                }
            }
        }
    };
}

impl_into_array!(bool, Boolean);
impl_into_array!(i8, Int8);
impl_into_array!(i16, Int16);
impl_into_array!(i32, Int32);
impl_into_array!(i64, Int64);
impl_into_array!(u8, UInt8);
impl_into_array!(u16, UInt16);
impl_into_array!(u32, UInt32);
impl_into_array!(u64, UInt64);
impl_into_array!(f32, Float32);
impl_into_array!(f64, Float64);
impl_into_array!(String, Utf8);

impl IntoArray for Vec<&str> {
    fn into_array(self) -> Array {
        self.into_iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_array()
    }
}

impl IntoArray for Vec<Option<&str>> {
    fn into_array(self) -> Array {
        self.into_iter()
            .map(|s| s.map(|s| s.to_string()))
            .collect::<Vec<_>>()
            .into_array()
    }
}
