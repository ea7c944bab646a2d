use ahash::RandomState;
use rowsieve_error::{DbError, Result};

use crate::arrays::array::{Array, ArrayData};
use crate::arrays::scalar::{canonical_f32_bits, canonical_f64_bits};

/// State used for all hashing operations during physical execution.
pub const HASH_RANDOM_STATE: RandomState = RandomState::with_seeds(0, 0, 0, 0);

/// Hash used for NULL values.
const NULL_HASH: u64 = 0xA21258D088C87A13;

/// Combine two hashes into a single value.
///
/// Implementation taken from boost:
/// <https://github.com/boostorg/container_hash/blob/b8179488b20eb1373bdbf5c7fcca963f072512df/include/boost/container_hash/detail/hash_mix.hpp#L67>
pub const fn combine_hashes(v1: u64, v2: u64) -> u64 {
    const fn mix(mut x: u64) -> u64 {
        const M: u64 = 0xE9846AF9B1A615D;
        x ^= x.wrapping_shr(32);
        x = x.wrapping_mul(M);
        x ^= x.wrapping_shr(32);
        x = x.wrapping_mul(M);
        x ^= x.wrapping_shr(28);
        x
    }

    mix(v1.wrapping_add(0x9E3779B9).wrapping_add(v2))
}

/// Hash every row across many arrays, writing the combined hashes to
/// `hashes`.
///
/// Every array must have the same length as `hashes`. Hashes for zero arrays
/// are all zero.
pub fn hash_many_arrays<'a>(
    arrays: impl IntoIterator<Item = &'a Array>,
    hashes: &mut [u64],
) -> Result<()> {
    hashes.fill(0);
    for (idx, arr) in arrays.into_iter().enumerate() {
        if arr.len() != hashes.len() {
            return Err(DbError::new("Array length does not match hash buffer length")
                .with_field("array_len", arr.len())
                .with_field("hashes_len", hashes.len()));
        }

        let combine = idx > 0;
        hash_array(arr, hashes, combine);
    }

    Ok(())
}

/// Hash a single array.
///
/// If `combine` is true, the hash for each row is combined with the existing
/// hash in the buffer.
fn hash_array(arr: &Array, hashes: &mut [u64], combine: bool) {
    match arr.data() {
        ArrayData::Null => {
            for hash in hashes.iter_mut() {
                *hash = maybe_combine(*hash, NULL_HASH, combine);
            }
        }
        ArrayData::Boolean(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Int8(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Int16(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Int32(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Int64(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::UInt8(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::UInt16(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::UInt32(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::UInt64(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Float32(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Float64(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Utf8(vals) => hash_values(arr, vals, hashes, combine),
        ArrayData::Binary(vals) => hash_values(arr, vals, hashes, combine),
    }
}

fn hash_values<V: HashValue>(arr: &Array, vals: &[V], hashes: &mut [u64], combine: bool) {
    let validity = arr.validity();
    if validity.all_valid() {
        for (v, hash) in vals.iter().zip(hashes.iter_mut()) {
            *hash = maybe_combine(*hash, v.hash_one(), combine);
        }
    } else {
        for (idx, (v, hash)) in vals.iter().zip(hashes.iter_mut()).enumerate() {
            let row_hash = if validity.is_valid(idx) {
                v.hash_one()
            } else {
                NULL_HASH
            };
            *hash = maybe_combine(*hash, row_hash, combine);
        }
    }
}

const fn maybe_combine(existing: u64, new: u64, combine: bool) -> u64 {
    if combine {
        combine_hashes(existing, new)
    } else {
        new
    }
}

/// Helper trait for hashing values.
///
/// This is mostly for floats since they don't automatically implement `Hash`.
trait HashValue {
    fn hash_one(&self) -> u64;
}

macro_rules! impl_hash_value {
    ($typ:ty) => {
        impl HashValue for $typ {
            fn hash_one(&self) -> u64 {
                HASH_RANDOM_STATE.hash_one(self)
            }
        }
    };
}

impl_hash_value!(bool);
impl_hash_value!(i8);
impl_hash_value!(i16);
impl_hash_value!(i32);
impl_hash_value!(i64);
impl_hash_value!(u8);
impl_hash_value!(u16);
impl_hash_value!(u32);
impl_hash_value!(u64);
impl_hash_value!(String);
impl_hash_value!(Vec<u8>);

impl HashValue for f32 {
    fn hash_one(&self) -> u64 {
        HASH_RANDOM_STATE.hash_one(canonical_f32_bits(*self))
    }
}

impl HashValue for f64 {
    fn hash_one(&self) -> u64 {
        HASH_RANDOM_STATE.hash_one(canonical_f64_bits(*self))
    }
}
