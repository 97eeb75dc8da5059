//! Change Detection
//!
//! A write only propagates when the new value differs from the old one.
//! "Differs" is decided by [`ShallowEq`]:
//!
//! - scalars compare by value, and floats treat `NaN` as equal to `NaN`;
//! - sequences compare length, then element by element;
//! - maps compare their key sets, then the value under each key;
//! - JSON values follow the same rules for arrays and objects.
//!
//! Comparison goes one level deep. Elements of a sequence and values of a map
//! are compared with their own `ShallowEq`, and JSON containers nested inside
//! a JSON container fall back to `PartialEq`.
//!
//! Types that need something else can hand the runtime an [`EqualsFn`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

/// Equality function used to decide whether a write is a change.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// One-level structural equality used for change detection.
pub trait ShallowEq {
    /// Returns `true` if writing `other` over `self` is not a change.
    fn shallow_eq(&self, other: &Self) -> bool;
}

/// Default [`EqualsFn`] for any [`ShallowEq`] type.
pub fn shallow_equals<T: ShallowEq>(a: &T, b: &T) -> bool {
    a.shallow_eq(b)
}

macro_rules! shallow_eq_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ShallowEq for $ty {
                #[inline]
                fn shallow_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

shallow_eq_by_value!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String,
);

impl ShallowEq for &str {
    fn shallow_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl ShallowEq for f32 {
    fn shallow_eq(&self, other: &Self) -> bool {
        (self.is_nan() && other.is_nan()) || self == other
    }
}

impl ShallowEq for f64 {
    fn shallow_eq(&self, other: &Self) -> bool {
        (self.is_nan() && other.is_nan()) || self == other
    }
}

impl<T: ShallowEq> ShallowEq for Option<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.shallow_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: ShallowEq> ShallowEq for Rc<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other) || (**self).shallow_eq(other)
    }
}

fn elementwise<'a, T: ShallowEq + 'a>(
    a_len: usize,
    b_len: usize,
    pairs: impl Iterator<Item = (&'a T, &'a T)>,
) -> bool {
    a_len == b_len && pairs.into_iter().all(|(a, b)| a.shallow_eq(b))
}

impl<T: ShallowEq> ShallowEq for Vec<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        elementwise(self.len(), other.len(), self.iter().zip(other))
    }
}

impl<T: ShallowEq> ShallowEq for VecDeque<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        elementwise(self.len(), other.len(), self.iter().zip(other))
    }
}

impl<T: ShallowEq, const N: usize> ShallowEq for [T; N] {
    fn shallow_eq(&self, other: &Self) -> bool {
        elementwise(N, N, self.iter().zip(other))
    }
}

impl<K, V, S> ShallowEq for HashMap<K, V, S>
where
    K: Eq + Hash,
    V: ShallowEq,
    S: BuildHasher,
{
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.shallow_eq(o)))
    }
}

impl<K, V, S> ShallowEq for IndexMap<K, V, S>
where
    K: Eq + Hash,
    V: ShallowEq,
    S: BuildHasher,
{
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.shallow_eq(o)))
    }
}

impl<K: Ord, V: ShallowEq> ShallowEq for BTreeMap<K, V> {
    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|o| value.shallow_eq(o)))
    }
}

macro_rules! shallow_eq_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: ShallowEq),+> ShallowEq for ($($name,)+) {
            fn shallow_eq(&self, other: &Self) -> bool {
                $(self.$idx.shallow_eq(&other.$idx))&&+
            }
        }
    };
}

shallow_eq_tuple!(A: 0);
shallow_eq_tuple!(A: 0, B: 1);
shallow_eq_tuple!(A: 0, B: 1, C: 2);
shallow_eq_tuple!(A: 0, B: 1, C: 2, D: 3);

impl ShallowEq for Value {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, value)| b.get(key) == Some(value))
            }
            _ => self == other,
        }
    }
}
