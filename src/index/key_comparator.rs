use std::cmp::Ordering;

use crate::common::IndexKey;

/// Total order over index keys. The tree and its page views never compare
/// keys directly; every ordering decision goes through one of these.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: IndexKey, b: IndexKey) -> Ordering;
}

/// Plain numeric order
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: IndexKey, b: IndexKey) -> Ordering {
        a.cmp(&b)
    }
}

/// Inverted numeric order
pub struct ReverseComparator;

impl KeyComparator for ReverseComparator {
    fn compare(&self, a: IndexKey, b: IndexKey) -> Ordering {
        b.cmp(&a)
    }
}
