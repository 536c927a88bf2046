//! Deterministic CBOR bytes for signing. We use serde_cbor 0.11's to_vec over
//! `serde_cbor::Value`; maps are `BTreeMap`s so key order is always sorted.

use serde::Serialize;
use serde_cbor::to_vec;

pub fn canonical_cbor<T: Serialize>(value: &T) -> Vec<u8> {
    to_vec(value).expect("CBOR serialize into Vec failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_cbor::Value;
    use std::collections::BTreeMap;

    #[test]
    fn map_insertion_order_does_not_change_bytes() {
        let mut a = BTreeMap::new();
        a.insert(Value::Integer(20), Value::Bytes(vec![1]));
        a.insert(Value::Integer(2), Value::Bytes(vec![2]));

        let mut b = BTreeMap::new();
        b.insert(Value::Integer(2), Value::Bytes(vec![2]));
        b.insert(Value::Integer(20), Value::Bytes(vec![1]));

        assert_eq!(canonical_cbor(&Value::Map(a)), canonical_cbor(&Value::Map(b)));
    }
}
