//! Kraken v1 book digest: CRC32 over the top ten asks (best first)
//! followed by the top ten bids (best first). Each level contributes its
//! price then its volume exactly as transmitted on the wire, decimal
//! point stripped and leading zeros trimmed. Pair precision varies, so
//! the digest must run over the original strings; reformatting stored
//! floats produces a different digit count and a digest that never
//! matches.

use std::collections::BTreeMap;

use super::Price;

/// (price, quantity) as transmitted.
pub type WireLevel = (String, String);

const DIGEST_DEPTH: usize = 10;

pub fn book_crc32(asks: &BTreeMap<Price, WireLevel>, bids: &BTreeMap<Price, WireLevel>) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for (price, qty) in asks.values().take(DIGEST_DEPTH) {
        feed(&mut hasher, price);
        feed(&mut hasher, qty);
    }
    for (price, qty) in bids.values().rev().take(DIGEST_DEPTH) {
        feed(&mut hasher, price);
        feed(&mut hasher, qty);
    }
    hasher.finalize()
}

fn feed(hasher: &mut crc32fast::Hasher, value: &str) {
    let digits: String = value.chars().filter(|c| *c != '.').collect();
    hasher.update(digits.trim_start_matches('0').as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordered_float::OrderedFloat;

    fn side(levels: &[(&str, &str)]) -> BTreeMap<Price, WireLevel> {
        levels
            .iter()
            .map(|&(p, q)| (OrderedFloat(p.parse().unwrap()), (p.to_string(), q.to_string())))
            .collect()
    }

    #[test]
    fn digest_hashes_wire_digits_not_reformatted_floats() {
        // 5-decimal price precision: "3538.80000" must contribute the
        // digits "353880000", not an 8-decimal rendering of the float.
        let asks = side(&[("3538.80000", "0.50000000")]);
        let bids = side(&[("3538.70000", "1.20000000")]);
        let expected = crc32fast::hash(b"35388000050000000353870000120000000");
        assert_eq!(book_crc32(&asks, &bids), expected);
    }

    #[test]
    fn leading_zeros_are_trimmed_per_field() {
        // "0.05005" -> "5005", "0.00000500" -> "500".
        let asks = side(&[("0.05005", "0.00000500")]);
        let bids = BTreeMap::new();
        let expected = crc32fast::hash(b"5005500");
        assert_eq!(book_crc32(&asks, &bids), expected);
    }

    #[test]
    fn digest_is_order_sensitive() {
        let asks = side(&[("50001.1", "1.0"), ("50002.2", "2.0")]);
        let bids = side(&[("50000.0", "1.0"), ("49999.9", "2.0")]);
        let a = book_crc32(&asks, &bids);
        let b = book_crc32(&bids, &asks);
        assert_ne!(a, b);
    }

    #[test]
    fn digest_only_covers_top_ten() {
        let mut asks = BTreeMap::new();
        for i in 0..10 {
            let price = format!("{}.1", 50001 + i);
            asks.insert(OrderedFloat(price.parse().unwrap()), (price, "1.0".to_string()));
        }
        let bids = side(&[("50000.0", "1.0")]);
        let base = book_crc32(&asks, &bids);

        let mut deeper = asks.clone();
        deeper.insert(OrderedFloat(51000.5), ("51000.5".to_string(), "9.0".to_string()));
        assert_eq!(book_crc32(&deeper, &bids), base);
    }
}
