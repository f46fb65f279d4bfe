//! Utility functions for identifiers and price scaling

use super::error::{LedgerError, Result};
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| LedgerError::InvalidArgument(format!("bad hrp {hrp:?}: {e}")))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| LedgerError::InvalidArgument(e.to_string()))?;
    Ok(encode)
}

/// Scales a decimal price to integer cents, rounding half to even like Python's `round`.
pub fn price_to_cents(price: f64) -> Result<u64> {
    if !price.is_finite() || price < 0.0 {
        return Err(LedgerError::InvalidArgument(format!(
            "price must be a finite non-negative number, got {price}"
        )));
    }
    let cents = (price * 100.0).round_ties_even();
    // u64::MAX as f64 rounds up to 2^64, which no longer fits
    if cents >= u64::MAX as f64 {
        return Err(LedgerError::InvalidArgument(format!(
            "price {price} does not fit in cents"
        )));
    }
    Ok(cents as u64)
}

pub fn cents_to_display(cents: u64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_rounds_to_nearest_cent() {
        assert_eq!(price_to_cents(65_000.0).unwrap(), 6_500_000);
        assert_eq!(price_to_cents(150.125).unwrap(), 15_012);
        assert_eq!(price_to_cents(150.375).unwrap(), 15_038);
        assert_eq!(price_to_cents(0.125).unwrap(), 12);
        assert_eq!(price_to_cents(19.99).unwrap(), 1_999);
        assert_eq!(price_to_cents(0.0).unwrap(), 0);
    }

    #[test]
    fn price_rejects_negative_and_nan() {
        assert!(price_to_cents(-0.01).is_err());
        assert!(price_to_cents(f64::NAN).is_err());
        assert!(price_to_cents(f64::INFINITY).is_err());
    }

    #[test]
    fn price_rejects_values_past_u64_cents() {
        assert!(price_to_cents(u64::MAX as f64 / 100.0).is_err());
        assert!(price_to_cents(1e18).is_err());
        assert_eq!(price_to_cents(1e15).unwrap(), 100_000_000_000_000_000);
    }

    #[test]
    fn cents_display() {
        assert_eq!(cents_to_display(6_500_000), "$65000.00");
        assert_eq!(cents_to_display(1_234_505), "$12345.05");
    }
}
