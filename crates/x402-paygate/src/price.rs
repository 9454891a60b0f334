use alloy::primitives::U256;

use crate::error::PriceError;

/// Parse a human-readable price (e.g. `"0.001"`, `"$1"`, `"1.5"`) into token
/// base units with `decimals` fractional digits.
///
/// Integer-only: no `f64` anywhere in the pipeline. More fractional digits
/// than the token supports is an error rather than a silent truncation.
pub fn parse_amount(price: &str, decimals: u32) -> Result<U256, PriceError> {
    let invalid = |reason: String| PriceError::Invalid {
        price: price.to_string(),
        reason,
    };

    let cleaned = price.trim().trim_start_matches('$');
    if cleaned.is_empty() {
        return Err(invalid("no numeric content".to_string()));
    }
    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid("only digits and a decimal point are allowed".to_string()));
    }

    let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned, ""));
    if fractional_part.contains('.') {
        return Err(invalid("more than one decimal point".to_string()));
    }
    if integer_part.is_empty() && fractional_part.is_empty() {
        return Err(invalid("no numeric content".to_string()));
    }

    let decimals = decimals as usize;
    let significant = fractional_part.trim_end_matches('0');
    if significant.len() > decimals {
        return Err(invalid(format!("more than {decimals} fractional digits")));
    }

    let parse = |digits: &str| -> Result<U256, PriceError> {
        if digits.is_empty() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(digits, 10).map_err(|e| invalid(e.to_string()))
    };

    let scale = U256::from(10u64).pow(U256::from(decimals as u64));
    let frac_scale = U256::from(10u64).pow(U256::from((decimals - significant.len()) as u64));

    let whole = parse(integer_part)?;
    let fraction = parse(significant)?;
    let amount = whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction * frac_scale))
        .ok_or_else(|| invalid("amount overflows 256 bits".to_string()))?;

    if amount.is_zero() {
        return Err(PriceError::Zero(price.to_string()));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_prices() {
        assert_eq!(parse_amount("0.001", 6).unwrap(), U256::from(1_000u64));
        assert_eq!(parse_amount("$0.01", 6).unwrap(), U256::from(10_000u64));
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(parse_amount(".5", 2).unwrap(), U256::from(50u64));
    }

    #[test]
    fn parses_whole_prices() {
        assert_eq!(parse_amount("1", 6).unwrap(), U256::from(1_000_000u64));
        assert_eq!(parse_amount("1.0", 18).unwrap(), U256::from(10u64).pow(U256::from(18u64)));
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        assert_eq!(parse_amount("1.10000000", 2).unwrap(), U256::from(110u64));
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(matches!(
            parse_amount("0.0000001", 6),
            Err(PriceError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert_eq!(parse_amount("0.000", 6), Err(PriceError::Zero("0.000".into())));
        assert!(parse_amount("", 6).is_err());
        assert!(parse_amount("$", 6).is_err());
        assert!(parse_amount("1.2.3", 6).is_err());
        assert!(parse_amount("-1", 6).is_err());
        assert!(parse_amount("1e3", 6).is_err());
    }
}
