/// Render a base-unit amount with `decimals` fractional digits, without going through floats.
pub fn format_token_amount(amount: u128, decimals: u32) -> String {
    let digits = amount.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = format!("{:0>width$}", digits, width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    format!("{}.{}", whole, fraction)
}

/// Signed variant of `format_token_amount`, used for balances.
pub fn format_signed_amount(amount: i128, decimals: u32) -> String {
    let formatted = format_token_amount(amount.unsigned_abs(), decimals);
    if amount < 0 {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_exact_amounts() {
        assert_eq!(format_token_amount(12_345_678, 7), "1.2345678");
        assert_eq!(format_token_amount(5, 7), "0.0000005");
        assert_eq!(format_token_amount(0, 2), "0.00");
        assert_eq!(format_token_amount(42, 0), "42");
        assert_eq!(
            format_token_amount(u128::MAX, 18),
            "340282366920938463463.374607431768211455"
        );
    }

    #[test]
    fn formats_negative_balances() {
        assert_eq!(format_signed_amount(-110, 2), "-1.10");
        assert_eq!(format_signed_amount(940, 1), "94.0");
    }
}
