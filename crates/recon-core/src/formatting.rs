use rust_decimal::{Decimal, RoundingStrategy};

/// Format a decimal with thousands separators and a fixed number of decimal
/// places. Midpoints round away from zero.
///
/// # Examples
///
/// ```
/// use recon_core::formatting::format_number;
/// use rust_decimal::Decimal;
///
/// assert_eq!(format_number(Decimal::new(12345, 1), 1), "1,234.5");
/// assert_eq!(format_number(Decimal::from(1234567), 0), "1,234,567");
/// assert_eq!(format_number(Decimal::ZERO, 2), "0.00");
/// assert_eq!(format_number(Decimal::new(-98765, 1), 1), "-9,876.5");
/// ```
pub fn format_number(value: Decimal, decimals: u32) -> String {
    let rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = format!("{:.prec$}", rounded.abs(), prec = decimals as usize);

    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut result = group_thousands(int_part);
    if let Some(frac) = frac_part {
        result.push('.');
        result.push_str(frac);
    }

    if negative {
        format!("-{}", result)
    } else {
        result
    }
}

/// Format a monetary amount with two decimals and thousands separators.
///
/// ```
/// use recon_core::formatting::format_amount;
/// use rust_decimal::Decimal;
///
/// assert_eq!(format_amount(Decimal::new(123456, 2)), "1,234.56");
/// assert_eq!(format_amount(Decimal::from(50)), "50.00");
/// ```
pub fn format_amount(amount: Decimal) -> String {
    format_number(amount, 2)
}

/// Plain decimal text for machine-readable output (CSV cells).
///
/// Trailing zeros are dropped so `50.00` becomes `50` and `12.50` becomes
/// `12.5`.
pub fn amount_cell(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(s: &str) -> String {
    if s.len() <= 3 {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let remainder = chars.len() % 3;
    for (i, &c) in chars.iter().enumerate() {
        if i != 0 && (i % 3 == remainder) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
