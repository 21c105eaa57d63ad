//! Display formatting for prices and market metrics. Pure functions, no
//! locale machinery: the dashboard always renders en-US style output.

/// Currency with a dollar sign, thousands separators and exactly two
/// decimals, e.g. `$65,432.10`.
pub fn format_currency(value: f64) -> String {
    let negative = value < 0.0;
    let cents = (value.abs() * 100.0).round() as u128;
    let whole = cents / 100;
    let fraction = cents % 100;

    let grouped = group_thousands(&whole.to_string());
    if negative {
        format!("-${grouped}.{fraction:02}")
    } else {
        format!("${grouped}.{fraction:02}")
    }
}

/// Thousands separators, keeping up to two decimals and trimming trailing
/// zeros, e.g. `1,234,567` or `65,432.1`.
pub fn format_number(value: f64) -> String {
    let negative = value < 0.0;
    let hundredths = (value.abs() * 100.0).round() as u128;
    let whole = hundredths / 100;
    let fraction = hundredths % 100;

    let mut rendered = group_thousands(&whole.to_string());
    if fraction != 0 {
        let digits = format!("{fraction:02}");
        rendered.push('.');
        rendered.push_str(digits.trim_end_matches('0'));
    }
    if negative {
        rendered.insert(0, '-');
    }
    rendered
}

/// Abbreviated magnitude with a K/M/B/T suffix; absent values render as
/// `N/A`.
pub fn format_large_number(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "N/A".to_string();
    };

    if value >= 1_000_000_000_000.0 {
        format!("{:.2}T", value / 1_000_000_000_000.0)
    } else if value >= 1_000_000_000.0 {
        format!("{:.2}B", value / 1_000_000_000.0)
    } else if value >= 1_000_000.0 {
        format!("{:.2}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("{:.2}K", value / 1_000.0)
    } else {
        format_number(value)
    }
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_groups_and_pads_two_decimals() {
        assert_eq!(format_currency(65_432.10), "$65,432.10");
        assert_eq!(format_currency(0.5), "$0.50");
        assert_eq!(format_currency(1_000_000.0), "$1,000,000.00");
    }

    #[test]
    fn currency_handles_negative_values() {
        assert_eq!(format_currency(-1_234.5), "-$1,234.50");
    }

    #[test]
    fn number_groups_and_trims_fraction() {
        assert_eq!(format_number(1_234_567.0), "1,234,567");
        assert_eq!(format_number(65_432.1), "65,432.1");
        assert_eq!(format_number(0.25), "0.25");
    }

    #[test]
    fn large_number_picks_magnitude_suffix() {
        assert_eq!(format_large_number(Some(1_258_000_000_000.0)), "1.26T");
        assert_eq!(format_large_number(Some(93_000_000_000.0)), "93.00B");
        assert_eq!(format_large_number(Some(19_200_000.0)), "19.20M");
        assert_eq!(format_large_number(Some(4_500.0)), "4.50K");
        assert_eq!(format_large_number(Some(999.0)), "999");
    }

    #[test]
    fn large_number_absent_is_not_available() {
        assert_eq!(format_large_number(None), "N/A");
    }
}
