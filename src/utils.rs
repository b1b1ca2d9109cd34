use crate::error::{BftError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Canonical form of a fund, fund center or cost center code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// First letter upper-cased, the rest lower-cased.
pub fn capitalize(value: &str) -> String {
    let value = value.trim();
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Parses a report amount such as `1,234.56` or `1,234.56-` into a 2-decimal value.
/// An empty field is read as zero.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let (body, negative) = match trimmed.strip_suffix('-') {
        Some(body) => (body.trim(), true),
        None => (trimmed, false),
    };
    let cleaned: String = body.chars().filter(|c| *c != ',').collect();

    let mut amount =
        Decimal::from_str(&cleaned).map_err(|_| BftError::InvalidAmount(raw.to_string()))?;
    if negative {
        amount = -amount;
    }
    Ok(amount.round_dp(2))
}

/// Parses a report due date (`YYYY.MM.DD`). An empty field yields `None`.
pub fn parse_report_date(raw: &str) -> Result<Option<NaiveDate>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, "%Y.%m.%d")
        .map(Some)
        .map_err(|_| BftError::InvalidDate(raw.to_string()))
}

/// Half-open window of fiscal years accepted around `fy`: `[fy - radius, fy + radius)`.
pub fn fiscal_year_window(fy: i32, radius: i32) -> std::ops::Range<i32> {
    (fy - radius)..(fy + radius)
}

pub fn validate_fiscal_year(fy: i32, window: &std::ops::Range<i32>) -> Result<()> {
    if !window.contains(&fy) {
        return Err(BftError::InvalidFiscalYear {
            fy,
            first: window.start,
            last: window.end,
        });
    }
    Ok(())
}

/// Quarter a period falls into. Periods 13 and 14 are year-end adjustment periods.
pub fn quarter_for_period(period: u32) -> Result<u8> {
    match period {
        1..=3 => Ok(1),
        4..=6 => Ok(2),
        7..=9 => Ok(3),
        10..=14 => Ok(4),
        _ => Err(BftError::InvalidPeriod(period)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_with_separators() {
        assert_eq!(parse_amount("1,234.56").unwrap(), Decimal::new(123456, 2));
        assert_eq!(parse_amount("  0.00 ").unwrap(), Decimal::ZERO);
        assert_eq!(parse_amount("").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_parse_amount_trailing_minus() {
        assert_eq!(parse_amount("1,000.50-").unwrap(), Decimal::new(-100050, 2));
    }

    #[test]
    fn test_parse_amount_rejects_text() {
        assert!(matches!(
            parse_amount("abc"),
            Err(BftError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_parse_report_date() {
        assert_eq!(
            parse_report_date("2023.11.30").unwrap(),
            NaiveDate::from_ymd_opt(2023, 11, 30)
        );
        assert_eq!(parse_report_date("").unwrap(), None);
        assert!(parse_report_date("30/11/2023").is_err());
    }

    #[test]
    fn test_fiscal_year_window_is_half_open() {
        let window = fiscal_year_window(2024, 4);
        assert!(validate_fiscal_year(2020, &window).is_ok());
        assert!(validate_fiscal_year(2027, &window).is_ok());
        assert!(validate_fiscal_year(2028, &window).is_err());
        assert!(validate_fiscal_year(2019, &window).is_err());
    }

    #[test]
    fn test_quarter_for_period() {
        assert_eq!(quarter_for_period(1).unwrap(), 1);
        assert_eq!(quarter_for_period(6).unwrap(), 2);
        assert_eq!(quarter_for_period(9).unwrap(), 3);
        assert_eq!(quarter_for_period(14).unwrap(), 4);
        assert!(quarter_for_period(0).is_err());
        assert!(quarter_for_period(15).is_err());
    }

    #[test]
    fn test_capitalize_and_normalize() {
        assert_eq!(capitalize("bASEMENT"), "Basement");
        assert_eq!(normalize_code(" 8484wa "), "8484WA");
    }
}
