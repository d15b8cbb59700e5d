//! Parsing of quantity-with-unit strings.
//!
//! Entity files carry quantities as plain text: `50g`, `1.5 l`,
//! `1 1/2 cups`, `2-3 cloves`. Parsing never fails; strings that carry no
//! measurable amount (`to taste`, a bare number, an empty string) become
//! [`Quantity::Unspecified`] and the caller decides what that means.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A numeric amount with the unit token as written (lowercased).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: Decimal,
    pub unit: String,
}

impl Amount {
    pub fn new(value: Decimal, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Outcome of parsing a quantity string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quantity {
    Measured(Amount),
    /// The string does not describe a measurable amount.
    Unspecified,
}

impl Quantity {
    pub fn amount(&self) -> Option<&Amount> {
        match self {
            Quantity::Measured(a) => Some(a),
            Quantity::Unspecified => None,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, Quantity::Unspecified)
    }
}

static NON_MEASURABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(to taste|pinch|handful|dash|splash)\b").expect("non measurable regex")
});

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^
        (?P<whole>\d+(?:\.\d+)?)
        (?:
            \s+(?P<mixn>\d+)\s*/\s*(?P<mixd>\d+)    # mixed fraction: 1 1/2
          | \s*/\s*(?P<den>\d+)                     # bare fraction: 1/2
          | \s*-\s*(?P<high>\d+(?:\.\d+)?)          # range: 2-3
        )?
        \s*
        (?P<unit>\p{Alphabetic}[\p{Alphabetic}\ -]*?)
        \s*$",
    )
    .expect("quantity regex")
});

/// Parse a quantity-with-unit string.
///
/// Ranges take the maximum of the two values so that downstream costing
/// stays conservative.
pub fn parse(input: &str) -> Quantity {
    let input = input.trim();
    if input.is_empty() || NON_MEASURABLE.is_match(input) {
        return Quantity::Unspecified;
    }
    let Some(caps) = QUANTITY.captures(input) else {
        return Quantity::Unspecified;
    };

    let Some(whole) = decimal(&caps["whole"]) else {
        return Quantity::Unspecified;
    };

    let value = if let (Some(n), Some(d)) = (caps.name("mixn"), caps.name("mixd")) {
        match fraction(n.as_str(), d.as_str()) {
            Some(f) => whole + f,
            None => return Quantity::Unspecified,
        }
    } else if let Some(d) = caps.name("den") {
        // the leading number is the numerator
        match fraction(&caps["whole"], d.as_str()) {
            Some(f) => f,
            None => return Quantity::Unspecified,
        }
    } else if let Some(high) = caps.name("high") {
        match decimal(high.as_str()) {
            Some(h) => whole.max(h),
            None => return Quantity::Unspecified,
        }
    } else {
        whole
    };

    let unit = collapse_spaces(&caps["unit"].to_lowercase());

    Quantity::Measured(Amount { value, unit })
}

fn decimal(s: &str) -> Option<Decimal> {
    s.parse::<Decimal>().ok()
}

fn fraction(num: &str, den: &str) -> Option<Decimal> {
    let n = decimal(num)?;
    let d = decimal(den)?;
    n.checked_div(d)
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Singular form of a unit token: `slices` becomes `slice`, `cups` becomes
/// `cup`. Tokens already singular (or ending in a double `s`) are unchanged.
pub fn singular(unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    if unit.len() > 1 && unit.ends_with('s') && !unit.ends_with("ss") {
        unit[..unit.len() - 1].to_string()
    } else {
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case("50g", dec!(50), "g" ; "no space")]
    #[test_case("1.5 l", dec!(1.5), "l" ; "decimal with space")]
    #[test_case("1 1/2 cups", dec!(1.5), "cups" ; "mixed fraction")]
    #[test_case("1/2 cup", dec!(0.5), "cup" ; "bare fraction")]
    #[test_case("2-3 cloves", dec!(3), "cloves" ; "range takes max")]
    #[test_case("3 - 2 cloves", dec!(3), "cloves" ; "reversed range still max")]
    #[test_case("100 ml", dec!(100), "ml" ; "plain integer")]
    #[test_case("2 FL OZ", dec!(2), "fl oz" ; "unit lowercased, inner space kept")]
    #[test_case("1 Loaf", dec!(1), "loaf" ; "count unit")]
    fn measured(input: &str, value: Decimal, unit: &str) {
        assert_eq!(
            parse(input),
            Quantity::Measured(Amount::new(value, unit)),
            "{input}"
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[test_case("to taste" ; "to taste")]
    #[test_case("a pinch" ; "pinch")]
    #[test_case("Handful" ; "handful case insensitive")]
    #[test_case("dash of paprika" ; "dash")]
    #[test_case("splash" ; "splash")]
    #[test_case("3" ; "no unit token")]
    #[test_case("1/0 cup" ; "zero denominator")]
    fn unspecified(input: &str) {
        assert_eq!(parse(input), Quantity::Unspecified, "{input}");
    }

    #[test_case("slices", "slice")]
    #[test_case("cups", "cup")]
    #[test_case("g", "g")]
    #[test_case("glass", "glass" ; "double s untouched")]
    #[test_case("Loaf", "loaf")]
    #[test_case("s", "s" ; "single letter")]
    fn singular_forms(unit: &str, expected: &str) {
        assert_eq!(singular(unit), expected);
    }
}
