//! Storage quantities such as `10Gi` or `500M`.
//!
//! Claims arriving over the event bridge may express their request either as
//! a plain byte count or in Kubernetes quantity notation.

use serde::{Deserialize, Deserializer, de};

const SUFFIXES: &[(&str, u64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("Pi", 1 << 50),
    ("Ei", 1 << 60),
    ("k", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("E", 1_000_000_000_000_000_000),
];

/// Scale factor of a suffix as `numerator / denominator`.
fn scale(suffix: &str) -> Option<(u128, u128)> {
    if suffix.is_empty() {
        return Some((1, 1));
    }
    if suffix == "m" {
        return Some((1, 1_000));
    }
    if let Some(&(_, mult)) = SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some((u128::from(mult), 1));
    }
    // Decimal exponent, e.g. `1e3` or `15E-1`.
    let exp = suffix.strip_prefix(['e', 'E'])?;
    let (negative, digits) = match exp.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, exp.strip_prefix('+').unwrap_or(exp)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let power = 10u128.checked_pow(digits.parse().ok()?)?;
    Some(if negative { (1, power) } else { (power, 1) })
}

/// Parse a quantity into bytes.
///
/// Fractions are allowed (`1.5Gi`, `0.5Ti`, `500m`) and are rounded up to
/// the next whole byte.
pub fn parse_quantity(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("quantity {s:?} has no number"));
    }
    if fraction.contains('.') {
        return Err(format!("quantity {s:?} has more than one decimal point"));
    }
    let (num, den) = scale(suffix).ok_or_else(|| format!("quantity {s:?} has unknown suffix"))?;

    let overflow = || format!("quantity {s:?} overflows");
    let mut mantissa: u128 = 0;
    for b in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)
            .and_then(|m| m.checked_add(u128::from(b - b'0')))
            .ok_or_else(overflow)?;
    }
    let fraction_len = u32::try_from(fraction.len()).map_err(|_| overflow())?;
    let divisor = 10u128
        .checked_pow(fraction_len)
        .and_then(|d| d.checked_mul(den))
        .ok_or_else(overflow)?;
    let bytes = mantissa
        .checked_mul(num)
        .ok_or_else(overflow)?
        .div_ceil(divisor);
    u64::try_from(bytes).map_err(|_| overflow())
}

/// `deserialize_with` helper accepting either a byte count or a quantity
/// string.
pub fn deserialize_bytes<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Quantity(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Bytes(b) => Ok(b),
        Raw::Quantity(q) => parse_quantity(&q).map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_and_decimal_suffixes() {
        assert_eq!(parse_quantity("10Gi").unwrap(), 10 * 1024 * 1024 * 1024);
        assert_eq!(parse_quantity("512Mi").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_quantity("5G").unwrap(), 5_000_000_000);
        assert_eq!(parse_quantity("3k").unwrap(), 3_000);
        assert_eq!(parse_quantity("4096").unwrap(), 4096);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), 3 << 29);
        assert_eq!(parse_quantity("0.5Ti").unwrap(), 1 << 39);
        assert_eq!(parse_quantity(".5Ki").unwrap(), 512);
        assert_eq!(parse_quantity("2.5G").unwrap(), 2_500_000_000);
    }

    #[test]
    fn fractions_round_up_to_whole_bytes() {
        assert_eq!(parse_quantity("1.1").unwrap(), 2);
        assert_eq!(parse_quantity("500m").unwrap(), 1);
        assert_eq!(parse_quantity("2000m").unwrap(), 2);
        assert_eq!(parse_quantity("0.001Ki").unwrap(), 2);
    }

    #[test]
    fn exponent_notation() {
        assert_eq!(parse_quantity("1e3").unwrap(), 1_000);
        assert_eq!(parse_quantity("12E6").unwrap(), 12_000_000);
        assert_eq!(parse_quantity("15e-1").unwrap(), 2);
        assert_eq!(parse_quantity("1E").unwrap(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_quantity("Gi").is_err());
        assert!(parse_quantity("ten").is_err());
        assert!(parse_quantity("1.2.3Gi").is_err());
        assert!(parse_quantity(".Gi").is_err());
        assert!(parse_quantity("-1Gi").is_err());
        assert!(parse_quantity("1Xi").is_err());
        assert!(parse_quantity("1e").is_err());
        assert!(parse_quantity("100000Ei").is_err());
    }

    #[test]
    fn deserializes_number_or_string() {
        #[derive(Deserialize)]
        struct Req {
            #[serde(deserialize_with = "deserialize_bytes")]
            size: u64,
        }
        let a: Req = serde_json::from_str(r#"{"size": 2048}"#).unwrap();
        let b: Req = serde_json::from_str(r#"{"size": "2Ki"}"#).unwrap();
        assert_eq!(a.size, b.size);
        assert!(serde_json::from_str::<Req>(r#"{"size": "lots"}"#).is_err());
    }
}
