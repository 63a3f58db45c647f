//! Exact parsing of Kubernetes resource quantities (`500m`, `0.1Gi`, `1e3`).
//!
//! Values are kept as reduced fractions so that `0.1Gi` and `107374182400m`
//! compare equal without floating point rounding.

use serde_json::Value as Json;

/// Reduced fraction `num / den`, `den > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    num: i128,
    den: i128,
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn pow(base: i128, exp: u32) -> Option<i128> { base.checked_pow(exp) }

impl Quantity {
    fn new(num: i128, den: i128) -> Option<Self> {
        if den == 0 { return None; }
        let g = gcd(num, den).max(1);
        let (mut num, mut den) = (num / g, den / g);
        if den < 0 { num = -num; den = -den; }
        Some(Self { num, den })
    }

    fn scale(self, mul: i128, div: i128) -> Option<Self> {
        let num = self.num.checked_mul(mul)?;
        let den = self.den.checked_mul(div)?;
        Self::new(num, den)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() { return None; }
        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let num_end = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(num_end);
        if number.is_empty() || number == "." || number.matches('.').count() > 1 { return None; }

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        let digits = format!("{}{}", int_part, frac_part);
        let mantissa: i128 = digits.parse().ok()?;
        let mut q = Self::new(mantissa, pow(10, frac_part.len() as u32)?)?;
        if negative { q.num = -q.num; }

        let q = match suffix {
            "" => q,
            "Ki" => q.scale(pow(2, 10)?, 1)?,
            "Mi" => q.scale(pow(2, 20)?, 1)?,
            "Gi" => q.scale(pow(2, 30)?, 1)?,
            "Ti" => q.scale(pow(2, 40)?, 1)?,
            "Pi" => q.scale(pow(2, 50)?, 1)?,
            "Ei" => q.scale(pow(2, 60)?, 1)?,
            "n" => q.scale(1, pow(10, 9)?)?,
            "u" => q.scale(1, pow(10, 6)?)?,
            "m" => q.scale(1, pow(10, 3)?)?,
            "k" => q.scale(pow(10, 3)?, 1)?,
            "M" => q.scale(pow(10, 6)?, 1)?,
            "G" => q.scale(pow(10, 9)?, 1)?,
            "T" => q.scale(pow(10, 12)?, 1)?,
            "P" => q.scale(pow(10, 15)?, 1)?,
            "E" => q.scale(pow(10, 18)?, 1)?,
            exp if exp.starts_with('e') || exp.starts_with('E') => {
                let e: i32 = exp[1..].parse().ok()?;
                if e >= 0 { q.scale(pow(10, e as u32)?, 1)? } else { q.scale(1, pow(10, e.unsigned_abs())?)? }
            }
            _ => return None,
        };
        Some(q)
    }

    /// Parse a document value: strings and plain numbers are accepted.
    pub fn from_json(v: &Json) -> Option<Self> {
        match v {
            Json::String(s) => Self::parse(s),
            Json::Number(n) => Self::parse(&n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_and_milli_forms_match() {
        assert_eq!(Quantity::parse("0.1Gi"), Quantity::parse("107374182400m"));
        assert_eq!(Quantity::parse("0.2Gi"), Quantity::parse("214748364800m"));
        assert_ne!(Quantity::parse("0.1Gi"), Quantity::parse("0.2Gi"));
    }

    #[test]
    fn decimal_suffixes_and_exponents() {
        assert_eq!(Quantity::parse("1k"), Quantity::parse("1000"));
        assert_eq!(Quantity::parse("1e3"), Quantity::parse("1k"));
        assert_eq!(Quantity::parse("1E"), Quantity::parse("1e18"));
        assert_eq!(Quantity::parse("500m"), Quantity::parse("0.5"));
        assert_eq!(Quantity::parse("1.5Mi"), Quantity::parse("1536Ki"));
        assert_eq!(Quantity::parse("-2"), Quantity::parse("-2000m"));
    }

    #[test]
    fn numbers_in_documents() {
        assert_eq!(Quantity::from_json(&serde_json::json!(1)), Quantity::parse("1000m"));
        assert_eq!(Quantity::from_json(&serde_json::json!("250m")), Quantity::parse("0.25"));
        assert_eq!(Quantity::from_json(&serde_json::json!(true)), None);
    }

    #[test]
    fn rejects_garbage() {
        for s in ["", "Gi", "1..2", "1Xi", "abc", "1e", "."] {
            assert_eq!(Quantity::parse(s), None, "{}", s);
        }
    }
}
