//! Resource quantity comparison.
//!
//! The API server rewrites quantities into canonical form (`0.5` is stored as
//! `500m`, `1024Mi` as `1Gi`), so requests and limits are compared by value.
//! Values are held exactly as nano-units in an `i128`.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

const NANO_EXPONENT: i32 = 9;

fn suffix_scale(suffix: &str) -> Option<(i32, u32)> {
    // (decimal exponent, binary exponent)
    let scale = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        _ => return None,
    };
    Some(scale)
}

/// Exponent of `1.5e3` style notation; a bare `E` is the exa suffix.
fn exponent(rest: &str) -> Option<i32> {
    let tail = rest.strip_prefix(['e', 'E'])?;
    let digits_start = usize::from(tail.starts_with(['+', '-']));
    if tail.len() == digits_start || !tail[digits_start..].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

/// Exact value of `raw` in nano-units, or `None` when it does not parse.
pub fn nano_value(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let (negative, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, rest) = unsigned.split_at(number_end);
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
        return None;
    }

    let (exp10, exp2) = match exponent(rest) {
        Some(exp) => (exp, 0),
        None => suffix_scale(rest)?,
    };

    let mut mantissa: i128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(digit - b'0'))?;
    }
    mantissa = mantissa.checked_mul(1i128.checked_shl(exp2)?)?;

    let fraction_len = i32::try_from(fraction.len()).ok()?;
    let shift = exp10.checked_add(NANO_EXPONENT)?.checked_sub(fraction_len)?;
    let value = if shift >= 0 {
        mantissa.checked_mul(10i128.checked_pow(shift.unsigned_abs())?)?
    } else {
        let divisor = 10i128.checked_pow(shift.unsigned_abs())?;
        // Sub-nano precision is below anything the API server keeps
        if mantissa % divisor != 0 {
            return None;
        }
        mantissa / divisor
    };
    Some(if negative { -value } else { value })
}

/// Whether two quantities denote the same amount. Unparseable values fall back
/// to comparing the raw text.
pub fn same_quantity(a: &Quantity, b: &Quantity) -> bool {
    match (nano_value(&a.0), nano_value(&b.0)) {
        (Some(x), Some(y)) => x == y,
        _ => a.0.trim() == b.0.trim(),
    }
}

/// Whether two resource maps hold the same keys with equal quantities.
pub fn same_quantities(a: &BTreeMap<String, Quantity>, b: &BTreeMap<String, Quantity>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && same_quantity(va, vb))
}
