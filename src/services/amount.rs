//! Parsing of locale-flexible SEK amounts out of OCR text.
//!
//! Receipts arrive as free text with mixed thousand/decimal separators
//! ("1 234,00 kr", "1.234 SEK", "150kr"). Amounts are whole SEK; öre are
//! rounded away.

use once_cell::sync::Lazy;
use regex::Regex;

/// Amounts outside this window are OCR noise (page numbers, dates, OCR:ed
/// account numbers).
const MIN_PLAUSIBLE: i64 = 1;
const MAX_PLAUSIBLE: i64 = 199_999;

static THOUSANDS_DOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(\d{3})\b").expect("static regex"));

/// Money token next to a currency marker, possibly across whitespace and
/// line breaks.
static MONEY_WITH_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([+-]?\d{1,3}(?:[ .]\d{3})*(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)\s*(?:kr|sek)\b")
        .expect("static regex")
});

/// Number on its own line, currency marker on the next.
static SPLIT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([+-]?\d+(?:[.,]\d{1,2})?)\s*[\r\n]+\s*(?:kr|sek)\b").expect("static regex")
});

/// Number within a few characters of an amount keyword.
static NEAR_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:amount|summa|belopp|paid|betalt)[^\d]{0,15}([+-]?\d{1,3}(?:[ .]\d{3})*(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)",
    )
    .expect("static regex")
});

/// Parses a raw currency string into whole SEK. Never fails: strips
/// currency symbols and unicode spaces, collapses a `.` thousands
/// separator (dot before exactly three trailing digits), maps the decimal
/// comma to a dot, rounds to the nearest whole unit. Unparsable input
/// yields 0.
pub fn normalize_amount(raw: &str) -> i64 {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '+' | '-'))
        .collect();

    let collapsed = THOUSANDS_DOT.replace_all(&kept, "$1");
    let decimal = collapsed.replace(',', ".");
    let unsigned = decimal.trim_start_matches(['+', '-']);

    match unsigned.parse::<f64>() {
        Ok(n) if n.is_finite() => n.round() as i64,
        _ => 0,
    }
}

fn plausible(v: i64) -> bool {
    (MIN_PLAUSIBLE..=MAX_PLAUSIBLE).contains(&v)
}

/// Scans free OCR text for a payment amount in SEK.
///
/// Pass 1 collects every money token adjacent to a currency marker and
/// returns the maximum; receipts often show subtotal and total, and the
/// total is assumed to be the largest. Pass 2 catches a number with the
/// currency marker on the following line. Pass 3 falls back to proximity
/// with amount keywords. Returns None when nothing plausible is found.
pub fn extract_amount(text: &str) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c == '\u{00A0}' || ('\u{2000}'..='\u{200A}').contains(&c) || c == '\u{202F}' {
                ' '
            } else {
                c
            }
        })
        .collect();

    let candidates: Vec<i64> = MONEY_WITH_CURRENCY
        .captures_iter(&cleaned)
        .map(|m| normalize_amount(&m[1]))
        .filter(|v| plausible(*v))
        .collect();
    if let Some(max) = candidates.into_iter().max() {
        return Some(max);
    }

    for m in SPLIT_LINE.captures_iter(&cleaned) {
        let v = normalize_amount(&m[1]);
        if plausible(v) {
            return Some(v);
        }
    }

    if let Some(m) = NEAR_KEYWORD.captures(&cleaned) {
        let v = normalize_amount(&m[1]);
        if plausible(v) {
            return Some(v);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_swedish_formats() {
        assert_eq!(normalize_amount("1 234,00 kr"), 1234);
        assert_eq!(normalize_amount("150kr"), 150);
        assert_eq!(normalize_amount("1.234"), 1234);
        assert_eq!(normalize_amount("1.234,50"), 1235);
        assert_eq!(normalize_amount("625,00"), 625);
        assert_eq!(normalize_amount("+80"), 80);
        assert_eq!(normalize_amount("-80"), 80);
    }

    #[test]
    fn normalize_never_panics_on_garbage() {
        assert_eq!(normalize_amount(""), 0);
        assert_eq!(normalize_amount("kr"), 0);
        assert_eq!(normalize_amount("..,,"), 0);
    }

    #[test]
    fn extract_prefers_largest_currency_candidate() {
        let text = "Subtotal 500 kr\nMoms 125 kr\nTotalt 625 kr";
        assert_eq!(extract_amount(text), Some(625));
    }

    #[test]
    fn extract_reads_keyword_proximity() {
        assert_eq!(extract_amount("Belopp: 625,00 kr"), Some(625));
        assert_eq!(extract_amount("Summa att betala 1 234,00"), Some(1234));
    }

    #[test]
    fn extract_split_line() {
        assert_eq!(extract_amount("Swish betalning\n450\nkr"), Some(450));
    }

    #[test]
    fn extract_rejects_implausible() {
        assert_eq!(extract_amount("ref 20250814 utan valuta"), None);
        assert_eq!(extract_amount("999999 kr"), None);
        assert_eq!(extract_amount(""), None);
    }

    #[test]
    fn receipt_round_trip() {
        for (text, amount) in [("1 234,00 kr", 1234), ("150kr", 150), ("625,00 kr", 625)] {
            assert_eq!(extract_amount(text), Some(amount));
        }
    }
}
