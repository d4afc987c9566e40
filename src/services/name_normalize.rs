/// Canonicalizes a free-text name into the membership lookup key:
/// lowercase, diacritics folded to ASCII, punctuation dropped, whitespace
/// collapsed. Pure and total: differing capitalization, accents or
/// spacing must never cause a false membership mismatch.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;

    let mut push = |c: char, out: &mut String, pending: &mut bool| {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if *pending && !out.is_empty() {
                out.push(' ');
            }
            *pending = false;
            out.push(c);
        } else {
            // whitespace and punctuation both act as separators
            *pending = true;
        }
    };

    for c in name.chars() {
        match fold_char(c) {
            Some(folded) => {
                for f in folded.chars() {
                    push(f, &mut out, &mut pending_space);
                }
            }
            None => push(c, &mut out, &mut pending_space),
        }
    }

    out
}

/// Maps accented Latin letters to their ASCII base. Covers the Latin-1
/// supplement plus the ligatures that show up in the member directory;
/// anything unmapped falls through to `normalize_name` unchanged (and is
/// dropped there if non-alphanumeric).
fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "a",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' | 'ı' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' | 'İ' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ő' => "o",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => "u",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ç' | 'ć' | 'č' | 'Ç' | 'Ć' | 'Č' => "c",
        'ñ' | 'ń' | 'ň' | 'Ñ' | 'Ń' | 'Ň' => "n",
        'ś' | 'š' | 'Ś' | 'Š' => "s",
        'ź' | 'ż' | 'ž' | 'Ź' | 'Ż' | 'Ž' => "z",
        'ł' | 'Ł' => "l",
        'ð' | 'Ð' => "d",
        'þ' | 'Þ' => "th",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accent_and_case_insensitive() {
        assert_eq!(normalize_name("Örjan Åström"), normalize_name("orjan astrom"));
        assert_eq!(normalize_name("Örjan Åström"), "orjan astrom");
    }

    #[test]
    fn collapses_whitespace_and_punctuation() {
        assert_eq!(normalize_name("  Anna-Lena   O'Brien "), "anna lena o brien");
    }

    #[test]
    fn total_on_weird_input() {
        assert_eq!(normalize_name(""), "");
        assert_eq!(normalize_name("!!!"), "");
        assert_eq!(normalize_name("日本 123"), "123");
    }

    #[test]
    fn nordic_letters() {
        assert_eq!(normalize_name("Ægir Møller-Señor"), "aegir moller senor");
    }
}
