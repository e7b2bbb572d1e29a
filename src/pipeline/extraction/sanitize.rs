/// Sanitize recognized or typed text before date matching.
///
/// Folds full-width digits and separators to ASCII (IME input and CJK OCR
/// output both produce them), turns the CJK date markers 年/月/日 into
/// separators, strips control characters and trims every line.
pub fn sanitize_date_text(raw: &str) -> String {
    raw.chars()
        .filter_map(fold_char)
        .collect::<String>()
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn fold_char(c: char) -> Option<char> {
    let folded = match c {
        '\u{FF10}'..='\u{FF19}' => {
            // Full-width digits sit at a fixed offset from ASCII '0'.
            char::from_u32(c as u32 - 0xFF10 + '0' as u32)?
        }
        '\u{FF0F}' => '/',
        '\u{FF0D}' | '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => '-',
        '\u{FF0E}' | '\u{3002}' => '.',
        '\u{3000}' => ' ',
        '年' | '月' => '-',
        '日' => ' ',
        '\n' | '\t' | ' ' => c,
        c if c.is_control() => return None,
        c => c,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_full_width_digits() {
        assert_eq!(sanitize_date_text("２００１／０７／１５"), "2001/07/15");
    }

    #[test]
    fn folds_cjk_date_markers() {
        assert_eq!(sanitize_date_text("2001年7月15日"), "2001-7-15");
    }

    #[test]
    fn folds_dash_variants() {
        assert_eq!(sanitize_date_text("2001\u{2013}07\u{2212}15"), "2001-07-15");
    }

    #[test]
    fn strips_control_characters() {
        let clean = sanitize_date_text("2001\x00/07\x01/15");
        assert_eq!(clean, "2001/07/15");
    }

    #[test]
    fn collapses_blank_lines_and_trims() {
        let clean = sanitize_date_text("  Date of birth  \n\n\n  2001/07/15 \n");
        assert_eq!(clean, "Date of birth\n2001/07/15");
    }

    #[test]
    fn leaves_other_text_alone() {
        assert_eq!(sanitize_date_text("Date of birth: 15.07.2001"), "Date of birth: 15.07.2001");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(sanitize_date_text(""), "");
        assert_eq!(sanitize_date_text("\n\n"), "");
    }
}
