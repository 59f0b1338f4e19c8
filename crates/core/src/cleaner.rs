/// Normalizes raw OCR output into a single line: line breaks become spaces,
/// whitespace runs collapse to one space, and the ends are trimmed.
pub fn clean_text(raw: Option<&str>) -> String {
    match raw {
        Some(text) if !text.is_empty() => clean(text),
        _ => String::new(),
    }
}

pub fn clean(raw: &str) -> String {
    // `\r` and `\n` are whitespace, so splitting covers the line-break pass too.
    raw.split(is_separator)
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unicode whitespace plus the ASCII file/group/record/unit separators
/// (U+001C..=U+001F), which regex `\s` also treats as whitespace.
fn is_separator(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::{clean, clean_text};

    #[test]
    fn line_breaks_and_runs_collapse() {
        let input = "  Buy milk\r\n\r\nand   eggs\tbefore\nFriday  ";
        assert_eq!(clean(input), "Buy milk and eggs before Friday");
    }

    #[test]
    fn empty_and_absent_input_yield_empty_string() {
        assert_eq!(clean(""), "");
        assert_eq!(clean_text(None), "");
        assert_eq!(clean_text(Some("")), "");
        assert_eq!(clean_text(Some(" \n\r ")), "");
    }

    #[test]
    fn non_ascii_text_is_preserved() {
        assert_eq!(clean("Café\u{a0}\nnaïve  résumé"), "Café naïve résumé");
    }

    #[test]
    fn ascii_separator_controls_count_as_whitespace() {
        assert_eq!(clean("a\u{1f}b\u{1c}\u{1d}c\u{1e}"), "a b c");
    }

    #[test]
    fn cleaned_output_has_no_breaks_or_double_spaces() {
        let samples = [
            "a\r\rb",
            "\n\nleading",
            "trailing\n\n",
            "mixed \t\r\n  tokens  here",
            "single",
            "   ",
        ];

        for sample in samples {
            let cleaned = clean(sample);
            assert!(!cleaned.contains('\r'), "{cleaned:?}");
            assert!(!cleaned.contains('\n'), "{cleaned:?}");
            assert!(!cleaned.contains("  "), "{cleaned:?}");
            assert_eq!(cleaned.trim(), cleaned);
        }
    }
}
