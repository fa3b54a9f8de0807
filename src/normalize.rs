//! Address clean-up applied before any provider call.

/// Longest address the geocoding endpoint accepts, in characters.
pub const MAX_ADDRESS_CHARS: usize = 100;

/// Shortest normalized address worth sending for a stored location.
pub const MIN_ADDRESS_CHARS: usize = 2;

/// Strips disallowed characters, collapses whitespace runs into a single
/// space, trims and bounds the result to [`MAX_ADDRESS_CHARS`].
///
/// Retained characters: CJK ideographs (U+4E00..=U+9FA5), ASCII letters and
/// digits, whitespace, `-` and `|` (the provider's multi-address separator).
pub fn normalize(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars().filter(|ch| is_allowed(*ch)) {
        if ch.is_whitespace() {
            pending_space = !cleaned.is_empty();
            continue;
        }
        if pending_space {
            cleaned.push(' ');
            pending_space = false;
        }
        cleaned.push(ch);
    }

    if cleaned.chars().count() > MAX_ADDRESS_CHARS {
        cleaned = cleaned.chars().take(MAX_ADDRESS_CHARS).collect();
        cleaned.truncate(cleaned.trim_end().len());
    }
    cleaned
}

fn is_cjk(ch: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&ch)
}

fn is_allowed(ch: char) -> bool {
    is_cjk(ch) || ch.is_ascii_alphanumeric() || ch.is_whitespace() || ch == '-' || ch == '|'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_collapses_whitespace() {
        assert_eq!(normalize("  北京市   朝阳区\t\n建国路  "), "北京市 朝阳区 建国路");
    }

    #[test]
    fn strips_disallowed_characters() {
        assert_eq!(normalize("上海市（浦东新区），世纪大道100号！"), "上海市浦东新区世纪大道100号");
        assert_eq!(normalize("Room B-12 | 杭州"), "Room B-12 | 杭州");
        assert_eq!(normalize("@#$%"), "");
    }

    #[test]
    fn stripping_never_leaves_double_spaces() {
        assert_eq!(normalize("a ! b"), "a b");
        assert_eq!(normalize("! a"), "a");
    }

    #[test]
    fn truncates_to_provider_limit() {
        let long = "北".repeat(150);
        let normalized = normalize(&long);
        assert_eq!(normalized.chars().count(), MAX_ADDRESS_CHARS);
    }

    #[test]
    fn truncation_does_not_leave_trailing_space() {
        let input = format!("{} 尾巴", "市".repeat(99));
        let normalized = normalize(&input);
        assert_eq!(normalized.chars().count(), 99);
        assert_eq!(normalize(&normalized), normalized);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = vec![
            "北京朝阳区附近".to_string(),
            "  上海 浦东 一带 !! ".to_string(),
            "广东省广州市天河区体育西路103号B座2单元1101室".to_string(),
            "a ! b ? c".to_string(),
            "|| -- ||".to_string(),
            "１２３ full-width digits".to_string(),
            format!("{}  x", "区".repeat(99)),
            "东 ".repeat(80),
        ];
        for sample in &samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }
}
