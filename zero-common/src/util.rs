//! Utility functions for Zero services.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// This function safely handles multi-byte UTF-8 characters (emoji, CJK, accented characters)
/// by using character boundaries instead of byte indices.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Median of a slice of durations in seconds. `None` for an empty slice.
///
/// For an even count the mean of the two middle values is returned.
pub fn median_secs(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("😀😀😀😀", 2), "😀😀...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_median_secs() {
        assert_eq!(median_secs(&[]), None);
        assert_eq!(median_secs(&[3.0]), Some(3.0));
        assert_eq!(median_secs(&[5.0, 1.0, 3.0]), Some(3.0));
        assert_eq!(median_secs(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }
}
