//! Query-focused excerpts for result presentation.

/// Default excerpt width in characters.
pub const DEFAULT_EXCERPT_LENGTH: usize = 300;

const ELLIPSIS: &str = "...";

/// Picks the passage of `content` most relevant to `query`.
///
/// The first newline-delimited paragraph containing any query term
/// (case-insensitive substring) is returned verbatim when it fits in
/// `max_length` characters; otherwise a `max_length` window centred on the
/// earliest term match is widened to whole words and marked with `...`
/// wherever it truncates. Without a match the leading `max_length`
/// characters of `content` are used.
pub fn create_excerpt(content: &str, query: &str, max_length: usize) -> String {
    if content.is_empty() {
        return String::new();
    }
    let terms: Vec<Vec<char>> = query
        .split_whitespace()
        .map(|term| term.chars().map(fold).collect())
        .collect();

    for paragraph in content.split('\n') {
        let chars: Vec<char> = paragraph.chars().collect();
        let folded: Vec<char> = chars.iter().copied().map(fold).collect();
        let Some(center) = terms
            .iter()
            .filter_map(|term| find(&folded, term))
            .min()
        else {
            continue;
        };
        if chars.len() <= max_length {
            return paragraph.to_string();
        }
        return window(&chars, center, max_length);
    }

    let total = content.chars().count();
    if total <= max_length {
        return content.to_string();
    }
    let mut head: String = content.chars().take(max_length).collect();
    head.push_str(ELLIPSIS);
    head
}

fn window(chars: &[char], center: usize, max_length: usize) -> String {
    let len = chars.len();
    let mut start = center.saturating_sub(max_length / 2);
    let mut end = (start + max_length).min(len);

    while start > 0 && !chars[start - 1].is_whitespace() {
        start -= 1;
    }
    while end < len && !chars[end].is_whitespace() {
        end += 1;
    }

    let body: String = chars[start..end].iter().collect();
    let body = body.trim();
    let mut excerpt = String::with_capacity(body.len() + 2 * ELLIPSIS.len());
    if start > 0 {
        excerpt.push_str(ELLIPSIS);
    }
    excerpt.push_str(body);
    if end < len {
        excerpt.push_str(ELLIPSIS);
    }
    excerpt
}

/// One-to-one lowercase mapping so folded offsets line up with the original.
fn fold(ch: char) -> char {
    ch.to_lowercase().next().unwrap_or(ch)
}

fn find(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_content_yields_empty_excerpt() {
        assert_eq!(create_excerpt("", "anything", 300), "");
    }

    #[test]
    fn short_matching_paragraph_is_returned_verbatim() {
        let content = "Unrelated intro.\nGradient Boosting builds trees sequentially.\nOutro.";
        assert_eq!(
            create_excerpt(content, "boosting", 300),
            "Gradient Boosting builds trees sequentially."
        );
    }

    #[test]
    fn long_paragraph_is_windowed_around_first_match() {
        let mut words: Vec<String> = Vec::new();
        while words.join(" ").len() < 900 {
            words.push("lorem".to_string());
        }
        let mut paragraph = words.join(" ");
        paragraph.truncate(899);
        paragraph.push_str(" needle ");
        while paragraph.len() < 1000 {
            paragraph.push_str("ipsum ");
        }
        let paragraph = paragraph.trim_end().to_string();
        let position = paragraph.find("needle").unwrap();
        assert!(position >= 895 && position <= 905);

        let excerpt = create_excerpt(&paragraph, "NEEDLE", 300);
        assert!(excerpt.starts_with("..."), "{excerpt}");
        assert!(!excerpt.ends_with("..."), "window reaches the paragraph end");
        assert!(excerpt.contains("needle"));
        let body = excerpt.trim_start_matches("...");
        assert!(paragraph.ends_with(body));
        // word aligned: the window starts on a whole word
        let start = paragraph.len() - body.len();
        assert_eq!(&paragraph[start - 1..start], " ");
        assert!(body.chars().count() <= 300 + "lorem".len());
    }

    #[test]
    fn window_in_the_middle_gets_both_ellipses() {
        let paragraph = format!("{} target {}", "alpha ".repeat(200), "omega ".repeat(200));
        let excerpt = create_excerpt(&paragraph, "target", 100);
        assert!(excerpt.starts_with("...") && excerpt.ends_with("..."));
        assert!(excerpt.contains("target"));
        let body = excerpt.trim_matches('.');
        assert!(body.split_whitespace().all(|w| ["alpha", "omega", "target"].contains(&w)));
    }

    #[test]
    fn earliest_of_several_terms_centres_the_window() {
        let paragraph = format!("{}beta {}alpha{}", "x ".repeat(300), "y ".repeat(300), " z".repeat(300));
        let excerpt = create_excerpt(&paragraph, "alpha beta", 50);
        assert!(excerpt.contains("beta"));
        assert!(!excerpt.contains("alpha"));
    }

    #[test]
    fn no_match_falls_back_to_leading_text() {
        let content = "a".repeat(400);
        let excerpt = create_excerpt(&content, "zzz", 300);
        assert_eq!(excerpt, format!("{}...", "a".repeat(300)));
        assert_eq!(create_excerpt("short text", "zzz", 300), "short text");
    }

    #[test]
    fn blank_query_falls_back() {
        assert_eq!(create_excerpt("Hello world", "   ", 300), "Hello world");
    }

    #[test]
    fn matching_is_case_insensitive_on_unicode() {
        let content = "Über Straße\nÉCOLE normale";
        assert_eq!(create_excerpt(content, "école", 300), "ÉCOLE normale");
    }
}
