use scraper::Html;

/// Strips markup from a text field and collapses runs of whitespace.
pub fn clean_text(raw: &str) -> String {
    if raw.contains('<') {
        let fragment = Html::parse_fragment(raw);
        let text: String = fragment.root_element().text().collect();
        collapse_whitespace(&text)
    } else {
        collapse_whitespace(raw)
    }
}

pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_whitespace() {
        assert_eq!(clean_text("  Leather\n\n <b>sneakers</b>  "), "Leather sneakers");
        assert_eq!(clean_text("<p>Fish &amp; chips</p>"), "Fish & chips");
        assert_eq!(clean_text("plain"), "plain");
        assert_eq!(clean_text("   "), "");
    }
}
