//! Citation tags emitted at the end of grounded answers

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Longest quote, in words, a citation may carry
pub const MAX_QUOTE_WORDS: usize = 5;

/// Matches `<citation filename='X'>quote</citation>`; double quotes are accepted too.
static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<citation\s+filename=(?:'([^']*)'|"([^"]*)")\s*>(.*?)</citation>"#).unwrap()
});

/// A source reference: the document and a short verbatim quote from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub filename: String,
    pub quote: String,
}

impl Citation {
    pub fn new(filename: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            quote: quote.into(),
        }
    }

    /// Non-empty quote of at most [`MAX_QUOTE_WORDS`] words
    pub fn is_well_formed(&self) -> bool {
        let words = self.quote.split_whitespace().count();
        !self.filename.is_empty() && words > 0 && words <= MAX_QUOTE_WORDS
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<citation filename='{}'>{}</citation>", self.filename, self.quote)
    }
}

/// Every citation in `text`, in order of appearance
pub fn extract_citations(text: &str) -> Vec<Citation> {
    CITATION_PATTERN
        .captures_iter(text)
        .map(|caps| {
            let filename = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            let quote = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
            Citation::new(filename, quote)
        })
        .collect()
}

/// Split an answer into its prose (tags removed, trailing whitespace
/// trimmed) and its citations
pub fn split_citations(text: &str) -> (String, Vec<Citation>) {
    let citations = extract_citations(text);
    let prose = CITATION_PATTERN.replace_all(text, "");
    (prose.trim_end().to_string(), citations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_quoted() {
        let text = "Go uphill.\n<citation filename='guide.pdf'>move to higher ground</citation>";
        assert_eq!(
            extract_citations(text),
            vec![Citation::new("guide.pdf", "move to higher ground")]
        );
    }

    #[test]
    fn test_extract_double_quoted_and_multiple() {
        let text = r#"Answer. <citation filename="a.md">one</citation><citation filename='b.md'>two words</citation>"#;
        let citations = extract_citations(text);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].filename, "a.md");
        assert_eq!(citations[1].quote, "two words");
    }

    #[test]
    fn test_split_removes_tags() {
        let text = "Boil water first.\n\n<citation filename='guide.md'>Boil water</citation>\n";
        let (prose, citations) = split_citations(text);
        assert_eq!(prose, "Boil water first.");
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn test_no_citations() {
        let (prose, citations) = split_citations("Just text.");
        assert_eq!(prose, "Just text.");
        assert!(citations.is_empty());
    }

    #[test]
    fn test_display_reproduces_tag() {
        let tag = "<citation filename='guide.pdf'>flood shelter</citation>";
        let citations = extract_citations(tag);
        assert_eq!(citations[0].to_string(), tag);
    }

    #[test]
    fn test_well_formed_quote_length() {
        assert!(Citation::new("a.md", "one two three four five").is_well_formed());
        assert!(!Citation::new("a.md", "one two three four five six").is_well_formed());
        assert!(!Citation::new("a.md", "  ").is_well_formed());
    }
}
