//! Expansion of a free-text product name into ordered search keywords.

use std::collections::HashSet;

use jieba_rs::Jieba;

/// Splits text into candidate word units.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Dictionary-based segmentation for Chinese text.
pub struct JiebaTokenizer {
    jieba: Jieba,
}

impl JiebaTokenizer {
    /// Loads the bundled dictionary.
    pub fn new() -> Self {
        Self {
            jieba: Jieba::new(),
        }
    }
}

impl Default for JiebaTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for JiebaTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        self.jieba
            .cut(text, false)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Splits on Unicode whitespace.
#[derive(Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}

/// Keeps tokens of at least two characters made only of letters and digits.
fn is_meaningful(token: &str) -> bool {
    token.chars().count() >= 2 && token.chars().all(char::is_alphanumeric)
}

/// Builds the keyword sequence tried against a remote catalog, most
/// specific first.
pub struct KeywordGenerator {
    tokenizer: Box<dyn Tokenizer>,
}

impl KeywordGenerator {
    pub fn new(tokenizer: Box<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Segments `text` and drops short and punctuation-only tokens.
    pub fn segment(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }
        let words: Vec<String> = self
            .tokenizer
            .tokenize(text)
            .into_iter()
            .map(|word| word.trim().to_string())
            .filter(|word| is_meaningful(word))
            .collect();
        log::debug!("Segmented '{text}' into {words:?}");
        words
    }

    /// Returns at most `max_attempts` deduplicated keywords, starting with the
    /// trimmed query itself.
    pub fn generate(&self, query: &str, max_attempts: usize) -> Vec<String> {
        let mut keywords = vec![query.trim().to_string()];
        let words = self.segment(query);

        if words.is_empty() {
            keywords.truncate(max_attempts);
            return keywords;
        }

        let mut push_both = |parts: &[String]| {
            keywords.push(parts.join(" "));
            keywords.push(parts.concat());
        };

        if words.len() >= 2 {
            push_both(&words[..]);
        }
        if words.len() >= 3 {
            push_both(&words[..words.len() - 1]);
            push_both(&words[1..]);
        }
        if words.len() >= 2 {
            push_both(&words[..2]);
        }

        let mut by_length = words.clone();
        // Stable sort keeps first-seen order among equal lengths.
        by_length.sort_by_key(|word| std::cmp::Reverse(word.chars().count()));
        keywords.extend(by_length);

        let mut seen = HashSet::new();
        keywords.retain(|keyword| !keyword.is_empty() && seen.insert(keyword.clone()));
        keywords.truncate(max_attempts);

        log::info!(
            "Generated {} search keywords for '{}': {keywords:?}",
            keywords.len(),
            query.trim()
        );
        keywords
    }
}

impl Default for KeywordGenerator {
    fn default() -> Self {
        Self::new(Box::new(JiebaTokenizer::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitespace() -> KeywordGenerator {
        KeywordGenerator::new(Box::new(WhitespaceTokenizer))
    }

    #[test]
    fn single_token_yields_query_only() {
        let keywords = whitespace().generate("  apple  ", 10);
        assert_eq!(keywords, vec!["apple"]);
    }

    #[test]
    fn no_tokens_returns_seed() {
        let keywords = whitespace().generate("a !", 10);
        assert_eq!(keywords, vec!["a !"]);
    }

    #[test]
    fn zero_attempts_is_empty() {
        assert!(whitespace().generate("fresh red apple", 0).is_empty());
    }

    #[test]
    fn three_tokens_follow_combination_order() {
        let keywords = whitespace().generate("fresh red apple", 20);
        assert_eq!(
            keywords,
            vec![
                "fresh red apple",
                "freshredapple",
                "fresh red",
                "freshred",
                "red apple",
                "redapple",
                "fresh",
                "apple",
                "red",
            ]
        );
    }

    #[test]
    fn two_tokens_dedup_first_pair() {
        let keywords = whitespace().generate("cotton shirt", 20);
        assert_eq!(
            keywords,
            vec!["cotton shirt", "cottonshirt", "cotton", "shirt"]
        );
    }

    #[test]
    fn punctuation_and_short_tokens_are_dropped() {
        let generator = whitespace();
        assert_eq!(generator.segment("a ,, 苹果 x1 !?"), vec!["苹果", "x1"]);
    }

    #[test]
    fn truncates_to_max_attempts() {
        let keywords = whitespace().generate("fresh red apple", 3);
        assert_eq!(keywords, vec!["fresh red apple", "freshredapple", "fresh red"]);
    }

    #[test]
    fn jieba_segments_chinese_product_names() {
        let generator = KeywordGenerator::default();
        let keywords = generator.generate("棉质T恤", 5);
        assert_eq!(keywords[0], "棉质T恤");
        assert!(keywords.len() <= 5);
    }
}
