//! Free-text search over the feed
//!
//! Matching ignores case and diacritics: both the term and the card text are
//! decomposed (NFD), stripped of combining marks and lowercased.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::model::LightCard;

/// Fold a string for accent- and case-insensitive comparison
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct TextFilter {
    term: String,
}

impl TextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_search_term(&mut self, term: &str) {
        self.term = fold(term.trim());
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    /// Whether the card's title or summary contains the term
    pub fn matches(&self, card: &LightCard) -> bool {
        if self.term.is_empty() {
            return true;
        }
        [&card.title_translated, &card.summary_translated]
            .into_iter()
            .flatten()
            .any(|text| fold(text).contains(&self.term))
    }

    pub fn search_light_cards(&self, cards: &[LightCard]) -> Vec<LightCard> {
        cards.iter().filter(|c| self.matches(c)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(title: &str, summary: Option<&str>) -> LightCard {
        LightCard {
            id: title.into(),
            title_translated: Some(title.into()),
            summary_translated: summary.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold("Électricité Coupée"), "electricite coupee");
        assert_eq!(fold("ÅNGSTRÖM"), "angstrom");
    }

    #[test]
    fn test_accent_and_case_insensitive() {
        let mut filter = TextFilter::new();
        filter.set_search_term("ELECTRICITE");
        assert!(filter.matches(&card("Panne d'électricité", None)));
        assert!(!filter.matches(&card("Panne de gaz", None)));

        filter.set_search_term("poste");
        assert!(filter.matches(&card("Alarme", Some("Défaut au Poste Nord"))));
    }

    #[test]
    fn test_empty_term_keeps_everything() {
        let mut filter = TextFilter::new();
        filter.set_search_term("   ");
        let cards = vec![card("a", None), LightCard::default()];
        assert_eq!(filter.search_light_cards(&cards).len(), 2);
    }

    #[test]
    fn test_card_without_text_never_matches_a_term() {
        let mut filter = TextFilter::new();
        filter.set_search_term("x");
        assert!(!filter.matches(&LightCard::default()));
    }
}
