use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::EngineConfig;
use crate::model::QaPair;

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("valid regex"));

#[derive(Debug, Clone, Copy)]
enum Rewrite {
    /// Keep the text preceding the first occurrence of the word.
    Before(&'static str),
    /// Substitute every occurrence of `from` with `to`.
    Replace {
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
struct QuestionRule {
    keywords: &'static [&'static str],
    prefix: &'static str,
    rewrite: Rewrite,
}

// Evaluated top to bottom, first match wins.
const QUESTION_RULES: &[QuestionRule] = &[
    QuestionRule {
        keywords: &["is", "are"],
        prefix: "What",
        rewrite: Rewrite::Before("is"),
    },
    QuestionRule {
        keywords: &["can"],
        prefix: "How",
        rewrite: Rewrite::Replace {
            from: "can",
            to: "do you",
        },
    },
    QuestionRule {
        keywords: &["will"],
        prefix: "When",
        rewrite: Rewrite::Replace {
            from: "will",
            to: "does",
        },
    },
    QuestionRule {
        keywords: &["has", "have"],
        prefix: "What",
        rewrite: Rewrite::Before("has"),
    },
];

impl QuestionRule {
    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| contains_word(lowered, k))
    }

    fn apply(&self, lowered: &str) -> Option<String> {
        let body = match self.rewrite {
            Rewrite::Before(word) => text_before_word(lowered, word).to_string(),
            Rewrite::Replace { from, to } => replace_word(lowered, from, to),
        };
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        Some(format!("{} {}?", self.prefix, body))
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    WORD.find_iter(text).any(|m| m.as_str() == word)
}

fn text_before_word<'a>(text: &'a str, word: &str) -> &'a str {
    WORD.find_iter(text)
        .find(|m| m.as_str() == word)
        .map(|m| &text[..m.start()])
        .unwrap_or(text)
}

fn replace_word(text: &str, from: &str, to: &str) -> String {
    WORD.replace_all(text, |caps: &Captures| {
        let found = &caps[0];
        if found == from {
            to.to_string()
        } else {
            found.to_string()
        }
    })
    .into_owned()
}

/// Turns flat page text into heuristic question/answer pairs.
#[derive(Debug, Clone)]
pub struct CorpusBuilder {
    min_segment_chars: usize,
    question_min_chars: usize,
    max_segments: usize,
    confidence: f32,
    source_tag: String,
}

impl Default for CorpusBuilder {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl CorpusBuilder {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            min_segment_chars: config.min_segment_chars,
            question_min_chars: config.question_min_chars,
            max_segments: config.max_segments,
            confidence: config.generation_confidence,
            source_tag: config.source_tag.clone(),
        }
    }

    /// Candidate statements in order of appearance, noise removed and capped.
    pub fn segments<'a>(&self, text: &'a str) -> Vec<&'a str> {
        SENTENCE_END
            .split(text)
            .map(str::trim)
            .filter(|s| s.chars().count() >= self.min_segment_chars)
            .take(self.max_segments)
            .collect()
    }

    pub fn synthesize_question(&self, segment: &str) -> Option<String> {
        let lowered = segment.to_lowercase();

        if let Some(rule) = QUESTION_RULES.iter().find(|r| r.matches(&lowered)) {
            return rule.apply(&lowered);
        }

        // Only substantial segments get the generic prompt.
        if segment.chars().count() <= self.question_min_chars {
            return None;
        }
        let first = lowered.split_whitespace().next()?;
        Some(format!("Tell me about {first}?"))
    }

    pub fn build(&self, text: &str) -> Vec<QaPair> {
        self.segments(text)
            .into_iter()
            .filter_map(|segment| {
                let question = self.synthesize_question(segment)?;
                Some(QaPair {
                    question,
                    answer: segment.to_string(),
                    confidence: self.confidence,
                    source: self.source_tag.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn builder() -> CorpusBuilder {
        CorpusBuilder::default()
    }

    #[test]
    fn empty_and_short_inputs_yield_nothing() {
        assert!(builder().build("").is_empty());
        assert!(builder().build("short").is_empty());
        assert!(builder().build("Tiny. Bits! Here?").is_empty());
    }

    #[test]
    fn admission_page_produces_two_what_questions() {
        let pairs = builder().build("Admission is open year round. Fees are due each semester.");

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].question, "What admission?");
        assert_eq!(pairs[0].answer, "Admission is open year round");
        assert_eq!(pairs[1].question, "What fees are due each semester?");
        assert_eq!(pairs[1].answer, "Fees are due each semester");
        for pair in &pairs {
            assert!(pair.question.starts_with("What "));
            assert_eq!(pair.confidence, 0.8);
            assert_eq!(pair.source, "scraped_content");
        }
    }

    #[test]
    fn rules_apply_in_order() {
        let b = builder();
        assert_eq!(
            b.synthesize_question("Students can register online through the portal").as_deref(),
            Some("How students do you register online through the portal?")
        );
        assert_eq!(
            b.synthesize_question("The library will close early on Fridays").as_deref(),
            Some("When the library does close early on fridays?")
        );
        assert_eq!(
            b.synthesize_question("The campus has three cafeterias and a gym").as_deref(),
            Some("What the campus?")
        );
        assert_eq!(
            b.synthesize_question("Graduates usually find work within six months").as_deref(),
            Some("Tell me about graduates?")
        );
        // "is" outranks "can" when both appear.
        assert_eq!(
            b.synthesize_question("Parking is limited but you can use the bus").as_deref(),
            Some("What parking?")
        );
    }

    #[test]
    fn keywords_match_whole_words_only() {
        // "this" and "island" contain "is" but are not the word "is".
        assert_eq!(
            builder()
                .synthesize_question("Visit this island during summer holidays")
                .as_deref(),
            Some("Tell me about visit?")
        );
    }

    #[test]
    fn drops_segments_without_question_text() {
        let b = builder();
        // Nothing precedes "is".
        assert_eq!(b.synthesize_question("Is everything ready for launch day"), None);
        // No keyword and not long enough for the generic rule.
        assert_eq!(b.synthesize_question("Graduates find work quickly"), None);
        assert!(b.build("Graduates find work quickly.").is_empty());
    }

    #[test]
    fn preserves_order_of_appearance() {
        let text = "Tuition is paid online every term! Dorms are assigned in August? \
                    Meals are served three times daily.";
        let answers: Vec<String> = builder().build(text).into_iter().map(|p| p.answer).collect();
        assert_eq!(
            answers,
            vec![
                "Tuition is paid online every term",
                "Dorms are assigned in August",
                "Meals are served three times daily",
            ]
        );
    }

    #[test]
    fn caps_segment_count() {
        let text = "This sentence is long enough to be kept. ".repeat(120);
        assert_eq!(builder().build(&text).len(), 50);
    }

    proptest! {
        #[test]
        fn never_exceeds_cap(sentences in prop::collection::vec("[a-z ]{0,60}", 0..150)) {
            let text = sentences.join(". ");
            let pairs = builder().build(&text);
            prop_assert!(pairs.len() <= 50);
            for pair in &pairs {
                prop_assert!(pair.answer.chars().count() >= 20);
                prop_assert!(pair.question.ends_with('?'));
            }
        }
    }
}
