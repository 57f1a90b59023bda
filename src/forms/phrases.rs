//! Fixed phrase sets consulted by the engine for cancellation, mid-form
//! questions and the confirmation vocabulary.

use crate::session::Language;

/// Phrases for one language. Latin entries are lowercase.
#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    /// Substring-matched; any hit cancels the active form.
    pub cancel: Vec<&'static str>,
    /// Interrogatives that count only as the first word of the message.
    pub question_leads: Vec<&'static str>,
    /// Interrogatives that count anywhere in the message, as whole words.
    pub question_markers: Vec<&'static str>,
    pub confirm: Vec<&'static str>,
    pub edit: Vec<&'static str>,
    pub skip: Vec<&'static str>,
    pub done: Vec<&'static str>,
}

impl PhraseSet {
    pub fn english() -> Self {
        Self {
            cancel: vec!["cancel", "stop", "quit", "exit", "abort"],
            question_leads: vec!["what", "how", "why", "when", "where", "which", "who"],
            question_markers: vec![],
            confirm: vec!["confirm", "yes", "submit", "ok", "okay", "retry"],
            edit: vec!["edit", "change", "modify"],
            skip: vec!["skip", "no location", "skip location"],
            done: vec!["done", "back", "no changes"],
        }
    }

    pub fn hindi() -> Self {
        Self {
            cancel: vec![
                "band karo",
                "radd karo",
                "रद्द",
                "बंद करो",
                "बंद करें",
                "छोड़ो",
                "छोड़ दो",
            ],
            question_leads: vec!["kya", "kaise", "kab", "kahan", "kyun", "kyon"],
            question_markers: vec!["क्या", "कैसे", "कब", "कहाँ", "कहां", "क्यों"],
            confirm: vec![
                "haan",
                "han",
                "हाँ",
                "हां",
                "जमा करें",
                "पुष्टि करें",
                "पुष्टि",
                "फिर से प्रयास करें",
            ],
            edit: vec!["badlo", "बदलें", "सुधारें", "संपादित करें"],
            skip: vec!["स्किप", "छोड़ें", "आगे बढ़ें", "स्थान नहीं"],
            done: vec!["हो गया", "वापस"],
        }
    }

    pub fn nepali() -> Self {
        Self {
            cancel: vec![
                "radda gara",
                "banda gara",
                "रद्द गर्नुहोस्",
                "बन्द गर्नुहोस्",
                "बन्द गर",
                "रोक्नुहोस्",
            ],
            question_leads: vec!["ke", "kasari", "kina", "kaha", "kahile", "kati"],
            question_markers: vec!["के हो", "कसरी", "किन", "कहाँ", "कहिले", "कति"],
            confirm: vec![
                "ho",
                "हो",
                "हुन्छ",
                "पेश गर्नुहोस्",
                "पुष्टि गर्नुहोस्",
                "फेरि प्रयास गर्नुहोस्",
            ],
            edit: vec!["सच्याउनुहोस्", "परिवर्तन", "परिवर्तन गर्नुहोस्", "सम्पादन"],
            skip: vec!["छोड्नुहोस्", "छाड्नुहोस्", "स्थान छैन"],
            done: vec!["सकियो", "भयो", "फिर्ता"],
        }
    }
}

/// All phrase sets, loaded once and shared by the engine.
#[derive(Debug, Clone)]
pub struct PhraseBook {
    english: PhraseSet,
    hindi: PhraseSet,
    nepali: PhraseSet,
}

impl Default for PhraseBook {
    fn default() -> Self {
        Self {
            english: PhraseSet::english(),
            hindi: PhraseSet::hindi(),
            nepali: PhraseSet::nepali(),
        }
    }
}

/// Lowercase and strip leading/trailing punctuation and symbols (button emoji).
fn normalize(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && !is_devanagari_mark(c))
        .to_lowercase()
}

fn is_devanagari_mark(c: char) -> bool {
    ('\u{0900}'..='\u{097F}').contains(&c)
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && !is_devanagari_mark(c))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whether `phrase` occurs in `tokens` as a run of whole words.
fn contains_words(tokens: &[&str], phrase: &str) -> bool {
    let needle = words(phrase);
    !needle.is_empty() && tokens.windows(needle.len()).any(|w| w == needle.as_slice())
}

impl PhraseBook {
    pub fn set(&self, language: Language) -> &PhraseSet {
        match language {
            Language::English => &self.english,
            Language::Hindi => &self.hindi,
            Language::Nepali => &self.nepali,
        }
    }

    fn all(&self) -> [&PhraseSet; 3] {
        [&self.english, &self.hindi, &self.nepali]
    }

    /// Cancellation is recognized in every language regardless of the session's.
    ///
    /// Latin phrases match on word boundaries so names such as "Christopher"
    /// do not trip "stop"; Devanagari phrases match as plain substrings.
    pub fn is_cancel(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        let spaced = format!(" {} ", words(&lowered).join(" "));
        self.all().iter().any(|set| {
            set.cancel.iter().any(|p| {
                if p.is_ascii() {
                    spaced.contains(&format!(" {p} "))
                } else {
                    lowered.contains(p)
                }
            })
        })
    }

    /// Whether the text reads as a question in the active language.
    pub fn is_question(&self, text: &str, language: Language) -> bool {
        let trimmed = text.trim();
        if trimmed.ends_with('?') || trimmed.ends_with('？') {
            return true;
        }
        let normalized = normalize(trimmed);
        let tokens = words(&normalized);
        let set = self.set(language);
        if let Some(lead) = tokens.first() {
            if set.question_leads.iter().any(|w| w == lead) {
                return true;
            }
        }
        set.question_markers.iter().any(|m| contains_words(&tokens, m))
    }

    fn matches_exact(&self, text: &str, pick: impl Fn(&PhraseSet) -> &Vec<&'static str>) -> bool {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return false;
        }
        self.all()
            .iter()
            .any(|set| pick(set).iter().any(|p| *p == normalized))
    }

    pub fn is_confirm(&self, text: &str) -> bool {
        self.matches_exact(text, |s| &s.confirm)
    }

    pub fn is_edit(&self, text: &str) -> bool {
        self.matches_exact(text, |s| &s.edit)
    }

    pub fn is_skip(&self, text: &str) -> bool {
        self.matches_exact(text, |s| &s.skip)
    }

    pub fn is_done(&self, text: &str) -> bool {
        self.matches_exact(text, |s| &s.done)
    }
}
