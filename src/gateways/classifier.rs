//! Language and intent classification for idle sessions.

use crate::session::Language;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What the user wants, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    ExGratia,
    CheckStatus,
    ReliefNorms,
    Emergency,
    Tourism,
    Complaint,
    OperatorSearch,
    Feedback,
    Cancel,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 11] = [
        Intent::Greeting,
        Intent::ExGratia,
        Intent::CheckStatus,
        Intent::ReliefNorms,
        Intent::Emergency,
        Intent::Tourism,
        Intent::Complaint,
        Intent::OperatorSearch,
        Intent::Feedback,
        Intent::Cancel,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::ExGratia => "ex_gratia",
            Intent::CheckStatus => "check_status",
            Intent::ReliefNorms => "relief_norms",
            Intent::Emergency => "emergency",
            Intent::Tourism => "tourism",
            Intent::Complaint => "complaint",
            Intent::OperatorSearch => "operator_search",
            Intent::Feedback => "feedback",
            Intent::Cancel => "cancel",
            Intent::Unknown => "unknown",
        }
    }

    /// Lenient parse of a model's answer; unrecognized labels are `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        match cleaned.as_str() {
            "exgratia" | "ex_gratia_application" => Some(Intent::ExGratia),
            "status" => Some(Intent::CheckStatus),
            "csc" | "operator" => Some(Intent::OperatorSearch),
            "homestay" => Some(Intent::Tourism),
            "certificate" => Some(Intent::OperatorSearch),
            other => Self::ALL.into_iter().find(|i| i.as_str() == other),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classifier's raw verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawClassification {
    pub language: Option<Language>,
    pub intent: Intent,
}

/// Gateway result, always usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Detected language, else the previous one, else the default.
    pub language: Language,
    /// Whether `language` came from the text rather than the fallback.
    pub language_detected: bool,
    pub intent: Intent,
    /// The classifier failed or timed out.
    pub fallback: bool,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> anyhow::Result<RawClassification>;
}

/// Bounds a classifier with a timeout and substitutes a fallback on any failure.
pub struct ClassificationGateway {
    inner: Arc<dyn Classifier>,
    timeout: Duration,
}

impl ClassificationGateway {
    pub fn new(inner: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn backend(&self) -> &str {
        self.inner.name()
    }

    /// Never fails and never waits longer than the timeout.
    pub async fn classify(&self, text: &str, previous: Option<Language>) -> Classification {
        let fallback = Classification {
            language: previous.unwrap_or_default(),
            language_detected: false,
            intent: Intent::Unknown,
            fallback: true,
        };
        match tokio::time::timeout(self.timeout, self.inner.classify(text)).await {
            Ok(Ok(raw)) => Classification {
                language: raw.language.or(previous).unwrap_or_default(),
                language_detected: raw.language.is_some(),
                intent: raw.intent,
                fallback: false,
            },
            Ok(Err(e)) => {
                tracing::warn!(backend = self.inner.name(), "classification failed, using fallback: {e}");
                fallback
            }
            Err(_) => {
                tracing::warn!(
                    backend = self.inner.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "classification timed out, using fallback"
                );
                fallback
            }
        }
    }
}

// ── Keyword classifier ──────────────────────────────────────────

const NEPALI_WORDS: &[&str] = &[
    "छ", "छन्", "भयो", "हुन्छ", "छैन", "मलाई", "मेरो", "गर्नु", "चाहिन्छ", "पाउँछु", "कसरी",
];
const NEPALI_ROMAN: &[&str] = &["cha", "chha", "garnu", "malai", "mero", "kasari", "bhayo", "chaincha", "hunchha"];
const HINDI_ROMAN: &[&str] = &["hai", "kya", "mujhe", "chahiye", "karna", "mera", "meri", "kaise", "hua"];

/// Keyword table in priority order; the first intent with a hit wins.
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (Intent::Cancel, &["cancel", "रद्द"]),
    (
        Intent::Emergency,
        &[
            "emergency", "ambulance", "fire", "police", "accident", "hospital",
            "एम्बुलेंस", "एम्बुलेन्स", "आग", "आगलागी", "दुर्घटना", "आपातकाल", "पुलिस",
        ],
    ),
    (
        Intent::CheckStatus,
        &["status", "track", "स्टेटस", "स्थिति", "अवस्था"],
    ),
    (
        Intent::ReliefNorms,
        &[
            "norms", "eligibility", "eligible", "how much", "documents", "rules",
            "कितना", "दस्तावेज", "कागजात", "कति क्षतिपूर्ति", "नियम",
        ],
    ),
    (
        Intent::ExGratia,
        &[
            "ex-gratia", "ex gratia", "exgratia", "compensation", "damage", "flood", "landslide",
            "मुआवजा", "क्षतिपूर्ति", "नुकसान", "क्षति", "बाढ़", "बाढी", "पहिरो",
        ],
    ),
    (
        Intent::Complaint,
        &["complaint", "grievance", "complain", "शिकायत", "गुनासो", "उजुरी"],
    ),
    (
        Intent::OperatorSearch,
        &["csc", "operator", "service centre", "service center", "certificate", "प्रमाणपत्र"],
    ),
    (
        Intent::Tourism,
        &["homestay", "home stay", "hotel", "tourism", "tourist", "होमस्टे", "पर्यटन"],
    ),
    (
        Intent::Feedback,
        &["feedback", "suggestion", "सुझाव", "प्रतिक्रिया"],
    ),
    (
        Intent::Greeting,
        &["hello", "hi", "hey", "namaste", "namaskar", "start", "नमस्ते", "नमस्कार"],
    ),
];

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric() && !('\u{0900}'..='\u{097F}').contains(&c))
        .filter(|w| !w.is_empty())
        .collect()
}

fn keyword_hit(lowered: &str, tokens: &[&str], keyword: &str) -> bool {
    if keyword.is_ascii() && !keyword.contains([' ', '-']) {
        tokens.iter().any(|t| *t == keyword)
    } else {
        lowered.contains(keyword)
    }
}

/// Offline classifier over fixed keyword tables. Used when no model endpoint
/// is configured and as a deterministic backend in tests.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn detect_language(text: &str) -> Option<Language> {
        let lowered = text.to_lowercase();
        let tokens = words(&lowered);
        let devanagari = lowered.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c));
        if devanagari {
            let nepali = tokens
                .iter()
                .any(|t| NEPALI_WORDS.contains(t) || t.ends_with("न्छ") || t.ends_with("न्छु"));
            return Some(if nepali { Language::Nepali } else { Language::Hindi });
        }
        if tokens.iter().any(|t| NEPALI_ROMAN.contains(t)) {
            return Some(Language::Nepali);
        }
        if tokens.iter().any(|t| HINDI_ROMAN.contains(t)) {
            return Some(Language::Hindi);
        }
        lowered
            .chars()
            .any(|c| c.is_ascii_alphabetic())
            .then_some(Language::English)
    }

    pub fn detect_intent(text: &str) -> Intent {
        let lowered = text.to_lowercase();
        let tokens = words(&lowered);
        INTENT_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| keyword_hit(&lowered, &tokens, k)))
            .map_or(Intent::Unknown, |(intent, _)| *intent)
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn classify(&self, text: &str) -> anyhow::Result<RawClassification> {
        Ok(RawClassification {
            language: Self::detect_language(text),
            intent: Self::detect_intent(text),
        })
    }
}

// ── Ollama classifier ───────────────────────────────────────────

const CLASSIFY_PROMPT: &str = r#"You classify messages sent to a government services assistant in Sikkim.
Decide the language of the message (english, hindi or nepali; Devanagari or romanized) and the user's intent.

Intents:
- greeting: hello, namaste, starting a conversation
- ex_gratia: apply for compensation for disaster damage
- check_status: track an application
- relief_norms: questions about relief policies, amounts, eligibility, documents
- emergency: urgent help (ambulance, police, fire)
- tourism: homestays, tourist places
- complaint: register a grievance
- operator_search: find a Common Service Centre operator, certificates
- feedback: feedback about the service
- cancel: stop what is going on
- unknown: none of the above

Message: "{text}"

Answer with JSON only: {"language": "<language>", "intent": "<intent>"}"#;

/// Classifier backed by an Ollama `/api/generate` endpoint.
pub struct OllamaClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaClassifier {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }

    pub fn build_request_json(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": CLASSIFY_PROMPT.replace("{text}", &text.replace('"', "'")),
            "stream": false,
            "format": "json",
        })
    }
}

/// Parse a model answer: a JSON object when possible, otherwise bare labels.
pub fn parse_classification(raw: &str) -> Option<RawClassification> {
    let json = raw
        .find('{')
        .zip(raw.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<serde_json::Value>(&raw[start..=end]).ok());

    if let Some(obj) = json {
        let intent = obj.get("intent").and_then(|v| v.as_str()).and_then(Intent::parse)?;
        let language = obj.get("language").and_then(|v| v.as_str()).and_then(Language::parse);
        return Some(RawClassification { language, intent });
    }

    let lowered = raw.to_lowercase();
    let tokens = words(&lowered);
    let intent = tokens.iter().find_map(|t| Intent::parse(t))?;
    let language = tokens.iter().find_map(|t| Language::parse(t));
    Some(RawClassification { language, intent })
}

#[async_trait]
impl Classifier for OllamaClassifier {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn classify(&self, text: &str) -> anyhow::Result<RawClassification> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&self.build_request_json(text))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("classifier returned {status}: {body}");
        }

        let data: serde_json::Value = resp.json().await?;
        let answer = data
            .get("response")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("classifier response has no 'response' field"))?;

        parse_classification(answer).ok_or_else(|| anyhow::anyhow!("unrecognized classifier answer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Slow;

    #[async_trait]
    impl Classifier for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn classify(&self, _text: &str) -> anyhow::Result<RawClassification> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RawClassification {
                language: Some(Language::English),
                intent: Intent::Greeting,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl Classifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn classify(&self, _text: &str) -> anyhow::Result<RawClassification> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn intent_parse_is_lenient() {
        assert_eq!(Intent::parse("ex_gratia"), Some(Intent::ExGratia));
        assert_eq!(Intent::parse(" Ex-Gratia "), Some(Intent::ExGratia));
        assert_eq!(Intent::parse("check status"), Some(Intent::CheckStatus));
        assert_eq!(Intent::parse("CSC"), Some(Intent::OperatorSearch));
        assert_eq!(Intent::parse("weather"), None);
    }

    #[test]
    fn parse_json_answer() {
        let parsed = parse_classification(r#"Sure! {"language": "hindi", "intent": "ex_gratia"}"#).unwrap();
        assert_eq!(parsed.language, Some(Language::Hindi));
        assert_eq!(parsed.intent, Intent::ExGratia);
    }

    #[test]
    fn parse_bare_labels() {
        let parsed = parse_classification("nepali\ntourism").unwrap();
        assert_eq!(parsed.language, Some(Language::Nepali));
        assert_eq!(parsed.intent, Intent::Tourism);
        assert!(parse_classification("I cannot help with that").is_none());
    }

    #[test]
    fn parse_json_with_unknown_intent_label_fails() {
        assert!(parse_classification(r#"{"language": "english", "intent": "weather"}"#).is_none());
    }

    #[test]
    fn keyword_language_detection() {
        assert_eq!(
            KeywordClassifier::detect_language("मुझे बाढ़ से नुकसान का मुआवजा चाहिए"),
            Some(Language::Hindi)
        );
        assert_eq!(
            KeywordClassifier::detect_language("मलाई क्षतिपूर्ति चाहिन्छ"),
            Some(Language::Nepali)
        );
        assert_eq!(KeywordClassifier::detect_language("mujhe madad chahiye"), Some(Language::Hindi));
        assert_eq!(KeywordClassifier::detect_language("Need an ambulance"), Some(Language::English));
        assert_eq!(KeywordClassifier::detect_language("12345"), None);
    }

    #[test]
    fn keyword_intents() {
        assert_eq!(KeywordClassifier::detect_intent("I need compensation for flood damage"), Intent::ExGratia);
        assert_eq!(KeywordClassifier::detect_intent("How much compensation will I get"), Intent::ReliefNorms);
        assert_eq!(KeywordClassifier::detect_intent("Need ambulance"), Intent::Emergency);
        assert_eq!(KeywordClassifier::detect_intent("मुझे बाढ़ से नुकसान का मुआवजा चाहिए"), Intent::ExGratia);
        assert_eq!(KeywordClassifier::detect_intent("Book homestay in Pelling"), Intent::Tourism);
        assert_eq!(KeywordClassifier::detect_intent("hi"), Intent::Greeting);
        assert_eq!(KeywordClassifier::detect_intent("this is nice"), Intent::Unknown);
    }

    #[test]
    fn ollama_request_shape() {
        let c = OllamaClassifier::new("http://localhost:11434/api/generate".into(), "qwen2.5:3b".into());
        let body = c.build_request_json("hello \"there\"");
        assert_eq!(body["model"], "qwen2.5:3b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["format"], "json");
        assert!(body["prompt"].as_str().unwrap().contains("hello 'there'"));
    }

    #[tokio::test]
    async fn gateway_times_out_to_fallback() {
        let gw = ClassificationGateway::new(Arc::new(Slow), Duration::from_millis(50));
        let c = gw.classify("hello", Some(Language::Nepali)).await;
        assert!(c.fallback);
        assert_eq!(c.intent, Intent::Unknown);
        assert_eq!(c.language, Language::Nepali);
        assert!(!c.language_detected);
    }

    #[tokio::test]
    async fn gateway_error_falls_back_to_default_language() {
        let gw = ClassificationGateway::new(Arc::new(Broken), Duration::from_secs(1));
        let c = gw.classify("hello", None).await;
        assert!(c.fallback);
        assert_eq!(c.language, Language::English);
    }

    #[tokio::test]
    async fn gateway_passes_through_detection() {
        let gw = ClassificationGateway::new(Arc::new(KeywordClassifier), Duration::from_secs(1));
        let c = gw.classify("मुझे बाढ़ से नुकसान का मुआवजा चाहिए", None).await;
        assert!(!c.fallback);
        assert!(c.language_detected);
        assert_eq!(c.language, Language::Hindi);
        assert_eq!(c.intent, Intent::ExGratia);
    }

    #[tokio::test]
    async fn ollama_unreachable_is_an_error() {
        let c = OllamaClassifier::new("http://127.0.0.1:1/api/generate".into(), "m".into());
        assert!(c.classify("hello").await.is_err());
    }
}
