use serde::{Deserialize, Serialize};

use super::emotion::EmotionSample;

/// Follow-up prompt offered to the observing participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedQuestion {
    pub question: String,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "analyzer".to_string()
}

const FALLBACK_CONFIDENCE: f64 = 0.6;

/// Local rule table used when the analyzer has no question.
///
/// Rules are checked in order; the first match wins.
pub fn fallback_question(sample: &EmotionSample) -> SuggestedQuestion {
    let scores = &sample.composite_scores;
    let label = sample.dominant_label.to_lowercase();

    let question = if scores.stress > 0.7 {
        "I notice you seem quite tense right now. Can you tell me more about what's making this situation difficult for you?"
    } else if scores.anxiety > 0.6 {
        "You seem anxious. What thoughts are going through your mind at this moment?"
    } else if label == "sad" {
        "I can see this is affecting you deeply. Would you like to talk about what's been weighing on you?"
    } else if label == "angry" {
        "It seems like you're feeling frustrated. What specifically triggered these feelings?"
    } else if label == "fear" {
        "What is it about this situation that feels frightening or overwhelming to you?"
    } else if scores.engagement < 0.3 {
        "I notice you've become quieter. Is there something specific you'd rather not discuss, or would it help to take a different approach?"
    } else {
        "How does that make you feel? Can you describe the emotions you're experiencing right now?"
    };

    SuggestedQuestion {
        question: question.to_string(),
        trigger: format!("{} emotion", label),
        confidence: FALLBACK_CONFIDENCE,
        method: "rule-based".to_string(),
    }
}
