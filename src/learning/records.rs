//! Event records captured from the host application
//!
//! Plain data: interactions with the assistant, in-app behaviors and
//! feature usage patterns. Only an interaction's feedback changes after
//! creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form string metadata attached to a record
pub type Details = HashMap<String, String>;

/// A single exchange between the user and the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub ai_response: String,
    pub detected_intent: String,
    /// Classifier confidence (0.0-1.0)
    pub confidence_score: f64,
    pub feedback: Option<Feedback>,
    pub context: Option<Details>,
    pub app_version: String,
    /// Model version that was current when the exchange happened
    pub model_version: String,
}

impl Interaction {
    pub fn new(
        user_message: &str,
        ai_response: &str,
        intent: &str,
        confidence: f64,
        context: Option<Details>,
        app_version: &str,
        model_version: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_message: user_message.to_string(),
            ai_response: ai_response.to_string(),
            detected_intent: intent.to_string(),
            confidence_score: if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) },
            feedback: None,
            context: context.filter(|c| !c.is_empty()),
            app_version: app_version.to_string(),
            model_version: model_version.to_string(),
        }
    }

    pub fn rating(&self) -> Option<u8> {
        self.feedback.as_ref().map(|f| f.rating)
    }
}

/// User rating of an interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// 1-5
    pub rating: u8,
    pub comment: Option<String>,
}

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

impl Feedback {
    /// Ratings outside 1-5 are clamped into range
    pub fn new(rating: i32, comment: Option<String>) -> Self {
        Self {
            rating: rating.clamp(MIN_RATING as i32, MAX_RATING as i32) as u8,
            comment,
        }
    }
}

/// Something the user did inside the app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub screen: String,
    /// Seconds; zero when unknown
    pub duration_secs: f64,
    pub details: Details,
}

impl Behavior {
    pub fn new(action: &str, screen: &str, duration_secs: f64, details: Details) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.to_string(),
            screen: screen.to_string(),
            duration_secs: duration_secs.max(0.0),
            details,
        }
    }
}

/// How a feature was used in one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePattern {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub feature: String,
    pub time_spent_secs: f64,
    pub action_sequence: Vec<String>,
    pub completed_task: bool,
}

impl UsagePattern {
    pub fn new(feature: &str, time_spent_secs: f64, action_sequence: Vec<String>, completed: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            feature: feature.to_string(),
            time_spent_secs: time_spent_secs.max(0.0),
            action_sequence,
            completed_task: completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_clamps_confidence() {
        let high = Interaction::new("hi", "hello", "greet", 1.7, None, "1.0", "1.0.0");
        assert_eq!(high.confidence_score, 1.0);
        let low = Interaction::new("hi", "hello", "greet", -0.2, None, "1.0", "1.0.0");
        assert_eq!(low.confidence_score, 0.0);
        assert_ne!(high.id, low.id);
    }

    #[test]
    fn test_empty_context_is_dropped() {
        let i = Interaction::new("hi", "hello", "greet", 0.5, Some(Details::new()), "1.0", "1.0.0");
        assert!(i.context.is_none());
    }

    #[test]
    fn test_feedback_clamps_rating() {
        assert_eq!(Feedback::new(9, None).rating, 5);
        assert_eq!(Feedback::new(0, None).rating, 1);
        assert_eq!(Feedback::new(4, Some("ok".into())).rating, 4);
    }

    #[test]
    fn test_json_field_names() {
        let pattern = UsagePattern::new("signer", 12.0, vec!["open".into(), "sign".into()], true);
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["feature"], "signer");
        assert_eq!(json["completed_task"], true);
        assert_eq!(json["action_sequence"][1], "sign");
    }
}
