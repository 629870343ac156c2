//! Dialogue router
//!
//! One classification call labels the current utterance; the label picks
//! one of four response strategies. The router keeps no state between turns.

use crate::prompts;
use lexforge_common::llm::LanguageModel;
use lexforge_common::models::{ConversationTurn, Intent, Route};
use regex_lite::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the classifier made of a turn
#[derive(Debug, Clone, PartialEq)]
pub enum IntentOutcome {
    Classified(Intent),

    /// No valid label could be read from the model
    Unknown {
        raw: String,
        /// Set when the model call itself failed
        error: Option<String>,
    },
}

/// Intent and route chosen for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    pub intent: Intent,
    pub route: Route,

    /// True when `intent` is the configured fallback, not a classification
    pub fallback: bool,
}

/// Response strategy for each intent
pub fn route_for(intent: Intent) -> Route {
    match intent {
        Intent::NewTopic => Route::RetrievalWithoutContext,
        Intent::Continuation => Route::RetrievalWithContext,
        Intent::AdditionalComment => Route::DirectWithContext,
        Intent::CasualChat => Route::DirectWithoutContext,
    }
}

/// Read the current turn's intent from a tagged classifier reply.
///
/// The reply holds one `<utterance_intent>` tag per utterance; the last one
/// belongs to the current turn.
pub fn parse_intent(raw: &str) -> Option<Intent> {
    let tag = Regex::new(r"(?s)<utterance_intent>\s*(.*?)\s*</utterance_intent>").ok()?;
    let label = tag.captures_iter(raw).last()?.get(1)?.as_str();
    Intent::from_label(label)
}

pub struct DialogueRouter {
    model: Arc<dyn LanguageModel>,
    fallback_intent: Intent,
}

impl DialogueRouter {
    pub fn new(model: Arc<dyn LanguageModel>, fallback_intent: Intent) -> Self {
        Self {
            model,
            fallback_intent,
        }
    }

    /// Classify on the windowed transcript, so the first follow-up after a
    /// single exchange can already be told apart from a new topic.
    pub async fn classify(&self, turn: &ConversationTurn) -> IntentOutcome {
        let prompt = prompts::intent_classification(&turn.transcript());

        let raw = match self.model.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                return IntentOutcome::Unknown {
                    raw: String::new(),
                    error: Some(e.to_string()),
                }
            }
        };

        match parse_intent(&raw) {
            Some(intent) => IntentOutcome::Classified(intent),
            None => IntentOutcome::Unknown { raw, error: None },
        }
    }

    /// Classify the turn and pick its route, applying the fallback intent
    pub async fn route(&self, turn: &ConversationTurn) -> RoutingDecision {
        let (intent, fallback) = match self.classify(turn).await {
            IntentOutcome::Classified(intent) => (intent, false),
            IntentOutcome::Unknown { raw, error } => {
                warn!(
                    raw = %raw,
                    error = error.as_deref().unwrap_or(""),
                    fallback = %self.fallback_intent,
                    "Intent classification failed, using fallback intent"
                );
                (self.fallback_intent, true)
            }
        };

        lexforge_common::metrics::record_intent(intent.label(), fallback);

        let route = route_for(intent);
        debug!(intent = %intent, route = route.as_str(), fallback, "Turn routed");

        RoutingDecision {
            intent,
            route,
            fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexforge_common::errors::{AppError, Result};
    use lexforge_common::llm::Prompt;
    use lexforge_common::models::ChatMessage;

    struct Scripted(Option<&'static str>);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, _prompt: &Prompt) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or(AppError::ModelTimeout { timeout_ms: 50 })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn turn(utterance: &str) -> ConversationTurn {
        let history = vec![
            ChatMessage::user("Do we need a data export assessment?"),
            ChatMessage::assistant("Yes, in most cases."),
        ];
        ConversationTurn::new(utterance, &history, 2)
    }

    #[test]
    fn test_route_table() {
        assert_eq!(route_for(Intent::NewTopic), Route::RetrievalWithoutContext);
        assert_eq!(route_for(Intent::Continuation), Route::RetrievalWithContext);
        assert_eq!(route_for(Intent::AdditionalComment), Route::DirectWithContext);
        assert_eq!(route_for(Intent::CasualChat), Route::DirectWithoutContext);
    }

    #[test]
    fn test_parse_takes_last_utterance() {
        let raw = "<U0>\n<utterance_intent>DIFFERENT_QUESTION</utterance_intent>\n</U0>\n\
                   <U1>\n<utterance_intent>CASUAL_CHAT</utterance_intent>\n</U1>";
        assert_eq!(parse_intent(raw), Some(Intent::CasualChat));
        assert_eq!(
            parse_intent("<utterance_intent> relevant_question </utterance_intent>"),
            Some(Intent::Continuation)
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_intent("CASUAL_CHAT"), None);
        assert_eq!(parse_intent("<utterance_intent>SMALL_TALK</utterance_intent>"), None);
        assert_eq!(parse_intent("<utterance_intent>CASUAL_CHAT"), None);
        assert_eq!(parse_intent(""), None);
    }

    #[tokio::test]
    async fn test_well_formed_reply_classifies() {
        let router = DialogueRouter::new(
            Arc::new(Scripted(Some(
                "<U0>\n<utterance_intent>ADDITIONAL_COMMENT</utterance_intent>\n</U0>",
            ))),
            Intent::Continuation,
        );
        assert_eq!(
            router.classify(&turn("OK, thanks")).await,
            IntentOutcome::Classified(Intent::AdditionalComment)
        );

        let decision = router.route(&turn("OK, thanks")).await;
        assert_eq!(decision.route, Route::DirectWithContext);
        assert!(!decision.fallback);
    }

    #[tokio::test]
    async fn test_malformed_reply_uses_fallback() {
        let router = DialogueRouter::new(Arc::new(Scripted(Some("I think it is a question"))), Intent::Continuation);

        match router.classify(&turn("and penalties?")).await {
            IntentOutcome::Unknown { raw, error } => {
                assert_eq!(raw, "I think it is a question");
                assert!(error.is_none());
            }
            other => panic!("expected Unknown, got {:?}", other),
        }

        let decision = router.route(&turn("and penalties?")).await;
        assert_eq!(decision.intent, Intent::Continuation);
        assert_eq!(decision.route, Route::RetrievalWithContext);
        assert!(decision.fallback);
    }

    #[derive(Default)]
    struct Recording(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl LanguageModel for Recording {
        async fn complete(&self, prompt: &Prompt) -> Result<String> {
            self.0.lock().unwrap().push(prompt.user.clone());
            Ok("<utterance_intent>RELEVANT_QUESTION</utterance_intent>".to_string())
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_first_follow_up_is_classified_with_prior_exchange() {
        let model = Arc::new(Recording::default());
        let router = DialogueRouter::new(model.clone(), Intent::Continuation);

        router.classify(&turn("and the penalties?")).await;
        router.classify(&ConversationTurn::new("hello", &[], 2)).await;

        let prompts = model.0.lock().unwrap();
        assert!(prompts[0].contains(
            "Human: Do we need a data export assessment?\nAssistant: Yes, in most cases.\nHuman: and the penalties?"
        ));
        assert!(prompts[1].contains("Human: hello"));
        assert!(!prompts[1].contains("Assistant:"));
    }

    #[tokio::test]
    async fn test_backend_error_is_unknown_with_error() {
        let router = DialogueRouter::new(Arc::new(Scripted(None)), Intent::NewTopic);
        match router.classify(&turn("hi")).await {
            IntentOutcome::Unknown { error, .. } => assert!(error.is_some()),
            other => panic!("expected Unknown, got {:?}", other),
        }
        assert_eq!(router.route(&turn("hi")).await.route, Route::RetrievalWithoutContext);
    }
}
