use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{
    ChatModel, CompletionRequest, ContentPart, DEFAULT_SAMPLING, PromptMessage, SamplingParams,
};
use crate::errors::RelayError;
use crate::models::{ImagePayload, ImageStrategy, TurnInput};

pub const SYSTEM_PROMPT: &str = "You are a knowledgeable home repair assistant. \
                                 Provide clear, step-by-step guidance for home repair issues \
                                 based on text input and image analysis. \
                                 Always prioritize safety and proper techniques. \
                                 If a repair seems too complex or dangerous, recommend professional help.";

const IMAGE_ANALYSIS_PROMPT: &str = "You are inspecting a photo sent to a home repair assistant. \
                                     Describe what the image shows that matters for a repair: \
                                     the fixture or material, visible damage, wear, leaks or hazards. \
                                     Be factual and concise.";

const IMAGE_ANALYSIS_REQUEST: &str = "Describe this image for a home repair diagnosis.";

const MISSING_KEY_MESSAGE: &str = "OpenAI API key is not configured";

/// Stateless prompt relay: one turn in, one (or two, with pre-analysis) model calls out.
#[derive(Clone)]
pub struct RelayService {
    model: Option<Arc<dyn ChatModel>>,
    strategy: ImageStrategy,
    sampling: SamplingParams,
}

impl RelayService {
    /// `model` is `None` when no credential was configured; every turn then fails as misconfigured.
    pub fn new(model: Option<Arc<dyn ChatModel>>, strategy: ImageStrategy) -> Self {
        Self { model, strategy, sampling: DEFAULT_SAMPLING }
    }

    pub fn strategy(&self) -> ImageStrategy {
        self.strategy
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().map(|m| m.model_name())
    }

    pub fn is_configured(&self) -> bool {
        self.model.is_some()
    }

    /// Runs one turn. Every model call is raced against `cancel`.
    pub async fn relay(
        &self,
        input: TurnInput,
        cancel: &CancellationToken,
    ) -> Result<String, RelayError> {
        let model = self
            .model
            .as_deref()
            .ok_or_else(|| RelayError::Misconfigured(MISSING_KEY_MESSAGE.to_string()))?;

        if !input.has_text() && input.image.is_none() {
            return Err(RelayError::invalid_input("Message or image is required"));
        }

        let started = Instant::now();
        let user_parts = match (&input.image, self.strategy) {
            (None, _) => vec![ContentPart::Text(input.message.clone())],
            (Some(image), ImageStrategy::Inline) => inline_parts(&input.message, image),
            (Some(image), ImageStrategy::PreAnalysis) => {
                let description = self.analyze_image(model, image, cancel).await?;
                vec![ContentPart::Text(with_analysis(&input.message, &description))]
            }
        };

        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(PromptMessage::system(SYSTEM_PROMPT));
        messages.extend(input.history.iter().map(PromptMessage::from));
        messages.push(PromptMessage::user(user_parts));

        let request = CompletionRequest { messages, sampling: self.sampling };
        let reply = call_model(model, &request, cancel).await?;

        info!(
            history = input.history.len(),
            image = input.image.is_some(),
            strategy = self.strategy.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Relayed chat turn"
        );
        Ok(reply)
    }

    async fn analyze_image(
        &self,
        model: &dyn ChatModel,
        image: &ImagePayload,
        cancel: &CancellationToken,
    ) -> Result<String, RelayError> {
        let request = CompletionRequest {
            messages: vec![
                PromptMessage::system(IMAGE_ANALYSIS_PROMPT),
                PromptMessage::user(vec![
                    ContentPart::Text(IMAGE_ANALYSIS_REQUEST.to_string()),
                    ContentPart::ImageUrl(image.to_url()),
                ]),
            ],
            sampling: self.sampling,
        };
        call_model(model, &request, cancel).await
    }
}

fn inline_parts(message: &str, image: &ImagePayload) -> Vec<ContentPart> {
    let mut parts = Vec::with_capacity(2);
    if !message.trim().is_empty() {
        parts.push(ContentPart::Text(message.to_string()));
    }
    parts.push(ContentPart::ImageUrl(image.to_url()));
    parts
}

fn with_analysis(message: &str, description: &str) -> String {
    if message.trim().is_empty() {
        format!("Image analysis: {description}")
    } else {
        format!("{message}\n\nImage analysis: {description}")
    }
}

async fn call_model(
    model: &dyn ChatModel,
    request: &CompletionRequest,
    cancel: &CancellationToken,
) -> Result<String, RelayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!("Chat turn cancelled before the model replied");
            Err(RelayError::Cancelled)
        }
        result = model.complete(request) => result,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::agent::PromptRole;
    use crate::models::{HistoryMessage, MessageRole};

    /// Replies from a script and records every request it sees.
    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, RelayError>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        fn replying(replies: Vec<Result<String, RelayError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), seen: Mutex::default() })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, RelayError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RelayError::upstream("script exhausted")))
        }
    }

    /// Never answers; only cancellation can end a call.
    struct HangingModel;

    #[async_trait]
    impl ChatModel for HangingModel {
        fn model_name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, RelayError> {
            std::future::pending::<Result<String, RelayError>>().await
        }
    }

    fn service(model: Arc<dyn ChatModel>, strategy: ImageStrategy) -> RelayService {
        RelayService::new(Some(model), strategy)
    }

    fn text_turn(message: &str) -> TurnInput {
        TurnInput { message: message.to_string(), ..TurnInput::default() }
    }

    #[tokio::test]
    async fn text_turn_prepends_system_prompt_and_history() {
        let model = ScriptedModel::replying(vec![Ok("Turn off the water supply...".into())]);
        let svc = service(model.clone(), ImageStrategy::Inline);

        let input = TurnInput {
            message: "leaky faucet".into(),
            image: None,
            history: vec![
                HistoryMessage { role: MessageRole::User, content: "hello".into() },
                HistoryMessage { role: MessageRole::Assistant, content: "Hi! What needs fixing?".into() },
            ],
        };
        let reply = svc.relay(input, &CancellationToken::new()).await.unwrap();
        assert_eq!(reply, "Turn off the water supply...");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let roles: Vec<PromptRole> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![PromptRole::System, PromptRole::User, PromptRole::Assistant, PromptRole::User]
        );
        assert_eq!(requests[0].messages[0].text(), SYSTEM_PROMPT);
        assert_eq!(requests[0].messages[3].text(), "leaky faucet");
        assert_eq!(requests[0].sampling, DEFAULT_SAMPLING);
    }

    #[tokio::test]
    async fn empty_turn_is_rejected_without_calling_the_model() {
        let model = ScriptedModel::replying(vec![]);
        let svc = service(model.clone(), ImageStrategy::Inline);

        let err = svc.relay(text_turn("   "), &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_validation());
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_credential_is_misconfigured() {
        let svc = RelayService::new(None, ImageStrategy::Inline);
        let err = svc.relay(text_turn("hi"), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn inline_strategy_sends_image_in_the_same_call() {
        let model = ScriptedModel::replying(vec![Ok("That is a cracked tile.".into())]);
        let svc = service(model.clone(), ImageStrategy::Inline);

        let input = TurnInput {
            message: String::new(),
            image: Some(ImagePayload::Url("https://img.example/tile.jpg".into())),
            history: vec![],
        };
        svc.relay(input, &CancellationToken::new()).await.unwrap();

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let user = requests[0].messages.last().unwrap();
        assert_eq!(user.parts, vec![ContentPart::ImageUrl("https://img.example/tile.jpg".into())]);
    }

    #[tokio::test]
    async fn preanalysis_strategy_embeds_description_in_second_call() {
        let model = ScriptedModel::replying(vec![
            Ok("A water stain spreading from a ceiling joint.".into()),
            Ok("Check the plumbing above the stain first.".into()),
        ]);
        let svc = service(model.clone(), ImageStrategy::PreAnalysis);

        let input = TurnInput {
            message: String::new(),
            image: Some(ImagePayload::upload("image/jpeg", vec![0xFF, 0xD8, 0xFF]).unwrap()),
            history: vec![],
        };
        let reply = svc.relay(input, &CancellationToken::new()).await.unwrap();
        assert_eq!(reply, "Check the plumbing above the stain first.");

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].messages[1].has_image());
        assert!(requests[0].messages[1].text().contains("Describe this image"));

        let main_user = requests[1].messages.last().unwrap();
        assert!(!main_user.has_image());
        assert_eq!(
            main_user.text(),
            "Image analysis: A water stain spreading from a ceiling joint."
        );
        assert_eq!(requests[1].messages[0].text(), SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn failed_analysis_stops_before_the_main_call() {
        let model = ScriptedModel::replying(vec![Err(RelayError::RateLimited {
            message: "slow down".into(),
        })]);
        let svc = service(model.clone(), ImageStrategy::PreAnalysis);

        let input = TurnInput {
            message: "what is this?".into(),
            image: Some(ImagePayload::Url("https://img.example/x.png".into())),
            history: vec![],
        };
        let err = svc.relay(input, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimited { .. }));
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_ends_a_pending_call() {
        let svc = service(Arc::new(HangingModel), ImageStrategy::Inline);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = svc.relay(text_turn("hello?"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn analysis_text_keeps_the_users_words_first() {
        assert_eq!(
            with_analysis("is this mold?", "dark spots on drywall"),
            "is this mold?\n\nImage analysis: dark spots on drywall"
        );
    }
}
