//! Remote-template adapter

use async_trait::async_trait;
use serde_json::json;

use super::template::{messages_with_sentinel, new_sentinel, truncate_at_sentinel};
use super::{AdapterOutput, CompletionsAdapter, ProtocolAdapter};
use crate::error::LlmError;
use crate::types::PendingRequest;
use crate::types::wire::AppliedTemplate;
use crate::utils::CancelHandle;

/// Lets the server apply its own chat template, then continues from the
/// rendered prompt through the completions endpoint.
#[derive(Debug, Clone)]
pub struct RemoteTemplateAdapter {
    completions: CompletionsAdapter,
    template_path: String,
}

impl RemoteTemplateAdapter {
    pub fn new(completions: CompletionsAdapter, template_path: impl Into<String>) -> Self {
        Self {
            completions,
            template_path: template_path.into(),
        }
    }

    /// Ask the server to render `request` and cut the result at the generation point.
    pub async fn apply_template(
        &self,
        request: &PendingRequest,
        cancel: &CancelHandle,
    ) -> Result<String, LlmError> {
        let sentinel = new_sentinel();
        let body = json!({ "messages": messages_with_sentinel(request, &sentinel) });
        let applied: AppliedTemplate = self
            .completions
            .transport()
            .post_json(&self.template_path, &body, cancel)
            .await?;
        truncate_at_sentinel(&applied.prompt, &sentinel)
    }
}

#[async_trait]
impl ProtocolAdapter for RemoteTemplateAdapter {
    fn name(&self) -> &'static str {
        "remote-template"
    }

    fn validate(&self, _request: &PendingRequest) -> Result<(), LlmError> {
        self.completions.transport().url_for(&self.template_path)?;
        self.completions.validate()
    }

    async fn create(
        &self,
        request: &PendingRequest,
        stream: bool,
        cancel: &CancelHandle,
    ) -> Result<AdapterOutput, LlmError> {
        self.validate(request)?;
        let prompt = self.apply_template(request, cancel).await?;
        self.completions.complete(&prompt, stream, cancel).await
    }
}
