//! Local-template adapter

use async_trait::async_trait;

use super::{AdapterOutput, CompletionsAdapter, ProtocolAdapter, TemplateRenderer};
use crate::error::LlmError;
use crate::types::{ChatTemplateSpec, PendingRequest};
use crate::utils::CancelHandle;

/// Where the chat template comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSource {
    /// Set on the preset.
    Configured(ChatTemplateSpec),
    /// Fetched per request from the server's props endpoint.
    ServerProps(String),
}

/// Renders the prompt with minijinja, then continues through the
/// completions endpoint.
#[derive(Debug, Clone)]
pub struct LocalTemplateAdapter {
    completions: CompletionsAdapter,
    source: TemplateSource,
}

impl LocalTemplateAdapter {
    pub fn new(completions: CompletionsAdapter, source: TemplateSource) -> Self {
        Self {
            completions,
            source,
        }
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    async fn resolve_template(&self, cancel: &CancelHandle) -> Result<ChatTemplateSpec, LlmError> {
        match &self.source {
            TemplateSource::Configured(spec) => Ok(spec.clone()),
            TemplateSource::ServerProps(path) => {
                let spec: ChatTemplateSpec = self.completions.transport().get_json(path, cancel).await?;
                if spec.chat_template.trim().is_empty() {
                    return Err(LlmError::config(format!(
                        "Server props at {path} carry no chat template"
                    )));
                }
                tracing::debug!(path = %path, "Loaded chat template from server props");
                Ok(spec)
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for LocalTemplateAdapter {
    fn name(&self) -> &'static str {
        match self.source {
            TemplateSource::Configured(_) => "local-template",
            TemplateSource::ServerProps(_) => "props-template",
        }
    }

    fn validate(&self, _request: &PendingRequest) -> Result<(), LlmError> {
        if let TemplateSource::ServerProps(path) = &self.source {
            self.completions.transport().url_for(path)?;
        }
        self.completions.validate()
    }

    async fn create(
        &self,
        request: &PendingRequest,
        stream: bool,
        cancel: &CancelHandle,
    ) -> Result<AdapterOutput, LlmError> {
        self.validate(request)?;
        let spec = self.resolve_template(cancel).await?;
        let prompt = TemplateRenderer::new(spec).render_prompt(request)?;
        self.completions.complete(&prompt, stream, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;
    use crate::types::LlmConfig;

    fn completions(base: &str) -> CompletionsAdapter {
        let config = LlmConfig::new("test", base).with_completions_path("/v1/completions");
        CompletionsAdapter::new(HttpTransport::from_config(&config), config).unwrap()
    }

    #[test]
    fn validation_checks_props_url() {
        let adapter = LocalTemplateAdapter::new(
            CompletionsAdapter::new(
                HttpTransport::new("http://10.1.1.1:8080")
                    .with_page_origin(reqwest::Url::parse("https://chat.example.com").ok()),
                LlmConfig::new("t", "http://10.1.1.1:8080").with_completions_path("/v1/completions"),
            )
            .unwrap(),
            TemplateSource::ServerProps("/props".into()),
        );
        assert!(matches!(
            adapter.validate(&PendingRequest::default()),
            Err(LlmError::MixedContent(_))
        ));
    }

    #[test]
    fn names_follow_source() {
        let spec = ChatTemplateSpec {
            chat_template: "{{ messages }}".into(),
            bos_token: String::new(),
            eos_token: String::new(),
        };
        let configured = LocalTemplateAdapter::new(
            completions("http://localhost:8080"),
            TemplateSource::Configured(spec),
        );
        assert_eq!(configured.name(), "local-template");
        let props = LocalTemplateAdapter::new(
            completions("http://localhost:8080"),
            TemplateSource::ServerProps("/props".into()),
        );
        assert_eq!(props.name(), "props-template");
    }
}
