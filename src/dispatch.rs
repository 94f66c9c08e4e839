//! Protocol selection and dispatch
//!
//! [`select_protocol`] is a pure decision over the preset and the pending
//! request. [`Dispatcher`] builds the chosen adapter, runs every check that
//! needs no network I/O, and turns the adapter output into display text.
//!
//! Decision order:
//! 1. no chat-completions path: completions fallback
//! 2. a custom chat template is set: local template, even with a chat path
//! 3. prefix mode `None` while continuing an assistant turn: completions fallback
//! 4. otherwise: native chat completions
//!
//! The completions fallback prefers the custom template, then the remote
//! template endpoint, then the server's props, and needs a completions path.

use reqwest::Url;

use crate::adapters::{
    AdapterOutput, CompletionsAdapter, LocalTemplateAdapter, NativeChatAdapter, ProtocolAdapter,
    RemoteTemplateAdapter, TemplateSource,
};
use crate::error::LlmError;
use crate::stream::TextStream;
use crate::thinking::ThinkingInjector;
use crate::transport::HttpTransport;
use crate::types::{LlmConfig, PendingRequest, PrefixMode, ThinkingEscapes};
use crate::utils::{CancelHandle, make_cancellable_stream};

/// Where a local template comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateOrigin {
    Configured,
    ServerProps,
}

/// The request path chosen for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    NativeChat,
    RemoteTemplate,
    LocalTemplate(TemplateOrigin),
}

impl Protocol {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::NativeChat)
    }
}

pub fn select_protocol(config: &LlmConfig, request: &PendingRequest) -> Result<Protocol, LlmError> {
    let Some(_) = config.chat_completions_path() else {
        return completions_fallback(config, "No chat completions path is configured");
    };
    if config.chat_template().is_some() {
        return completions_fallback(config, "A custom chat template is configured");
    }
    if config.prefix_mode == PrefixMode::None && request.is_continuation() {
        return completions_fallback(
            config,
            "The chat endpoint cannot continue an assistant message with prefix mode off",
        );
    }
    Ok(Protocol::NativeChat)
}

fn completions_fallback(config: &LlmConfig, reason: &str) -> Result<Protocol, LlmError> {
    if config.completions_path().is_none() {
        return Err(LlmError::config(format!(
            "{reason}, and no completions path is configured"
        )));
    }
    if config.chat_template().is_some() {
        return Ok(Protocol::LocalTemplate(TemplateOrigin::Configured));
    }
    if config.template_path().is_some() {
        return Ok(Protocol::RemoteTemplate);
    }
    if config.props_path().is_some() {
        return Ok(Protocol::LocalTemplate(TemplateOrigin::ServerProps));
    }
    Err(LlmError::config(format!(
        "{reason}; the completions path needs a chat template, a template path or a props path"
    )))
}

/// Runs generations for one preset.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: LlmConfig,
    transport: HttpTransport,
}

impl Dispatcher {
    pub fn new(config: LlmConfig) -> Self {
        let transport = HttpTransport::from_config(&config);
        Self { config, transport }
    }

    pub fn with_page_origin(mut self, origin: Option<Url>) -> Self {
        self.transport = self.transport.with_page_origin(origin);
        self
    }

    pub fn with_transport(mut self, transport: HttpTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn build_adapter(&self, protocol: Protocol) -> Result<Box<dyn ProtocolAdapter>, LlmError> {
        let transport = self.transport.clone();
        let config = self.config.clone();
        let adapter: Box<dyn ProtocolAdapter> = match protocol {
            Protocol::NativeChat => Box::new(NativeChatAdapter::new(transport, config)?),
            Protocol::RemoteTemplate => {
                let path = self
                    .config
                    .template_path()
                    .ok_or_else(|| LlmError::config("No template path configured"))?
                    .to_string();
                Box::new(RemoteTemplateAdapter::new(
                    CompletionsAdapter::new(transport, config)?,
                    path,
                ))
            }
            Protocol::LocalTemplate(origin) => {
                let source = match origin {
                    TemplateOrigin::Configured => TemplateSource::Configured(
                        self.config
                            .chat_template()
                            .ok_or_else(|| LlmError::config("No chat template configured"))?,
                    ),
                    TemplateOrigin::ServerProps => TemplateSource::ServerProps(
                        self.config
                            .props_path()
                            .ok_or_else(|| LlmError::config("No props path configured"))?
                            .to_string(),
                    ),
                };
                Box::new(LocalTemplateAdapter::new(
                    CompletionsAdapter::new(transport, config)?,
                    source,
                ))
            }
        };
        Ok(adapter)
    }

    /// Select and validate. Fails before any request is issued.
    pub fn prepare(&self, request: PendingRequest) -> Result<PreparedRequest, LlmError> {
        self.config.validate()?;
        let protocol = select_protocol(&self.config, &request)?;
        let adapter = self.build_adapter(protocol)?;
        adapter.validate(&request)?;
        tracing::info!(
            preset = %self.config.name,
            protocol = adapter.name(),
            continuation = request.is_continuation(),
            "Dispatching generation"
        );
        Ok(PreparedRequest {
            protocol,
            adapter,
            request,
            stream: self.config.stream_enabled(),
            escapes: self.config.thinking_escapes(),
        })
    }

    pub async fn dispatch(
        &self,
        request: PendingRequest,
        cancel: CancelHandle,
    ) -> Result<TextStream, LlmError> {
        self.prepare(request)?.run(cancel).await
    }
}

/// A validated generation, ready to send.
pub struct PreparedRequest {
    protocol: Protocol,
    adapter: Box<dyn ProtocolAdapter>,
    request: PendingRequest,
    stream: bool,
    escapes: Option<ThinkingEscapes>,
}

impl std::fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("protocol", &self.protocol)
            .field("adapter", &self.adapter.name())
            .field("request", &self.request)
            .field("stream", &self.stream)
            .finish()
    }
}

impl PreparedRequest {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn request(&self) -> &PendingRequest {
        &self.request
    }

    /// Send the request and return its display text.
    ///
    /// Only the chat endpoint reports reasoning separately, so only it resumes
    /// an open thinking span from the continuation seed.
    pub async fn run(self, cancel: CancelHandle) -> Result<TextStream, LlmError> {
        let mut injector = if self.protocol.is_native() {
            ThinkingInjector::resuming(self.escapes, self.request.seed_content())
        } else {
            ThinkingInjector::new(self.escapes)
        };

        let text: TextStream = match self.adapter.create(&self.request, self.stream, &cancel).await? {
            AdapterOutput::Stream(deltas) => injector.into_text_stream(deltas),
            AdapterOutput::Complete(delta) => {
                let text = injector.wrap_complete(&delta);
                Box::pin(futures::stream::iter((!text.is_empty()).then_some(Ok(text))))
            }
        };
        Ok(make_cancellable_stream(text, cancel))
    }
}
