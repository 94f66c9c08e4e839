//! Conversation stream controller
//!
//! Owns the message list of one open chat and drives generations for it:
//! `Idle -> Streaming -> Idle`. Streamed text is buffered and written at most
//! once per frame (plus a short delay) so fast token streams produce a bounded
//! number of state updates. Nothing buffered is ever dropped, except when the
//! user has switched away from this opening of the chat (even if they came
//! back to it since), in which case the stream is aborted.
//!
//! # Example
//!
//! ```rust,ignore
//! let guard = ConversationGuard::new();
//! let controller = ConversationController::open(&chat, config, guard.clone(), observer);
//!
//! let worker = controller.clone();
//! tokio::spawn(async move { worker.send_message("Hello").await });
//! // later, from the UI
//! controller.stop();
//! ```

mod guard;
mod session;

pub use guard::{ConversationGuard, GuardTicket};
pub use session::{FlushOutcome, StreamSession};

use futures::StreamExt;
use reqwest::Url;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dispatch::{Dispatcher, PreparedRequest};
use crate::error::LlmError;
use crate::stream::TextStream;
use crate::thinking::mask_history;
use crate::types::{Chat, LlmConfig, Message, PendingRequest};
use crate::utils::CancelHandle;

/// Receives settled state and errors. Implemented by the persistence and UI
/// layers.
pub trait ChatObserver: Send + Sync {
    /// Called once when a chat is opened and once per settled change.
    fn on_messages_changed(&self, chat_id: Uuid, messages: &[Message]);

    /// Called for failures during generation. Aborts are never reported.
    fn on_error(&self, header: &str, content: &str);
}

/// Timing and environment of a controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// One display frame.
    pub frame_interval: Duration,
    /// Extra delay after the frame before buffered text is written.
    pub flush_delay: Duration,
    /// Origin of the hosting page, for the mixed-content check.
    pub page_origin: Option<Url>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(16),
            flush_delay: Duration::from_millis(10),
            page_origin: None,
        }
    }
}

impl ControllerOptions {
    pub fn with_page_origin(mut self, origin: Option<Url>) -> Self {
        self.page_origin = origin;
        self
    }

    fn flush_after(&self) -> Duration {
        self.frame_interval + self.flush_delay
    }
}

#[derive(Debug)]
struct ControllerState {
    config: LlmConfig,
    messages: Vec<Message>,
    loading: bool,
    cancel: Option<CancelHandle>,
}

/// How a generation ended.
#[derive(Debug)]
enum Settle {
    Completed,
    Failed(LlmError),
    Superseded,
}

/// Drives generations for one open chat. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConversationController {
    chat_id: Uuid,
    ticket: GuardTicket,
    state: Arc<Mutex<ControllerState>>,
    guard: ConversationGuard,
    observer: Arc<dyn ChatObserver>,
    options: ControllerOptions,
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("chat_id", &self.chat_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ConversationController {
    /// Open `chat` with `config`, make it the active conversation and report
    /// its messages once.
    pub fn open(
        chat: &Chat,
        config: LlmConfig,
        guard: ConversationGuard,
        observer: Arc<dyn ChatObserver>,
    ) -> Self {
        let ticket = guard.switch_to(chat.id);
        observer.on_messages_changed(chat.id, &chat.messages);
        Self {
            chat_id: chat.id,
            ticket,
            state: Arc::new(Mutex::new(ControllerState {
                config,
                messages: chat.messages.clone(),
                loading: false,
                cancel: None,
            })),
            guard,
            observer,
            options: ControllerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn config(&self) -> LlmConfig {
        self.lock().config.clone()
    }

    /// Use another preset for subsequent generations.
    pub fn set_config(&self, config: LlmConfig) {
        self.lock().config = config;
    }

    /// Append a user message and generate a reply.
    ///
    /// Blank text is ignored. Resolves when the generation has settled;
    /// only pre-flight failures are returned, later ones go to
    /// [`ChatObserver::on_error`].
    pub async fn send_message(&self, text: &str) -> Result<(), LlmError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let (prepared, session) = {
            let mut state = self.lock();
            let mut next = state.messages.clone();
            next.push(Message::user(text));
            next.push(Message::starter(state.config.response_prefix()));
            self.begin(&mut state, next)?
        };
        self.generate(prepared, session).await;
        Ok(())
    }

    /// Regenerate the assistant turn at `index`, or the one following the
    /// message at `index` when that is not an assistant turn. Everything from
    /// the regenerated turn onward is discarded.
    pub async fn refresh(&self, index: usize) -> Result<(), LlmError> {
        let (prepared, session) = {
            let mut state = self.lock();
            let target = state.messages.get(index).ok_or_else(|| out_of_range(index))?;
            let cut = if target.is_assistant() { index } else { index + 1 };
            let mut next = state.messages[..cut].to_vec();
            next.push(Message::starter(state.config.response_prefix()));
            self.begin(&mut state, next)?
        };
        self.generate(prepared, session).await;
        Ok(())
    }

    /// Resume the assistant turn at `index`, dropping every later message.
    pub async fn continue_message(&self, index: usize) -> Result<(), LlmError> {
        let (prepared, session) = {
            let mut state = self.lock();
            let target = state.messages.get(index).ok_or_else(|| out_of_range(index))?;
            if !target.is_assistant() {
                return Err(LlmError::InvalidInput(format!(
                    "Message {index} is not an assistant message"
                )));
            }
            let next = state.messages[..=index].to_vec();
            self.begin(&mut state, next)?
        };
        self.generate(prepared, session).await;
        Ok(())
    }

    /// Replace the content of the message at `index`.
    pub fn edit_message(&self, index: usize, content: impl Into<String>) -> Result<(), LlmError> {
        let messages = {
            let mut state = self.lock();
            ensure_idle(&state)?;
            let message = state.messages.get_mut(index).ok_or_else(|| out_of_range(index))?;
            message.content = content.into();
            state.messages.clone()
        };
        self.observer.on_messages_changed(self.chat_id, &messages);
        Ok(())
    }

    /// Remove the message at `index` and everything after it.
    pub fn delete_from(&self, index: usize) -> Result<(), LlmError> {
        let messages = {
            let mut state = self.lock();
            ensure_idle(&state)?;
            if index >= state.messages.len() {
                return Err(out_of_range(index));
            }
            state.messages.truncate(index);
            state.messages.clone()
        };
        self.observer.on_messages_changed(self.chat_id, &messages);
        Ok(())
    }

    /// Abort the running generation, if any. Calling it again, or when idle,
    /// does nothing.
    pub fn stop(&self) {
        if let Some(cancel) = &self.lock().cancel {
            cancel.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-flight and the `Idle -> Streaming` transition. `next` ends with
    /// the assistant turn to generate. State is only touched on success.
    fn begin(
        &self,
        state: &mut ControllerState,
        next: Vec<Message>,
    ) -> Result<(PreparedRequest, StreamSession), LlmError> {
        ensure_idle(state)?;

        let mut request = PendingRequest::from_messages(next.clone());
        if state.config.mask_thinking {
            if let Some(escapes) = state.config.thinking_escapes() {
                request.history = mask_history(&request.history, &escapes);
            }
        }
        let prepared = Dispatcher::new(state.config.clone())
            .with_page_origin(self.options.page_origin.clone())
            .prepare(request)?;

        let cancel = CancelHandle::new();
        state.messages = next;
        state.loading = true;
        state.cancel = Some(cancel.clone());
        Ok((prepared, StreamSession::new(self.ticket, self.guard.clone(), cancel)))
    }

    async fn generate(&self, prepared: PreparedRequest, mut session: StreamSession) {
        let cancel = session.cancel_handle().clone();
        let outcome = match prepared.run(cancel).await {
            Ok(text) => self.pump(text, &mut session).await,
            Err(e) if session.is_superseded() || !self.guard.is_current(self.ticket) => {
                tracing::debug!(error = %e, "Request failed after the conversation was switched");
                Settle::Superseded
            }
            Err(e) => Settle::Failed(e),
        };
        self.settle(outcome);
    }

    /// The read loop. Text is buffered and written one frame after the
    /// first unwritten chunk arrived; a final write always follows the end
    /// of the stream.
    async fn pump(&self, mut text: TextStream, session: &mut StreamSession) -> Settle {
        let flush_after = self.options.flush_after();
        let timer = tokio::time::sleep(flush_after);
        tokio::pin!(timer);
        let mut armed = false;

        let ended = loop {
            tokio::select! {
                () = &mut timer, if armed => {
                    armed = false;
                    if self.flush(session) == FlushOutcome::Superseded {
                        return Settle::Superseded;
                    }
                }
                item = text.next() => match item {
                    Some(Ok(chunk)) => {
                        session.push(&chunk);
                        if !armed {
                            timer.as_mut().reset(Instant::now() + flush_after);
                            armed = true;
                        }
                    }
                    Some(Err(e)) => break Some(e),
                    None => break None,
                },
            }
        };

        if self.flush(session) == FlushOutcome::Superseded {
            return Settle::Superseded;
        }
        match ended {
            Some(e) => Settle::Failed(e),
            None => Settle::Completed,
        }
    }

    fn flush(&self, session: &mut StreamSession) -> FlushOutcome {
        let mut state = self.lock();
        session.flush(&mut state.messages)
    }

    /// `Streaming -> Idle`.
    fn settle(&self, outcome: Settle) {
        let messages = {
            let mut state = self.lock();
            state.loading = false;
            state.cancel = None;
            state.messages.clone()
        };

        match outcome {
            Settle::Superseded => return,
            Settle::Completed => {
                tracing::debug!(chat_id = %self.chat_id, "Generation completed");
            }
            Settle::Failed(e) if e.is_abort() => {
                tracing::debug!(chat_id = %self.chat_id, "Generation stopped");
            }
            Settle::Failed(e) => {
                tracing::warn!(chat_id = %self.chat_id, error = %e, "Generation failed");
                let (header, content) = e.report();
                self.observer.on_error(&header, &content);
            }
        }
        self.observer.on_messages_changed(self.chat_id, &messages);
    }
}

fn ensure_idle(state: &ControllerState) -> Result<(), LlmError> {
    if state.loading {
        return Err(LlmError::InvalidInput(
            "A response is still being generated".to_string(),
        ));
    }
    Ok(())
}

fn out_of_range(index: usize) -> LlmError {
    LlmError::InvalidInput(format!("No message at index {index}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrefixMode;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<Vec<Message>>>,
        errors: Mutex<Vec<(String, String)>>,
    }

    impl ChatObserver for Recorder {
        fn on_messages_changed(&self, _chat_id: Uuid, messages: &[Message]) {
            self.changes.lock().unwrap().push(messages.to_vec());
        }

        fn on_error(&self, header: &str, content: &str) {
            self.errors
                .lock()
                .unwrap()
                .push((header.to_string(), content.to_string()));
        }
    }

    fn config() -> LlmConfig {
        LlmConfig::new("test", "http://127.0.0.1:9")
            .with_chat_completions_path("/v1/chat/completions")
    }

    fn open(messages: Vec<Message>, config: LlmConfig) -> (ConversationController, Arc<Recorder>) {
        let mut chat = Chat::new("Chat 1", None);
        chat.messages = messages;
        let recorder = Arc::new(Recorder::default());
        let controller =
            ConversationController::open(&chat, config, ConversationGuard::new(), recorder.clone());
        (controller, recorder)
    }

    #[test]
    fn opening_reports_messages_once() {
        let (_, recorder) = open(vec![Message::system("sys")], config());
        let changes = recorder.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0], vec![Message::system("sys")]);
    }

    #[tokio::test]
    async fn blank_message_is_a_no_op() {
        let (controller, recorder) = open(vec![], config());
        controller.send_message("   \n").await.unwrap();
        assert!(controller.messages().is_empty());
        assert!(!controller.is_loading());
        assert_eq!(recorder.changes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn preflight_failure_leaves_state_untouched() {
        let config = config().with_prefix_mode(PrefixMode::None);
        let history = vec![Message::user("hi"), Message::assistant("partial")];
        let (controller, recorder) = open(history.clone(), config);

        let err = controller.continue_message(1).await.unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));
        assert_eq!(controller.messages(), history);
        assert!(!controller.is_loading());
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn continue_requires_an_assistant_message() {
        let (controller, _) = open(vec![Message::user("hi")], config());
        assert!(matches!(
            controller.continue_message(0).await,
            Err(LlmError::InvalidInput(_))
        ));
        assert!(matches!(
            controller.refresh(5).await,
            Err(LlmError::InvalidInput(_))
        ));
    }

    #[test]
    fn edit_and_delete_are_local() {
        let history = vec![
            Message::system("sys"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
            Message::assistant("a2"),
        ];
        let (controller, recorder) = open(history, config());

        controller.edit_message(1, "q1 edited").unwrap();
        assert_eq!(controller.messages()[1].content, "q1 edited");

        controller.delete_from(3).unwrap();
        assert_eq!(controller.messages().len(), 3);
        assert!(controller.delete_from(3).is_err());
        assert!(controller.edit_message(7, "x").is_err());

        assert_eq!(recorder.changes.lock().unwrap().len(), 3);
    }

    #[test]
    fn stop_is_idempotent_when_idle() {
        let (controller, recorder) = open(vec![], config());
        controller.stop();
        controller.stop();
        assert!(!controller.is_loading());
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn default_timing_matches_one_frame_plus_delay() {
        let options = ControllerOptions::default();
        assert_eq!(options.flush_after(), Duration::from_millis(26));
    }

    fn channel_stream() -> (futures::channel::mpsc::UnboundedSender<String>, TextStream) {
        let (tx, rx) = futures::channel::mpsc::unbounded::<String>();
        (tx, Box::pin(rx.map(Ok)))
    }

    fn spawn_pump(
        controller: &ConversationController,
        text: TextStream,
    ) -> tokio::task::JoinHandle<(Settle, StreamSession)> {
        let worker = controller.clone();
        let mut session =
            StreamSession::new(worker.ticket, worker.guard.clone(), CancelHandle::new());
        tokio::spawn(async move {
            let settle = worker.pump(text, &mut session).await;
            (settle, session)
        })
    }

    fn reply(controller: &ConversationController) -> String {
        controller.messages()[1].content.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_are_written_once_per_frame() {
        let (controller, _) = open(vec![Message::user("hi"), Message::starter("")], config());
        let (tx, text) = channel_stream();
        let task = spawn_pump(&controller, text);

        tx.unbounded_send("Hel".into()).unwrap();
        tx.unbounded_send("lo".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(reply(&controller), "");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reply(&controller), "Hello");

        tx.unbounded_send(", wor".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(reply(&controller), "Hello");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reply(&controller), "Hello, wor");

        tx.unbounded_send("ld".into()).unwrap();
        drop(tx);
        let (settle, session) = task.await.unwrap();
        assert!(matches!(settle, Settle::Completed));
        assert!(session.pending().is_empty());
        assert_eq!(reply(&controller), "Hello, world");
        assert_eq!(controller.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_between_frames_stops_writing() {
        let mut chat = Chat::new("Chat 1", None);
        chat.messages = vec![Message::user("hi"), Message::starter("")];
        let guard = ConversationGuard::new();
        let controller = ConversationController::open(
            &chat,
            config(),
            guard.clone(),
            Arc::new(Recorder::default()),
        );
        let (tx, text) = channel_stream();
        let task = spawn_pump(&controller, text);

        tx.unbounded_send("a".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reply(&controller), "a");

        guard.switch_to(Uuid::new_v4());
        tx.unbounded_send("b".into()).unwrap();

        // the sender stays open, so only the frame timer can end the loop
        let (settle, session) = task.await.unwrap();
        assert!(matches!(settle, Settle::Superseded));
        assert!(session.cancel_handle().is_cancelled());
        assert!(session.pending().is_empty());
        assert_eq!(reply(&controller), "a");
        drop(tx);
    }
}
