//! # Message Router
//!
//! Sits between the user and the two transports. It decides where each user
//! action goes, and it is the only component that writes the conversation history.
//!
//! ## Event Loop:
//! One `tokio::select!` loop handles three queues:
//! 1. **User actions** (typed text, record toggle, clear, quit)
//! 2. **Session events** (inbound frames, state changes, closes)
//! 3. **Internal completions** (audio exchanges and voice discovery running as tasks)
//!
//! An audio exchange runs as its own task so streaming frames keep flowing while
//! it is in flight. No ordering is assumed between the two channels.
//!
//! ## History Rule:
//! The history changes only when the backend confirms it: a `chat_response`
//! frame, a successful audio reply, or `history_cleared`. The user's own entry
//! appears in the display log right away, but not in the history.

use crate::audio::AudioCapture;
use crate::config::SpeechConfig;
use crate::error::{ClientError, ClientResult};
use crate::exchange::AudioExchangeClient;
use crate::history::ConversationHistory;
use crate::protocol::{AudioReply, InboundMessage, OutboundMessage};
use crate::session::{ConnectionState, SessionEvent, SessionManager};
use crate::speech::{list_voices, SpeechScheduler, Voice};
use crate::state::ClientState;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shown in place of the user's words until the transcription comes back.
pub const AUDIO_PLACEHOLDER: &str = "[Sending audio...]";

/// Things the user can ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    SubmitText(String),
    ToggleRecording,
    ClearHistory,
    Quit,
}

impl UserAction {
    /// Interpret one line of console input. Blank lines produce nothing.
    ///
    /// ## Commands:
    /// - `/record` toggles recording
    /// - `/clear` asks the backend to clear the history
    /// - `/quit` or `/exit` stops the client
    /// - anything else is sent as text
    pub fn from_input(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        match trimmed {
            "" => None,
            "/record" => Some(UserAction::ToggleRecording),
            "/clear" => Some(UserAction::ClearHistory),
            "/quit" | "/exit" => Some(UserAction::Quit),
            _ => Some(UserAction::SubmitText(trimmed.to_string())),
        }
    }
}

/// Results of background work, delivered back into the router loop.
#[derive(Debug)]
pub enum RouterEvent {
    AudioCompleted(ClientResult<AudioReply>),
    VoicesLoaded(ClientResult<Vec<Voice>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    User,
    Assistant,
    Error,
    Info,
}

/// One line of the visible conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEntry {
    pub kind: EntryKind,
    pub text: String,
}

/// Where the conversation is shown.
///
/// The router only calls these hooks; how they look is up to the implementation.
pub trait ChatView: Send {
    fn entry_added(&mut self, entry: &DisplayEntry);

    /// An earlier entry changed (the audio placeholder became the transcription).
    fn entry_replaced(&mut self, index: usize, entry: &DisplayEntry);

    fn recording_changed(&mut self, _recording: bool) {}

    fn connection_changed(&mut self, _state: ConnectionState) {}
}

/// The visible conversation: entries plus the view they are rendered to.
pub struct DisplayLog {
    entries: Vec<DisplayEntry>,
    view: Box<dyn ChatView>,
}

impl DisplayLog {
    pub fn new(view: Box<dyn ChatView>) -> Self {
        Self { entries: Vec::new(), view }
    }

    pub fn push(&mut self, kind: EntryKind, text: impl Into<String>) {
        let entry = DisplayEntry { kind, text: text.into() };
        self.view.entry_added(&entry);
        self.entries.push(entry);
    }

    /// Replace the last user entry if it is still the audio placeholder.
    pub fn resolve_placeholder(&mut self, text: impl Into<String>) -> bool {
        let last_user = self.entries.iter().rposition(|e| e.kind == EntryKind::User);
        match last_user {
            Some(index) if self.entries[index].text == AUDIO_PLACEHOLDER => {
                self.entries[index].text = text.into();
                self.view.entry_replaced(index, &self.entries[index]);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[DisplayEntry] {
        &self.entries
    }

    pub fn view_mut(&mut self) -> &mut dyn ChatView {
        self.view.as_mut()
    }
}

/// Terminal rendering of the conversation.
#[derive(Debug, Default)]
pub struct ConsoleView;

impl ChatView for ConsoleView {
    fn entry_added(&mut self, entry: &DisplayEntry) {
        match entry.kind {
            EntryKind::User => println!("You: {}", entry.text),
            EntryKind::Assistant => println!("AI:  {}", entry.text),
            EntryKind::Error => eprintln!("!!   {}", entry.text),
            EntryKind::Info => println!("--   {}", entry.text),
        }
    }

    fn entry_replaced(&mut self, _index: usize, entry: &DisplayEntry) {
        println!("You: {}", entry.text);
    }

    fn recording_changed(&mut self, recording: bool) {
        if recording {
            println!("--   Recording... type /record again to stop");
        } else {
            println!("--   Recording stopped");
        }
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Open => println!("--   Connected"),
            ConnectionState::Reconnecting => println!("--   Disconnected, reconnecting..."),
            _ => {}
        }
    }
}

pub struct MessageRouter {
    session: SessionManager,
    capture: AudioCapture,
    speech: SpeechScheduler,
    exchange: AudioExchangeClient,
    history: ConversationHistory,
    log: DisplayLog,
    metrics: ClientState,
    /// A transport notice was shown for the current outage
    outage_reported: bool,
    events_tx: mpsc::UnboundedSender<RouterEvent>,
    events_rx: mpsc::UnboundedReceiver<RouterEvent>,
}

impl MessageRouter {
    pub fn new(
        session: SessionManager,
        capture: AudioCapture,
        speech: SpeechScheduler,
        exchange: AudioExchangeClient,
        view: Box<dyn ChatView>,
        metrics: ClientState,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session,
            capture,
            speech,
            exchange,
            history: ConversationHistory::new(),
            log: DisplayLog::new(view),
            metrics,
            outage_reported: false,
            events_tx,
            events_rx,
        }
    }

    #[cfg(test)]
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[cfg(test)]
    pub fn log(&self) -> &DisplayLog {
        &self.log
    }

    /// Discover voices in the background; the result arrives as `VoicesLoaded`.
    pub fn load_voices(&self, config: SpeechConfig) {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = list_voices(&config).await;
            let _ = tx.send(RouterEvent::VoicesLoaded(result));
        });
    }

    /// Connect and process events until `Quit` or the action channel closes.
    pub async fn run(
        mut self,
        mut actions: mpsc::Receiver<UserAction>,
        mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        self.session.connect();
        info!("Message router started");

        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(UserAction::Quit) | None => break,
                    Some(action) => self.handle_action(action),
                },
                Some(event) = session_events.recv() => self.handle_session_event(event),
                Some(event) = self.events_rx.recv() => self.handle_router_event(event),
            }
        }

        self.speech.cancel();
        self.session.shutdown();
        info!(turns = self.history.turns().len(), "Message router stopped");
    }

    pub fn handle_action(&mut self, action: UserAction) {
        debug!(?action, "User action");
        match action {
            UserAction::SubmitText(text) => {
                let _ = self.submit_text(&text);
            }
            UserAction::ToggleRecording => self.toggle_recording(),
            UserAction::ClearHistory => {
                let _ = self.clear_history();
            }
            UserAction::Quit => {}
        }
    }

    /// Send typed text on the streaming channel.
    ///
    /// ## Steps:
    /// 1. Trim; blank input is ignored
    /// 2. Not `Open` → "Not connected to the server." and `NotConnected`, transport untouched
    /// 3. Cancel speech, show the user's entry, send `text_message`
    pub fn submit_text(&mut self, text: &str) -> ClientResult<()> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(());
        }

        if !self.session.is_open() {
            warn!(state = self.session.state().as_str(), "Text not sent: channel not open");
            let err = ClientError::NotConnected;
            self.report(&err);
            return Err(err);
        }

        self.speech.cancel();
        self.log.push(EntryKind::User, content);

        if let Err(err) = self.session.send(OutboundMessage::text(content)) {
            warn!(error = %err, "Text send failed");
            self.report(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Ask the backend to forget this conversation.
    pub fn clear_history(&mut self) -> ClientResult<()> {
        if let Err(err) = self.session.send(OutboundMessage::ClearHistory) {
            self.report(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Show a failure. Transport-level problems are informational because the
    /// session recovers from them on its own.
    fn report(&mut self, err: &ClientError) {
        let kind = if err.is_transport_level() { EntryKind::Info } else { EntryKind::Error };
        self.log.push(kind, err.user_notice());
    }

    /// Start recording, or stop and upload.
    pub fn toggle_recording(&mut self) {
        if self.capture.is_capturing() {
            let result = self.capture.stop_capture();
            self.log.view_mut().recording_changed(false);
            match result {
                Ok(wav) => self.submit_audio(wav),
                Err(err) => {
                    error!(error = %err, "Recording could not be encoded");
                    self.report(&err);
                }
            }
        } else {
            match self.capture.start_capture() {
                Ok(()) => self.log.view_mut().recording_changed(true),
                Err(err) => {
                    error!(error = %err, "Microphone unavailable");
                    self.report(&err);
                }
            }
        }
    }

    /// Upload a recording on the request/response channel.
    ///
    /// The exchange runs as a task with a snapshot of the history; its result
    /// comes back as `RouterEvent::AudioCompleted`. Works whether or not the
    /// streaming channel is open.
    pub fn submit_audio(&mut self, wav: Vec<u8>) {
        self.speech.cancel();
        self.log.push(EntryKind::User, AUDIO_PLACEHOLDER);
        self.metrics.record(|m| m.audio_exchanges += 1);

        let client = self.exchange.clone();
        let history = self.history.snapshot();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = client.submit(wav, &history).await;
            let _ = tx.send(RouterEvent::AudioCompleted(result));
        });
    }

    pub fn handle_router_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::AudioCompleted(Ok(reply)) => {
                self.log.resolve_placeholder(format!("🎤: \"{}\"", reply.transcription));
                self.log.push(EntryKind::Assistant, reply.response.clone());
                self.history.replace_from_echo(reply.conversation_history);
                self.speak(&reply.response);
            }
            RouterEvent::AudioCompleted(Err(err)) => {
                self.metrics.record(|m| m.audio_failures += 1);
                self.report(&err);
            }
            RouterEvent::VoicesLoaded(Ok(voices)) => self.speech.on_voices_ready(&voices),
            RouterEvent::VoicesLoaded(Err(err)) => {
                warn!(error = %err, "Voice discovery failed, keeping the synthesizer default");
            }
        }
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                if state == ConnectionState::Open {
                    self.outage_reported = false;
                }
                self.log.view_mut().connection_changed(state);
            }
            SessionEvent::Inbound(message) => self.handle_inbound(message),
            SessionEvent::Closed { reason, error: true } => {
                // One notice per outage, not one per failed dial
                if self.outage_reported {
                    debug!(%reason, "Streaming channel still down");
                    return;
                }
                self.outage_reported = true;
                self.report(&ClientError::TransportClosed(reason));
            }
            SessionEvent::Closed { reason, error: false } => {
                debug!(%reason, "Streaming channel closed, session will reconnect");
            }
        }
    }

    fn handle_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::ChatResponse { ai_response, conversation_history, .. } => {
                self.history.replace_from_echo(conversation_history);
                self.log.push(EntryKind::Assistant, ai_response.clone());
                self.speak(&ai_response);
            }
            InboundMessage::Error { message } => {
                self.log.push(EntryKind::Error, format!("Server Error: {}", message));
            }
            InboundMessage::HistoryCleared { message } => {
                self.history.clear();
                let notice = if message.is_empty() { "Conversation history cleared".to_string() } else { message };
                self.log.push(EntryKind::Info, notice);
            }
        }
    }

    /// Speech failures are logged; the text is already on screen.
    fn speak(&mut self, text: &str) {
        if let Err(err) = self.speech.speak(text) {
            warn!(error = %err, "Speech output failed");
        }
    }
}
