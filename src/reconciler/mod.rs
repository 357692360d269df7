//! Message stream reconciler
//!
//! Keeps the active room's message sequence consistent with what the backend
//! knows, merging the bulk history load with live socket events. The type is
//! a synchronous state machine: async work (history fetches, read receipts)
//! is handed back to the owner as request values, and results come back
//! tagged with the selection generation so stale ones can be discarded.

mod history;
mod merger;
mod session;

pub use history::{HistoryLoader, HistoryRequest, MarkReadRequest};
pub use merger::{SeenBatch, SeenBatcher, Timeline, TypingSlot};
pub use session::{Phase, RoomSession};

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};

use crate::error::ChatError;
use crate::models::{DeletedFor, DeliveryStatus, Message, UploadedFile};
use crate::socket::{ClientEvent, ConnectionState, OutgoingFile, OutgoingText, Scope, ServerEvent, Transport};

/// Tunables.
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Batch window for `message_seen` acknowledgments.
    pub seen_debounce: Duration,
    /// How long a typing indicator survives without a `stop_typing`.
    pub typing_expiry: Duration,
    /// Events kept while the history load is in flight.
    pub loading_buffer: usize,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            seen_debounce: Duration::from_millis(500),
            typing_expiry: Duration::from_secs(6),
            loading_buffer: 256,
        }
    }
}

/// Broadcast to observers whenever visible state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    MessagesChanged { room_id: String, count: usize },
    TypingChanged { room_id: String, user: Option<String> },
    ConnectionChanged(ConnectionState),
    LoadFailed(ChatError),
    UploadFailed(ChatError),
}

/// Async work the owner must carry out after a history result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchHistory(HistoryRequest),
    MarkRead(MarkReadRequest),
}

pub struct Reconciler {
    viewer: String,
    transport: Arc<dyn Transport>,
    options: ReconcilerOptions,
    session: RoomSession,
    history: HistoryLoader,
    timeline: Timeline,
    buffered: VecDeque<ServerEvent>,
    overflowed: bool,
    seen: SeenBatcher,
    typing: TypingSlot,
    reply_draft: Option<String>,
    media_panel_open: bool,
    load_error: Option<ChatError>,
    upload_error: Option<ChatError>,
    connection: ConnectionState,
    notify: broadcast::Sender<Notification>,
}

impl Reconciler {
    pub fn new(viewer: impl Into<String>, transport: Arc<dyn Transport>, options: ReconcilerOptions) -> Self {
        let viewer = viewer.into();
        let (notify, _) = broadcast::channel(64);
        let connection = if transport.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        };
        Self {
            session: RoomSession::new(viewer.clone()),
            seen: SeenBatcher::new(options.seen_debounce),
            typing: TypingSlot::new(options.typing_expiry),
            viewer,
            transport,
            options,
            history: HistoryLoader::default(),
            timeline: Timeline::default(),
            buffered: VecDeque::new(),
            overflowed: false,
            reply_draft: None,
            media_panel_open: false,
            load_error: None,
            upload_error: None,
            connection,
            notify,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify.subscribe()
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    pub fn selected_room(&self) -> Option<&str> {
        self.session.selected()
    }

    pub fn peer(&self) -> Option<&str> {
        self.session.peer()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.as_slice()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.timeline.get(id)
    }

    pub fn typing_user(&self) -> Option<&str> {
        self.typing.user()
    }

    pub fn load_error(&self) -> Option<&ChatError> {
        self.load_error.as_ref()
    }

    pub fn upload_error(&self) -> Option<&ChatError> {
        self.upload_error.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn reply_draft(&self) -> Option<&Message> {
        self.reply_draft.as_deref().and_then(|id| self.timeline.get(id))
    }

    pub fn media_panel_open(&self) -> bool {
        self.media_panel_open
    }

    pub fn set_media_panel(&mut self, open: bool) {
        self.media_panel_open = open;
    }

    /// Switch the active room. `peer` is the already resolved other
    /// participant. Returns the history load to run, if any.
    pub fn select_room(&mut self, room_id: Option<&str>, peer: Option<String>) -> Option<HistoryRequest> {
        if room_id == self.session.selected() && self.session.phase() != Phase::TornDown {
            return None;
        }
        tracing::info!("Selecting room {:?}", room_id);

        // Acks for the room being left go out before its leave_room.
        self.flush_seen();
        let generation = self.session.select(self.transport.as_ref(), room_id, peer);
        self.reset_transient();

        let room = room_id?;
        self.notify_messages();
        self.history.begin(room, &self.viewer, generation)
    }

    /// Feed back the outcome of a [`HistoryRequest`].
    pub fn history_loaded(
        &mut self,
        generation: u64,
        room_id: &str,
        result: Result<Vec<Message>, ChatError>,
        now: Instant,
    ) -> Vec<Effect> {
        if !self.history.finish(room_id, generation) || !self.session.is_current(generation, room_id) {
            tracing::debug!("Dropping stale history for {} (generation {})", room_id, generation);
            return Vec::new();
        }

        let mut effects = Vec::new();
        let initial = self.session.phase() == Phase::Loading;

        match result {
            Ok(batch) => {
                let batch: Vec<Message> = batch
                    .into_iter()
                    .filter(|m| m.room_id.as_deref().map_or(true, |r| r == room_id))
                    .collect();
                tracing::debug!("Loaded {} messages for {}", batch.len(), room_id);
                let non_empty = !batch.is_empty();
                self.session.set_phase(Phase::Live);
                if initial {
                    self.timeline.seed(batch);
                } else {
                    self.timeline.reconcile(batch);
                }
                self.load_error = None;
                if non_empty {
                    effects.push(Effect::MarkRead(MarkReadRequest {
                        room_id: room_id.to_string(),
                        viewer: self.viewer.clone(),
                    }));
                }
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.load_error = Some(e.clone());
                let _ = self.notify.send(Notification::LoadFailed(e));
                if initial {
                    // Nothing to merge into yet; keep buffering until a retry lands.
                    return effects;
                }
            }
        }

        for event in std::mem::take(&mut self.buffered) {
            self.apply(event, now);
        }
        if std::mem::take(&mut self.overflowed) {
            tracing::warn!("Event buffer overflowed while loading {}, refetching", room_id);
            if let Some(req) = self.history.begin(room_id, &self.viewer, generation) {
                effects.push(Effect::FetchHistory(req));
            }
        }

        self.notify_messages();
        effects
    }

    /// Re-run the history load for the active room.
    pub fn retry_history(&mut self) -> Option<HistoryRequest> {
        let room = self.session.selected()?.to_string();
        if self.session.phase() == Phase::TornDown {
            return None;
        }
        self.load_error = None;
        self.history.begin(&room, &self.viewer, self.session.generation())
    }

    /// Merge one live event. Directory-scoped events are ignored here.
    pub fn handle_event(&mut self, event: ServerEvent, now: Instant) {
        if event.scope() == Scope::Directory {
            return;
        }
        match self.session.phase() {
            Phase::Idle | Phase::TornDown => {
                tracing::debug!("No active room, dropping {:?}", event);
            }
            Phase::Loading => {
                if !self.for_active_room(&event) {
                    return;
                }
                self.buffered.push_back(event);
                if self.buffered.len() > self.options.loading_buffer {
                    self.buffered.pop_front();
                    self.overflowed = true;
                }
            }
            Phase::Live => self.apply(event, now),
        }
    }

    pub fn on_connected(&mut self) -> Option<HistoryRequest> {
        self.set_connection(ConnectionState::Connected);
        self.session.on_connected(self.transport.as_ref());

        // Reload to cover whatever was missed while down.
        match self.session.phase() {
            Phase::Loading | Phase::Live => {
                let room = self.session.selected()?.to_string();
                self.history.begin(&room, &self.viewer, self.session.generation())
            }
            Phase::Idle | Phase::TornDown => None,
        }
    }

    /// The sequence is kept; only membership is forgotten.
    pub fn on_disconnected(&mut self) {
        self.session.on_disconnected();
        self.set_connection(ConnectionState::Disconnected);
    }

    pub fn send_text(&mut self, body: &str, reply_to_id: Option<&str>) -> Result<(), ChatError> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(());
        }
        let (room_id, receiver) = self.target()?;
        let reply_to_id = reply_to_id
            .map(String::from)
            .or_else(|| self.reply_draft.clone());

        self.transport.emit(ClientEvent::SendMessage(OutgoingText {
            room_id: room_id.clone(),
            sender: self.viewer.clone(),
            receiver,
            message: body.to_string(),
            reply_to_id,
        }))?;
        self.reply_draft = None;
        self.emit(ClientEvent::StopTyping {
            room_id,
            sender: self.viewer.clone(),
        });
        Ok(())
    }

    /// Announce an uploaded file. Only called once the upload succeeded.
    pub fn send_file(&mut self, file: &UploadedFile) -> Result<(), ChatError> {
        let (room_id, receiver) = self.target()?;
        self.transport.emit(ClientEvent::SendFile(OutgoingFile::new(
            &room_id,
            &self.viewer,
            &receiver,
            file,
        )))?;
        self.upload_error = None;
        Ok(())
    }

    pub fn upload_failed(&mut self, err: ChatError) {
        tracing::warn!("{}", err);
        self.upload_error = Some(err.clone());
        let _ = self.notify.send(Notification::UploadFailed(err));
    }

    /// Start a reply draft. Deleted or unknown targets are refused.
    pub fn reply(&mut self, message_id: &str) -> bool {
        match self.timeline.get(message_id) {
            Some(m) if !m.is_deleted => {
                self.reply_draft = Some(message_id.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn cancel_reply(&mut self) {
        self.reply_draft = None;
    }

    pub fn mark_read(&self) -> Option<MarkReadRequest> {
        Some(MarkReadRequest {
            room_id: self.session.selected()?.to_string(),
            viewer: self.viewer.clone(),
        })
    }

    pub fn typing(&self) {
        if let Some(room_id) = self.session.selected() {
            self.emit(ClientEvent::Typing {
                room_id: room_id.to_string(),
                sender: self.viewer.clone(),
            });
        }
    }

    pub fn stop_typing(&self) {
        if let Some(room_id) = self.session.selected() {
            self.emit(ClientEvent::StopTyping {
                room_id: room_id.to_string(),
                sender: self.viewer.clone(),
            });
        }
    }

    /// Earliest instant [`Reconciler::poll_timers`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.seen.deadline(), self.typing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(batch) = self.seen.take_due(now) {
            self.send_seen(batch);
        }
        if self.typing.expire(now) {
            self.notify_typing();
        }
    }

    /// Apply a deletion confirmed by the REST call, ahead of the broadcast.
    pub fn apply_local_delete(&mut self, message_id: &str, scope: DeletedFor) {
        if self.delete(message_id, scope) {
            self.notify_messages();
        }
    }

    pub fn teardown(&mut self) {
        self.flush_seen();
        self.session.teardown(self.transport.as_ref());
        self.history.cancel();
        self.buffered.clear();
        self.overflowed = false;
        if self.typing.clear() {
            self.notify_typing();
        }
    }

    fn apply(&mut self, event: ServerEvent, now: Instant) {
        if !self.for_active_room(&event) {
            return;
        }
        let Some(room_id) = self.session.selected().map(String::from) else {
            return;
        };

        match event {
            ServerEvent::NewMessage(msg) => {
                let id = msg.id.clone();
                let from_peer = msg.sender_name != self.viewer;
                if !self.timeline.insert_live(msg) {
                    tracing::debug!("Duplicate message {} ignored", id);
                    return;
                }
                if from_peer {
                    self.seen.schedule(&room_id, &id, now);
                }
                self.notify_messages();
            }
            ServerEvent::Delivered { message_id } => {
                if self.timeline.raise(&message_id, DeliveryStatus::Delivered) {
                    self.notify_messages();
                }
            }
            ServerEvent::Seen { message_ids } => {
                if self.timeline.mark_seen(&message_ids) > 0 {
                    self.notify_messages();
                }
            }
            ServerEvent::Typing { sender, .. } => {
                if sender != self.viewer && self.typing.start(&sender, now) {
                    self.notify_typing();
                }
            }
            ServerEvent::StopTyping { sender, .. } => {
                if sender.as_deref() == Some(self.viewer.as_str()) {
                    return;
                }
                if self.typing.stop(sender.as_deref()) {
                    self.notify_typing();
                }
            }
            ServerEvent::Deleted {
                message_id,
                deleted_for,
                ..
            } => {
                if self.delete(&message_id, deleted_for) {
                    self.notify_messages();
                }
            }
            other => tracing::debug!("Not a room event: {:?}", other),
        }
    }

    fn delete(&mut self, message_id: &str, scope: DeletedFor) -> bool {
        if !self.timeline.delete(message_id, scope) {
            return false;
        }
        if self.reply_draft.as_deref() == Some(message_id) {
            self.reply_draft = None;
        }
        true
    }

    /// Events tagged with another room are discarded, never queued.
    fn for_active_room(&self, event: &ServerEvent) -> bool {
        match (event.room_id(), self.session.selected()) {
            (Some(tagged), Some(active)) if tagged != active => {
                tracing::debug!("Dropping event for inactive room {}", tagged);
                false
            }
            (_, None) => false,
            _ => true,
        }
    }

    fn target(&self) -> Result<(String, String), ChatError> {
        let room_id = self.session.selected().ok_or(ChatError::NoRoom)?;
        let receiver = self
            .session
            .peer()
            .ok_or_else(|| ChatError::NoRecipient(room_id.to_string()))?;
        Ok((room_id.to_string(), receiver.to_string()))
    }

    fn reset_transient(&mut self) {
        self.timeline.clear();
        self.history.cancel();
        self.buffered.clear();
        self.overflowed = false;
        self.reply_draft = None;
        self.media_panel_open = false;
        self.load_error = None;
        self.upload_error = None;
        self.seen.take_all();
        if self.typing.clear() {
            self.notify_typing();
        }
    }

    fn flush_seen(&mut self) {
        if let Some(batch) = self.seen.take_all() {
            self.send_seen(batch);
        }
    }

    fn send_seen(&self, batch: SeenBatch) {
        if self.session.selected() != Some(batch.room_id.as_str()) {
            return;
        }
        tracing::debug!("Acknowledging {} messages in {}", batch.message_ids.len(), batch.room_id);
        self.emit(ClientEvent::MessageSeen {
            room_id: batch.room_id,
            viewer: self.viewer.clone(),
            message_ids: batch.message_ids,
        });
    }

    fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.transport.emit(event) {
            tracing::warn!("Dropped {}: {}", name, e);
        }
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            self.connection = state;
            let _ = self.notify.send(Notification::ConnectionChanged(state));
        }
    }

    fn notify_messages(&self) {
        if let Some(room_id) = self.session.selected() {
            let _ = self.notify.send(Notification::MessagesChanged {
                room_id: room_id.to_string(),
                count: self.timeline.len(),
            });
        }
    }

    fn notify_typing(&self) {
        if let Some(room_id) = self.session.selected() {
            let _ = self.notify.send(Notification::TypingChanged {
                room_id: room_id.to_string(),
                user: self.typing.user().map(String::from),
            });
        }
    }
}
