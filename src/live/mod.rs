//! Interactive chat session
//!
//! [`LiveChat`] wires the reconciler and the room directory to the socket
//! and to REST calls running on their own tasks. [`run`] drives it from
//! stdin until the user quits.

pub mod actions;
mod backend;
pub mod input;
mod render;

pub use backend::{spawn_outcome, ChatBackend, Outcome, RestBackend};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration, Instant};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::api::chat::{format_size, media_of};
use crate::api::ChatClient;
use crate::config::Config;
use crate::directory::{DirectoryChange, RoomDirectory};
use crate::error::ChatError;
use crate::models::{resolve_peer, DeletedFor};
use crate::reconciler::{Effect, HistoryRequest, MarkReadRequest, Notification, Reconciler, ReconcilerOptions};
use crate::socket::{ConnectionState, Scope, SocketEvent, SocketOptions, SocketTransport, Transport};

use input::Command;
use render::Renderer;

pub struct LiveChat<B: ChatBackend> {
    backend: Arc<B>,
    reconciler: Reconciler,
    directory: RoomDirectory,
    outcomes: mpsc::UnboundedSender<Outcome>,
}

impl<B: ChatBackend> LiveChat<B> {
    /// Build a session. Request outcomes arrive on the returned receiver and
    /// must be fed back through [`LiveChat::handle_outcome`].
    pub fn new(
        viewer: impl Into<String>,
        backend: Arc<B>,
        transport: Arc<dyn Transport>,
        options: ReconcilerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let viewer = viewer.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let chat = Self {
            backend,
            directory: RoomDirectory::new(viewer.clone()),
            reconciler: Reconciler::new(viewer, transport, options),
            outcomes: tx,
        };
        (chat, rx)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler {
        &mut self.reconciler
    }

    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Open `room` (or close the current one with `None`). Returns the peer
    /// the room resolved to.
    pub fn select(&mut self, room: Option<&str>, cached: Option<&str>) -> Option<String> {
        let viewer = self.reconciler.viewer();
        let peer = room.and_then(|id| resolve_peer(id, self.directory.find(id), viewer, cached));
        self.directory.select(room);
        if let Some(req) = self.reconciler.select_room(room, peer.clone()) {
            self.fetch_history(req);
        }
        peer
    }

    pub fn handle_socket(&mut self, event: SocketEvent, now: Instant) {
        match event {
            SocketEvent::Connected { reconnect_attempts } => {
                if reconnect_attempts > 0 {
                    tracing::info!("Reconnected after {} attempts", reconnect_attempts);
                }
                if let Some(req) = self.reconciler.on_connected() {
                    self.fetch_history(req);
                }
                self.refresh_rooms();
            }
            SocketEvent::Disconnected { reason } => {
                tracing::warn!("Socket disconnected: {}", reason);
                self.reconciler.on_disconnected();
            }
            SocketEvent::GaveUp => {
                tracing::error!("Could not reconnect to the chat server");
                self.reconciler.on_disconnected();
            }
            SocketEvent::Event(event) => match event.scope() {
                Scope::Room => self.reconciler.handle_event(event, now),
                Scope::Directory => {
                    if self.directory.apply(&event) == DirectoryChange::RefreshNeeded {
                        self.refresh_rooms();
                    }
                }
            },
        }
    }

    pub fn handle_outcome(&mut self, outcome: Outcome, now: Instant) {
        match outcome {
            Outcome::History {
                generation,
                room_id,
                result,
            } => {
                let effects = self.reconciler.history_loaded(generation, &room_id, result, now);
                for effect in effects {
                    match effect {
                        Effect::FetchHistory(req) => self.fetch_history(req),
                        Effect::MarkRead(req) => self.send_mark_read(req),
                    }
                }
            }
            Outcome::MarkRead { room_id, result } => match result {
                Ok(()) => tracing::debug!("Marked {} read", room_id),
                Err(e) => tracing::warn!("{}", e),
            },
            Outcome::Rooms(Ok(rooms)) => {
                self.directory.replace(rooms);
                self.directory.select(self.reconciler.selected_room());
            }
            Outcome::Rooms(Err(e)) => tracing::warn!("Failed to refresh rooms: {}", e),
            Outcome::Uploaded { room_id, result } => {
                if self.reconciler.selected_room() != Some(room_id.as_str()) {
                    tracing::info!("Upload for {} finished after leaving it, not sending", room_id);
                    return;
                }
                let sent = result.and_then(|file| self.reconciler.send_file(&file));
                if let Err(e) = sent {
                    self.reconciler.upload_failed(e);
                }
            }
            Outcome::Deleted {
                message_id,
                scope,
                result,
            } => match result {
                Ok(()) => self.reconciler.apply_local_delete(&message_id, scope),
                Err(e) => tracing::warn!("Failed to delete {}: {}", message_id, e),
            },
        }
    }

    /// Upload `path` to the active room and announce it once stored.
    pub fn upload(&self, path: PathBuf) -> Result<(), ChatError> {
        let room_id = self
            .reconciler
            .selected_room()
            .ok_or(ChatError::NoRoom)?
            .to_string();
        let receiver = self
            .reconciler
            .peer()
            .ok_or_else(|| ChatError::NoRecipient(room_id.clone()))?
            .to_string();

        let fut = self
            .backend
            .upload(path, room_id.clone(), self.reconciler.viewer().to_string(), receiver);
        spawn_outcome(&self.outcomes, async move {
            Outcome::Uploaded {
                room_id,
                result: fut.await,
            }
        });
        Ok(())
    }

    pub fn delete(&self, message_id: &str, scope: DeletedFor) {
        let message_id = message_id.to_string();
        let fut = self
            .backend
            .delete_message(message_id.clone(), self.reconciler.viewer().to_string(), scope);
        spawn_outcome(&self.outcomes, async move {
            Outcome::Deleted {
                message_id,
                scope,
                result: fut.await,
            }
        });
    }

    pub fn mark_read(&self) {
        if let Some(req) = self.reconciler.mark_read() {
            self.send_mark_read(req);
        }
    }

    /// Reload the active room's history after a failure.
    pub fn retry(&mut self) -> bool {
        match self.reconciler.retry_history() {
            Some(req) => {
                self.fetch_history(req);
                true
            }
            None => false,
        }
    }

    pub fn refresh_rooms(&self) {
        let fut = self.backend.list_rooms(self.reconciler.viewer().to_string());
        spawn_outcome(&self.outcomes, async move { Outcome::Rooms(fut.await) });
    }

    fn fetch_history(&self, req: HistoryRequest) {
        let HistoryRequest {
            room_id,
            viewer,
            generation,
        } = req;
        let fut = self.backend.fetch_history(room_id.clone(), viewer);
        spawn_outcome(&self.outcomes, async move {
            Outcome::History {
                generation,
                room_id,
                result: fut.await,
            }
        });
    }

    fn send_mark_read(&self, req: MarkReadRequest) {
        let MarkReadRequest { room_id, viewer } = req;
        let fut = self.backend.mark_read(room_id.clone(), viewer);
        spawn_outcome(&self.outcomes, async move {
            Outcome::MarkRead {
                room_id,
                result: fut.await,
            }
        });
    }
}

/// Run an interactive session, starting in `room` or the last opened one.
pub async fn run(room: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    let viewer = config.require_username()?.to_string();

    let mut socket = SocketOptions::new(config.socket_url());
    socket.api_key = config.api_key.clone();
    socket.username = Some(viewer.clone());
    let (transport, mut events) = SocketTransport::spawn(socket);

    let options = ReconcilerOptions {
        seen_debounce: config.seen_debounce(),
        typing_expiry: config.typing_expiry(),
        ..Default::default()
    };
    let backend = Arc::new(RestBackend::new(ChatClient::from_config(&config)));
    let (mut chat, mut outcomes) = LiveChat::new(viewer.clone(), backend, Arc::new(transport), options);
    let mut notes = chat.reconciler().subscribe();
    let mut renderer = Renderer::default();

    println!("Connecting as {}... (type /help for commands)", viewer);
    chat.refresh_rooms();
    match room.or_else(|| config.selected_room.clone()) {
        Some(id) => open_room(&mut chat, &mut config, &id)?,
        None => println!("No room selected. Use /rooms, then /room <id>."),
    }

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    loop {
        let deadline = chat.reconciler().next_deadline();
        tokio::select! {
            Some(event) = events.recv() => chat.handle_socket(event, Instant::now()),
            Some(outcome) = outcomes.recv() => chat.handle_outcome(outcome, Instant::now()),
            _ = sleep_until_opt(deadline) => chat.reconciler_mut().poll_timers(Instant::now()),
            line = lines.next() => match line {
                Some(Ok(line)) => match input::parse(&line) {
                    Ok(Some(cmd)) => {
                        if !execute(&mut chat, &mut config, cmd)? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(msg) => println!("{}", msg),
                },
                Some(Err(e)) => {
                    tracing::warn!("Failed to read input: {}", e);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
        show(&mut notes, &chat, &mut renderer);
    }

    chat.reconciler_mut().teardown();
    drop(chat);
    // Let the socket task flush leave_room before the runtime goes away.
    time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn open_room<B: ChatBackend>(chat: &mut LiveChat<B>, config: &mut Config, room_id: &str) -> Result<()> {
    let peer = chat.select(Some(room_id), config.cached_receiver(room_id));
    if let Some(ref peer) = peer {
        config.set_cached_receiver(room_id, peer);
    }
    config.selected_room = Some(room_id.to_string());
    config.save()
}

/// Carry out one typed command. Returns `false` to end the session.
fn execute<B: ChatBackend>(chat: &mut LiveChat<B>, config: &mut Config, cmd: Command) -> Result<bool> {
    match cmd {
        Command::Say(text) => {
            if let Err(e) = chat.reconciler_mut().send_text(&text, None) {
                println!("Not sent: {}", e);
            }
        }
        Command::Reply(id) => {
            if chat.reconciler_mut().reply(&id) {
                if let Some(target) = chat.reconciler().reply_draft() {
                    println!("Replying to {}: {}", target.sender_name, target.preview());
                }
            } else {
                println!("No message #{} to reply to", id);
            }
        }
        Command::CancelReply => chat.reconciler_mut().cancel_reply(),
        Command::File(path) => match chat.upload(path) {
            Ok(()) => println!("Uploading..."),
            Err(e) => println!("Cannot upload: {}", e),
        },
        Command::Delete { id, everyone } => {
            let scope = if everyone { DeletedFor::Everyone } else { DeletedFor::Me };
            chat.delete(&id, scope);
        }
        Command::Room(id) => open_room(chat, config, &id)?,
        Command::Rooms => print_rooms(chat.directory()),
        Command::Retry => {
            if !chat.retry() {
                println!("Nothing to reload");
            }
        }
        Command::Read => chat.mark_read(),
        Command::Media => {
            let open = !chat.reconciler().media_panel_open();
            chat.reconciler_mut().set_media_panel(open);
            if open {
                print_media(chat.reconciler());
            }
        }
        Command::Help => println!("{}", input::HELP),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

/// Drain pending notifications and print what changed.
fn show<B: ChatBackend>(
    notes: &mut broadcast::Receiver<Notification>,
    chat: &LiveChat<B>,
    renderer: &mut Renderer,
) {
    let rec = chat.reconciler();
    let mut redraw = false;
    loop {
        match notes.try_recv() {
            Ok(Notification::MessagesChanged { room_id, .. }) => {
                redraw |= rec.selected_room() == Some(room_id.as_str());
            }
            Ok(Notification::TypingChanged { user, .. }) => {
                if let Some(user) = user {
                    println!("  {} is typing...", user);
                }
            }
            Ok(Notification::ConnectionChanged(state)) => match state {
                ConnectionState::Connected => println!("* connected"),
                ConnectionState::Disconnected => println!("* connection lost, reconnecting..."),
                ConnectionState::Connecting => {}
            },
            Ok(Notification::LoadFailed(e)) => println!("! {} (type /retry)", e),
            Ok(Notification::UploadFailed(e)) => println!("! {}", e),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::debug!("Skipped {} notifications", skipped);
                redraw = true;
            }
            Err(_) => break,
        }
    }

    if redraw {
        if let Some(room_id) = rec.selected_room() {
            for line in renderer.diff(room_id, rec.messages(), rec.viewer()) {
                println!("{}", line);
            }
        }
    }
}

fn print_rooms(directory: &RoomDirectory) {
    if directory.rooms().is_empty() {
        println!("(no rooms yet)");
        return;
    }
    for room in directory.rooms() {
        let online = room
            .other_user
            .as_deref()
            .map_or(false, |u| directory.is_online(u));
        let unread = if room.unread_count > 0 {
            format!(" ({} unread)", room.unread_count)
        } else {
            String::new()
        };
        println!(
            "{} {}{}  [{}]",
            if online { "●" } else { " " },
            room.display_name(),
            unread,
            room.id
        );
    }
}

fn print_media(rec: &Reconciler) {
    let media = media_of(rec.messages());
    if media.is_empty() {
        println!("(no media)");
        return;
    }
    for msg in media {
        let name = msg.file_name.as_deref().unwrap_or("Unknown");
        let size = msg.file_size.map(format_size).unwrap_or_default();
        println!("  {} {} {}  {}", msg.message_type.as_str(), name, size, msg.file_url.as_deref().unwrap_or(""));
    }
}

#[cfg(test)]
mod tests {
    use super::backend::fake::FakeBackend;
    use super::*;
    use crate::models::fixtures::msg;
    use crate::models::Room;
    use crate::socket::fake::FakeTransport;
    use crate::socket::{GroupChange, ServerEvent};

    fn setup(backend: FakeBackend) -> (Arc<FakeBackend>, Arc<FakeTransport>, LiveChat<FakeBackend>, mpsc::UnboundedReceiver<Outcome>) {
        let backend = Arc::new(backend);
        let transport = Arc::new(FakeTransport::connected());
        let (chat, rx) = LiveChat::new("alice", backend.clone(), transport.clone(), ReconcilerOptions::default());
        (backend, transport, chat, rx)
    }

    /// Feed back every outcome that arrives within a short window.
    async fn pump(chat: &mut LiveChat<FakeBackend>, rx: &mut mpsc::UnboundedReceiver<Outcome>) {
        while let Ok(Some(outcome)) = time::timeout(Duration::from_millis(50), rx.recv()).await {
            chat.handle_outcome(outcome, Instant::now());
        }
    }

    #[tokio::test]
    async fn test_select_loads_history_and_marks_read() {
        let (backend, transport, mut chat, mut rx) =
            setup(FakeBackend::with_history("alice__bob", vec![msg("m1", "alice__bob", "bob", 0)]));

        let peer = chat.select(Some("alice__bob"), None);
        assert_eq!(peer.as_deref(), Some("bob"));
        pump(&mut chat, &mut rx).await;

        assert_eq!(chat.reconciler().messages().len(), 1);
        assert_eq!(backend.calls(), vec!["history alice__bob", "mark_read alice__bob"]);
        assert_eq!(transport.names(), vec!["join_room"]);
    }

    #[tokio::test]
    async fn test_failed_load_then_retry() {
        let (backend, _, mut chat, mut rx) = setup(FakeBackend::default());
        chat.select(Some("alice__bob"), None);
        pump(&mut chat, &mut rx).await;
        assert!(chat.reconciler().load_error().is_some());

        backend
            .histories
            .lock()
            .unwrap()
            .insert("alice__bob".into(), vec![msg("m1", "alice__bob", "bob", 0)]);
        assert!(chat.retry());
        pump(&mut chat, &mut rx).await;
        assert!(chat.reconciler().load_error().is_none());
        assert_eq!(chat.reconciler().messages().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_events_refresh_rooms() {
        let (backend, _, mut chat, mut rx) = setup(FakeBackend::default());
        backend.rooms.lock().unwrap().push(Room {
            id: "group_bob_1".into(),
            is_group: true,
            ..Default::default()
        });

        chat.handle_socket(
            SocketEvent::Event(ServerEvent::Group {
                change: GroupChange::MembersAdded,
                group_id: Some("group_bob_1".into()),
            }),
            Instant::now(),
        );
        pump(&mut chat, &mut rx).await;

        assert_eq!(backend.calls(), vec!["rooms"]);
        assert!(chat.directory().find("group_bob_1").is_some());
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_and_reloads() {
        let (backend, transport, mut chat, mut rx) =
            setup(FakeBackend::with_history("alice__bob", vec![msg("m1", "alice__bob", "bob", 0)]));
        chat.select(Some("alice__bob"), None);
        pump(&mut chat, &mut rx).await;
        transport.take();

        transport.set_connected(false);
        chat.handle_socket(SocketEvent::Disconnected { reason: "eof".into() }, Instant::now());
        transport.set_connected(true);
        chat.handle_socket(SocketEvent::Connected { reconnect_attempts: 1 }, Instant::now());
        pump(&mut chat, &mut rx).await;

        assert_eq!(transport.names(), vec!["user_join", "join_room"]);
        let calls = backend.calls();
        assert_eq!(calls.iter().filter(|c| *c == "history alice__bob").count(), 2);
        assert!(calls.contains(&"rooms".to_string()));
    }

    #[tokio::test]
    async fn test_upload_announced_in_same_room() {
        let (_, transport, mut chat, mut rx) = setup(FakeBackend::with_history("alice__bob", vec![]));
        chat.select(Some("alice__bob"), None);
        pump(&mut chat, &mut rx).await;
        transport.take();

        tokio_test::assert_ok!(chat.upload(PathBuf::from("cat.png")));
        pump(&mut chat, &mut rx).await;
        assert_eq!(transport.names(), vec!["send_file"]);
    }

    #[tokio::test]
    async fn test_upload_after_room_switch_is_not_announced() {
        let (_, transport, mut chat, mut rx) = setup(FakeBackend::with_history("alice__bob", vec![]));
        chat.select(Some("alice__bob"), None);
        chat.upload(PathBuf::from("cat.png")).unwrap();
        chat.select(Some("alice__carol"), None);
        transport.take();

        pump(&mut chat, &mut rx).await;
        assert!(!transport.names().contains(&"send_file"));
    }

    #[tokio::test]
    async fn test_upload_failure_surfaces() {
        let backend = FakeBackend {
            fail_uploads: true,
            ..FakeBackend::with_history("alice__bob", vec![])
        };
        let (_, transport, mut chat, mut rx) = setup(backend);
        chat.select(Some("alice__bob"), None);
        pump(&mut chat, &mut rx).await;
        transport.take();

        chat.upload(PathBuf::from("big.zip")).unwrap();
        pump(&mut chat, &mut rx).await;
        assert!(chat.reconciler().upload_error().is_some());
        assert!(transport.take().is_empty());
        assert!(chat.reconciler().messages().is_empty());
    }

    #[tokio::test]
    async fn test_upload_needs_room() {
        let (_, _, chat, _rx) = setup(FakeBackend::default());
        assert_eq!(chat.upload(PathBuf::from("x")), Err(ChatError::NoRoom));
    }

    #[tokio::test]
    async fn test_confirmed_delete_applied_locally() {
        let (backend, _, mut chat, mut rx) =
            setup(FakeBackend::with_history("alice__bob", vec![msg("m1", "alice__bob", "alice", 0)]));
        chat.select(Some("alice__bob"), None);
        pump(&mut chat, &mut rx).await;

        chat.delete("m1", DeletedFor::Everyone);
        pump(&mut chat, &mut rx).await;
        assert!(backend.calls().contains(&"delete m1 everyone".to_string()));
        assert!(chat.reconciler().message("m1").unwrap().is_deleted);
    }
}
