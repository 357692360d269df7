//! Async REST work for the live session.
//!
//! Each request runs on its own task and reports back as an [`Outcome`] over
//! an mpsc channel, so the session loop never blocks on HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;

use crate::api::{self, ChatClient};
use crate::error::ChatError;
use crate::models::{DeletedFor, Message, Room, UploadedFile};

/// REST operations the live session needs.
pub trait ChatBackend: Send + Sync + 'static {
    fn fetch_history(&self, room_id: String, viewer: String) -> BoxFuture<'static, Result<Vec<Message>, ChatError>>;

    fn mark_read(&self, room_id: String, viewer: String) -> BoxFuture<'static, Result<(), ChatError>>;

    fn list_rooms(&self, viewer: String) -> BoxFuture<'static, Result<Vec<Room>, ChatError>>;

    fn upload(
        &self,
        path: PathBuf,
        room_id: String,
        sender: String,
        receiver: String,
    ) -> BoxFuture<'static, Result<UploadedFile, ChatError>>;

    fn delete_message(
        &self,
        message_id: String,
        viewer: String,
        scope: DeletedFor,
    ) -> BoxFuture<'static, Result<(), ChatError>>;
}

/// Result of a spawned request.
#[derive(Debug)]
pub enum Outcome {
    History {
        generation: u64,
        room_id: String,
        result: Result<Vec<Message>, ChatError>,
    },
    MarkRead {
        room_id: String,
        result: Result<(), ChatError>,
    },
    Rooms(Result<Vec<Room>, ChatError>),
    Uploaded {
        room_id: String,
        result: Result<UploadedFile, ChatError>,
    },
    Deleted {
        message_id: String,
        scope: DeletedFor,
        result: Result<(), ChatError>,
    },
}

/// Spawn `fut` and send its outcome back on `tx`.
pub fn spawn_outcome<F>(tx: &mpsc::UnboundedSender<Outcome>, fut: F)
where
    F: std::future::Future<Output = Outcome> + Send + 'static,
{
    let tx = tx.clone();
    tokio::spawn(async move {
        if tx.send(fut.await).is_err() {
            tracing::debug!("Session gone, dropping request outcome");
        }
    });
}

/// [`ChatBackend`] over the real REST API.
#[derive(Clone)]
pub struct RestBackend {
    client: Arc<ChatClient>,
}

impl RestBackend {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl ChatBackend for RestBackend {
    fn fetch_history(&self, room_id: String, viewer: String) -> BoxFuture<'static, Result<Vec<Message>, ChatError>> {
        let client = Arc::clone(&self.client);
        async move {
            api::chat::fetch_history(&client, &room_id, &viewer)
                .await
                .map_err(|e| ChatError::HistoryLoad {
                    room_id,
                    reason: format!("{:#}", e),
                })
        }
        .boxed()
    }

    fn mark_read(&self, room_id: String, viewer: String) -> BoxFuture<'static, Result<(), ChatError>> {
        let client = Arc::clone(&self.client);
        async move {
            api::chat::mark_read(&client, &room_id, &viewer)
                .await
                .map_err(|e| ChatError::MarkRead {
                    room_id,
                    reason: format!("{:#}", e),
                })
        }
        .boxed()
    }

    fn list_rooms(&self, viewer: String) -> BoxFuture<'static, Result<Vec<Room>, ChatError>> {
        let client = Arc::clone(&self.client);
        async move {
            api::rooms::list_rooms_data(&client, &viewer)
                .await
                .map_err(|e| ChatError::Api(format!("{:#}", e)))
        }
        .boxed()
    }

    fn upload(
        &self,
        path: PathBuf,
        room_id: String,
        sender: String,
        receiver: String,
    ) -> BoxFuture<'static, Result<UploadedFile, ChatError>> {
        let client = Arc::clone(&self.client);
        async move {
            api::chat::upload_file(&client, &path, &room_id, &sender, &receiver)
                .await
                .map_err(|e| ChatError::Upload(format!("{:#}", e)))
        }
        .boxed()
    }

    fn delete_message(
        &self,
        message_id: String,
        viewer: String,
        scope: DeletedFor,
    ) -> BoxFuture<'static, Result<(), ChatError>> {
        let client = Arc::clone(&self.client);
        async move {
            api::chat::delete_message(&client, &message_id, &viewer, scope)
                .await
                .map_err(|e| ChatError::Api(format!("{:#}", e)))
        }
        .boxed()
    }
}
