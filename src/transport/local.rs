//! In-memory transport.
//!
//! Simulates a small chat network inside the process: guilds, rooms,
//! permissions, sinks and delivered messages, plus switches to inject
//! delivery and sink-creation failures. The test suite drives the whole
//! relay through this implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    Attachment, GuildId, MessageId, MessageRef, Payload, RoomId, RoomInfo, RoomPermissions, Sink,
    SinkId, Transport, UserId,
};
use crate::{RelayError, Result};

/// A message observed in a simulated room.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    /// Where the message lives.
    pub reference: MessageRef,
    /// The sink that delivered it, if any.
    pub via_sink: Option<SinkId>,
    /// The payload, for sink deliveries.
    pub payload: Option<Payload>,
    /// The plain text, for process-authored messages.
    pub text: Option<String>,
}

impl PostedMessage {
    /// The visible body, whichever way the message arrived.
    pub fn body(&self) -> &str {
        if let Some(payload) = &self.payload {
            &payload.content
        } else {
            self.text.as_deref().unwrap_or("")
        }
    }

    /// Attachments uploaded with the message.
    pub fn attachments(&self) -> &[Attachment] {
        match &self.payload {
            Some(payload) => &payload.attachments,
            None => &[],
        }
    }
}

#[derive(Debug)]
struct RoomState {
    guild: GuildId,
    name: String,
    perms: RoomPermissions,
    sinks: HashMap<String, Sink>,
    messages: Vec<PostedMessage>,
    fail_deliveries: bool,
    deny_sink_creation: bool,
}

#[derive(Default)]
struct Inner {
    guilds: HashMap<GuildId, String>,
    rooms: HashMap<RoomId, RoomState>,
    next_id: u64,
}

impl Inner {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`Transport`] implementation.
pub struct LocalTransport {
    self_id: UserId,
    inner: Mutex<Inner>,
}

impl LocalTransport {
    /// Create an empty network; `self_id` is the relay's own identity.
    pub fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("local transport poisoned")
    }

    /// Add a guild.
    pub fn add_guild(&self, name: impl Into<String>) -> GuildId {
        let mut inner = self.lock();
        let id = GuildId(inner.next());
        inner.guilds.insert(id, name.into());
        id
    }

    /// Add a room with full permissions.
    pub fn add_room(&self, guild: GuildId, name: impl Into<String>) -> RoomId {
        let mut inner = self.lock();
        let id = RoomId(inner.next());
        inner.rooms.insert(
            id,
            RoomState {
                guild,
                name: name.into(),
                perms: RoomPermissions::all(),
                sinks: HashMap::new(),
                messages: Vec::new(),
                fail_deliveries: false,
                deny_sink_creation: false,
            },
        );
        id
    }

    /// Remove a room entirely, as if it was deleted on the network.
    pub fn remove_room(&self, room: RoomId) {
        self.lock().rooms.remove(&room);
    }

    /// Rename a room.
    pub fn rename_room(&self, room: RoomId, name: impl Into<String>) {
        if let Some(state) = self.lock().rooms.get_mut(&room) {
            state.name = name.into();
        }
    }

    /// Override the process's permissions in a room.
    pub fn set_permissions(&self, room: RoomId, perms: RoomPermissions) {
        if let Some(state) = self.lock().rooms.get_mut(&room) {
            state.perms = perms;
        }
    }

    /// Make every delivery into the room fail.
    pub fn fail_deliveries(&self, room: RoomId, fail: bool) {
        if let Some(state) = self.lock().rooms.get_mut(&room) {
            state.fail_deliveries = fail;
        }
    }

    /// Make sink creation in the room fail with a permission error.
    pub fn deny_sink_creation(&self, room: RoomId, deny: bool) {
        if let Some(state) = self.lock().rooms.get_mut(&room) {
            state.deny_sink_creation = deny;
        }
    }

    /// All messages currently visible in a room.
    pub fn messages_in(&self, room: RoomId) -> Vec<PostedMessage> {
        self.lock()
            .rooms
            .get(&room)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    /// Messages delivered into a room through sinks.
    pub fn sink_messages_in(&self, room: RoomId) -> Vec<PostedMessage> {
        self.messages_in(room)
            .into_iter()
            .filter(|m| m.via_sink.is_some())
            .collect()
    }

    /// Inject a user-authored message and return its reference.
    ///
    /// This is what an inbound event would reference; the transport only
    /// stores it so deletes can be observed.
    pub fn post_user_message(&self, room: RoomId, text: impl Into<String>) -> MessageRef {
        let mut inner = self.lock();
        let id = MessageId(inner.next());
        let reference = MessageRef::new(room, id);
        if let Some(state) = inner.rooms.get_mut(&room) {
            state.messages.push(PostedMessage {
                reference,
                via_sink: None,
                payload: None,
                text: Some(text.into()),
            });
        }
        reference
    }

    /// Whether a message still exists.
    pub fn message_exists(&self, reference: &MessageRef) -> bool {
        self.lock()
            .rooms
            .get(&reference.room)
            .map(|r| r.messages.iter().any(|m| m.reference == *reference))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn list_guilds(&self) -> Result<Vec<GuildId>> {
        Ok(self.lock().guilds.keys().copied().collect())
    }

    async fn list_rooms(&self, guild: GuildId) -> Result<Vec<RoomInfo>> {
        Ok(self
            .lock()
            .rooms
            .iter()
            .filter(|(_, state)| state.guild == guild)
            .map(|(id, state)| RoomInfo {
                id: *id,
                guild,
                name: state.name.clone(),
            })
            .collect())
    }

    async fn guild_name(&self, guild: GuildId) -> Result<Option<String>> {
        Ok(self.lock().guilds.get(&guild).cloned())
    }

    async fn room_permissions(&self, room: RoomId) -> Result<RoomPermissions> {
        self.lock()
            .rooms
            .get(&room)
            .map(|state| state.perms)
            .ok_or_else(|| RelayError::Transport(format!("unknown room {room}")))
    }

    async fn create_or_get_sink(&self, room: RoomId, label: &str) -> Result<Sink> {
        let mut inner = self.lock();
        let next = inner.next();
        let state = inner
            .rooms
            .get_mut(&room)
            .ok_or_else(|| RelayError::Transport(format!("unknown room {room}")))?;

        if let Some(sink) = state.sinks.get(label) {
            return Ok(sink.clone());
        }
        if state.deny_sink_creation || !state.perms.can_manage_sinks {
            return Err(RelayError::PermissionDenied(
                "missing manage-sinks permission".to_string(),
            ));
        }

        let sink = Sink {
            id: SinkId(next),
            room,
        };
        state.sinks.insert(label.to_string(), sink.clone());
        Ok(sink)
    }

    async fn execute(&self, sink: &Sink, payload: &Payload) -> Result<MessageRef> {
        let mut inner = self.lock();
        let id = MessageId(inner.next());
        let state = inner
            .rooms
            .get_mut(&sink.room)
            .ok_or_else(|| RelayError::Transport(format!("unknown room {}", sink.room)))?;

        if state.fail_deliveries {
            return Err(RelayError::Delivery {
                room: sink.room,
                cause: "injected delivery failure".to_string(),
            });
        }
        if !state.sinks.values().any(|s| s.id == sink.id) {
            return Err(RelayError::Transport(format!(
                "sink {} no longer exists",
                sink.id
            )));
        }

        let reference = MessageRef::new(sink.room, id);
        state.messages.push(PostedMessage {
            reference,
            via_sink: Some(sink.id),
            payload: Some(payload.clone()),
            text: None,
        });
        Ok(reference)
    }

    async fn delete(&self, reference: &MessageRef) -> Result<()> {
        let mut inner = self.lock();
        let state = inner
            .rooms
            .get_mut(&reference.room)
            .ok_or_else(|| RelayError::Transport(format!("unknown room {}", reference.room)))?;

        let before = state.messages.len();
        state.messages.retain(|m| m.reference != *reference);
        if state.messages.len() == before {
            return Err(RelayError::Transport(format!(
                "no such message {reference}"
            )));
        }
        Ok(())
    }

    async fn create_message(&self, room: RoomId, text: &str) -> Result<MessageRef> {
        let mut inner = self.lock();
        let id = MessageId(inner.next());
        let state = inner
            .rooms
            .get_mut(&room)
            .ok_or_else(|| RelayError::Transport(format!("unknown room {room}")))?;

        if !state.perms.can_send {
            return Err(RelayError::PermissionDenied(
                "missing send permission".to_string(),
            ));
        }

        let reference = MessageRef::new(room, id);
        state.messages.push(PostedMessage {
            reference,
            via_sink: None,
            payload: None,
            text: Some(text.to_string()),
        });
        Ok(reference)
    }

    fn self_id(&self) -> UserId {
        self.self_id
    }
}
