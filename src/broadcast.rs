//! Broadcast engine.
//!
//! Fans one inbound message out to every eligible endpoint concurrently.
//! The defining property is partial-failure isolation: each delivery runs in
//! its own task, failures are caught and logged per endpoint, and a failed
//! endpoint never aborts or delays its siblings beyond the final await.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::guild::GuildDirectory;
use crate::history::{BroadcastRecord, HistoryLedger};
use crate::registry::EndpointRegistry;
use crate::transport::{Attachment, GuildId, MessageRef, Payload, RoomId, Transport, UserId};

/// Placeholder body for messages that carry nothing relayable.
const EMPTY_BODY: &str = "<no content>";

/// A reply being quoted above the relayed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedReply {
    /// Author label of the message being replied to.
    pub author: String,
    /// Leading excerpt of the replied-to message.
    pub excerpt: String,
}

/// Relayable content extracted from one inbound message.
#[derive(Debug, Clone, Default)]
pub struct OutboundContent {
    /// Raw message body.
    pub text: String,
    /// Attachments riding on the message.
    pub attachments: Vec<Attachment>,
    /// Reply reference, rendered as a quote line.
    pub reply: Option<QuotedReply>,
}

/// Truncate to at most `max` characters, on a character boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Break mass pings so relayed copies can never resolve them.
pub fn neutralize_mass_mentions(s: &str) -> String {
    s.replace("@everyone", "@\u{200B}everyone")
        .replace("@here", "@\u{200B}here")
}

/// Escape markdown emphasis in an author label.
pub fn escape_label(s: &str) -> String {
    s.replace('*', "\\*")
}

/// The broadcast engine.
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    registry: Arc<EndpointRegistry>,
    guilds: Arc<GuildDirectory>,
    history: Arc<HistoryLedger>,
    max_content_chars: usize,
    max_username_chars: usize,
    max_inline_file_bytes: u64,
    system_name: String,
    system_avatar: Option<String>,
}

impl Broadcaster {
    /// Create an engine over the shared structures.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<EndpointRegistry>,
        guilds: Arc<GuildDirectory>,
        history: Arc<HistoryLedger>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            guilds,
            history,
            max_content_chars: config.max_content_chars,
            max_username_chars: config.max_username_chars,
            max_inline_file_bytes: config.max_inline_file_bytes,
            system_name: config.system_name.clone(),
            system_avatar: config.system_avatar.clone(),
        }
    }

    /// Shape one outbound payload from raw content.
    ///
    /// Oversize attachments become trailing links, the rest ride inline; the
    /// body is capped and mass pings are broken. An empty result with no
    /// inline attachments becomes a placeholder so the copy stays visible.
    pub fn build_payload(
        &self,
        username: &str,
        avatar: Option<String>,
        content: &OutboundContent,
    ) -> Payload {
        let mut body = String::new();

        if let Some(reply) = &content.reply {
            body.push_str("> **");
            body.push_str(&escape_label(&reply.author));
            body.push_str("**: ");
            body.push_str(&truncate_chars(&reply.excerpt, 100));
            body.push('\n');
        }

        body.push_str(&content.text);

        let mut inline = Vec::new();
        for attachment in &content.attachments {
            if attachment.size >= self.max_inline_file_bytes {
                body.push('\n');
                body.push_str(&attachment.url);
            } else {
                inline.push(attachment.clone());
            }
        }

        let mut body = truncate_chars(&neutralize_mass_mentions(&body), self.max_content_chars);
        if body.is_empty() && inline.is_empty() {
            body = EMPTY_BODY.to_string();
        }

        Payload {
            username: truncate_chars(username, self.max_username_chars),
            avatar_url: avatar,
            content: body,
            attachments: inline,
            suppress_mentions: true,
        }
    }

    /// Deliver a payload to every eligible endpoint except `exclude`.
    ///
    /// Returns one `(guild, reference)` pair per successful delivery. Every
    /// failure is logged and the failing endpoint's sink is invalidated so
    /// the reconciler re-acquires it.
    async fn deliver(&self, exclude: Option<RoomId>, payload: Payload) -> Vec<(GuildId, MessageRef)> {
        let endpoints = self.registry.list_eligible().await;

        let mut handles = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if Some(endpoint.room) == exclude {
                continue;
            }
            let Some(sink) = endpoint.sink.clone() else {
                continue;
            };

            let transport = Arc::clone(&self.transport);
            let registry = Arc::clone(&self.registry);
            let payload = payload.clone();
            let room = endpoint.room;
            let guild = endpoint.guild;

            handles.push(tokio::spawn(async move {
                match transport.execute(&sink, &payload).await {
                    Ok(reference) => Some((guild, reference)),
                    Err(e) => {
                        warn!(room = %room, error = %e, "failed to retranslate a message");
                        registry.invalidate(room, &e.to_string()).await;
                        None
                    }
                }
            }));

            tokio::task::yield_now().await;
        }

        join_all(handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "delivery task panicked");
                    None
                }
            })
            .collect()
    }

    /// Fan one user message out to the federation.
    ///
    /// The origin room is excluded. The returned record holds only the
    /// successful copies and has already been appended to the history
    /// ledger.
    pub async fn fan_out(
        &self,
        origin: MessageRef,
        origin_author: Option<UserId>,
        origin_guild: Option<GuildId>,
        username: &str,
        avatar: Option<String>,
        content: OutboundContent,
    ) -> BroadcastRecord {
        let payload = self.build_payload(username, avatar, &content);
        let delivered = self.deliver(Some(origin.room), payload).await;

        for (guild, _) in &delivered {
            self.guilds.record_sent(*guild).await;
        }
        if let Some(guild) = origin_guild {
            self.guilds.record_received(guild).await;
        }

        let copies = delivered.into_iter().map(|(_, r)| r).collect();
        let record = BroadcastRecord::new(origin, origin_author, copies);
        self.history.append(record.clone());

        debug!(
            origin = %origin,
            copies = record.copies.len(),
            "fan-out complete"
        );
        record
    }

    /// Broadcast under the system identity, excluding no endpoint.
    ///
    /// System broadcasts are not recorded in the history ledger; there is no
    /// origin message to moderate.
    pub async fn broadcast_system(&self, text: &str) -> Vec<MessageRef> {
        let content = OutboundContent {
            text: text.to_string(),
            ..Default::default()
        };
        let payload = self.build_payload(&self.system_name, self.system_avatar.clone(), &content);
        self.deliver(None, payload)
            .await
            .into_iter()
            .map(|(_, r)| r)
            .collect()
    }
}
