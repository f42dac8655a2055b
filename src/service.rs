//! Relay service façade.
//!
//! Wires the registry, filter, rate limiter, broadcast engine, history
//! ledger and reconciler together and drives the inbound-message pipeline:
//! loop prevention, membership and permission checks, safety filtering,
//! rate limiting, then fan-out. Also hosts the moderation operations that
//! work against the history ledger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broadcast::{escape_label, Broadcaster, OutboundContent, QuotedReply};
use crate::config::Config;
use crate::filter::{SafetyFilter, ScamDetector, Verdict};
use crate::guild::GuildDirectory;
use crate::history::{BroadcastRecord, HistoryLedger};
use crate::rate_limit::{MessageRateLimiter, RateLimitResult};
use crate::reconciler::Reconciler;
use crate::registry::EndpointRegistry;
use crate::state::{FederationState, StateStore};
use crate::transport::{Attachment, GuildId, MessageRef, SinkId, Transport, UserId};
use crate::{RelayError, Result};

/// One inbound message event, as supplied by the event source.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Where the message lives.
    pub reference: MessageRef,
    /// The guild the room belongs to.
    pub guild: GuildId,
    /// Author identity; absent for transport-generated traffic.
    pub author: Option<UserId>,
    /// Author display name.
    pub author_name: String,
    /// Author avatar.
    pub author_avatar: Option<String>,
    /// Sink that produced the message, if it came through one.
    pub via_sink: Option<SinkId>,
    /// Raw message body.
    pub content: String,
    /// Attachments riding on the message.
    pub attachments: Vec<Attachment>,
    /// The message this one replies to, pre-rendered for quoting.
    pub reply: Option<QuotedReply>,
}

/// The relay service.
pub struct RelayService {
    transport: Arc<dyn Transport>,
    registry: Arc<EndpointRegistry>,
    guilds: Arc<GuildDirectory>,
    history: Arc<HistoryLedger>,
    broadcaster: Broadcaster,
    limiter: MessageRateLimiter,
    filter: SafetyFilter,
    state: Arc<RwLock<FederationState>>,
    reconciler: Arc<Reconciler>,
    /// Senders auto-banned for the rest of the process lifetime.
    blocked: std::sync::RwLock<HashSet<UserId>>,
    operators: HashSet<UserId>,
    persist_autobans: bool,
    announce_delay: Duration,
    /// Unique id of this relay instance, for log correlation.
    instance: Uuid,
}

impl RelayService {
    /// Build a service over the given collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn StateStore>,
        scam: Arc<dyn ScamDetector>,
        config: &Config,
    ) -> Arc<Self> {
        let relay = &config.relay;
        let registry = Arc::new(EndpointRegistry::new());
        let guilds = Arc::new(GuildDirectory::new());
        let history = Arc::new(HistoryLedger::new(relay.history_capacity));
        let state = Arc::new(RwLock::new(FederationState::default()));

        let broadcaster = Broadcaster::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&guilds),
            Arc::clone(&history),
            relay,
        );
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&guilds),
            store,
            Arc::clone(&state),
            relay,
        ));

        Arc::new(Self {
            transport,
            registry,
            guilds,
            history,
            broadcaster,
            limiter: MessageRateLimiter::new(Duration::from_millis(relay.rate_limit_ms)),
            filter: SafetyFilter::new(relay.mention_threshold, scam),
            state,
            reconciler,
            blocked: std::sync::RwLock::new(HashSet::new()),
            operators: relay.operators.iter().map(|&id| UserId(id)).collect(),
            persist_autobans: relay.persist_autobans,
            announce_delay: Duration::from_secs(relay.announce_delay_secs),
            instance: Uuid::new_v4(),
        })
    }

    /// Start background work: one immediate reconciliation, the delayed
    /// startup announcement, then the periodic reconciler loop.
    pub async fn start(self: &Arc<Self>) {
        info!(instance = %self.instance, "relay instance starting");
        self.reconciler.cycle().await;

        let announce = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(announce.announce_delay).await;
            let rooms = announce.registry.list_eligible().await.len();
            let text = format!(
                "***This room is now part of the federation! \
                 {} rooms are connected.***",
                rooms.saturating_sub(1)
            );
            announce.broadcaster.broadcast_system(&text).await;
        });

        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(reconciler.run());

        let janitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                janitor.limiter.cleanup();
            }
        });
        info!(instance = %self.instance, "relay instance started");
    }

    /// Handle one inbound event without blocking the event stream.
    ///
    /// All checks and the fan-out run in a spawned task; rejections are
    /// logged and reported to the sender from there.
    pub fn handle_message(self: &Arc<Self>, event: InboundMessage) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.process_message(event).await {
                Ok(Some(record)) => {
                    debug!(origin = %record.origin, copies = record.copies.len(), "message relayed");
                }
                Ok(None) => {}
                Err(e) => info!(error = %e, "message not relayed"),
            }
        });
    }

    /// Run the full inbound pipeline for one event.
    ///
    /// Returns `Ok(None)` when the event is silently ignored (own traffic or
    /// a room outside the federation), the broadcast record on success, and
    /// an error when the message was rejected. Rejections have already been
    /// reported to the sender.
    pub async fn process_message(&self, event: InboundMessage) -> Result<Option<BroadcastRecord>> {
        if self.is_own_message(&event).await {
            return Ok(None);
        }
        if !self.registry.contains(event.reference.room).await {
            return Ok(None);
        }

        self.check_transmit_allowed(&event).await?;
        self.check_content(&event).await?;
        self.check_rate_limit(&event).await?;

        let username = self.compose_username(&event).await;
        let content = OutboundContent {
            text: event.content.clone(),
            attachments: event.attachments.clone(),
            reply: event.reply.clone(),
        };

        let started = std::time::Instant::now();
        let record = self
            .broadcaster
            .fan_out(
                event.reference,
                event.author,
                Some(event.guild),
                &username,
                event.author_avatar.clone(),
                content,
            )
            .await;
        debug!(
            author = %event.author_name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "message retranslated"
        );

        Ok(Some(record))
    }

    /// Whether the event was produced by this process or one of its sinks.
    async fn is_own_message(&self, event: &InboundMessage) -> bool {
        if event.author == Some(self.transport.self_id()) {
            return true;
        }
        match event.via_sink {
            Some(sink) => self.registry.sink_ids().await.contains(&sink),
            None => false,
        }
    }

    async fn check_transmit_allowed(&self, event: &InboundMessage) -> Result<()> {
        let state = self.state.read().await;

        let user_banned = match event.author {
            Some(author) => {
                !state.user_allowed(author)
                    || self
                        .blocked
                        .read()
                        .expect("block list poisoned")
                        .contains(&author)
            }
            None => false,
        };

        if user_banned || !state.guild_allowed(event.guild) {
            drop(state);
            self.reply(
                event,
                "[!] You're not allowed to send messages in this federation. \
                 Please contact one of the admins to find out why.",
            )
            .await;
            info!(
                author = %event.author_name,
                content = %crate::broadcast::truncate_chars(&event.content, 200),
                "message not retranslated"
            );
            return Err(RelayError::PermissionDenied(
                "sender or guild is not allowed to transmit".to_string(),
            ));
        }
        Ok(())
    }

    async fn check_content(&self, event: &InboundMessage) -> Result<()> {
        match self.filter.evaluate(&event.content) {
            Verdict::Allow => Ok(()),
            Verdict::Reject(reason) => {
                self.reply(event, &format!("[!] {reason}")).await;
                info!(
                    author = %event.author_name,
                    content = %crate::broadcast::truncate_chars(&event.content, 200),
                    "potential scam message blocked"
                );
                Err(RelayError::Filtered(reason))
            }
            Verdict::AutoBan => {
                if let Some(author) = event.author {
                    self.blocked
                        .write()
                        .expect("block list poisoned")
                        .insert(author);
                    if self.persist_autobans {
                        self.state.write().await.banned_users.insert(author);
                    }
                }
                self.reply(
                    event,
                    "[!] You've been auto-banned from this relay instance. \
                     Please wait 'till the next restart.",
                )
                .await;
                info!(
                    author = %event.author_name,
                    "sender auto-banned for mass pinging"
                );
                Err(RelayError::Filtered("mention flood".to_string()))
            }
        }
    }

    async fn check_rate_limit(&self, event: &InboundMessage) -> Result<()> {
        let Some(author) = event.author else {
            return Ok(());
        };
        match self.limiter.try_accept(author) {
            RateLimitResult::Allowed => Ok(()),
            RateLimitResult::Denied { retry_after } => {
                self.reply(
                    event,
                    &format!(
                        "[!] You are being rate limited. Please wait {} milliseconds.",
                        retry_after.as_millis()
                    ),
                )
                .await;
                Err(RelayError::RateLimited { retry_after })
            }
        }
    }

    /// Compose the author label shown on relayed copies.
    ///
    /// A usertag from the shared state wins over the operator marker; the
    /// guild's display name is appended so readers can tell rooms apart.
    async fn compose_username(&self, event: &InboundMessage) -> String {
        let state = self.state.read().await;

        let mut username = String::new();
        let tag = event.author.and_then(|a| state.usertag(a));
        if let Some(tag) = tag {
            username.push('[');
            username.push_str(tag);
            username.push(']');
        } else if event.author.is_some_and(|a| self.operators.contains(&a)) {
            username.push_str("[Admin]");
        }
        drop(state);

        username.push_str(&escape_label(&event.author_name));
        username.push_str(" — ");
        username.push_str(&self.guilds.display_name(event.guild).await);
        username
    }

    /// Post a reply into the origin room. Best effort.
    async fn reply(&self, event: &InboundMessage, text: &str) {
        if let Err(e) = self
            .transport
            .create_message(event.reference.room, text)
            .await
        {
            debug!(room = %event.reference.room, error = %e, "could not post reply");
        }
    }

    /// Delete a relayed message everywhere, looked up by any of its copies.
    ///
    /// Only an operator or the origin's author may delete. Returns how many
    /// messages were actually deleted; individual delete failures are
    /// tolerated.
    pub async fn delete_by_reply(
        &self,
        reference: &MessageRef,
        requester: UserId,
        delete_origin: bool,
    ) -> Result<usize> {
        let record = self
            .history
            .find_containing(reference)
            .ok_or(RelayError::NotFoundInHistory)?;

        if !self.operators.contains(&requester) && record.origin_author != Some(requester) {
            return Err(RelayError::PermissionDenied(
                "you are not allowed to delete others' messages".to_string(),
            ));
        }

        let mut deleted = 0;
        for copy in &record.copies {
            match self.transport.delete(copy).await {
                Ok(()) => deleted += 1,
                Err(e) => debug!(reference = %copy, error = %e, "could not delete copy"),
            }
        }
        if delete_origin {
            match self.transport.delete(&record.origin).await {
                Ok(()) => deleted += 1,
                Err(e) => debug!(reference = %record.origin, error = %e, "could not delete origin"),
            }
        }

        self.history.remove_matching(|r| r.origin == record.origin);
        info!(
            requester = %requester,
            origin = %record.origin,
            deleted,
            "relayed message deleted"
        );
        Ok(deleted)
    }

    /// Look up the broadcast record containing the given reference.
    pub fn info_by_reply(&self, reference: &MessageRef) -> Result<BroadcastRecord> {
        self.history
            .find_containing(reference)
            .ok_or(RelayError::NotFoundInHistory)
    }

    /// Delete the copies of the newest `count` records of this instance.
    ///
    /// Cleanup helper for periods where two instances relayed in parallel.
    pub async fn purge_recent(&self, count: usize) -> Result<usize> {
        let mut deleted = 0;
        for record in self.history.recent(count) {
            for copy in &record.copies {
                match self.transport.delete(copy).await {
                    Ok(()) => deleted += 1,
                    Err(e) => debug!(reference = %copy, error = %e, "could not delete copy"),
                }
            }
            self.history.remove_matching(|r| r.origin == record.origin);
        }
        info!(deleted, "purged recent relayed messages");
        Ok(deleted)
    }

    /// Broadcast under the system identity.
    pub async fn broadcast_system(&self, text: &str) -> Vec<MessageRef> {
        self.broadcaster.broadcast_system(text).await
    }

    /// Whether a sender is currently auto-banned in this instance.
    pub fn is_blocked(&self, user: UserId) -> bool {
        self.blocked
            .read()
            .expect("block list poisoned")
            .contains(&user)
    }

    /// The endpoint registry.
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// The guild directory.
    pub fn guilds(&self) -> &Arc<GuildDirectory> {
        &self.guilds
    }

    /// The history ledger.
    pub fn history(&self) -> &Arc<HistoryLedger> {
        &self.history
    }

    /// The in-memory federation state.
    pub fn state(&self) -> &Arc<RwLock<FederationState>> {
        &self.state
    }

    /// The reconciler, for driving cycles directly.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }
}
