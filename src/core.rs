//! The mutation pipeline and query surface
//!
//! A mutation runs authorize, persist and audit inside one transaction and
//! commits them together. Classification, enqueue and push happen after
//! commit; their failures are logged and never reach the caller.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{verify_chain, AuditAction, AuditEntry, AuditRecorder, AuditView, ChainBreak};
use crate::auth::{PermissionDecision, PolicyEngine};
use crate::db::{AuditQuery, Store, Transaction};
use crate::model::{
    Action, Actor, EntityId, EntitySnapshot, EntityType, Paginated, Pagination, Resource, Role,
    UserId,
};
use crate::notify::{classify, CaseContext, MutationEvent, Notification, NotificationStore};
use crate::realtime::{RealtimeDispatcher, DEFAULT_PUSH_TIMEOUT, DEFAULT_SESSION_BUFFER};
use crate::types::{CaseguardError, Result};

const CHAIN_BATCH: usize = 500;

/// Library-level settings
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub audit_retention: Option<chrono::Duration>,
    pub audit_sensitive_reads: bool,
    pub push_timeout: Duration,
    pub session_buffer: usize,
    pub mutation_retries: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            audit_retention: None,
            audit_sensitive_reads: false,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            session_buffer: DEFAULT_SESSION_BUFFER,
            mutation_retries: 3,
        }
    }
}

/// A requested change to one entity
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(EntitySnapshot),
    Update(EntitySnapshot),
    Delete {
        entity_type: EntityType,
        entity_id: EntityId,
    },
    Restore {
        entity_type: EntityType,
        entity_id: EntityId,
    },
}

impl Mutation {
    fn audit_action(&self) -> AuditAction {
        match self {
            Mutation::Create(_) => AuditAction::Create,
            Mutation::Update(_) => AuditAction::Update,
            Mutation::Delete { .. } => AuditAction::Delete,
            Mutation::Restore { .. } => AuditAction::Restore,
        }
    }

    fn policy_action(&self) -> Action {
        match self {
            Mutation::Delete { .. } => Action::Delete,
            _ => Action::Write,
        }
    }

    fn target(&self) -> (EntityType, EntityId) {
        match self {
            Mutation::Create(s) | Mutation::Update(s) => (s.entity_type(), s.entity_id()),
            Mutation::Delete {
                entity_type,
                entity_id,
            }
            | Mutation::Restore {
                entity_type,
                entity_id,
            } => (*entity_type, *entity_id),
        }
    }
}

/// Result of a committed mutation
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub audit: AuditEntry,
    /// Entity state after the mutation, `None` after a delete
    pub snapshot: Option<EntitySnapshot>,
    /// Rows enqueued for the event; empty if classification or enqueue failed
    pub notifications: Vec<Notification>,
}

struct Committed {
    audit: AuditEntry,
    event: MutationEvent,
}

pub struct CaseCore<S: Store> {
    store: Arc<S>,
    policy: PolicyEngine,
    recorder: AuditRecorder,
    notifications: NotificationStore<S>,
    dispatcher: RealtimeDispatcher,
    config: CoreConfig,
}

impl<S: Store> CaseCore<S> {
    pub fn new(store: Arc<S>, config: CoreConfig) -> Self {
        Self {
            policy: PolicyEngine::new(),
            recorder: AuditRecorder::new(config.audit_retention, config.audit_sensitive_reads),
            notifications: NotificationStore::new(Arc::clone(&store)),
            dispatcher: RealtimeDispatcher::new(config.push_timeout, config.session_buffer),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn dispatcher(&self) -> &RealtimeDispatcher {
        &self.dispatcher
    }

    /// Authorize, persist and audit one mutation, then fan out its
    /// notifications. Write conflicts retry the whole unit.
    pub async fn mutate(
        &self,
        actor: &Actor,
        mutation: Mutation,
        reason: Option<String>,
    ) -> Result<MutationOutcome> {
        let mut attempt = 0;
        let committed = loop {
            match self.apply(actor, &mutation, reason.clone()).await {
                Ok(committed) => break committed,
                Err(e) if e.is_retryable() && attempt < self.config.mutation_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Mutation conflicted, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            actor_id = actor.id,
            seq = committed.audit.seq,
            entity_type = %committed.audit.entity_type,
            entity_id = committed.audit.entity_id,
            action = %committed.audit.action,
            "Mutation committed"
        );

        let notifications = self.fan_out(&committed.event).await;
        Ok(MutationOutcome {
            snapshot: committed.event.after.clone(),
            audit: committed.audit,
            notifications,
        })
    }

    async fn apply(
        &self,
        actor: &Actor,
        mutation: &Mutation,
        reason: Option<String>,
    ) -> Result<Committed> {
        let mut tx = self.store.begin().await?;
        let (entity_type, entity_id) = mutation.target();

        let (before, after) = match mutation {
            Mutation::Create(snapshot) => {
                if tx.load(entity_type, entity_id).await?.is_some()
                    || tx.load_deleted(entity_type, entity_id).await?.is_some()
                {
                    return Err(CaseguardError::BadRequest(format!(
                        "{} {} already exists",
                        entity_type, entity_id
                    )));
                }
                (None, Some(snapshot.clone()))
            }
            Mutation::Update(snapshot) => {
                let current = tx.load(entity_type, entity_id).await?;
                let current = self.require(actor, current, entity_type, entity_id)?;
                (Some(current), Some(snapshot.clone()))
            }
            Mutation::Delete { .. } => {
                let current = tx.load(entity_type, entity_id).await?;
                (Some(self.require(actor, current, entity_type, entity_id)?), None)
            }
            Mutation::Restore { .. } => {
                let deleted = tx.load_deleted(entity_type, entity_id).await?;
                (None, Some(self.require(actor, deleted, entity_type, entity_id)?))
            }
        };

        // Moving an entity needs rights on both sides
        let action = mutation.policy_action();
        for snapshot in before.iter().chain(after.iter()) {
            let resource = resource_for(tx.as_mut(), snapshot).await?;
            let decision = self.policy.authorize(actor, &resource, action);
            if !decision.allowed {
                self.deny(Some(tx), &decision).await;
                return Err(CaseguardError::Forbidden);
            }
        }

        match &after {
            Some(snapshot) => tx.save(snapshot).await?,
            None => tx.remove(entity_type, entity_id).await?,
        }

        let audit = self
            .recorder
            .record(
                tx.as_mut(),
                mutation.audit_action(),
                before.as_ref(),
                after.as_ref(),
                actor,
                reason,
            )
            .await?;

        tx.commit().await?;

        Ok(Committed {
            event: MutationEvent {
                action: audit.action,
                actor: *actor,
                before,
                after,
                at: audit.created_at,
            },
            audit,
        })
    }

    /// Missing targets read as denials for non-admins so ids cannot be probed
    fn require(
        &self,
        actor: &Actor,
        found: Option<EntitySnapshot>,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<EntitySnapshot> {
        found.ok_or_else(|| {
            if actor.is_admin() {
                CaseguardError::NotFound(format!("{} {}", entity_type, entity_id))
            } else {
                CaseguardError::Forbidden
            }
        })
    }

    /// Close out a denial. Anomalies are recorded and committed on their own;
    /// ordinary denials leave no audit trace.
    async fn deny(&self, tx: Option<Box<dyn Transaction>>, decision: &PermissionDecision) {
        if !decision.is_anomaly() {
            if let Some(tx) = tx {
                if let Err(e) = tx.rollback().await {
                    debug!(error = %e, "Rollback after denial failed");
                }
            }
            return;
        }

        // Conflicts retry like mutations so no anomaly is lost
        let mut tx = tx;
        let mut attempt = 0;
        loop {
            match self.commit_anomaly(tx.take(), decision).await {
                Ok(()) => return,
                Err(e) if e.is_retryable() && attempt < self.config.mutation_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Anomaly record conflicted, retrying");
                }
                Err(e) => {
                    error!(
                        actor_id = decision.actor.id,
                        reason = %decision.reason,
                        error = %e,
                        "Failed to record policy anomaly"
                    );
                    return;
                }
            }
        }
    }

    async fn commit_anomaly(
        &self,
        tx: Option<Box<dyn Transaction>>,
        decision: &PermissionDecision,
    ) -> Result<()> {
        let mut tx = match tx {
            Some(tx) => tx,
            None => self.store.begin().await?,
        };
        self.recorder.record_anomaly(tx.as_mut(), decision).await?;
        tx.commit().await
    }

    /// Gate a request that has no transaction of its own
    async fn enforce(&self, actor: &Actor, resource: &Resource, action: Action) -> Result<()> {
        let decision = self.policy.authorize(actor, resource, action);
        if decision.allowed {
            return Ok(());
        }
        self.deny(None, &decision).await;
        Err(CaseguardError::Forbidden)
    }

    async fn fan_out(&self, event: &MutationEvent) -> Vec<Notification> {
        if event.kinds().is_empty() {
            return Vec::new();
        }

        let ctx = match self.case_context(event).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "Could not resolve notification recipients");
                return Vec::new();
            }
        };

        let mut stored = Vec::new();
        for intent in classify(event, &ctx) {
            stored.extend(self.notifications.enqueue(&intent).await);
        }

        for notification in &stored {
            let dispatcher = self.dispatcher.clone();
            let notification = notification.clone();
            tokio::spawn(async move {
                dispatcher.push_notification(&notification).await;
            });
        }

        stored
    }

    async fn case_context(&self, event: &MutationEvent) -> Result<CaseContext> {
        let Some(subject) = event.after.as_ref().or(event.before.as_ref()) else {
            return Ok(CaseContext::default());
        };

        let case = match subject {
            EntitySnapshot::Case(c) => Some(c.clone()),
            other => match other.case_id() {
                Some(case_id) => self.store.case(case_id).await?,
                None => None,
            },
        };
        // Office roles follow the case; standalone rows use their own office
        let office_id = case.as_ref().map_or(subject.office_id(), |c| c.office_id);

        Ok(CaseContext {
            case,
            office_admins: self.store.office_users(office_id, Role::Admin).await?,
            office_managers: self.store.office_users(office_id, Role::OfficeManager).await?,
        })
    }

    /// Read one entity. Allowed reads of privileged content are audited
    /// when sensitive-read auditing is on.
    pub async fn read(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        entity_id: EntityId,
    ) -> Result<EntitySnapshot> {
        let mut tx = self.store.begin().await?;
        let found = tx.load(entity_type, entity_id).await?;
        let snapshot = self.require(actor, found, entity_type, entity_id)?;

        let resource = resource_for(tx.as_mut(), &snapshot).await?;
        let decision = self.policy.authorize(actor, &resource, Action::Read);
        if !decision.allowed {
            self.deny(Some(tx), &decision).await;
            return Err(CaseguardError::Forbidden);
        }

        if self.recorder.record_sensitive_read(tx.as_mut(), &decision).await?.is_some() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(snapshot)
    }

    pub async fn list_notifications(
        &self,
        actor: &Actor,
        page: Pagination,
    ) -> Result<Paginated<Notification>> {
        self.notifications.list(actor.id, page).await
    }

    pub async fn unread_count(&self, actor: &Actor) -> Result<u64> {
        self.notifications.unread_count(actor.id).await
    }

    /// Mark the actor's own notifications read; other ids are ignored
    pub async fn mark_read(&self, actor: &Actor, ids: &[Uuid]) -> Result<u64> {
        self.notifications.mark_read(actor.id, ids).await
    }

    pub async fn mark_all_read(&self, actor: &Actor) -> Result<u64> {
        self.notifications.mark_all_read(actor.id).await
    }

    /// Audit history of one entity, newest first
    pub async fn audit_by_entity(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        entity_id: EntityId,
        page: Pagination,
    ) -> Result<Paginated<AuditView>> {
        let query = AuditQuery::Entity {
            entity_type,
            entity_id,
        };
        self.audit_query(actor, &query, page).await
    }

    /// Entries written by `user_id` with `from <= created_at < to`
    pub async fn audit_by_actor(
        &self,
        actor: &Actor,
        user_id: UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        page: Pagination,
    ) -> Result<Paginated<AuditView>> {
        let query = AuditQuery::Actor {
            actor_id: user_id,
            from,
            to,
        };
        self.audit_query(actor, &query, page).await
    }

    async fn audit_query(
        &self,
        actor: &Actor,
        query: &AuditQuery,
        page: Pagination,
    ) -> Result<Paginated<AuditView>> {
        self.enforce(actor, &Resource::audit_trail(actor.office_id), Action::Read)
            .await?;

        let scope = if actor.is_admin() {
            None
        } else {
            Some(actor.office_id)
        };
        let entries = self.store.find_audit(query, scope, page).await?;
        Ok(entries.map(|entry| {
            // The trail must not leak what the wall hides on the entity itself
            let visible = self.policy.permits(actor, &entry.resource(), Action::Read);
            AuditView::for_viewer(entry, actor, visible)
        }))
    }

    /// Walk the whole audit chain and return how many entries were checked.
    /// Entries purged by retention are not counted; the oldest survivor
    /// anchors the walk. Operator maintenance; not exposed to request actors.
    pub async fn verify_audit_chain(&self) -> Result<std::result::Result<u64, ChainBreak>> {
        let mut last: Option<AuditEntry> = None;
        let mut checked = 0u64;

        loop {
            let after = last.as_ref().map_or(0, |e| e.seq);
            let batch = self.store.audit_chain(after, CHAIN_BATCH).await?;
            if batch.is_empty() {
                return Ok(Ok(checked));
            }
            let fetched = batch.len() as u64;

            // Overlap by one so links between batches are checked too
            let mut window = Vec::with_capacity(batch.len() + 1);
            window.extend(last.take());
            window.extend(batch);
            if let Err(broken) = verify_chain(&window) {
                return Ok(Err(broken));
            }

            checked += fetched;
            last = window.pop();
        }
    }
}

/// Policy view of a snapshot. Documents and comments take their client from
/// the case they hang off.
async fn resource_for(tx: &mut dyn Transaction, snapshot: &EntitySnapshot) -> Result<Resource> {
    let resource = snapshot.resource();
    match snapshot {
        EntitySnapshot::CaseDocument(_) | EntitySnapshot::CaseComment(_) => {
            let client_id = match snapshot.case_id() {
                Some(case_id) => tx
                    .load(EntityType::Case, case_id)
                    .await?
                    .and_then(|case| case.client_id()),
                None => None,
            };
            Ok(resource.owned_by(client_id))
        }
        _ => Ok(resource),
    }
}
