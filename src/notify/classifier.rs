//! Event classifier
//!
//! Turns a committed mutation into notification intents. Detection decides
//! which event kinds a mutation represents; the routing table then says who
//! hears about each kind and how repeats collapse. Recipients whose relation
//! is missing are skipped, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::intent::NotificationIntent;
use crate::audit::AuditAction;
use crate::model::{
    Actor, CaseRecord, CaseStatus, EntityId, EntitySnapshot, EntityType, PaymentStatus,
    SensitivityCategory, UserId,
};

/// A committed mutation, as seen by the classifier
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub action: AuditAction,
    pub actor: Actor,
    pub before: Option<EntitySnapshot>,
    pub after: Option<EntitySnapshot>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LegalDocumentUploaded,
    CaseCommentAdded,
    CaseCompleted,
    CaseStaffAssigned,
    PaymentPaid,
    PaymentFailed,
    PaymentRefunded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LegalDocumentUploaded => "legal_document_uploaded",
            EventKind::CaseCommentAdded => "case_comment_added",
            EventKind::CaseCompleted => "case_completed",
            EventKind::CaseStaffAssigned => "case_staff_assigned",
            EventKind::PaymentPaid => "payment_paid",
            EventKind::PaymentFailed => "payment_failed",
            EventKind::PaymentRefunded => "payment_refunded",
        }
    }

    fn for_payment(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Paid => Some(EventKind::PaymentPaid),
            PaymentStatus::Failed => Some(EventKind::PaymentFailed),
            PaymentStatus::Refunded => Some(EventKind::PaymentRefunded),
            PaymentStatus::Pending => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relation that yields zero or more recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientSlot {
    AssignedLawyer,
    PrimaryStaff,
    AssignedStaff,
    NewlyAssignedStaff,
    OfficeAdmins,
    OfficeManagers,
    PayingClient,
}

/// How repeated triggers of the same event collapse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Every trigger is distinct
    None,
    /// One unread row per entity and event kind
    PerEvent,
    /// One unread row per entity, event kind and UTC day
    PerDay,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub kind: EventKind,
    pub slots: &'static [RecipientSlot],
    /// Leave out whoever wrote the comment or uploaded the document
    pub exclude_author: bool,
    pub dedup: DedupPolicy,
    /// `{case}` and `{entity}` are replaced with ids, `{title}` with the
    /// document title
    pub template: &'static str,
}

pub const ROUTES: &[Route] = &[
    Route {
        kind: EventKind::LegalDocumentUploaded,
        slots: &[RecipientSlot::AssignedLawyer, RecipientSlot::OfficeAdmins],
        exclude_author: false,
        dedup: DedupPolicy::PerEvent,
        template: "New legal document \"{title}\" on case #{case}",
    },
    Route {
        kind: EventKind::CaseCommentAdded,
        slots: &[RecipientSlot::AssignedStaff],
        exclude_author: true,
        dedup: DedupPolicy::None,
        template: "New comment on case #{case}",
    },
    Route {
        kind: EventKind::CaseCompleted,
        slots: &[RecipientSlot::PrimaryStaff, RecipientSlot::OfficeManagers],
        exclude_author: false,
        dedup: DedupPolicy::PerDay,
        template: "Case #{case} was completed",
    },
    Route {
        kind: EventKind::CaseStaffAssigned,
        slots: &[RecipientSlot::NewlyAssignedStaff],
        exclude_author: false,
        dedup: DedupPolicy::PerDay,
        template: "You were assigned to case #{case}",
    },
    Route {
        kind: EventKind::PaymentPaid,
        slots: &[RecipientSlot::PrimaryStaff, RecipientSlot::PayingClient],
        exclude_author: false,
        dedup: DedupPolicy::PerEvent,
        template: "Payment #{entity} was received",
    },
    Route {
        kind: EventKind::PaymentFailed,
        slots: &[RecipientSlot::PrimaryStaff, RecipientSlot::PayingClient],
        exclude_author: false,
        dedup: DedupPolicy::PerEvent,
        template: "Payment #{entity} failed",
    },
    Route {
        kind: EventKind::PaymentRefunded,
        slots: &[RecipientSlot::PrimaryStaff, RecipientSlot::PayingClient],
        exclude_author: false,
        dedup: DedupPolicy::PerEvent,
        template: "Payment #{entity} was refunded",
    },
];

pub fn route(kind: EventKind) -> Option<&'static Route> {
    ROUTES.iter().find(|r| r.kind == kind)
}

/// Relations resolved for the case an event hangs off
#[derive(Debug, Clone, Default)]
pub struct CaseContext {
    pub case: Option<CaseRecord>,
    pub office_admins: Vec<UserId>,
    pub office_managers: Vec<UserId>,
}

/// Deterministic dedup key for an event, `None` when it never collapses
pub fn dedup_key(
    policy: DedupPolicy,
    entity_type: EntityType,
    entity_id: EntityId,
    kind: EventKind,
    at: DateTime<Utc>,
) -> Option<String> {
    match policy {
        DedupPolicy::None => None,
        DedupPolicy::PerEvent => Some(format!("{}:{}:{}", entity_type, entity_id, kind)),
        DedupPolicy::PerDay => Some(format!(
            "{}:{}:{}:{}",
            entity_type,
            entity_id,
            kind,
            at.format("%Y-%m-%d")
        )),
    }
}

impl MutationEvent {
    fn subject(&self) -> Option<&EntitySnapshot> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// Event kinds this mutation represents, in table order
    pub fn kinds(&self) -> Vec<EventKind> {
        let mut kinds = Vec::new();

        match (self.action, self.before.as_ref(), self.after.as_ref()) {
            (AuditAction::Create, _, Some(EntitySnapshot::CaseDocument(doc)))
                if doc.sensitivity == SensitivityCategory::Legal =>
            {
                kinds.push(EventKind::LegalDocumentUploaded);
            }
            (AuditAction::Create, _, Some(EntitySnapshot::CaseComment(_))) => {
                kinds.push(EventKind::CaseCommentAdded);
            }
            (AuditAction::Update, Some(EntitySnapshot::Case(old)), Some(EntitySnapshot::Case(new))) => {
                if old.status != CaseStatus::Completed && new.status == CaseStatus::Completed {
                    kinds.push(EventKind::CaseCompleted);
                }
                if !newly_assigned(old, new).is_empty() {
                    kinds.push(EventKind::CaseStaffAssigned);
                }
            }
            (
                AuditAction::Create | AuditAction::Update,
                before,
                Some(EntitySnapshot::Payment(payment)),
            ) => {
                let previous = before.and_then(EntitySnapshot::as_payment).map(|p| p.status);
                if previous != Some(payment.status) {
                    kinds.extend(EventKind::for_payment(payment.status));
                }
            }
            _ => {}
        }

        kinds
    }
}

fn newly_assigned(old: &CaseRecord, new: &CaseRecord) -> Vec<UserId> {
    let before: BTreeSet<UserId> = old.assigned_staff().into_iter().collect();
    new.assigned_staff()
        .into_iter()
        .filter(|id| !before.contains(id))
        .collect()
}

fn resolve(slot: RecipientSlot, event: &MutationEvent, ctx: &CaseContext) -> Vec<UserId> {
    let case = ctx.case.as_ref();
    match slot {
        RecipientSlot::AssignedLawyer => case.and_then(|c| c.assigned_lawyer_id).into_iter().collect(),
        RecipientSlot::PrimaryStaff => case.and_then(|c| c.primary_staff_id).into_iter().collect(),
        RecipientSlot::AssignedStaff => case.map(CaseRecord::assigned_staff).unwrap_or_default(),
        RecipientSlot::NewlyAssignedStaff => match (&event.before, &event.after) {
            (Some(EntitySnapshot::Case(old)), Some(EntitySnapshot::Case(new))) => {
                newly_assigned(old, new)
            }
            _ => Vec::new(),
        },
        RecipientSlot::OfficeAdmins => ctx.office_admins.clone(),
        RecipientSlot::OfficeManagers => ctx.office_managers.clone(),
        RecipientSlot::PayingClient => event
            .after
            .as_ref()
            .and_then(EntitySnapshot::as_payment)
            .and_then(|p| p.client_id)
            .into_iter()
            .collect(),
    }
}

fn author_of(subject: &EntitySnapshot) -> Option<UserId> {
    match subject {
        EntitySnapshot::CaseComment(comment) => Some(comment.author_id),
        EntitySnapshot::CaseDocument(doc) => Some(doc.uploaded_by),
        _ => None,
    }
}

fn render(template: &str, subject: &EntitySnapshot) -> String {
    let title = match subject {
        EntitySnapshot::CaseDocument(doc) => doc.title.as_str(),
        EntitySnapshot::Case(case) => case.title.as_str(),
        _ => "",
    };
    let case = subject
        .case_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());

    template
        .replace("{case}", &case)
        .replace("{entity}", &subject.entity_id().to_string())
        .replace("{title}", title)
}

fn link_for(subject: &EntitySnapshot) -> Option<String> {
    match subject {
        EntitySnapshot::Payment(p) => Some(format!("/payments/{}", p.id)),
        other => other.case_id().map(|id| format!("/cases/{}", id)),
    }
}

/// Derive the intents for one committed mutation
pub fn classify(event: &MutationEvent, ctx: &CaseContext) -> Vec<NotificationIntent> {
    let Some(subject) = event.subject() else {
        return Vec::new();
    };

    event
        .kinds()
        .into_iter()
        .filter_map(route)
        .filter_map(|route| {
            let mut recipients: BTreeSet<UserId> = route
                .slots
                .iter()
                .flat_map(|slot| resolve(*slot, event, ctx))
                .collect();
            if route.exclude_author {
                if let Some(author) = author_of(subject) {
                    recipients.remove(&author);
                }
            }
            if recipients.is_empty() {
                return None;
            }

            // Case-level events key on the case, everything else on its own row
            let (entity_type, entity_id) = match subject {
                EntitySnapshot::Case(c) => (EntityType::Case, c.id),
                other => (other.entity_type(), other.entity_id()),
            };

            Some(NotificationIntent {
                recipient_user_ids: recipients.into_iter().collect(),
                kind: route.kind,
                entity_type,
                entity_id,
                message: render(route.template, subject),
                dedup_key: dedup_key(route.dedup, entity_type, entity_id, route.kind, event.at),
                link: link_for(subject),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaseCommentRecord, CaseDocumentRecord, Department, PaymentRecord, Role};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn lawyer() -> Actor {
        Actor::new(11, Role::Lawyer, 1, Department::Legal)
    }

    fn case_42() -> CaseRecord {
        let mut case = CaseRecord::new(42, 1, "Custody review");
        case.client_id = Some(900);
        case.primary_staff_id = Some(10);
        case.assigned_lawyer_id = Some(11);
        case.assigned_psychologist_id = Some(12);
        case
    }

    fn ctx() -> CaseContext {
        CaseContext {
            case: Some(case_42()),
            office_admins: vec![1, 2],
            office_managers: vec![20],
        }
    }

    fn event(
        action: AuditAction,
        actor: Actor,
        before: Option<EntitySnapshot>,
        after: Option<EntitySnapshot>,
    ) -> MutationEvent {
        MutationEvent {
            action,
            actor,
            before,
            after,
            at: at(),
        }
    }

    fn document(sensitivity: SensitivityCategory) -> EntitySnapshot {
        EntitySnapshot::CaseDocument(CaseDocumentRecord {
            id: 7,
            case_id: 42,
            office_id: 1,
            title: "Court filing".into(),
            sensitivity,
            storage_key: "docs/7".into(),
            uploaded_by: 11,
        })
    }

    #[test]
    fn test_every_kind_has_a_route() {
        for kind in [
            EventKind::LegalDocumentUploaded,
            EventKind::CaseCommentAdded,
            EventKind::CaseCompleted,
            EventKind::CaseStaffAssigned,
            EventKind::PaymentPaid,
            EventKind::PaymentFailed,
            EventKind::PaymentRefunded,
        ] {
            assert!(route(kind).is_some(), "{} has no route", kind);
        }
    }

    #[test]
    fn test_legal_upload_reaches_lawyer_and_admins_only() {
        let e = event(AuditAction::Create, lawyer(), None, Some(document(SensitivityCategory::Legal)));
        let intents = classify(&e, &ctx());

        assert_eq!(intents.len(), 1);
        let intent = &intents[0];
        assert_eq!(intent.kind, EventKind::LegalDocumentUploaded);
        assert_eq!(intent.recipient_user_ids, vec![1, 2, 11]);
        assert!(!intent.recipient_user_ids.contains(&12));
        assert_eq!(intent.entity_type, EntityType::CaseDocument);
        assert_eq!(intent.dedup_key.as_deref(), Some("caseDocument:7:legal_document_uploaded"));
        assert_eq!(intent.link.as_deref(), Some("/cases/42"));
        assert!(intent.message.contains("Court filing"));
    }

    #[test]
    fn test_general_upload_notifies_nobody() {
        let e = event(AuditAction::Create, lawyer(), None, Some(document(SensitivityCategory::General)));
        assert!(classify(&e, &ctx()).is_empty());
    }

    #[test]
    fn test_comment_excludes_author_and_never_dedups() {
        let comment = EntitySnapshot::CaseComment(CaseCommentRecord {
            id: 3,
            case_id: 42,
            office_id: 1,
            author_id: 11,
            body: "Hearing moved".into(),
            sensitivity: SensitivityCategory::General,
        });
        let e = event(AuditAction::Create, lawyer(), None, Some(comment));
        let intents = classify(&e, &ctx());

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].recipient_user_ids, vec![10, 12]);
        assert_eq!(intents[0].dedup_key, None);
    }

    #[test]
    fn test_comment_posted_on_behalf_skips_the_author_not_the_poster() {
        let comment = EntitySnapshot::CaseComment(CaseCommentRecord {
            id: 4,
            case_id: 42,
            office_id: 1,
            author_id: 12,
            body: "Session rescheduled".into(),
            sensitivity: SensitivityCategory::General,
        });
        let admin = Actor::new(1, Role::Admin, 1, Department::Administration);
        let e = event(AuditAction::Create, admin, None, Some(comment));
        let intents = classify(&e, &ctx());

        assert_eq!(intents[0].recipient_user_ids, vec![10, 11]);
    }

    #[test]
    fn test_completion_dedups_per_day() {
        let manager = Actor::new(20, Role::OfficeManager, 1, Department::Management);
        let before = case_42();
        let mut after = before.clone();
        after.complete(20, at());
        let e = event(
            AuditAction::Update,
            manager,
            Some(EntitySnapshot::Case(before)),
            Some(EntitySnapshot::Case(after)),
        );
        let intents = classify(&e, &ctx());

        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].recipient_user_ids, vec![10, 20]);
        assert_eq!(
            intents[0].dedup_key.as_deref(),
            Some("case:42:case_completed:2026-10-19")
        );
    }

    #[test]
    fn test_missing_relations_shrink_recipients() {
        let mut bare = ctx();
        bare.case = Some(CaseRecord::new(42, 1, "Unstaffed"));
        bare.office_admins.clear();

        let e = event(AuditAction::Create, lawyer(), None, Some(document(SensitivityCategory::Legal)));
        assert!(classify(&e, &bare).is_empty());

        bare.office_admins = vec![1];
        let intents = classify(&e, &bare);
        assert_eq!(intents[0].recipient_user_ids, vec![1]);
    }

    #[test]
    fn test_payment_terminal_transition() {
        let pending = PaymentRecord {
            id: 5,
            office_id: 1,
            case_id: Some(42),
            client_id: Some(900),
            amount_cents: 12_000,
            currency: "ILS".into(),
            status: PaymentStatus::Pending,
        };
        let mut paid = pending.clone();
        paid.status = PaymentStatus::Paid;

        let receptionist = Actor::new(30, Role::Receptionist, 1, Department::Reception);
        let e = event(
            AuditAction::Update,
            receptionist,
            Some(EntitySnapshot::Payment(pending.clone())),
            Some(EntitySnapshot::Payment(paid.clone())),
        );
        let intents = classify(&e, &ctx());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, EventKind::PaymentPaid);
        assert_eq!(intents[0].recipient_user_ids, vec![10, 900]);
        assert_eq!(intents[0].link.as_deref(), Some("/payments/5"));

        // Same status again is not a transition
        let e = event(
            AuditAction::Update,
            receptionist,
            Some(EntitySnapshot::Payment(paid.clone())),
            Some(EntitySnapshot::Payment(paid)),
        );
        assert!(classify(&e, &ctx()).is_empty());
    }

    #[test]
    fn test_new_assignment_notifies_only_the_new_staff() {
        let manager = Actor::new(20, Role::OfficeManager, 1, Department::Management);
        let before = case_42();
        let mut after = before.clone();
        after.assigned_staff_ids = vec![15];
        let e = event(
            AuditAction::Update,
            manager,
            Some(EntitySnapshot::Case(before)),
            Some(EntitySnapshot::Case(after)),
        );
        let intents = classify(&e, &ctx());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, EventKind::CaseStaffAssigned);
        assert_eq!(intents[0].recipient_user_ids, vec![15]);
    }
}
