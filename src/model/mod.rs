//! Domain model: actors, resources and typed entity snapshots

pub mod actor;
pub mod pagination;
pub mod resource;
pub mod snapshot;

pub use actor::{Actor, Department, OfficeId, Role, UserId};
pub use pagination::{Paginated, Pagination};
pub use resource::{Action, EntityId, EntityType, Resource, SensitivityCategory};
pub use snapshot::{
    CaseCommentRecord, CaseDocumentRecord, CaseRecord, CaseStatus, EntitySnapshot, FieldMap,
    Household, OfficeRecord, PaymentRecord, PaymentStatus, UserRecord,
};
