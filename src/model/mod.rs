//! Core data types for `ticket_migrate`.
//!
//! Source-side snapshots live in [`source`]; the mutable staging records the
//! push pipeline drives into the target backend live in [`target`]. Records
//! reference each other only through string source IDs and numeric work item
//! IDs, never through embedded pointers.

pub mod source;
pub mod target;

pub use source::{
    Attachment, AttachmentPhase, Comment, LinkDirection, ReferenceReport, SourceBatch,
    SourceIssue, SourceLink, SourceLinkKind, SourceSystem, User,
};
pub use target::{
    ATTACHED_FILE, CorrelationId, CorrelationSequence, RelationType, TargetAttachment, TargetComment,
    TargetRecord, WorkItemId,
};
