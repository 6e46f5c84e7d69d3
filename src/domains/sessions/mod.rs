pub mod confirm;
pub mod entity;
pub mod lifecycle;
pub mod lock;
pub mod repository;
pub mod service;

pub use confirm::{AutoConfirm, Confirmation, Confirmer, StdinConfirmer};
pub use entity::{Session, SessionStatus};
pub use lifecycle::finalizer::FinishOutcome;
pub use repository::SessionStore;
pub use service::{ReconcileReport, SessionOrchestrator, SessionReport, TransitionOutcome};
