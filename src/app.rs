//! Multi-party application sessions.
//!
//! An app session is an off-chain ledger shared by its participants. Every
//! update has to be signed by participants (or their session keys) whose
//! weights reach the session's quorum. The [AppSessionEngine] validates
//! updates before they are sent to the node and applies them once the node
//! accepted them.

mod definition;
mod engine;
mod quorum;
mod update;


pub use definition::{app_session_id, AppDefinition, AppParticipant};
pub use engine::{
    AppSession, AppSessionEngine, AppSessionStatus, AppSessionVersion, RebalanceBatch,
};
pub use quorum::{verify_quorum, Quorum};
pub use update::{
    AppAllocation, AppStateIntent, AppStateUpdate, CreateAppSessionRequest,
    SignedAppStateUpdate, SubmitDepositStateRequest, UnknownAppStateIntent,
};
