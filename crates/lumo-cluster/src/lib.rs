//! Leader-side cluster logic.
//!
//! - [`member`]: shard membership, heartbeat liveness, and per-member
//!   outboxes for replay after re-registration
//! - [`router`]: content-addressed upload routing with dedup
//! - [`coordinator`]: scatter-gather search aggregation and finalization
//! - [`leader`]: the node tying listeners, sweeps, and verbs together

pub mod coordinator;
pub mod leader;
pub mod member;
pub mod router;

pub use coordinator::{
    CoordinatorConfig, Deadline, FinalizedSearch, GatherPolicy, QueryCoordinator, ScatterPlan,
    SearchMode, SearchPlan, WaitForAll,
};
pub use leader::{LeaderConfig, LeaderError, LeaderNode};
pub use member::{MemberInfo, MemberStatus, MemberTable, RegisterOutcome};
pub use router::{RouteError, UploadOutcome, UploadRouter};
