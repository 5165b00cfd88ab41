//! Evaluation engine for Hackle A/B tests, feature flags, remote config parameters and in-app
//! messages.
//!
//! A [Workspace] is parsed once from its JSON document and then shared; [HackleCore] decides
//! against the current snapshot and never fails, degrading to defaults with a
//! [DecisionReason]. The lower level [Evaluator] exposes each evaluation directly.

mod bucket;
mod condition;
mod config;
mod core;
mod decision;
mod error;
mod eval;
mod experiment;
mod experiment_flow;
mod flow;
mod in_app_message;
mod overrides;
mod reason;
mod remote_config;
mod rule;
mod segment;
mod store;
mod test_common;
mod user;
mod util;
mod value;
mod variation;
mod version;
mod workspace;

pub use crate::core::*;
pub use bucket::*;
pub use condition::*;
pub use config::*;
pub use decision::*;
pub use error::*;
pub use eval::*;
pub use experiment::*;
pub use experiment_flow::*;
pub use flow::*;
pub use in_app_message::*;
pub use reason::*;
pub use remote_config::*;
pub use rule::*;
pub use segment::*;
pub use store::*;
pub use user::*;
pub use value::*;
pub use variation::*;
pub use version::*;
pub use workspace::*;
