pub mod catalogue;
pub mod cfg;
pub mod interaction;
pub mod origin;
pub mod session;
pub mod tasks;

pub use catalogue::{NodeRole, RoleCatalogue};
pub use cfg::NodeConfig;
pub use interaction::{
    DEFAULT_INTERACTION_TIMEOUT, Interaction, InteractionError, InteractionKind,
    InteractionOutcome, InteractionState,
};
pub use origin::{BridgeQueue, OriginChain, OriginError};
pub use session::{Node, NodeError};
pub use tasks::{run_consensus_flush_task, run_discovery_loop};
