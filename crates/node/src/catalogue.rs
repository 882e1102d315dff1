use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use p2p::{CatalogueItem, CatalogueSet, ProcedureCatalogue};
use serde::Deserialize;

use crate::origin::BridgeQueue;

/// Part a node plays in the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Collects origin chains and submits them to consensus.
    Archivist,
    /// Witnesses its surroundings and hands its chain to bridges.
    Sentinel,
    /// Carries chains from sentinels to archivists.
    Bridge,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Archivist => "archivist",
            NodeRole::Sentinel => "sentinel",
            NodeRole::Bridge => "bridge",
        };
        f.write_str(name)
    }
}

/// Catalogue a node advertises for its role.
pub struct RoleCatalogue {
    role: NodeRole,
    queue: Arc<BridgeQueue>,
}

impl RoleCatalogue {
    pub fn new(role: NodeRole, queue: Arc<BridgeQueue>) -> Self {
        Self { role, queue }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }
}

impl ProcedureCatalogue for RoleCatalogue {
    fn can_do(&self, item: CatalogueItem) -> bool {
        match (self.role, item) {
            (_, CatalogueItem::BoundWitness) => true,
            (NodeRole::Archivist | NodeRole::Bridge, CatalogueItem::TakeOriginChain) => true,
            (NodeRole::Sentinel, CatalogueItem::GiveOriginChain) => true,
            // A bridge only offers chains it actually holds.
            (NodeRole::Bridge, CatalogueItem::GiveOriginChain) => !self.queue.is_empty(),
            _ => false,
        }
    }

    fn current_catalogue(&self) -> CatalogueSet {
        CatalogueItem::ALL
            .into_iter()
            .filter(|item| self.can_do(*item))
            .collect()
    }
}
