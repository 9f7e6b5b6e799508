//! Horizontal partitioning: the slot routing table with failover.
//!
//! A fixed space of 16,384 slots maps keys to nodes. Primaries own
//! disjoint slot subsets; replicas attach to a primary and own nothing.
//! Failover promotes a replica, marks the old primary failed and bumps the
//! monotonic epoch so topology observations can be ordered. The map
//! records topology and routes; it does not replicate writes.

mod slots;

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub use slots::{key_slot, SLOT_COUNT};

/// Node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns slots, serves writes.
    Primary,
    /// Attached to a primary, owns no slots.
    Replica,
}

/// Node liveness state machine: `connected -> suspected-fail -> fail`,
/// back to `connected` on a fresh heartbeat. `disconnected` covers nodes
/// observed unresponsive but not yet past the suspicion timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// Heartbeating normally.
    Connected,
    /// Missed recent heartbeats, inside the grace window.
    Disconnected,
    /// Past the suspicion timeout.
    SuspectedFail,
    /// Past the failure timeout (or failed over).
    Fail,
}

/// One cluster member.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterNode {
    /// Stable node identifier.
    pub id: String,
    /// Reachable address.
    pub addr: String,
    /// Wire port.
    pub port: u16,
    /// Primary or replica.
    pub role: Role,
    /// Liveness state.
    pub state: NodeState,
    /// Owned slots; empty for replicas.
    pub slots: BTreeSet<u16>,
    /// Epoch at the node's last topology change.
    pub epoch: u64,
    /// For replicas, the primary they follow.
    pub replica_of: Option<String>,
    /// Last observed heartbeat.
    pub last_heartbeat: DateTime<Utc>,
}

impl ClusterNode {
    /// `addr:port` form used in redirections and `CLUSTER NODES`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

/// Routing outcome for a key.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// The slot is owned by this node (or cluster mode is off).
    Local,
    /// The slot is owned by a connected remote node.
    Remote {
        /// The key's slot.
        slot: u16,
        /// Owner endpoint for the redirection.
        addr: String,
    },
    /// The slot has no connected owner.
    Unavailable {
        /// The key's slot.
        slot: u16,
    },
}

#[derive(Debug, Default)]
struct Topology {
    nodes: HashMap<String, ClusterNode>,
    /// slot -> owning primary id.
    owners: HashMap<u16, String>,
    epoch: u64,
}

/// The cluster map. All methods take `&self`; the topology lives behind a
/// dedicated read/write guard, independent of every other structure.
#[derive(Debug, Default)]
pub struct Cluster {
    topology: RwLock<Topology>,
    self_id: Option<String>,
}

impl Cluster {
    /// A map for a node participating as `self_id`.
    pub fn new(self_id: Option<String>) -> Self {
        Self {
            topology: RwLock::new(Topology::default()),
            self_id,
        }
    }

    /// This node's id, when cluster mode is on.
    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    /// Register a primary node.
    pub fn add_primary(&self, id: &str, addr: &str, port: u16) -> Result<()> {
        let mut topology = self.topology.write();
        if topology.nodes.contains_key(id) {
            return Err(Error::Constraint(format!("node '{id}' already exists")));
        }
        topology.epoch += 1;
        let epoch = topology.epoch;
        topology.nodes.insert(
            id.to_string(),
            ClusterNode {
                id: id.to_string(),
                addr: addr.to_string(),
                port,
                role: Role::Primary,
                state: NodeState::Connected,
                slots: BTreeSet::new(),
                epoch,
                replica_of: None,
                last_heartbeat: Utc::now(),
            },
        );
        info!(node = id, "registered primary");
        Ok(())
    }

    /// Register a replica attached to an existing primary.
    pub fn add_replica(&self, id: &str, addr: &str, port: u16, primary_id: &str) -> Result<()> {
        let mut topology = self.topology.write();
        if topology.nodes.contains_key(id) {
            return Err(Error::Constraint(format!("node '{id}' already exists")));
        }
        match topology.nodes.get(primary_id) {
            Some(node) if node.role == Role::Primary => {},
            Some(_) => {
                return Err(Error::Constraint(format!(
                    "node '{primary_id}' is not a primary"
                )))
            },
            None => {
                return Err(Error::Constraint(format!(
                    "unknown primary '{primary_id}'"
                )))
            },
        }
        topology.epoch += 1;
        let epoch = topology.epoch;
        topology.nodes.insert(
            id.to_string(),
            ClusterNode {
                id: id.to_string(),
                addr: addr.to_string(),
                port,
                role: Role::Replica,
                state: NodeState::Connected,
                slots: BTreeSet::new(),
                epoch,
                replica_of: Some(primary_id.to_string()),
                last_heartbeat: Utc::now(),
            },
        );
        info!(node = id, primary = primary_id, "registered replica");
        Ok(())
    }

    /// Remove a node and release its slots.
    pub fn remove_node(&self, id: &str) -> Result<()> {
        let mut topology = self.topology.write();
        let node = topology
            .nodes
            .remove(id)
            .ok_or_else(|| Error::Constraint(format!("unknown node '{id}'")))?;
        topology.owners.retain(|_, owner| owner != id);
        topology.epoch += 1;
        info!(node = id, role = ?node.role, "removed node");
        Ok(())
    }

    /// Distribute all 16,384 slots evenly across primaries, ordered by
    /// id; the remainder goes to the first `SLOT_COUNT mod N` of them.
    pub fn rebalance(&self) -> Result<()> {
        let mut topology = self.topology.write();
        let mut primaries: Vec<String> = topology
            .nodes
            .values()
            .filter(|n| n.role == Role::Primary)
            .map(|n| n.id.clone())
            .collect();
        if primaries.is_empty() {
            return Err(Error::Constraint("no primaries to rebalance onto".to_string()));
        }
        primaries.sort();

        let count = primaries.len() as u32;
        let base = u32::from(SLOT_COUNT) / count;
        let remainder = u32::from(SLOT_COUNT) % count;

        topology.owners.clear();
        for node in topology.nodes.values_mut() {
            node.slots.clear();
        }

        let mut next_slot: u32 = 0;
        for (position, id) in primaries.iter().enumerate() {
            let quota = base + u32::from((position as u32) < remainder);
            let range: BTreeSet<u16> = (next_slot..next_slot + quota).map(|s| s as u16).collect();
            next_slot += quota;
            for slot in &range {
                topology.owners.insert(*slot, id.clone());
            }
            if let Some(node) = topology.nodes.get_mut(id) {
                node.slots = range;
            }
        }
        topology.epoch += 1;
        let epoch = topology.epoch;
        for node in topology.nodes.values_mut() {
            if node.role == Role::Primary {
                node.epoch = epoch;
            }
        }
        info!(primaries = primaries.len(), epoch, "rebalanced slot map");
        Ok(())
    }

    /// Promote a replica of `primary_id`: slots transfer to the replica,
    /// the old primary is marked failed, and the epoch is bumped.
    /// Returns the promoted node's id.
    pub fn failover(&self, primary_id: &str) -> Result<String> {
        let mut topology = self.topology.write();
        match topology.nodes.get(primary_id) {
            Some(node) if node.role == Role::Primary => {},
            Some(_) => {
                return Err(Error::Constraint(format!(
                    "node '{primary_id}' is not a primary"
                )))
            },
            None => return Err(Error::Constraint(format!("unknown node '{primary_id}'"))),
        }
        // Prefer a connected replica; fall back to any replica.
        let mut candidates: Vec<&ClusterNode> = topology
            .nodes
            .values()
            .filter(|n| n.replica_of.as_deref() == Some(primary_id))
            .collect();
        candidates.sort_by_key(|n| (n.state != NodeState::Connected, n.id.clone()));
        let replica_id = candidates
            .first()
            .map(|n| n.id.clone())
            .ok_or_else(|| {
                Error::Constraint(format!("primary '{primary_id}' has no replica"))
            })?;

        topology.epoch += 1;
        let epoch = topology.epoch;

        let slots = {
            let old = topology.nodes.get_mut(primary_id).expect("checked above");
            let slots = std::mem::take(&mut old.slots);
            old.role = Role::Replica;
            old.state = NodeState::Fail;
            old.replica_of = Some(replica_id.clone());
            old.epoch = epoch;
            slots
        };
        for slot in &slots {
            topology.owners.insert(*slot, replica_id.clone());
        }
        {
            let promoted = topology.nodes.get_mut(&replica_id).expect("replica exists");
            promoted.role = Role::Primary;
            promoted.state = NodeState::Connected;
            promoted.replica_of = None;
            promoted.slots = slots;
            promoted.epoch = epoch;
        }
        warn!(
            failed = primary_id,
            promoted = %replica_id,
            epoch,
            "failover promoted replica"
        );
        Ok(replica_id)
    }

    /// Record a heartbeat: the node returns to `connected`.
    pub fn record_heartbeat(&self, id: &str) -> Result<()> {
        let mut topology = self.topology.write();
        let node = topology
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::Constraint(format!("unknown node '{id}'")))?;
        node.last_heartbeat = Utc::now();
        if node.state != NodeState::Connected {
            info!(node = id, "node recovered");
            node.state = NodeState::Connected;
        }
        Ok(())
    }

    /// Escalate states by heartbeat age: past `grace` -> disconnected,
    /// past `suspect_after` -> suspected-fail, past `fail_after` -> fail.
    /// Returns the number of state changes.
    pub fn escalate_missed_heartbeats(
        &self,
        grace: Duration,
        suspect_after: Duration,
        fail_after: Duration,
    ) -> usize {
        let now = Utc::now();
        let mut changes = 0usize;
        let mut topology = self.topology.write();
        for node in topology.nodes.values_mut() {
            if node.state == NodeState::Fail {
                continue;
            }
            let silent = now - node.last_heartbeat;
            let next = if silent > fail_after {
                NodeState::Fail
            } else if silent > suspect_after {
                NodeState::SuspectedFail
            } else if silent > grace {
                NodeState::Disconnected
            } else {
                NodeState::Connected
            };
            if next != node.state {
                warn!(node = %node.id, from = ?node.state, to = ?next, "heartbeat state change");
                node.state = next;
                changes += 1;
            }
        }
        changes
    }

    /// Route a key: the owning node when connected, otherwise a
    /// routing-unavailable signal. With no topology registered, every key
    /// is local (cluster mode off).
    pub fn route(&self, key: &[u8]) -> RouteDecision {
        let topology = self.topology.read();
        if topology.nodes.is_empty() {
            return RouteDecision::Local;
        }
        let slot = key_slot(key);
        let Some(owner_id) = topology.owners.get(&slot) else {
            return RouteDecision::Unavailable { slot };
        };
        let Some(owner) = topology.nodes.get(owner_id) else {
            return RouteDecision::Unavailable { slot };
        };
        if owner.state != NodeState::Connected {
            return RouteDecision::Unavailable { slot };
        }
        if self.self_id.as_deref() == Some(owner_id.as_str()) {
            RouteDecision::Local
        } else {
            RouteDecision::Remote {
                slot,
                addr: owner.endpoint(),
            }
        }
    }

    /// Whether any topology is registered.
    pub fn is_active(&self) -> bool {
        !self.topology.read().nodes.is_empty()
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.topology.read().epoch
    }

    /// Snapshot of all nodes, ordered by id.
    pub fn nodes(&self) -> Vec<ClusterNode> {
        let topology = self.topology.read();
        let mut nodes: Vec<ClusterNode> = topology.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Count of slots with an assigned owner.
    pub fn slots_assigned(&self) -> usize {
        self.topology.read().owners.len()
    }

    /// Contiguous `(start, end, owner_id, endpoint)` ranges, for
    /// `CLUSTER SLOTS`.
    pub fn slot_ranges(&self) -> Vec<(u16, u16, String, String)> {
        let topology = self.topology.read();
        let mut ranges = Vec::new();
        let mut current: Option<(u16, u16, String)> = None;
        for slot in 0..SLOT_COUNT {
            let owner = topology.owners.get(&slot).cloned();
            match (&mut current, owner) {
                (Some((_, end, id)), Some(next_id)) if *id == next_id && *end + 1 == slot => {
                    *end = slot;
                },
                (maybe, owner) => {
                    if let Some((start, end, id)) = maybe.take() {
                        let endpoint = topology
                            .nodes
                            .get(&id)
                            .map(ClusterNode::endpoint)
                            .unwrap_or_default();
                        ranges.push((start, end, id, endpoint));
                    }
                    if let Some(id) = owner {
                        *maybe = Some((slot, slot, id));
                    }
                },
            }
        }
        if let Some((start, end, id)) = current {
            let endpoint = topology
                .nodes
                .get(&id)
                .map(ClusterNode::endpoint)
                .unwrap_or_default();
            ranges.push((start, end, id, endpoint));
        }
        ranges
    }
}
