//! Cluster family: `CLUSTER INFO|NODES|SLOTS|KEYSLOT`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::cluster::{key_slot, NodeState, Role, SLOT_COUNT};
use crate::error::{Error, Result};
use crate::server::dispatcher::{text, CommandHandler, CommandRegistry, ConnectionContext, Reply};
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("CLUSTER", 2, None, None, Arc::new(ClusterCmd));
}

struct ClusterCmd;

#[async_trait]
impl CommandHandler for ClusterCmd {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        match text(&args[1])?.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Frame::bulk(info(ctx)).into()),
            "NODES" => Ok(Frame::bulk(nodes(ctx)).into()),
            "SLOTS" => Ok(slots(ctx).into()),
            "KEYSLOT" => {
                let Some(key) = args.get(2) else {
                    return Err(Error::WrongArity("cluster".to_string()));
                };
                Ok(Frame::Integer(i64::from(key_slot(key))).into())
            },
            other => Err(Error::Constraint(format!(
                "unknown CLUSTER subcommand '{other}'"
            ))),
        }
    }
}

fn info(ctx: &ConnectionContext) -> String {
    let cluster = &ctx.state.cluster;
    let enabled = cluster.is_active();
    let assigned = cluster.slots_assigned();
    let state = if !enabled || assigned == usize::from(SLOT_COUNT) {
        "ok"
    } else {
        "fail"
    };
    let known = cluster.nodes().len();
    format!(
        "cluster_enabled:{}\r\ncluster_state:{}\r\ncluster_slots_assigned:{}\r\ncluster_known_nodes:{}\r\ncluster_current_epoch:{}\r\n",
        u8::from(enabled),
        state,
        assigned,
        known,
        cluster.epoch(),
    )
}

fn nodes(ctx: &ConnectionContext) -> String {
    let mut out = String::new();
    for node in ctx.state.cluster.nodes() {
        let role = match node.role {
            Role::Primary => "master",
            Role::Replica => "slave",
        };
        let state = match node.state {
            NodeState::Connected => "connected",
            NodeState::Disconnected => "disconnected",
            NodeState::SuspectedFail => "fail?",
            NodeState::Fail => "fail",
        };
        let attached = node.replica_of.as_deref().unwrap_or("-");
        out.push_str(&format!(
            "{} {} {} {} {} {}",
            node.id,
            node.endpoint(),
            role,
            attached,
            node.epoch,
            state
        ));
        for (start, end) in slot_spans(&node.slots) {
            if start == end {
                out.push_str(&format!(" {start}"));
            } else {
                out.push_str(&format!(" {start}-{end}"));
            }
        }
        out.push_str("\r\n");
    }
    out
}

fn slots(ctx: &ConnectionContext) -> Frame {
    let ranges = ctx.state.cluster.slot_ranges();
    Frame::Array(
        ranges
            .into_iter()
            .map(|(start, end, id, endpoint)| {
                let (addr, port) = endpoint
                    .rsplit_once(':')
                    .map(|(a, p)| (a.to_string(), p.parse::<i64>().unwrap_or(0)))
                    .unwrap_or((endpoint, 0));
                Frame::Array(vec![
                    Frame::Integer(i64::from(start)),
                    Frame::Integer(i64::from(end)),
                    Frame::Array(vec![
                        Frame::from(addr),
                        Frame::Integer(port),
                        Frame::from(id),
                    ]),
                ])
            })
            .collect(),
    )
}

fn slot_spans(slots: &std::collections::BTreeSet<u16>) -> Vec<(u16, u16)> {
    let mut spans: Vec<(u16, u16)> = Vec::new();
    for &slot in slots {
        match spans.last_mut() {
            Some((_, end)) if *end + 1 == slot => *end = slot,
            _ => spans.push((slot, slot)),
        }
    }
    spans
}
