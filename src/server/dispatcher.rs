//! Command registry and dispatch.
//!
//! The registry maps case-insensitive command names to handlers with
//! arity constraints. Dispatch validates arity, consults the slot router
//! for keyed commands when cluster mode is active, runs the handler, and
//! is the sole place component errors become wire error frames.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::cluster::RouteDecision;
use crate::error::{Error, Result};
use crate::pubsub::{Outbound, SubscriberId};
use crate::server::commands;
use crate::server::AppState;
use crate::types::Frame;

/// Reply produced by one command.
#[derive(Debug)]
pub enum Reply {
    /// A single frame.
    One(Frame),
    /// Several frames in order (multi-channel subscribe acknowledgements).
    Many(Vec<Frame>),
}

impl Reply {
    /// Flatten into frames.
    pub fn into_frames(self) -> Vec<Frame> {
        match self {
            Reply::One(frame) => vec![frame],
            Reply::Many(frames) => frames,
        }
    }
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        Reply::One(frame)
    }
}

/// Per-connection state visible to handlers.
pub struct ConnectionContext {
    /// Shared server state.
    pub state: Arc<AppState>,
    /// Subscriber identity of this connection.
    pub subscriber_id: SubscriberId,
    /// Outbound pub/sub queue owned by the connection task.
    pub outbound: Outbound,
    /// Channels this connection subscribes to.
    pub channel_subs: HashSet<String>,
    /// Patterns this connection subscribes to.
    pub pattern_subs: HashSet<String>,
    /// Set by `QUIT`; the connection task closes after replying.
    pub should_quit: bool,
}

impl ConnectionContext {
    /// Build the context for a fresh connection.
    pub fn new(state: Arc<AppState>, outbound: Outbound) -> Self {
        Self {
            state,
            subscriber_id: SubscriberId::new_v4(),
            outbound,
            channel_subs: HashSet::new(),
            pattern_subs: HashSet::new(),
            should_quit: false,
        }
    }

    /// Total live subscriptions, reported in subscribe acknowledgements.
    pub fn subscription_count(&self) -> usize {
        self.channel_subs.len() + self.pattern_subs.len()
    }
}

/// A command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Execute against the full argument vector (name included).
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply>;
}

/// Registry entry.
pub struct CommandSpec {
    /// Canonical (uppercase) name.
    pub name: &'static str,
    /// Minimum argument count, command name included.
    pub arity_min: usize,
    /// Maximum argument count; `None` is variadic.
    pub arity_max: Option<usize>,
    /// Index of the key argument used for slot routing, if any.
    pub key_index: Option<usize>,
    handler: Arc<dyn CommandHandler>,
}

/// The command table.
pub struct CommandRegistry {
    commands: HashMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    /// Build the full registry for every supported family.
    pub fn standard() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        commands::register_all(&mut registry);
        registry
    }

    /// Insert one command.
    pub fn register(
        &mut self,
        name: &'static str,
        arity_min: usize,
        arity_max: Option<usize>,
        key_index: Option<usize>,
        handler: Arc<dyn CommandHandler>,
    ) {
        self.commands.insert(
            name,
            CommandSpec {
                name,
                arity_min,
                arity_max,
                key_index,
                handler,
            },
        );
    }

    /// Registered command names.
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    /// Dispatch one request. Never fails: every error becomes an error
    /// frame here and nowhere else.
    pub async fn dispatch(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Vec<Frame> {
        ctx.state.stats.commands_total.fetch_add(1, Ordering::Relaxed);
        match self.try_dispatch(ctx, args).await {
            Ok(reply) => reply.into_frames(),
            Err(err) => {
                debug!(error = %err, "command failed");
                vec![Frame::Error(err.wire_message())]
            },
        }
    }

    async fn try_dispatch(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let Some(first) = args.first() else {
            return Err(Error::Protocol("empty command array".to_string()));
        };
        let name_raw = std::str::from_utf8(first)
            .map_err(|_| Error::Protocol("command name is not utf-8".to_string()))?;
        let name = name_raw.to_ascii_uppercase();
        let Some(spec) = self.commands.get(name.as_str()) else {
            return Err(Error::UnknownCommand(name_raw.to_string()));
        };

        if args.len() < spec.arity_min || spec.arity_max.is_some_and(|max| args.len() > max) {
            return Err(Error::WrongArity(spec.name.to_ascii_lowercase()));
        }

        // Keyed commands consult the router when a topology is loaded.
        if let Some(key_index) = spec.key_index {
            if ctx.state.cluster.is_active() {
                if let Some(key) = args.get(key_index) {
                    match ctx.state.cluster.route(key) {
                        RouteDecision::Local => {},
                        RouteDecision::Remote { slot, addr } => {
                            return Err(Error::Moved { slot, addr });
                        },
                        RouteDecision::Unavailable { slot } => {
                            return Err(Error::RoutingUnavailable(slot));
                        },
                    }
                }
            }
        }

        spec.handler.execute(ctx, args).await
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.commands.len())
            .finish()
    }
}

// ---- shared argument parsing ----

/// Interpret an argument as UTF-8 text.
pub fn text(arg: &Bytes) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| Error::Protocol("argument is not utf-8".to_string()))
}

/// Parse an integer argument.
pub fn integer(arg: &Bytes) -> Result<i64> {
    text(arg)?.parse().map_err(|_| Error::NotAnInteger)
}

/// Parse a float argument.
pub fn float(arg: &Bytes) -> Result<f64> {
    let value: f64 = text(arg)?.parse().map_err(|_| Error::NotAFloat)?;
    if value.is_nan() {
        return Err(Error::NotAFloat);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::test_state;

    fn ctx() -> ConnectionContext {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        ConnectionContext::new(test_state(), tx)
    }

    fn req(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
    }

    #[tokio::test]
    async fn unknown_command_error_is_canonical() {
        let registry = CommandRegistry::standard();
        let mut ctx = ctx();
        let frames = registry.dispatch(&mut ctx, &req(&["FROBNICATE"])).await;
        assert_eq!(
            frames,
            vec![Frame::Error("ERR unknown command 'FROBNICATE'".to_string())]
        );
    }

    #[tokio::test]
    async fn arity_mismatch_error_is_canonical() {
        let registry = CommandRegistry::standard();
        let mut ctx = ctx();
        let frames = registry.dispatch(&mut ctx, &req(&["GET"])).await;
        assert_eq!(
            frames,
            vec![Frame::Error(
                "ERR wrong number of arguments for 'get' command".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn command_names_are_case_insensitive() {
        let registry = CommandRegistry::standard();
        let mut ctx = ctx();
        let frames = registry.dispatch(&mut ctx, &req(&["ping"])).await;
        assert_eq!(frames, vec![Frame::Simple("PONG".to_string())]);
    }

    #[tokio::test]
    async fn integer_parse_failure_is_canonical() {
        let registry = CommandRegistry::standard();
        let mut ctx = ctx();
        let frames = registry
            .dispatch(&mut ctx, &req(&["EXPIRE", "k", "not-a-number"]))
            .await;
        assert_eq!(
            frames,
            vec![Frame::Error(
                "ERR value is not an integer or out of range".to_string()
            )]
        );
    }

    #[test]
    fn registry_covers_every_command_family() {
        let registry = CommandRegistry::standard();
        let names = registry.names();
        for expected in [
            "PING", "ECHO", "QUIT", "SET", "GET", "DEL", "EXISTS", "KEYS", "TTL", "EXPIRE",
            "FLUSHDB", "INFO", "MSET", "MGET", "SETEX", "ZADD", "ZREM", "ZSCORE", "ZRANK",
            "ZREVRANK", "ZRANGE", "ZREVRANGE", "ZRANGEBYSCORE", "ZCOUNT", "ZCARD", "ZINCRBY",
            "GEOADD", "GEOPOS", "GEODIST", "GEORADIUS", "GEOHASH", "PFADD", "PFCOUNT", "PFMERGE",
            "SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE", "PUBLISH", "EVAL",
            "EVALSHA", "SCRIPT", "CLUSTER",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
