//! Keyspace family: `SET`, `GET`, `DEL`, `EXISTS`, `KEYS`, `TTL`,
//! `EXPIRE`, `FLUSHDB`, `INFO`, `MSET`, `MGET`, `SETEX`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;

use crate::error::{Error, Result};
use crate::server::dispatcher::{
    integer, text, CommandHandler, CommandRegistry, ConnectionContext, Reply,
};
use crate::server::info::build_info;
use crate::shared::pattern::GlobPattern;
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("SET", 3, Some(5), Some(1), Arc::new(Set));
    registry.register("GET", 2, Some(2), Some(1), Arc::new(Get));
    registry.register("DEL", 2, None, Some(1), Arc::new(Del));
    registry.register("EXISTS", 2, None, Some(1), Arc::new(Exists));
    registry.register("KEYS", 2, Some(2), None, Arc::new(Keys));
    registry.register("TTL", 2, Some(2), Some(1), Arc::new(Ttl));
    registry.register("EXPIRE", 3, Some(3), Some(1), Arc::new(Expire));
    registry.register("FLUSHDB", 1, Some(1), None, Arc::new(FlushDb));
    registry.register("INFO", 1, Some(2), None, Arc::new(Info));
    registry.register("MSET", 3, None, Some(1), Arc::new(MSet));
    registry.register("MGET", 2, None, Some(1), Arc::new(MGet));
    registry.register("SETEX", 4, Some(4), Some(1), Arc::new(SetEx));
}

struct Set;

#[async_trait]
impl CommandHandler for Set {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let value = args[2].clone();
        let ttl = match args.get(3) {
            None => None,
            Some(option) => {
                let Some(amount) = args.get(4) else {
                    return Err(Error::WrongArity("set".to_string()));
                };
                let amount = integer(amount)?;
                if amount <= 0 {
                    return Err(Error::Constraint("invalid expire time in 'set' command".to_string()));
                }
                match text(option)?.to_ascii_uppercase().as_str() {
                    "EX" => Some(Duration::seconds(amount)),
                    "PX" => Some(Duration::milliseconds(amount)),
                    other => {
                        return Err(Error::Constraint(format!("unknown SET option '{other}'")))
                    },
                }
            },
        };
        ctx.state.keyspace.set(key, value.into(), ttl);
        Ok(Frame::ok().into())
    }
}

struct Get;

#[async_trait]
impl CommandHandler for Get {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        match ctx.state.keyspace.get(key) {
            Ok(value) => Ok(Frame::Bulk(value).into()),
            Err(Error::NotFound) => Ok(Frame::NullBulk.into()),
            Err(other) => Err(other),
        }
    }
}

struct Del;

#[async_trait]
impl CommandHandler for Del {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let keys = collect_keys(&args[1..])?;
        Ok(Frame::Integer(ctx.state.keyspace.delete(&keys) as i64).into())
    }
}

struct Exists;

#[async_trait]
impl CommandHandler for Exists {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let keys = collect_keys(&args[1..])?;
        Ok(Frame::Integer(ctx.state.keyspace.exists(&keys) as i64).into())
    }
}

struct Keys;

#[async_trait]
impl CommandHandler for Keys {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let pattern = GlobPattern::compile(text(&args[1])?)?;
        let mut keys = ctx.state.keyspace.keys(&pattern);
        keys.sort_unstable();
        Ok(Frame::Array(keys.into_iter().map(Frame::from).collect()).into())
    }
}

struct Ttl;

#[async_trait]
impl CommandHandler for Ttl {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        Ok(Frame::Integer(ctx.state.keyspace.ttl(text(&args[1])?)).into())
    }
}

struct Expire;

#[async_trait]
impl CommandHandler for Expire {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let seconds = integer(&args[2])?;
        if seconds <= 0 {
            // A non-positive TTL deletes immediately.
            let removed = ctx.state.keyspace.delete(&[key]);
            return Ok(Frame::Integer(removed as i64).into());
        }
        let updated = ctx.state.keyspace.expire(key, Duration::seconds(seconds));
        Ok(Frame::Integer(i64::from(updated)).into())
    }
}

struct FlushDb;

#[async_trait]
impl CommandHandler for FlushDb {
    async fn execute(&self, ctx: &mut ConnectionContext, _args: &[Bytes]) -> Result<Reply> {
        ctx.state.keyspace.flush();
        Ok(Frame::ok().into())
    }
}

struct Info;

#[async_trait]
impl CommandHandler for Info {
    async fn execute(&self, ctx: &mut ConnectionContext, _args: &[Bytes]) -> Result<Reply> {
        Ok(Frame::bulk(build_info(&ctx.state)).into())
    }
}

struct MSet;

#[async_trait]
impl CommandHandler for MSet {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let pairs = &args[1..];
        if pairs.len() % 2 != 0 {
            return Err(Error::WrongArity("mset".to_string()));
        }
        for pair in pairs.chunks_exact(2) {
            let key = text(&pair[0])?;
            ctx.state.keyspace.set(key, pair[1].clone().into(), None);
        }
        Ok(Frame::ok().into())
    }
}

struct MGet;

#[async_trait]
impl CommandHandler for MGet {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let mut replies = Vec::with_capacity(args.len() - 1);
        for key in &args[1..] {
            let frame = match ctx.state.keyspace.get(text(key)?) {
                Ok(value) => Frame::Bulk(value),
                // Both absent keys and non-scalar keys read as null here.
                Err(_) => Frame::NullBulk,
            };
            replies.push(frame);
        }
        Ok(Frame::Array(replies).into())
    }
}

struct SetEx;

#[async_trait]
impl CommandHandler for SetEx {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let seconds = integer(&args[2])?;
        if seconds <= 0 {
            return Err(Error::Constraint(
                "invalid expire time in 'setex' command".to_string(),
            ));
        }
        ctx.state
            .keyspace
            .set(key, args[3].clone().into(), Some(Duration::seconds(seconds)));
        Ok(Frame::ok().into())
    }
}

fn collect_keys(args: &[Bytes]) -> Result<Vec<&str>> {
    args.iter().map(text).collect()
}
