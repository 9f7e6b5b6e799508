//! Sorted-index family: the `Z*` commands.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::server::dispatcher::{
    float, integer, text, CommandHandler, CommandRegistry, ConnectionContext, Reply,
};
use crate::store::ScoreBound;
use crate::types::{format_f64, Frame};

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("ZADD", 4, None, Some(1), Arc::new(ZAdd));
    registry.register("ZREM", 3, None, Some(1), Arc::new(ZRem));
    registry.register("ZSCORE", 3, Some(3), Some(1), Arc::new(ZScore));
    registry.register("ZRANK", 3, Some(3), Some(1), Arc::new(ZRank { reverse: false }));
    registry.register("ZREVRANK", 3, Some(3), Some(1), Arc::new(ZRank { reverse: true }));
    registry.register("ZRANGE", 4, Some(5), Some(1), Arc::new(ZRange { reverse: false }));
    registry.register("ZREVRANGE", 4, Some(5), Some(1), Arc::new(ZRange { reverse: true }));
    registry.register("ZRANGEBYSCORE", 4, Some(5), Some(1), Arc::new(ZRangeByScore));
    registry.register("ZCOUNT", 4, Some(4), Some(1), Arc::new(ZCount));
    registry.register("ZCARD", 2, Some(2), Some(1), Arc::new(ZCard));
    registry.register("ZINCRBY", 4, Some(4), Some(1), Arc::new(ZIncrBy));
    registry.register("ZREMRANGEBYRANK", 4, Some(4), Some(1), Arc::new(ZRemRangeByRank));
    registry.register("ZREMRANGEBYSCORE", 4, Some(4), Some(1), Arc::new(ZRemRangeByScore));
}

struct ZAdd;

#[async_trait]
impl CommandHandler for ZAdd {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let pairs = &args[2..];
        if pairs.len() % 2 != 0 {
            return Err(Error::WrongArity("zadd".to_string()));
        }
        // Parse everything before mutating so a bad pair is a no-op.
        let mut entries = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks_exact(2) {
            entries.push((float(&pair[0])?, text(&pair[1])?));
        }
        let added = ctx.state.keyspace.with_sorted_mut(key, |idx| {
            let mut added = 0i64;
            for (score, member) in entries {
                if idx.insert(member, score)? {
                    added += 1;
                }
            }
            Ok(added)
        })?;
        Ok(Frame::Integer(added).into())
    }
}

struct ZRem;

#[async_trait]
impl CommandHandler for ZRem {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let members: Vec<&str> = args[2..].iter().map(text).collect::<Result<_>>()?;
        // Removing from an absent key must not create it.
        if ctx.state.keyspace.with_sorted(key, |_| ())?.is_none() {
            return Ok(Frame::Integer(0).into());
        }
        let (count, emptied) = ctx.state.keyspace.with_sorted_mut(key, |idx| {
            let mut count = 0i64;
            for member in &members {
                if idx.remove(member) {
                    count += 1;
                }
            }
            Ok((count, idx.is_empty()))
        })?;
        if emptied {
            ctx.state.keyspace.delete(&[key]);
        }
        Ok(Frame::Integer(count).into())
    }
}

struct ZScore;

#[async_trait]
impl CommandHandler for ZScore {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let member = text(&args[2])?;
        let score = ctx
            .state
            .keyspace
            .with_sorted(key, |idx| idx.score(member))?
            .flatten();
        Ok(match score {
            Some(score) => Frame::bulk_f64(score).into(),
            None => Frame::NullBulk.into(),
        })
    }
}

struct ZRank {
    reverse: bool,
}

#[async_trait]
impl CommandHandler for ZRank {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let member = text(&args[2])?;
        let reverse = self.reverse;
        let rank = ctx
            .state
            .keyspace
            .with_sorted(key, |idx| {
                if reverse {
                    idx.rev_rank(member)
                } else {
                    idx.rank(member)
                }
            })?
            .flatten();
        Ok(match rank {
            Some(rank) => Frame::Integer(rank as i64).into(),
            None => Frame::NullBulk.into(),
        })
    }
}

struct ZRange {
    reverse: bool,
}

#[async_trait]
impl CommandHandler for ZRange {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let start = integer(&args[2])?;
        let stop = integer(&args[3])?;
        let with_scores = parse_withscores(args.get(4))?;
        let reverse = self.reverse;
        let entries = ctx
            .state
            .keyspace
            .with_sorted(key, |idx| {
                if reverse {
                    idx.rev_range(start, stop)
                } else {
                    idx.range(start, stop)
                }
            })?
            .unwrap_or_default();
        Ok(render_entries(entries, with_scores).into())
    }
}

struct ZRangeByScore;

#[async_trait]
impl CommandHandler for ZRangeByScore {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let min = ScoreBound::parse(text(&args[2])?)?;
        let max = ScoreBound::parse(text(&args[3])?)?;
        let with_scores = parse_withscores(args.get(4))?;
        let entries = ctx
            .state
            .keyspace
            .with_sorted(key, |idx| idx.range_by_score(min, max))?
            .unwrap_or_default();
        Ok(render_entries(entries, with_scores).into())
    }
}

struct ZCount;

#[async_trait]
impl CommandHandler for ZCount {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let min = ScoreBound::parse(text(&args[2])?)?;
        let max = ScoreBound::parse(text(&args[3])?)?;
        let count = ctx
            .state
            .keyspace
            .with_sorted(key, |idx| idx.count_by_score(min, max))?
            .unwrap_or(0);
        Ok(Frame::Integer(count as i64).into())
    }
}

struct ZCard;

#[async_trait]
impl CommandHandler for ZCard {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let count = ctx
            .state
            .keyspace
            .with_sorted(key, |idx| idx.len())?
            .unwrap_or(0);
        Ok(Frame::Integer(count as i64).into())
    }
}

struct ZIncrBy;

#[async_trait]
impl CommandHandler for ZIncrBy {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let delta = float(&args[2])?;
        let member = text(&args[3])?;
        let score = ctx
            .state
            .keyspace
            .with_sorted_mut(key, |idx| idx.incr(member, delta))?;
        Ok(Frame::bulk(format_f64(score)).into())
    }
}

struct ZRemRangeByRank;

#[async_trait]
impl CommandHandler for ZRemRangeByRank {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let start = integer(&args[2])?;
        let stop = integer(&args[3])?;
        if ctx.state.keyspace.with_sorted(key, |_| ())?.is_none() {
            return Ok(Frame::Integer(0).into());
        }
        let (removed, emptied) = ctx.state.keyspace.with_sorted_mut(key, |idx| {
            let removed = idx.remove_range_by_rank(start, stop);
            Ok((removed, idx.is_empty()))
        })?;
        if emptied {
            ctx.state.keyspace.delete(&[key]);
        }
        Ok(Frame::Integer(removed as i64).into())
    }
}

struct ZRemRangeByScore;

#[async_trait]
impl CommandHandler for ZRemRangeByScore {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let min = ScoreBound::parse(text(&args[2])?)?;
        let max = ScoreBound::parse(text(&args[3])?)?;
        if ctx.state.keyspace.with_sorted(key, |_| ())?.is_none() {
            return Ok(Frame::Integer(0).into());
        }
        let (removed, emptied) = ctx.state.keyspace.with_sorted_mut(key, |idx| {
            let removed = idx.remove_range_by_score(min, max);
            Ok((removed, idx.is_empty()))
        })?;
        if emptied {
            ctx.state.keyspace.delete(&[key]);
        }
        Ok(Frame::Integer(removed as i64).into())
    }
}

fn parse_withscores(arg: Option<&Bytes>) -> Result<bool> {
    match arg {
        None => Ok(false),
        Some(flag) if text(flag)?.eq_ignore_ascii_case("WITHSCORES") => Ok(true),
        Some(flag) => Err(Error::Constraint(format!(
            "unknown option '{}'",
            text(flag)?
        ))),
    }
}

fn render_entries(entries: Vec<(String, f64)>, with_scores: bool) -> Frame {
    let mut frames = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        frames.push(Frame::from(member));
        if with_scores {
            frames.push(Frame::bulk(format_f64(score)));
        }
    }
    Frame::Array(frames)
}
