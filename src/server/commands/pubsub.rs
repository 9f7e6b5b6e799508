//! Pub/sub family: `SUBSCRIBE`, `UNSUBSCRIBE`, `PSUBSCRIBE`,
//! `PUNSUBSCRIBE`, `PUBLISH`.
//!
//! Subscription records live on the connection context; the bus holds the
//! outbound queue handle. On connection close the context's teardown
//! removes everything it registered.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::server::dispatcher::{text, CommandHandler, CommandRegistry, ConnectionContext, Reply};
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("SUBSCRIBE", 2, None, None, Arc::new(Subscribe));
    registry.register("UNSUBSCRIBE", 1, None, None, Arc::new(Unsubscribe));
    registry.register("PSUBSCRIBE", 2, None, None, Arc::new(PSubscribe));
    registry.register("PUNSUBSCRIBE", 1, None, None, Arc::new(PUnsubscribe));
    registry.register("PUBLISH", 3, Some(3), None, Arc::new(Publish));
}

fn ack(kind: &str, subject: Option<&str>, count: usize) -> Frame {
    Frame::Array(vec![
        Frame::from(kind),
        match subject {
            Some(subject) => Frame::from(subject),
            None => Frame::NullBulk,
        },
        Frame::Integer(count as i64),
    ])
}

struct Subscribe;

#[async_trait]
impl CommandHandler for Subscribe {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let mut acks = Vec::with_capacity(args.len() - 1);
        for channel in &args[1..] {
            let channel = text(channel)?;
            ctx.state
                .bus
                .subscribe(ctx.subscriber_id, channel, ctx.outbound.clone());
            ctx.channel_subs.insert(channel.to_string());
            acks.push(ack("subscribe", Some(channel), ctx.subscription_count()));
        }
        Ok(Reply::Many(acks))
    }
}

struct Unsubscribe;

#[async_trait]
impl CommandHandler for Unsubscribe {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let channels: Vec<String> = if args.len() > 1 {
            args[1..]
                .iter()
                .map(|c| text(c).map(str::to_string))
                .collect::<Result<_>>()?
        } else {
            ctx.channel_subs.iter().cloned().collect()
        };
        if channels.is_empty() {
            return Ok(ack("unsubscribe", None, ctx.subscription_count()).into());
        }
        let mut acks = Vec::with_capacity(channels.len());
        for channel in channels {
            ctx.state.bus.unsubscribe(ctx.subscriber_id, &channel);
            ctx.channel_subs.remove(&channel);
            acks.push(ack("unsubscribe", Some(&channel), ctx.subscription_count()));
        }
        Ok(Reply::Many(acks))
    }
}

struct PSubscribe;

#[async_trait]
impl CommandHandler for PSubscribe {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let mut acks = Vec::with_capacity(args.len() - 1);
        for pattern in &args[1..] {
            let pattern = text(pattern)?;
            ctx.state
                .bus
                .psubscribe(ctx.subscriber_id, pattern, ctx.outbound.clone())?;
            ctx.pattern_subs.insert(pattern.to_string());
            acks.push(ack("psubscribe", Some(pattern), ctx.subscription_count()));
        }
        Ok(Reply::Many(acks))
    }
}

struct PUnsubscribe;

#[async_trait]
impl CommandHandler for PUnsubscribe {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let patterns: Vec<String> = if args.len() > 1 {
            args[1..]
                .iter()
                .map(|p| text(p).map(str::to_string))
                .collect::<Result<_>>()?
        } else {
            ctx.pattern_subs.iter().cloned().collect()
        };
        if patterns.is_empty() {
            return Ok(ack("punsubscribe", None, ctx.subscription_count()).into());
        }
        let mut acks = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            ctx.state.bus.punsubscribe(ctx.subscriber_id, &pattern);
            ctx.pattern_subs.remove(&pattern);
            acks.push(ack("punsubscribe", Some(&pattern), ctx.subscription_count()));
        }
        Ok(Reply::Many(acks))
    }
}

struct Publish;

#[async_trait]
impl CommandHandler for Publish {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let channel = text(&args[1])?;
        let delivered = ctx.state.bus.publish(channel, args[2].clone());
        Ok(Frame::Integer(delivered as i64).into())
    }
}
