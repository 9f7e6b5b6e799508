//! Connection family: `PING`, `ECHO`, `QUIT`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::server::dispatcher::{CommandHandler, CommandRegistry, ConnectionContext, Reply};
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("PING", 1, Some(2), None, Arc::new(Ping));
    registry.register("ECHO", 2, Some(2), None, Arc::new(Echo));
    registry.register("QUIT", 1, Some(1), None, Arc::new(Quit));
}

struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn execute(&self, _ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        Ok(match args.get(1) {
            Some(payload) => Frame::Bulk(payload.clone()).into(),
            None => Frame::Simple("PONG".to_string()).into(),
        })
    }
}

struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    async fn execute(&self, _ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        Ok(Frame::Bulk(args[1].clone()).into())
    }
}

struct Quit;

#[async_trait]
impl CommandHandler for Quit {
    async fn execute(&self, ctx: &mut ConnectionContext, _args: &[Bytes]) -> Result<Reply> {
        ctx.should_quit = true;
        Ok(Frame::ok().into())
    }
}
