//! Scripting family: `EVAL`, `EVALSHA`, `SCRIPT LOAD`.
//!
//! Script execution holds the script guard for its full duration, so no
//! two scripts interleave writes against the keyspace. The budget comes
//! from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::script::{value_to_frame, KeyspaceApi, ScriptBudget};
use crate::server::dispatcher::{
    integer, text, CommandHandler, CommandRegistry, ConnectionContext, Reply,
};
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("EVAL", 3, None, None, Arc::new(Eval));
    registry.register("EVALSHA", 3, None, None, Arc::new(EvalSha));
    registry.register("SCRIPT", 2, None, None, Arc::new(Script));
}

async fn run_script(
    ctx: &ConnectionContext,
    source: &str,
    args: &[Bytes],
) -> Result<Frame> {
    let numkeys = integer(&args[2])?;
    if numkeys < 0 || (numkeys as usize) > args.len() - 3 {
        return Err(Error::Constraint("numkeys out of range".to_string()));
    }
    let numkeys = numkeys as usize;
    let keys: Vec<String> = args[3..3 + numkeys]
        .iter()
        .map(|k| text(k).map(str::to_string))
        .collect::<Result<_>>()?;
    let argv: Vec<String> = args[3 + numkeys..]
        .iter()
        .map(|a| text(a).map(str::to_string))
        .collect::<Result<_>>()?;

    let budget = ScriptBudget {
        max_ops: ctx.state.config.script.max_ops,
        max_millis: ctx.state.config.script.max_millis,
    };
    let store = KeyspaceApi::new(ctx.state.keyspace.clone(), ctx.state.bus.clone());

    // Exclusive script execution with respect to the keyspace.
    let _guard = ctx.state.script_guard.lock().await;
    let value = ctx
        .state
        .engine
        .eval(source, &keys, &argv, &store, &budget)?;
    Ok(value_to_frame(value))
}

struct Eval;

#[async_trait]
impl CommandHandler for Eval {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let source = text(&args[1])?.to_string();
        Ok(run_script(ctx, &source, args).await?.into())
    }
}

struct EvalSha;

#[async_trait]
impl CommandHandler for EvalSha {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let digest = text(&args[1])?;
        let source = ctx.state.scripts.get(digest).ok_or(Error::NoScript)?;
        Ok(run_script(ctx, &source, args).await?.into())
    }
}

struct Script;

#[async_trait]
impl CommandHandler for Script {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        match text(&args[1])?.to_ascii_uppercase().as_str() {
            "LOAD" => {
                let Some(source) = args.get(2) else {
                    return Err(Error::WrongArity("script".to_string()));
                };
                let digest = ctx.state.scripts.load(text(source)?);
                Ok(Frame::from(digest).into())
            },
            "EXISTS" => {
                let frames = args[2..]
                    .iter()
                    .map(|digest| {
                        Ok(Frame::Integer(i64::from(
                            ctx.state.scripts.get(text(digest)?).is_some(),
                        )))
                    })
                    .collect::<Result<Vec<Frame>>>()?;
                Ok(Frame::Array(frames).into())
            },
            other => Err(Error::Constraint(format!(
                "unknown SCRIPT subcommand '{other}'"
            ))),
        }
    }
}
