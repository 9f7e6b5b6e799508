//! Cardinality family: `PFADD`, `PFCOUNT`, `PFMERGE`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::server::dispatcher::{text, CommandHandler, CommandRegistry, ConnectionContext, Reply};
use crate::store::RegisterBank;
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("PFADD", 2, None, Some(1), Arc::new(PfAdd));
    registry.register("PFCOUNT", 2, None, Some(1), Arc::new(PfCount));
    registry.register("PFMERGE", 2, None, Some(1), Arc::new(PfMerge));
}

struct PfAdd;

#[async_trait]
impl CommandHandler for PfAdd {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let existed = ctx.state.keyspace.with_registers(key, |_| ())?.is_some();
        let precision = ctx.state.config.hll_default_precision;
        let changed = ctx.state.keyspace.with_registers_mut(key, precision, |bank| {
            let mut changed = false;
            for element in &args[2..] {
                changed |= bank.add(element);
            }
            Ok(changed)
        })?;
        // Creating the key counts as a change even with no elements.
        Ok(Frame::Integer(i64::from(changed || !existed)).into())
    }
}

struct PfCount;

#[async_trait]
impl CommandHandler for PfCount {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let keys: Vec<&str> = args[1..].iter().map(text).collect::<Result<_>>()?;
        if keys.len() == 1 {
            let estimate = ctx
                .state
                .keyspace
                .with_registers(keys[0], RegisterBank::estimate)?
                .unwrap_or(0);
            return Ok(Frame::Integer(estimate as i64).into());
        }
        // Multi-key form estimates the union without mutating any source.
        let mut union: Option<RegisterBank> = None;
        for key in keys {
            let Some(bank) = ctx.state.keyspace.with_registers(key, Clone::clone)? else {
                continue;
            };
            match &mut union {
                Some(acc) => acc.merge(&bank)?,
                None => union = Some(bank),
            }
        }
        let estimate = union.map_or(0, |bank| bank.estimate());
        Ok(Frame::Integer(estimate as i64).into())
    }
}

struct PfMerge;

#[async_trait]
impl CommandHandler for PfMerge {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let destination = text(&args[1])?;
        let mut sources = Vec::new();
        for key in &args[2..] {
            if let Some(bank) = ctx.state.keyspace.with_registers(text(key)?, Clone::clone)? {
                sources.push(bank);
            }
        }
        let precision = sources
            .first()
            .map_or(ctx.state.config.hll_default_precision, RegisterBank::precision);
        ctx.state
            .keyspace
            .with_registers_mut(destination, precision, |bank| {
                for source in &sources {
                    bank.merge(source)?;
                }
                Ok(())
            })?;
        Ok(Frame::ok().into())
    }
}
