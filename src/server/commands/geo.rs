//! Geospatial family: the `GEO*` commands.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::server::dispatcher::{
    float, text, CommandHandler, CommandRegistry, ConnectionContext, Reply,
};
use crate::store::{GeoPoint, Unit};
use crate::types::Frame;

pub(super) fn register(registry: &mut CommandRegistry) {
    registry.register("GEOADD", 5, None, Some(1), Arc::new(GeoAdd));
    registry.register("GEOPOS", 3, None, Some(1), Arc::new(GeoPos));
    registry.register("GEODIST", 4, Some(5), Some(1), Arc::new(GeoDist));
    registry.register("GEORADIUS", 6, Some(8), Some(1), Arc::new(GeoRadius));
    registry.register("GEORADIUSBYMEMBER", 5, Some(7), Some(1), Arc::new(GeoRadiusByMember));
    registry.register("GEOSEARCH", 7, Some(7), Some(1), Arc::new(GeoSearch));
    registry.register("GEOHASH", 3, None, Some(1), Arc::new(GeoHash));
}

struct GeoAdd;

#[async_trait]
impl CommandHandler for GeoAdd {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let triplets = &args[2..];
        if triplets.len() % 3 != 0 {
            return Err(Error::WrongArity("geoadd".to_string()));
        }
        let mut points = Vec::with_capacity(triplets.len() / 3);
        for triplet in triplets.chunks_exact(3) {
            points.push((float(&triplet[0])?, float(&triplet[1])?, text(&triplet[2])?));
        }
        let added = ctx.state.keyspace.with_geo_mut(key, |idx| {
            let mut added = 0i64;
            for (lon, lat, name) in points {
                if idx.add(name, lon, lat)? {
                    added += 1;
                }
            }
            Ok(added)
        })?;
        Ok(Frame::Integer(added).into())
    }
}

struct GeoPos;

#[async_trait]
impl CommandHandler for GeoPos {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let names: Vec<&str> = args[2..].iter().map(text).collect::<Result<_>>()?;
        let positions = ctx
            .state
            .keyspace
            .with_geo(key, |idx| {
                names
                    .iter()
                    .map(|name| idx.position(name))
                    .collect::<Vec<Option<GeoPoint>>>()
            })?
            .unwrap_or_else(|| vec![None; args.len() - 2]);
        let frames = positions
            .into_iter()
            .map(|position| match position {
                Some(p) => Frame::Array(vec![
                    Frame::bulk(p.longitude.to_string()),
                    Frame::bulk(p.latitude.to_string()),
                ]),
                None => Frame::NullBulk,
            })
            .collect();
        Ok(Frame::Array(frames).into())
    }
}

struct GeoDist;

#[async_trait]
impl CommandHandler for GeoDist {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let a = text(&args[2])?;
        let b = text(&args[3])?;
        let unit = match args.get(4) {
            Some(unit) => Unit::parse(text(unit)?)?,
            None => Unit::M,
        };
        let distance = ctx
            .state
            .keyspace
            .with_geo(key, |idx| idx.distance(a, b, unit))?
            .transpose();
        Ok(match distance {
            Ok(Some(d)) => Frame::bulk(format!("{d:.4}")).into(),
            Ok(None) | Err(Error::NotFound) => Frame::NullBulk.into(),
            Err(other) => return Err(other),
        })
    }
}

struct GeoRadius;

#[async_trait]
impl CommandHandler for GeoRadius {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let lon = float(&args[2])?;
        let lat = float(&args[3])?;
        let radius = float(&args[4])?;
        let unit = Unit::parse(text(&args[5])?)?;
        let flags = RadiusFlags::parse(&args[6..])?;
        let hits = ctx
            .state
            .keyspace
            .with_geo(key, |idx| idx.radius(lon, lat, radius, unit))?
            .transpose()?
            .unwrap_or_default();
        Ok(render_hits(hits, flags).into())
    }
}

struct GeoRadiusByMember;

#[async_trait]
impl CommandHandler for GeoRadiusByMember {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let member = text(&args[2])?;
        let radius = float(&args[3])?;
        let unit = Unit::parse(text(&args[4])?)?;
        let flags = RadiusFlags::parse(&args[5..])?;
        let hits = ctx
            .state
            .keyspace
            .with_geo(key, |idx| idx.radius_by_member(member, radius, unit))?
            .transpose()?
            .unwrap_or_default();
        Ok(render_hits(hits, flags).into())
    }
}

struct GeoSearch;

#[async_trait]
impl CommandHandler for GeoSearch {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let lon = float(&args[2])?;
        let lat = float(&args[3])?;
        let width = float(&args[4])?;
        let height = float(&args[5])?;
        let unit = Unit::parse(text(&args[6])?)?;
        let hits = ctx
            .state
            .keyspace
            .with_geo(key, |idx| idx.search_box(lon, lat, width, height, unit))?
            .transpose()?
            .unwrap_or_default();
        Ok(render_hits(hits, RadiusFlags::default()).into())
    }
}

struct GeoHash;

#[async_trait]
impl CommandHandler for GeoHash {
    async fn execute(&self, ctx: &mut ConnectionContext, args: &[Bytes]) -> Result<Reply> {
        let key = text(&args[1])?;
        let names: Vec<&str> = args[2..].iter().map(text).collect::<Result<_>>()?;
        let hashes = ctx
            .state
            .keyspace
            .with_geo(key, |idx| {
                names
                    .iter()
                    .map(|name| idx.geohash(name).ok())
                    .collect::<Vec<Option<String>>>()
            })?
            .unwrap_or_else(|| vec![None; args.len() - 2]);
        let frames = hashes
            .into_iter()
            .map(|hash| match hash {
                Some(h) => Frame::from(h),
                None => Frame::NullBulk,
            })
            .collect();
        Ok(Frame::Array(frames).into())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RadiusFlags {
    with_coord: bool,
    with_dist: bool,
}

impl RadiusFlags {
    fn parse(args: &[Bytes]) -> Result<Self> {
        let mut flags = Self::default();
        for arg in args {
            match text(arg)?.to_ascii_uppercase().as_str() {
                "WITHCOORD" => flags.with_coord = true,
                "WITHDIST" => flags.with_dist = true,
                other => return Err(Error::Constraint(format!("unknown option '{other}'"))),
            }
        }
        Ok(flags)
    }

    fn plain(self) -> bool {
        !self.with_coord && !self.with_dist
    }
}

fn render_hits(hits: Vec<(String, GeoPoint, f64)>, flags: RadiusFlags) -> Frame {
    let frames = hits
        .into_iter()
        .map(|(name, point, distance)| {
            if flags.plain() {
                return Frame::from(name);
            }
            let mut parts = vec![Frame::from(name)];
            if flags.with_dist {
                parts.push(Frame::bulk(format!("{distance:.4}")));
            }
            if flags.with_coord {
                parts.push(Frame::Array(vec![
                    Frame::bulk(point.longitude.to_string()),
                    Frame::bulk(point.latitude.to_string()),
                ]));
            }
            Frame::Array(parts)
        })
        .collect();
    Frame::Array(frames)
}
