#![deny(clippy::all)]

//! Concurrent, multi-layer asset cache for a simulator host.
//!
//! Requests resolve through a cascade of tiers: a weak in-process map,
//! an expiring memory map, a tier-sharded on-disk store and a bounded
//! negative-lookup map, with a single-flight coordinator guaranteeing
//! at most one upstream fetch per absent id and at most one concurrent
//! write per asset file.

pub mod asset;
pub mod cache;
pub mod codec;
pub mod config;
pub mod console;
mod error;
mod flight;
mod pipeline;
pub mod service;
pub mod shard;
pub mod stats;
mod sweep;
mod tiers;

pub use asset::{Asset, AssetMetadata};
pub use cache::{AssetCache, DeepTouchReport, StatusReport};
pub use config::Config;
pub use error::{CacheError, Result};
pub use service::{AllowList, AssetService, DefaultAssets, RefKind, SceneRefs};

pub use anyhow;
