//! Operator command surface, keyed `cfcache`.
//!
//! The host console parses a line into words and hands everything
//! after the key to [`Command::parse`]; [`execute`] runs the command
//! against a cache and renders a plain-text report.

use crate::cache::{AssetCache, StatusReport};
use anyhow::{anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt::Write;
use std::time::SystemTime;

pub const COMMAND: &str = "cfcache";

pub const USAGE: &str = "cfcache <status | clear [file] [memory] | clearnegatives | assets | \
                         expire <datetime|now> | cachedefaultassets [set] | deletedefaultassets | \
                         cleanbak>";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Status,
    Clear { file: bool, memory: bool },
    ClearNegatives,
    /// Deep-touch every scene-referenced asset.
    Assets,
    /// Run cleanup with an explicit purge line.
    Expire(SystemTime),
    CacheDefaultAssets(String),
    DeleteDefaultAssets,
    CleanBak,
}

impl Command {
    /// Parse the words following the `cfcache` key.
    pub fn parse(args: &[&str]) -> anyhow::Result<Command> {
        let (verb, rest) = args.split_first().ok_or_else(|| anyhow!("usage: {USAGE}"))?;

        match *verb {
            "status" => Ok(Command::Status),
            "clear" => {
                let file = rest.iter().any(|w| w.eq_ignore_ascii_case("file"));
                let memory = rest.iter().any(|w| w.eq_ignore_ascii_case("memory"));
                if let Some(unknown) = rest
                    .iter()
                    .find(|w| !w.eq_ignore_ascii_case("file") && !w.eq_ignore_ascii_case("memory"))
                {
                    bail!("unknown clear target '{unknown}'");
                }
                Ok(Command::Clear { file, memory })
            }
            "clearnegatives" => Ok(Command::ClearNegatives),
            "assets" => Ok(Command::Assets),
            "expire" => Ok(Command::Expire(parse_when(rest)?)),
            "cachedefaultassets" => Ok(Command::CacheDefaultAssets(
                rest.first().unwrap_or(&"").to_string(),
            )),
            "deletedefaultassets" => Ok(Command::DeleteDefaultAssets),
            "cleanbak" => Ok(Command::CleanBak),
            unknown => bail!("unknown subcommand '{unknown}'; usage: {USAGE}"),
        }
    }
}

fn parse_when(args: &[&str]) -> anyhow::Result<SystemTime> {
    if args.is_empty() {
        bail!("expire needs a datetime or 'now'");
    }
    let text = args.join(" ");
    if text.eq_ignore_ascii_case("now") {
        return Ok(SystemTime::now());
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(&text) {
        return Ok(stamp.into());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc().into());
    }
    if let Ok(date) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().into());
        }
    }
    bail!("cannot parse '{text}' as a datetime")
}

/// Run a parsed command and render the operator report.
pub fn execute(cache: &AssetCache, command: Command) -> String {
    match command {
        Command::Status => render_status(&cache.status()),
        Command::Clear { file, memory } => {
            // no target means everything
            if !file && !memory {
                cache.clear();
                return "cleared file, memory, weak and negative caches".into();
            }
            let mut cleared = Vec::new();
            if file {
                cache.clear_file();
                cleared.push("file");
            }
            if memory {
                cache.clear_memory();
                cleared.push("memory");
            }
            format!("cleared {} cache", cleared.join(" and "))
        }
        Command::ClearNegatives => {
            cache.clear_negatives();
            "negative cache cleared".into()
        }
        Command::Assets => {
            let report = cache.deep_touch();
            format!(
                "deep-touch done: {} touched, {} refetched, {} missing upstream",
                report.touched, report.fetched, report.missing
            )
        }
        Command::Expire(purge_line) => {
            cache.run_cleanup(purge_line);
            "expired cached assets older than the given time".into()
        }
        Command::CacheDefaultAssets(set) => {
            let count = cache.cache_default_assets(&set);
            format!("cached {count} default assets")
        }
        Command::DeleteDefaultAssets => {
            let count = cache.delete_default_assets();
            format!("deleted {count} default assets")
        }
        Command::CleanBak => {
            let count = cache.clean_baks();
            format!("removed {count} backup files")
        }
    }
}

fn render_status(status: &StatusReport) -> String {
    let mut out = String::new();
    let stats = &status.stats;
    let _ = writeln!(
        out,
        "requests: {} (hit rate {:.1}%)",
        stats.requests,
        stats.hit_rate()
    );
    let _ = writeln!(
        out,
        "hits: weak {}, memory {}, file {}",
        stats.weak_hits, stats.memory_hits, stats.file_hits
    );
    let _ = writeln!(out, "in-flight joins: {}", stats.inflight_joins);
    let _ = writeln!(
        out,
        "weak entries: {} ({} live of {} sampled)",
        status.weak_entries, status.weak_live, status.weak_sampled
    );
    let _ = writeln!(
        out,
        "memory entries: {}, negative entries: {}, pending writes: {}",
        status.memory_entries, status.negative_entries, status.pending_writes
    );
    for (region, when) in &status.region_scans {
        let when: chrono::DateTime<chrono::Utc> = (*when).into();
        let _ = writeln!(out, "region {region}: deep scan at {}", when.to_rfc3339());
    }
    out
}
