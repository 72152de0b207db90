//! Deterministic mapping from asset ids to tier-sharded on-disk paths.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Superset of the invalid filename characters across platforms.
/// Control characters are rejected separately.
const INVALID: &[char] = &['"', '<', '>', '|', ':', '*', '?', '\\', '/'];

pub const BAK_EXT: &str = "bak";
pub const STAMP_PREFIX: &str = "RegionStatus_";
pub const STAMP_EXT: &str = "fac";

/// Maps ids to paths under the cache root, sharded by leading
/// characters so no single directory grows unbounded.
#[derive(Clone, Debug)]
pub struct ShardLayout {
    root: PathBuf,
    tiers: usize,
    tier_len: usize,
}

impl ShardLayout {
    pub fn new(root: impl Into<PathBuf>, tiers: usize, tier_len: usize) -> Self {
        ShardLayout {
            root: root.into(),
            tiers: tiers.clamp(1, 3),
            tier_len: tier_len.clamp(1, 4),
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The on-disk path for `id`, or `None` for blank ids.
    ///
    /// Shard directory names come from the sanitized id right-padded
    /// with `_`; the file name is the sanitized id itself.
    pub fn path_of(&self, id: &str) -> Option<PathBuf> {
        if id.trim().is_empty() {
            return None;
        }

        let sanitized = sanitize(id);
        let mut padded: Vec<char> = sanitized.chars().collect();
        while padded.len() < self.tiers * self.tier_len {
            padded.push('_');
        }

        let mut path = self.root.clone();
        for prefix in padded.chunks(self.tier_len).take(self.tiers) {
            path.push(prefix.iter().collect::<String>());
        }
        path.push(sanitized);
        Some(path)
    }

    /// Per-region deep-scan stamp file.
    pub fn stamp_path(&self, region: Uuid) -> PathBuf {
        self.root
            .join(format!("{STAMP_PREFIX}{region}.{STAMP_EXT}"))
    }
}

/// Replace every character from the invalid set with `_`.
pub fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_control() || INVALID.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Parse `RegionStatus_<uuid>.fac` file names back to the region id.
pub fn stamp_region(file_name: &str) -> Option<Uuid> {
    let rest = file_name.strip_prefix(STAMP_PREFIX)?;
    let uuid = rest.strip_suffix(&format!(".{STAMP_EXT}"))?;
    Uuid::parse_str(uuid).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blank_ids_have_no_path() {
        let layout = ShardLayout::new("/cache", 1, 3);
        assert_eq!(layout.path_of(""), None);
        assert_eq!(layout.path_of("   "), None);
    }

    #[test]
    fn paths_are_deterministic() {
        let layout = ShardLayout::new("/cache", 2, 2);
        assert_eq!(layout.path_of("abcdef"), layout.path_of("abcdef"));
        assert_eq!(
            layout.path_of("abcdef").unwrap(),
            PathBuf::from("/cache/ab/cd/abcdef")
        );
    }

    #[test]
    fn invalid_characters_sanitize_to_distinct_paths() {
        let layout = ShardLayout::new("/cache", 1, 3);
        let dirty = "a/b\\c:d*e?f\"g<h>i|j";
        let path = layout.path_of(dirty).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "a_b_c_d_e_f_g_h_i_j"
        );
        // distinct dirty inputs stay distinct
        assert_ne!(layout.path_of("x/y"), layout.path_of("x/z"));
    }

    #[test]
    fn short_ids_are_padded_for_shard_names_only() {
        let layout = ShardLayout::new("/cache", 1, 3);
        assert_eq!(layout.path_of("a").unwrap(), PathBuf::from("/cache/a__/a"));
        // "a" and "a_" shard into the same directory but keep distinct names
        assert_ne!(layout.path_of("a"), layout.path_of("a_"));
    }

    #[test]
    fn boundary_shard_shapes_hold() {
        let deep = ShardLayout::new("/cache", 3, 4);
        assert_eq!(
            deep.path_of("0123456789abcdef").unwrap(),
            PathBuf::from("/cache/0123/4567/89ab/0123456789abcdef")
        );

        let flat = ShardLayout::new("/cache", 1, 1);
        assert_eq!(flat.path_of("zq").unwrap(), PathBuf::from("/cache/z/zq"));
    }

    #[test]
    fn out_of_range_shape_is_clamped() {
        let layout = ShardLayout::new("/cache", 0, 99);
        assert_eq!(
            layout.path_of("abcdefgh").unwrap(),
            PathBuf::from("/cache/abcd/abcdefgh")
        );
    }

    #[test]
    fn stamp_names_round_trip() {
        let layout = ShardLayout::new("/cache", 1, 3);
        let region = Uuid::new_v4();
        let path = layout.stamp_path(region);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(stamp_region(name), Some(region));
        assert_eq!(stamp_region("not-a-stamp.txt"), None);
    }
}
