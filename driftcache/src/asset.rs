use uuid::Uuid;

/// Immutable, content-addressed binary blob plus metadata.
///
/// Assets are identified by a stable string id and never mutated after
/// insertion; the tiers share them as `Arc<Asset>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub id: String,
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    /// Asset type code as used by the upstream service.
    pub kind: i8,
    pub flags: u32,
    pub data: Vec<u8>,
    pub local: bool,
    pub temporary: bool,
}

impl Asset {
    /// A minimal asset; the remaining fields start out empty.
    pub fn new(id: impl Into<String>, kind: i8, data: Vec<u8>) -> Self {
        Asset {
            id: id.into(),
            uuid: Uuid::nil(),
            name: String::new(),
            description: String::new(),
            kind,
            flags: 0,
            data,
            local: false,
            temporary: false,
        }
    }

    #[inline]
    pub fn metadata(&self) -> AssetMetadata {
        AssetMetadata {
            id: self.id.clone(),
            uuid: self.uuid,
            name: self.name.clone(),
            description: self.description.clone(),
            kind: self.kind,
            flags: self.flags,
            local: self.local,
            temporary: self.temporary,
        }
    }
}

/// Everything about an asset except its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetMetadata {
    pub id: String,
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub kind: i8,
    pub flags: u32,
    pub local: bool,
    pub temporary: bool,
}

pub(crate) const NIL_UUID_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Blank ids and the all-zero uuid string are rejected before any tier
/// is consulted.
#[inline]
pub(crate) fn valid_id(id: &str) -> bool {
    let trimmed = id.trim();
    !trimmed.is_empty() && trimmed != NIL_UUID_ID
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blank_and_nil_ids_are_invalid() {
        assert!(!valid_id(""));
        assert!(!valid_id("   "));
        assert!(!valid_id("\t\n"));
        assert!(!valid_id(NIL_UUID_ID));
        assert!(valid_id("abcde"));
        assert!(valid_id("00000000-0000-0000-0000-000000000001"));
    }

    #[test]
    fn metadata_drops_only_the_payload() {
        let mut asset = Asset::new("a1", 7, vec![1, 2, 3]);
        asset.name = "tex".into();
        asset.flags = 4;
        let meta = asset.metadata();
        assert_eq!(meta.id, "a1");
        assert_eq!(meta.kind, 7);
        assert_eq!(meta.flags, 4);
        assert_eq!(meta.name, "tex");
    }
}
