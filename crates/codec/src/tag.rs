use std::fmt;

/// Two byte identifier that prefixes every typed object on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub major: u8,
    pub minor: u8,
}

impl Tag {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.major, self.minor]
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}", self.major, self.minor)
    }
}

/// Object kinds this node knows how to interpret.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    BoundWitness,
    KeySet,
    SignatureSet,
    Payload,
    SignedPayload,
    UnsignedPayload,
    BridgeBlockSet,
    BridgeHashSet,
    Index,
    PreviousHash,
    Hash,
    PublicKey,
    Signature,
    Rssi,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 14] = [
        ObjectKind::BoundWitness,
        ObjectKind::KeySet,
        ObjectKind::SignatureSet,
        ObjectKind::Payload,
        ObjectKind::SignedPayload,
        ObjectKind::UnsignedPayload,
        ObjectKind::BridgeBlockSet,
        ObjectKind::BridgeHashSet,
        ObjectKind::Index,
        ObjectKind::PreviousHash,
        ObjectKind::Hash,
        ObjectKind::PublicKey,
        ObjectKind::Signature,
        ObjectKind::Rssi,
    ];

    pub const fn tag(self) -> Tag {
        match self {
            ObjectKind::BoundWitness => Tag::new(0x02, 0x01),
            ObjectKind::KeySet => Tag::new(0x02, 0x02),
            ObjectKind::SignatureSet => Tag::new(0x02, 0x03),
            ObjectKind::Payload => Tag::new(0x02, 0x04),
            ObjectKind::SignedPayload => Tag::new(0x02, 0x05),
            ObjectKind::UnsignedPayload => Tag::new(0x02, 0x06),
            ObjectKind::BridgeBlockSet => Tag::new(0x02, 0x0a),
            ObjectKind::BridgeHashSet => Tag::new(0x02, 0x0b),
            ObjectKind::Index => Tag::new(0x03, 0x05),
            ObjectKind::PreviousHash => Tag::new(0x03, 0x06),
            ObjectKind::Hash => Tag::new(0x03, 0x07),
            ObjectKind::PublicKey => Tag::new(0x04, 0x01),
            ObjectKind::Signature => Tag::new(0x05, 0x01),
            ObjectKind::Rssi => Tag::new(0x08, 0x01),
        }
    }

    /// Look a tag up in the registry. Unknown tags yield `None` and are
    /// carried as opaque objects by the decoder.
    pub fn from_tag(tag: Tag) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(known, _)| *known == tag)
            .map(|(_, kind)| *kind)
    }

    /// Body length for fixed-size kinds.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ObjectKind::Index => Some(4),
            ObjectKind::PreviousHash | ObjectKind::Hash => Some(32),
            ObjectKind::PublicKey => Some(32),
            ObjectKind::Signature => Some(64),
            ObjectKind::Rssi => Some(1),
            _ => None,
        }
    }
}

/// Tag registry, built from [`ObjectKind::tag`] over [`ObjectKind::ALL`].
pub const REGISTRY: [(Tag, ObjectKind); ObjectKind::ALL.len()] = registry();

const fn registry() -> [(Tag, ObjectKind); ObjectKind::ALL.len()] {
    let mut table = [(Tag::new(0, 0), ObjectKind::BoundWitness); ObjectKind::ALL.len()];
    let mut i = 0;
    while i < table.len() {
        let kind = ObjectKind::ALL[i];
        table[i] = (kind.tag(), kind);
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn registry_tags_are_unique_and_consistent() {
        let mut seen = HashSet::new();
        for (tag, kind) in REGISTRY {
            assert!(seen.insert(tag), "duplicate tag {tag}");
            assert_eq!(kind.tag(), tag);
            assert_eq!(ObjectKind::from_tag(tag), Some(kind));
        }
    }

    #[test]
    fn every_kind_is_registered_once() {
        let kinds: HashSet<ObjectKind> = ObjectKind::ALL.into_iter().collect();
        assert_eq!(kinds.len(), ObjectKind::ALL.len());
        assert_eq!(REGISTRY.len(), ObjectKind::ALL.len());
        assert_eq!(
            ObjectKind::from_tag(Tag::new(0x02, 0x0a)),
            Some(ObjectKind::BridgeBlockSet)
        );
    }

    #[test]
    fn unknown_tag_is_not_registered() {
        assert_eq!(ObjectKind::from_tag(Tag::new(0x7f, 0x7f)), None);
    }
}
