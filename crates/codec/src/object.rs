use crate::tag::{ObjectKind, Tag};

pub const HASH_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// A decoded typed object.
///
/// Known kinds get a structured variant; anything else is kept as
/// `Opaque` so it can be relayed without loss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypedObject {
    BoundWitness(BoundWitness),
    KeySet(KeySet),
    SignatureSet(SignatureSet),
    Payload(Payload),
    BridgeBlockSet(Vec<TypedObject>),
    BridgeHashSet(Vec<TypedObject>),
    Index(u32),
    PreviousHash([u8; HASH_LEN]),
    Hash([u8; HASH_LEN]),
    PublicKey([u8; PUBLIC_KEY_LEN]),
    Signature([u8; SIGNATURE_LEN]),
    Rssi(i8),
    Opaque { tag: Tag, body: Vec<u8> },
}

impl TypedObject {
    pub fn tag(&self) -> Tag {
        match self {
            TypedObject::BoundWitness(_) => ObjectKind::BoundWitness.tag(),
            TypedObject::KeySet(_) => ObjectKind::KeySet.tag(),
            TypedObject::SignatureSet(_) => ObjectKind::SignatureSet.tag(),
            TypedObject::Payload(_) => ObjectKind::Payload.tag(),
            TypedObject::BridgeBlockSet(_) => ObjectKind::BridgeBlockSet.tag(),
            TypedObject::BridgeHashSet(_) => ObjectKind::BridgeHashSet.tag(),
            TypedObject::Index(_) => ObjectKind::Index.tag(),
            TypedObject::PreviousHash(_) => ObjectKind::PreviousHash.tag(),
            TypedObject::Hash(_) => ObjectKind::Hash.tag(),
            TypedObject::PublicKey(_) => ObjectKind::PublicKey.tag(),
            TypedObject::Signature(_) => ObjectKind::Signature.tag(),
            TypedObject::Rssi(_) => ObjectKind::Rssi.tag(),
            TypedObject::Opaque { tag, .. } => *tag,
        }
    }

    /// Registry kind of this object, `None` for opaque objects.
    pub fn kind(&self) -> Option<ObjectKind> {
        match self {
            TypedObject::Opaque { .. } => None,
            other => ObjectKind::from_tag(other.tag()),
        }
    }

    pub fn as_bound_witness(&self) -> Option<&BoundWitness> {
        match self {
            TypedObject::BoundWitness(witness) => Some(witness),
            _ => None,
        }
    }
}

impl From<BoundWitness> for TypedObject {
    fn from(witness: BoundWitness) -> Self {
        TypedObject::BoundWitness(witness)
    }
}

/// Public keys contributed by one party.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySet(pub Vec<TypedObject>);

impl KeySet {
    pub fn single(public_key: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(vec![TypedObject::PublicKey(public_key)])
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &[u8; PUBLIC_KEY_LEN]> {
        self.0.iter().filter_map(|item| match item {
            TypedObject::PublicKey(key) => Some(key),
            _ => None,
        })
    }
}

/// Signatures contributed by one party, positionally matching its key set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignatureSet(pub Vec<TypedObject>);

impl SignatureSet {
    pub fn single(signature: [u8; SIGNATURE_LEN]) -> Self {
        Self(vec![TypedObject::Signature(signature)])
    }

    pub fn signatures(&self) -> impl Iterator<Item = &[u8; SIGNATURE_LEN]> {
        self.0.iter().filter_map(|item| match item {
            TypedObject::Signature(signature) => Some(signature),
            _ => None,
        })
    }
}

/// One party's payload. Only `signed` is covered by signatures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub signed: Vec<TypedObject>,
    pub unsigned: Vec<TypedObject>,
}

impl Payload {
    pub fn new(signed: Vec<TypedObject>, unsigned: Vec<TypedObject>) -> Self {
        Self { signed, unsigned }
    }

    pub fn index(&self) -> Option<u32> {
        self.signed.iter().find_map(|item| match item {
            TypedObject::Index(index) => Some(*index),
            _ => None,
        })
    }

    pub fn previous_hash(&self) -> Option<&[u8; HASH_LEN]> {
        self.signed.iter().find_map(|item| match item {
            TypedObject::PreviousHash(hash) => Some(hash),
            _ => None,
        })
    }
}

/// Jointly signed attestation. Party `i` owns `key_sets[i]`, `payloads[i]`
/// and `signature_sets[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundWitness {
    pub key_sets: Vec<KeySet>,
    pub payloads: Vec<Payload>,
    pub signature_sets: Vec<SignatureSet>,
}

impl BoundWitness {
    pub fn party_count(&self) -> usize {
        self.payloads.len()
    }

    /// True when every party has contributed keys, a payload and signatures.
    pub fn is_finalized(&self) -> bool {
        !self.payloads.is_empty()
            && self.key_sets.len() == self.payloads.len()
            && self.signature_sets.len() == self.payloads.len()
            && self.signature_sets.iter().all(|set| !set.0.is_empty())
    }

    /// Party index whose key set holds `public_key`.
    pub fn party_of(&self, public_key: &[u8; PUBLIC_KEY_LEN]) -> Option<usize> {
        self.key_sets
            .iter()
            .position(|set| set.public_keys().any(|key| key == public_key))
    }

    /// Copy with every unsigned payload emptied. Signatures stay valid.
    pub fn without_unsigned(&self) -> BoundWitness {
        BoundWitness {
            key_sets: self.key_sets.clone(),
            payloads: self
                .payloads
                .iter()
                .map(|payload| Payload::new(payload.signed.clone(), Vec::new()))
                .collect(),
            signature_sets: self.signature_sets.clone(),
        }
    }
}
