//! Capability catalogue: the bit mask peers exchange to agree on what they
//! will do over a connection.

use std::fmt;

use crate::types::PipeRole;

/// Width of the catalogue mask on the wire.
pub const CATALOGUE_LENGTH_IN_BYTES: usize = 4;
/// Width of the field announcing how many catalogue bytes follow.
pub const CATALOGUE_SIZE_OF_SIZE_BYTES: usize = 1;
/// Width of the length prefix in front of every payload frame.
pub const CATALOGUE_SIZE_OF_PAYLOAD_BYTES: usize = 4;

/// A single capability a node can perform with a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatalogueItem {
    BoundWitness,
    TakeOriginChain,
    GiveOriginChain,
}

impl CatalogueItem {
    pub const ALL: [CatalogueItem; 3] = [
        CatalogueItem::BoundWitness,
        CatalogueItem::TakeOriginChain,
        CatalogueItem::GiveOriginChain,
    ];

    /// Order in which an initiator tries to match its own items.
    pub const PRIORITY: [CatalogueItem; 3] = [
        CatalogueItem::GiveOriginChain,
        CatalogueItem::TakeOriginChain,
        CatalogueItem::BoundWitness,
    ];

    pub const fn bit(self) -> u32 {
        match self {
            CatalogueItem::BoundWitness => 1,
            CatalogueItem::TakeOriginChain => 2,
            CatalogueItem::GiveOriginChain => 4,
        }
    }

    /// The item the other side performs while this one runs.
    pub const fn counterpart(self) -> Self {
        match self {
            CatalogueItem::BoundWitness => CatalogueItem::BoundWitness,
            CatalogueItem::TakeOriginChain => CatalogueItem::GiveOriginChain,
            CatalogueItem::GiveOriginChain => CatalogueItem::TakeOriginChain,
        }
    }
}

impl fmt::Display for CatalogueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogueItem::BoundWitness => "BOUND_WITNESS",
            CatalogueItem::TakeOriginChain => "TAKE_ORIGIN_CHAIN",
            CatalogueItem::GiveOriginChain => "GIVE_ORIGIN_CHAIN",
        };
        f.write_str(name)
    }
}

/// Set of catalogue items, stored as the wire mask restricted to known bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CatalogueSet(u32);

impl CatalogueSet {
    const KNOWN_BITS: u32 = 0b111;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Interpret a raw mask, dropping bits that name no item.
    pub const fn from_mask(mask: u32) -> Self {
        Self(mask & Self::KNOWN_BITS)
    }

    pub const fn mask(self) -> u32 {
        self.0
    }

    pub const fn contains(self, item: CatalogueItem) -> bool {
        self.0 & item.bit() != 0
    }

    pub const fn with(self, item: CatalogueItem) -> Self {
        Self(self.0 | item.bit())
    }

    pub fn insert(&mut self, item: CatalogueItem) {
        self.0 |= item.bit();
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = CatalogueItem> {
        CatalogueItem::ALL
            .into_iter()
            .filter(move |item| self.contains(*item))
    }

    pub fn is_subset(self, other: CatalogueSet) -> bool {
        self.0 & !other.0 == 0
    }
}

impl FromIterator<CatalogueItem> for CatalogueSet {
    fn from_iter<I: IntoIterator<Item = CatalogueItem>>(iter: I) -> Self {
        Self(encode_catalogue_mask(iter))
    }
}

impl fmt::Display for CatalogueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (position, item) in self.iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        f.write_str("}")
    }
}

/// Read the catalogue from the first four bytes (big-endian). Shorter input
/// yields the empty set.
pub fn decode_catalogue_mask(bytes: &[u8]) -> CatalogueSet {
    match bytes.get(..CATALOGUE_LENGTH_IN_BYTES) {
        Some(head) => {
            let mut mask = [0u8; CATALOGUE_LENGTH_IN_BYTES];
            mask.copy_from_slice(head);
            CatalogueSet::from_mask(u32::from_be_bytes(mask))
        }
        None => CatalogueSet::empty(),
    }
}

pub fn encode_catalogue_mask<I>(items: I) -> u32
where
    I: IntoIterator<Item = CatalogueItem>,
{
    items.into_iter().fold(0, |mask, item| mask | item.bit())
}

/// Select the item this side performs given both catalogues.
///
/// The initiator walks [`CatalogueItem::PRIORITY`] and takes the first item
/// it advertises whose counterpart the responder advertises. The responder
/// performs the counterpart, so both sides arrive at the same pair.
pub fn select_item(
    role: PipeRole,
    local: CatalogueSet,
    remote: CatalogueSet,
) -> Option<CatalogueItem> {
    let (initiator, responder) = match role {
        PipeRole::Initiator => (local, remote),
        PipeRole::Responder => (remote, local),
    };
    let item = CatalogueItem::PRIORITY
        .into_iter()
        .find(|item| initiator.contains(*item) && responder.contains(item.counterpart()))?;
    Some(match role {
        PipeRole::Initiator => item,
        PipeRole::Responder => item.counterpart(),
    })
}

/// What a node is able to do with peers in its current state.
pub trait ProcedureCatalogue: Send + Sync {
    fn can_do(&self, item: CatalogueItem) -> bool;

    fn current_catalogue(&self) -> CatalogueSet;

    fn choose(&self, role: PipeRole, remote: CatalogueSet) -> Option<CatalogueItem> {
        select_item(role, self.current_catalogue(), remote)
    }
}

/// Fixed catalogue, mostly useful for tools and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StaticCatalogue(pub CatalogueSet);

impl ProcedureCatalogue for StaticCatalogue {
    fn can_do(&self, item: CatalogueItem) -> bool {
        self.0.contains(item)
    }

    fn current_catalogue(&self) -> CatalogueSet {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subsets() -> impl Iterator<Item = CatalogueSet> {
        (0u32..8).map(CatalogueSet::from_mask)
    }

    #[test]
    fn every_subset_round_trips() {
        for set in subsets() {
            let mask = encode_catalogue_mask(set.iter());
            assert_eq!(mask, set.mask());
            assert_eq!(decode_catalogue_mask(&mask.to_be_bytes()), set);
        }
    }

    #[test]
    fn short_input_is_empty() {
        assert!(decode_catalogue_mask(&[]).is_empty());
        assert!(decode_catalogue_mask(&[0, 0, 7]).is_empty());
    }

    #[test]
    fn unknown_bits_are_ignored() {
        let set = decode_catalogue_mask(&0b1001u32.to_be_bytes());
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![CatalogueItem::BoundWitness]);
        assert!(decode_catalogue_mask(&u32::MAX.to_be_bytes()).len() == 3);
    }

    #[test]
    fn only_first_four_bytes_are_read() {
        let set = decode_catalogue_mask(&[0, 0, 0, 4, 0xff]);
        assert_eq!(set, CatalogueSet::empty().with(CatalogueItem::GiveOriginChain));
    }

    #[test]
    fn duplicates_are_idempotent() {
        let mask = encode_catalogue_mask([
            CatalogueItem::TakeOriginChain,
            CatalogueItem::TakeOriginChain,
            CatalogueItem::BoundWitness,
        ]);
        assert_eq!(mask, 3);
    }

    #[test]
    fn counterparts_are_symmetric() {
        for item in CatalogueItem::ALL {
            assert_eq!(item.counterpart().counterpart(), item);
        }
    }

    #[test]
    fn both_sides_agree_on_complementary_items() {
        let sentinel: CatalogueSet = [CatalogueItem::BoundWitness, CatalogueItem::GiveOriginChain]
            .into_iter()
            .collect();
        let archivist: CatalogueSet = [CatalogueItem::BoundWitness, CatalogueItem::TakeOriginChain]
            .into_iter()
            .collect();

        assert_eq!(
            select_item(PipeRole::Initiator, sentinel, archivist),
            Some(CatalogueItem::GiveOriginChain)
        );
        assert_eq!(
            select_item(PipeRole::Responder, archivist, sentinel),
            Some(CatalogueItem::TakeOriginChain)
        );

        assert_eq!(
            select_item(PipeRole::Initiator, archivist, sentinel),
            Some(CatalogueItem::TakeOriginChain)
        );
        assert_eq!(
            select_item(PipeRole::Responder, sentinel, archivist),
            Some(CatalogueItem::GiveOriginChain)
        );
    }

    #[test]
    fn falls_back_to_bound_witness_and_then_nothing() {
        let bw = CatalogueSet::empty().with(CatalogueItem::BoundWitness);
        let take = CatalogueSet::empty().with(CatalogueItem::TakeOriginChain);
        let both = bw.with(CatalogueItem::TakeOriginChain);

        assert_eq!(
            select_item(PipeRole::Initiator, both, both),
            Some(CatalogueItem::BoundWitness)
        );
        assert_eq!(select_item(PipeRole::Initiator, take, take), None);
        assert_eq!(select_item(PipeRole::Initiator, bw, CatalogueSet::empty()), None);
    }

    #[test]
    fn static_catalogue_is_consistent() {
        let catalogue = StaticCatalogue(CatalogueSet::from_mask(5));
        for item in catalogue.current_catalogue().iter() {
            assert!(catalogue.can_do(item));
        }
        assert!(!catalogue.can_do(CatalogueItem::TakeOriginChain));
        assert_eq!(
            catalogue.choose(PipeRole::Responder, CatalogueSet::from_mask(2)),
            Some(CatalogueItem::GiveOriginChain)
        );
    }

    #[test]
    fn display_lists_items() {
        assert_eq!(
            CatalogueSet::from_mask(3).to_string(),
            "{BOUND_WITNESS, TAKE_ORIGIN_CHAIN}"
        );
        assert_eq!(CatalogueSet::empty().to_string(), "{}");
    }
}
