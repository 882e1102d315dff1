//! Flattening of bridged origin chains.
//!
//! A bridge embeds previously assembled bound witnesses inside the unsigned
//! payload of a new one, and those may embed further witnesses in turn.
//! Nested content comes from remote peers, so the walk is bounded both in
//! depth and in the number of witnesses it will return.

use codec::{BoundWitness, TypedObject};
use thiserror::Error;

/// Bounds applied to a single extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Deepest nesting level visited; direct children of the root are level 1.
    pub max_depth: usize,
    /// Most witnesses a single call may return.
    pub max_witnesses: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_witnesses: 65_536,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("nested bound witnesses exceed depth {max_depth} or count {max_witnesses}")]
    RecursionLimitExceeded {
        max_depth: usize,
        max_witnesses: usize,
    },
}

/// Extract nested bound witnesses with the default limits.
pub fn extract_nested(root: &BoundWitness) -> Result<Vec<&BoundWitness>, ExtractError> {
    extract_nested_with(root, ExtractLimits::default())
}

/// Collect every bound witness bridged inside `root`, depth first, parents
/// before their descendants. `root` itself is not part of the result.
pub fn extract_nested_with(
    root: &BoundWitness,
    limits: ExtractLimits,
) -> Result<Vec<&BoundWitness>, ExtractError> {
    let mut found = Vec::new();
    walk(root, 0, limits, &mut found)?;
    Ok(found)
}

fn walk<'a>(
    witness: &'a BoundWitness,
    depth: usize,
    limits: ExtractLimits,
    found: &mut Vec<&'a BoundWitness>,
) -> Result<(), ExtractError> {
    for payload in &witness.payloads {
        for item in &payload.unsigned {
            let TypedObject::BridgeBlockSet(bridged) = item else {
                continue;
            };
            for element in bridged {
                let Some(nested) = element.as_bound_witness() else {
                    continue;
                };
                if depth + 1 > limits.max_depth || found.len() >= limits.max_witnesses {
                    return Err(ExtractError::RecursionLimitExceeded {
                        max_depth: limits.max_depth,
                        max_witnesses: limits.max_witnesses,
                    });
                }
                found.push(nested);
                walk(nested, depth + 1, limits, found)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use codec::{KeySet, Payload, Tag};

    use super::*;

    fn witness(index: u32, bridged: Vec<BoundWitness>) -> BoundWitness {
        let mut unsigned = Vec::new();
        if !bridged.is_empty() {
            unsigned.push(TypedObject::BridgeBlockSet(
                bridged.into_iter().map(TypedObject::from).collect(),
            ));
        }
        BoundWitness {
            key_sets: vec![KeySet::single([index as u8; 32])],
            payloads: vec![Payload::new(vec![TypedObject::Index(index)], unsigned)],
            signature_sets: Vec::new(),
        }
    }

    fn indexes(found: &[&BoundWitness]) -> Vec<u32> {
        found
            .iter()
            .map(|witness| witness.payloads[0].index().expect("index"))
            .collect()
    }

    #[test]
    fn walks_depth_first_with_parents_first() {
        let d = witness(4, vec![]);
        let b = witness(2, vec![d]);
        let c = witness(3, vec![]);
        let a = witness(1, vec![b, c]);

        let found = extract_nested(&a).expect("extract");
        assert_eq!(indexes(&found), vec![2, 4, 3]);
    }

    #[test]
    fn extraction_is_repeatable() {
        let a = witness(1, vec![witness(2, vec![witness(3, vec![])]), witness(4, vec![])]);
        let first = extract_nested(&a).expect("first");
        let second = extract_nested(&a).expect("second");
        assert_eq!(first, second);
        assert_eq!(indexes(&first), vec![2, 3, 4]);
    }

    #[test]
    fn plain_witness_has_no_nested_content() {
        let mut a = witness(1, vec![]);
        a.payloads[0].unsigned.push(TypedObject::Rssi(-10));
        assert!(extract_nested(&a).expect("extract").is_empty());
    }

    #[test]
    fn ignores_non_bridge_items_and_non_witness_elements() {
        let mut a = witness(1, vec![witness(2, vec![])]);
        a.payloads[0].unsigned.push(TypedObject::BridgeHashSet(vec![
            witness(9, vec![]).into(),
        ]));
        a.payloads[0].unsigned.push(TypedObject::BridgeBlockSet(vec![
            TypedObject::Index(77),
            TypedObject::Opaque {
                tag: Tag::new(0x70, 0x01),
                body: vec![1],
            },
            witness(3, vec![]).into(),
        ]));
        let found = extract_nested(&a).expect("extract");
        assert_eq!(indexes(&found), vec![2, 3]);
    }

    #[test]
    fn signed_payload_bridges_are_not_followed() {
        let mut a = witness(1, vec![]);
        a.payloads[0]
            .signed
            .push(TypedObject::BridgeBlockSet(vec![witness(2, vec![]).into()]));
        assert!(extract_nested(&a).expect("extract").is_empty());
    }

    #[test]
    fn visits_every_party_payload_in_order() {
        let mut a = witness(1, vec![witness(2, vec![])]);
        a.payloads.push(Payload::new(
            vec![TypedObject::Index(10)],
            vec![TypedObject::BridgeBlockSet(vec![witness(3, vec![]).into()])],
        ));
        let found = extract_nested(&a).expect("extract");
        assert_eq!(indexes(&found), vec![2, 3]);
    }

    #[test]
    fn self_nesting_beyond_depth_limit_fails_closed() {
        let limits = ExtractLimits::default();
        let mut chain = witness(7, vec![]);
        for _ in 0..=limits.max_depth {
            chain = witness(7, vec![chain]);
        }
        assert_eq!(
            extract_nested(&chain),
            Err(ExtractError::RecursionLimitExceeded {
                max_depth: limits.max_depth,
                max_witnesses: limits.max_witnesses,
            })
        );
    }

    #[test]
    fn nesting_at_depth_limit_is_accepted() {
        let limits = ExtractLimits {
            max_depth: 3,
            max_witnesses: 100,
        };
        let chain = witness(1, vec![witness(2, vec![witness(3, vec![witness(4, vec![])])])]);
        let found = extract_nested_with(&chain, limits).expect("extract");
        assert_eq!(indexes(&found), vec![2, 3, 4]);
    }

    #[test]
    fn witness_budget_is_enforced() {
        let limits = ExtractLimits {
            max_depth: 4,
            max_witnesses: 2,
        };
        let wide = witness(1, vec![witness(2, vec![]), witness(3, vec![]), witness(4, vec![])]);
        assert!(matches!(
            extract_nested_with(&wide, limits),
            Err(ExtractError::RecursionLimitExceeded { .. })
        ));
    }
}
