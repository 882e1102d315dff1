//! Bound witness helpers: signing data, verification, origin heuristics and
//! extraction of bridged chains.

mod extract;
mod zigzag;

use std::fmt;

use codec::{BoundWitness, CodecError, KeySet, Payload, TypedObject};
use crypto::{CryptoError, DIGEST_LEN};
use thiserror::Error;

pub use extract::{ExtractError, ExtractLimits, extract_nested, extract_nested_with};
pub use zigzag::ZigZag;

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error("encoding error: {0}")]
    Codec(#[from] CodecError),
    #[error("party {party}: {source}")]
    Signature {
        party: usize,
        #[source]
        source: CryptoError,
    },
    #[error("party {party} has {keys} keys but {signatures} signatures")]
    KeySignatureMismatch {
        party: usize,
        keys: usize,
        signatures: usize,
    },
    #[error("bound witness is not finalized")]
    NotFinalized,
    #[error("malformed transfer: {0}")]
    MalformedTransfer(&'static str),
    #[error("party {0} does not exist")]
    UnknownParty(usize),
}

/// Content hash of an encoded bound witness. Used to link origin chains and
/// to address witnesses handed to the consensus sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WitnessHash(pub [u8; DIGEST_LEN]);

impl WitnessHash {
    pub fn of(witness: &BoundWitness) -> Result<Self, WitnessError> {
        let encoded = codec::encode(&TypedObject::BoundWitness(witness.clone()))?;
        Ok(Self(crypto::digest(&encoded)))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for WitnessHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Bytes every party signs: each party's key set followed by its framed
/// signed payload, in party order. The frames keep party boundaries fixed.
pub fn signing_data(key_sets: &[KeySet], payloads: &[Payload]) -> Result<Vec<u8>, WitnessError> {
    if key_sets.len() != payloads.len() {
        return Err(WitnessError::MalformedTransfer(
            "key set and payload counts differ",
        ));
    }
    let mut data = Vec::new();
    for (key_set, payload) in key_sets.iter().zip(payloads) {
        codec::encode_into(&TypedObject::KeySet(key_set.clone()), &mut data)?;
        codec::encode_signed_payload_into(payload, &mut data)?;
    }
    Ok(data)
}

/// Check that a bound witness is finalized and every party signed the
/// shared signing data with each of its keys.
pub fn verify_bound_witness(witness: &BoundWitness) -> Result<(), WitnessError> {
    if !witness.is_finalized() {
        return Err(WitnessError::NotFinalized);
    }
    let data = signing_data(&witness.key_sets, &witness.payloads)?;
    for party in 0..witness.party_count() {
        verify_party(witness, party, &data)?;
    }
    Ok(())
}

pub(crate) fn verify_party(
    witness: &BoundWitness,
    party: usize,
    data: &[u8],
) -> Result<(), WitnessError> {
    let key_set = witness
        .key_sets
        .get(party)
        .ok_or(WitnessError::UnknownParty(party))?;
    let signature_set = witness
        .signature_sets
        .get(party)
        .ok_or(WitnessError::UnknownParty(party))?;
    let keys: Vec<_> = key_set.public_keys().collect();
    let signatures: Vec<_> = signature_set.signatures().collect();
    if keys.is_empty() || keys.len() != signatures.len() {
        return Err(WitnessError::KeySignatureMismatch {
            party,
            keys: keys.len(),
            signatures: signatures.len(),
        });
    }
    for (key, signature) in keys.into_iter().zip(signatures) {
        crypto::verify(key, data, signature)
            .map_err(|source| WitnessError::Signature { party, source })?;
    }
    Ok(())
}

/// Origin-chain position a party attests to in its signed payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OriginHeuristics {
    pub index: u32,
    pub previous_hash: Option<WitnessHash>,
}

impl OriginHeuristics {
    pub fn signed_items(&self) -> Vec<TypedObject> {
        let mut items = vec![TypedObject::Index(self.index)];
        if let Some(previous) = self.previous_hash {
            items.push(TypedObject::PreviousHash(previous.0));
        }
        items
    }

    /// Read the heuristics back out of a signed payload.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        Some(Self {
            index: payload.index()?,
            previous_hash: payload.previous_hash().copied().map(WitnessHash),
        })
    }
}

#[cfg(test)]
mod tests {
    use codec::SignatureSet;
    use crypto::{Ed25519Signer, Signer};

    use super::*;

    fn signed_single(signer: &Ed25519Signer, index: u32) -> BoundWitness {
        let key_sets = vec![KeySet::single(signer.public_key())];
        let payloads = vec![Payload::new(
            OriginHeuristics {
                index,
                previous_hash: None,
            }
            .signed_items(),
            Vec::new(),
        )];
        let data = signing_data(&key_sets, &payloads).expect("signing data");
        BoundWitness {
            key_sets,
            payloads,
            signature_sets: vec![SignatureSet::single(signer.sign(&data))],
        }
    }

    #[test]
    fn verifies_single_party_witness() {
        let signer = Ed25519Signer::derive(b"solo");
        verify_bound_witness(&signed_single(&signer, 0)).expect("valid witness");
    }

    #[test]
    fn unsigned_payload_is_not_covered_by_signature() {
        let signer = Ed25519Signer::derive(b"solo");
        let mut witness = signed_single(&signer, 0);
        witness.payloads[0].unsigned.push(TypedObject::Rssi(-3));
        verify_bound_witness(&witness).expect("unsigned data may change");
    }

    #[test]
    fn rejects_tampered_signed_payload() {
        let signer = Ed25519Signer::derive(b"solo");
        let mut witness = signed_single(&signer, 0);
        witness.payloads[0].signed[0] = TypedObject::Index(99);
        assert!(matches!(
            verify_bound_witness(&witness),
            Err(WitnessError::Signature { party: 0, .. })
        ));
    }

    #[test]
    fn rejects_unfinalized_witness() {
        let signer = Ed25519Signer::derive(b"solo");
        let mut witness = signed_single(&signer, 0);
        witness.signature_sets.clear();
        assert!(matches!(
            verify_bound_witness(&witness),
            Err(WitnessError::NotFinalized)
        ));
        assert!(matches!(
            verify_bound_witness(&BoundWitness::default()),
            Err(WitnessError::NotFinalized)
        ));
    }

    #[test]
    fn party_boundaries_are_covered_by_signatures() {
        let first = Ed25519Signer::derive(b"first");
        let second = Ed25519Signer::derive(b"second");
        let key_sets = vec![
            KeySet::single(first.public_key()),
            KeySet::single(second.public_key()),
        ];
        let payloads = vec![
            Payload::new(vec![TypedObject::Index(1)], Vec::new()),
            Payload::new(vec![TypedObject::Index(2)], Vec::new()),
        ];
        let data = signing_data(&key_sets, &payloads).expect("signing data");
        let honest = BoundWitness {
            key_sets: key_sets.clone(),
            payloads,
            signature_sets: vec![
                SignatureSet::single(first.sign(&data)),
                SignatureSet::single(second.sign(&data)),
            ],
        };
        verify_bound_witness(&honest).expect("honest witness");

        // Fold the second party into the first party's signed items.
        let folded = BoundWitness {
            key_sets: vec![key_sets[0].clone()],
            payloads: vec![Payload::new(
                vec![
                    TypedObject::Index(1),
                    TypedObject::KeySet(key_sets[1].clone()),
                    TypedObject::Index(2),
                ],
                Vec::new(),
            )],
            signature_sets: vec![honest.signature_sets[0].clone()],
        };
        assert!(matches!(
            verify_bound_witness(&folded),
            Err(WitnessError::Signature { party: 0, .. })
        ));
    }

    #[test]
    fn heuristics_round_trip_through_payload() {
        let heuristics = OriginHeuristics {
            index: 12,
            previous_hash: Some(WitnessHash([4u8; 32])),
        };
        let payload = Payload::new(heuristics.signed_items(), Vec::new());
        assert_eq!(OriginHeuristics::from_payload(&payload), Some(heuristics));
    }

    #[test]
    fn hash_depends_on_content() {
        let signer = Ed25519Signer::derive(b"solo");
        let first = WitnessHash::of(&signed_single(&signer, 0)).expect("hash");
        let second = WitnessHash::of(&signed_single(&signer, 1)).expect("hash");
        assert_ne!(first, second);
        assert_eq!(first.to_string().len(), 64);
    }
}
