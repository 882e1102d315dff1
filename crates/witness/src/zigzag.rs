//! Party-by-party assembly of a bound witness.
//!
//! Two nodes build one witness across three transfers. Each transfer is a
//! partial [`BoundWitness`]: a fragment carrying new parties (keys and
//! payloads, optionally already signed) or only signatures for parties the
//! receiver already knows about.

use codec::{BoundWitness, KeySet, Payload, SignatureSet};
use crypto::Signer;

use crate::{WitnessError, signing_data, verify_bound_witness, verify_party};

#[derive(Clone, Debug)]
struct PartyEntry {
    key_set: KeySet,
    payload: Payload,
    signatures: Option<SignatureSet>,
}

/// Accumulates parties and signatures until the witness is complete.
#[derive(Clone, Debug, Default)]
pub struct ZigZag {
    parties: Vec<PartyEntry>,
}

impl ZigZag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn party_count(&self) -> usize {
        self.parties.len()
    }

    /// Append the local party and return its index.
    pub fn add_party(&mut self, signer: &dyn Signer, payload: Payload) -> usize {
        self.parties.push(PartyEntry {
            key_set: KeySet::single(signer.public_key()),
            payload,
            signatures: None,
        });
        self.parties.len() - 1
    }

    /// Sign the data of every party known so far on behalf of `party`.
    pub fn sign(&mut self, party: usize, signer: &dyn Signer) -> Result<(), WitnessError> {
        let data = self.signing_data()?;
        let entry = self
            .parties
            .get_mut(party)
            .ok_or(WitnessError::UnknownParty(party))?;
        entry.signatures = Some(SignatureSet::single(signer.sign(&data)));
        Ok(())
    }

    /// Merge a fragment received from the other side.
    ///
    /// A fragment with parties appends them; its signature sets, if any,
    /// belong to those new parties. A fragment with only signature sets
    /// fills the earliest parties that are still unsigned.
    pub fn receive(&mut self, fragment: BoundWitness) -> Result<(), WitnessError> {
        if fragment.key_sets.len() != fragment.payloads.len() {
            return Err(WitnessError::MalformedTransfer(
                "key set and payload counts differ",
            ));
        }
        if fragment.payloads.is_empty() {
            return self.fill_signatures(fragment.signature_sets);
        }
        let added = fragment.payloads.len();
        if !fragment.signature_sets.is_empty() && fragment.signature_sets.len() != added {
            return Err(WitnessError::MalformedTransfer(
                "signature sets do not match new parties",
            ));
        }
        let mut signatures = fragment.signature_sets.into_iter();
        for (key_set, payload) in fragment.key_sets.into_iter().zip(fragment.payloads) {
            self.parties.push(PartyEntry {
                key_set,
                payload,
                signatures: signatures.next(),
            });
        }
        Ok(())
    }

    fn fill_signatures(&mut self, sets: Vec<SignatureSet>) -> Result<(), WitnessError> {
        if sets.is_empty() {
            return Err(WitnessError::MalformedTransfer("empty transfer"));
        }
        let mut sets = sets.into_iter();
        for entry in self.parties.iter_mut().filter(|entry| entry.signatures.is_none()) {
            match sets.next() {
                Some(set) => entry.signatures = Some(set),
                None => break,
            }
        }
        if sets.next().is_some() {
            return Err(WitnessError::MalformedTransfer(
                "more signature sets than unsigned parties",
            ));
        }
        Ok(())
    }

    /// Fragment carrying parties `from..` with whatever signatures they have.
    pub fn parties_from(&self, from: usize) -> BoundWitness {
        let entries = self.parties.get(from..).unwrap_or_default();
        BoundWitness {
            key_sets: entries.iter().map(|entry| entry.key_set.clone()).collect(),
            payloads: entries.iter().map(|entry| entry.payload.clone()).collect(),
            signature_sets: entries
                .iter()
                .filter_map(|entry| entry.signatures.clone())
                .collect(),
        }
    }

    /// Fragment carrying only the signature set of `party`.
    pub fn signature_of(&self, party: usize) -> Result<BoundWitness, WitnessError> {
        let entry = self
            .parties
            .get(party)
            .ok_or(WitnessError::UnknownParty(party))?;
        let signatures = entry
            .signatures
            .clone()
            .ok_or(WitnessError::MalformedTransfer("party has not signed"))?;
        Ok(BoundWitness {
            signature_sets: vec![signatures],
            ..BoundWitness::default()
        })
    }

    /// Verify the signatures of one party against the current signing data.
    pub fn verify_party(&self, party: usize) -> Result<(), WitnessError> {
        let witness = self.snapshot();
        let data = signing_data(&witness.key_sets, &witness.payloads)?;
        verify_party(&witness, party, &data)
    }

    /// Produce the finished witness once every party has signed.
    pub fn finish(self) -> Result<BoundWitness, WitnessError> {
        if self.parties.iter().any(|entry| entry.signatures.is_none()) {
            return Err(WitnessError::NotFinalized);
        }
        let witness = self.snapshot();
        verify_bound_witness(&witness)?;
        Ok(witness)
    }

    fn signing_data(&self) -> Result<Vec<u8>, WitnessError> {
        let key_sets: Vec<_> = self.parties.iter().map(|entry| entry.key_set.clone()).collect();
        let payloads: Vec<_> = self.parties.iter().map(|entry| entry.payload.clone()).collect();
        signing_data(&key_sets, &payloads)
    }

    fn snapshot(&self) -> BoundWitness {
        BoundWitness {
            key_sets: self.parties.iter().map(|entry| entry.key_set.clone()).collect(),
            payloads: self.parties.iter().map(|entry| entry.payload.clone()).collect(),
            signature_sets: self
                .parties
                .iter()
                .map(|entry| entry.signatures.clone().unwrap_or_default())
                .collect(),
        }
    }
}
