//! Fuzz target for the typed object decoder and nested witness extraction.
//!
//! Usage:
//!   cargo fuzz run fuzz_typed_object

#![no_main]

use codec::TypedObject;
use libfuzzer_sys::fuzz_target;
use witness::{extract_nested, verify_bound_witness};

fuzz_target!(|data: &[u8]| {
    let Ok(object) = codec::decode(data) else {
        return;
    };

    // Anything that decodes must encode and decode back to itself.
    if let Ok(bytes) = codec::encode(&object) {
        let again = codec::decode(&bytes).expect("re-encoded object decodes");
        assert_eq!(again, object);
    }

    if let TypedObject::BoundWitness(witness) = &object {
        let _ = verify_bound_witness(witness);
        let _ = extract_nested(witness);
        let stripped = witness.without_unsigned();
        assert_eq!(stripped.party_count(), witness.party_count());
    }
});
