//! Fuzz target for negotiation frames and catalogue masks.
//!
//! Usage:
//!   cargo fuzz run fuzz_negotiation_frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use p2p::{CatalogueItem, NegotiationFrame, PipeRole, decode_catalogue_mask, select_item};

fuzz_target!(|data: &[u8]| {
    let frame = NegotiationFrame::decode(data);
    let decoded = NegotiationFrame::decode(&frame.encode());
    assert_eq!(decoded.catalogue, frame.catalogue);

    let remote = decode_catalogue_mask(data);
    let local = decode_catalogue_mask(data.get(4..).unwrap_or_default());
    if let Some(item) = select_item(PipeRole::Initiator, local, remote) {
        let answer = select_item(PipeRole::Responder, remote, local);
        assert_eq!(answer, Some(item.counterpart()));
        assert!(CatalogueItem::ALL.contains(&item));
    }
});
