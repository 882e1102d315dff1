//! Self-describing typed object encoding.
//!
//! Every object on the wire is `major(1) minor(1) body_len(4, big-endian)
//! body`. The tag alone decides how the body is read; tags missing from
//! [`tag::REGISTRY`] decode into [`TypedObject::Opaque`] and re-encode
//! byte for byte, so nodes can relay object kinds they do not understand.

mod object;
pub mod tag;

use thiserror::Error;

pub use object::{
    BoundWitness, HASH_LEN, KeySet, PUBLIC_KEY_LEN, Payload, SIGNATURE_LEN, SignatureSet,
    TypedObject,
};
pub use tag::{ObjectKind, REGISTRY, Tag};

/// Bytes used by the tag prefix.
pub const TAG_LEN: usize = 2;
/// Bytes used by the big-endian body length.
pub const SIZE_LEN: usize = 4;
/// Deepest nesting accepted from the wire.
pub const MAX_DECODE_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated object: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("{0} trailing bytes after object")]
    TrailingBytes(usize),
    #[error("invalid body length for {kind:?}: expected {expected}, got {actual}")]
    InvalidLength {
        kind: ObjectKind,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected object {tag} in {context}")]
    UnexpectedObject { tag: Tag, context: &'static str },
    #[error("object nesting deeper than {0}")]
    DepthExceeded(usize),
    #[error("object body of {0} bytes exceeds the length field")]
    BodyTooLarge(usize),
}

/// Encode a single object.
pub fn encode(object: &TypedObject) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    encode_into(object, &mut buf)?;
    Ok(buf)
}

/// Encode a single object, appending to `buf`.
pub fn encode_into(object: &TypedObject, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    match object {
        TypedObject::BoundWitness(witness) => write_framed(object.tag(), buf, |body| {
            for key_set in &witness.key_sets {
                write_framed(ObjectKind::KeySet.tag(), body, |out| {
                    write_sequence(&key_set.0, out)
                })?;
            }
            for payload in &witness.payloads {
                write_payload(payload, body)?;
            }
            for signature_set in &witness.signature_sets {
                write_framed(ObjectKind::SignatureSet.tag(), body, |out| {
                    write_sequence(&signature_set.0, out)
                })?;
            }
            Ok(())
        }),
        TypedObject::KeySet(KeySet(items))
        | TypedObject::SignatureSet(SignatureSet(items))
        | TypedObject::BridgeBlockSet(items)
        | TypedObject::BridgeHashSet(items) => {
            write_framed(object.tag(), buf, |body| write_sequence(items, body))
        }
        TypedObject::Payload(payload) => write_payload(payload, buf),
        TypedObject::Index(index) => write_leaf(object.tag(), &index.to_be_bytes(), buf),
        TypedObject::PreviousHash(hash) | TypedObject::Hash(hash) => {
            write_leaf(object.tag(), hash, buf)
        }
        TypedObject::PublicKey(key) => write_leaf(object.tag(), key, buf),
        TypedObject::Signature(signature) => write_leaf(object.tag(), signature, buf),
        TypedObject::Rssi(rssi) => write_leaf(object.tag(), &rssi.to_be_bytes(), buf),
        TypedObject::Opaque { tag, body } => write_leaf(*tag, body, buf),
    }
}

/// Encode a list of objects back to back, without an enclosing frame.
pub fn encode_sequence(items: &[TypedObject]) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    write_sequence(items, &mut buf)?;
    Ok(buf)
}

/// Encode the signed half of a payload inside its `SignedPayload` frame,
/// appending to `buf`.
pub fn encode_signed_payload_into(payload: &Payload, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    write_framed(ObjectKind::SignedPayload.tag(), buf, |out| {
        write_sequence(&payload.signed, out)
    })
}

/// Decode exactly one object; trailing bytes are rejected.
pub fn decode(bytes: &[u8]) -> Result<TypedObject, CodecError> {
    let mut reader = Reader::new(bytes);
    let object = reader.read_object(0)?;
    if reader.remaining() != 0 {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }
    Ok(object)
}

/// Decode a back-to-back sequence of objects until the input is exhausted.
pub fn decode_sequence(bytes: &[u8]) -> Result<Vec<TypedObject>, CodecError> {
    read_sequence(bytes, 0)
}

fn write_framed<F>(tag: Tag, buf: &mut Vec<u8>, body: F) -> Result<(), CodecError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<(), CodecError>,
{
    buf.extend_from_slice(&tag.to_bytes());
    let len_at = buf.len();
    buf.extend_from_slice(&[0u8; SIZE_LEN]);
    body(buf)?;
    let body_len = buf.len() - len_at - SIZE_LEN;
    let encoded = u32::try_from(body_len).map_err(|_| CodecError::BodyTooLarge(body_len))?;
    buf[len_at..len_at + SIZE_LEN].copy_from_slice(&encoded.to_be_bytes());
    Ok(())
}

fn write_leaf(tag: Tag, body: &[u8], buf: &mut Vec<u8>) -> Result<(), CodecError> {
    write_framed(tag, buf, |out| {
        out.extend_from_slice(body);
        Ok(())
    })
}

fn write_sequence(items: &[TypedObject], buf: &mut Vec<u8>) -> Result<(), CodecError> {
    for item in items {
        encode_into(item, buf)?;
    }
    Ok(())
}

fn write_payload(payload: &Payload, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    write_framed(ObjectKind::Payload.tag(), buf, |body| {
        encode_signed_payload_into(payload, body)?;
        write_framed(ObjectKind::UnsignedPayload.tag(), body, |out| {
            write_sequence(&payload.unsigned, out)
        })
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated {
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_frame(&mut self) -> Result<(Tag, &'a [u8]), CodecError> {
        let tag = self.take(TAG_LEN)?;
        let tag = Tag::new(tag[0], tag[1]);
        let len = self.take(SIZE_LEN)?;
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let body = self.take(len)?;
        Ok((tag, body))
    }

    fn read_object(&mut self, depth: usize) -> Result<TypedObject, CodecError> {
        if depth > MAX_DECODE_DEPTH {
            return Err(CodecError::DepthExceeded(MAX_DECODE_DEPTH));
        }
        let (tag, body) = self.read_frame()?;
        decode_body(tag, body, depth)
    }
}

fn read_sequence(bytes: &[u8], depth: usize) -> Result<Vec<TypedObject>, CodecError> {
    let mut reader = Reader::new(bytes);
    let mut items = Vec::new();
    while reader.remaining() > 0 {
        items.push(reader.read_object(depth)?);
    }
    Ok(items)
}

fn decode_body(tag: Tag, body: &[u8], depth: usize) -> Result<TypedObject, CodecError> {
    let Some(kind) = ObjectKind::from_tag(tag) else {
        return Ok(TypedObject::Opaque {
            tag,
            body: body.to_vec(),
        });
    };
    let object = match kind {
        ObjectKind::BoundWitness => TypedObject::BoundWitness(decode_bound_witness(body, depth)?),
        ObjectKind::KeySet => TypedObject::KeySet(KeySet(read_sequence(body, depth + 1)?)),
        ObjectKind::SignatureSet => {
            TypedObject::SignatureSet(SignatureSet(read_sequence(body, depth + 1)?))
        }
        ObjectKind::Payload => TypedObject::Payload(decode_payload(body, depth)?),
        ObjectKind::SignedPayload | ObjectKind::UnsignedPayload => {
            return Err(CodecError::UnexpectedObject {
                tag,
                context: "a position outside a payload",
            });
        }
        ObjectKind::BridgeBlockSet => TypedObject::BridgeBlockSet(read_sequence(body, depth + 1)?),
        ObjectKind::BridgeHashSet => TypedObject::BridgeHashSet(read_sequence(body, depth + 1)?),
        ObjectKind::Index => TypedObject::Index(u32::from_be_bytes(fixed(kind, body)?)),
        ObjectKind::PreviousHash => TypedObject::PreviousHash(fixed(kind, body)?),
        ObjectKind::Hash => TypedObject::Hash(fixed(kind, body)?),
        ObjectKind::PublicKey => TypedObject::PublicKey(fixed(kind, body)?),
        ObjectKind::Signature => TypedObject::Signature(fixed(kind, body)?),
        ObjectKind::Rssi => TypedObject::Rssi(i8::from_be_bytes(fixed(kind, body)?)),
    };
    Ok(object)
}

fn fixed<const N: usize>(kind: ObjectKind, body: &[u8]) -> Result<[u8; N], CodecError> {
    body.try_into().map_err(|_| CodecError::InvalidLength {
        kind,
        expected: N,
        actual: body.len(),
    })
}

fn decode_bound_witness(body: &[u8], depth: usize) -> Result<BoundWitness, CodecError> {
    let mut witness = BoundWitness::default();
    for child in read_sequence(body, depth + 1)? {
        match child {
            TypedObject::KeySet(key_set) => witness.key_sets.push(key_set),
            TypedObject::Payload(payload) => witness.payloads.push(payload),
            TypedObject::SignatureSet(signatures) => witness.signature_sets.push(signatures),
            other => {
                return Err(CodecError::UnexpectedObject {
                    tag: other.tag(),
                    context: "bound witness",
                });
            }
        }
    }
    Ok(witness)
}

fn decode_payload(body: &[u8], depth: usize) -> Result<Payload, CodecError> {
    let mut reader = Reader::new(body);
    let signed = expect_frame(&mut reader, ObjectKind::SignedPayload)?;
    let unsigned = expect_frame(&mut reader, ObjectKind::UnsignedPayload)?;
    if reader.remaining() != 0 {
        return Err(CodecError::TrailingBytes(reader.remaining()));
    }
    Ok(Payload {
        signed: read_sequence(signed, depth + 2)?,
        unsigned: read_sequence(unsigned, depth + 2)?,
    })
}

fn expect_frame<'a>(reader: &mut Reader<'a>, kind: ObjectKind) -> Result<&'a [u8], CodecError> {
    let (tag, body) = reader.read_frame()?;
    if tag != kind.tag() {
        return Err(CodecError::UnexpectedObject {
            tag,
            context: "payload",
        });
    }
    Ok(body)
}
