//! Descriptor blob parsing.
//!
//! A blob is a sequence of descriptors, each `tag: u8` + `id: uuid` +
//! tag-specific fields. Container descriptors reference their children
//! by u16 position into the descriptors already decoded in the same
//! blob. Every decoded codec is registered; the blob's last descriptor
//! is the root.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::proto::PacketReader;

use super::{Codec, CodecRegistry, ShapeField};

const TAG_SET: u8 = 0;
const TAG_OBJECT_SHAPE: u8 = 1;
const TAG_BASE_SCALAR: u8 = 2;
const TAG_TUPLE: u8 = 3;
const TAG_NAMED_TUPLE: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_ENUM: u8 = 6;
const TAG_SCALAR: u8 = 7;

/// Build (or fetch from cache) the codec for `root_id` from a
/// descriptor blob, registering every intermediate codec along the way.
pub fn build_codec(registry: &CodecRegistry, root_id: Uuid, blob: Bytes) -> Result<Arc<Codec>> {
    if let Some(cached) = registry.get(&root_id) {
        return Ok(cached);
    }

    match parse_blob(registry, blob)? {
        Some(root) if root.id() == root_id => Ok(root),
        Some(root) => Err(Error::Protocol(format!(
            "descriptor blob root {} does not match expected {root_id}",
            root.id()
        ))),
        None => {
            if root_id.is_nil() {
                registry
                    .get(&Uuid::nil())
                    .ok_or_else(|| Error::Protocol("null codec missing from registry".into()))
            } else {
                Err(Error::Protocol(format!(
                    "empty descriptor blob for {root_id}"
                )))
            }
        }
    }
}

/// Build the codec for a blob whose root id is not known up front
/// (descriptor-prefixed values such as `system_config`).
pub fn build_codec_blob(registry: &CodecRegistry, blob: Bytes) -> Result<Arc<Codec>> {
    parse_blob(registry, blob)?
        .ok_or_else(|| Error::Protocol("empty descriptor blob".into()))
}

fn parse_blob(registry: &CodecRegistry, blob: Bytes) -> Result<Option<Arc<Codec>>> {
    let mut r = PacketReader::new(blob);
    let mut decoded: Vec<Arc<Codec>> = Vec::new();

    while !r.is_empty() {
        let tag = r.get_u8()?;
        let id = r.get_uuid()?;

        let codec = match tag {
            TAG_SET => {
                let element = resolve(&decoded, r.get_u16()?)?;
                Arc::new(Codec::Set { id, element })
            }
            TAG_OBJECT_SHAPE => {
                let n = r.get_u16()? as usize;
                let mut fields = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = r.get_str()?;
                    let flags = r.get_u8()?;
                    let codec = resolve(&decoded, r.get_u16()?)?;
                    fields.push(ShapeField { name, flags, codec });
                }
                Arc::new(Codec::Object { id, fields })
            }
            TAG_BASE_SCALAR => {
                // The id itself names the scalar; it must be one of the
                // seeded well-known codecs.
                registry.get(&id).ok_or_else(|| {
                    Error::Protocol(format!("unknown base scalar descriptor: {id}"))
                })?
            }
            TAG_TUPLE => {
                let n = r.get_u16()? as usize;
                let mut fields = Vec::with_capacity(n);
                for _ in 0..n {
                    fields.push(resolve(&decoded, r.get_u16()?)?);
                }
                Arc::new(Codec::Tuple { id, fields })
            }
            TAG_NAMED_TUPLE => {
                let n = r.get_u16()? as usize;
                let mut fields = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = r.get_str()?;
                    fields.push((name, resolve(&decoded, r.get_u16()?)?));
                }
                Arc::new(Codec::NamedTuple { id, fields })
            }
            TAG_ARRAY => {
                let element = resolve(&decoded, r.get_u16()?)?;
                let ndims = r.get_u16()? as usize;
                for _ in 0..ndims {
                    let _dim = r.get_i32()?;
                }
                Arc::new(Codec::Array { id, element })
            }
            TAG_ENUM => {
                let n = r.get_u16()? as usize;
                let mut members = Vec::with_capacity(n);
                for _ in 0..n {
                    members.push(r.get_str()?);
                }
                Arc::new(Codec::Enum { id, members })
            }
            TAG_SCALAR => {
                let parent = resolve(&decoded, r.get_u16()?)?;
                match &*parent {
                    Codec::Scalar { kind, .. } => Arc::new(Codec::Scalar { id, kind: *kind }),
                    Codec::Enum { members, .. } => Arc::new(Codec::Enum {
                        id,
                        members: members.clone(),
                    }),
                    other => {
                        return Err(Error::Protocol(format!(
                            "scalar descriptor {id} with non-scalar parent {}",
                            other.id()
                        )))
                    }
                }
            }
            tag if tag & 0x80 != 0 => {
                // Forwards-compatible annotation: tag, id, annotation
                // text. Carries no codec and occupies no position.
                let _annotation = r.get_str()?;
                continue;
            }
            tag => {
                return Err(Error::Protocol(format!(
                    "unknown mandatory descriptor tag: {tag:#04x}"
                )))
            }
        };

        registry.insert(codec.clone());
        decoded.push(codec);
    }

    Ok(decoded.last().cloned())
}

fn resolve(decoded: &[Arc<Codec>], pos: u16) -> Result<Arc<Codec>> {
    decoded.get(pos as usize).cloned().ok_or_else(|| {
        Error::Protocol(format!(
            "descriptor position {pos} out of range ({} decoded)",
            decoded.len()
        ))
    })
}
