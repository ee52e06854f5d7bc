//! Binary image reader/writer (§6).

use std::collections::HashSet;
use std::io::{Read, Write};

use log::info;

use crate::error::{Error, Result};
use crate::ids::{self, ObjectId};
use crate::memory::ObjectMemory;
use crate::object::{Kind, Object, Storage};

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u32<W: Write>(w: &mut W, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Reads an image per §6, enforcing its three load-time invariants:
/// every referenced id appears exactly once, the active context's class is
/// a method or block context, and all well-known ids are present.
pub fn read<R: Read>(mut r: R) -> Result<(ObjectMemory, ObjectId)> {
    let num_objects = read_u32(&mut r)?;

    let mut memory = ObjectMemory::new();
    let mut seen_ids: HashSet<ObjectId> = HashSet::new();

    for _ in 0..num_objects {
        let kind_tag = read_u32(&mut r)?;
        let kind = Kind::try_from(kind_tag).map_err(|_| Error::MalformedImage("unknown object kind tag"))?;
        let obj_id = read_u32(&mut r)?;
        let class_id = read_u32(&mut r)?;
        let storage_count = read_u32(&mut r)? as usize;

        if !seen_ids.insert(obj_id) {
            return Err(Error::MalformedImage("duplicate objId in image"));
        }

        let storage = match kind {
            Kind::DirectObject => {
                let mut bytes = vec![0u8; storage_count];
                r.read_exact(&mut bytes)?;
                Storage::Bytes(bytes)
            }
            Kind::PointerObject | Kind::DirectPointerObject => {
                let mut pointers = Vec::with_capacity(storage_count);
                for _ in 0..storage_count {
                    pointers.push(read_u32(&mut r)?);
                }
                if kind == Kind::PointerObject {
                    Storage::Pointers(pointers)
                } else {
                    Storage::PointerList(pointers)
                }
            }
        };

        memory.insert(Object::new(obj_id, class_id, storage));
    }

    let active_context_id = read_u32(&mut r)?;

    // Invariant: every referenced objId resolves to some object in the image.
    for obj in memory.iter() {
        if !seen_ids.contains(&obj.class_id) {
            return Err(Error::DanglingReference(obj.class_id));
        }
        if let Some(pointers) = obj.storage.pointers() {
            for &p in pointers {
                if !seen_ids.contains(&p) {
                    return Err(Error::DanglingReference(p));
                }
            }
        }
    }

    // Invariant: well-known ids 0..18 are all present.
    for id in 0..ids::NUM_WELL_KNOWN {
        if !seen_ids.contains(&id) {
            return Err(Error::MalformedImage("a well-known id is missing from the image"));
        }
    }

    // Invariant: the active context's class is a method or block context.
    let active_class = memory.class_of(active_context_id)?;
    if active_class != ids::METHOD_CONTEXT_CLASS && active_class != ids::BLOCK_CONTEXT_CLASS {
        return Err(Error::MalformedImage("active context is neither a method nor a block context"));
    }

    info!("image: loaded {} objects, active context {}", memory.len(), active_context_id);
    Ok((memory, active_context_id))
}

/// Writes `memory`/`active_context_id` back out in the same format `read`
/// consumes. Object order is unspecified (§6: "serialized in any order").
pub fn write<W: Write>(mut w: W, memory: &ObjectMemory, active_context_id: ObjectId) -> Result<()> {
    write_u32(&mut w, memory.len() as u32)?;
    for obj in memory.iter() {
        write_u32(&mut w, obj.kind() as u32)?;
        write_u32(&mut w, obj.id)?;
        write_u32(&mut w, obj.class_id)?;
        match &obj.storage {
            Storage::Bytes(bytes) => {
                write_u32(&mut w, bytes.len() as u32)?;
                w.write_all(bytes)?;
            }
            Storage::Pointers(pointers) | Storage::PointerList(pointers) => {
                write_u32(&mut w, pointers.len() as u32)?;
                for &p in pointers {
                    write_u32(&mut w, p)?;
                }
            }
        }
    }
    write_u32(&mut w, active_context_id)?;
    info!("image: wrote {} objects, active context {}", memory.len(), active_context_id);
    Ok(())
}
