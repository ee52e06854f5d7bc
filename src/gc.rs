//! Mark-and-compact collector / id compactor (§4.6).

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::ids::{self, ObjectId};
use crate::memory::ObjectMemory;
use crate::object::Storage;
use crate::error::Result;

/// Traces from `roots`, following every object's `class_id` edge and, for
/// pointer-bearing storage, its pointer slots. Stops at direct-object byte
/// payloads. Returns the full reachable set.
fn mark(mem: &ObjectMemory, roots: &[ObjectId]) -> HashSet<ObjectId> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut stack: Vec<ObjectId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Ok(obj) = mem.get(id) else { continue };
        if !seen.contains(&obj.class_id) {
            stack.push(obj.class_id);
        }
        if let Some(pointers) = obj.storage.pointers() {
            for &p in pointers {
                if !seen.contains(&p) {
                    stack.push(p);
                }
            }
        }
    }
    seen
}

/// Builds the id-remapping table exactly as `qsilInterpreter.py`'s
/// `garbageCollect` does: sort the live set, then walk `0..N` pairing each
/// slot either with itself (if already live) or with the largest remaining
/// unmapped live id (popped off the end of the sorted pool).
fn build_remap(live: &HashSet<ObjectId>) -> HashMap<ObjectId, ObjectId> {
    let n = live.len() as u32;
    let mut pool: VecDeque<ObjectId> = live.iter().copied().collect();
    pool.make_contiguous().sort_unstable();

    let mut remap = HashMap::with_capacity(live.len());
    for id in 0..n {
        if pool.front() == Some(&id) {
            pool.pop_front();
            remap.insert(id, id);
        } else {
            let high = pool.pop_back().expect("pool exhausted before reaching N");
            remap.insert(high, id);
        }
    }
    remap
}

/// Runs a full mark-and-compact pass rooted at `IMAGE_SINGLETON`, the
/// well-known ids, and `active_context` (transitively, via its own pointer
/// slots: parentContext, homeContext, receiver, method, etc. are ordinary
/// pointer fields already covered by the generic walk). Returns the new id
/// of `active_context`.
pub fn collect(mem: &mut ObjectMemory, active_context: ObjectId) -> Result<ObjectId> {
    let mut roots: Vec<ObjectId> = (0..ids::NUM_WELL_KNOWN).collect();
    roots.push(ids::IMAGE_SINGLETON);
    roots.push(active_context);

    let live = mark(mem, &roots);
    let before = mem.len();
    let remap = build_remap(&live);

    let mut remapped: Vec<crate::object::Object> = Vec::with_capacity(live.len());
    for &old_id in &live {
        let mut obj = mem.remove(old_id).expect("live id must still be present");
        obj.id = remap[&old_id];
        obj.class_id = *remap.get(&obj.class_id).unwrap_or(&obj.class_id);
        if let Some(pointers) = obj.storage.pointers_mut() {
            for p in pointers.iter_mut() {
                if let Some(&new_id) = remap.get(p) {
                    *p = new_id;
                }
            }
        }
        remapped.push(obj);
    }

    *mem = ObjectMemory::new();
    for obj in remapped {
        mem.insert(obj);
    }

    debug!("gc: {} live of {} objects, highest_id now {}", live.len(), before, mem.highest_id());

    Ok(remap[&active_context])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;

    fn seed_well_known(mem: &mut ObjectMemory) {
        for id in 0..ids::NUM_WELL_KNOWN {
            mem.insert(crate::object::Object::new(id, ids::CLASS_CLASS, Storage::Bytes(vec![])));
        }
    }

    #[test]
    fn unreachable_objects_are_dropped_and_ids_compacted() {
        let mut mem = ObjectMemory::new();
        seed_well_known(&mut mem);
        let method_id = mem.allocate(ids::METHOD_CLASS, Storage::Pointers(vec![ids::NIL_OBJECT; 7]));
        let ctx = context::new_method_context(&mut mem, method_id, ids::NIL_OBJECT, vec![], ids::NIL_OBJECT);

        // scratch garbage, reachable from nothing once popped
        for _ in 0..50 {
            mem.allocate(ids::INTEGER_CLASS, Storage::Bytes(vec![0, 0, 0, 0]));
        }

        let new_ctx = collect(&mut mem, ctx).unwrap();
        assert!(mem.len() < 60);
        assert_eq!(mem.highest_id(), mem.len() as u32 - 1);
        assert!(mem.contains(new_ctx));
        for id in 0..ids::NUM_WELL_KNOWN {
            assert!(mem.contains(id), "well-known id {id} missing after gc");
        }
    }

    #[test]
    fn build_remap_keeps_low_ids_identity() {
        let mut live = HashSet::new();
        for id in 0..ids::NUM_WELL_KNOWN {
            live.insert(id);
        }
        live.insert(500);
        let remap = build_remap(&live);
        for id in 0..ids::NUM_WELL_KNOWN {
            assert_eq!(remap[&id], id);
        }
        assert_eq!(remap[&500], ids::NUM_WELL_KNOWN);
    }
}
