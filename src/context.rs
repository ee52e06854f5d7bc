//! Activation-record (context) schema and manipulation, plus the Method
//! and Class object schemas that contexts and dispatch read from.

use crate::error::{BytecodePosition, Error, Result};
use crate::ids::{self, ObjectId};
use crate::memory::ObjectMemory;
use crate::object::Storage;

/// Slot indices shared by method contexts and block contexts (§4.3).
pub mod ctx_slot {
    pub const PC: usize = 0;
    pub const STACK: usize = 1;
    pub const RECEIVER: usize = 2;
    pub const TEMPVARS: usize = 3;
    pub const PARENT_CONTEXT: usize = 4;
    pub const ARGS: usize = 5;
    /// Method contexts only: pointer to the `Method` object.
    pub const METHOD: usize = 6;
    /// Block contexts only.
    pub const BLOCK_LITERALS: usize = 6;
    pub const BLOCK_BYTECODES: usize = 7;
    pub const BLOCK_HOME_CONTEXT: usize = 8;
}

/// `Method` object slot indices, ordered to match `qsilbootstrapper.py`'s
/// `QSILMethod.asQSILObject` field enumeration.
pub mod method_slot {
    pub const METHOD_NAME: usize = 0;
    pub const VISIBILITY: usize = 1;
    pub const ARGS: usize = 2;
    pub const BYTECODES: usize = 3;
    pub const LITERALS: usize = 4;
    pub const NUM_TEMPS: usize = 5;
    pub const CLASS: usize = 6;
}

/// `Class` object slot indices, ordered to match `qsilbootstrapper.py`'s
/// `QSILClass.asQSILObject` field enumeration.
pub mod class_slot {
    pub const TYPE: usize = 0;
    pub const CLASS_NAME: usize = 1;
    pub const SUPERCLASS: usize = 2;
    pub const INST_VAR_NAMES: usize = 3;
    pub const CLASS_VAR_NAMES: usize = 4;
    pub const METHODS: usize = 5;
}

fn nil_filled(n: usize) -> Vec<ObjectId> {
    vec![ids::NIL_OBJECT; n]
}

/// Whether `id` names a method context or a block context, by its `class_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Method,
    Block,
}

pub fn kind_of(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ContextKind> {
    match mem.class_of(ctx_id)? {
        ids::METHOD_CONTEXT_CLASS => Ok(ContextKind::Method),
        ids::BLOCK_CONTEXT_CLASS => Ok(ContextKind::Block),
        other => Err(Error::TypeError {
            reason: "object is not a context",
            at: BytecodePosition { context_id: other, pc: 0 },
        }),
    }
}

fn pos(ctx_id: ObjectId, pc: i32) -> BytecodePosition {
    BytecodePosition { context_id: ctx_id, pc }
}

/// Reads the cached pc out of `ctx_id`'s pc-holding direct-object.
pub fn pc(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<i32> {
    let pc_id = mem.pointer_slot(ctx_id, ctx_slot::PC, pos(ctx_id, -1))?;
    mem.unbox_integer(pc_id, pos(ctx_id, -1))
}

/// Overwrites the pc-holding direct-object's payload in place — the pc box
/// is interpreter-private cache state, not a primitive-arithmetic result,
/// so it is exempt from the "direct-objects are immutable" rule.
pub fn set_pc(mem: &mut ObjectMemory, ctx_id: ObjectId, new_pc: i32) -> Result<()> {
    let pc_id = mem.pointer_slot(ctx_id, ctx_slot::PC, pos(ctx_id, new_pc))?;
    let obj = mem.get_mut(pc_id)?;
    obj.storage = Storage::Bytes(new_pc.to_le_bytes().to_vec());
    Ok(())
}

pub fn receiver(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ObjectId> {
    mem.pointer_slot(ctx_id, ctx_slot::RECEIVER, pos(ctx_id, 0))
}

pub fn parent_context(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ObjectId> {
    mem.pointer_slot(ctx_id, ctx_slot::PARENT_CONTEXT, pos(ctx_id, 0))
}

pub fn set_parent_context(mem: &mut ObjectMemory, ctx_id: ObjectId, parent: ObjectId) -> Result<()> {
    mem.set_pointer_slot(ctx_id, ctx_slot::PARENT_CONTEXT, parent, pos(ctx_id, 0))
}

/// For a method context, its `Method` object; for a block context, the
/// method its home context is running.
pub fn method_of(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ObjectId> {
    match kind_of(mem, ctx_id)? {
        ContextKind::Method => mem.pointer_slot(ctx_id, ctx_slot::METHOD, pos(ctx_id, 0)),
        ContextKind::Block => {
            let home = home_context(mem, ctx_id)?;
            mem.pointer_slot(home, ctx_slot::METHOD, pos(ctx_id, 0))
        }
    }
}

pub fn home_context(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ObjectId> {
    mem.pointer_slot(ctx_id, ctx_slot::BLOCK_HOME_CONTEXT, pos(ctx_id, 0))
}

/// The owning class of the method this context is running (method contexts
/// look at their own `method`; block contexts defer to their home context).
pub fn owning_class(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ObjectId> {
    let method_id = method_of(mem, ctx_id)?;
    mem.pointer_slot(method_id, method_slot::CLASS, pos(ctx_id, 0))
}

/// Literal table for the bytecodes currently executing in `ctx_id`.
pub fn literals(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<ObjectId> {
    match kind_of(mem, ctx_id)? {
        ContextKind::Method => {
            let m = mem.pointer_slot(ctx_id, ctx_slot::METHOD, pos(ctx_id, 0))?;
            mem.pointer_slot(m, method_slot::LITERALS, pos(ctx_id, 0))
        }
        ContextKind::Block => mem.pointer_slot(ctx_id, ctx_slot::BLOCK_LITERALS, pos(ctx_id, 0)),
    }
}

/// The raw bytecode blob currently executing in `ctx_id`.
pub fn bytecodes<'m>(mem: &'m ObjectMemory, ctx_id: ObjectId) -> Result<&'m [u8]> {
    let blob_id = match kind_of(mem, ctx_id)? {
        ContextKind::Method => {
            let m = mem.pointer_slot(ctx_id, ctx_slot::METHOD, pos(ctx_id, 0))?;
            mem.pointer_slot(m, method_slot::BYTECODES, pos(ctx_id, 0))?
        }
        ContextKind::Block => mem.pointer_slot(ctx_id, ctx_slot::BLOCK_BYTECODES, pos(ctx_id, 0))?,
    };
    mem.unbox_bytes(blob_id, pos(ctx_id, 0))
}

fn pointer_list<'m>(mem: &'m ObjectMemory, id: ObjectId, at: BytecodePosition) -> Result<&'m [ObjectId]> {
    mem.get(id)?.storage.pointers().ok_or(Error::TypeError {
        reason: "expected a pointer-list collection",
        at,
    })
}

pub fn stack_push(mem: &mut ObjectMemory, ctx_id: ObjectId, value: ObjectId) -> Result<()> {
    let stack_id = mem.pointer_slot(ctx_id, ctx_slot::STACK, pos(ctx_id, 0))?;
    let obj = mem.get_mut(stack_id)?;
    let list = obj.storage.pointers_mut().ok_or(Error::TypeError {
        reason: "context stack slot is not a pointer-list",
        at: pos(ctx_id, 0),
    })?;
    list.push(value);
    Ok(())
}

pub fn stack_pop(mem: &mut ObjectMemory, ctx_id: ObjectId, pc_hint: i32) -> Result<ObjectId> {
    let stack_id = mem.pointer_slot(ctx_id, ctx_slot::STACK, pos(ctx_id, pc_hint))?;
    let obj = mem.get_mut(stack_id)?;
    let list = obj.storage.pointers_mut().ok_or(Error::TypeError {
        reason: "context stack slot is not a pointer-list",
        at: pos(ctx_id, pc_hint),
    })?;
    list.pop().ok_or(Error::StackUnderflow { at: pos(ctx_id, pc_hint) })
}

pub fn stack_top(mem: &ObjectMemory, ctx_id: ObjectId, pc_hint: i32) -> Result<ObjectId> {
    let stack_id = mem.pointer_slot(ctx_id, ctx_slot::STACK, pos(ctx_id, pc_hint))?;
    pointer_list(mem, stack_id, pos(ctx_id, pc_hint))?
        .last()
        .copied()
        .ok_or(Error::StackUnderflow { at: pos(ctx_id, pc_hint) })
}

pub fn arg(mem: &ObjectMemory, ctx_id: ObjectId, index: usize, pc_hint: i32) -> Result<ObjectId> {
    let args_id = mem.pointer_slot(ctx_id, ctx_slot::ARGS, pos(ctx_id, pc_hint))?;
    let list = pointer_list(mem, args_id, pos(ctx_id, pc_hint))?;
    list.get(index).copied().ok_or(Error::IndexOutOfRange {
        index: index as u32,
        len: list.len(),
        at: pos(ctx_id, pc_hint),
    })
}

pub fn temp(mem: &ObjectMemory, ctx_id: ObjectId, index: usize, pc_hint: i32) -> Result<ObjectId> {
    let temps_id = mem.pointer_slot(ctx_id, ctx_slot::TEMPVARS, pos(ctx_id, pc_hint))?;
    let list = pointer_list(mem, temps_id, pos(ctx_id, pc_hint))?;
    list.get(index).copied().ok_or(Error::IndexOutOfRange {
        index: index as u32,
        len: list.len(),
        at: pos(ctx_id, pc_hint),
    })
}

/// Writes `value` into tempvar `index`, growing the tempvars collection
/// with nil-filled slots if `index` is past its current length (§9: this is
/// load-bearing for bootstrapped methods whose declared temp count is not
/// materialized in the image).
pub fn set_temp(mem: &mut ObjectMemory, ctx_id: ObjectId, index: usize, value: ObjectId, pc_hint: i32) -> Result<()> {
    let temps_id = mem.pointer_slot(ctx_id, ctx_slot::TEMPVARS, pos(ctx_id, pc_hint))?;
    let obj = mem.get_mut(temps_id)?;
    let list = obj.storage.pointers_mut().ok_or(Error::TypeError {
        reason: "context tempvars slot is not a pointer-list",
        at: pos(ctx_id, pc_hint),
    })?;
    if index >= list.len() {
        list.resize(index + 1, ids::NIL_OBJECT);
    }
    list[index] = value;
    Ok(())
}

pub fn instvar(mem: &ObjectMemory, receiver_id: ObjectId, index: usize, at: BytecodePosition) -> Result<ObjectId> {
    mem.pointer_slot(receiver_id, index, at)
}

pub fn set_instvar(mem: &mut ObjectMemory, receiver_id: ObjectId, index: usize, value: ObjectId, at: BytecodePosition) -> Result<()> {
    mem.set_pointer_slot(receiver_id, index, value, at)
}

/// Allocates a fresh, empty growable pointer collection (an ordered
/// collection / stack / frame).
fn new_pointer_list(mem: &mut ObjectMemory, items: Vec<ObjectId>) -> ObjectId {
    mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(items))
}

/// Builds and inserts a new method context per §4.5 step 8.
pub fn new_method_context(
    mem: &mut ObjectMemory,
    method_id: ObjectId,
    receiver_id: ObjectId,
    args: Vec<ObjectId>,
    parent_context: ObjectId,
) -> ObjectId {
    let pc_id = mem.box_integer(0);
    let stack_id = new_pointer_list(mem, vec![]);
    let tempvars_id = new_pointer_list(mem, vec![]);
    let args_id = new_pointer_list(mem, args);
    let storage = vec![pc_id, stack_id, receiver_id, tempvars_id, parent_context, args_id, method_id];
    mem.allocate(ids::METHOD_CONTEXT_CLASS, Storage::Pointers(storage))
}

/// Block copy-and-bind per §4.4.3: allocates a fresh block context sharing
/// the enclosing method context's tempvars/args collections by id.
pub fn copy_and_bind_block(
    mem: &mut ObjectMemory,
    template_id: ObjectId,
    enclosing_method_context: ObjectId,
) -> Result<ObjectId> {
    let receiver_id = receiver(mem, enclosing_method_context)?;
    let tempvars_id = mem.pointer_slot(enclosing_method_context, ctx_slot::TEMPVARS, pos(template_id, 0))?;
    let args_id = mem.pointer_slot(enclosing_method_context, ctx_slot::ARGS, pos(template_id, 0))?;
    let literals_id = mem.pointer_slot(template_id, ctx_slot::BLOCK_LITERALS, pos(template_id, 0))?;
    let bytecodes_id = mem.pointer_slot(template_id, ctx_slot::BLOCK_BYTECODES, pos(template_id, 0))?;

    let pc_id = mem.box_integer(0);
    let stack_id = new_pointer_list(mem, vec![]);
    let storage = vec![
        pc_id,
        stack_id,
        receiver_id,
        tempvars_id,
        ids::NIL_OBJECT,
        args_id,
        literals_id,
        bytecodes_id,
        enclosing_method_context,
    ];
    Ok(mem.allocate(ids::BLOCK_CONTEXT_CLASS, Storage::Pointers(storage)))
}

/// Allocates a class-less instance with `num_instvars` nil-filled pointer
/// slots, for `ALLOC_NEW`/`ALLOC_NEW_WITHSIZE`.
pub fn allocate_instance(mem: &mut ObjectMemory, class_id: ObjectId, num_instvars: usize) -> ObjectId {
    mem.allocate(class_id, Storage::Pointers(nil_filled(num_instvars)))
}

#[must_use]
pub fn superclass_of(mem: &ObjectMemory, class_id: ObjectId) -> Result<ObjectId> {
    mem.pointer_slot(class_id, class_slot::SUPERCLASS, pos(class_id, 0))
}

#[must_use]
pub fn methods_of(mem: &ObjectMemory, class_id: ObjectId) -> Result<&[ObjectId]> {
    let methods_id = mem.pointer_slot(class_id, class_slot::METHODS, pos(class_id, 0))?;
    pointer_list(mem, methods_id, pos(class_id, 0))
}

pub fn method_name(mem: &ObjectMemory, method_id: ObjectId) -> Result<&[u8]> {
    let name_id = mem.pointer_slot(method_id, method_slot::METHOD_NAME, pos(method_id, 0))?;
    mem.unbox_bytes(name_id, pos(method_id, 0))
}

pub fn method_visibility(mem: &ObjectMemory, method_id: ObjectId) -> Result<u8> {
    let vis_id = mem.pointer_slot(method_id, method_slot::VISIBILITY, pos(method_id, 0))?;
    Ok(mem.unbox_integer(vis_id, pos(method_id, 0))? as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_mem() -> ObjectMemory {
        ObjectMemory::new()
    }

    #[test]
    fn method_context_round_trips_slots() {
        let mut mem = fresh_mem();
        let method_id = mem.allocate(ids::METHOD_CLASS, Storage::Pointers(nil_filled(7)));
        let ctx = new_method_context(&mut mem, method_id, ids::NIL_OBJECT, vec![], ids::NIL_OBJECT);
        assert_eq!(pc(&mem, ctx).unwrap(), 0);
        set_pc(&mut mem, ctx, 4).unwrap();
        assert_eq!(pc(&mem, ctx).unwrap(), 4);
        assert_eq!(method_of(&mem, ctx).unwrap(), method_id);
    }

    #[test]
    fn stack_push_pop_is_lifo() {
        let mut mem = fresh_mem();
        let method_id = mem.allocate(ids::METHOD_CLASS, Storage::Pointers(nil_filled(7)));
        let ctx = new_method_context(&mut mem, method_id, ids::NIL_OBJECT, vec![], ids::NIL_OBJECT);
        stack_push(&mut mem, ctx, 111).unwrap();
        stack_push(&mut mem, ctx, 222).unwrap();
        assert_eq!(stack_pop(&mut mem, ctx, 0).unwrap(), 222);
        assert_eq!(stack_pop(&mut mem, ctx, 0).unwrap(), 111);
        assert!(stack_pop(&mut mem, ctx, 0).is_err());
    }

    #[test]
    fn set_temp_autogrows_with_nil() {
        let mut mem = fresh_mem();
        let method_id = mem.allocate(ids::METHOD_CLASS, Storage::Pointers(nil_filled(7)));
        let ctx = new_method_context(&mut mem, method_id, ids::NIL_OBJECT, vec![], ids::NIL_OBJECT);
        set_temp(&mut mem, ctx, 2, 99, 0).unwrap();
        assert_eq!(temp(&mem, ctx, 0, 0).unwrap(), ids::NIL_OBJECT);
        assert_eq!(temp(&mem, ctx, 2, 0).unwrap(), 99);
    }

    #[test]
    fn block_shares_tempvars_with_enclosing_method_context() {
        let mut mem = fresh_mem();
        let method_id = mem.allocate(ids::METHOD_CLASS, Storage::Pointers(nil_filled(7)));
        let ctx = new_method_context(&mut mem, method_id, ids::NIL_OBJECT, vec![], ids::NIL_OBJECT);
        set_temp(&mut mem, ctx, 0, 5, 0).unwrap();

        let bytecodes_id = mem.box_bytes(ids::BYTESTRING_CLASS, vec![]);
        let literals_id = new_pointer_list(&mut mem, vec![]);
        let template_pc = mem.box_integer(0);
        let template_stack = new_pointer_list(&mut mem, vec![]);
        let template = mem.allocate(
            ids::BLOCK_CONTEXT_CLASS,
            Storage::Pointers(vec![
                template_pc,
                template_stack,
                ids::NIL_OBJECT,
                ids::NIL_OBJECT,
                ids::NIL_OBJECT,
                ids::NIL_OBJECT,
                literals_id,
                bytecodes_id,
                ids::NIL_OBJECT,
            ]),
        );

        let block = copy_and_bind_block(&mut mem, template, ctx).unwrap();
        set_temp(&mut mem, block, 0, 6, 0).unwrap();
        assert_eq!(temp(&mem, ctx, 0, 0).unwrap(), 6);
    }
}
