//! Method lookup and the `CALL` protocol (§4.5).

use crate::bytecode::{selector_arity, Visibility};
use crate::context;
use crate::error::{BytecodePosition, Error, Result};
use crate::ids::{self, ObjectId, Value};
use crate::memory::ObjectMemory;

struct SearchFlags {
    static_only: bool,
    admit_private_protected: bool,
}

/// Resolves `sel` against `start_class` under `flags`, walking the
/// superclass chain up to and including `OBJECT_CLASS`. Returns the found
/// method's id.
fn find_method(
    mem: &ObjectMemory,
    start_class: ObjectId,
    sel: &[u8],
    flags: &SearchFlags,
    at: BytecodePosition,
) -> Result<ObjectId> {
    let mut class_id = start_class;
    loop {
        for &method_id in context::methods_of(mem, class_id)? {
            let name = context::method_name(mem, method_id)?;
            if name != sel {
                continue;
            }
            let vis = Visibility::from_bits_truncate(context::method_visibility(mem, method_id)?);
            let admitted = if flags.static_only {
                vis.is_static() && !vis.is_private_or_protected()
            } else if vis.is_static() {
                false
            } else if vis.is_private_or_protected() {
                flags.admit_private_protected
            } else {
                true
            };
            if admitted {
                return Ok(method_id);
            }
        }
        if class_id == ids::OBJECT_CLASS {
            return Err(Error::DoesNotUnderstand {
                selector: String::from_utf8_lossy(sel).into_owned(),
                at,
            });
        }
        class_id = context::superclass_of(mem, class_id)?;
    }
}

/// Executes `CALL` against the active context `ctx_id`: pops selector, args,
/// and receiver off its stack, resolves a method, and returns the id of the
/// freshly allocated method context that becomes active.
pub fn call(mem: &mut ObjectMemory, ctx_id: ObjectId, pc: i32) -> Result<ObjectId> {
    let at = BytecodePosition { context_id: ctx_id, pc };

    let sel_id = context::stack_pop(mem, ctx_id, pc)?;
    if mem.class_of(sel_id)? != ids::SYMBOL_CLASS {
        return Err(Error::TypeError { reason: "CALL selector is not a Symbol", at });
    }
    let sel = mem.unbox_bytes(sel_id, at)?.to_vec();
    let arity = selector_arity(&sel);

    let mut args = Vec::with_capacity(arity);
    for _ in 0..arity {
        args.push(context::stack_pop(mem, ctx_id, pc)?);
    }
    args.reverse();

    let rcvr_raw = context::stack_pop(mem, ctx_id, pc)?;
    let owning_class = context::owning_class(mem, ctx_id)?;

    let (receiver_id, start_class, flags) = match Value::decode(rcvr_raw) {
        Value::Super { start_class } => {
            let lookup_start = context::superclass_of(mem, start_class)?;
            let actual_receiver = context::receiver(mem, ctx_id)?;
            (
                actual_receiver,
                lookup_start,
                SearchFlags { static_only: false, admit_private_protected: false },
            )
        }
        Value::Pointer(rcvr) => {
            if mem.class_of(rcvr)? == ids::CLASS_CLASS {
                (rcvr, rcvr, SearchFlags { static_only: true, admit_private_protected: false })
            } else {
                let rcvr_class = mem.class_of(rcvr)?;
                let admit = owning_class == rcvr_class;
                (rcvr, rcvr_class, SearchFlags { static_only: false, admit_private_protected: admit })
            }
        }
    };

    let method_id = find_method(mem, start_class, &sel, &flags, at)?;
    let new_ctx = context::new_method_context(mem, method_id, receiver_id, args, ctx_id);
    Ok(new_ctx)
}

/// `PUSH_SUPER`: a pointer to the class owning the currently executing
/// method, tagged as a super-sentinel.
pub fn push_super_value(mem: &ObjectMemory, ctx_id: ObjectId) -> Result<u32> {
    let owning_class = context::owning_class(mem, ctx_id)?;
    Ok(Value::Super { start_class: owning_class }.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Storage;

    fn make_class(mem: &mut ObjectMemory, superclass: ObjectId, methods: Vec<ObjectId>) -> ObjectId {
        let inst_var_names = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![]));
        let class_var_names = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![]));
        let methods_id = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(methods));
        let type_name = mem.box_bytes(ids::BYTESTRING_CLASS, b"subclass:".to_vec());
        let class_name = mem.box_bytes(ids::BYTESTRING_CLASS, b"Anonymous".to_vec());
        mem.allocate(
            ids::CLASS_CLASS,
            Storage::Pointers(vec![type_name, class_name, superclass, inst_var_names, class_var_names, methods_id]),
        )
    }

    fn make_method(mem: &mut ObjectMemory, name: &[u8], visibility: u8, class: ObjectId) -> ObjectId {
        let name_id = mem.box_bytes(ids::SYMBOL_CLASS, name.to_vec());
        let vis_id = mem.box_integer(i32::from(visibility));
        let args_id = mem.box_integer(0);
        let bytecodes_id = mem.box_bytes(ids::BYTESTRING_CLASS, vec![9]); // RETURN
        let literals_id = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![]));
        let num_temps = mem.box_integer(0);
        mem.allocate(
            ids::METHOD_CLASS,
            Storage::Pointers(vec![name_id, vis_id, args_id, bytecodes_id, literals_id, num_temps, class]),
        )
    }

    #[test]
    fn lookup_via_superclass_finds_inherited_method() {
        let mut mem = ObjectMemory::new();
        let class_a = make_class(&mut mem, ids::OBJECT_CLASS, vec![]);
        let m = make_method(&mut mem, b"m", 0, class_a);
        let methods = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![m]));
        let at = BytecodePosition { context_id: 0, pc: 0 };
        mem.set_pointer_slot(class_a, context::class_slot::METHODS, methods, at).unwrap();
        let class_b = make_class(&mut mem, class_a, vec![]);

        let flags = SearchFlags { static_only: false, admit_private_protected: false };
        let found = find_method(&mem, class_b, b"m", &flags, at).unwrap();
        assert_eq!(found, m);
    }

    /// S4: a super-send from an overriding method bypasses the override and
    /// resolves against the superclass, while the receiver stays the actual
    /// (subclass) instance.
    #[test]
    fn super_send_bypasses_subclass_override() {
        let mut mem = ObjectMemory::new();
        let class_a = make_class(&mut mem, ids::OBJECT_CLASS, vec![]);
        let m_a = make_method(&mut mem, b"m", 0, class_a);
        let methods_a = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![m_a]));
        let at = BytecodePosition { context_id: 0, pc: 0 };
        mem.set_pointer_slot(class_a, context::class_slot::METHODS, methods_a, at).unwrap();

        let class_b = make_class(&mut mem, class_a, vec![]);
        let m_b = make_method(&mut mem, b"m", 0, class_b);
        let methods_b = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![m_b]));
        mem.set_pointer_slot(class_b, context::class_slot::METHODS, methods_b, at).unwrap();

        let receiver = context::allocate_instance(&mut mem, class_b, 0);
        let ctx = context::new_method_context(&mut mem, m_b, receiver, vec![], ids::NIL_OBJECT);

        let super_value = push_super_value(&mem, ctx).unwrap();
        context::stack_push(&mut mem, ctx, super_value).unwrap();
        let sel = mem.box_bytes(ids::SYMBOL_CLASS, b"m".to_vec());
        context::stack_push(&mut mem, ctx, sel).unwrap();

        let new_ctx = call(&mut mem, ctx, 0).unwrap();
        assert_eq!(context::method_of(&mem, new_ctx).unwrap(), m_a);
        assert_eq!(context::receiver(&mem, new_ctx).unwrap(), receiver);
    }

    #[test]
    fn static_only_search_rejects_instance_methods() {
        let mut mem = ObjectMemory::new();
        let class_a = make_class(&mut mem, ids::OBJECT_CLASS, vec![]);
        let m = make_method(&mut mem, b"m", 0, class_a);
        let methods = mem.allocate(ids::ORDERED_COLLECTION_CLASS, Storage::PointerList(vec![m]));
        let at = BytecodePosition { context_id: 0, pc: 0 };
        mem.set_pointer_slot(class_a, context::class_slot::METHODS, methods, at).unwrap();

        let flags = SearchFlags { static_only: true, admit_private_protected: false };
        assert!(matches!(find_method(&mem, class_a, b"m", &flags, at), Err(Error::DoesNotUnderstand { .. })));
    }
}
