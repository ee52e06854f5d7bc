//! Tagged-variant object representation.

use num_enum::TryFromPrimitive;

use crate::ids::ObjectId;

/// The storage shape of a heap object, matching the image format's `kind` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Kind {
    PointerObject = 1,
    DirectObject = 2,
    DirectPointerObject = 3,
}

/// The payload of a heap object, shaped by its [`Kind`].
#[derive(Debug, Clone)]
pub enum Storage {
    /// Fixed-size instance variables, one pointer per inherited ivar slot.
    Pointers(Vec<ObjectId>),
    /// Raw bytes: boxed integers/floats/characters, symbols, strings, bytecode blobs.
    Bytes(Vec<u8>),
    /// A growable pointer sequence: ordered collections, stacks, arg/temp frames.
    PointerList(Vec<ObjectId>),
}

impl Storage {
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Storage::Pointers(_) => Kind::PointerObject,
            Storage::Bytes(_) => Kind::DirectObject,
            Storage::PointerList(_) => Kind::DirectPointerObject,
        }
    }

    /// Pointer slots, for kinds that hold them. `None` for `DirectObject`.
    #[must_use]
    pub fn pointers(&self) -> Option<&[ObjectId]> {
        match self {
            Storage::Pointers(p) | Storage::PointerList(p) => Some(p),
            Storage::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn pointers_mut(&mut self) -> Option<&mut Vec<ObjectId>> {
        match self {
            Storage::Pointers(p) | Storage::PointerList(p) => Some(p),
            Storage::Bytes(_) => None,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Storage::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// A heap-resident object, owned by the [`crate::memory::ObjectMemory`].
#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub class_id: ObjectId,
    pub storage: Storage,
}

impl Object {
    #[must_use]
    pub fn new(id: ObjectId, class_id: ObjectId, storage: Storage) -> Self {
        Self {
            id,
            class_id,
            storage,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.storage.kind()
    }
}

#[test]
fn storage_kind_matches_variant() {
    assert_eq!(Storage::Pointers(vec![]).kind(), Kind::PointerObject);
    assert_eq!(Storage::Bytes(vec![]).kind(), Kind::DirectObject);
    assert_eq!(Storage::PointerList(vec![]).kind(), Kind::DirectPointerObject);
}
