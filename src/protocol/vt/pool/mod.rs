//! Object pool: the indexed collection mapping object IDs to objects for one
//! working set. Pools are populated by the parser collaborator and mutated by
//! server commands.
use alloc::collections::BTreeMap;

use crate::protocol::vt::objects::{ObjectKind, ObjectType, VtObject, NULL_OBJECT_ID};

/// ID-indexed object collection with whole-pool validation.
#[derive(Clone, Debug, Default)]
pub struct ObjectPool {
    objects: BTreeMap<u16, VtObject>,
}

impl ObjectPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self { objects: BTreeMap::new() }
    }

    /// Insert an object keyed by its own ID, replacing any previous holder.
    pub fn insert(&mut self, object: VtObject) -> Option<VtObject> {
        self.objects.insert(object.id, object)
    }

    /// Look up an object.
    pub fn object(&self, id: u16) -> Option<&VtObject> {
        self.objects.get(&id)
    }

    /// Look up an object for mutation.
    pub fn object_mut(&mut self, id: u16) -> Option<&mut VtObject> {
        self.objects.get_mut(&id)
    }

    /// Number of objects in the pool.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the pool holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over the objects in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &VtObject> {
        self.objects.values()
    }

    /// Move every object of another pool into this one.
    pub fn merge(&mut self, other: ObjectPool) {
        for (id, object) in other.objects {
            self.objects.insert(id, object);
        }
    }

    /// The pool's working set object, when one was uploaded.
    pub fn working_set_object(&self) -> Option<&VtObject> {
        self.objects
            .values()
            .find(|object| matches!(object.kind, ObjectKind::WorkingSet { .. }))
    }

    /// Whether every object in the pool is individually valid.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate the whole pool: every object must carry a usable ID and every
    /// child reference must resolve to an object whose type the parent is
    /// allowed to hold. Returns the ID of the first faulting object.
    pub fn validate(&self) -> Result<(), u16> {
        for object in self.objects.values() {
            if object.id == NULL_OBJECT_ID {
                return Err(object.id);
            }
            let allowed: &[ObjectType] = object.object_type().allowed_child_types();
            for child in &object.children {
                match self.objects.get(&child.id) {
                    Some(child_object) if allowed.contains(&child_object.object_type()) => {}
                    _ => return Err(object.id),
                }
            }
        }
        Ok(())
    }
}
