/*!

A map from a type to a single value of that type. The random module keeps one generator per
`RngId` type in a `TraitMap`.

*/

use crate::{type_of, HashMap, TypeId};
use std::any::Any;

#[derive(Default)]
pub(crate) struct TraitMap {
    map: HashMap<TypeId, Box<dyn Any>>,
}

impl TraitMap {
    pub fn new() -> Self {
        TraitMap {
            map: HashMap::default(),
        }
    }

    /// Stores `value`, returning the previous value of the same type if there was one.
    pub fn insert<T: Any>(&mut self, value: T) -> Option<Box<T>> {
        self.map
            .insert(type_of::<T>(), Box::new(value))
            // Only a `Box<T>` is ever stored under `type_of::<T>()`.
            .and_then(|boxed| boxed.downcast().ok())
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&type_of::<T>())
            .and_then(|boxed| boxed.downcast_mut())
    }

    /// Returns the value for `T`, inserting the result of `init` first if there is none.
    pub fn get_or_insert_with<T: Any>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        self.map
            .entry(type_of::<T>())
            .or_insert_with(|| Box::new(init()))
            .downcast_mut()
            .unwrap() // Will never panic as the entry has the matching type
    }

    pub fn contains_key<T: Any>(&self) -> bool {
        self.map.contains_key(&type_of::<T>())
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
