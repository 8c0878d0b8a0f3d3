/*!

The per-trial `Context`: a bag of typed data plugins plus the current step.

Every trial owns exactly one `Context`. The attribute store, the network and the random number
generators all live inside it as data plugins, created lazily the first time they are asked for.
Nothing in a `Context` is shared between trials, which is what lets the driver run trials on
separate threads without locking.

A data plugin is any `'static` type that knows how to construct itself:

```rust
# use epinet::DataPlugin;
struct Tally {
  count: usize,
}

impl DataPlugin for Tally {
  const new: &'static dyn Fn() -> Self = &|| Tally { count: 0 };
}
```

*/

use crate::{type_of, HashMap, TypeId};
use std::any::Any;

/// A type that can be stored in a `Context` and knows how to construct its empty state.
pub trait DataPlugin: Any + Sized {
    /// A constant reference to a constructor
    #[allow(non_upper_case_globals)]
    const new: &'static dyn Fn() -> Self;
}

impl<T: 'static> DataPlugin for Vec<T> {
    const new: &'static dyn Fn() -> Self = &Vec::<T>::new;
}

pub struct Context {
    // This is actually a `HashMap<TypeId, Box<T: DataPlugin>>` but must be declared this way to
    // avoid having to implement an `as_any()` method on every plugin.
    data_plugins: HashMap<TypeId, Box<dyn Any>>,
    current_step: usize,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Context {
            data_plugins: HashMap::default(),
            current_step: 0,
        }
    }

    /// The step currently being executed. Zero during initialization.
    #[must_use]
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub(crate) fn advance_step(&mut self) -> usize {
        self.current_step += 1;
        self.current_step
    }

    /// Returns a mutable reference for the data container for `T`, creating it if it doesn't exist yet.
    pub fn get_data_container_mut<T: DataPlugin>(&mut self) -> &mut T {
        self.data_plugins
            .entry(type_of::<T>())
            .or_insert_with(|| Box::new(<T as DataPlugin>::new()))
            .downcast_mut::<T>()
            .unwrap() // Will never panic as data container has the matching type
    }

    /// Returns a reference to the data container for `T` if it exists.
    /// If you need a mutable reference or lazy instantiation, use `Context::get_data_container_mut()`.
    #[must_use]
    pub fn get_data_container<T: DataPlugin>(&self) -> Option<&T> {
        self.data_plugins
            .get(&type_of::<T>())
            .and_then(|data| data.downcast_ref::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tally {
        count: usize,
    }

    impl DataPlugin for Tally {
        const new: &'static dyn Fn() -> Self = &|| Tally { count: 0 };
    }

    #[test]
    fn plugins_are_created_lazily() {
        let mut context = Context::new();
        assert!(context.get_data_container::<Tally>().is_none());

        context.get_data_container_mut::<Tally>().count += 2;
        context.get_data_container_mut::<Tally>().count += 3;

        assert_eq!(context.get_data_container::<Tally>().unwrap().count, 5);
    }

    #[test]
    fn plugins_are_keyed_by_type() {
        let mut context = Context::new();
        {
            // If you specify the type of the variable the compiler can infer the generic type.
            let bytes: &mut Vec<u8> = context.get_data_container_mut();
            bytes.extend([1, 2, 3]);
        }
        {
            let words: &mut Vec<&str> = context.get_data_container_mut();
            words.push("four");
        }

        assert_eq!(context.get_data_container::<Vec<u8>>().unwrap().len(), 3);
        assert_eq!(context.get_data_container::<Vec<&str>>().unwrap(), &vec!["four"]);
    }

    #[test]
    fn step_counter_advances() {
        let mut context = Context::new();
        assert_eq!(context.current_step(), 0);
        assert_eq!(context.advance_step(), 1);
        assert_eq!(context.advance_step(), 2);
        assert_eq!(context.current_step(), 2);
    }
}
