/*!

A map from `T: Attribute` to the column of values of `T`, one slot per allocated node, in the
`AnyMap` pattern: a `HashMap<TypeId, Box<dyn Any>>` in which the entry for `type_of::<T>()` is
always a `Box<AttributeColumn<T>>`.

*/

use crate::{attribute::Attribute, type_of, HashMap, TypeId};
use std::any::Any;

pub(crate) struct AttributeColumn<T: Attribute> {
    pub values: Vec<Option<T>>,
}

impl<T: Attribute> AttributeColumn<T> {
    #[inline(always)]
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Sets the value at `index`, growing the column with empty slots as needed.
    pub fn set(&mut self, index: usize, value: T) {
        if index >= self.values.len() {
            self.values.resize_with(index + 1, || None);
        }
        self.values[index] = Some(value);
    }
}

#[derive(Default)]
pub(crate) struct AttributeMap {
    map: HashMap<TypeId, Box<dyn Any>>,
}

impl AttributeMap {
    pub fn new() -> AttributeMap {
        AttributeMap {
            map: HashMap::default(),
        }
    }

    pub fn column_mut<T: Attribute>(&mut self) -> &mut AttributeColumn<T> {
        self.map
            .entry(type_of::<T>())
            .or_insert_with(|| Box::new(AttributeColumn::<T>::new()))
            .downcast_mut()
            .unwrap() // Only an `AttributeColumn<T>` is ever stored under `type_of::<T>()`.
    }

    pub fn column<T: Attribute>(&self) -> Option<&AttributeColumn<T>> {
        self.map
            .get(&type_of::<T>())
            .and_then(|column| column.downcast_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::AttributeMap;
    use crate::attribute::{DiseaseStatus, Group};

    #[test]
    fn columns_are_separate_per_type() {
        let mut map = AttributeMap::new();
        map.column_mut::<Group>().set(2, Group(1));
        map.column_mut::<DiseaseStatus>().set(0, DiseaseStatus::Infected);

        let groups = map.column::<Group>().unwrap();
        assert_eq!(groups.values.len(), 3);
        assert_eq!(groups.get(0), None);
        assert_eq!(groups.get(2), Some(&Group(1)));
        assert_eq!(groups.get(10), None);

        assert_eq!(
            map.column::<DiseaseStatus>().unwrap().get(0),
            Some(&DiseaseStatus::Infected)
        );
    }

    #[test]
    fn missing_column_is_none() {
        let map = AttributeMap::new();
        assert!(map.column::<Group>().is_none());
    }
}
