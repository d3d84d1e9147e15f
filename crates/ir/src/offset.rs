//! Index assignment for the items of one output file.
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::{
    application::DexApplication,
    factory::{DexField, DexItemFactory, DexMethod, DexProto, DexString, DexType, IndexedItemRef},
    indexed::MIN_VALID_VALUE,
};

/// Strings with an index above this need the jumbo form of `const-string`.
const MAX_NON_JUMBO_INDEX: usize = 0xffff;

/// The sorted item tables of one virtual output file.
///
/// Building the mapping associates every item with the file and assigns it
/// its position in the table of its kind.
#[derive(Debug)]
pub struct ObjectToOffsetMapping {
    virtual_file_id: usize,
    factory: Arc<DexItemFactory>,
    classes: Vec<DexType>,
    protos: Vec<DexProto>,
    types: Vec<DexType>,
    methods: Vec<DexMethod>,
    fields: Vec<DexField>,
    strings: Vec<DexString>,
    first_jumbo_string: Option<DexString>,
}

impl ObjectToOffsetMapping {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        virtual_file_id: usize,
        factory: &Arc<DexItemFactory>,
        app: &DexApplication,
        classes: Vec<DexType>,
        protos: Vec<DexProto>,
        types: Vec<DexType>,
        methods: Vec<DexMethod>,
        fields: Vec<DexField>,
        strings: Vec<DexString>,
    ) -> Self {
        let classes = sort_classes(factory, app, classes);
        let protos = sort_and_index(factory, virtual_file_id, protos);
        let types = sort_and_index(factory, virtual_file_id, types);
        let methods = sort_and_index(factory, virtual_file_id, methods);
        let fields = sort_and_index(factory, virtual_file_id, fields);
        let strings = sort_and_index(factory, virtual_file_id, strings);
        let first_jumbo_string = strings.get(MAX_NON_JUMBO_INDEX + 1).copied();

        tracing::debug!(
            virtual_file_id,
            classes = classes.len(),
            strings = strings.len(),
            jumbo = first_jumbo_string.is_some(),
            "assigned file indices"
        );
        Self {
            virtual_file_id,
            factory: factory.clone(),
            classes,
            protos,
            types,
            methods,
            fields,
            strings,
            first_jumbo_string,
        }
    }

    pub fn virtual_file_id(&self) -> usize {
        self.virtual_file_id
    }

    /// Classes ordered so that super types and interfaces precede their
    /// subtypes.
    pub fn classes(&self) -> &[DexType] {
        &self.classes
    }

    pub fn protos(&self) -> &[DexProto] {
        &self.protos
    }

    pub fn types(&self) -> &[DexType] {
        &self.types
    }

    pub fn methods(&self) -> &[DexMethod] {
        &self.methods
    }

    pub fn fields(&self) -> &[DexField] {
        &self.fields
    }

    pub fn strings(&self) -> &[DexString] {
        &self.strings
    }

    pub fn has_jumbo_strings(&self) -> bool {
        self.first_jumbo_string.is_some()
    }

    pub fn first_jumbo_string(&self) -> Option<DexString> {
        self.first_jumbo_string
    }

    /// The index of `item` in its table.
    ///
    /// # Panics
    /// Panics if `item` is not part of this file.
    pub fn offset_for(&self, item: impl Into<IndexedItemRef>) -> u32 {
        let item = item.into();
        let index = self.factory.virtual_file_index(item, self.virtual_file_id);
        assert!(index >= MIN_VALID_VALUE, "Missing dependency: {item}");
        index as u32
    }
}

fn sort_and_index<T>(factory: &DexItemFactory, virtual_file_id: usize, mut items: Vec<T>) -> Vec<T>
where
    T: Copy + Into<IndexedItemRef>,
{
    items.sort_by(|a, b| factory.slow_compare((*a).into(), (*b).into()));
    items.dedup_by(|a, b| Into::<IndexedItemRef>::into(*a) == Into::<IndexedItemRef>::into(*b));
    for (index, &item) in items.iter().enumerate() {
        factory.assign_to_virtual_file(item, virtual_file_id);
        factory.assign_virtual_file_index(item, virtual_file_id, index as i32);
    }
    items
}

fn sort_classes(factory: &DexItemFactory, app: &DexApplication, mut classes: Vec<DexType>) -> Vec<DexType> {
    classes.sort_by(|a, b| factory.slow_compare((*a).into(), (*b).into()));
    classes.dedup();

    let members: FxHashSet<DexType> = classes.iter().copied().collect();
    let mut added = FxHashSet::default();
    let mut sorted = Vec::with_capacity(classes.len());
    for &class in &classes {
        add_after_super_types(app, class, &members, &mut added, &mut sorted);
    }
    sorted
}

fn add_after_super_types(
    app: &DexApplication,
    ty: DexType,
    members: &FxHashSet<DexType>,
    added: &mut FxHashSet<DexType>,
    sorted: &mut Vec<DexType>,
) {
    if !members.contains(&ty) || !added.insert(ty) {
        return;
    }
    if let Some(class) = app.definition_for(ty) {
        if let Some(super_type) = class.super_type {
            add_after_super_types(app, super_type, members, added, sorted);
        }
        for &iface in &class.interfaces {
            add_after_super_types(app, iface, members, added, sorted);
        }
    }
    sorted.push(ty);
}
