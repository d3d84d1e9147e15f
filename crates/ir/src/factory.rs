//! Interning of symbolic items.
//!
//! Every string, type, prototype, field and method reference is minted by a
//! [`DexItemFactory`]. Equal content always yields the same handle, so handle
//! equality is the identity test used throughout the compiler.
use std::{cmp::Ordering, fmt, hash::Hash, sync::Arc};

use cranelift_entity::{entity_impl, EntityRef, PrimaryMap, SecondaryMap};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{indexed::IndexedItem, value::MoveType};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexString(u32);
entity_impl!(DexString, "string");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexType(u32);
entity_impl!(DexType, "type");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexProto(u32);
entity_impl!(DexProto, "proto");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexField(u32);
entity_impl!(DexField, "field");

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DexMethod(u32);
entity_impl!(DexMethod, "method");

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtoData {
    pub shorty: DexString,
    pub return_type: DexType,
    pub parameters: SmallVec<[DexType; 4]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldData {
    pub holder: DexType,
    pub ty: DexType,
    pub name: DexString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodData {
    pub holder: DexType,
    pub proto: DexProto,
    pub name: DexString,
}

/// A reference to any item that receives an index in the output tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexedItemRef {
    String(DexString),
    Type(DexType),
    Proto(DexProto),
    Field(DexField),
    Method(DexMethod),
}

macro_rules! impl_indexed_from {
    ($($variant:ident($ty:ty)),*) => {
        $(
            impl From<$ty> for IndexedItemRef {
                fn from(item: $ty) -> Self {
                    Self::$variant(item)
                }
            }
        )*
    };
}
impl_indexed_from!(
    String(DexString),
    Type(DexType),
    Proto(DexProto),
    Field(DexField),
    Method(DexMethod)
);

impl fmt::Display for IndexedItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Type(t) => write!(f, "{t}"),
            Self::Proto(p) => write!(f, "{p}"),
            Self::Field(fl) => write!(f, "{fl}"),
            Self::Method(m) => write!(f, "{m}"),
        }
    }
}

struct InternTable<K: EntityRef, V> {
    items: PrimaryMap<K, V>,
    rev: FxHashMap<V, K>,
    indices: SecondaryMap<K, IndexedItem>,
}

impl<K, V> Default for InternTable<K, V>
where
    K: EntityRef,
{
    fn default() -> Self {
        Self {
            items: PrimaryMap::new(),
            rev: FxHashMap::default(),
            indices: SecondaryMap::new(),
        }
    }
}

impl<K, V> InternTable<K, V>
where
    K: EntityRef,
    V: Clone + Eq + Hash,
{
    fn intern(&mut self, data: V) -> K {
        if let Some(&key) = self.rev.get(&data) {
            return key;
        }
        let key = self.items.push(data.clone());
        self.rev.insert(data, key);
        key
    }

    fn assign_sorted_indices(&mut self, mut cmp: impl FnMut(&V, &V) -> Ordering) {
        let mut keys: Vec<K> = self.items.keys().collect();
        keys.sort_by(|a, b| cmp(&self.items[*a], &self.items[*b]));
        for (index, key) in keys.into_iter().enumerate() {
            self.indices[key].set_sorted_index(index as i32);
        }
    }

    fn reset_sorted_indices(&mut self) {
        for key in self.items.keys() {
            self.indices[key].reset_sorted_index();
        }
    }
}

#[derive(Default)]
struct FactoryStore {
    strings: InternTable<DexString, Arc<str>>,
    types: InternTable<DexType, DexString>,
    protos: InternTable<DexProto, ProtoData>,
    fields: InternTable<DexField, FieldData>,
    methods: InternTable<DexMethod, MethodData>,
    sorted: bool,
}

impl FactoryStore {
    fn string(&mut self, s: &str) -> DexString {
        assert!(!self.sorted, "item creation after sorting: {s:?}");
        if let Some(&key) = self.strings.rev.get(s) {
            return key;
        }
        self.strings.intern(Arc::from(s))
    }

    fn ty(&mut self, descriptor: &str) -> DexType {
        let descriptor = self.string(descriptor);
        self.types.intern(descriptor)
    }

    fn str_of(&self, s: DexString) -> &str {
        &self.strings.items[s]
    }

    fn descriptor(&self, ty: DexType) -> &str {
        self.str_of(self.types.items[ty])
    }

    fn indexed_mut(&mut self, item: IndexedItemRef) -> &mut IndexedItem {
        match item {
            IndexedItemRef::String(s) => &mut self.strings.indices[s],
            IndexedItemRef::Type(t) => &mut self.types.indices[t],
            IndexedItemRef::Proto(p) => &mut self.protos.indices[p],
            IndexedItemRef::Field(f) => &mut self.fields.indices[f],
            IndexedItemRef::Method(m) => &mut self.methods.indices[m],
        }
    }

    fn indexed(&self, item: IndexedItemRef) -> &IndexedItem {
        match item {
            IndexedItemRef::String(s) => &self.strings.indices[s],
            IndexedItemRef::Type(t) => &self.types.indices[t],
            IndexedItemRef::Proto(p) => &self.protos.indices[p],
            IndexedItemRef::Field(f) => &self.fields.indices[f],
            IndexedItemRef::Method(m) => &self.methods.indices[m],
        }
    }
}

/// The single source of symbolic items.
///
/// All creation calls take a write lock; reads share a read lock. Once
/// [`DexItemFactory::sort`] has run no new items may be created.
pub struct DexItemFactory {
    store: RwLock<FactoryStore>,

    pub this_name: DexString,
    pub constructor_name: DexString,
    pub class_constructor_name: DexString,

    pub boolean_type: DexType,
    pub byte_type: DexType,
    pub char_type: DexType,
    pub short_type: DexType,
    pub int_type: DexType,
    pub long_type: DexType,
    pub float_type: DexType,
    pub double_type: DexType,
    pub void_type: DexType,
    pub object_type: DexType,
    pub string_type: DexType,
    pub class_type: DexType,
    pub throwable_type: DexType,
    pub runtime_exception_type: DexType,
}

impl Default for DexItemFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DexItemFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = self.store.read();
        f.debug_struct("DexItemFactory")
            .field("strings", &store.strings.items.len())
            .field("types", &store.types.items.len())
            .field("protos", &store.protos.items.len())
            .field("fields", &store.fields.items.len())
            .field("methods", &store.methods.items.len())
            .field("sorted", &store.sorted)
            .finish()
    }
}

impl DexItemFactory {
    pub fn new() -> Self {
        let mut store = FactoryStore::default();
        let this_name = store.string("this");
        let constructor_name = store.string("<init>");
        let class_constructor_name = store.string("<clinit>");
        let boolean_type = store.ty("Z");
        let byte_type = store.ty("B");
        let char_type = store.ty("C");
        let short_type = store.ty("S");
        let int_type = store.ty("I");
        let long_type = store.ty("J");
        let float_type = store.ty("F");
        let double_type = store.ty("D");
        let void_type = store.ty("V");
        let object_type = store.ty("Ljava/lang/Object;");
        let string_type = store.ty("Ljava/lang/String;");
        let class_type = store.ty("Ljava/lang/Class;");
        let throwable_type = store.ty("Ljava/lang/Throwable;");
        let runtime_exception_type = store.ty("Ljava/lang/RuntimeException;");

        Self {
            store: RwLock::new(store),
            this_name,
            constructor_name,
            class_constructor_name,
            boolean_type,
            byte_type,
            char_type,
            short_type,
            int_type,
            long_type,
            float_type,
            double_type,
            void_type,
            object_type,
            string_type,
            class_type,
            throwable_type,
            runtime_exception_type,
        }
    }

    pub fn create_string(&self, s: &str) -> DexString {
        self.store.write().string(s)
    }

    pub fn create_type(&self, descriptor: &str) -> DexType {
        self.store.write().ty(descriptor)
    }

    pub fn create_type_from(&self, descriptor: DexString) -> DexType {
        let mut store = self.store.write();
        assert!(!store.sorted, "item creation after sorting: {descriptor}");
        store.types.intern(descriptor)
    }

    /// Creates a prototype, deriving its shorty descriptor from the types.
    pub fn create_proto(&self, return_type: DexType, parameters: &[DexType]) -> DexProto {
        let mut store = self.store.write();
        let mut shorty = String::with_capacity(parameters.len() + 1);
        for &ty in std::iter::once(&return_type).chain(parameters) {
            shorty.push(shorty_char(store.descriptor(ty)));
        }
        let shorty = store.string(&shorty);
        store.protos.intern(ProtoData {
            shorty,
            return_type,
            parameters: parameters.into(),
        })
    }

    pub fn create_field(&self, holder: DexType, ty: DexType, name: &str) -> DexField {
        let mut store = self.store.write();
        let name = store.string(name);
        store.fields.intern(FieldData { holder, ty, name })
    }

    pub fn create_method(&self, holder: DexType, proto: DexProto, name: &str) -> DexMethod {
        let mut store = self.store.write();
        let name = store.string(name);
        store.methods.intern(MethodData {
            holder,
            proto,
            name,
        })
    }

    pub fn create_method_with_name(
        &self,
        holder: DexType,
        proto: DexProto,
        name: DexString,
    ) -> DexMethod {
        let mut store = self.store.write();
        assert!(!store.sorted, "item creation after sorting: {name}");
        store.methods.intern(MethodData {
            holder,
            proto,
            name,
        })
    }

    pub fn string(&self, s: DexString) -> Arc<str> {
        self.store.read().strings.items[s].clone()
    }

    pub fn descriptor(&self, ty: DexType) -> Arc<str> {
        let store = self.store.read();
        store.strings.items[store.types.items[ty]].clone()
    }

    pub fn descriptor_string(&self, ty: DexType) -> DexString {
        self.store.read().types.items[ty]
    }

    pub fn proto(&self, proto: DexProto) -> ProtoData {
        self.store.read().protos.items[proto].clone()
    }

    pub fn field(&self, field: DexField) -> FieldData {
        self.store.read().fields.items[field]
    }

    pub fn method(&self, method: DexMethod) -> MethodData {
        self.store.read().methods.items[method]
    }

    pub fn is_constructor(&self, method: DexMethod) -> bool {
        self.method(method).name == self.constructor_name
    }

    pub fn is_class_constructor(&self, method: DexMethod) -> bool {
        self.method(method).name == self.class_constructor_name
    }

    pub fn is_class_type(&self, ty: DexType) -> bool {
        self.descriptor(ty).starts_with('L')
    }

    pub fn is_array_type(&self, ty: DexType) -> bool {
        self.descriptor(ty).starts_with('[')
    }

    pub fn move_type_of(&self, ty: DexType) -> MoveType {
        MoveType::from_descriptor(&self.descriptor(ty))
    }

    /// Returns the package part of a class descriptor, e.g. `a/b` for `La/b/C;`.
    pub fn package_of(&self, ty: DexType) -> String {
        let descriptor = self.descriptor(ty);
        let body = descriptor.trim_start_matches('[');
        let body = body.strip_prefix('L').unwrap_or(body);
        match body.rfind('/') {
            Some(pos) => body[..pos].to_string(),
            None => String::new(),
        }
    }

    pub fn is_same_package(&self, a: DexType, b: DexType) -> bool {
        a == b || self.package_of(a) == self.package_of(b)
    }

    pub fn type_to_source_string(&self, ty: DexType) -> String {
        descriptor_to_source_string(&self.descriptor(ty))
    }

    pub fn method_to_source_string(&self, method: DexMethod) -> String {
        let data = self.method(method);
        format!(
            "{}.{}",
            self.type_to_source_string(data.holder),
            self.string(data.name)
        )
    }

    pub fn field_to_source_string(&self, field: DexField) -> String {
        let data = self.field(field);
        format!(
            "{}.{}",
            self.type_to_source_string(data.holder),
            self.string(data.name)
        )
    }

    /// Renders a method with its signature in smali style, e.g.
    /// `LA;->m(I)V`.
    pub fn method_to_smali_string(&self, method: DexMethod) -> String {
        let data = self.method(method);
        let store = self.store.read();
        let proto = &store.protos.items[data.proto];
        let mut s = format!(
            "{}->{}(",
            store.descriptor(data.holder),
            store.str_of(data.name)
        );
        for &param in &proto.parameters {
            s.push_str(store.descriptor(param));
        }
        s.push(')');
        s.push_str(store.descriptor(proto.return_type));
        s
    }

    /// Assigns a sorted index to every item.
    ///
    /// # Panics
    /// Panics if the factory is already sorted.
    pub fn sort(&self) {
        let mut store = self.store.write();
        assert!(!store.sorted, "the item factory can only be sorted once");
        let FactoryStore {
            strings,
            types,
            protos,
            fields,
            methods,
            sorted,
        } = &mut *store;

        strings.assign_sorted_indices(|a, b| utf16_cmp(a, b));
        let string_index = |s: &DexString| strings.indices[*s].sorted_index();
        types.assign_sorted_indices(|a, b| string_index(a).cmp(&string_index(b)));
        let type_index = |t: &DexType| types.indices[*t].sorted_index();
        protos.assign_sorted_indices(|a, b| {
            type_index(&a.return_type)
                .cmp(&type_index(&b.return_type))
                .then_with(|| {
                    a.parameters
                        .iter()
                        .map(type_index)
                        .cmp(b.parameters.iter().map(type_index))
                })
        });
        fields.assign_sorted_indices(|a, b| {
            type_index(&a.holder)
                .cmp(&type_index(&b.holder))
                .then_with(|| string_index(&a.name).cmp(&string_index(&b.name)))
                .then_with(|| type_index(&a.ty).cmp(&type_index(&b.ty)))
        });
        let proto_index = |p: &DexProto| protos.indices[*p].sorted_index();
        methods.assign_sorted_indices(|a, b| {
            type_index(&a.holder)
                .cmp(&type_index(&b.holder))
                .then_with(|| string_index(&a.name).cmp(&string_index(&b.name)))
                .then_with(|| proto_index(&a.proto).cmp(&proto_index(&b.proto)))
        });
        *sorted = true;

        tracing::debug!(
            strings = strings.items.len(),
            types = types.items.len(),
            protos = protos.items.len(),
            fields = fields.items.len(),
            methods = methods.items.len(),
            "sorted item factory"
        );
    }

    pub fn is_sorted(&self) -> bool {
        self.store.read().sorted
    }

    pub fn reset_sorted_indices(&self) {
        let mut store = self.store.write();
        if !store.sorted {
            return;
        }
        store.strings.reset_sorted_indices();
        store.types.reset_sorted_indices();
        store.protos.reset_sorted_indices();
        store.fields.reset_sorted_indices();
        store.methods.reset_sorted_indices();
        store.sorted = false;
    }

    pub fn sorted_index(&self, item: impl Into<IndexedItemRef>) -> Option<i32> {
        self.store.read().indexed(item.into()).sorted_index()
    }

    pub fn has_virtual_file_data(&self, item: impl Into<IndexedItemRef>, file: usize) -> bool {
        self.store.read().indexed(item.into()).has_virtual_file_data(file)
    }

    pub fn assign_to_virtual_file(&self, item: impl Into<IndexedItemRef>, file: usize) -> bool {
        let item = item.into();
        // Lock free fast path for items that are already associated.
        if self.store.read().indexed(item).has_virtual_file_data(file) {
            return false;
        }
        self.store.write().indexed_mut(item).assign_to_virtual_file(file)
    }

    pub fn assign_virtual_file_index(
        &self,
        item: impl Into<IndexedItemRef>,
        file: usize,
        index: i32,
    ) {
        self.store
            .write()
            .indexed_mut(item.into())
            .assign_virtual_file_index(file, index)
    }

    pub fn virtual_file_index(&self, item: impl Into<IndexedItemRef>, file: usize) -> i32 {
        self.store.read().indexed(item.into()).virtual_file_index(file)
    }

    pub fn all_types(&self) -> Vec<DexType> {
        self.store.read().types.items.keys().collect()
    }

    /// Orders two items of the same kind by their content, independent of
    /// any sorting state.
    pub fn slow_compare(&self, a: IndexedItemRef, b: IndexedItemRef) -> Ordering {
        let store = self.store.read();
        slow_compare(&store, a, b)
    }
}

fn slow_compare(store: &FactoryStore, a: IndexedItemRef, b: IndexedItemRef) -> Ordering {
    use IndexedItemRef as R;
    let ty_cmp = |x: DexType, y: DexType| utf16_cmp(store.descriptor(x), store.descriptor(y));
    let str_cmp = |x: DexString, y: DexString| utf16_cmp(store.str_of(x), store.str_of(y));
    let proto_cmp = |x: DexProto, y: DexProto| {
        let (px, py) = (&store.protos.items[x], &store.protos.items[y]);
        ty_cmp(px.return_type, py.return_type).then_with(|| {
            for (&l, &r) in px.parameters.iter().zip(&py.parameters) {
                let ord = ty_cmp(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            px.parameters.len().cmp(&py.parameters.len())
        })
    };

    match (a, b) {
        (R::String(x), R::String(y)) => str_cmp(x, y),
        (R::Type(x), R::Type(y)) => ty_cmp(x, y),
        (R::Proto(x), R::Proto(y)) => proto_cmp(x, y),
        (R::Field(x), R::Field(y)) => {
            let (fx, fy) = (store.fields.items[x], store.fields.items[y]);
            ty_cmp(fx.holder, fy.holder)
                .then_with(|| str_cmp(fx.name, fy.name))
                .then_with(|| ty_cmp(fx.ty, fy.ty))
        }
        (R::Method(x), R::Method(y)) => {
            let (mx, my) = (store.methods.items[x], store.methods.items[y]);
            ty_cmp(mx.holder, my.holder)
                .then_with(|| str_cmp(mx.name, my.name))
                .then_with(|| proto_cmp(mx.proto, my.proto))
        }
        _ => panic!("cannot compare items of different kinds: {a} and {b}"),
    }
}

/// Dex orders strings by their UTF-16 code units.
pub fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

fn shorty_char(descriptor: &str) -> char {
    match descriptor.as_bytes().first() {
        Some(b'[') => 'L',
        Some(&c) => c as char,
        None => panic!("empty type descriptor"),
    }
}

/// Converts `La/b/C;` to `a.b.C`, `[I` to `int[]` and so on.
pub fn descriptor_to_source_string(descriptor: &str) -> String {
    let dims = descriptor.bytes().take_while(|&c| c == b'[').count();
    let element = &descriptor[dims..];
    let mut s = match element.as_bytes().first() {
        Some(b'Z') => "boolean".to_string(),
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'V') => "void".to_string(),
        Some(b'L') => element[1..element.len().saturating_sub(1)].replace('/', "."),
        _ => element.to_string(),
    };
    for _ in 0..dims {
        s.push_str("[]");
    }
    s
}

/// Checks that `descriptor` has the shape `L<name>(/<name>)*;`.
pub fn is_valid_class_descriptor(descriptor: &str) -> bool {
    let Some(body) = descriptor
        .strip_prefix('L')
        .and_then(|body| body.strip_suffix(';'))
    else {
        return false;
    };
    !body.is_empty()
        && body.split('/').all(|name| {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| !matches!(c, '.' | ';' | '[' | '/' | '<' | '>') && !c.is_whitespace())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_identity() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("La/B;");
        let b = factory.create_type("La/B;");
        assert_eq!(a, b);
        assert_eq!(factory.create_type("I"), factory.int_type);

        let proto = factory.create_proto(factory.void_type, &[a, factory.long_type]);
        assert_eq!(
            proto,
            factory.create_proto(factory.void_type, &[a, factory.long_type])
        );
        assert_eq!(&*factory.string(factory.proto(proto).shorty), "VLJ");

        let m1 = factory.create_method(a, proto, "m");
        let m2 = factory.create_method(a, proto, "m");
        assert_eq!(m1, m2);
        assert_ne!(m1, factory.create_method(a, proto, "n"));
    }

    #[test]
    fn array_shorty_is_reference() {
        let factory = DexItemFactory::new();
        let arr = factory.create_type("[[I");
        let proto = factory.create_proto(arr, &[factory.int_type]);
        assert_eq!(&*factory.string(factory.proto(proto).shorty), "LI");
    }

    #[test]
    fn packages() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("Lcom/x/A;");
        let b = factory.create_type("Lcom/x/B;");
        let c = factory.create_type("Lcom/y/C;");
        let d = factory.create_type("LD;");
        assert!(factory.is_same_package(a, b));
        assert!(!factory.is_same_package(a, c));
        assert_eq!(factory.package_of(d), "");
        assert_eq!(factory.type_to_source_string(a), "com.x.A");
        assert_eq!(descriptor_to_source_string("[[J"), "long[][]");
    }

    #[test]
    fn class_descriptor_validation() {
        assert!(is_valid_class_descriptor("La/b/C;"));
        assert!(is_valid_class_descriptor("LC;"));
        assert!(!is_valid_class_descriptor("L;"));
        assert!(!is_valid_class_descriptor("La//C;"));
        assert!(!is_valid_class_descriptor("La.b;"));
        assert!(!is_valid_class_descriptor("I"));
    }

    #[test]
    fn sort_assigns_content_order() {
        let factory = DexItemFactory::new();
        let b = factory.create_type("LB;");
        let a = factory.create_type("LA;");
        factory.sort();
        assert!(factory.sorted_index(a) < factory.sorted_index(b));
        assert!(factory.is_sorted());

        factory.reset_sorted_indices();
        assert!(!factory.is_sorted());
        assert_eq!(factory.sorted_index(a), None);
    }

    #[test]
    #[should_panic(expected = "item creation after sorting")]
    fn no_creation_after_sort() {
        let factory = DexItemFactory::new();
        factory.sort();
        factory.create_string("late");
    }

    #[test]
    fn utf16_order_differs_from_code_points() {
        // U+FB01 sorts after a surrogate pair in UTF-16 but before it in UTF-8.
        let bmp = "\u{fb01}";
        let astral = "\u{1f600}";
        assert_eq!(utf16_cmp(bmp, astral), Ordering::Greater);
        assert_eq!(bmp.cmp(astral), Ordering::Less);
    }
}
