//! Member resolution along super type and interface chains.
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    application::DexApplication,
    class::{DexClass, DexEncodedField, DexEncodedMethod},
    error::{CompilationError, CompilationResult},
    factory::{DexField, DexItemFactory, DexMethod, DexType, IndexedItemRef},
    inst::InvokeType,
};

/// Position of a member inside its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberSlot {
    Direct(usize),
    Virtual(usize),
    Static(usize),
    Instance(usize),
}

type DefinitionTable = FxHashMap<IndexedItemRef, MemberSlot>;

/// A member that interface chain walks can return.
trait Member {
    /// The error to report if `self` and `other` are both candidates of one
    /// lookup.
    fn ambiguity_with(&self, other: &Self, factory: &DexItemFactory) -> Option<CompilationError>;
}

impl Member for DexEncodedMethod {
    fn ambiguity_with(&self, other: &Self, factory: &DexItemFactory) -> Option<CompilationError> {
        let is_default = |m: &DexEncodedMethod| !m.access_flags.is_static() && m.code.is_some();
        if std::ptr::eq(self, other) || !is_default(self) || !is_default(other) {
            return None;
        }
        let first = factory.method(self.method).holder;
        let second = factory.method(other.method).holder;
        Some(CompilationError::DuplicateDefaultMethods {
            method: factory.method_to_source_string(self.method),
            first: factory.type_to_source_string(first),
            second: factory.type_to_source_string(second),
        })
    }
}

impl Member for DexEncodedField {
    fn ambiguity_with(&self, _: &Self, _: &DexItemFactory) -> Option<CompilationError> {
        None
    }
}

/// Resolves symbolic member references against an application.
///
/// The member table of each type is computed on first use and shared by all
/// threads. Racing computations keep whichever table was inserted first.
#[derive(Debug)]
pub struct AppInfo {
    app: DexApplication,
    definitions: DashMap<DexType, Arc<DefinitionTable>>,
}

impl AppInfo {
    pub fn new(app: DexApplication) -> Self {
        Self {
            app,
            definitions: DashMap::new(),
        }
    }

    pub fn app(&self) -> &DexApplication {
        &self.app
    }

    /// Mutable access to the application. Cached member tables are dropped.
    pub fn app_mut(&mut self) -> &mut DexApplication {
        self.definitions.clear();
        &mut self.app
    }

    pub fn into_app(self) -> DexApplication {
        self.app
    }

    pub fn factory(&self) -> &DexItemFactory {
        self.app.factory()
    }

    pub fn definition_for(&self, ty: DexType) -> Option<&DexClass> {
        self.app.definition_for(ty)
    }

    /// The definition of exactly `method`, on its own holder.
    pub fn definition_for_method(&self, method: DexMethod) -> Option<&DexEncodedMethod> {
        let holder = self.factory().method(method).holder;
        let slot = *self.definitions_of(holder).get(&method.into())?;
        let class = self.definition_for(holder)?;
        match slot {
            MemberSlot::Direct(idx) => class.direct_methods().get(idx),
            MemberSlot::Virtual(idx) => class.virtual_methods().get(idx),
            MemberSlot::Static(_) | MemberSlot::Instance(_) => None,
        }
    }

    /// The definition of exactly `field`, on its own holder.
    pub fn definition_for_field(&self, field: DexField) -> Option<&DexEncodedField> {
        let holder = self.factory().field(field).holder;
        let slot = *self.definitions_of(holder).get(&field.into())?;
        let class = self.definition_for(holder)?;
        match slot {
            MemberSlot::Static(idx) => class.static_fields().get(idx),
            MemberSlot::Instance(idx) => class.instance_fields().get(idx),
            MemberSlot::Direct(_) | MemberSlot::Virtual(_) => None,
        }
    }

    fn definitions_of(&self, ty: DexType) -> Arc<DefinitionTable> {
        if let Some(table) = self.definitions.get(&ty) {
            return table.value().clone();
        }
        let table = Arc::new(self.compute_definitions(ty));
        self.definitions.entry(ty).or_insert(table).value().clone()
    }

    fn compute_definitions(&self, ty: DexType) -> DefinitionTable {
        let mut table = DefinitionTable::default();
        let Some(class) = self.definition_for(ty) else {
            return table;
        };
        let methods = class
            .direct_methods()
            .iter()
            .enumerate()
            .map(|(idx, m)| (m.method.into(), MemberSlot::Direct(idx)))
            .chain(
                class
                    .virtual_methods()
                    .iter()
                    .enumerate()
                    .map(|(idx, m)| (m.method.into(), MemberSlot::Virtual(idx))),
            );
        let fields = class
            .instance_fields()
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.field.into(), MemberSlot::Instance(idx)))
            .chain(
                class
                    .static_fields()
                    .iter()
                    .enumerate()
                    .map(|(idx, f)| (f.field.into(), MemberSlot::Static(idx))),
            );
        for (key, slot) in methods.chain(fields) {
            table.entry(key).or_insert(slot);
        }
        table
    }

    /// The static, private or constructor method matching `method`, searched
    /// along the super chain of its holder.
    pub fn lookup_direct_static_or_constructor_target(
        &self,
        method: DexMethod,
    ) -> Option<&DexEncodedMethod> {
        let holder = self.factory().method(method).holder;
        debug_assert!(self.factory().is_class_type(holder));
        self.lookup_along_super_chain(holder, |class| {
            class.find_direct_target(method, self.factory())
        })
    }

    /// Like [`Self::lookup_direct_static_or_constructor_target`], but only
    /// returns static methods.
    pub fn lookup_static_target(&self, method: DexMethod) -> Option<&DexEncodedMethod> {
        self.lookup_direct_static_or_constructor_target(method)
            .filter(|target| target.access_flags.is_static())
    }

    /// Like [`Self::lookup_direct_static_or_constructor_target`], but only
    /// returns private methods and constructors.
    pub fn lookup_direct_target(&self, method: DexMethod) -> Option<&DexEncodedMethod> {
        self.lookup_direct_static_or_constructor_target(method)
            .filter(|target| !target.access_flags.is_static())
    }

    /// Finds the virtual method that `method` dispatches to on `ty`.
    ///
    /// The super chain of `ty` is searched first. Failing that, default
    /// methods of the interfaces are considered; the first one found is the
    /// result, but two distinct default methods are an error.
    pub fn lookup_virtual_target(
        &self,
        ty: DexType,
        method: DexMethod,
    ) -> CompilationResult<Option<&DexEncodedMethod>> {
        let factory = self.factory();
        self.lookup_virtual(ty, method, |class| {
            class
                .find_virtual_target(method, factory)
                .filter(|target| target.code.is_some())
        })
    }

    /// Like [`Self::lookup_virtual_target`], but interface methods need not
    /// have a body.
    pub fn lookup_virtual_definition(
        &self,
        ty: DexType,
        method: DexMethod,
    ) -> CompilationResult<Option<&DexEncodedMethod>> {
        let factory = self.factory();
        self.lookup_virtual(ty, method, |class| class.find_virtual_target(method, factory))
    }

    fn lookup_virtual<'a>(
        &'a self,
        ty: DexType,
        method: DexMethod,
        interface_lookup: impl Fn(&'a DexClass) -> Option<&'a DexEncodedMethod>,
    ) -> CompilationResult<Option<&'a DexEncodedMethod>> {
        let factory = self.factory();
        debug_assert!(factory.is_class_type(ty));
        if let Some(target) =
            self.lookup_along_super_chain(ty, |class| class.find_virtual_target(method, factory))
        {
            return Ok(Some(target));
        }
        self.lookup_along_interface_chain_checked(ty, &interface_lookup)
    }

    pub fn lookup_instance_target(&self, ty: DexType, field: DexField) -> Option<&DexEncodedField> {
        debug_assert!(self.factory().is_class_type(ty));
        self.lookup_along_super_chain(ty, |class| {
            class.find_instance_target(field, self.factory())
        })
    }

    /// Finds the static field `field` on `ty`, its super chain or, failing
    /// that, its interfaces.
    pub fn lookup_static_target_field<'a>(
        &'a self,
        ty: DexType,
        field: DexField,
    ) -> Option<&'a DexEncodedField> {
        let factory = self.factory();
        debug_assert!(factory.is_class_type(ty));
        let lookup = move |class: &'a DexClass| class.find_static_target(field, factory);
        self.lookup_along_super_chain(ty, lookup).or_else(|| {
            let mut path = FxHashSet::default();
            let mut ambiguity = None;
            self.lookup_along_interface_chain(ty, &lookup, &mut path, &mut ambiguity)
        })
    }

    /// Resolves the target of an invoke of kind `ty`. Returns `None` if the
    /// holder is not a class type.
    pub fn lookup(
        &self,
        ty: InvokeType,
        method: DexMethod,
    ) -> CompilationResult<Option<&DexEncodedMethod>> {
        let holder = self.factory().method(method).holder;
        if !self.factory().is_class_type(holder) {
            return Ok(None);
        }
        match ty {
            InvokeType::Virtual | InvokeType::Interface => {
                self.lookup_virtual_definition(holder, method)
            }
            InvokeType::Direct => Ok(self.lookup_direct_target(method)),
            InvokeType::Static => Ok(self.lookup_static_target(method)),
            InvokeType::Super => self.lookup_virtual_target(holder, method),
            InvokeType::Polymorphic => Ok(None),
        }
    }

    /// Resolves an `invoke-super` of `method` issued from a method of
    /// `context`. Calls to interface methods resolve on the interface itself.
    pub fn lookup_super_target(
        &self,
        method: DexMethod,
        context: DexType,
    ) -> CompilationResult<Option<&DexEncodedMethod>> {
        let holder = self.factory().method(method).holder;
        if self
            .definition_for(holder)
            .is_some_and(DexClass::is_interface)
        {
            return self.lookup_virtual_target(holder, method);
        }
        match self.definition_for(context).and_then(|class| class.super_type) {
            Some(super_type) => self.lookup_virtual_target(super_type, method),
            None => Ok(None),
        }
    }

    /// Definitions of all transitive super types of `ty`: the super chain
    /// first, `ty` included, then the interfaces. Each class appears once.
    pub fn super_type_classes(&self, ty: DexType) -> Vec<&DexClass> {
        let mut seen = FxHashSet::default();
        let mut result = Vec::new();
        let mut current = Some(ty);
        while let Some(ty) = current {
            match self.definition_for(ty) {
                Some(class) if seen.insert(ty) => {
                    result.push(class);
                    current = class.super_type;
                }
                _ => break,
            }
        }

        let mut idx = 0;
        while idx < result.len() {
            for &iface in &result[idx].interfaces {
                if seen.insert(iface) {
                    if let Some(class) = self.definition_for(iface) {
                        result.push(class);
                    }
                }
            }
            idx += 1;
        }
        result
    }

    pub fn is_subtype(&self, sub: DexType, sup: DexType) -> bool {
        sub == sup
            || self
                .super_type_classes(sub)
                .iter()
                .any(|class| class.ty == sup)
    }

    fn lookup_along_super_chain<'a, T>(
        &'a self,
        ty: DexType,
        lookup: impl Fn(&'a DexClass) -> Option<&'a T>,
    ) -> Option<&'a T> {
        let mut seen = FxHashSet::default();
        let mut holder = self.definition_for(ty);
        while let Some(class) = holder {
            if !seen.insert(class.ty) {
                break;
            }
            if let Some(result) = lookup(class) {
                return Some(result);
            }
            holder = class.super_type.and_then(|ty| self.definition_for(ty));
        }
        None
    }

    /// Depth first search over `ty`, its super chain and its interfaces.
    /// `path` holds the types on the current search path.
    fn lookup_along_super_and_interface_chain<'a, T>(
        &'a self,
        ty: DexType,
        lookup: &dyn Fn(&'a DexClass) -> Option<&'a T>,
        path: &mut FxHashSet<DexType>,
    ) -> Option<&'a T> {
        if !path.insert(ty) {
            return None;
        }
        let result = self.definition_for(ty).and_then(|holder| {
            lookup(holder)
                .or_else(|| {
                    holder.super_type.and_then(|super_type| {
                        self.lookup_along_super_and_interface_chain(super_type, lookup, path)
                    })
                })
                .or_else(|| {
                    holder.interfaces.iter().find_map(|&iface| {
                        self.lookup_along_super_and_interface_chain(iface, lookup, path)
                    })
                })
        });
        path.remove(&ty);
        result
    }

    fn lookup_along_interface_chain_checked<'a, T: Member>(
        &'a self,
        ty: DexType,
        lookup: &dyn Fn(&'a DexClass) -> Option<&'a T>,
    ) -> CompilationResult<Option<&'a T>> {
        let mut path = FxHashSet::default();
        let mut ambiguity = None;
        let result = self.lookup_along_interface_chain(ty, lookup, &mut path, &mut ambiguity);
        match ambiguity {
            Some(err) => {
                tracing::debug!(%err, "ambiguous default method");
                Err(err)
            }
            None => Ok(result),
        }
    }

    /// Searches the interfaces of `ty` and of its super chain. The first
    /// result wins; the search continues to record an ambiguity between
    /// distinct candidates in `ambiguity`.
    fn lookup_along_interface_chain<'a, T: Member>(
        &'a self,
        ty: DexType,
        lookup: &dyn Fn(&'a DexClass) -> Option<&'a T>,
        path: &mut FxHashSet<DexType>,
        ambiguity: &mut Option<CompilationError>,
    ) -> Option<&'a T> {
        let holder = self.definition_for(ty)?;
        if !path.insert(ty) {
            return None;
        }

        let mut result: Option<&'a T> = None;
        let mut merge = |found: Option<&'a T>, ambiguity: &mut Option<CompilationError>| {
            let Some(found) = found else {
                return;
            };
            match result {
                Some(previous) => {
                    if ambiguity.is_none() {
                        *ambiguity = previous.ambiguity_with(found, self.factory());
                    }
                }
                None => result = Some(found),
            }
        };

        for &iface in &holder.interfaces {
            let found = self.lookup_along_super_and_interface_chain(iface, lookup, path);
            merge(found, ambiguity);
        }
        if let Some(super_type) = holder.super_type {
            let found = self.lookup_along_interface_chain(super_type, lookup, path, ambiguity);
            merge(found, ambiguity);
        }
        path.remove(&ty);
        result
    }
}
