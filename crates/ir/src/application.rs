//! The set of classes being compiled, together with the classes they are
//! compiled against.
use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    class::{ClassKind, DexClass},
    factory::{DexItemFactory, DexType},
};

pub type ClassMap = IndexMap<DexType, DexClass>;

#[derive(Debug)]
pub struct DexApplication {
    factory: Arc<DexItemFactory>,
    program: ClassMap,
    classpath: ClassMap,
    library: ClassMap,
}

impl DexApplication {
    pub fn builder(factory: Arc<DexItemFactory>) -> DexApplicationBuilder {
        DexApplicationBuilder::new(factory)
    }

    pub fn factory(&self) -> &Arc<DexItemFactory> {
        &self.factory
    }

    /// Looks `ty` up in the program, then the classpath, then the library
    /// classes.
    pub fn definition_for(&self, ty: DexType) -> Option<&DexClass> {
        self.program
            .get(&ty)
            .or_else(|| self.classpath.get(&ty))
            .or_else(|| self.library.get(&ty))
    }

    pub fn program_definition_for(&self, ty: DexType) -> Option<&DexClass> {
        self.program.get(&ty)
    }

    pub fn program_definition_for_mut(&mut self, ty: DexType) -> Option<&mut DexClass> {
        self.program.get_mut(&ty)
    }

    /// Program classes in the order they were added.
    pub fn classes(&self) -> impl Iterator<Item = &DexClass> {
        self.program.values()
    }

    pub fn classes_mut(&mut self) -> impl Iterator<Item = &mut DexClass> {
        self.program.values_mut()
    }

    pub fn program_classes(&self) -> &ClassMap {
        &self.program
    }

    pub fn program_classes_mut(&mut self) -> &mut ClassMap {
        &mut self.program
    }

    pub fn classpath_classes(&self) -> impl Iterator<Item = &DexClass> {
        self.classpath.values()
    }

    pub fn library_classes(&self) -> impl Iterator<Item = &DexClass> {
        self.library.values()
    }
}

#[derive(Debug)]
pub struct DexApplicationBuilder {
    factory: Arc<DexItemFactory>,
    program: ClassMap,
    classpath: ClassMap,
    library: ClassMap,
}

impl DexApplicationBuilder {
    pub fn new(factory: Arc<DexItemFactory>) -> Self {
        Self {
            factory,
            program: ClassMap::default(),
            classpath: ClassMap::default(),
            library: ClassMap::default(),
        }
    }

    /// Adds `class` to the table of its kind. A class whose type is already
    /// present in that table is dropped.
    pub fn add_class(&mut self, class: DexClass) -> &mut Self {
        let table = match class.kind {
            ClassKind::Program => &mut self.program,
            ClassKind::Classpath => &mut self.classpath,
            ClassKind::Library => &mut self.library,
        };
        if table.contains_key(&class.ty) {
            tracing::warn!(
                class = %self.factory.type_to_source_string(class.ty),
                kind = %class.kind,
                "duplicate class definition, keeping the first one"
            );
        } else {
            table.insert(class.ty, class);
        }
        self
    }

    pub fn add_classes(&mut self, classes: impl IntoIterator<Item = DexClass>) -> &mut Self {
        for class in classes {
            self.add_class(class);
        }
        self
    }

    pub fn build(self) -> DexApplication {
        tracing::debug!(
            program = self.program.len(),
            classpath = self.classpath.len(),
            library = self.library.len(),
            "built application"
        );
        DexApplication {
            factory: self.factory,
            program: self.program,
            classpath: self.classpath,
            library: self.library,
        }
    }
}
