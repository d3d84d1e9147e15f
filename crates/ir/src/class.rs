//! Class definitions and their encoded members.
use std::fmt;

use crate::{
    access::AccessFlags,
    debug::DexDebugInfo,
    error::{CompilationError, CompilationResult},
    factory::{is_valid_class_descriptor, DexField, DexItemFactory, DexMethod, DexString, DexType},
};

/// `const v0, #+0` in the 31i format, three code units.
const CONST_V0_ZERO: [u16; 3] = [0x0014, 0x0000, 0x0000];
/// `throw v0`.
const THROW_V0: u16 = 0x0027;
const RETURN_VOID: u16 = 0x000e;

/// Which collection a class definition was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Program,
    Classpath,
    Library,
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Program => "program",
            Self::Classpath => "classpath",
            Self::Library => "library",
        };
        f.write_str(s)
    }
}

/// Visibility scope across which code may be moved by inlining.
///
/// Ordered from most to least restrictive, so the weakest constraint of a
/// set is its minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Constraint {
    Never,
    Private,
    Package,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompilationState {
    #[default]
    NotProcessed,
    ProcessedNotInliningCandidate,
    /// The body only touches public entities.
    ProcessedInliningCandidatePublic,
    /// The body touches package private entities too.
    ProcessedInliningCandidatePackagePrivate,
    /// The body touches private entities of its own class.
    ProcessedInliningCandidatePrivate,
}

/// Facts gathered about a method by earlier optimization passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizationInfo {
    returned_argument: Option<u32>,
    never_returns_null: bool,
    returned_constant: Option<i64>,
    force_inline: bool,
}

impl OptimizationInfo {
    pub fn returns_argument(&self) -> bool {
        self.returned_argument.is_some()
    }

    pub fn returned_argument(&self) -> Option<u32> {
        self.returned_argument
    }

    pub fn never_returns_null(&self) -> bool {
        self.never_returns_null
    }

    pub fn returns_constant(&self) -> bool {
        self.returned_constant.is_some()
    }

    pub fn returned_constant(&self) -> Option<i64> {
        self.returned_constant
    }

    pub fn force_inline(&self) -> bool {
        self.force_inline
    }
}

/// Header of a method body. The instruction stream itself is produced and
/// consumed outside of this crate; only templates built here carry code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexCode {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    /// Size of the instruction stream in 16-bit code units.
    pub instructions_size: u32,
    pub insns: Vec<u16>,
    pub debug_info: Option<DexDebugInfo>,
}

impl DexCode {
    pub fn new(registers_size: u16, ins_size: u16, outs_size: u16, insns: Vec<u16>) -> Self {
        Self {
            registers_size,
            ins_size,
            outs_size,
            instructions_size: insns.len() as u32,
            insns,
            debug_info: None,
        }
    }

    pub fn is_empty_void_method(&self) -> bool {
        self.insns == [RETURN_VOID]
    }
}

/// A constant initial value of a static field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DexValue {
    Null,
    Boolean(bool),
    Number(i64),
    String(DexString),
    Type(DexType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexEncodedField {
    pub field: DexField,
    pub access_flags: AccessFlags,
    pub static_value: Option<DexValue>,
}

impl DexEncodedField {
    pub fn new(field: DexField, access_flags: AccessFlags) -> Self {
        Self {
            field,
            access_flags,
            static_value: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DexEncodedMethod {
    pub method: DexMethod,
    pub access_flags: AccessFlags,
    pub code: Option<DexCode>,
    compilation_state: CompilationState,
    optimization_info: Option<OptimizationInfo>,
}

impl DexEncodedMethod {
    /// # Panics
    /// Panics if an abstract method is given code.
    pub fn new(method: DexMethod, access_flags: AccessFlags, code: Option<DexCode>) -> Self {
        assert!(
            !(access_flags.is_abstract() && code.is_some()),
            "abstract method {method} with code"
        );
        Self {
            method,
            access_flags,
            code,
            compilation_state: CompilationState::NotProcessed,
            optimization_info: None,
        }
    }

    pub fn compilation_state(&self) -> CompilationState {
        self.compilation_state
    }

    pub fn is_processed(&self) -> bool {
        self.compilation_state != CompilationState::NotProcessed
    }

    pub fn mark_processed(&mut self, constraint: Constraint) {
        self.compilation_state = match constraint {
            Constraint::Always => CompilationState::ProcessedInliningCandidatePublic,
            Constraint::Package => CompilationState::ProcessedInliningCandidatePackagePrivate,
            Constraint::Private => CompilationState::ProcessedInliningCandidatePrivate,
            Constraint::Never => CompilationState::ProcessedNotInliningCandidate,
        };
    }

    pub fn mark_not_processed(&mut self) {
        self.compilation_state = CompilationState::NotProcessed;
    }

    /// Returns `true` if this method may be inlined into `container`.
    ///
    /// A forced inline of a processed method is always allowed, except that a
    /// constructor only goes into methods of its own class.
    pub fn is_inlining_candidate(
        &self,
        container: &DexEncodedMethod,
        always_inline: bool,
        factory: &DexItemFactory,
    ) -> bool {
        if container.access_flags.is_static() && container.access_flags.is_constructor() {
            return false;
        }
        let holder = factory.method(self.method).holder;
        let container_holder = factory.method(container.method).holder;

        if always_inline && self.is_processed() {
            if !self.access_flags.is_static() && self.access_flags.is_constructor() {
                return container_holder == holder;
            }
            return true;
        }
        match self.compilation_state {
            CompilationState::ProcessedInliningCandidatePublic => true,
            CompilationState::ProcessedInliningCandidatePackagePrivate => {
                factory.is_same_package(container_holder, holder)
            }
            CompilationState::ProcessedInliningCandidatePrivate => container_holder == holder,
            CompilationState::NotProcessed
            | CompilationState::ProcessedNotInliningCandidate => false,
        }
    }

    /// The optimization facts, `None` if nothing was recorded yet.
    pub fn optimization_info(&self) -> Option<&OptimizationInfo> {
        self.optimization_info.as_ref()
    }

    fn optimization_info_mut(&mut self) -> &mut OptimizationInfo {
        self.optimization_info.get_or_insert_with(Default::default)
    }

    pub fn mark_returns_argument(&mut self, argument: u32) {
        let info = self.optimization_info_mut();
        assert!(
            info.returned_argument.map_or(true, |current| current == argument),
            "method returns two different arguments"
        );
        info.returned_argument = Some(argument);
    }

    pub fn mark_never_returns_null(&mut self) {
        self.optimization_info_mut().never_returns_null = true;
    }

    pub fn mark_returns_constant(&mut self, value: i64) {
        let info = self.optimization_info_mut();
        assert!(
            info.returned_constant.map_or(true, |current| current == value),
            "method returns two different constants"
        );
        info.returned_constant = Some(value);
    }

    pub fn mark_force_inline(&mut self) {
        self.optimization_info_mut().force_inline = true;
    }

    pub fn force_inline(&self) -> bool {
        self.optimization_info
            .as_ref()
            .is_some_and(OptimizationInfo::force_inline)
    }

    pub fn to_abstract_method(&mut self) {
        self.access_flags.set_abstract();
        self.code = None;
    }

    /// Replaces the body by `const v0, #0; throw v0`.
    pub fn to_empty_throwing_method(&mut self, factory: &DexItemFactory) {
        let proto = factory.proto(factory.method(self.method).proto);
        let mut arg_registers = u32::from(!self.access_flags.is_static());
        for &param in &proto.parameters {
            arg_registers += factory.move_type_of(param).required_registers();
        }
        let arg_registers = arg_registers as u16;
        let mut insns = CONST_V0_ZERO.to_vec();
        insns.push(THROW_V0);
        self.code = Some(DexCode::new(
            arg_registers.max(1),
            arg_registers,
            0,
            insns,
        ));
    }
}

/// A class definition.
#[derive(Debug, Clone)]
pub struct DexClass {
    pub ty: DexType,
    pub super_type: Option<DexType>,
    pub interfaces: Vec<DexType>,
    pub access_flags: AccessFlags,
    pub source_file: Option<DexString>,
    pub kind: ClassKind,
    static_fields: Vec<DexEncodedField>,
    instance_fields: Vec<DexEncodedField>,
    direct_methods: Vec<DexEncodedMethod>,
    virtual_methods: Vec<DexEncodedMethod>,
}

impl DexClass {
    pub fn new(
        factory: &DexItemFactory,
        kind: ClassKind,
        ty: DexType,
        access_flags: AccessFlags,
        super_type: Option<DexType>,
        interfaces: Vec<DexType>,
    ) -> CompilationResult<Self> {
        if super_type == Some(ty) {
            return Err(CompilationError::ClassExtendsItself(
                factory.type_to_source_string(ty),
            ));
        }
        if interfaces.contains(&ty) {
            return Err(CompilationError::InterfaceImplementsItself(
                factory.type_to_source_string(ty),
            ));
        }
        let descriptor = factory.descriptor(ty);
        if !is_valid_class_descriptor(&descriptor) {
            return Err(CompilationError::InvalidClassDescriptor(
                descriptor.to_string(),
            ));
        }

        Ok(Self {
            ty,
            super_type,
            interfaces,
            access_flags,
            source_file: None,
            kind,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
        })
    }

    /// Sets the members read together with the class.
    pub fn with_members(
        mut self,
        static_fields: Vec<DexEncodedField>,
        instance_fields: Vec<DexEncodedField>,
        direct_methods: Vec<DexEncodedMethod>,
        virtual_methods: Vec<DexEncodedMethod>,
    ) -> Self {
        self.static_fields = static_fields;
        self.instance_fields = instance_fields;
        self.direct_methods = direct_methods;
        self.virtual_methods = virtual_methods;
        self
    }

    pub fn is_program_class(&self) -> bool {
        self.kind == ClassKind::Program
    }

    pub fn is_classpath_class(&self) -> bool {
        self.kind == ClassKind::Classpath
    }

    pub fn is_library_class(&self) -> bool {
        self.kind == ClassKind::Library
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    pub fn static_fields(&self) -> &[DexEncodedField] {
        &self.static_fields
    }

    pub fn instance_fields(&self) -> &[DexEncodedField] {
        &self.instance_fields
    }

    pub fn direct_methods(&self) -> &[DexEncodedMethod] {
        &self.direct_methods
    }

    pub fn virtual_methods(&self) -> &[DexEncodedMethod] {
        &self.virtual_methods
    }

    pub fn methods(&self) -> impl Iterator<Item = &DexEncodedMethod> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }

    pub fn fields(&self) -> impl Iterator<Item = &DexEncodedField> {
        self.static_fields.iter().chain(&self.instance_fields)
    }

    pub fn methods_mut(&mut self) -> impl Iterator<Item = &mut DexEncodedMethod> {
        self.assert_program_class();
        self.direct_methods
            .iter_mut()
            .chain(self.virtual_methods.iter_mut())
    }

    pub fn fields_mut(&mut self) -> impl Iterator<Item = &mut DexEncodedField> {
        self.assert_program_class();
        self.static_fields
            .iter_mut()
            .chain(self.instance_fields.iter_mut())
    }

    pub fn add_direct_method(&mut self, method: DexEncodedMethod) {
        self.assert_program_class();
        self.direct_methods.push(method);
    }

    pub fn add_virtual_method(&mut self, method: DexEncodedMethod) {
        self.assert_program_class();
        self.virtual_methods.push(method);
    }

    pub fn remove_direct_method(&mut self, method: DexMethod) -> Option<DexEncodedMethod> {
        self.assert_program_class();
        let idx = self.direct_methods.iter().position(|m| m.method == method)?;
        Some(self.direct_methods.remove(idx))
    }

    /// All methods ordered by holder, name and prototype.
    pub fn all_methods_sorted(&self, factory: &DexItemFactory) -> Vec<&DexEncodedMethod> {
        let mut methods: Vec<_> = self.methods().collect();
        methods.sort_by(|a, b| factory.slow_compare(a.method.into(), b.method.into()));
        methods
    }

    /// The direct method with the name and prototype of `method`. The holder
    /// of `method` is ignored.
    pub fn find_direct_target(
        &self,
        method: DexMethod,
        factory: &DexItemFactory,
    ) -> Option<&DexEncodedMethod> {
        find_method(&self.direct_methods, method, factory)
    }

    pub fn find_virtual_target(
        &self,
        method: DexMethod,
        factory: &DexItemFactory,
    ) -> Option<&DexEncodedMethod> {
        find_method(&self.virtual_methods, method, factory)
    }

    pub fn find_static_target(
        &self,
        field: DexField,
        factory: &DexItemFactory,
    ) -> Option<&DexEncodedField> {
        find_field(&self.static_fields, field, factory)
    }

    pub fn find_instance_target(
        &self,
        field: DexField,
        factory: &DexItemFactory,
    ) -> Option<&DexEncodedField> {
        find_field(&self.instance_fields, field, factory)
    }

    pub fn class_initializer(&self) -> Option<&DexEncodedMethod> {
        self.direct_methods
            .iter()
            .find(|m| m.access_flags.is_constructor() && m.access_flags.is_static())
    }

    pub fn has_class_initializer(&self) -> bool {
        self.class_initializer().is_some()
    }

    pub fn has_non_trivial_class_initializer(&self) -> bool {
        self.class_initializer()
            .and_then(|clinit| clinit.code.as_ref())
            .is_some_and(|code| !code.is_empty_void_method())
    }

    fn assert_program_class(&self) {
        assert!(
            self.is_program_class(),
            "{} class {} is immutable",
            self.kind,
            self.ty
        );
    }
}

fn find_method<'a>(
    methods: &'a [DexEncodedMethod],
    method: DexMethod,
    factory: &DexItemFactory,
) -> Option<&'a DexEncodedMethod> {
    let wanted = factory.method(method);
    methods.iter().find(|candidate| {
        let data = factory.method(candidate.method);
        data.name == wanted.name && data.proto == wanted.proto
    })
}

fn find_field<'a>(
    fields: &'a [DexEncodedField],
    field: DexField,
    factory: &DexItemFactory,
) -> Option<&'a DexEncodedField> {
    let wanted = factory.field(field);
    fields.iter().find(|candidate| {
        let data = factory.field(candidate.field);
        data.name == wanted.name && data.ty == wanted.ty
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(factory: &DexItemFactory, holder: &str, name: &str) -> DexMethod {
        let holder = factory.create_type(holder);
        let proto = factory.create_proto(factory.void_type, &[]);
        factory.create_method(holder, proto, name)
    }

    #[test]
    fn rejects_malformed_classes() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("La/A;");
        let err = DexClass::new(
            &factory,
            ClassKind::Program,
            a,
            AccessFlags::PUBLIC,
            Some(a),
            vec![],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Class a.A cannot extend itself");

        let err = DexClass::new(
            &factory,
            ClassKind::Program,
            a,
            AccessFlags::INTERFACE,
            Some(factory.object_type),
            vec![a],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Interface a.A cannot implement itself");

        let bad = factory.create_type("La.b;");
        let err = DexClass::new(&factory, ClassKind::Program, bad, AccessFlags::PUBLIC, None, vec![])
            .unwrap_err();
        assert_eq!(
            err,
            CompilationError::InvalidClassDescriptor("La.b;".to_string())
        );
    }

    #[test]
    fn targets_match_name_and_proto() {
        let factory = DexItemFactory::new();
        let ty = factory.create_type("LSub;");
        let own = method(&factory, "LSub;", "m");
        let class = DexClass::new(
            &factory,
            ClassKind::Program,
            ty,
            AccessFlags::PUBLIC,
            Some(factory.object_type),
            vec![],
        )
        .unwrap()
        .with_members(
            vec![],
            vec![],
            vec![],
            vec![DexEncodedMethod::new(own, AccessFlags::PUBLIC, None)],
        );

        let inherited = method(&factory, "LSuper;", "m");
        assert_eq!(
            class.find_virtual_target(inherited, &factory).map(|m| m.method),
            Some(own)
        );
        assert!(class.find_direct_target(inherited, &factory).is_none());
        let other = method(&factory, "LSuper;", "n");
        assert!(class.find_virtual_target(other, &factory).is_none());
    }

    #[test]
    #[should_panic(expected = "is immutable")]
    fn library_classes_are_immutable() {
        let factory = DexItemFactory::new();
        let ty = factory.create_type("Ljava/util/List;");
        let mut class = DexClass::new(
            &factory,
            ClassKind::Library,
            ty,
            AccessFlags::PUBLIC | AccessFlags::INTERFACE,
            Some(factory.object_type),
            vec![],
        )
        .unwrap();
        let m = method(&factory, "Ljava/util/List;", "size");
        class.add_virtual_method(DexEncodedMethod::new(m, AccessFlags::PUBLIC, None));
    }

    #[test]
    fn optimization_info_is_lazy() {
        let factory = DexItemFactory::new();
        let mut m = DexEncodedMethod::new(method(&factory, "LA;", "m"), AccessFlags::STATIC, None);
        assert!(m.optimization_info().is_none());
        assert!(!m.force_inline());
        m.mark_returns_constant(7);
        m.mark_returns_constant(7);
        let info = m.optimization_info().unwrap();
        assert_eq!(info.returned_constant(), Some(7));
        assert!(!info.returns_argument());
    }

    #[test]
    fn stubs() {
        let factory = DexItemFactory::new();
        let holder = factory.create_type("LA;");
        let proto = factory.create_proto(factory.void_type, &[factory.long_type, factory.int_type]);
        let m = factory.create_method(holder, proto, "m");
        let mut encoded = DexEncodedMethod::new(m, AccessFlags::PUBLIC, None);

        encoded.to_empty_throwing_method(&factory);
        let code = encoded.code.as_ref().unwrap();
        assert_eq!((code.registers_size, code.ins_size, code.outs_size), (4, 4, 0));
        assert_eq!(code.instructions_size, 4);
        assert_eq!(code.insns, vec![0x0014, 0x0000, 0x0000, 0x0027]);

        encoded.to_abstract_method();
        assert!(encoded.access_flags.is_abstract());
        assert!(encoded.code.is_none());
    }

    #[test]
    fn inlining_candidates() {
        let factory = DexItemFactory::new();
        let mut callee = DexEncodedMethod::new(
            method(&factory, "Lp/A;", "m"),
            AccessFlags::PRIVATE,
            None,
        );
        let same_class = DexEncodedMethod::new(method(&factory, "Lp/A;", "n"), AccessFlags::PUBLIC, None);
        let same_package =
            DexEncodedMethod::new(method(&factory, "Lp/B;", "n"), AccessFlags::PUBLIC, None);
        let elsewhere =
            DexEncodedMethod::new(method(&factory, "Lq/C;", "n"), AccessFlags::PUBLIC, None);

        assert!(!callee.is_inlining_candidate(&same_class, false, &factory));

        callee.mark_processed(Constraint::Private);
        assert!(callee.is_inlining_candidate(&same_class, false, &factory));
        assert!(!callee.is_inlining_candidate(&same_package, false, &factory));

        callee.mark_processed(Constraint::Package);
        assert!(callee.is_inlining_candidate(&same_package, false, &factory));
        assert!(!callee.is_inlining_candidate(&elsewhere, false, &factory));

        callee.mark_processed(Constraint::Never);
        assert!(!callee.is_inlining_candidate(&same_class, false, &factory));
        assert!(callee.is_inlining_candidate(&elsewhere, true, &factory));
    }

    #[test]
    fn forced_constructor_stays_in_class() {
        let factory = DexItemFactory::new();
        let mut init = DexEncodedMethod::new(
            method(&factory, "Lp/A;", "<init>"),
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            None,
        );
        init.mark_processed(Constraint::Always);
        let same_class = DexEncodedMethod::new(method(&factory, "Lp/A;", "n"), AccessFlags::PUBLIC, None);
        let other = DexEncodedMethod::new(method(&factory, "Lp/B;", "n"), AccessFlags::PUBLIC, None);
        assert!(init.is_inlining_candidate(&same_class, true, &factory));
        assert!(!init.is_inlining_candidate(&other, true, &factory));
        assert!(init.is_inlining_candidate(&other, false, &factory));
    }
}
