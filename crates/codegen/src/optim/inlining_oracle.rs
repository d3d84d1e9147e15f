use rustc_hash::FxHashSet;

use dexopt_ir::{DexEncodedMethod, DexMethod, InstId, InstKind, InvokeType, IrCode, ValueId};

use super::inliner::{CallGraphInfo, Inliner};

/// Why a call site was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The target is marked for forced inlining, e.g. a bridge.
    Force,
    SingleCaller,
    DualCaller,
    /// The target is small enough on its own.
    Simple,
}

#[derive(Debug, Clone, Copy)]
pub struct InlineAction<'a> {
    pub target: &'a DexEncodedMethod,
    pub invoke: InstId,
    pub reason: Reason,
}

impl InlineAction<'_> {
    /// Returns `true` if the action ignores the instruction allowance.
    pub fn force_inline(&self) -> bool {
        self.reason != Reason::Simple
    }
}

/// Decides, call site by call site, what to inline into one method.
pub struct InliningOracle<'i, 'a> {
    inliner: &'i Inliner<'a>,
    method: &'i DexEncodedMethod,
    receiver: Option<ValueId>,
    call_graph: &'i dyn CallGraphInfo,
    /// Calls whose receiver is proven non-null by a dominating call.
    dominated_calls: FxHashSet<InstId>,
}

impl<'i, 'a> InliningOracle<'i, 'a> {
    pub fn new(
        inliner: &'i Inliner<'a>,
        method: &'i DexEncodedMethod,
        receiver: Option<ValueId>,
        call_graph: &'i dyn CallGraphInfo,
        dominated_calls: FxHashSet<InstId>,
    ) -> Self {
        Self {
            inliner,
            method,
            receiver,
            call_graph,
            dominated_calls,
        }
    }

    /// Returns the inlining to perform for `inst`, if any.
    pub fn compute_inlining(&self, code: &IrCode, inst: InstId) -> Option<InlineAction<'a>> {
        let InstKind::Invoke { ty, method } = *code.dfg.inst_kind(inst) else {
            return None;
        };
        match ty {
            InvokeType::Static => self.compute_for_invoke_static(code, inst, method),
            InvokeType::Direct | InvokeType::Virtual | InvokeType::Interface => {
                self.compute_for_invoke_with_receiver(code, inst, ty, method)
            }
            InvokeType::Super | InvokeType::Polymorphic => None,
        }
    }

    fn compute_for_invoke_with_receiver(
        &self,
        code: &IrCode,
        inst: InstId,
        ty: InvokeType,
        method: DexMethod,
    ) -> Option<InlineAction<'a>> {
        let &receiver = code.dfg.inst_args(inst).first()?;
        if !self.receiver_is_never_null(code, inst, receiver) {
            self.exclude(method, "receiver may be null");
            return None;
        }
        let target = self.validate_candidate(code, inst, ty, method)?;
        if target.method == self.method.method {
            self.exclude(method, "recursive call");
            return None;
        }
        let reason = self.compute_inlining_reason(target);
        self.finish_candidate(inst, target, reason)
    }

    fn compute_for_invoke_static(
        &self,
        code: &IrCode,
        inst: InstId,
        method: DexMethod,
    ) -> Option<InlineAction<'a>> {
        let target = self.validate_candidate(code, inst, InvokeType::Static, method)?;
        if target.method == self.method.method {
            self.exclude(method, "recursive call");
            return None;
        }
        if !self.can_inline_static_invoke(target) {
            self.exclude(method, "class initializer may have side effects");
            return None;
        }
        let reason = self.compute_inlining_reason(target);
        self.finish_candidate(inst, target, reason)
    }

    fn finish_candidate(
        &self,
        inst: InstId,
        target: &'a DexEncodedMethod,
        reason: Reason,
    ) -> Option<InlineAction<'a>> {
        let factory = self.inliner.app_info().factory();
        if !target.is_inlining_candidate(self.method, reason == Reason::Force, factory) {
            self.exclude(target.method, "not an inlining candidate");
            return None;
        }
        if reason == Reason::DualCaller && !self.inliner.double_inlining(self.method.method, target.method)
        {
            return None;
        }
        tracing::trace!(
            target = %factory.method_to_source_string(target.method),
            ?reason,
            "inline candidate"
        );
        Some(InlineAction {
            target,
            invoke: inst,
            reason,
        })
    }

    fn receiver_is_never_null(&self, code: &IrCode, inst: InstId, receiver: ValueId) -> bool {
        let value = code.dfg.value(receiver);
        Some(receiver) == self.receiver
            || value.is_never_null()
            || self.dominated_calls.contains(&inst)
            || value
                .definition()
                .is_some_and(|def| matches!(code.dfg.inst_kind(def), InstKind::NewInstance(_)))
    }

    /// Returns the only method an invoke can reach, if it has code in a
    /// non-library class, is visible from the caller and takes as many
    /// arguments as the call passes. Synchronized targets are rejected.
    fn validate_candidate(
        &self,
        code: &IrCode,
        inst: InstId,
        ty: InvokeType,
        method: DexMethod,
    ) -> Option<&'a DexEncodedMethod> {
        let app_info = self.inliner.app_info();
        let factory = app_info.factory();
        let Some(target) = self.single_target(ty, method) else {
            self.exclude(method, "no single target");
            return None;
        };
        if target.code.is_none() {
            self.exclude(method, "no code");
            return None;
        }
        let holder = factory.method(target.method).holder;
        let Some(class) = app_info.definition_for(holder) else {
            self.exclude(method, "not a program class");
            return None;
        };
        // The call must keep raising IncompatibleClassChangeError at runtime.
        if ty.has_receiver() && class.is_interface() {
            self.exclude(method, "holder is an interface");
            return None;
        }
        if class.is_library_class() {
            self.exclude(method, "not a program class");
            return None;
        }
        if target.access_flags.is_synchronized() {
            self.exclude(method, "target is synchronized");
            return None;
        }
        if !self.inliner.has_inlining_access(self.method, target) {
            self.exclude(method, "no access to target");
            return None;
        }
        let arguments = code.dfg.inst_args(inst).len() - usize::from(ty.has_receiver());
        let arity = factory.proto(factory.method(target.method).proto).parameters.len();
        if arguments != arity {
            self.exclude(method, "argument count mismatch");
            return None;
        }
        Some(target)
    }

    /// Resolves `method` and, for virtual dispatch, makes sure no subtype of
    /// the holder overrides the resolved method with another body.
    fn single_target(&self, ty: InvokeType, method: DexMethod) -> Option<&'a DexEncodedMethod> {
        let app_info = self.inliner.app_info();
        let factory = app_info.factory();
        match ty {
            InvokeType::Static | InvokeType::Direct => app_info.lookup(ty, method).ok().flatten(),
            InvokeType::Virtual | InvokeType::Interface => {
                let holder = factory.method(method).holder;
                let mut found = app_info.lookup_virtual_target(holder, method).ok().flatten();
                for class in app_info.app().program_classes().values() {
                    if class.ty == holder || !app_info.is_subtype(class.ty, holder) {
                        continue;
                    }
                    let Some(candidate) = class.find_virtual_target(method, factory) else {
                        continue;
                    };
                    if candidate.code.is_none() {
                        continue;
                    }
                    match found {
                        Some(current) if current.method != candidate.method => return None,
                        _ => found = Some(candidate),
                    }
                }
                found
            }
            InvokeType::Super | InvokeType::Polymorphic => None,
        }
    }

    fn compute_inlining_reason(&self, target: &DexEncodedMethod) -> Reason {
        if target.force_inline() {
            Reason::Force
        } else if self.call_graph.has_single_call_site(target.method) {
            Reason::SingleCaller
        } else if self.is_double_inlining_target(target) {
            Reason::DualCaller
        } else {
            Reason::Simple
        }
    }

    fn is_double_inlining_target(&self, target: &DexEncodedMethod) -> bool {
        let limit = self.inliner.config.double_inline_instruction_limit;
        self.call_graph.has_double_call_site(target.method)
            && target
                .code
                .as_ref()
                .is_some_and(|code| code.instructions_size <= limit)
    }

    /// A static call may only move if the class initialization of the target
    /// holder cannot be observed.
    fn can_inline_static_invoke(&self, target: &DexEncodedMethod) -> bool {
        let app_info = self.inliner.app_info();
        let factory = app_info.factory();
        let holder = factory.method(target.method).holder;
        if factory.method(self.method.method).holder == holder {
            return true;
        }
        app_info
            .definition_for(holder)
            .is_some_and(|class| !class.has_non_trivial_class_initializer())
    }

    fn exclude(&self, method: DexMethod, reason: &str) {
        tracing::trace!(
            method = %self.inliner.app_info().factory().method_to_source_string(method),
            reason,
            "exclude"
        );
    }
}
