//! Method inlining.
//!
//! Once the pipeline has processed a method, the weakest [`Constraint`] of
//! everything its body touches decides which callers may receive its code.
//! [`InliningOracle`] picks the call sites and [`Inliner::perform_inlining`]
//! splices the callee bodies in with [`inline_invoke`].

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use dexopt_ir::{
    cursor::InstCursor, AccessFlags, AppInfo, BlockId, CompilationState, DexEncodedMethod,
    DexField, DexMethod, DexType, InstId, InstKind, InvokeType, IrCode, ValueId,
};

pub use dexopt_ir::Constraint;

use super::inlining_oracle::{InliningOracle, Reason};
use crate::{cfg_edit::inline_invoke, domtree::DomTree};

#[derive(Clone, Copy, Debug)]
pub struct InlinerConfig {
    /// Largest body, in code units, that is classified as simple.
    pub simple_instruction_limit: u32,
    /// Largest body, in code units, that is inlined into both of its callers.
    pub double_inline_instruction_limit: u32,
    /// Number of instructions a caller may grow to through inlining.
    pub instruction_allowance: usize,
}

impl Default for InlinerConfig {
    fn default() -> Self {
        Self {
            simple_instruction_limit: 5,
            double_inline_instruction_limit: 10,
            instruction_allowance: 1500,
        }
    }
}

#[derive(Default, Debug)]
pub struct InlineStats {
    pub calls_inlined: usize,
    pub skipped_not_processed: usize,
    pub skipped_over_allowance: usize,
}

/// Call graph facts the inliner needs from the surrounding pipeline.
pub trait CallGraphInfo {
    /// Returns `true` if the edge `caller -> callee` was cut to break a cycle.
    fn is_breaker(&self, caller: DexMethod, callee: DexMethod) -> bool;
    fn has_single_call_site(&self, method: DexMethod) -> bool;
    fn has_double_call_site(&self, method: DexMethod) -> bool;
}

/// Builds the IR of methods chosen for inlining.
pub trait InlineeProvider {
    /// Returns `None` if no IR can be built for `target`.
    fn build_ir(&mut self, target: &DexEncodedMethod) -> Option<IrCode>;
}

#[derive(Default, Debug)]
struct DoubleInlineState {
    apply: bool,
    callers: FxHashSet<DexMethod>,
    selected_targets: FxHashSet<DexMethod>,
    /// The first caller seen for each candidate.
    candidates: FxHashMap<DexMethod, DexMethod>,
}

pub struct Inliner<'a> {
    pub config: InlinerConfig,
    app_info: &'a AppInfo,
    double_inline: Mutex<DoubleInlineState>,
}

impl<'a> Inliner<'a> {
    pub fn new(app_info: &'a AppInfo, config: InlinerConfig) -> Self {
        Self {
            config,
            app_info,
            double_inline: Mutex::new(DoubleInlineState::default()),
        }
    }

    pub fn app_info(&self) -> &'a AppInfo {
        self.app_info
    }

    /// Classifies the final IR of `method`. Bodies longer than the simple
    /// instruction limit are never inlined; otherwise the weakest constraint of
    /// all instructions wins. Debug instructions never block inlining.
    pub fn identify_simple_methods(&self, code: &IrCode, method: &DexEncodedMethod) -> Constraint {
        let fits = method
            .code
            .as_ref()
            .is_some_and(|dex| dex.instructions_size <= self.config.simple_instruction_limit);
        if !fits {
            return Constraint::Never;
        }

        let holder = self.app_info.factory().method(method.method).holder;
        let mut result = Constraint::Always;
        for block in code.blocks() {
            for inst in code.insts(block) {
                let kind = code.dfg.inst_kind(inst);
                if kind.is_debug() {
                    continue;
                }
                let constraint = inst_constraint(self.app_info, kind, holder);
                if constraint == Constraint::Never {
                    return Constraint::Never;
                }
                result = result.min(constraint);
            }
        }
        result
    }

    /// Returns `true` if code in `method` may refer to `target` directly.
    pub fn has_inlining_access(&self, method: &DexEncodedMethod, target: &DexEncodedMethod) -> bool {
        if target.access_flags.is_public() {
            return true;
        }
        let factory = self.app_info.factory();
        let method_holder = factory.method(method.method).holder;
        let target_holder = factory.method(target.method).holder;
        if target.access_flags.is_private() {
            return method_holder == target_holder;
        }
        if target.access_flags.is_protected() && self.app_info.is_subtype(method_holder, target_holder)
        {
            return true;
        }
        factory.is_same_package(method_holder, target_holder)
    }

    /// Records `method` calling the dual caller candidate `target`.
    ///
    /// While collecting, this always returns `false` and remembers pairs of
    /// callers. Once [`Self::process_double_inline_callers`] runs, it returns
    /// `true` for the targets selected during collection.
    pub(crate) fn double_inlining(&self, method: DexMethod, target: DexMethod) -> bool {
        let mut state = self.double_inline.lock();
        if state.apply {
            return state.selected_targets.contains(&target);
        }
        match state.candidates.get(&target).copied() {
            Some(first) => {
                state.callers.insert(first);
                state.callers.insert(method);
                state.selected_targets.insert(target);
            }
            None => {
                state.candidates.insert(target, method);
            }
        }
        false
    }

    /// Switches to applying double inlining and reprocesses every caller
    /// that was selected for it.
    pub fn process_double_inline_callers(&self, mut process: impl FnMut(DexMethod)) {
        let callers = {
            let mut state = self.double_inline.lock();
            if state.callers.is_empty() {
                return;
            }
            state.apply = true;
            let mut callers: Vec<_> = state.callers.iter().copied().collect();
            callers.sort_unstable();
            callers
        };
        tracing::debug!(callers = callers.len(), "reprocessing double inline callers");
        for caller in callers {
            process(caller);
        }
    }

    /// Inlines the calls of `code` selected by the oracle. `code` is the IR of
    /// `method`.
    pub fn perform_inlining(
        &self,
        method: &mut DexEncodedMethod,
        code: &mut IrCode,
        call_graph: &dyn CallGraphInfo,
        provider: &mut dyn InlineeProvider,
    ) -> InlineStats {
        let mut stats = InlineStats::default();
        let mut allowance = self.config.instruction_allowance as isize - code.inst_count() as isize;
        if allowance < 0 {
            return stats;
        }

        let container: &DexEncodedMethod = method;
        let receiver = receiver_value(container, code);
        let dominated = compute_receiver_must_be_non_null(code);
        let oracle = InliningOracle::new(self, container, receiver, call_graph, dominated);
        let factory = self.app_info.factory();

        let blocks: Vec<BlockId> = code.blocks().collect();
        'blocks: for block in blocks {
            if allowance < 0 {
                break;
            }
            if !code.layout.is_block_inserted(block) {
                continue;
            }
            let mut cursor = InstCursor::at_block_top(block);
            while let Some(invoke) = cursor.next(code) {
                if allowance < 0 {
                    break 'blocks;
                }
                let Some(action) = oracle.compute_inlining(code, invoke) else {
                    continue;
                };
                let InstKind::Invoke { ty, method: invoked } = *code.dfg.inst_kind(invoke) else {
                    continue;
                };
                let target = action.target;
                let force = action.reason == Reason::Force;
                if !target.is_processed() && !force {
                    stats.skipped_not_processed += 1;
                    continue;
                }
                let Some(mut inlinee) = provider.build_ir(target) else {
                    continue;
                };
                if code.block(code.inst_block(invoke)).has_catch_handlers()
                    && inlinee.normal_exit().is_none()
                {
                    continue;
                }
                if call_graph.is_breaker(container.method, target.method) {
                    continue;
                }
                if !target.is_processed() {
                    tracing::debug!(
                        target = %factory.method_to_source_string(target.method),
                        "forcing extra inline"
                    );
                    let mut target = target.clone();
                    self.perform_inlining(&mut target, &mut inlinee, call_graph, provider);
                }
                if target.access_flags.is_constructor()
                    && !self.legal_constructor_inline(container, &inlinee)
                {
                    continue;
                }
                let target_holder = factory.method(target.method).holder;
                if !force
                    && target.compilation_state() != CompilationState::ProcessedInliningCandidatePublic
                    && factory.method(container.method).holder != target_holder
                {
                    continue;
                }

                let invoked_holder = factory.method(invoked).holder;
                let downcast = (ty.has_receiver()
                    && target_holder != invoked_holder
                    && self.app_info.is_subtype(target_holder, invoked_holder))
                .then_some(target_holder);

                allowance -= inlinee.inst_count() as isize;
                if allowance < 0 && !action.force_inline() {
                    stats.skipped_over_allowance += 1;
                    continue;
                }
                tracing::debug!(
                    caller = %factory.method_to_source_string(container.method),
                    callee = %factory.method_to_source_string(target.method),
                    reason = ?action.reason,
                    "inline"
                );
                let continuation = inline_invoke(code, invoke, inlinee, downcast);
                stats.calls_inlined += 1;
                dexopt_verifier::debug_verify_code!(code);

                // Scanning resumes with the instructions that followed the call.
                match continuation.and_then(|block| code.block(block).succs.last().copied()) {
                    Some(rest) => cursor = InstCursor::at_block_top(rest),
                    None => continue 'blocks,
                }
            }
        }

        if stats.calls_inlined > 0 && method.access_flags.is_bridge() {
            method.access_flags.unset_synthetic();
            method.access_flags.unset_bridge();
        }
        stats
    }

    /// A constructor may only be inlined into a non-constructor if the first
    /// use of the uninitialized receiver is a constructor call.
    fn legal_constructor_inline(&self, method: &DexEncodedMethod, inlinee: &IrCode) -> bool {
        if method.access_flags.is_constructor() {
            return true;
        }
        let Some(&uninitialized) = inlinee.collect_arguments().first() else {
            return false;
        };
        let factory = self.app_info.factory();
        inlinee
            .blocks()
            .flat_map(|block| inlinee.insts(block))
            .find(|&inst| inlinee.dfg.inst_args(inst).contains(&uninitialized))
            .is_some_and(|inst| match *inlinee.dfg.inst_kind(inst) {
                InstKind::Invoke {
                    ty: InvokeType::Direct,
                    method,
                } => factory.is_constructor(method),
                _ => false,
            })
    }
}

fn receiver_value(method: &DexEncodedMethod, code: &IrCode) -> Option<ValueId> {
    if method.access_flags.is_static() {
        return None;
    }
    code.collect_arguments().first().copied()
}

pub(crate) fn is_invoke_with_receiver(kind: &InstKind) -> bool {
    matches!(kind, InstKind::Invoke { ty, .. } if ty.has_receiver())
}

/// Collects the calls whose receiver is known to be non-null because a call
/// on the same receiver strictly dominates them.
///
/// Calls covered by catch handlers do not prove anything, since a handler can
/// be reached with the receiver still null.
fn compute_receiver_must_be_non_null(code: &IrCode) -> FxHashSet<InstId> {
    let mut domtree = DomTree::new();
    domtree.compute(code);

    let mut dominated = FxHashSet::default();
    for block in code.blocks() {
        for inst in code.insts(block) {
            if !is_invoke_with_receiver(code.dfg.inst_kind(inst)) {
                continue;
            }
            let Some(&receiver) = code.dfg.inst_args(inst).first() else {
                continue;
            };
            let proven = code.dfg.users(receiver).any(|user| {
                let user_block = code.inst_block(user);
                is_invoke_with_receiver(code.dfg.inst_kind(user))
                    && code.dfg.inst_args(user).first() == Some(&receiver)
                    && !code.block(user_block).has_catch_handlers()
                    && domtree.strictly_dominates(user_block, block)
            });
            if proven {
                dominated.insert(inst);
            }
        }
    }
    dominated
}

/// Constraint for code in `context` using a member with `flags` declared on
/// `target_holder`.
pub fn derive_constraint(
    app_info: &AppInfo,
    context: DexType,
    target_holder: DexType,
    flags: AccessFlags,
) -> Constraint {
    if flags.is_public() {
        Constraint::Always
    } else if flags.is_private() {
        if target_holder == context {
            Constraint::Private
        } else {
            Constraint::Never
        }
    } else if app_info.factory().is_same_package(context, target_holder) {
        Constraint::Package
    } else {
        Constraint::Never
    }
}

/// Constraint of a member resolved on `holder`, including the visibility of
/// the class itself. Members of library classes are never inlined.
fn member_constraint(
    app_info: &AppInfo,
    context: DexType,
    holder: DexType,
    flags: AccessFlags,
) -> Constraint {
    match app_info.definition_for(holder) {
        Some(class) if !class.is_library_class() => {
            let member = derive_constraint(app_info, context, holder, flags);
            let class = derive_constraint(app_info, context, holder, class.access_flags);
            member.min(class)
        }
        _ => Constraint::Never,
    }
}

/// Constraint of reading or writing `field` from code in `context`.
pub fn field_constraint(
    app_info: &AppInfo,
    field: DexField,
    is_static: bool,
    context: DexType,
) -> Constraint {
    let holder = app_info.factory().field(field).holder;
    let target = if is_static {
        app_info.lookup_static_target_field(holder, field)
    } else {
        app_info.lookup_instance_target(holder, field)
    };
    match target {
        Some(target) => {
            let target_holder = app_info.factory().field(target.field).holder;
            member_constraint(app_info, context, target_holder, target.access_flags)
        }
        None => Constraint::Never,
    }
}

/// Constraint of calling `method` with an invoke of kind `ty` from code in
/// `context`. Super calls are bound to their class and never move.
pub fn method_constraint(
    app_info: &AppInfo,
    ty: InvokeType,
    method: DexMethod,
    context: DexType,
) -> Constraint {
    let factory = app_info.factory();
    if factory.is_array_type(factory.method(method).holder) {
        return Constraint::Always;
    }
    if matches!(ty, InvokeType::Super | InvokeType::Polymorphic) {
        return Constraint::Never;
    }
    match app_info.lookup(ty, method).ok().flatten() {
        Some(target) => {
            let target_holder = factory.method(target.method).holder;
            member_constraint(app_info, context, target_holder, target.access_flags)
        }
        None => Constraint::Never,
    }
}

/// Constraint of naming the type `ty` from code in `context`. Arrays are as
/// visible as their element type.
pub fn type_constraint(app_info: &AppInfo, ty: DexType, context: DexType) -> Constraint {
    let factory = app_info.factory();
    let descriptor = factory.descriptor(ty);
    let base = descriptor.trim_start_matches('[');
    if !base.starts_with('L') {
        return Constraint::Always;
    }
    let base = if base.len() == descriptor.len() {
        ty
    } else {
        factory.create_type(base)
    };
    match app_info.definition_for(base) {
        Some(class) => derive_constraint(app_info, context, base, class.access_flags),
        None => Constraint::Never,
    }
}

/// Constraint of a single instruction in a method declared on `context`.
pub fn inst_constraint(app_info: &AppInfo, kind: &InstKind, context: DexType) -> Constraint {
    match *kind {
        InstKind::InstanceGet { field, .. } | InstKind::InstancePut { field, .. } => {
            field_constraint(app_info, field, false, context)
        }
        InstKind::StaticGet { field, .. } | InstKind::StaticPut { field, .. } => {
            field_constraint(app_info, field, true, context)
        }
        InstKind::Invoke { ty, method } => method_constraint(app_info, ty, method, context),
        InstKind::ConstClass(ty)
        | InstKind::CheckCast(ty)
        | InstKind::InstanceOf(ty)
        | InstKind::NewInstance(ty)
        | InstKind::NewArrayEmpty(ty) => type_constraint(app_info, ty, context),
        _ => Constraint::Always,
    }
}
