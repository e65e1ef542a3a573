//! # Stop reasons
//!
//! Every phase of a run (global evaluation budget, batch evaluation, the
//! iteration loop, the mesh, each search method, decomposition) owns a closed
//! table of causes. A [`StopReason`] is a tagged union over those tables: the
//! phase tag plus a cause code. Code `0` is always `STARTED`; the length of a
//! table is its `LAST` bound and is never a storable code.
//!
//! A reason only moves forward. Setting a cause succeeds only when it ranks
//! strictly higher than the current one, where the ranks are, in increasing
//! order, started, informational, normal termination and error termination.
//! [`StopReason::reset`] brings a phase back to `STARTED` for a new run.
//!
//! ## Example
//!
//! ```rust
//! use mads::stop::{EvalGlobalStop, StopReason, StopReasons, Phase};
//!
//! let mut reasons = StopReasons::new();
//! assert!(!reasons.check_terminate());
//!
//! reasons.set(EvalGlobalStop::MaxEvalReached);
//! assert!(reasons.check_terminate());
//! assert!(reasons.final_reason().is(EvalGlobalStop::MaxEvalReached));
//! assert_eq!(reasons.get(Phase::EvalGlobal).name(), "MAX_EVAL_REACHED");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Severity of a cause. The derived order is the forward order of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CauseClass {
    Started,
    /// Recorded for reporting; the phase keeps running.
    Informational,
    /// Normal termination of the phase.
    Normal,
    /// Termination on an error.
    Error,
}

/// One row of a phase's cause table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CauseInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub class: CauseClass,
}

const STARTED_INFO: CauseInfo = CauseInfo {
    name: "STARTED",
    description: "Started",
    class: CauseClass::Started,
};

/// The phases that own a cause table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    Base,
    EvalGlobal,
    EvalMainThread,
    Iteration,
    Mads,
    Decomposition,
    Poll,
    LatinHypercube,
    NelderMead,
    Model,
    Search,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Base,
        Phase::EvalGlobal,
        Phase::EvalMainThread,
        Phase::Iteration,
        Phase::Mads,
        Phase::Decomposition,
        Phase::Poll,
        Phase::LatinHypercube,
        Phase::NelderMead,
        Phase::Model,
        Phase::Search,
    ];

    /// How local the phase is. Deeper phases explain a stop more precisely.
    pub fn depth(self) -> u8 {
        match self {
            Phase::Base => 0,
            Phase::EvalGlobal => 1,
            Phase::Iteration => 2,
            Phase::Mads | Phase::Decomposition => 3,
            Phase::Poll
            | Phase::LatinHypercube
            | Phase::NelderMead
            | Phase::Model
            | Phase::Search => 4,
            Phase::EvalMainThread => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Base => "Base",
            Phase::EvalGlobal => "EvalGlobal",
            Phase::EvalMainThread => "EvalMainThread",
            Phase::Iteration => "Iteration",
            Phase::Mads => "Mads",
            Phase::Decomposition => "Decomposition",
            Phase::Poll => "Poll",
            Phase::LatinHypercube => "LatinHypercube",
            Phase::NelderMead => "NelderMead",
            Phase::Model => "Model",
            Phase::Search => "Search",
        }
    }

    pub fn causes(self) -> &'static [CauseInfo] {
        match self {
            Phase::Base => BaseStop::TABLE,
            Phase::EvalGlobal => EvalGlobalStop::TABLE,
            Phase::EvalMainThread => EvalMainThreadStop::TABLE,
            Phase::Iteration => IterationStop::TABLE,
            Phase::Mads => MadsStop::TABLE,
            Phase::Decomposition => DecompositionStop::TABLE,
            Phase::Poll => PollStop::TABLE,
            Phase::LatinHypercube => LhStop::TABLE,
            Phase::NelderMead => NmStop::TABLE,
            Phase::Model => ModelStop::TABLE,
            Phase::Search => SearchStop::TABLE,
        }
    }

    /// The `LAST` sentinel: one past the largest valid code.
    pub fn last(self) -> u8 {
        self.causes().len() as u8
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! stop_causes {
    (
        $(#[$meta:meta])*
        $name:ident => $phase:expr,
        { $($variant:ident => ($label:literal, $desc:literal, $class:ident)),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            Started = 0,
            $($variant),*
        }

        impl $name {
            const TABLE: &'static [CauseInfo] = &[
                STARTED_INFO,
                $(CauseInfo { name: $label, description: $desc, class: CauseClass::$class }),*
            ];

            const VARIANTS: &'static [$name] = &[$name::Started, $($name::$variant),*];

            pub fn info(self) -> &'static CauseInfo {
                &Self::TABLE[self as usize]
            }

            pub fn from_code(code: u8) -> Option<Self> {
                Self::VARIANTS.get(code as usize).copied()
            }
        }

        impl From<$name> for StopReason {
            fn from(cause: $name) -> Self {
                StopReason { phase: $phase, code: cause as u8 }
            }
        }
    };
}

stop_causes! {
    /// Causes that concern a whole run regardless of the algorithm.
    BaseStop => Phase::Base,
    {
        MaxTimeReached => ("MAX_TIME_REACHED", "Maximum allowed time reached", Normal),
        InitializationFailed => ("INITIALIZATION_FAILED", "Initialization failure", Error),
        Error => ("ERROR", "Error", Error),
        UnknownStopReason => ("UNKNOWN_STOP_REASON", "Unknown stop reason", Error),
        CtrlC => ("CTRL_C", "Interrupted", Normal),
        UserStopped => ("USER_STOPPED", "User requested a stop", Normal),
    }
}

stop_causes! {
    /// Global evaluation budgets, shared by every run on one evaluator control.
    EvalGlobalStop => Phase::EvalGlobal,
    {
        MaxBbEvalReached => ("MAX_BB_EVAL_REACHED", "Maximum number of blackbox evaluations", Normal),
        MaxSurrogateEvalReached => ("MAX_SURROGATE_EVAL_OPTIMIZATION_REACHED", "Maximum number of surrogate evaluations", Informational),
        MaxEvalReached => ("MAX_EVAL_REACHED", "Maximum number of total evaluations", Normal),
        MaxBlockEvalReached => ("MAX_BLOCK_EVAL_REACHED", "Maximum number of block evaluations", Normal),
    }
}

stop_causes! {
    /// Outcome of evaluating one batch for one run.
    EvalMainThreadStop => Phase::EvalMainThread,
    {
        LapMaxBbEvalReached => ("LAP_MAX_BB_EVAL_REACHED", "Maximum number of blackbox evaluations for a lap", Normal),
        SubproblemMaxBbEvalReached => ("SUBPROBLEM_MAX_BB_EVAL_REACHED", "Maximum number of blackbox evaluations for a subproblem", Normal),
        OpportunisticSuccess => ("OPPORTUNISTIC_SUCCESS", "Success found and opportunistic strategy maintained", Informational),
        EmptyListOfPoints => ("EMPTY_LIST_OF_POINTS", "Tried to evaluate an empty list", Informational),
        AllPointsEvaluated => ("ALL_POINTS_EVALUATED", "No more points to evaluate", Informational),
        MaxModelEvalReached => ("MAX_MODEL_EVAL_REACHED", "Maximum number of model evaluations", Informational),
    }
}

stop_causes! {
    IterationStop => Phase::Iteration,
    {
        MaxIterReached => ("MAX_ITER_REACHED", "Maximum number of iterations reached", Normal),
        StopOnFeas => ("STOP_ON_FEAS", "A feasible point is reached", Normal),
    }
}

stop_causes! {
    /// Mesh-driven termination of a Mads run.
    MadsStop => Phase::Mads,
    {
        MeshPrecReached => ("MESH_PREC_REACHED", "Mesh minimum precision reached", Normal),
        MinMeshSizeReached => ("MIN_MESH_SIZE_REACHED", "Min mesh size reached", Normal),
        MinFrameSizeReached => ("MIN_FRAME_SIZE_REACHED", "Min frame size reached", Normal),
        X0Fail => ("X0_FAIL", "Problem with starting point evaluation", Error),
    }
}

stop_causes! {
    DecompositionStop => Phase::Decomposition,
    {
        X0Fail => ("X0_FAIL", "Problem with starting point evaluation", Error),
        SubproblemFail => ("SUBPB_MADS_FAIL", "Subproblem Mads failed", Error),
    }
}

stop_causes! {
    PollStop => Phase::Poll,
    {
        NoPointsGenerated => ("NO_POINTS_GENERATED", "No poll point generated", Normal),
        DirectionFailure => ("DIRECTION_FAILURE", "Poll directions could not be generated", Error),
    }
}

stop_causes! {
    LhStop => Phase::LatinHypercube,
    {
        NoPointsGenerated => ("NO_POINTS_GENERATED", "No points generated by Latin Hypercube", Normal),
        AllPointsEvaluated => ("ALL_POINTS_EVALUATED", "All points generated by Latin Hypercube", Informational),
    }
}

stop_causes! {
    NmStop => Phase::NelderMead,
    {
        InitialFailed => ("INITIAL_FAILED", "Not enough cached points to form a simplex", Normal),
        SimplexRankInsufficient => ("SIMPLEX_RANK_INSUFFICIENT", "Rank of the simplex is insufficient", Normal),
        NoNewPoints => ("NO_NEW_POINTS", "Simplex transformations produced no new point", Normal),
        SingleCompleted => ("NM_SINGLE_COMPLETED", "Single reflective pass completed", Informational),
    }
}

stop_causes! {
    ModelStop => Phase::Model,
    {
        NotEnoughPoints => ("NOT_ENOUGH_POINTS", "Not enough points to build a model", Normal),
        InitialFail => ("INITIAL_FAIL", "Model could not be fitted", Normal),
        EvalFail => ("EVAL_FAIL", "Every model evaluation failed", Normal),
        NoNewPointsFound => ("NO_NEW_POINTS_FOUND", "Model predicted no improving point", Normal),
        SinglePassCompleted => ("MODEL_SINGLE_PASS_COMPLETED", "Model single pass completed", Informational),
    }
}

stop_causes! {
    /// Search methods without a table of their own.
    SearchStop => Phase::Search,
    {
        NoPointsGenerated => ("NO_POINTS_GENERATED", "Search method generated no point", Normal),
        GeneratorFailed => ("GENERATOR_FAILED", "Search generator failed", Error),
        PassCompleted => ("SEARCH_PASS_COMPLETED", "Search pass completed", Informational),
    }
}

/// A phase tag plus a cause code from that phase's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawStopReason")
)]
pub struct StopReason {
    phase: Phase,
    code: u8,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawStopReason {
    phase: Phase,
    code: u8,
}

#[cfg(feature = "serde")]
impl TryFrom<RawStopReason> for StopReason {
    type Error = String;

    fn try_from(raw: RawStopReason) -> std::result::Result<Self, Self::Error> {
        StopReason::from_code(raw.phase, raw.code)
            .ok_or_else(|| format!("{} is not a stop cause of phase {:?}", raw.code, raw.phase))
    }
}

impl StopReason {
    pub fn started(phase: Phase) -> Self {
        Self { phase, code: 0 }
    }

    /// Builds a reason from a raw code, `None` for codes at or past `LAST`.
    pub fn from_code(phase: Phase, code: u8) -> Option<Self> {
        (code < phase.last()).then_some(Self { phase, code })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn info(&self) -> &'static CauseInfo {
        // Codes are validated at construction and deserialization.
        &self.phase.causes()[self.code as usize]
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }

    pub fn description(&self) -> &'static str {
        self.info().description
    }

    pub fn class(&self) -> CauseClass {
        self.info().class
    }

    pub fn is_started(&self) -> bool {
        self.code == 0
    }

    pub fn terminates(&self) -> bool {
        self.class() >= CauseClass::Normal
    }

    pub fn is_error(&self) -> bool {
        self.class() == CauseClass::Error
    }

    /// Returns `true` if this reason currently holds `cause`.
    pub fn is(&self, cause: impl Into<StopReason>) -> bool {
        *self == cause.into()
    }

    /// Moves to `cause` if it belongs to this phase and ranks strictly higher.
    ///
    /// # Returns
    ///
    /// `true` when the reason changed.
    pub fn set(&mut self, cause: impl Into<StopReason>) -> bool {
        let cause = cause.into();
        if cause.phase != self.phase || cause.class() <= self.class() {
            return false;
        }
        self.code = cause.code;
        true
    }

    pub fn reset(&mut self) {
        self.code = 0;
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

/// The aggregate of one reason per phase.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StopReasons {
    reasons: Vec<StopReason>,
}

impl StopReasons {
    pub fn new() -> Self {
        Self {
            reasons: Phase::ALL.iter().map(|&p| StopReason::started(p)).collect(),
        }
    }

    pub fn get(&self, phase: Phase) -> StopReason {
        self.reasons[phase as usize]
    }

    /// Forwards to the owning phase's [`StopReason::set`].
    pub fn set(&mut self, cause: impl Into<StopReason>) -> bool {
        let cause = cause.into();
        self.reasons[cause.phase as usize].set(cause)
    }

    /// Brings every phase back to `STARTED`.
    pub fn reset(&mut self) {
        self.reasons.iter_mut().for_each(StopReason::reset);
    }

    pub fn reset_phase(&mut self, phase: Phase) {
        self.reasons[phase as usize].reset();
    }

    /// Has anything terminated?
    pub fn check_terminate(&self) -> bool {
        self.reasons.iter().any(StopReason::terminates)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StopReason> {
        self.reasons.iter()
    }

    /// The deepest terminating reason, or failing that the deepest
    /// informational one.
    pub fn most_specific(&self) -> Option<StopReason> {
        self.deepest(StopReason::terminates)
            .or_else(|| self.deepest(|r| !r.is_started()))
    }

    /// The deepest error-class reason, if any.
    pub fn error_reason(&self) -> Option<StopReason> {
        self.deepest(StopReason::is_error)
    }

    /// The reason reported for a finished run: errors first, then the most
    /// specific terminating cause.
    pub fn final_reason(&self) -> StopReason {
        self.error_reason()
            .or_else(|| self.deepest(StopReason::terminates))
            .unwrap_or_else(|| StopReason::started(Phase::Base))
    }

    fn deepest<F>(&self, pred: F) -> Option<StopReason>
    where
        F: Fn(&StopReason) -> bool,
    {
        self.reasons
            .iter()
            .filter(|r| pred(r))
            .fold(None, |best: Option<StopReason>, r| match best {
                Some(b) if b.phase.depth() >= r.phase.depth() => Some(b),
                _ => Some(*r),
            })
    }
}

impl Default for StopReasons {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StopReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active: Vec<String> = self
            .reasons
            .iter()
            .filter(|r| !r.is_started())
            .map(|r| format!("{}: {}", r.phase, r.name()))
            .collect();
        if active.is_empty() {
            f.write_str("STARTED")
        } else {
            f.write_str(&active.join(", "))
        }
    }
}

/// A cloneable handle used to request a cooperative stop from another thread.
///
/// The request is checked before every dispatch and at iteration boundaries;
/// an evaluation already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicU8>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop recorded as `USER_STOPPED`.
    pub fn request_stop(&self) {
        self.request(BaseStop::UserStopped);
    }

    /// Requests a stop recorded as `CTRL_C`, for signal handlers.
    pub fn interrupt(&self) {
        self.request(BaseStop::CtrlC);
    }

    fn request(&self, cause: BaseStop) {
        // First request wins.
        let _ = self
            .requested
            .compare_exchange(0, cause as u8, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn requested(&self) -> Option<BaseStop> {
        match self.requested.load(Ordering::SeqCst) {
            0 => None,
            code => BaseStop::from_code(code),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst) != 0
    }

    /// Clears a pending request before a new run.
    pub fn clear(&self) {
        self.requested.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_sentinel() {
        for phase in Phase::ALL {
            let last = phase.last();
            assert!(last >= 2);
            assert_eq!(phase.causes()[0].name, "STARTED");
            assert!(StopReason::from_code(phase, last).is_none());
            assert!(StopReason::from_code(phase, last - 1).is_some());
        }
        assert_eq!(MadsStop::from_code(2), Some(MadsStop::MinMeshSizeReached));
        assert_eq!(MadsStop::from_code(9), None);
    }

    #[test]
    fn test_set_only_moves_forward() {
        let mut reason = StopReason::started(Phase::EvalMainThread);

        assert!(reason.set(EvalMainThreadStop::AllPointsEvaluated));
        assert!(!reason.set(EvalMainThreadStop::OpportunisticSuccess));
        assert!(reason.set(EvalMainThreadStop::LapMaxBbEvalReached));
        assert!(!reason.set(EvalMainThreadStop::SubproblemMaxBbEvalReached));
        assert!(!reason.set(EvalMainThreadStop::Started));
        assert!(reason.is(EvalMainThreadStop::LapMaxBbEvalReached));
        assert!(reason.terminates());

        reason.reset();
        assert!(reason.is_started());
    }

    #[test]
    fn test_set_rejects_foreign_phase() {
        let mut reason = StopReason::started(Phase::Mads);
        assert!(!reason.set(IterationStop::MaxIterReached));
        assert!(reason.is_started());
    }

    #[test]
    fn test_error_outranks_normal() {
        let mut reason = StopReason::started(Phase::Base);
        assert!(reason.set(BaseStop::MaxTimeReached));
        assert!(reason.set(BaseStop::InitializationFailed));
        assert!(reason.is_error());
        assert!(!reason.set(BaseStop::UserStopped));
    }

    #[test]
    fn test_aggregate_prefers_deepest() {
        let mut reasons = StopReasons::new();
        reasons.set(EvalMainThreadStop::OpportunisticSuccess);
        assert!(!reasons.check_terminate());
        assert_eq!(
            reasons.most_specific(),
            Some(EvalMainThreadStop::OpportunisticSuccess.into())
        );

        reasons.set(EvalGlobalStop::MaxBbEvalReached);
        reasons.set(MadsStop::MinMeshSizeReached);
        assert!(reasons.check_terminate());
        assert!(reasons.final_reason().is(MadsStop::MinMeshSizeReached));
    }

    #[test]
    fn test_aggregate_reports_errors_first() {
        let mut reasons = StopReasons::new();
        reasons.set(EvalMainThreadStop::LapMaxBbEvalReached);
        reasons.set(BaseStop::InitializationFailed);

        assert!(reasons.most_specific().unwrap().is(EvalMainThreadStop::LapMaxBbEvalReached));
        assert!(reasons.final_reason().is(BaseStop::InitializationFailed));
        assert!(reasons.error_reason().is_some());

        reasons.reset();
        assert!(!reasons.check_terminate());
        assert!(reasons.final_reason().is_started());
    }

    #[test]
    fn test_stop_handle_first_request_wins() {
        let handle = StopHandle::new();
        assert_eq!(handle.requested(), None);

        let clone = handle.clone();
        clone.interrupt();
        handle.request_stop();
        assert_eq!(handle.requested(), Some(BaseStop::CtrlC));

        handle.clear();
        assert!(!clone.is_requested());
    }
}
