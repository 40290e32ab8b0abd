//! Confirmation gate for multi-page retrievals.
//!
//! The gate never does console I/O itself: the decision comes from a
//! [`Prompt`] supplied by the caller, so scripted responses work the same way
//! an interactive terminal does.

use crate::planner::RetrievalPlan;

/// Caller-side hooks for a retrieval.
///
/// Only [`Prompt::confirm`] is required. The other hooks are advisory output
/// and default to doing nothing.
pub trait Prompt: Send {
    /// Decide whether a plan that requires confirmation may proceed.
    fn confirm(&mut self, plan: &RetrievalPlan) -> bool;

    /// Refined estimate for the pages left after the first one.
    fn estimate(&mut self, _remaining: &RetrievalPlan) {}

    /// Called after each page is fetched. `page` is zero-based.
    fn progress(&mut self, _page: u64, _page_count: u64) {}
}

impl<F> Prompt for F
where
    F: FnMut(&RetrievalPlan) -> bool + Send,
{
    fn confirm(&mut self, plan: &RetrievalPlan) -> bool {
        self(plan)
    }
}

/// Prompt that approves every plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Prompt for AlwaysConfirm {
    fn confirm(&mut self, _plan: &RetrievalPlan) -> bool {
        true
    }
}

/// Prompt that declines every plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

impl Prompt for NeverConfirm {
    fn confirm(&mut self, _plan: &RetrievalPlan) -> bool {
        false
    }
}

/// Gate state. `Confirmed` and `Declined` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Pending,
    Confirmed,
    Declined,
}

/// One-shot confirmation gate.
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    state: GateState,
}

impl ConfirmationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Resolve the gate for `plan`.
    ///
    /// Plans that don't require confirmation are confirmed without touching
    /// the prompt. Once terminal, the state never changes.
    pub fn resolve(&mut self, plan: &RetrievalPlan, prompt: &mut dyn Prompt) -> GateState {
        if self.state != GateState::Pending {
            return self.state;
        }

        self.state = if !plan.requires_confirmation || prompt.confirm(plan) {
            GateState::Confirmed
        } else {
            GateState::Declined
        };

        tracing::debug!(
            state = ?self.state,
            pages = plan.page_count,
            asked = plan.requires_confirmation,
            "Confirmation gate resolved"
        );
        self.state
    }
}
