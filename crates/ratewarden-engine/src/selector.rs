//! Component C5 — given the current model and the attempted set, picks the
//! next fallback model per the configured policy (spec §4.5).

use std::collections::HashSet;
use std::sync::Arc;

use ratewarden_config::FallbackMode;
use ratewarden_core::ModelRef;

use crate::circuit_breaker::CircuitBreaker;
use crate::cooldown::CooldownMap;
use crate::health::HealthTracker;

/// Reorders candidates by recent usage + health (spec §3
/// `dynamicPrioritization`). The default implementation here defers
/// entirely to [`HealthTracker`]; callers with a genuine usage-tracking
/// signal can supply their own.
pub trait Prioritizer: Send + Sync {
    fn reorder(&self, candidates: Vec<ModelRef>) -> Vec<ModelRef>;
}

/// Default prioritizer: just delegates to the health tracker's ranking.
pub struct HealthBackedPrioritizer {
    health: Arc<HealthTracker>,
}

impl HealthBackedPrioritizer {
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self { health }
    }
}

impl Prioritizer for HealthBackedPrioritizer {
    fn reorder(&self, candidates: Vec<ModelRef>) -> Vec<ModelRef> {
        self.health.get_healthiest_models(&candidates)
    }
}

/// Outcome of a selection attempt. `LastResort` marks the `retry-last`
/// special case (spec §4.5 step 4) so the orchestrator can show the
/// "last resort" toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    Selected(ModelRef),
    LastResort(ModelRef),
    None,
}

impl SelectionOutcome {
    pub fn model(&self) -> Option<&ModelRef> {
        match self {
            SelectionOutcome::Selected(m) | SelectionOutcome::LastResort(m) => Some(m),
            SelectionOutcome::None => None,
        }
    }
}

pub struct ModelSelector {
    models: Vec<ModelRef>,
    mode: FallbackMode,
    health_selection_enabled: bool,
    dynamic_prioritization_enabled: bool,
    cooldown: Arc<CooldownMap>,
    circuit: Arc<CircuitBreaker>,
    health: Arc<HealthTracker>,
    prioritizer: Option<Arc<dyn Prioritizer>>,
}

pub struct SelectorConfig {
    pub models: Vec<ModelRef>,
    pub mode: FallbackMode,
    pub health_selection_enabled: bool,
    pub dynamic_prioritization_enabled: bool,
}

impl ModelSelector {
    pub fn new(
        config: SelectorConfig,
        cooldown: Arc<CooldownMap>,
        circuit: Arc<CircuitBreaker>,
        health: Arc<HealthTracker>,
        prioritizer: Option<Arc<dyn Prioritizer>>,
    ) -> Self {
        Self {
            models: config.models,
            mode: config.mode,
            health_selection_enabled: config.health_selection_enabled,
            dynamic_prioritization_enabled: config.dynamic_prioritization_enabled,
            cooldown,
            circuit,
            health,
            prioritizer,
        }
    }

    fn is_available(&self, model: &ModelRef, attempted: &HashSet<String>) -> bool {
        // `can_execute` (not `is_open`) so a circuit that has sat OPEN past
        // `open_duration_ms` gets the lazy OPEN -> HALF_OPEN demotion (I5)
        // instead of staying excluded forever.
        !self.cooldown.is_limited(model)
            && self.circuit.can_execute(model)
            && !attempted.contains(&model.key())
    }

    fn candidates(&self, attempted: &HashSet<String>) -> Vec<ModelRef> {
        self.models
            .iter()
            .filter(|m| self.is_available(m, attempted))
            .cloned()
            .collect()
    }

    /// Step 3: choose one candidate out of an already-filtered pool,
    /// honoring dynamic prioritization > health selection > positional scan
    /// (starting one past `current`'s index, wrapping).
    fn pick(&self, candidates: &[ModelRef], current: Option<&ModelRef>) -> Option<ModelRef> {
        if candidates.is_empty() {
            return None;
        }
        if self.dynamic_prioritization_enabled {
            if let Some(prioritizer) = &self.prioritizer {
                let ordered = prioritizer.reorder(candidates.to_vec());
                return ordered.into_iter().next();
            }
        }
        if self.health_selection_enabled {
            let ranked = self.health.get_healthiest_models(candidates);
            return ranked.into_iter().next();
        }

        if self.models.is_empty() {
            return None;
        }
        let start_idx = match current {
            Some(c) => self
                .models
                .iter()
                .position(|m| m == c)
                .map(|i| (i + 1) % self.models.len())
                .unwrap_or(0),
            None => 0,
        };
        for offset in 0..self.models.len() {
            let idx = (start_idx + offset) % self.models.len();
            let m = &self.models[idx];
            if candidates.iter().any(|c| c == m) {
                return Some(m.clone());
            }
        }
        None
    }

    /// Main entry point (spec §4.5).
    pub fn select_fallback_model(
        &self,
        current: Option<&ModelRef>,
        attempted: &mut HashSet<String>,
    ) -> SelectionOutcome {
        if self.models.is_empty() {
            return SelectionOutcome::None;
        }

        if let Some(c) = current {
            self.cooldown.mark_limited(c);
            attempted.insert(c.key());
        }

        let candidates = self.candidates(attempted);
        if let Some(picked) = self.pick(&candidates, current) {
            return SelectionOutcome::Selected(picked);
        }

        if attempted.is_empty() {
            return SelectionOutcome::None;
        }

        match self.mode {
            FallbackMode::Stop => SelectionOutcome::None,
            FallbackMode::RetryLast => {
                if let Some(last) = self.models.last() {
                    let is_current = current == Some(last);
                    if !is_current && self.is_available(last, &HashSet::new()) {
                        return SelectionOutcome::LastResort(last.clone());
                    }
                }
                self.cycle_restart(current, attempted)
            }
            FallbackMode::Cycle => self.cycle_restart(current, attempted),
        }
    }

    /// §4.5 step 4 `cycle`: clear `attempted` (re-adding only the current
    /// model) and restart the search from index 0.
    fn cycle_restart(
        &self,
        current: Option<&ModelRef>,
        attempted: &mut HashSet<String>,
    ) -> SelectionOutcome {
        attempted.clear();
        if let Some(c) = current {
            attempted.insert(c.key());
        }
        let candidates = self.candidates(attempted);
        match self.pick(&candidates, None) {
            Some(picked) => SelectionOutcome::Selected(picked),
            None => SelectionOutcome::None,
        }
    }
}
