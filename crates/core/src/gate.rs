//! One-shot latch for the automatic recalculation on data load.

/// Permits exactly one automatic submission per estimate.
///
/// A fresh gate is created together with each estimate's state and is
/// never reset; binding a different estimate creates a new gate.
#[derive(Debug, Default)]
pub struct AutoTriggerGate {
    triggered: bool,
}

impl AutoTriggerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the automatic trigger.
    ///
    /// Returns `true` only on the first call. The flag flips before the
    /// caller issues the submission so a re-entrant load sees it set.
    pub fn claim(&mut self) -> bool {
        if self.triggered {
            return false;
        }
        self.triggered = true;
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }
}
