//! Effect Permutation Validator
//!
//! Records the ordered `(key, value)` list that defines a shader permutation
//! and reports whether it changed since the previous validation round.
//!
//! Comparison is positional: the value validated at cursor `n` is compared
//! with the entry stored at position `n`. Validating the same keys in a
//! different order counts as a change, so callers must validate in a
//! deterministic order.
//!
//! ```text
//!  round 1: (A,1) (B,x) (C,2)   stored: [A,1][B,x][C,2]
//!  round 2: (A,1) (B,x)         cursor=2 < len=3 → changed, truncate
//!  round 3: (A,1) (B,x)         cursor=2 = len=2 → unchanged
//! ```

use crate::renderer::parameters::{ParameterCollection, ParameterKey, ParameterValue};

/// Positional diff of permutation parameters across frames.
#[derive(Debug, Clone, Default)]
pub struct EffectValidator {
    entries: Vec<(Option<ParameterKey>, ParameterValue)>,
    validated: usize,
    changed: bool,

    /// Set during validation when the object should not render this slot.
    /// Cleared by [`begin_effect_validation`](Self::begin_effect_validation).
    pub should_skip: bool,
}

impl EffectValidator {
    #[must_use]
    pub fn new() -> Self {
        let mut validator = Self::default();
        validator.initialize();
        validator
    }

    /// Seeds the list with a sentinel entry so the first round of a new
    /// effect always reports a change.
    pub fn initialize(&mut self) {
        self.entries.clear();
        self.entries.push((None, ParameterValue::Bool(false)));
        self.validated = 0;
        self.changed = false;
    }

    pub fn begin_effect_validation(&mut self) {
        self.validated = 0;
        self.changed = false;
        self.should_skip = false;
    }

    pub fn validate_parameter(&mut self, key: ParameterKey, value: impl Into<ParameterValue>) {
        let value = value.into();
        let cursor = self.validated;
        self.validated += 1;

        if cursor < self.entries.len() {
            let (stored_key, stored_value) = &self.entries[cursor];
            if *stored_key == Some(key) && *stored_value == value {
                return;
            }
            self.entries[cursor] = (Some(key), value);
            self.entries.truncate(cursor + 1);
        } else {
            self.entries.push((Some(key), value));
        }
        self.changed = true;
    }

    /// Returns `true` when nothing changed since the previous round.
    pub fn end_effect_validation(&mut self) -> bool {
        if self.validated == self.entries.len() && !self.changed {
            return true;
        }
        self.entries.truncate(self.validated);
        false
    }

    /// Validated parameters in validation order, as a compiler request.
    #[must_use]
    pub fn compiler_parameters(&self) -> ParameterCollection {
        self.entries
            .iter()
            .filter_map(|(key, value)| key.map(|k| (k, value.clone())))
            .collect()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
