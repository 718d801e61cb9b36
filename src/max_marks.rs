use std::collections::BTreeMap;

/// Usual maxima for exam components, smallest first.
const CEILINGS: [f64; 8] = [20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 75.0, 100.0];

/// Decides what a mark was out of. The portal never says, so unless a
/// subject has a configured override the maximum is guessed from the mark
/// itself: the smallest usual maximum that the mark does not exceed. This
/// is a heuristic that assumes common university marking schemes.
#[derive(Debug, Clone, Default)]
pub struct MaxMarksResolver {
    overrides: BTreeMap<String, BTreeMap<String, f64>>,
}

impl MaxMarksResolver {
    pub fn new(overrides: BTreeMap<String, BTreeMap<String, f64>>) -> Self {
        Self { overrides }
    }

    pub fn resolve(&self, subject_code: &str, exam_type: &str, observed: f64) -> f64 {
        self.overrides
            .get(subject_code)
            .and_then(|exams| exams.get(exam_type))
            .copied()
            .unwrap_or_else(|| infer_from_value(observed))
    }
}

pub fn infer_from_value(observed: f64) -> f64 {
    CEILINGS
        .iter()
        .copied()
        .find(|ceiling| observed <= *ceiling)
        .unwrap_or_else(|| ((observed / 50.0).floor() + 1.0) * 50.0)
}
