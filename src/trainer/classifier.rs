/// Marker a feedback text must start with to count as a correct answer.
///
/// This lexical prefix test is the sole ground truth for every statistic
/// downstream: the rollup percentages, the ad-hoc stats and the export
/// all classify through here.
pub const CORRECT_MARKER: &str = "¡Correcto!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Correct,
    Incorrect,
}

pub fn classify(feedback: &str) -> Classification {
    if feedback.starts_with(CORRECT_MARKER) {
        Classification::Correct
    } else {
        Classification::Incorrect
    }
}

pub fn is_correct(feedback: &str) -> bool {
    classify(feedback) == Classification::Correct
}
