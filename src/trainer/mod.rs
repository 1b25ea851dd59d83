pub mod classifier;
pub mod engine;

pub use classifier::{classify, is_correct, Classification, CORRECT_MARKER};
pub use engine::{EngineError, ExchangeReply, TrainingEngine};
