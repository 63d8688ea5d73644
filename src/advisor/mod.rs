//! Multi-step research pipeline: fan-out data gathering, prompt
//! assembly and LLM synthesis into a persisted advice record.

pub mod generator;
pub mod prompts;
pub mod researcher;

pub use generator::{AdviceRecord, Recommendation, SynthesisError, Synthesizer};
pub use researcher::{
    AnalystData, FailureKind, ResearchBundle, ResearchOrchestrator, Statements, StepOutcome,
};
