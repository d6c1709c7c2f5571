mod goal;
mod prompt;
mod request;
mod result;

pub use goal::Goal;
pub use prompt::{
    effective_notes, user_message, InstructionTemplate, NO_NOTES_MESSAGE, SAMPLE_ANALYSIS,
};
pub use request::AnalysisRequest;
pub use result::AnalysisResult;
