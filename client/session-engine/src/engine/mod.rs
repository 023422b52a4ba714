pub mod answer_store;
pub mod navigator;
pub mod session_engine;
pub mod submission;
pub mod timer;

pub use answer_store::AnswerStore;
pub use navigator::Navigator;
pub use session_engine::{EngineCommand, EngineEvent, SessionEngine};
pub use submission::{SubmissionCoordinator, SubmitTrigger};
pub use timer::{Timer, TimerSignal};
