pub mod judge;
pub mod json;
pub mod plan;
pub mod refiner;

pub use judge::{JudgeInput, JudgeVerdict, ResponseJudge};
pub use plan::{ExecutionPlan, PlanStep, RefinedRequest};
pub use refiner::{ElementSelection, PromptRefiner};
