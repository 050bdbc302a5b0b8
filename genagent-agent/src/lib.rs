//! # genagent agents
//!
//! The agents drive the scene loop:
//! 1. The planner turns a request into a Blender script (directly, or via a
//!    structured scene plan)
//! 2. The executor saves the script and hands it to a scene runner
//! 3. Script errors go back to the planner for repair
//! 4. The verifier scores the render with a vision model
//! 5. Low scores become reflections that steer the next plan
//!
//! [`Pipeline`] ties the steps together and records every attempt in
//! scene memory.

mod agent;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use executor::ExecutorAgent;
pub use pipeline::{IterationReport, Pipeline, PipelineEvent, PipelineReport};
pub use planner::{Plan, PlannerAgent};
pub use verifier::VerifierAgent;
