//! Graph passes driving the lowering rules.

mod lowering;
mod verify_target;

pub use lowering::LoweringPass;
pub use verify_target::VerifyTargetPass;
