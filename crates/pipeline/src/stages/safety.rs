use crate::{
    contracts::{SafetyDecision, SafetyResponse, StageOutput},
    error::PipelineError,
    prompt::PromptBuilder,
    stage::Stage,
};

use super::{Checked, StageContext, StageContract};

/// Picks the component the robot should hold
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyStage;

impl StageContract for SafetyStage {
    type Response = SafetyResponse;

    fn stage(&self) -> Stage {
        Stage::Safety
    }

    fn needs_image(&self) -> bool {
        false
    }

    fn prompt(&self, ctx: &StageContext<'_>) -> Result<String, PipelineError> {
        let target = ctx.target_object()?;
        let description = ctx.description()?;

        Ok(PromptBuilder::new(
            "You are the safety officer of a robot arm that grasps an object and then \
             hands it to a person.",
        )
        .section("Instruction", ctx.instruction)
        .section("Object", format!("id {}: {}", target.id, target.label))
        .json_section("Components", &description.components)?
        .section(
            "Question",
            "Considering how securely the gripper can hold it, and the safety and \
             comfort of the person receiving it, which single component should the \
             robot grasp? target_part_name must be one of the component names above.",
        )
        .response_format::<SafetyResponse>()?
        .build())
    }

    fn check(&self, response: SafetyResponse, ctx: &StageContext<'_>) -> Checked {
        let mut decision = SafetyDecision {
            object_id: response.object_id,
            target_part_name: response.target_part_name,
            justification: response.justification,
        };

        let check = match ctx.description() {
            Err(err) => Err(err.to_string()),
            Ok(description) if description.object_id != decision.object_id => Err(format!(
                "decision is for object {} but the components describe object {}",
                decision.object_id, description.object_id
            )),
            Ok(description) => match description.find_component(&decision.target_part_name) {
                Some(component) => {
                    decision.target_part_name = component.name.clone();
                    Ok(())
                }
                None => Err(format!(
                    "part '{}' is not among the components [{}]",
                    decision.target_part_name,
                    description
                        .components
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            },
        };

        Checked::from_check(StageOutput::Safety(decision), check)
    }
}
