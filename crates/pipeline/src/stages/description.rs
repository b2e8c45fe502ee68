use std::collections::HashSet;

use crate::{
    contracts::{DescriptionResponse, FunctionalDescription, StageOutput},
    error::PipelineError,
    prompt::PromptBuilder,
    stage::Stage,
};

use super::{Checked, StageContext, StageContract};

/// Names the functional parts of the target object
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptionStage;

impl StageContract for DescriptionStage {
    type Response = DescriptionResponse;

    fn stage(&self) -> Stage {
        Stage::Description
    }

    fn prompt(&self, ctx: &StageContext<'_>) -> Result<String, PipelineError> {
        let target = ctx.target_object()?;
        let bbox = target.bounding_box;

        Ok(PromptBuilder::new(
            "You describe objects for a robotic grasping system. List the functional \
             parts of the target object that a person would recognise and name.",
        )
        .section(
            "Target object",
            format!(
                "id {}: \"{}\" inside the box [{}, {}, {}, {}] of the image.",
                target.id, target.label, bbox.x1, bbox.y1, bbox.x2, bbox.y2
            ),
        )
        .section(
            "Rules",
            "Use short part names such as \"handle\" or \"blade\". Do not give \
             coordinates. Each name must be unique. Echo the target id as object_id.",
        )
        .response_format::<DescriptionResponse>()?
        .build())
    }

    fn check(&self, response: DescriptionResponse, ctx: &StageContext<'_>) -> Checked {
        let description = FunctionalDescription {
            object_id: response.object_id,
            components: response
                .components
                .into_iter()
                .map(|mut c| {
                    c.name = c.name.trim().to_string();
                    c
                })
                .collect(),
        };

        let check = validate(&description, ctx);
        Checked::from_check(StageOutput::Description(description), check)
    }
}

fn validate(description: &FunctionalDescription, ctx: &StageContext<'_>) -> Result<(), String> {
    let target = ctx.intent().map_err(|err| err.to_string())?.target_object_id;
    if description.object_id != target {
        return Err(format!(
            "description is for object {} but the target is object {target}",
            description.object_id
        ));
    }
    if description.components.is_empty() {
        return Err("no components described".to_string());
    }

    let mut seen = HashSet::new();
    for component in &description.components {
        if component.name.is_empty() {
            return Err("component with an empty name".to_string());
        }
        if !seen.insert(component.name.to_lowercase()) {
            return Err(format!("component '{}' listed twice", component.name));
        }
    }
    Ok(())
}
