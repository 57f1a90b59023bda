use super::types::{Choice, Prompt, CONFIRM_ID, DONE_ID, EDIT_FIELD_PREFIX, EDIT_ID, SKIP_ID, CANCEL_ID};
use crate::forms::fields::FieldValue;
use crate::forms::types::{FieldSpec, FormDefinition, ValidatorSpec};
use crate::session::FormState;

/// Prompt asking for one field, with its options when it has any.
pub fn field_prompt(field: &FieldSpec) -> Prompt {
    let prompt = Prompt::new(field.prompt.as_str());
    match &field.validator {
        ValidatorSpec::Choice { options } => prompt.with_options(
            options
                .iter()
                .map(|o| Choice::new(o.id.as_str(), o.label.as_str()))
                .collect(),
        ),
        ValidatorSpec::Location => prompt
            .requesting_location()
            .with_options(vec![Choice::new(SKIP_ID, "option.skip")]),
        ValidatorSpec::Numeric { max_digits } => prompt.with_param("max_digits", max_digits.to_string()),
        ValidatorSpec::Text { min_len } if *min_len > 1 => prompt.with_param("min", min_len.to_string()),
        _ => prompt,
    }
}

/// Label key of a field in summaries and the edit menu.
pub fn field_label(name: &str) -> String {
    format!("field.{name}")
}

/// Every answer on the current branch, then confirm / edit / cancel.
pub fn summary_prompt(form: &FormState, def: &FormDefinition) -> Prompt {
    let params = def
        .route(&form.collected)
        .answered
        .into_iter()
        .filter_map(|i| {
            let field = &def.fields[i];
            let value = form.collected.get(&field.name)?;
            // Choices show their option label key rather than the raw id.
            let shown = match value {
                FieldValue::Choice(id) => field
                    .options()
                    .iter()
                    .find(|o| &o.id == id)
                    .map_or_else(|| id.clone(), |o| o.label.clone()),
                other => other.to_string(),
            };
            Some((field.name.clone(), shown))
        })
        .collect();
    let confirm_label = if form.last_failure.is_some() {
        "option.retry"
    } else {
        "option.confirm"
    };
    Prompt::new("form.summary")
        .with_param("form", form.kind.as_str())
        .with_params(params)
        .with_options(vec![
            Choice::new(CONFIRM_ID, confirm_label),
            Choice::new(EDIT_ID, "option.edit"),
            Choice::new(CANCEL_ID, "option.cancel"),
        ])
}

/// Pick which answered field to redo.
pub fn edit_menu(form: &FormState, def: &FormDefinition) -> Prompt {
    let mut options: Vec<Choice> = def
        .route(&form.collected)
        .answered
        .into_iter()
        .map(|i| {
            let name = &def.fields[i].name;
            Choice::new(format!("{EDIT_FIELD_PREFIX}{name}"), field_label(name))
        })
        .collect();
    options.push(Choice::new(DONE_ID, "option.done"));
    Prompt::new("form.edit_menu").with_options(options)
}
