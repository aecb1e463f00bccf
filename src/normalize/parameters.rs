use std::collections::HashMap;

use tracing::debug;

use super::{FunctionDraft, ParameterDraft};
use crate::ansi::AnsiClassifier;
use crate::error::ValidationWarning;
use crate::parse::{ParameterContext, ParsedDocument};
use crate::units::UnitConverter;

/// Attaches each raw parameter to the function its parse context names.
/// Parameters with no context, or whose context matches no function, are
/// dropped. A function's own header line is skipped without counting as a
/// drop. Returns how many were dropped.
pub(super) fn attach(
    ansi: &AnsiClassifier,
    units: &UnitConverter,
    parsed: &ParsedDocument,
    functions: &mut [FunctionDraft],
    anchors: &HashMap<String, usize>,
    warnings: &mut Vec<ValidationWarning>,
) -> usize {
    let mut without_context = 0usize;
    let mut unresolved = 0usize;

    for raw in &parsed.raw_parameters {
        let Some(context) = &raw.context else {
            without_context += 1;
            continue;
        };
        let Some(index) = resolve(ansi, functions, anchors, context) else {
            unresolved += 1;
            continue;
        };

        let code = raw.code.trim();
        if code.is_empty() {
            unresolved += 1;
            continue;
        }
        // the function's own toggle line is carried by `is_enabled`
        if functions[index].source_code.as_deref() == Some(code) {
            continue;
        }
        let name = if raw.name.trim().is_empty() { code } else { raw.name.trim() };
        let (value, unit) = units.split_value_unit(&raw.value);
        let parameter_type = units.infer_parameter_type(name, &value, unit.as_deref());

        functions[index].parameters.push(ParameterDraft {
            code: code.to_string(),
            name: name.to_string(),
            value,
            unit,
            parameter_type,
        });
    }

    if without_context > 0 {
        debug!(count = without_context, "parameters outside any protection context");
        warnings.push(ValidationWarning::new(
            "parameters",
            format!("{without_context} parameters outside any protection context dropped"),
        ));
    }
    if unresolved > 0 {
        warnings.push(ValidationWarning::new(
            "parameters",
            format!("{unresolved} parameters whose context matched no protection function dropped"),
        ));
    }

    without_context + unresolved
}

/// Anchor first, then label, then ANSI code. A label or code that points at
/// several functions in different groups is resolved by group; anything
/// still ambiguous is not attached.
fn resolve(
    ansi: &AnsiClassifier,
    functions: &[FunctionDraft],
    anchors: &HashMap<String, usize>,
    context: &ParameterContext,
) -> Option<usize> {
    if let Some(index) = context.anchor.as_ref().and_then(|anchor| anchors.get(anchor)) {
        return Some(*index);
    }

    let wanted = comparable(&context.label);
    let by_label: Vec<usize> = functions
        .iter()
        .enumerate()
        .filter(|(_, function)| comparable(&function.label) == wanted)
        .map(|(index, _)| index)
        .collect();
    if let Some(index) = pick(functions, &by_label, context.setting_group) {
        return Some(index);
    }

    let code = ansi.classify(&context.label);
    if code.is_unknown() {
        return None;
    }
    let by_code: Vec<usize> = functions
        .iter()
        .enumerate()
        .filter(|(_, function)| function.ansi_code == code.code)
        .map(|(index, _)| index)
        .collect();
    pick(functions, &by_code, context.setting_group)
}

fn pick(functions: &[FunctionDraft], candidates: &[usize], group: Option<u32>) -> Option<usize> {
    if let [only] = candidates {
        return Some(*only);
    }
    let grouped: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|index| functions[*index].setting_group == group)
        .collect();
    match grouped.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

fn comparable(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
