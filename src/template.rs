// ABOUTME: Prompt template expansion and context data inventory rendering

use crate::value::{truncate_graphemes, Map, StrMap, Value};

/// Expand `{{name}}` placeholders from the given variables. String values
/// insert verbatim, other values insert their canonical rendering.
/// Unknown placeholders are left untouched so templates can be filled in
/// stages.
pub fn expand(template: &str, vars: &StrMap) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(value) => out.push_str(&value.render_string()),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// One line per context key describing what a program will find there,
/// for the prompt's data inventory section.
pub fn data_inventory(ctx: &Map) -> String {
    let mut lines: Vec<String> = ctx
        .iter()
        .map(|(key, value)| format!("ctx/{}: {}", key.name(), describe(value)))
        .collect();
    lines.sort();
    lines.join("\n")
}

fn describe(value: &Value) -> String {
    match value {
        Value::Vector(items) => match items.first() {
            Some(Value::Map(m)) => {
                let keys: Vec<&str> = m.keys().map(|k| k.name()).collect();
                format!("vector of {} maps (keys: {})", items.len(), keys.join(", "))
            }
            Some(first) => format!("vector of {} {}s", items.len(), first.type_name()),
            None => "empty vector".to_string(),
        },
        Value::Map(m) => {
            let keys: Vec<&str> = m.keys().map(|k| k.name()).collect();
            format!("map (keys: {})", keys.join(", "))
        }
        Value::Set(items) => format!("set of {} values", items.len()),
        Value::Str(s) => format!("string \"{}\"", truncate_graphemes(s, 40)),
        other => format!("{} {}", other.type_name(), other),
    }
}
