//! Print capture: println appends to the Step's print log
//!
//! Output never reaches stdout; the host reads `step.prints`. Lists whose
//! elements are all single-grapheme strings are auto-joined so programs
//! that build strings character-by-character stay readable.

use crate::eval::{Flow, Machine};
use crate::value::{is_char_list, Value};
use ptc_macros::builtin;

fn render_print_arg(v: &Value) -> String {
    if is_char_list(v) {
        if let Value::Vector(items) = v {
            return items.iter().map(Value::render_string).collect();
        }
    }
    v.render_string()
}

#[builtin(name = "println", category = "Console", effectful)]
pub fn println(m: &mut Machine<'_>, args: &[Value]) -> Result<Value, Flow> {
    let text = args.iter().map(render_print_arg).collect::<Vec<_>>().join(" ");
    m.push_print(text);
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_list_auto_join() {
        let chars = Value::Vector(vec![
            Value::Str("h".into()),
            Value::Str("i".into()),
        ]);
        assert_eq!(render_print_arg(&chars), "hi");

        let mixed = Value::Vector(vec![Value::Str("h".into()), Value::Int(1)]);
        assert_eq!(render_print_arg(&mixed), "[\"h\" 1]");
    }

    #[test]
    fn test_string_renders_unquoted() {
        assert_eq!(render_print_arg(&Value::Str("hello".into())), "hello");
        assert_eq!(render_print_arg(&Value::Keyword("k".into())), ":k");
    }
}
