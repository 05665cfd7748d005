//! `{name}` placeholder substitution for explanation templates.

use std::collections::BTreeMap;

/// Replace every `{key}` in `template` with its binding. Unknown keys and
/// unmatched braces are copied through untouched.
pub fn render(template: &str, bindings: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match bindings.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Placeholders referenced by `template`.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                keys.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_binds_known_keys() {
        let mut b = BTreeMap::new();
        b.insert("plot_id", "7".to_string());
        b.insert("value", "12.5".to_string());
        assert_eq!(
            render("Plot {plot_id} read {value}% ({missing}) {", &b),
            "Plot 7 read 12.5% ({missing}) {"
        );
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders("{a} and {b}"), vec!["a", "b"]);
    }
}
