//! String template rendering utilities.

/// Substitute literal placeholders, longest placeholder first.
///
/// Tokens like `$game` and `$gamedir` share a prefix; replacing the shorter
/// one first would corrupt the longer. Ties are broken alphabetically so the
/// result does not depend on map iteration order.
pub fn render_longest_first<'a, I>(template: &str, variables: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    if template.is_empty() {
        return String::new();
    }

    let mut ordered: Vec<(&str, &str)> = variables.into_iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut result = template.to_string();
    for (key, value) in ordered {
        if key.is_empty() {
            continue;
        }
        result = result.replace(key, value);
    }

    result
}
