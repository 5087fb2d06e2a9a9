//! Identifier casing between the registry's snake_case names and
//! TypeScript's camelCase/PascalCase.

fn split_leading_underscores(name: &str) -> (&str, &str) {
    let body = name.trim_start_matches('_');
    let prefix_len = name.len() - body.len();
    name.split_at(prefix_len)
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `user_id` → `userId`. Leading underscores are kept.
pub fn camel_case(name: &str) -> String {
    let (prefix, body) = split_leading_underscores(name);
    let mut parts = body.split('_').filter(|p| !p.is_empty());
    let mut out = String::from(prefix);
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    for part in parts {
        out.push_str(&capitalize(part));
    }
    out
}

/// `get_user` → `GetUser`. Parts that are already capitalized are kept, so
/// `TreeNode` stays `TreeNode`.
pub fn pascal_case(name: &str) -> String {
    let (prefix, body) = split_leading_underscores(name);
    let mut out = String::from(prefix);
    for part in body.split('_').filter(|p| !p.is_empty()) {
        out.push_str(&capitalize(part));
    }
    out
}
