//! snake_case / camelCase conversion for column names and output keys

/// Convert `snake_case` to `camelCase`
///
/// Leading underscores are dropped; consecutive underscores collapse.
///
/// ```
/// use runtara_dynamic_query::naming::snake_to_camel;
///
/// assert_eq!(snake_to_camel("dept_name"), "deptName");
/// assert_eq!(snake_to_camel("id"), "id");
/// ```
pub fn snake_to_camel(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut upper_next = false;

    for c in input.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }

    out
}

/// Convert `camelCase` (or `PascalCase`) to `snake_case`
///
/// Runs of capitals are treated as one word: `HTTPStatus` becomes `http_status`.
///
/// ```
/// use runtara_dynamic_query::naming::camel_to_snake;
///
/// assert_eq!(camel_to_snake("deptName"), "dept_name");
/// ```
pub fn camel_to_snake(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower =
                i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && !out.ends_with('_') && (prev_lower || (prev_upper && next_lower)) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}
