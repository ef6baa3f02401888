/// Expand `${NAME}` placeholders in raw config text from the process
/// environment. Unknown names are kept verbatim so later checks can tell an
/// unset credential from a real one.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated, emit the remainder untouched.
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match lookup(name).filter(|_| !name.is_empty()) {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("${");
                out.push_str(name);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| match name {
            "SPOTIFY_CLIENT_ID" => Some("abc123".to_string()),
            _ => None,
        };
        assert_eq!(
            substitute_env_with("client_id = \"${SPOTIFY_CLIENT_ID}\"", lookup),
            "client_id = \"abc123\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        let lookup = |_: &str| None;
        assert_eq!(
            substitute_env_with("${MEDIAFETCH_NONEXISTENT_XYZ}", lookup),
            "${MEDIAFETCH_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(substitute_env_with("dir = ${DOWNLOADS", lookup), "dir = ${DOWNLOADS");
    }

    #[test]
    fn dollar_without_brace_is_kept() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(substitute_env_with("cost $5", lookup), "cost $5");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
