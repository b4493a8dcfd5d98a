//! Prefix rewriting of `api` endpoint fields in fetched config documents

use serde_json::{Map, Value};

/// Recursively rewrite every string found under an `api` key so it routes
/// through the relay.
///
/// Returns a fresh tree; the input is never mutated and containers are not
/// shared with the result, so the same document can be rewritten with
/// different prefixes concurrently.
pub fn rewrite(value: &Value, prefix: &str) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|item| rewrite(item, prefix)).collect()),
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields {
                if key == "api" {
                    if let Value::String(api_url) = field {
                        out.insert(key.clone(), Value::String(rewrite_api_url(api_url, prefix)));
                        continue;
                    }
                }
                out.insert(key.clone(), rewrite(field, prefix));
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

/// Apply the URL rule to a single `api` value: unwrap any previous
/// `?url=` redirection, then prepend the prefix unless already present.
fn rewrite_api_url(api_url: &str, prefix: &str) -> String {
    let unwrapped = match api_url.find("?url=") {
        Some(index) => &api_url[index + "?url=".len()..],
        None => api_url,
    };
    if unwrapped.starts_with(prefix) {
        unwrapped.to_string()
    } else {
        format!("{}{}", prefix, unwrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewrite_unwraps_previous_redirect() {
        let input = json!({"api": "http://x?url=http://y"});
        assert_eq!(rewrite(&input, "P/"), json!({"api": "P/http://y"}));
    }

    #[test]
    fn test_rewrite_no_double_prefix() {
        let input = json!({"api": "P/already"});
        assert_eq!(rewrite(&input, "P/"), json!({"api": "P/already"}));
    }

    #[test]
    fn test_rewrite_prepends_prefix() {
        let input = json!({"api": "https://cj.example.com/api.php"});
        assert_eq!(
            rewrite(&input, "https://relay.example/?url="),
            json!({"api": "https://relay.example/?url=https://cj.example.com/api.php"})
        );
    }

    #[test]
    fn test_rewrite_recurses_into_nested_structures() {
        let input = json!({
            "sites": [
                {"name": "a", "api": "https://a.example/api.php"},
                {"name": "b", "nested": {"api": "https://b.example/api.php"}}
            ],
            "count": 2
        });
        let expected = json!({
            "sites": [
                {"name": "a", "api": "P/https://a.example/api.php"},
                {"name": "b", "nested": {"api": "P/https://b.example/api.php"}}
            ],
            "count": 2
        });
        assert_eq!(rewrite(&input, "P/"), expected);
    }

    #[test]
    fn test_rewrite_leaves_non_api_strings_alone() {
        let input = json!({"name": "http://x?url=http://y", "enabled": true});
        assert_eq!(rewrite(&input, "P/"), input);
    }

    #[test]
    fn test_rewrite_leaves_non_string_api_alone() {
        let input = json!({"api": 42});
        assert_eq!(rewrite(&input, "P/"), json!({"api": 42}));
    }

    #[test]
    fn test_rewrite_scalars_pass_through() {
        assert_eq!(rewrite(&json!(null), "P/"), json!(null));
        assert_eq!(rewrite(&json!("text"), "P/"), json!("text"));
        assert_eq!(rewrite(&json!(3.5), "P/"), json!(3.5));
    }

    #[test]
    fn test_rewrite_does_not_mutate_input() {
        let input = json!({"sites": [{"api": "https://a.example/api.php"}]});
        let snapshot = input.clone();
        let _ = rewrite(&input, "P/");
        assert_eq!(input, snapshot);
    }
}
