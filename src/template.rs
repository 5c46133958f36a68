//! Variable substitution and JSON extraction for workflow steps.
//!
//! Substitution replaces `${name}`, `${env:NAME}` and `${func(args)}`
//! placeholders in step URLs, bodies and headers. Extraction pulls values
//! out of JSON response bodies using `$.a.b[i].c` style paths, feeding them
//! back into the iteration's [`Variables`]. Both are protocol-agnostic.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{Local, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::variables::Variables;

lazy_static! {
    /// Matches `${expr}` placeholders.
    static ref VAR_PATTERN: Regex = Regex::new(r"\$\{([^}]+)\}").expect("invalid placeholder regex");
}

/// Replace `${...}` placeholders in `text`.
///
/// If the input contains no placeholder the original string is returned
/// unchanged. All placeholder errors are accumulated and returned together;
/// on error no partially substituted string escapes.
pub fn substitute(text: &str, vars: &Variables) -> Result<String, String> {
    // Fast path: nothing to substitute.
    if !text.contains("${") {
        return Ok(text.to_string());
    }

    let mut result = String::with_capacity(text.len());
    let mut errors: Vec<String> = Vec::new();
    let mut last = 0;
    for capture in VAR_PATTERN.captures_iter(text) {
        let matched = capture.get(0).unwrap();
        let expr = capture.get(1).unwrap().as_str();
        result.push_str(&text[last..matched.start()]);
        last = matched.end();

        match resolve(expr, vars) {
            Ok(value) => result.push_str(&value),
            Err(e) => errors.push(e),
        }
    }
    result.push_str(&text[last..]);

    if errors.is_empty() {
        Ok(result)
    } else {
        Err(errors.join("; "))
    }
}

/// Apply [`substitute`] to every value of a string map.
pub fn substitute_map(
    map: &HashMap<String, String>,
    vars: &Variables,
) -> Result<HashMap<String, String>, String> {
    let mut result = HashMap::with_capacity(map.len());
    let mut errors: Vec<String> = Vec::new();
    for (key, value) in map {
        match substitute(value, vars) {
            Ok(substituted) => {
                result.insert(key.clone(), substituted);
            }
            Err(e) => errors.push(format!("header \"{}\": {}", key, e)),
        }
    }
    if errors.is_empty() {
        Ok(result)
    } else {
        errors.sort();
        Err(errors.join("; "))
    }
}

/// Resolve a single placeholder expression.
fn resolve(expr: &str, vars: &Variables) -> Result<String, String> {
    if let Some(env_name) = expr.strip_prefix("env:") {
        return match std::env::var(env_name) {
            Ok(value) => Ok(value),
            Err(_) => Err(format!("environment variable \"{}\" not set", env_name)),
        };
    }

    if let Some(result) = eval_function(expr) {
        return result;
    }

    match vars.get(expr) {
        Some(value) => Ok(render(value)),
        None => Err(format!("variable \"{}\" not found", expr)),
    }
}

/// Render a variable value into its substitution form.
///
/// Strings substitute without quotes; other primitives use their default
/// string form; arrays and objects substitute as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Evaluate a built-in function call, or `None` if `expr` is not one.
fn eval_function(expr: &str) -> Option<Result<String, String>> {
    let paren = expr.find('(')?;
    if !expr.ends_with(')') {
        return None;
    }
    let name = &expr[..paren];
    let args = &expr[paren + 1..expr.len() - 1];

    let result = match name {
        "uuid" => fn_uuid(args),
        "timestamp" => fn_timestamp(args),
        "timestamp_ms" => fn_timestamp_ms(args),
        "random" => fn_random(args),
        "random_string" => fn_random_string(args),
        "date" => fn_date(args),
        // Unknown names fall through to variable lookup.
        _ => return None,
    };
    Some(result.map_err(|e| format!("function {}: {}", name, e)))
}

/// `uuid()` — an RFC 4122 v4 UUID.
fn fn_uuid(args: &str) -> Result<String, String> {
    if !args.trim().is_empty() {
        return Err("uuid() takes no arguments".to_string());
    }
    Ok(Uuid::new_v4().to_string())
}

/// `timestamp()` — seconds since the Unix epoch.
fn fn_timestamp(args: &str) -> Result<String, String> {
    if !args.trim().is_empty() {
        return Err("timestamp() takes no arguments".to_string());
    }
    Ok(Utc::now().timestamp().to_string())
}

/// `timestamp_ms()` — milliseconds since the Unix epoch.
fn fn_timestamp_ms(args: &str) -> Result<String, String> {
    if !args.trim().is_empty() {
        return Err("timestamp_ms() takes no arguments".to_string());
    }
    Ok(Utc::now().timestamp_millis().to_string())
}

/// `random(min,max)` — uniform random integer in `[min, max]`.
fn fn_random(args: &str) -> Result<String, String> {
    let parts: Vec<&str> = args.split(',').collect();
    if parts.len() != 2 {
        return Err("random(min,max) requires exactly 2 arguments".to_string());
    }
    let min: i64 = parts[0]
        .trim()
        .parse()
        .map_err(|e| format!("invalid min value: {}", e))?;
    let max: i64 = parts[1]
        .trim()
        .parse()
        .map_err(|e| format!("invalid max value: {}", e))?;
    if min > max {
        return Err(format!("min ({}) must be <= max ({})", min, max));
    }
    Ok(rand::thread_rng().gen_range(min..=max).to_string())
}

/// `random_string(n)` — n characters from `[A-Za-z0-9]`.
fn fn_random_string(args: &str) -> Result<String, String> {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let length: usize = args
        .trim()
        .parse()
        .map_err(|e| format!("invalid length: {}", e))?;
    if length == 0 {
        return Err("length must be positive".to_string());
    }
    if length > 1000 {
        return Err("length must be <= 1000".to_string());
    }
    let mut rng = rand::thread_rng();
    let result: String = (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    Ok(result)
}

/// `date(fmt)` — the current wall time formatted with chrono's strftime
/// syntax, e.g. `date(%Y-%m-%d)`. An empty format yields RFC 3339.
fn fn_date(args: &str) -> Result<String, String> {
    let format = args.trim();
    if format.is_empty() {
        return Ok(Local::now().to_rfc3339());
    }
    let mut formatted = String::new();
    write!(&mut formatted, "{}", Local::now().format(format))
        .map_err(|_| format!("invalid date format '{}'", format))?;
    Ok(formatted)
}

/// Extract values from a JSON body, one path per target variable.
///
/// Invalid JSON fails the whole extraction; a missing path records an error
/// for its variable while the remaining rules are still evaluated. All
/// errors come back joined into one message.
pub fn extract(body: &[u8], rules: &HashMap<String, String>) -> Result<HashMap<String, Value>, String> {
    if rules.is_empty() {
        return Ok(HashMap::new());
    }

    let root: Value =
        serde_json::from_slice(body).map_err(|_| "invalid JSON in response body".to_string())?;

    let mut result = HashMap::with_capacity(rules.len());
    let mut errors: Vec<String> = Vec::new();
    for (name, path) in rules {
        match lookup(&root, path) {
            Some(value) => {
                result.insert(name.clone(), value);
            }
            None => errors.push(format!("path \"{}\" not found for variable \"{}\"", path, name)),
        }
    }

    if errors.is_empty() {
        Ok(result)
    } else {
        errors.sort();
        Err(errors.join("; "))
    }
}

/// One parsed path element.
enum Segment {
    Name(String),
    Index(usize),
    Wildcard,
}

/// Resolve a `$.a.b[i].c` style path against a JSON document.
fn lookup(root: &Value, path: &str) -> Option<Value> {
    let segments = parse_path(path)?;
    walk(root, &segments)
}

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let trimmed = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);

    let mut segments = Vec::new();
    let mut name = String::new();
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !name.is_empty() {
                    segments.push(Segment::Name(std::mem::take(&mut name)));
                }
            }
            '[' => {
                if !name.is_empty() {
                    segments.push(Segment::Name(std::mem::take(&mut name)));
                }
                let mut content = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(inner) => content.push(inner),
                        // Unterminated bracket.
                        None => return None,
                    }
                }
                if content == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    segments.push(Segment::Index(content.parse().ok()?));
                }
            }
            _ => name.push(c),
        }
    }
    if !name.is_empty() {
        segments.push(Segment::Name(name));
    }
    Some(segments)
}

fn walk(value: &Value, segments: &[Segment]) -> Option<Value> {
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Some(value.clone()),
    };
    match first {
        Segment::Name(name) => value.as_object()?.get(name).and_then(|v| walk(v, rest)),
        Segment::Index(index) => value.as_array()?.get(*index).and_then(|v| walk(v, rest)),
        Segment::Wildcard => {
            let array = value.as_array()?;
            let collected: Vec<Value> = array.iter().filter_map(|v| walk(v, rest)).collect();
            Some(Value::Array(collected))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn vars_with(pairs: &[(&str, Value)]) -> Variables {
        let mut vars = Variables::new();
        for (name, value) in pairs {
            vars.set(*name, value.clone());
        }
        vars
    }

    #[test]
    fn no_placeholder_is_unchanged() {
        let vars = Variables::new();
        let input = "http://localhost/plain?x=1";
        assert_eq!(substitute(input, &vars).unwrap(), input);
        assert_eq!(substitute("", &vars).unwrap(), "");
        // A lone dollar sign is not a placeholder.
        assert_eq!(substitute("cost: $5", &vars).unwrap(), "cost: $5");
    }

    #[test]
    fn substitutes_variables() {
        let vars = vars_with(&[("id", json!("test-123")), ("count", json!(7))]);
        assert_eq!(
            substitute("/users/${id}?n=${count}", &vars).unwrap(),
            "/users/test-123?n=7"
        );
    }

    #[test]
    fn renders_primitive_values() {
        let vars = vars_with(&[
            ("s", json!("text")),
            ("i", json!(42)),
            ("f", json!(1.5)),
            ("b", json!(true)),
            ("n", json!(null)),
        ]);
        assert_eq!(
            substitute("${s},${i},${f},${b},${n}", &vars).unwrap(),
            "text,42,1.5,true,null"
        );
    }

    #[test]
    fn unknown_variable_mentions_name() {
        let vars = Variables::new();
        let err = substitute("value: ${missing_thing}", &vars).unwrap_err();
        assert!(err.contains("missing_thing"), "error was: {}", err);
    }

    #[test]
    fn errors_accumulate() {
        let vars = vars_with(&[("known", json!("yes"))]);
        let err = substitute("${one} ${known} ${two}", &vars).unwrap_err();
        assert!(err.contains("\"one\""));
        assert!(err.contains("\"two\""));
        assert!(!err.contains("\"known\""));
    }

    #[test]
    fn environment_variables() {
        std::env::set_var("STAMPEDE_TEMPLATE_TEST", "from-env");
        let vars = Variables::new();
        assert_eq!(
            substitute("${env:STAMPEDE_TEMPLATE_TEST}", &vars).unwrap(),
            "from-env"
        );
        let err = substitute("${env:STAMPEDE_UNSET_TEST}", &vars).unwrap_err();
        assert!(err.contains("STAMPEDE_UNSET_TEST"));
    }

    #[test]
    fn substitute_map_accumulates_errors() {
        let vars = vars_with(&[("token", json!("abc"))]);
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer ${token}".to_string());
        headers.insert("X-Trace".to_string(), "${trace_id}".to_string());
        let err = substitute_map(&headers, &vars).unwrap_err();
        assert!(err.contains("X-Trace"));
        assert!(err.contains("trace_id"));

        headers.remove("X-Trace");
        let substituted = substitute_map(&headers, &vars).unwrap();
        assert_eq!(substituted["Authorization"], "Bearer abc");
    }

    #[test]
    fn uuid_function() {
        let vars = Variables::new();
        let value = substitute("${uuid()}", &vars).unwrap();
        let pattern = Regex::new(
            r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$",
        )
        .unwrap();
        assert!(pattern.is_match(&value), "not a v4 uuid: {}", value);
        assert!(substitute("${uuid(5)}", &vars).is_err());
    }

    #[test]
    fn timestamp_functions() {
        let vars = Variables::new();
        let seconds: i64 = substitute("${timestamp()}", &vars).unwrap().parse().unwrap();
        // Past 2020-01-01, sanity only.
        assert!(seconds > 1_577_836_800);
        let millis: i64 = substitute("${timestamp_ms()}", &vars).unwrap().parse().unwrap();
        assert!(millis > seconds * 1000 - 1000);
    }

    #[test]
    fn random_function() {
        let vars = Variables::new();
        for _ in 0..20 {
            let value: i64 = substitute("${random(5,10)}", &vars).unwrap().parse().unwrap();
            assert!((5..=10).contains(&value));
        }
        assert_eq!(substitute("${random(3,3)}", &vars).unwrap(), "3");
        assert_eq!(substitute("${random(-2,-2)}", &vars).unwrap(), "-2");
        assert!(substitute("${random(10,5)}", &vars).is_err());
        assert!(substitute("${random(1)}", &vars).is_err());
        assert!(substitute("${random(a,b)}", &vars).is_err());
    }

    #[test]
    fn random_string_function() {
        let vars = Variables::new();
        let value = substitute("${random_string(32)}", &vars).unwrap();
        assert_eq!(value.len(), 32);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(substitute("${random_string(0)}", &vars).is_err());
        assert!(substitute("${random_string(1001)}", &vars).is_err());
    }

    #[test]
    fn date_function() {
        let vars = Variables::new();
        let year = substitute("${date(%Y)}", &vars).unwrap();
        assert_eq!(year, Local::now().format("%Y").to_string());
        let date = substitute("${date(%Y-%m-%d)}", &vars).unwrap();
        assert_eq!(date.len(), 10);
        // Empty format falls back to RFC 3339.
        let rfc3339 = substitute("${date()}", &vars).unwrap();
        assert!(rfc3339.contains('T'));
    }

    #[test]
    fn unknown_function_is_a_variable_error() {
        let vars = Variables::new();
        let err = substitute("${nonsense(1)}", &vars).unwrap_err();
        assert!(err.contains("nonsense"));
    }

    #[test]
    fn extracts_nested_values() {
        let body = br#"{"id":"test-123","user":{"name":"alice","roles":["admin","dev"]}}"#;
        let mut rules = HashMap::new();
        rules.insert("rid".to_string(), "$.id".to_string());
        rules.insert("name".to_string(), "$.user.name".to_string());
        rules.insert("first_role".to_string(), "$.user.roles[0]".to_string());
        let extracted = extract(body, &rules).unwrap();
        assert_eq!(extracted["rid"], json!("test-123"));
        assert_eq!(extracted["name"], json!("alice"));
        assert_eq!(extracted["first_role"], json!("admin"));
    }

    #[test]
    fn extracts_wildcards() {
        let body = br#"{"items":[{"id":1},{"id":2},{"id":3}]}"#;
        let mut rules = HashMap::new();
        rules.insert("ids".to_string(), "$.items[*].id".to_string());
        let extracted = extract(body, &rules).unwrap();
        assert_eq!(extracted["ids"], json!([1, 2, 3]));
    }

    #[test]
    fn extracts_whole_document() {
        let body = br#"{"a":1}"#;
        let mut rules = HashMap::new();
        rules.insert("doc".to_string(), "$".to_string());
        let extracted = extract(body, &rules).unwrap();
        assert_eq!(extracted["doc"], json!({"a": 1}));
    }

    #[test]
    fn invalid_json_fails_whole_extraction() {
        let mut rules = HashMap::new();
        rules.insert("x".to_string(), "$.x".to_string());
        let err = extract(b"not json", &rules).unwrap_err();
        assert!(err.contains("invalid JSON"));
    }

    #[test]
    fn missing_paths_all_mentioned() {
        let body = br#"{"present":1}"#;
        let mut rules = HashMap::new();
        rules.insert("a".to_string(), "$.missing_one".to_string());
        rules.insert("b".to_string(), "$.missing_two".to_string());
        rules.insert("ok".to_string(), "$.present".to_string());
        let err = extract(body, &rules).unwrap_err();
        assert!(err.contains("\"a\""));
        assert!(err.contains("\"b\""));
        assert!(!err.contains("\"ok\""));
    }

    #[test]
    fn index_out_of_bounds_is_missing() {
        let body = br#"{"items":[1]}"#;
        let mut rules = HashMap::new();
        rules.insert("x".to_string(), "$.items[5]".to_string());
        assert!(extract(body, &rules).is_err());
    }
}
