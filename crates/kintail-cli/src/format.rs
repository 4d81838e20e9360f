//! `%(field)s` output templates.
//!
//! A placeholder is `%(name)` followed by one conversion character, which
//! is accepted and ignored: strings print raw, any other JSON value prints
//! as compact JSON. `%%` is a literal percent sign. Anything else is copied
//! through untouched, including a `%(` with no closing parenthesis.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(at) = rest.find('%') {
            literal.push_str(&rest[..at]);
            rest = &rest[at..];

            if let Some(after) = rest.strip_prefix("%%") {
                literal.push('%');
                rest = after;
                continue;
            }

            let field = rest.strip_prefix("%(").and_then(|inner| {
                let close = inner.find(')')?;
                let mut tail = inner[close + 1..].chars();
                let conversion = tail.next()?;
                conversion
                    .is_ascii_alphabetic()
                    .then(|| (inner[..close].to_string(), tail.as_str()))
            });

            match field {
                Some((name, after)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name));
                    rest = after;
                }
                None => {
                    literal.push('%');
                    rest = &rest[1..];
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    /// Fill the template from `fields`. Missing fields render empty.
    #[must_use]
    pub fn render(&self, fields: &Map<String, Value>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => match fields.get(name) {
                    Some(Value::String(text)) => out.push_str(text),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn default_template_prints_message() {
        let template = Template::parse("%(message)s");
        let out = template.render(&fields(json!({"message": "hello", "timestamp": 5})));
        assert_eq!(out, "hello");
    }

    #[test]
    fn mixes_literals_numbers_and_percent() {
        let template = Template::parse("[%(timestamp)d] 100%% %(logStream)s: %(message)s");
        let out = template.render(&fields(json!({
            "timestamp": 1_700_000_000_000_i64,
            "logStream": "i-0abc",
            "message": "up"
        })));
        assert_eq!(out, "[1700000000000] 100% i-0abc: up");
    }

    #[test]
    fn missing_fields_render_empty() {
        let template = Template::parse("<%(nope)s>");
        assert_eq!(template.render(&Map::new()), "<>");
    }

    #[test]
    fn nested_values_render_as_json() {
        let template = Template::parse("%(ctx)s");
        let out = template.render(&fields(json!({"ctx": {"user": 7}})));
        assert_eq!(out, r#"{"user":7}"#);
    }

    #[test]
    fn malformed_placeholders_stay_literal() {
        let template = Template::parse("50% %(open %(x)");
        assert_eq!(template.render(&Map::new()), "50% %(open %(x)");
        assert!(template.segments.iter().all(|s| matches!(s, Segment::Literal(_))));
    }

    #[test]
    fn conversion_character_is_ignored() {
        let template = Template::parse("%(a)s-%(b)r-%(c)d");
        let out = template.render(&fields(json!({"a": "x", "b": "y", "c": 3})));
        assert_eq!(out, "x-y-3");
    }
}
