use std::sync::LazyLock;

use minijinja::{Environment, UndefinedBehavior};
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::reducer::{deep_map_value, Reducer};

/// Matches a `{{ ... }}` action, including trim markers.
static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("valid action pattern"));

/// Matches a field path written with a leading dot, e.g. `.Spec.Head.SHA`, or a string
/// literal, which is left untouched.
static DOTTED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<quoted>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')|(?P<lead>^|[\s(|,])\.(?P<head>[A-Za-z_])"#)
        .expect("valid path pattern")
});

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("failed to render template {template:?}: {source}")]
    Render {
        template: String,
        source: minijinja::Error,
    },
}

/// Renders the string leaves of resource declarations against a data context.
///
/// Referencing a missing field is an error. Paths may be written with a leading dot
/// (`{{ .Spec.Number }}`) as well as bare (`{{ Spec.Number }}`).
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Whether `s` contains anything the engine would interpret.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%") || s.contains("{#")
    }

    pub fn render(&self, template: &str, context: &Value) -> Result<String, TemplateError> {
        if !Self::is_template(template) {
            return Ok(template.to_owned());
        }

        self.env
            .render_str(&strip_leading_dots(template), context)
            .map_err(|source| TemplateError::Render {
                template: template.to_owned(),
                source,
            })
    }

    /// A reducer that renders every string in a tree and leaves other values alone.
    pub fn reducer<'a>(&'a self, context: &'a Value) -> impl Reducer + 'a {
        deep_map_value(move |value| match value {
            Value::String(s) => Ok(Value::String(self.render(&s, context)?)),
            other => Ok(other),
        })
    }
}

fn strip_leading_dots(template: &str) -> String {
    ACTION
        .replace_all(template, |action: &Captures| {
            let body = DOTTED_PATH.replace_all(&action[1], |path: &Captures| match path.name("quoted") {
                Some(quoted) => quoted.as_str().to_owned(),
                None => format!("{}{}", &path["lead"], &path["head"]),
            });
            format!("{{{{{body}}}}}")
        })
        .into_owned()
}
