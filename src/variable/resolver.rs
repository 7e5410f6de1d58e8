use crate::variable::macros::MacroRegistry;
use crate::variable::types::VariableContext;
use regex::{Captures, Regex};
use std::sync::{Arc, OnceLock};

/// Maximum nesting of expansions (variable values, macro arguments, assignment values).
pub const MAX_RECURSION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Variable '{name}' is not defined")]
    UndefinedVariable { name: String },

    #[error("Invalid expression '{{{expression}}}'")]
    InvalidExpression { expression: String },

    #[error("Macro function '{name}' is not defined")]
    UnknownMacro { name: String },

    #[error("Macro '{name}' failed: {message}")]
    MacroFailed { name: String, message: String },

    #[error("Expansion of '{expression}' exceeded {limit} nested levels (circular reference?)")]
    RecursionLimit { expression: String, limit: usize },

    #[error("Assignment '{{{expression}}}' is not allowed here")]
    AssignmentNotAllowed { expression: String },
}

/// Something expressions can read variables from and assign them to.
trait Bindings {
    fn lookup(&self, name: &str) -> Option<String>;
    fn assign(&mut self, expression: &str, name: &str, value: &str) -> Result<(), ExpressionError>;
}

impl Bindings for VariableContext {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name)
    }

    fn assign(&mut self, _expression: &str, name: &str, value: &str) -> Result<(), ExpressionError> {
        self.set(name, value);
        Ok(())
    }
}

struct ReadOnly<F>(F);

impl<F: Fn(&str) -> Option<String>> Bindings for ReadOnly<F> {
    fn lookup(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn assign(&mut self, expression: &str, _name: &str, _value: &str) -> Result<(), ExpressionError> {
        Err(ExpressionError::AssignmentNotAllowed {
            expression: expression.to_string(),
        })
    }
}

/// Assignments made while resolving one request. They reach a context only through
/// [`Assignments::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignments {
    values: Vec<(String, String)>,
}

impl Assignments {
    /// Latest value assigned to `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Write every assignment into `context`, oldest first.
    pub fn commit(self, context: &mut VariableContext) {
        for (name, value) in self.values {
            context.set(name, value);
        }
    }
}

struct Staged<'a> {
    context: &'a VariableContext,
    assignments: &'a mut Assignments,
}

impl Bindings for Staged<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.assignments
            .get(name)
            .map(str::to_string)
            .or_else(|| self.context.get(name))
    }

    fn assign(&mut self, _expression: &str, name: &str, value: &str) -> Result<(), ExpressionError> {
        self.assignments
            .values
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}

/// Expands `{...}` expressions in templates.
///
/// Recognized forms:
/// - `{NAME}`: value of the variable (local scope first, then global)
/// - `{NAME | default}`: value of the variable, or `default` when it is undefined
/// - `{NAME = literal}`: assign the (expanded) literal and expand to it
/// - `{macro(args)}`: call a registered macro with comma-separated, expanded arguments
/// - `{NAME = macro(args)}`: assign the macro result and expand to it
///
/// Variable names are `[_A-Z0-9]+`; macro names are lower-case identifiers. Braces whose
/// content does not start with a letter or `_` are copied literally, so JSON bodies and regex
/// quantifiers pass through. Expanded variable values are expanded again, up to
/// [`MAX_RECURSION_DEPTH`] levels.
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    macros: Arc<MacroRegistry>,
}

impl VariableResolver {
    pub fn new(macros: Arc<MacroRegistry>) -> Self {
        Self { macros }
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    /// Expand every expression in `template`. Assignments write into `context`.
    pub fn resolve(
        &self,
        template: &str,
        context: &mut VariableContext,
    ) -> Result<String, ExpressionError> {
        self.expand(template, context, 0)
    }

    /// Expand without touching `context`. Assignments are recorded in `assignments`, and later
    /// expressions of the same pass see them.
    pub fn resolve_staged(
        &self,
        template: &str,
        context: &VariableContext,
        assignments: &mut Assignments,
    ) -> Result<String, ExpressionError> {
        self.expand(
            template,
            &mut Staged {
                context,
                assignments,
            },
            0,
        )
    }

    /// Expand without allowing assignments; used for capture patterns.
    pub fn resolve_read_only(
        &self,
        template: &str,
        context: &VariableContext,
    ) -> Result<String, ExpressionError> {
        self.resolve_with(template, |name| context.get(name))
    }

    /// Read-only expansion against an arbitrary lookup.
    pub fn resolve_with<F>(&self, template: &str, lookup: F) -> Result<String, ExpressionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.expand(template, &mut ReadOnly(lookup), 0)
    }

    /// Replace `${VAR}` with process environment variables; unknown names are left as-is.
    pub fn resolve_env_vars(text: &str) -> String {
        static ENV_REGEX: OnceLock<Regex> = OnceLock::new();
        let re = ENV_REGEX.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

        re.replace_all(text, |caps: &Captures| {
            let env_name = &caps[1];
            std::env::var(env_name).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
    }

    fn expand<B: Bindings>(
        &self,
        text: &str,
        bindings: &mut B,
        depth: usize,
    ) -> Result<String, ExpressionError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(ExpressionError::RecursionLimit {
                expression: text.to_string(),
                limit: MAX_RECURSION_DEPTH,
            });
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];

            let Some(end) = matching_brace(after) else {
                // Unclosed brace is plain text
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let token = &after[..end];
            if !is_expression(token) {
                out.push('{');
                rest = after;
                continue;
            }

            let value = self.evaluate(token, bindings, depth)?;
            out.push_str(&value);
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn evaluate<B: Bindings>(
        &self,
        token: &str,
        bindings: &mut B,
        depth: usize,
    ) -> Result<String, ExpressionError> {
        let expression = token.trim();

        if let Some(caps) = assignment_regex().captures(expression) {
            let name = &caps[1];
            let rhs = caps[2].trim();
            let value = match macro_regex().captures(rhs) {
                Some(call) => self.call(&call[1], &call[2], bindings, depth)?,
                None => self.expand(rhs, bindings, depth + 1)?,
            };
            bindings.assign(expression, name, &value)?;
            return Ok(value);
        }

        if let Some((name, default)) = expression.split_once('|') {
            let name = name.trim();
            if is_variable_name(name) {
                return match bindings.lookup(name) {
                    Some(value) => self.expand(&value, bindings, depth + 1),
                    None => self.expand(default.trim(), bindings, depth + 1),
                };
            }
        }

        if let Some(call) = macro_regex().captures(expression) {
            return self.call(&call[1], &call[2], bindings, depth);
        }

        if is_variable_name(expression) {
            let value = bindings
                .lookup(expression)
                .ok_or_else(|| ExpressionError::UndefinedVariable {
                    name: expression.to_string(),
                })?;
            return self.expand(&value, bindings, depth + 1);
        }

        Err(ExpressionError::InvalidExpression {
            expression: expression.to_string(),
        })
    }

    fn call<B: Bindings>(
        &self,
        name: &str,
        raw_args: &str,
        bindings: &mut B,
        depth: usize,
    ) -> Result<String, ExpressionError> {
        if !self.macros.contains(name) {
            return Err(ExpressionError::UnknownMacro {
                name: name.to_string(),
            });
        }
        let args = split_args(raw_args)
            .into_iter()
            .map(|arg| self.expand(arg, bindings, depth + 1))
            .collect::<Result<Vec<_>, _>>()?;
        self.macros.invoke(name, &args)
    }
}

fn assignment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^([_A-Z0-9]+)\s*=\s*(.*)$").unwrap())
}

fn macro_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^([_a-z][_a-z0-9]*)\s*\((.*)\)$").unwrap())
}

pub(crate) fn is_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// An expression starts (after optional spaces) with a letter or underscore.
fn is_expression(token: &str) -> bool {
    token
        .trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

/// Index of the `}` closing an already-opened `{`, honouring nesting.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Split macro arguments on top-level commas. An empty argument list yields no arguments.
fn split_args(raw: &str) -> Vec<&str> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let (mut braces, mut parens, mut start) = (0usize, 0usize, 0usize);
    for (i, c) in raw.char_indices() {
        match c {
            '{' => braces += 1,
            '}' => braces = braces.saturating_sub(1),
            '(' => parens += 1,
            ')' => parens = parens.saturating_sub(1),
            ',' if braces == 0 && parens == 0 => {
                args.push(raw[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(raw[start..].trim());
    args
}
