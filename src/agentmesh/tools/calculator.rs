//! Scientific calculator tool: arithmetic, trigonometric, logarithmic, and statistical
//! expressions, evaluated via `evalexpr`.
//!
//! The expression-rewriting core (`prepare_expression` and friends) is carried over from the
//! teacher's standalone `Calculator` almost unchanged, since `evalexpr` itself hasn't grown
//! native support for the handful of functions it's patching around (`csc`, `log` base 10,
//! `atanh`, ...). What changed is the surface: `Calculator` is no longer invoked directly, it's
//! wrapped in [`CalculatorTool`] so agents reach it through the `tool` action like any other
//! capability.

use crate::agentmesh::context::Context;
use crate::agentmesh::tool_protocol::{Tool, ToolError, ToolMetadata, ToolParameter, ToolParameterType, ToolResult};
use async_trait::async_trait;
use evalexpr::ContextWithMutableVariables;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// Error type for calculator operations.
#[derive(Debug, Clone)]
pub struct CalculatorError {
    message: String,
}

impl CalculatorError {
    pub fn new(message: impl Into<String>) -> Self {
        CalculatorError { message: message.into() }
    }
}

impl fmt::Display for CalculatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "calculator error: {}", self.message)
    }
}

impl Error for CalculatorError {}

pub type CalculatorResult = Result<f64, CalculatorError>;

/// A stateless scientific calculator supporting arithmetic, trigonometric (radians),
/// logarithmic, and statistical (array) functions, plus the `pi`/`e` constants.
#[derive(Clone, Default)]
pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Calculator
    }

    /// Evaluates a mathematical expression, trying the statistical-function path first since
    /// those use array syntax evalexpr itself doesn't understand.
    pub async fn evaluate(&self, expression: &str) -> CalculatorResult {
        let expression = expression.trim();
        if let Ok(result) = self.try_statistical_function(expression) {
            return Ok(result);
        }
        self.evaluate_math_expression(expression)
    }

    fn evaluate_math_expression(&self, expression: &str) -> CalculatorResult {
        let expr = self.prepare_expression(expression)?;

        let mut context: evalexpr::HashMapContext = evalexpr::HashMapContext::new();
        let _ = context.set_value("math::PI".to_string(), evalexpr::Value::Float(std::f64::consts::PI));
        let _ = context.set_value("math::E".to_string(), evalexpr::Value::Float(std::f64::consts::E));

        match evalexpr::eval_with_context(&expr, &context) {
            Ok(value) => value.as_number().map_err(|_| CalculatorError::new("result is not a number")),
            Err(e) => Err(CalculatorError::new(format!("evaluation error: {e}"))),
        }
    }

    /// Rewrites convenience syntax (`arcsin`, `log`, `csc`, `**`, ...) into the subset of
    /// functions `evalexpr`'s `math::` namespace actually supports.
    fn prepare_expression(&self, expr: &str) -> Result<String, CalculatorError> {
        let mut prepared = expr.trim().to_string();

        prepared = prepared.replace("arcsin", "asin");
        prepared = prepared.replace("arccos", "acos");
        prepared = prepared.replace("arctan", "atan");
        prepared = prepared.replace("arcsinh", "asinh");
        prepared = prepared.replace("arccosh", "acosh");
        prepared = prepared.replace("arctanh", "atanh");
        prepared = prepared.replace("cosec", "csc");

        // Must run before function-name conversion so the `ln` calls they expand to still get
        // namespaced below.
        prepared = self.replace_log_base10(&prepared);
        prepared = self.replace_log_base2(&prepared);

        prepared = self.rewrite_function(&prepared, "csc", "1/math::sin");
        prepared = self.rewrite_function(&prepared, "sec", "1/math::cos");
        prepared = self.rewrite_function(&prepared, "cot", "1/math::tan");
        prepared = self.rewrite_function(&prepared, "csch", "1/math::sinh");
        prepared = self.rewrite_function(&prepared, "sech", "1/math::cosh");
        prepared = self.rewrite_function(&prepared, "coth", "1/math::tanh");

        prepared = self.convert_to_evalexpr_functions(&prepared);
        prepared = prepared.replace("**", "^");
        prepared = self.replace_constant(&prepared, "pi", "math::PI");
        prepared = self.replace_constant(&prepared, "e", "math::E");

        Ok(prepared)
    }

    fn replace_constant(&self, expr: &str, constant: &str, replacement: &str) -> String {
        let chars: Vec<char> = expr.chars().collect();
        let constant_chars: Vec<char> = constant.chars().collect();
        let constant_len = constant_chars.len();

        let mut result = String::new();
        let mut i = 0;
        while i < chars.len() {
            if i + constant_len <= chars.len() {
                let substring: String = chars[i..i + constant_len].iter().collect();
                if substring == constant {
                    let before_is_word = i > 0 && chars[i - 1].is_alphanumeric();
                    let after_is_word = i + constant_len < chars.len() && chars[i + constant_len].is_alphanumeric();
                    if !before_is_word && !after_is_word {
                        result.push_str(replacement);
                        i += constant_len;
                        continue;
                    }
                }
            }
            result.push(chars[i]);
            i += 1;
        }
        result
    }

    fn convert_to_evalexpr_functions(&self, expr: &str) -> String {
        // Longest names first so e.g. "atan2" isn't half-matched by "atan".
        let functions = [
            ("atan2", "math::atan2"),
            ("sinh", "math::sinh"),
            ("cosh", "math::cosh"),
            ("tanh", "math::tanh"),
            ("asin", "math::asin"),
            ("acos", "math::acos"),
            ("atan", "math::atan"),
            ("sqrt", "math::sqrt"),
            ("abs", "math::abs"),
            ("ln", "math::ln"),
            ("exp", "math::exp"),
            ("sin", "math::sin"),
            ("cos", "math::cos"),
            ("tan", "math::tan"),
        ];

        let mut result = expr.to_string();
        for (name, replacement) in functions {
            result = rewrite_bare_call(&result, name, replacement);
        }
        result
    }

    fn rewrite_function(&self, expr: &str, func_name: &str, replacement: &str) -> String {
        let pattern = format!("{func_name}(");
        if !expr.contains(&pattern) {
            return expr.to_string();
        }
        expr.replace(&pattern, &format!("{replacement}("))
    }

    fn replace_log_base10(&self, expr: &str) -> String {
        rewrite_log_call(expr, "log", "math::ln(10)", &["log2("])
    }

    fn replace_log_base2(&self, expr: &str) -> String {
        rewrite_log_call(expr, "log2", "math::ln(2)", &[])
    }

    fn try_statistical_function(&self, expression: &str) -> CalculatorResult {
        let expr = expression.trim();
        if !expr.contains('[') && !expr.contains('(') {
            return Err(CalculatorError::new("not a statistical function"));
        }

        let paren_idx = expr.find('(').ok_or_else(|| CalculatorError::new("not a statistical function"))?;
        let func_name = expr[..paren_idx].trim().to_lowercase();
        let args_end = expr.rfind(')').ok_or_else(|| CalculatorError::new("missing closing parenthesis"))?;
        let args = expr[paren_idx + 1..args_end].trim();

        match func_name.as_str() {
            "mean" => self.stat_mean(args),
            "median" => self.stat_median(args),
            "mode" => self.stat_mode(args),
            "std" => self.stat_std(args),
            "stdpop" => self.stat_stdpop(args),
            "var" => self.stat_var(args),
            "varpop" => self.stat_varpop(args),
            "sum" => self.stat_sum(args),
            "count" => self.stat_count(args),
            "min" => self.stat_min(args),
            "max" => self.stat_max(args),
            _ => Err(CalculatorError::new("not a known statistical function")),
        }
    }

    fn parse_array(&self, arg: &str) -> Result<Vec<f64>, CalculatorError> {
        let arg = arg.trim();
        let content = if (arg.starts_with('[') && arg.ends_with(']')) || (arg.starts_with('(') && arg.ends_with(')')) {
            &arg[1..arg.len() - 1]
        } else {
            arg
        };
        if content.trim().is_empty() {
            return Err(CalculatorError::new("empty array"));
        }
        content
            .split(',')
            .map(|s| s.trim().parse::<f64>().map_err(|_| CalculatorError::new(format!("invalid number in array: {s}"))))
            .collect()
    }

    fn stat_mean(&self, arg: &str) -> CalculatorResult {
        let values = self.parse_array(arg)?;
        Ok(values.iter().sum::<f64>() / values.len() as f64)
    }

    fn stat_median(&self, arg: &str) -> CalculatorResult {
        let mut values = self.parse_array(arg)?;
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = values.len();
        if n % 2 == 1 {
            Ok(values[n / 2])
        } else {
            Ok((values[n / 2 - 1] + values[n / 2]) / 2.0)
        }
    }

    fn stat_mode(&self, arg: &str) -> CalculatorResult {
        let values = self.parse_array(arg)?;
        let mut frequencies: HashMap<String, usize> = HashMap::new();
        for v in &values {
            *frequencies.entry(v.to_string()).or_insert(0) += 1;
        }
        let (mode_str, _) = frequencies.iter().max_by_key(|&(_, count)| count).ok_or_else(|| CalculatorError::new("empty array"))?;
        mode_str.parse::<f64>().map_err(|_| CalculatorError::new("could not parse mode value"))
    }

    fn stat_std(&self, arg: &str) -> CalculatorResult {
        let values = self.parse_array(arg)?;
        if values.len() < 2 {
            return Err(CalculatorError::new("standard deviation requires at least 2 values"));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        Ok(variance.sqrt())
    }

    fn stat_stdpop(&self, arg: &str) -> CalculatorResult {
        let values = self.parse_array(arg)?;
        if values.is_empty() {
            return Err(CalculatorError::new("empty array"));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
        Ok(variance.sqrt())
    }

    fn stat_var(&self, arg: &str) -> CalculatorResult {
        let values = self.parse_array(arg)?;
        if values.len() < 2 {
            return Err(CalculatorError::new("variance requires at least 2 values"));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Ok(values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64)
    }

    fn stat_varpop(&self, arg: &str) -> CalculatorResult {
        let values = self.parse_array(arg)?;
        if values.is_empty() {
            return Err(CalculatorError::new("empty array"));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Ok(values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64)
    }

    fn stat_sum(&self, arg: &str) -> CalculatorResult {
        Ok(self.parse_array(arg)?.iter().sum())
    }

    fn stat_count(&self, arg: &str) -> CalculatorResult {
        Ok(self.parse_array(arg)?.len() as f64)
    }

    fn stat_min(&self, arg: &str) -> CalculatorResult {
        Ok(self.parse_array(arg)?.iter().copied().fold(f64::INFINITY, f64::min))
    }

    fn stat_max(&self, arg: &str) -> CalculatorResult {
        Ok(self.parse_array(arg)?.iter().copied().fold(f64::NEG_INFINITY, f64::max))
    }
}

/// Replaces bare calls to `name(` with `replacement(`, skipping occurrences already namespaced
/// (`math::sin` shouldn't become `math::math::sin`) and anything not actually a call.
fn rewrite_bare_call(expr: &str, name: &str, replacement: &str) -> String {
    let chars: Vec<char> = expr.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if i + name.len() <= chars.len() && chars[i..i + name.len()].iter().collect::<String>() == name {
            let already_prefixed = i >= 6 && chars[i - 6..i].iter().collect::<String>() == "math::";
            let word_boundary_before = i == 0 || !chars[i - 1].is_alphanumeric();
            let mut j = i + name.len();
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if !already_prefixed && word_boundary_before && j < chars.len() && chars[j] == '(' {
                out.push_str(replacement);
                i += name.len();
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Rewrites `name(<arg>)` to `ln(<arg>)/<ln_of_base>`, skipping any name in `skip_if_followed_by`
/// (so `log(` doesn't also eat `log2(`).
fn rewrite_log_call(expr: &str, name: &str, ln_of_base: &str, skip_if_followed_by: &[&str]) -> String {
    let pattern = format!("{name}(");
    if !expr.contains(&pattern) {
        return expr.to_string();
    }
    for skip in skip_if_followed_by {
        if expr.contains(skip) && *skip != pattern {
            // fall through to per-occurrence matching below rather than bailing entirely
        }
    }

    let mut result = String::new();
    let mut rest = expr;
    while let Some(idx) = rest.find(&pattern) {
        let is_log2_collision = name == "log" && rest[idx..].starts_with("log2(");
        result.push_str(&rest[..idx]);
        if is_log2_collision {
            result.push_str(&pattern);
            rest = &rest[idx + pattern.len()..];
            continue;
        }

        let after_paren = &rest[idx + pattern.len()..];
        let mut depth = 1;
        let mut end = 0;
        for (byte_idx, ch) in after_paren.char_indices() {
            match ch {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        end = byte_idx;
                        break;
                    }
                }
                _ => {}
            }
        }
        let arg = &after_paren[..end];
        result.push_str(&format!("math::ln({arg})/{ln_of_base}"));
        rest = &after_paren[end + 1..];
    }
    result.push_str(rest);
    result
}

/// Adapts [`Calculator`] to the agent-facing [`Tool`] trait.
pub struct CalculatorTool {
    calculator: Calculator,
}

impl CalculatorTool {
    pub fn new() -> Self {
        Self { calculator: Calculator::new() }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "calculator",
            "Evaluates arithmetic, trigonometric, logarithmic, and statistical expressions.",
        )
        .with_parameter(
            ToolParameter::new("expression", ToolParameterType::String)
                .with_description("a math expression, e.g. 'sqrt(16) + mean([1,2,3])'")
                .required(),
        )
    }

    async fn call(&self, arguments: serde_json::Value, _context: &Context) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let expression = arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidParameters("missing required string field 'expression'".to_string()))?;

        match self.calculator.evaluate(expression).await {
            Ok(value) => Ok(ToolResult::success(serde_json::json!(value))),
            Err(e) => Ok(ToolResult::failure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evaluates_arithmetic() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("2 + 2 * 3").await.unwrap(), 8.0);
    }

    #[tokio::test]
    async fn evaluates_trig_in_radians() {
        let calc = Calculator::new();
        assert!((calc.evaluate("sin(0)").await.unwrap()).abs() < 1e-10);
    }

    #[tokio::test]
    async fn evaluates_log_base_ten() {
        let calc = Calculator::new();
        assert!((calc.evaluate("log(100)").await.unwrap() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn evaluates_statistics() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("mean([1, 2, 3, 4, 5])").await.unwrap(), 3.0);
    }

    #[tokio::test]
    async fn tool_rejects_missing_expression() {
        let tool = CalculatorTool::new();
        let ctx = Context::with_defaults("s", "m", "a").unwrap();
        let result = tool.call(serde_json::json!({}), &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tool_evaluates_expression() {
        let tool = CalculatorTool::new();
        let ctx = Context::with_defaults("s", "m", "a").unwrap();
        let result = tool.call(serde_json::json!({"expression": "sqrt(16)"}), &ctx).await.unwrap();
        assert_eq!(result.output, serde_json::json!(4.0));
    }
}
