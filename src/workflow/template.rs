//! `${{ expression }}` placeholders.
//!
//! Expressions use a small, closed grammar; nothing is ever handed to a
//! general-purpose evaluator:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := unary ( ( "==" | "!=" ) unary )?
//! unary   := "!" unary | primary
//! primary := STRING | "true" | "false" | INTEGER | path | "(" expr ")"
//! path    := IDENT ( "." IDENT )*
//! ```
//!
//! Paths are looked up in a [`Scope`]; anything missing renders as an empty
//! string. A `${{` without a closing `}}` is kept as literal text.

use thiserror::Error;

/// Errors raised while evaluating a placeholder.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("invalid expression '{expression}': {reason}")]
    Syntax { expression: String, reason: String },
}

/// Something paths can be looked up in.
pub trait Scope {
    /// Value at `path`, or `None` when any segment is missing.
    fn lookup(&self, path: &[&str]) -> Option<String>;
}

/// The value of an evaluated expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Absent,
    Bool(bool),
    Text(String),
}

impl Value {
    /// Absent, empty, `"false"` and `"0"` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Absent => false,
            Self::Bool(value) => *value,
            Self::Text(text) => !(text.is_empty() || text == "false" || text == "0"),
        }
    }

    /// String form used for substitution and comparison.
    pub fn render(&self) -> String {
        match self {
            Self::Absent => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Replace every placeholder in `template`, left to right.
pub fn resolve(template: &str, scope: &dyn Scope) -> Result<String, TemplateError> {
    if !template.contains("${{") {
        return Ok(template.to_string());
    }

    let mut resolved = String::with_capacity(template.len());
    let mut remainder = template;
    while let Some(start) = remainder.find("${{") {
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        resolved.push_str(&remainder[..start]);
        resolved.push_str(&evaluate(&after_start[..end], scope)?.render());
        remainder = &after_start[end + 2..];
    }
    resolved.push_str(remainder);
    Ok(resolved)
}

/// Placeholder expressions in `template`, without delimiters.
pub fn extract_expressions(template: &str) -> Vec<String> {
    let mut expressions = Vec::new();
    let mut remainder = template;
    while let Some(start) = remainder.find("${{") {
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        let expression = after_start[..end].trim();
        if !expression.is_empty() {
            expressions.push(expression.to_string());
        }
        remainder = &after_start[end + 2..];
    }
    expressions
}

/// Evaluate a single expression.
pub fn evaluate(expression: &str, scope: &dyn Scope) -> Result<Value, TemplateError> {
    let syntax = |reason: String| TemplateError::Syntax {
        expression: expression.trim().to_string(),
        reason,
    };

    let tokens = tokenize(expression).map_err(syntax)?;
    if tokens.is_empty() {
        return Ok(Value::Absent);
    }

    let mut parser = Parser { tokens: &tokens, pos: 0, scope };
    let value = parser.or().map_err(syntax)?;
    if let Some(token) = parser.peek() {
        return Err(syntax(format!("unexpected {}", token.describe())));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Word(String),
    Dot,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Str(text) => format!("string '{text}'"),
            Self::Word(word) => format!("'{word}'"),
            Self::Dot => "'.'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Not => "'!'".to_string(),
            Self::And => "'&&'".to_string(),
            Self::Or => "'||'".to_string(),
            Self::Eq => "'=='".to_string(),
            Self::Ne => "'!='".to_string(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '.' => tokens.push(Token::Dot),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '!' => {
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '=' | '&' | '|' => {
                if chars.next_if(|(_, next)| *next == c).is_none() {
                    return Err(format!("unexpected '{c}' at {index}"));
                }
                tokens.push(match c {
                    '=' => Token::Eq,
                    '&' => Token::And,
                    _ => Token::Or,
                });
            }
            '\'' | '"' => {
                let mut text = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    text.push(next);
                }
                if !closed {
                    return Err("unterminated string".to_string());
                }
                tokens.push(Token::Str(text));
            }
            c if is_word_char(c) => {
                let mut word = c.to_string();
                while let Some((_, next)) = chars.next_if(|(_, next)| is_word_char(*next)) {
                    word.push(next);
                }
                tokens.push(Token::Word(word));
            }
            other => return Err(format!("unexpected '{other}' at {index}")),
        }
    }
    Ok(tokens)
}

fn is_integer(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    scope: &'a dyn Scope,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// First truthy operand, else the last one.
    fn or(&mut self) -> Result<Value, String> {
        let mut value = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            if !value.is_truthy() {
                value = right;
            }
        }
        Ok(value)
    }

    /// First falsy operand, else the last one.
    fn and(&mut self) -> Result<Value, String> {
        let mut value = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            if value.is_truthy() {
                value = right;
            }
        }
        Ok(value)
    }

    fn equality(&mut self) -> Result<Value, String> {
        let left = self.unary()?;
        if self.eat(&Token::Eq) {
            let right = self.unary()?;
            return Ok(Value::Bool(left.render() == right.render()));
        }
        if self.eat(&Token::Ne) {
            let right = self.unary()?;
            return Ok(Value::Bool(left.render() != right.render()));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value, String> {
        if self.eat(&Token::Not) {
            let value = self.unary()?;
            return Ok(Value::Bool(!value.is_truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, String> {
        let Some(token) = self.peek().cloned() else {
            return Err("unexpected end of expression".to_string());
        };
        self.pos += 1;

        match token {
            Token::Str(text) => Ok(Value::Text(text)),
            Token::LParen => {
                let value = self.or()?;
                if !self.eat(&Token::RParen) {
                    return Err("missing ')'".to_string());
                }
                Ok(value)
            }
            Token::Word(word) => {
                if self.peek() != Some(&Token::Dot) {
                    match word.as_str() {
                        "true" => return Ok(Value::Bool(true)),
                        "false" => return Ok(Value::Bool(false)),
                        _ if is_integer(&word) => return Ok(Value::Text(word)),
                        _ => {}
                    }
                }
                self.path(word)
            }
            other => Err(format!("unexpected {}", other.describe())),
        }
    }

    fn path(&mut self, first: String) -> Result<Value, String> {
        let mut segments = vec![first];
        while self.eat(&Token::Dot) {
            match self.peek().cloned() {
                Some(Token::Word(word)) => {
                    self.pos += 1;
                    segments.push(word);
                }
                _ => return Err("expected a name after '.'".to_string()),
            }
        }
        let path: Vec<&str> = segments.iter().map(String::as_str).collect();
        Ok(self.scope.lookup(&path).map_or(Value::Absent, Value::Text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapScope(HashMap<&'static str, &'static str>);

    impl Scope for MapScope {
        fn lookup(&self, path: &[&str]) -> Option<String> {
            self.0.get(path.join(".").as_str()).map(|value| (*value).to_string())
        }
    }

    fn scope() -> MapScope {
        MapScope(HashMap::from([
            ("inputs.id", "42"),
            ("inputs.empty", ""),
            ("steps.clone.outputs.path", "/src/repo"),
            ("env.HOME", "/home/me"),
            ("inputs.flag", "false"),
        ]))
    }

    fn eval(expression: &str) -> String {
        evaluate(expression, &scope()).unwrap().render()
    }

    #[test]
    fn test_no_placeholders_is_identity() {
        for text in ["", "plain text", "echo {{ not.ours }}", "$HOME and ${PATH}", "}} ${ {"] {
            assert_eq!(resolve(text, &scope()).unwrap(), text);
        }
    }

    #[test]
    fn test_path_substitution() {
        let resolved =
            resolve("cd ${{ steps.clone.outputs.path }} && echo ${{inputs.id}}", &scope()).unwrap();
        assert_eq!(resolved, "cd /src/repo && echo 42");
    }

    #[test]
    fn test_missing_path_is_empty() {
        assert_eq!(resolve("[${{ steps.nope.outputs.x }}]", &scope()).unwrap(), "[]");
        assert_eq!(resolve("[${{ inputs }}]", &scope()).unwrap(), "[]");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(
            resolve("${{ inputs.id }} then ${{ inputs.id", &scope()).unwrap(),
            "42 then ${{ inputs.id"
        );
    }

    #[test]
    fn test_or_and_semantics() {
        assert_eq!(eval("inputs.empty || 'fallback'"), "fallback");
        assert_eq!(eval("inputs.id || 'fallback'"), "42");
        assert_eq!(eval("inputs.missing || inputs.empty"), "");
        assert_eq!(eval("inputs.id && env.HOME"), "/home/me");
        assert_eq!(eval("inputs.flag && env.HOME"), "false");
    }

    #[test]
    fn test_comparison_and_negation() {
        assert_eq!(eval("inputs.id == '42'"), "true");
        assert_eq!(eval("inputs.id == 42"), "true");
        assert_eq!(eval("inputs.id != \"42\""), "false");
        assert_eq!(eval("!inputs.empty"), "true");
        assert_eq!(eval("!(inputs.id == '1') && 'yes'"), "yes");
        assert_eq!(eval("true"), "true");
    }

    #[test]
    fn test_syntax_errors() {
        assert!(evaluate("inputs.id ==", &scope()).is_err());
        assert!(evaluate("'open", &scope()).is_err());
        assert!(evaluate("inputs.id = 1", &scope()).is_err());
        assert!(evaluate("(inputs.id", &scope()).is_err());
        assert!(evaluate("inputs.", &scope()).is_err());
        assert!(evaluate("inputs.id inputs.id", &scope()).is_err());
        assert!(resolve("echo ${{ a + b }}", &scope()).is_err());
    }

    #[test]
    fn test_extract_expressions() {
        assert_eq!(
            extract_expressions("${{ inputs.id }} ${{}} ${{ steps.a.outputs.x }}"),
            vec!["inputs.id", "steps.a.outputs.x"]
        );
    }
}
