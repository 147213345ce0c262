//! Variable extraction and rendering for prompt templates
//!
//! A variable reference is `$` followed by a maximal run of identifier
//! characters (`[A-Za-z0-9_]`). The block form `{{$name}}` (inner
//! whitespace allowed) refers to the same variable and is replaced as a
//! whole when rendering.
//!
//! Templates are tokenized once and cached, so repeated renders of the
//! same prompt across a run only walk the token list.

use std::borrow::Cow;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::variables::BindingSet;

/// Sigil that starts a variable reference
pub const SIGIL: char = '$';

/// Token representing a parsed template fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text (stores range in original string)
    Literal(Range<usize>),
    /// `$name` or `{{$name}}`; `raw` covers the whole reference
    Variable { name: String, raw: Range<usize> },
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// End offset of the identifier starting at `start`
fn ident_end(template: &str, start: usize) -> usize {
    template[start..]
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map(|(i, _)| start + i)
        .unwrap_or(template.len())
}

/// Template tokenizer with caching
pub struct TemplateResolver {
    /// Cache of parsed templates
    cache: DashMap<String, Arc<Vec<Token>>>,
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    /// Parse template into tokens (with caching)
    pub fn tokenize(&self, template: &str) -> Arc<Vec<Token>> {
        if let Some(cached) = self.cache.get(template) {
            return Arc::clone(&cached);
        }

        let mut tokens = Vec::new();
        let mut chars = template.char_indices().peekable();
        let mut literal_start = 0;

        while let Some((i, ch)) = chars.next() {
            let parsed = match ch {
                '{' if chars.peek().map(|(_, c)| *c) == Some('{') => {
                    Self::parse_block(template, i)
                }
                SIGIL => {
                    let end = ident_end(template, i + 1);
                    (end > i + 1).then(|| (template[i + 1..end].to_string(), end))
                }
                _ => None,
            };

            let Some((name, end)) = parsed else {
                continue;
            };

            if i > literal_start {
                tokens.push(Token::Literal(literal_start..i));
            }
            tokens.push(Token::Variable { name, raw: i..end });
            literal_start = end;

            while chars.peek().is_some_and(|(j, _)| *j < end) {
                chars.next();
            }
        }

        if literal_start < template.len() {
            tokens.push(Token::Literal(literal_start..template.len()));
        }

        let tokens = Arc::new(tokens);
        self.cache.insert(template.to_string(), Arc::clone(&tokens));
        tokens
    }

    /// Parse `{{ $name }}` starting at the first `{`
    fn parse_block(template: &str, start: usize) -> Option<(String, usize)> {
        let inner = &template[start + 2..];
        let trimmed = inner.trim_start();
        let name_start = start + 2 + (inner.len() - trimmed.len());

        if !trimmed.starts_with(SIGIL) {
            return None;
        }
        let ident_start = name_start + 1;
        let ident_stop = ident_end(template, ident_start);
        if ident_stop == ident_start {
            return None;
        }

        let rest = &template[ident_stop..];
        let after_ws = rest.trim_start();
        if !after_ws.starts_with("}}") {
            return None;
        }
        let end = ident_stop + (rest.len() - after_ws.len()) + 2;

        Some((template[ident_start..ident_stop].to_string(), end))
    }

    /// Distinct variable names in first-occurrence order
    pub fn extract(&self, template: &str) -> Vec<String> {
        let tokens = self.tokenize(template);
        let mut seen = HashSet::new();

        tokens
            .iter()
            .filter_map(|token| match token {
                Token::Variable { name, .. } if seen.insert(name.as_str()) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Substitute bound values; unbound references stay verbatim
    pub fn render<'a>(&self, template: &'a str, bindings: &BindingSet) -> Cow<'a, str> {
        let tokens = self.tokenize(template);
        if !tokens.iter().any(|t| matches!(t, Token::Variable { .. })) {
            return Cow::Borrowed(template);
        }

        let mut result = String::with_capacity(template.len() + 64);
        for token in tokens.iter() {
            match token {
                Token::Literal(range) => result.push_str(&template[range.clone()]),
                Token::Variable { name, raw } => match bindings.get(name) {
                    Some(value) => result.push_str(value),
                    None => result.push_str(&template[raw.clone()]),
                },
            }
        }

        Cow::Owned(result)
    }

    /// Number of cached templates
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Global template resolver instance
pub static TEMPLATE_RESOLVER: Lazy<TemplateResolver> = Lazy::new(TemplateResolver::new);

/// Distinct variable names referenced by `template`, in first-occurrence order
pub fn extract(template: &str) -> Vec<String> {
    TEMPLATE_RESOLVER.extract(template)
}

/// Render `template` with `bindings`
pub fn render<'a>(template: &'a str, bindings: &BindingSet) -> Cow<'a, str> {
    TEMPLATE_RESOLVER.render(template, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(names: &[String]) -> String {
        names
            .iter()
            .map(|n| format!("{SIGIL}{n}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_extract_none() {
        assert!(extract("plain text, no references").is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn test_extract_order_of_first_occurrence() {
        assert_eq!(extract("Translate $text to $lang"), vec!["text", "lang"]);
        assert_eq!(extract("Into $lang: $text"), vec!["lang", "text"]);
    }

    #[test]
    fn test_extract_dedup() {
        assert_eq!(extract("$a $b $a $c $b"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_extract_maximal_identifier_run() {
        assert_eq!(extract("$user_name2, hi"), vec!["user_name2"]);
        assert_eq!(extract("$x-y"), vec!["x"]);
    }

    #[test]
    fn test_lone_sigil_is_literal() {
        assert!(extract("costs $ 5 or $").is_empty());
        assert_eq!(extract("$$name"), vec!["name"]);
    }

    #[test]
    fn test_extract_block_form() {
        assert_eq!(extract("{{$input}} and {{ $style }}"), vec!["input", "style"]);
        assert_eq!(extract("{{$input}} again $input"), vec!["input"]);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let templates = [
            "Translate $text to $lang",
            "{{$a}} $b $a {{ $c }} $",
            "no refs",
            "$z $y $x $y",
        ];
        for t in templates {
            let first = extract(t);
            assert_eq!(extract(&as_text(&first)), first);
            assert_eq!(extract(t), first);
        }
    }

    #[test]
    fn test_tokenize_mixed() {
        let resolver = TemplateResolver::new();
        let tokens = resolver.tokenize("Hi $name, see {{$doc}}!");
        assert_eq!(
            *tokens,
            vec![
                Token::Literal(0..3),
                Token::Variable {
                    name: "name".to_string(),
                    raw: 3..8
                },
                Token::Literal(8..14),
                Token::Variable {
                    name: "doc".to_string(),
                    raw: 14..22
                },
                Token::Literal(22..23),
            ]
        );
    }

    #[test]
    fn test_unclosed_block_falls_back_to_plain_reference() {
        let resolver = TemplateResolver::new();
        let tokens = resolver.tokenize("{{$a");
        assert_eq!(
            *tokens,
            vec![
                Token::Literal(0..2),
                Token::Variable {
                    name: "a".to_string(),
                    raw: 2..4
                },
            ]
        );
    }

    #[test]
    fn test_render_substitutes() {
        let bindings = BindingSet::from_pairs([("text", "hello"), ("lang", "fr")]);
        assert_eq!(
            render("Translate $text to $lang", &bindings),
            "Translate hello to fr"
        );
        assert_eq!(render("[{{ $text }}]", &bindings), "[hello]");
    }

    #[test]
    fn test_render_empty_value() {
        let bindings = BindingSet::from_pairs([("x", "")]);
        assert_eq!(render("a$x.b", &bindings), "a.b");
    }

    #[test]
    fn test_render_keeps_unbound() {
        let bindings = BindingSet::from_pairs([("a", "1")]);
        assert_eq!(render("$a {{$b}} $c", &bindings), "1 {{$b}} $c");
    }

    #[test]
    fn test_render_without_refs_borrows() {
        let out = render("nothing here", &BindingSet::new());
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_cache_reuse() {
        let resolver = TemplateResolver::new();
        let template = "$a {{$b}}";

        let tokens1 = resolver.tokenize(template);
        let tokens2 = resolver.tokenize(template);

        assert!(Arc::ptr_eq(&tokens1, &tokens2));
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_unicode_literal_is_preserved() {
        let bindings = BindingSet::from_pairs([("lang", "fr")]);
        assert_eq!(render("翻译成 $lang 语言", &bindings), "翻译成 fr 语言");
        assert_eq!(extract("翻译$lang"), vec!["lang"]);
    }
}
