//! Regex body rewriting with placeholder templates.
//!
//! A replacement template may contain `{N}` placeholders, replaced by capture
//! group `N` of the current match, and `{name}` placeholders, replaced by the
//! value of a contextual variable. Placeholders that cannot be resolved are
//! kept as literal text.

use crate::context::VariableResolver;
use regex::bytes::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

/// Regex for placeholder tokens like {1} or {request.path}
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_.\-]+)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Vec<u8>),
    Group { index: usize, raw: Vec<u8> },
    Variable { name: String, raw: Vec<u8> },
}

/// A parsed replacement template.
#[derive(Debug, Clone, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template. Never fails: anything that is not a well-formed
    /// placeholder is literal text.
    pub fn parse(template: &[u8]) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER_REGEX.captures_iter(template) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &template[last..whole.start()]);
            last = whole.end();

            let raw = whole.as_bytes().to_vec();
            let inner = inner.as_bytes();
            if inner.iter().all(u8::is_ascii_digit) {
                // Too many digits for any group: stays literal.
                match String::from_utf8_lossy(inner).parse::<usize>() {
                    Ok(index) => segments.push(Segment::Group { index, raw }),
                    Err(_) => push_literal(&mut segments, &raw),
                }
            } else {
                let name = String::from_utf8_lossy(inner).into_owned();
                segments.push(Segment::Variable { name, raw });
            }
        }
        push_literal(&mut segments, &template[last..]);

        Self { segments }
    }

    /// Expand the template for one match, appending to `out`.
    pub fn expand(&self, ctx: &MatchContext<'_, '_>, out: &mut Vec<u8>) {
        for segment in &self.segments {
            match segment {
                Segment::Literal(bytes) => out.extend_from_slice(bytes),
                Segment::Group { index, raw } => {
                    if *index < ctx.captures.len() {
                        // Groups that did not participate expand to nothing.
                        if let Some(m) = ctx.captures.get(*index) {
                            out.extend_from_slice(m.as_bytes());
                        }
                    } else {
                        out.extend_from_slice(raw);
                    }
                }
                Segment::Variable { name, raw } => match ctx.variables.lookup(name) {
                    Some(value) => out.extend_from_slice(value.as_bytes()),
                    None => out.extend_from_slice(raw),
                },
            }
        }
    }
}

fn push_literal(segments: &mut Vec<Segment>, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    if let Some(Segment::Literal(prev)) = segments.last_mut() {
        prev.extend_from_slice(bytes);
    } else {
        segments.push(Segment::Literal(bytes.to_vec()));
    }
}

/// Everything a placeholder can refer to while one match is replaced.
pub struct MatchContext<'c, 'h> {
    /// Capture groups of the current match
    pub captures: &'c Captures<'h>,
    /// Contextual variables of the current request
    pub variables: &'c dyn VariableResolver,
}

/// Output of a rewrite pass.
#[derive(Debug)]
pub struct Rewritten<'b> {
    /// The new body, borrowed when nothing matched
    pub body: Cow<'b, [u8]>,
    /// Number of matches replaced
    pub replacements: usize,
}

/// Search pattern plus replacement template.
#[derive(Debug, Clone)]
pub struct Rewriter {
    search: Option<Regex>,
    template: Template,
}

impl Rewriter {
    /// Create a rewriter. Without a search pattern it leaves bodies alone.
    pub fn new(search: Option<Regex>, replacement: &[u8]) -> Self {
        Self {
            search,
            template: Template::parse(replacement),
        }
    }

    /// Replace every leftmost, non-overlapping match in `body`.
    pub fn rewrite<'b>(&self, body: &'b [u8], variables: &dyn VariableResolver) -> Rewritten<'b> {
        let Some(search) = &self.search else {
            return Rewritten {
                body: Cow::Borrowed(body),
                replacements: 0,
            };
        };

        let mut replacements = 0;
        let body = search.replace_all(body, |captures: &Captures<'_>| {
            replacements += 1;
            let ctx = MatchContext {
                captures,
                variables,
            };
            let mut out = Vec::new();
            self.template.expand(&ctx, &mut out);
            out
        });

        Rewritten { body, replacements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoVariables;
    use std::collections::HashMap;

    fn rewrite(pattern: &str, replacement: &str, body: &str) -> String {
        let vars: HashMap<String, String> = HashMap::from([
            ("host".to_string(), "example.org".to_string()),
            ("request.path".to_string(), "/index.html".to_string()),
            ("trap".to_string(), "{1}".to_string()),
        ]);
        let rewriter = Rewriter::new(Some(Regex::new(pattern).unwrap()), replacement.as_bytes());
        let out = rewriter.rewrite(body.as_bytes(), &vars);
        String::from_utf8(out.body.into_owned()).unwrap()
    }

    #[test]
    fn test_literal_replacement() {
        assert_eq!(rewrite("foo", "bar", "foo baz foo"), "bar baz bar");
    }

    #[test]
    fn test_group_placeholders() {
        assert_eq!(rewrite(r"(\w+)@(\w+)", "{2}-{1}", "user@host"), "host-user");
        assert_eq!(rewrite(r"b+", "[{0}]", "abbbc"), "a[bbb]c");
        assert_eq!(rewrite(r"(a)", "{01}", "xax"), "xax");
    }

    #[test]
    fn test_out_of_range_group_is_literal() {
        assert_eq!(rewrite(r"(a)", "{2}", "xay"), "x{2}y");
        assert_eq!(
            rewrite("a", "{99999999999999999999999999}", "a"),
            "{99999999999999999999999999}"
        );
    }

    #[test]
    fn test_unmatched_optional_group_is_empty() {
        assert_eq!(rewrite(r"a(b)?c", "<{1}>", "ac abc"), "<> <b>");
    }

    #[test]
    fn test_variable_placeholders() {
        assert_eq!(
            rewrite("HOST", "https://{host}{request.path}", "see HOST"),
            "see https://example.org/index.html"
        );
        assert_eq!(
            rewrite("x", "{unknown_var}", "axbx"),
            "a{unknown_var}b{unknown_var}"
        );
    }

    #[test]
    fn test_expansion_is_single_pass() {
        assert_eq!(rewrite("(q)", "{trap}", "q"), "{1}");
    }

    #[test]
    fn test_malformed_placeholders_are_literal() {
        assert_eq!(rewrite("a", "{}", "a"), "{}");
        assert_eq!(rewrite("a", "{a b}", "a"), "{a b}");
        assert_eq!(rewrite("a", "{", "a"), "{");
        assert_eq!(rewrite("(a)", "{{1}}", "a"), "{a}");
    }

    #[test]
    fn test_empty_template_deletes_matches() {
        assert_eq!(rewrite(r"\s*secret\s*", "", "a secret b"), "ab");
    }

    #[test]
    fn test_empty_matches() {
        assert_eq!(rewrite("x*", "-", "abc"), "-a-b-c-");
    }

    #[test]
    fn test_no_search_pattern_is_noop() {
        let rewriter = Rewriter::new(None, b"whatever");
        let out = rewriter.rewrite(b"untouched", &NoVariables);
        assert!(matches!(out.body, Cow::Borrowed(_)));
        assert_eq!(out.body.as_ref(), b"untouched");
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn test_non_utf8_body_preserved() {
        let rewriter = Rewriter::new(Some(Regex::new("foo").unwrap()), b"bar");
        let out = rewriter.rewrite(b"\xff\xfefoo\x00", &NoVariables);
        assert_eq!(out.body.as_ref(), b"\xff\xfebar\x00");
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_template_parsing() {
        assert!(Template::parse(b"").segments.is_empty());
        assert_eq!(
            Template::parse(b"a{}b").segments,
            vec![Segment::Literal(b"a{}b".to_vec())]
        );
        assert_eq!(
            Template::parse(b"x{0}{name}").segments,
            vec![
                Segment::Literal(b"x".to_vec()),
                Segment::Group {
                    index: 0,
                    raw: b"{0}".to_vec()
                },
                Segment::Variable {
                    name: "name".to_string(),
                    raw: b"{name}".to_vec()
                },
            ]
        );
    }
}
