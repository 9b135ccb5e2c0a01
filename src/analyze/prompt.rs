// src/analyze/prompt.rs
//! Prompt construction: template rendering and length-bounded content truncation.

use crate::ingest::types::RawEntry;
use crate::strategy::StrategyConfig;

/// Natural break points, strongest first.
const BREAKS: &[char] = &['。', '.', '；', ';', '，', ',', ' '];
/// How far back from the limit a break point is searched for.
const BREAK_WINDOW: usize = 100;

/// One rendered prompt. Lives for one analysis attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
}

impl Prompt {
    /// Render `strategy.prompt_template` for `entry`.
    ///
    /// A template that references `{content}` is rendered in full as the user
    /// message. Any other template is the system message and the title plus
    /// the article is the user message. Either way the user message is at most
    /// `strategy.max_input_chars` characters; the article text gives way first.
    pub fn render(strategy: &StrategyConfig, entry: &RawEntry) -> Self {
        let limit = strategy.max_input_chars;
        let source = if entry.raw_content.is_empty() {
            entry.title.as_str()
        } else {
            entry.raw_content.as_str()
        };
        let template = strategy.prompt_template.as_str();
        let fill = |content: &str| fill_placeholders(template, &strategy.category, &entry.title, content);

        if template.contains("{content}") {
            let slots = template.matches("{content}").count();
            let frame = fill("").chars().count();
            let content = truncate_chars(source, limit.saturating_sub(frame) / slots);
            let mut user = fill(&content);
            if user.chars().count() > limit {
                user = truncate_chars(&user, limit);
            }
            Self { system: None, user }
        } else {
            let user = if source == entry.title {
                truncate_chars(source, limit)
            } else {
                let budget = limit.saturating_sub(entry.title.chars().count() + 2);
                match truncate_chars(source, budget) {
                    c if c.is_empty() => truncate_chars(&entry.title, limit),
                    c => format!("{}\n\n{}", entry.title, c),
                }
            };
            Self {
                system: Some(fill("")),
                user,
            }
        }
    }
}

/// Substitute `{category}`, `{title}` and `{content}` in one pass; text
/// coming from the entry is never re-scanned for placeholders.
fn fill_placeholders(template: &str, category: &str, title: &str, content: &str) -> String {
    let mut out = String::with_capacity(template.len() + title.len() + content.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = [("{category}", category), ("{title}", title), ("{content}", content)]
            .into_iter()
            .find(|(name, _)| tail.starts_with(name));
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Truncate to at most `max_chars` characters, keeping the start.
///
/// Prefers cutting right after a natural break within the last
/// [`BREAK_WINDOW`] characters, and backs off to before an inline formula
/// (`$..$`, `$$..$$`, `\(..\)`, `\[..\]`) the cut would otherwise split.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let window_start = max_chars.saturating_sub(BREAK_WINDOW);
    let mut cut = max_chars;
    for b in BREAKS {
        if let Some(pos) = chars[window_start..max_chars]
            .iter()
            .rposition(|c| c == b)
            .map(|p| p + window_start)
        {
            if pos > 0 {
                cut = pos + 1;
                break;
            }
        }
    }

    if let Some(open) = unclosed_formula_start(&chars[..cut]) {
        if open > 0 {
            cut = open;
        }
    }

    chars[..cut].iter().collect::<String>().trim_end().to_string()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Delim {
    Dollar,
    DoubleDollar,
    Paren,
    Bracket,
}

/// Index of the opening delimiter of a formula left open at the end of `chars`.
fn unclosed_formula_start(chars: &[char]) -> Option<usize> {
    let mut open: Option<(usize, Delim)> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match (c, next, open) {
            ('\\', Some('$'), _) => i += 2,
            ('\\', Some('('), None) => {
                open = Some((i, Delim::Paren));
                i += 2;
            }
            ('\\', Some('['), None) => {
                open = Some((i, Delim::Bracket));
                i += 2;
            }
            ('\\', Some(')'), Some((_, Delim::Paren))) | ('\\', Some(']'), Some((_, Delim::Bracket))) => {
                open = None;
                i += 2;
            }
            ('$', Some('$'), None) => {
                open = Some((i, Delim::DoubleDollar));
                i += 2;
            }
            ('$', Some('$'), Some((_, Delim::DoubleDollar))) => {
                open = None;
                i += 2;
            }
            ('$', _, None) => {
                open = Some((i, Delim::Dollar));
                i += 1;
            }
            ('$', _, Some((_, Delim::Dollar))) => {
                open = None;
                i += 1;
            }
            _ => i += 1,
        }
    }
    open.map(|(pos, _)| pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(template: &str, max: usize) -> StrategyConfig {
        StrategyConfig {
            category: "Research".into(),
            sources: vec![],
            prompt_template: template.into(),
            max_input_chars: max,
            score_threshold: 0,
            max_items: 10,
            full_text: false,
        }
    }

    fn entry(content: &str) -> RawEntry {
        RawEntry {
            source_id: "Research/arxiv".into(),
            category: "Research".into(),
            external_id: None,
            url: "https://x.test/1".into(),
            title: "A title".into(),
            published_at: None,
            raw_content: content.into(),
            fetch_seq: 0,
        }
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn never_exceeds_limit_and_prefers_sentence_end() {
        let text = format!("{}. {}", "a".repeat(150), "b".repeat(200));
        let out = truncate_chars(&text, 200);
        assert!(out.chars().count() <= 200);
        assert!(out.ends_with('.'));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "数".repeat(500);
        let out = truncate_chars(&text, 120);
        assert_eq!(out.chars().count(), 120);
    }

    #[test]
    fn backs_off_before_an_open_formula() {
        // cut at 120 would land inside $x^2 + ...$
        let text = format!("{} $x^2 + {}$ tail", "w".repeat(100), "y".repeat(60));
        let out = truncate_chars(&text, 120);
        assert!(!out.contains('$'), "got {out}");
        assert!(out.chars().count() <= 120);
    }

    #[test]
    fn closed_formulas_survive() {
        let text = format!(r"Energy \(E=mc^2\) and $a+b$ {}", "z".repeat(300));
        let out = truncate_chars(&text, 150);
        assert!(out.starts_with(r"Energy \(E=mc^2\) and $a+b$"));
    }

    #[test]
    fn template_without_content_slot_becomes_system_message() {
        let p = Prompt::render(&strategy("Rate {category} news.", 100), &entry("body"));
        assert_eq!(p.system.as_deref(), Some("Rate Research news."));
        assert_eq!(p.user, "A title\n\nbody");
    }

    #[test]
    fn content_slot_is_rendered_and_truncated() {
        let long = "x".repeat(1000);
        let p = Prompt::render(
            &strategy("Title: {title}\n---\n{content}", 100),
            &entry(&long),
        );
        assert!(p.system.is_none());
        assert!(p.user.starts_with("Title: A title\n---\nxxx"));
        assert_eq!(p.user.chars().count(), 100);
    }

    #[test]
    fn title_and_content_share_the_limit() {
        let mut e = entry(&"body text ".repeat(500));
        e.title = "t".repeat(80);
        let p = Prompt::render(&strategy("Rate it.", 100), &e);
        assert!(p.user.chars().count() <= 100, "{} chars", p.user.chars().count());
        assert!(p.user.starts_with(&format!("{}\n\nbody", e.title)));

        e.title = "T".repeat(150);
        let p = Prompt::render(&strategy("Rate it.", 100), &e);
        assert_eq!(p.user, "T".repeat(100));
    }

    #[test]
    fn placeholders_in_entry_text_stay_literal() {
        let mut e = entry("the body");
        e.title = "Why {content} and {category} matter".into();
        let p = Prompt::render(&strategy("[{category}] {title}: {content}", 500), &e);
        assert_eq!(
            p.user,
            "[Research] Why {content} and {category} matter: the body"
        );
        assert_eq!(
            fill_placeholders("{unknown} {title", "c", "t", "x"),
            "{unknown} {title"
        );
    }
}
