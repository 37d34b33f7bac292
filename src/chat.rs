//! Chat-side helpers around the executor.
//!
//! Nothing here talks to a network. These functions turn an incoming chat
//! message into source text, and an [`ExecutionResult`] back into a reply
//! body, so a bot front end only has to move strings.

use std::collections::BTreeSet;

use crate::sandbox::executor::ExecutionResult;

/// Substrings that make a plain message look like Python.
const CODE_HINTS: &[&str] = &["print", "import", "def", "class", "for", "while", "if", "="];

/// Language tags accepted on the opening fence line.
const FENCE_OPENERS: &[&str] = &["```python", "```py", "```"];

/// Pulls runnable code out of a chat message.
///
/// In order of preference: a message wrapped in a triple-backtick fence
/// (an opening `python` or `py` tag line is dropped), a message wrapped in
/// single backticks, or any message containing a Python-looking keyword.
/// Returns `None` when the message does not look like code.
pub fn extract_code(message: &str) -> Option<String> {
    if message.starts_with("```") && message.ends_with("```") {
        let mut lines: Vec<&str> = message.split('\n').collect();
        if lines.len() < 2 {
            return None;
        }
        if FENCE_OPENERS.contains(&lines[0].trim()) {
            lines.remove(0);
        }
        if lines.last().map(|line| line.trim()) == Some("```") {
            lines.pop();
        }
        return Some(lines.join("\n"));
    }

    if let Some(inner) = message.strip_prefix('`') {
        if message.len() == 1 {
            return Some(String::new());
        }
        if let Some(inner) = inner.strip_suffix('`') {
            return Some(inner.to_string());
        }
    }

    let lowered = message.to_lowercase();
    if CODE_HINTS.iter().any(|hint| lowered.contains(hint)) {
        return Some(message.to_string());
    }
    None
}

/// Escapes text for an HTML-aware chat client.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders an execution result as a markdown chat reply.
pub fn format_reply(result: &ExecutionResult) -> String {
    if result.success {
        if result.output.trim().is_empty() {
            "✅ *Code executed successfully* (no output)".to_string()
        } else {
            format!("✅ *Output:*\n```\n{}\n```", escape_html(&result.output))
        }
    } else {
        format!("❌ *Error:*\n```\n{}\n```", escape_html(&result.error))
    }
}

/// Short form of a token amount: `1.23M`, `4.56K` or `789.40`.
pub fn format_amount(amount: f64) -> String {
    if amount >= 1_000_000.0 {
        format!("{:.2}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("{:.2}K", amount / 1_000.0)
    } else {
        format!("{:.2}", amount)
    }
}

/// Chats that asked for notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberSet {
    ids: BTreeSet<i64>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chat. Returns `false` if it was already subscribed.
    pub fn subscribe(&mut self, chat_id: i64) -> bool {
        let added = self.ids.insert(chat_id);
        if added {
            tracing::debug!(chat_id, "chat subscribed");
        }
        added
    }

    /// Removes a chat. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, chat_id: i64) -> bool {
        let removed = self.ids.remove(&chat_id);
        if removed {
            tracing::debug!(chat_id, "chat unsubscribed");
        }
        removed
    }

    pub fn contains(&self, chat_id: i64) -> bool {
        self.ids.contains(&chat_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// A snapshot of the subscribed ids, safe to iterate while the set
    /// changes.
    pub fn ids(&self) -> Vec<i64> {
        self.ids.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fault::FaultKind;
    use crate::sandbox::executor::ExecutionMetadata;

    fn result(success: bool, output: &str, error: &str) -> ExecutionResult {
        ExecutionResult {
            success,
            output: output.to_string(),
            error: error.to_string(),
            metadata: ExecutionMetadata {
                fault: (!success).then_some(FaultKind::Runtime),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_extract_fenced_block() {
        assert_eq!(
            extract_code("```python\nx = 1\nprint(x)\n```").as_deref(),
            Some("x = 1\nprint(x)")
        );
        assert_eq!(extract_code("```py\nprint(2)\n```").as_deref(), Some("print(2)"));
        assert_eq!(extract_code("```\nprint(3)\n```").as_deref(), Some("print(3)"));
        assert_eq!(extract_code("```print(4)```"), None);
    }

    #[test]
    fn test_extract_inline_and_heuristic() {
        assert_eq!(extract_code("`1 + 1`").as_deref(), Some("1 + 1"));
        assert_eq!(extract_code("x = 5").as_deref(), Some("x = 5"));
        assert_eq!(extract_code("PRINT('hi')").as_deref(), Some("PRINT('hi')"));
        assert_eq!(extract_code("hello there"), None);
    }

    #[test]
    fn test_lone_backtick_is_an_empty_program() {
        assert_eq!(extract_code("`").as_deref(), Some(""));
        assert_eq!(extract_code("``").as_deref(), Some(""));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">'&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_format_reply() {
        assert_eq!(
            format_reply(&result(true, "1 < 2\n", "")),
            "✅ *Output:*\n```\n1 &lt; 2\n\n```"
        );
        assert_eq!(
            format_reply(&result(true, "  \n", "")),
            "✅ *Code executed successfully* (no output)"
        );
        assert_eq!(
            format_reply(&result(false, "", "ZeroDivisionError: division by zero")),
            "❌ *Error:*\n```\nZeroDivisionError: division by zero\n```"
        );
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1_234_567.0), "1.23M");
        assert_eq!(format_amount(4_560.0), "4.56K");
        assert_eq!(format_amount(789.4), "789.40");
        assert_eq!(format_amount(0.0), "0.00");
    }

    #[test]
    fn test_subscriber_set() {
        let mut subscribers = SubscriberSet::new();
        assert!(subscribers.is_empty());
        assert!(subscribers.subscribe(42));
        assert!(!subscribers.subscribe(42));
        assert!(subscribers.subscribe(-7));
        assert!(subscribers.contains(42));
        assert_eq!(subscribers.ids(), vec![-7, 42]);
        assert!(subscribers.unsubscribe(42));
        assert!(!subscribers.unsubscribe(42));
        assert_eq!(subscribers.len(), 1);
    }
}
