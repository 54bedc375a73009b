//! System prompt loading and placeholder substitution.

use std::path::Path;

/// Values substituted into the system prompt template. Substitution is
/// deterministic: every placeholder maps to a field here, never to the
/// ambient environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptContext<'a> {
    pub target: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub thread: Option<&'a str>,
}

/// Preamble used when no template file is configured or the file is
/// unreadable.
const FALLBACK_PROMPT: &str =
    "You are an operations agent. Help monitor and fix infrastructure issues.";

/// Substitute template placeholders. Missing values become empty strings.
pub fn render(template: &str, ctx: PromptContext<'_>) -> String {
    template
        .replace("$TARGET_NAMESPACE", ctx.target.unwrap_or(""))
        .replace("$ALERT_CHANNEL", ctx.channel.unwrap_or(""))
        .replace("$THREAD_ID", ctx.thread.unwrap_or(""))
}

/// Load the system prompt template and render it for the given context.
pub fn load_system_prompt(path: Option<&Path>, ctx: PromptContext<'_>) -> String {
    let template = match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(%error, path = %path.display(), "prompt template unreadable, using fallback");
                FALLBACK_PROMPT.to_string()
            }
        },
        None => FALLBACK_PROMPT.to_string(),
    };
    render(&template, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_placeholders() {
        let template =
            "Watch $TARGET_NAMESPACE, alert $ALERT_CHANNEL, reply in $THREAD_ID.";
        let rendered = render(
            template,
            PromptContext {
                target: Some("payments"),
                channel: Some("C042"),
                thread: Some("1700000000.000100"),
            },
        );
        assert_eq!(
            rendered,
            "Watch payments, alert C042, reply in 1700000000.000100."
        );
    }

    #[test]
    fn render_blanks_missing_values() {
        let rendered = render("ns=$TARGET_NAMESPACE thread=$THREAD_ID", PromptContext::default());
        assert_eq!(rendered, "ns= thread=");
    }

    #[test]
    fn missing_template_file_falls_back() {
        let prompt = load_system_prompt(
            Some(Path::new("/nonexistent/prompt.md")),
            PromptContext::default(),
        );
        assert_eq!(prompt, FALLBACK_PROMPT);
    }
}
