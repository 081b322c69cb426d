//! Layered prompt builder and the four conversation prompts.
//!
//! Templates live under `config/prompts/` and can be edited without a
//! rebuild. Every template has a compiled-in fallback, so a missing
//! directory only costs a debug log line.
//!
//! ```text
//! persona.md     optional preamble shared by every prompt
//! seed.txt       first turn           {{user_input}}
//! follow_up.txt  every later turn     {{history}} {{user_input}}
//! intent.txt     "is the user done?"  {{last_turn}} {{user_input}}
//! diagram.txt    final rendering      {{history}}
//! ```
//!
//! Substitution is single-pass: text inserted for one `{{key}}` is never
//! scanned again, so user input cannot smuggle in another placeholder.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

const SEPARATOR: &str = "\n\n";

pub const PERSONA_FILE: &str = "persona.md";
pub const SEED_FILE: &str = "seed.txt";
pub const FOLLOW_UP_FILE: &str = "follow_up.txt";
pub const INTENT_FILE: &str = "intent.txt";
pub const DIAGRAM_FILE: &str = "diagram.txt";

const DEFAULT_SEED: &str = "\
I need help collecting the details required to draw a diagram.
I will describe my task, then you ask me follow-up questions one at a time.
Ask only the question itself and do not number it.

{{user_input}}";

const DEFAULT_FOLLOW_UP: &str = "\
You are a technical assistant helping a user specify a diagram.
Conversation so far:
<start>
{{history}}
User: {{user_input}}
<end>
Either suggest a solution or ask a question. Never repeat a question the user already answered.
Vary the kind of question (yes/no, multiple choice, open-ended).
If the user is unsure, offer options. Give one question or suggestion at a time.";

const DEFAULT_INTENT: &str = "\
A user and an assistant are working out the details of a diagram.
Most recent exchange:
{{last_turn}}

New user message: {{user_input}}

Is the user saying they are finished, or asking for the diagram to be drawn?
Messages like \"can you draw it\", \"I think that's it\", \"done\" or \"draw\" mean yes.
A message that lists components or ideas means no.
Answer with Yes or No and nothing else.";

const DEFAULT_DIAGRAM: &str = "\
Conversation:
{{history}}

Extract the user's requirements from the conversation above and write Mermaid code for the
architecture diagram, flowchart, ER diagram or whichever diagram type fits what was asked for.
Draw the system that was discussed, not the conversation: no \"user\" or \"bot\" nodes.
Label arrows with the data or event that flows along them where it helps, for example
    F -->|Transaction succeeds| G[Publish PRODUCT_PURCHASED event]
Cover every important component and give each a descriptive name.
Use a little colour or styling to separate kinds of components.
Output only the Mermaid code.";

/// Fluent builder that assembles a layered prompt from template files.
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self { prompts_dir: prompts_dir.into(), parts: Vec::new(), vars: HashMap::new() }
    }

    /// Append `filename` from the prompts directory; skipped when absent or blank.
    pub fn layer(mut self, filename: &str) -> Self {
        if let Some(text) = self.read(filename) {
            self.parts.push(text);
        }
        self
    }

    /// Append `filename`, or `fallback` when the file is absent or blank.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let text = self.read(filename).unwrap_or_else(|| fallback.trim().to_string());
        if !text.is_empty() {
            self.parts.push(text);
        }
        self
    }

    /// Register `{{key}}` → `value` pairs applied at build time.
    pub fn with_vars<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in vars {
            self.vars.insert(k.to_string(), v.to_string());
        }
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all layers with blank lines and substitute variables.
    pub fn build(self) -> String {
        substitute(&self.parts.join(SEPARATOR), &self.vars)
    }

    fn read(&self, filename: &str) -> Option<String> {
        let path = self.prompts_dir.join(filename);
        match fs::read_to_string(&path) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(_) => {
                debug!("prompt: '{}' not found, using fallback", path.display());
                None
            }
        }
    }
}

/// Replace each known `{{key}}` in one left-to-right pass. Unknown
/// placeholders are left as written.
fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[open..open + 2 + close + 2]),
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// The conversation prompts, rendered from a prompts directory.
#[derive(Debug, Clone)]
pub struct Prompts {
    dir: PathBuf,
}

impl Prompts {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn base(&self) -> PromptBuilder {
        PromptBuilder::new(&self.dir).layer(PERSONA_FILE)
    }

    /// First message of a conversation.
    pub fn seed(&self, user_input: &str) -> String {
        self.base()
            .layer_or(SEED_FILE, DEFAULT_SEED)
            .var("user_input", user_input)
            .build()
    }

    /// Any later message: the whole conversation plus the new input.
    pub fn follow_up(&self, history: &str, user_input: &str) -> String {
        self.base()
            .layer_or(FOLLOW_UP_FILE, DEFAULT_FOLLOW_UP)
            .with_vars([("history", history), ("user_input", user_input)])
            .build()
    }

    /// Yes/no question: does `user_input` ask to finish and draw?
    /// No persona layer: the reply has to stay a bare verdict.
    pub fn intent(&self, last_turn: &str, user_input: &str) -> String {
        PromptBuilder::new(&self.dir)
            .layer_or(INTENT_FILE, DEFAULT_INTENT)
            .with_vars([("last_turn", last_turn), ("user_input", user_input)])
            .build()
    }

    /// Render the diagram from the full conversation.
    pub fn diagram(&self, history: &str) -> String {
        PromptBuilder::new(&self.dir)
            .layer_or(DIAGRAM_FILE, DEFAULT_DIAGRAM)
            .var("history", history)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn empty_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn builder_skips_missing_file() {
        let dir = empty_dir();
        let result = PromptBuilder::new(dir.path())
            .layer("nonexistent_file_xyz.md")
            .layer_or("also_missing.md", "hello")
            .build();
        assert_eq!(result, "hello");
    }

    #[test]
    fn builder_assembles_layers_in_order() {
        let dir = empty_dir();
        fs::write(dir.path().join("a.md"), "first\n").unwrap();
        fs::write(dir.path().join("b.md"), "  second  ").unwrap();
        let result = PromptBuilder::new(dir.path()).layer("a.md").layer("b.md").build();
        assert_eq!(result, "first\n\nsecond");
    }

    #[test]
    fn layer_or_prefers_file_over_fallback() {
        let dir = empty_dir();
        fs::write(dir.path().join("seed.txt"), "custom {{user_input}}").unwrap();
        let p = PromptBuilder::new(dir.path()).layer_or("seed.txt", "fallback").var("user_input", "x").build();
        assert_eq!(p, "custom x");
        let p = PromptBuilder::new(dir.path()).layer_or("missing.txt", "fallback").build();
        assert_eq!(p, "fallback");
    }

    #[test]
    fn substitution_is_single_pass() {
        let result = PromptBuilder::new("/nonexistent")
            .layer_or("missing.txt", "H: {{history}} U: {{user_input}} K: {{unknown}}")
            .var("history", "said {{user_input}}")
            .var("user_input", "hi")
            .build();
        assert_eq!(result, "H: said {{user_input}} U: hi K: {{unknown}}");
    }

    #[test]
    fn unterminated_placeholder_kept() {
        let vars = HashMap::from([("a".to_string(), "1".to_string())]);
        assert_eq!(substitute("x {{a}} {{b", &vars), "x 1 {{b");
    }

    #[test]
    fn persona_layer_prefixes_conversational_prompts_only() {
        let dir = empty_dir();
        fs::write(dir.path().join(PERSONA_FILE), "You are Archie.").unwrap();
        let prompts = Prompts::new(dir.path());
        assert!(prompts.seed("x").starts_with("You are Archie."));
        assert!(prompts.follow_up("h", "x").starts_with("You are Archie."));
        assert!(!prompts.intent("t", "x").contains("Archie"));
        assert!(!prompts.diagram("h").contains("Archie"));
    }

    #[test]
    fn default_prompts_fill_every_placeholder() {
        let dir = empty_dir();
        let prompts = Prompts::new(dir.path());
        let rendered = [
            prompts.seed("build a data pipeline"),
            prompts.follow_up("User: a\nModel: b", "use kafka"),
            prompts.intent("[{\"user\":\"a\",\"model\":\"b\"}]", "draw it"),
            prompts.diagram("User: a\nModel: b"),
        ];
        for p in &rendered {
            assert!(!p.contains("{{"), "unfilled placeholder in: {p}");
        }
        assert!(rendered[0].ends_with("build a data pipeline"));
        assert!(rendered[1].contains("User: use kafka"));
        assert!(rendered[2].contains("draw it"));
        assert!(rendered[3].contains("Model: b"));
    }
}
