//! Checks the shipped prompt templates under config/prompts.

use std::fs;
use std::path::PathBuf;

use diagram_chat::chat::prompt::{DIAGRAM_FILE, FOLLOW_UP_FILE, INTENT_FILE, PERSONA_FILE, Prompts, SEED_FILE};

fn prompts_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/prompts")
}

fn read(name: &str) -> String {
    fs::read_to_string(prompts_dir().join(name)).unwrap_or_else(|e| panic!("{name} missing: {e}"))
}

#[test]
fn test_seed_prompt_template_vars() {
    assert!(read(SEED_FILE).contains("{{user_input}}"));
}

#[test]
fn test_follow_up_prompt_template_vars() {
    let text = read(FOLLOW_UP_FILE);
    assert!(text.contains("{{history}}"));
    assert!(text.contains("{{user_input}}"));
}

#[test]
fn test_intent_prompt_template_vars() {
    let text = read(INTENT_FILE);
    assert!(text.contains("{{last_turn}}"));
    assert!(text.contains("{{user_input}}"));
    assert!(text.contains("Yes or No"));
}

#[test]
fn test_diagram_prompt_template_vars() {
    let text = read(DIAGRAM_FILE);
    assert!(text.contains("{{history}}"));
    assert!(text.contains("Mermaid"));
}

#[test]
fn test_shipped_prompts_render_completely() {
    let prompts = Prompts::new(prompts_dir());
    let persona = read(PERSONA_FILE);

    let seed = prompts.seed("draw our checkout flow");
    assert!(seed.starts_with(persona.trim()));
    assert!(seed.ends_with("draw our checkout flow"));

    for rendered in [
        seed,
        prompts.follow_up("User: a\nModel: b", "add a queue"),
        prompts.intent(r#"[{"user":"a","model":"b"}]"#, "draw it"),
        prompts.diagram("User: a\nModel: b"),
    ] {
        assert!(!rendered.contains("{{"), "unfilled placeholder in: {rendered}");
    }
}
