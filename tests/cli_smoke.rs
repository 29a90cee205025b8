use std::process::Command;

use tempfile::tempdir;

fn thematic() -> Command {
    Command::new(env!("CARGO_BIN_EXE_thematic"))
}

#[test]
fn cli_detect_language_defaults_short_text_to_spanish() {
    let out = thematic()
        .args(["detect-language", "--text", "ok"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "es");
}

#[test]
fn cli_detect_language_reads_answers_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("answers.txt");
    std::fs::write(
        &path,
        "The taste is great and I really like the packaging\n\
         It is far too expensive for what you get in the box\n\
         I would buy it again because my children love it\n",
    )
    .unwrap();

    let out = thematic()
        .args(["detect-language", "--file"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "en");
}

#[test]
fn cli_prompt_renders_extract_codes_with_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("answers.json");
    std::fs::write(
        &input,
        serde_json::to_string(&["Me encanta el sabor", "Muy caro"]).unwrap(),
    )
    .unwrap();

    let out = thematic()
        .args([
            "prompt",
            "--stage",
            "extract-codes",
            "--question",
            "¿Qué opinas del producto?",
            "--language",
            "es",
        ])
        .arg("--input")
        .arg(&input)
        .output()
        .unwrap();
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("=== extract_codes_v1 / system ==="));
    assert!(stdout.contains("Categorize open-ended responses"));
    assert!(stdout.contains("¿Qué opinas del producto?"));
    assert!(stdout.contains("SPANISH"));
    assert!(stdout.contains("Me encanta el sabor"));
}

#[test]
fn cli_prompt_rejects_unknown_stage_and_language() {
    let out = thematic()
        .args(["prompt", "--stage", "tokenize", "--question", "Q"])
        .output()
        .unwrap();
    assert!(!out.status.success());

    let out = thematic()
        .args([
            "prompt",
            "--stage",
            "classify-question",
            "--question",
            "Q",
            "--language",
            "xx",
        ])
        .output()
        .unwrap();
    assert!(!out.status.success());
}
