use chrono::{TimeZone, Utc};

use agent_relay::continuity::{compose_bootstrap_prompt, BootstrapContext, SECTION_DELIMITER};
use agent_relay::models::turn::{Role, Turn};

fn history() -> Vec<Turn> {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
    vec![
        Turn::new(Role::User, "what is the build status?", at),
        Turn::new(Role::Assistant, "green", at),
    ]
}

#[test]
fn sections_appear_in_fixed_order() {
    let turns = history();
    let context = BootstrapContext {
        global_memory: Some("global facts"),
        assistant_memory: Some("assistant facts"),
        history: &turns,
    };
    let prompt = compose_bootstrap_prompt(&context, "next question");

    let sections: Vec<&str> = prompt.split(SECTION_DELIMITER).collect();
    assert_eq!(sections.len(), 4);
    assert!(sections[0].contains("global facts"));
    assert!(sections[1].contains("assistant facts"));
    assert!(sections[2].contains("## user (2026-03-01 09:30:00 UTC)"));
    assert!(sections[2].find("build status").unwrap() < sections[2].find("green").unwrap());
    assert_eq!(sections[3], "next question");
}

#[test]
fn empty_sections_are_omitted() {
    let context = BootstrapContext {
        global_memory: Some("  \n"),
        assistant_memory: None,
        history: &[],
    };
    assert_eq!(compose_bootstrap_prompt(&context, "hi"), "hi");

    let context = BootstrapContext {
        global_memory: None,
        assistant_memory: Some("remember this"),
        history: &[],
    };
    let prompt = compose_bootstrap_prompt(&context, "hi");
    assert_eq!(prompt.matches(SECTION_DELIMITER).count(), 1);
    assert!(prompt.ends_with(&format!("{SECTION_DELIMITER}hi")));
}

#[test]
fn message_is_appended_verbatim() {
    let message = "  keep\n\nmy   spacing  ";
    let prompt = compose_bootstrap_prompt(&BootstrapContext::default(), message);
    assert_eq!(prompt, message);
}

#[test]
fn composition_is_deterministic() {
    let turns = history();
    let context = BootstrapContext {
        global_memory: Some("g"),
        assistant_memory: Some("a"),
        history: &turns,
    };
    assert_eq!(
        compose_bootstrap_prompt(&context, "m"),
        compose_bootstrap_prompt(&context, "m")
    );
}
