//! Default prompt templates bundled at compile time.
//!
//! The core treats a prompt as an opaque string; these builders only
//! substitute structured input into the bundled templates. Wording and
//! localization live in the `defaults/` files, not in code.

/// Planning - produce key questions, approach, and chapter structure
pub const PLANNING: &str = include_str!("prompts/defaults/planning.md");

/// Plan confirmation - present the plan to the human and report a verdict
pub const PLAN_CONFIRMATION: &str = include_str!("prompts/defaults/plan_confirmation.md");

/// Research - answer one key question with findings and sources
pub const RESEARCH: &str = include_str!("prompts/defaults/research.md");

/// Synthesis - write the full report from the collected findings
pub const SYNTHESIS: &str = include_str!("prompts/defaults/synthesis.md");

/// Summary - key points and recommendations from the report
pub const SUMMARY: &str = include_str!("prompts/defaults/summary.md");

/// Report delivery - present the results back through the chat thread
pub const REPORT_DELIVERY: &str = include_str!("prompts/defaults/report_delivery.md");

pub fn planning_prompt(
    topic: &str,
    purpose: Option<&str>,
    scope: Option<&str>,
    language: &str,
) -> String {
    PLANNING
        .replace("{topic}", topic)
        .replace("{purpose}", purpose.unwrap_or("general research"))
        .replace("{scope}", scope.unwrap_or("comprehensive"))
        .replace("{language}", language)
}

pub fn plan_confirmation_prompt(current_plan: &str, first_iteration: bool, language: &str) -> String {
    let preamble = if first_iteration {
        "A research plan has been drafted and needs human approval before the research begins."
    } else {
        "The research plan has been revised based on earlier feedback and needs another review."
    };
    PLAN_CONFIRMATION
        .replace("{preamble}", preamble)
        .replace("{current_plan}", current_plan)
        .replace("{language}", language)
}

/// Minimal prompt for the no-schema, no-tools confirmation fallback.
pub fn plan_confirmation_fallback_prompt(current_plan: &str) -> String {
    format!("Please review this research plan: {current_plan}")
}

pub fn research_prompt(question: &str, language: &str) -> String {
    RESEARCH
        .replace("{question}", question)
        .replace("{language}", language)
}

pub fn synthesis_prompt(
    topic: &str,
    plan: &str,
    chapter_structure: &str,
    findings: &str,
    language: &str,
) -> String {
    SYNTHESIS
        .replace("{topic}", topic)
        .replace("{plan}", plan)
        .replace("{chapter_structure}", chapter_structure)
        .replace("{findings}", findings)
        .replace("{language}", language)
}

pub fn summary_prompt(report: &str, language: &str) -> String {
    SUMMARY
        .replace("{report}", report)
        .replace("{language}", language)
}

pub fn report_delivery_prompt(
    topic: &str,
    report: &str,
    summary: &str,
    recommendations: &str,
    language: &str,
) -> String {
    REPORT_DELIVERY
        .replace("{topic}", topic)
        .replace("{summary}", summary)
        .replace("{recommendations}", recommendations)
        .replace("{report}", report)
        .replace("{language}", language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_non_empty() {
        for (name, template) in [
            ("planning", PLANNING),
            ("plan_confirmation", PLAN_CONFIRMATION),
            ("research", RESEARCH),
            ("synthesis", SYNTHESIS),
            ("summary", SUMMARY),
            ("report_delivery", REPORT_DELIVERY),
        ] {
            assert!(template.len() > 50, "template '{}' seems too short", name);
        }
    }

    #[test]
    fn test_substitution_leaves_no_placeholders() {
        let prompt = planning_prompt("quantum batteries", None, Some("recent work"), "English");
        assert!(prompt.contains("quantum batteries"));
        assert!(prompt.contains("recent work"));
        assert!(!prompt.contains("{topic}"));
        assert!(!prompt.contains("{language}"));
    }

    #[test]
    fn test_confirmation_prompt_marks_the_first_iteration() {
        let first = plan_confirmation_prompt("plan v1", true, "English");
        let later = plan_confirmation_prompt("plan v1", false, "English");
        assert!(first.contains("drafted"));
        assert!(later.contains("revised"));
        assert_ne!(first, later);
    }
}
