//! # Phase Output Shapes
//!
//! Structured outputs expected from the generation service in each
//! phase, plus the rendering used when a shape parses successfully.
//! Every caller of these shapes also handles the unparsed raw-text
//! fallback; rendering here only covers the happy path.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One chapter in the planned report structure.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChapterOutline {
    /// Chapter title.
    pub title: String,
    /// What the chapter should cover.
    pub description: String,
    /// Importance rating (e.g. "high", "medium").
    #[serde(default)]
    pub importance: String,
}

/// Output of the planning phase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResearchPlanOutline {
    /// Key questions the research must answer.
    #[serde(default)]
    pub key_questions: Vec<String>,
    /// Approach and methodology.
    #[serde(default)]
    pub research_approach: String,
    /// Scope of the investigation.
    #[serde(default)]
    pub scope: String,
    /// Objectives of the investigation.
    #[serde(default)]
    pub objectives: String,
    /// Planned chapter structure for the final report.
    #[serde(default)]
    pub chapter_structure: Vec<ChapterOutline>,
}

impl ResearchPlanOutline {
    /// Flatten the outline into the plan text the human reviews.
    pub fn plan_text(&self) -> String {
        format!(
            "Objectives: {}\nScope: {}\nApproach: {}\nKey questions: {}",
            self.objectives,
            self.scope,
            self.research_approach,
            self.key_questions.join(", ")
        )
    }

    /// Chapter structure formatted for the synthesis prompt.
    pub fn chapter_structure_text(&self) -> String {
        self.chapter_structure
            .iter()
            .enumerate()
            .map(|(i, chapter)| {
                format!(
                    "{}. {} ({} importance)\n   {}",
                    i + 1,
                    chapter.title,
                    if chapter.importance.is_empty() {
                        "unrated"
                    } else {
                        &chapter.importance
                    },
                    chapter.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Output of one research call, answering one key question.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuestionFindings {
    /// Main findings answering the question.
    #[serde(default)]
    pub findings: String,
    /// Important data points and figures.
    #[serde(default)]
    pub data: String,
    /// Expert opinions and notable viewpoints.
    #[serde(default)]
    pub expert_opinions: String,
    /// URLs of the sources relied on.
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl QuestionFindings {
    /// Findings block attributed to the question it answers.
    pub fn formatted(&self, question: &str) -> String {
        format!(
            "[{}]\nFindings: {}\nKey data: {}\nExpert opinions: {}",
            question, self.findings, self.data, self.expert_opinions
        )
    }
}

/// A fully written chapter of the report.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChapterDraft {
    /// Chapter title.
    pub title: String,
    /// Chapter body.
    pub content: String,
    /// Importance rating carried over from the outline.
    #[serde(default)]
    pub importance: String,
}

/// Output of the synthesis phase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SynthesisOutput {
    /// The written chapters, in order.
    #[serde(default)]
    pub chapters: Vec<ChapterDraft>,
    /// Note on deviations from the planned chapter structure.
    #[serde(default)]
    pub structure_changes: String,
}

impl SynthesisOutput {
    /// Render the chapters into the detailed report text.
    pub fn render(&self) -> String {
        let mut report = self
            .chapters
            .iter()
            .enumerate()
            .map(|(i, chapter)| format!("{}. {}\n{}", i + 1, chapter.title, chapter.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        if !self.structure_changes.is_empty() {
            report.push_str(&format!(
                "\n\n--- Structure changes ---\n{}",
                self.structure_changes
            ));
        }
        report
    }
}

/// Output of the summary phase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummaryOutput {
    /// The report's key points.
    #[serde(default)]
    pub key_points: Vec<String>,
    /// Actionable recommendations.
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SummaryOutput {
    /// Render key points and recommendations as the summary text.
    pub fn render(&self) -> String {
        format!(
            "Key points:\n{}\n\nRecommendations:\n{}",
            self.key_points.join("\n"),
            self.recommendations.join("\n")
        )
    }

    pub fn recommendations_text(&self) -> String {
        self.recommendations.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_text_includes_every_question() {
        let outline = ResearchPlanOutline {
            key_questions: vec!["q1".to_string(), "q2".to_string()],
            research_approach: "survey".to_string(),
            scope: "narrow".to_string(),
            objectives: "learn".to_string(),
            chapter_structure: Vec::new(),
        };
        let text = outline.plan_text();
        assert!(text.contains("q1, q2"));
        assert!(text.contains("survey"));
    }

    #[test]
    fn test_report_rendering_numbers_chapters() {
        let output = SynthesisOutput {
            chapters: vec![
                ChapterDraft {
                    title: "Background".to_string(),
                    content: "...".to_string(),
                    importance: "high".to_string(),
                },
                ChapterDraft {
                    title: "Findings".to_string(),
                    content: "...".to_string(),
                    importance: String::new(),
                },
            ],
            structure_changes: "merged two chapters".to_string(),
        };
        let report = output.render();
        assert!(report.starts_with("1. Background"));
        assert!(report.contains("2. Findings"));
        assert!(report.contains("merged two chapters"));
    }

    #[test]
    fn test_shapes_tolerate_missing_fields() {
        let outline: ResearchPlanOutline = serde_json::from_str(r#"{}"#).unwrap();
        assert!(outline.key_questions.is_empty());

        let findings: QuestionFindings =
            serde_json::from_str(r#"{"findings": "some"}"#).unwrap();
        assert_eq!(findings.findings, "some");
        assert!(findings.source_urls.is_empty());
    }
}
