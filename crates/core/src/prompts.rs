//! Purpose / Details / Output-format prompt templates.
//!
//! Every function here is pure: the same summary type, passages and focus
//! areas always render the same prompt string.

use crate::{ScoredChunk, SummaryType};
use std::fmt::Write;

struct PdoTemplate {
    purpose: &'static str,
    details: &'static [&'static str],
    output_format: &'static str,
    answer_cue: &'static str,
}

const COMPREHENSIVE: PdoTemplate = PdoTemplate {
    purpose: "Create a comprehensive summary of this research paper, covering its methodology, findings and implications.",
    details: &[
        "Summarize the paper's main contribution to its field",
        "Include research objectives, methodology, key findings and conclusions",
        "Highlight novel approaches or significant results",
        "Mention limitations and suggested future work",
        "Name the datasets, models and performance metrics the paper relies on",
    ],
    output_format: "## Research Paper Summary

**Title & Objective:**
[Main research question and objectives]

**Methodology:**
[Approach, datasets, models, experimental setup]

**Key Findings:**
[Main results and discoveries]

**Significance:**
[Contribution to the field and implications]

**Limitations & Future Work:**
[Acknowledged limitations and suggested directions]",
    answer_cue: "Summary:",
};

const KEY_POINTS: PdoTemplate = PdoTemplate {
    purpose: "Extract the most important points of this research paper as concise bullet points.",
    details: &[
        "Focus on the most critical insights and contributions",
        "Include quantitative results where available",
        "Highlight methodological innovations",
        "Keep each point short but informative",
        "Prioritize findings that advance the field",
    ],
    output_format: "## Key Research Points

**Main Contributions:**
• [Key contribution 1]
• [Key contribution 2]
• [Key contribution 3]

**Methodology Highlights:**
• [Important methodological aspect 1]
• [Important methodological aspect 2]

**Significant Results:**
• [Key finding 1 with metrics if available]
• [Key finding 2 with metrics if available]

**Novel Insights:**
• [New insight or approach 1]
• [New insight or approach 2]",
    answer_cue: "Key Points:",
};

const METHODOLOGY: PdoTemplate = PdoTemplate {
    purpose: "Summarize the research methodology, experimental design and technical approach of this paper in detail.",
    details: &[
        "Focus on technical implementation details",
        "Cover datasets, models and evaluation metrics",
        "Explain the experimental setup and validation approach",
        "Highlight novel methodological contributions",
        "Describe data preprocessing, feature extraction and model architecture where present",
    ],
    output_format: "## Methodology Summary

**Research Approach:**
[Overall methodological framework]

**Data & Preprocessing:**
[Dataset details, size, preprocessing steps]

**Model Architecture:**
[Model design, algorithms used, technical specifications]

**Experimental Setup:**
[Training procedure, hyperparameters, validation approach]

**Evaluation Metrics:**
[Performance measures and evaluation methodology]

**Technical Innovations:**
[Novel methodological contributions]",
    answer_cue: "Methodology:",
};

const FINDINGS: PdoTemplate = PdoTemplate {
    purpose: "Summarize the findings, results and conclusions of this research paper, emphasizing quantitative outcomes and their significance.",
    details: &[
        "Focus on empirical results and statistical findings",
        "Include performance metrics, comparisons and benchmarks",
        "Highlight significant improvements or novel discoveries",
        "Explain the practical implications of the results",
        "Compare with baselines or state-of-the-art methods when the paper does",
    ],
    output_format: "## Research Findings & Results

**Primary Results:**
[Main experimental outcomes with specific metrics]

**Performance Metrics:**
[Quantitative results: accuracy, precision, recall, F1-score, etc.]

**Comparative Analysis:**
[How results compare to existing methods/baselines]

**Statistical Significance:**
[Significance of improvements and confidence levels]

**Practical Implications:**
[Real-world applications and impact]

**Limitations Identified:**
[Constraints and areas for improvement]",
    answer_cue: "Findings:",
};

const QUESTION: PdoTemplate = PdoTemplate {
    purpose: "You are an expert research assistant analyzing an academic paper. Answer the question accurately using the provided context.",
    details: &[
        "Use only the information in the context below",
        "If the answer is not in the context, say so clearly",
        "Pay attention to methodologies, datasets, evaluation metrics and findings",
        "Keep an academic tone and be precise",
        "Cite the excerpt numbers you rely on",
    ],
    output_format: "Provide a clear, structured answer that:
1. Directly addresses the question
2. References specific parts of the paper when relevant
3. Uses technical terminology appropriately
4. Stays objective and accurate",
    answer_cue: "Answer:",
};

fn template(summary_type: SummaryType) -> &'static PdoTemplate {
    match summary_type {
        SummaryType::Comprehensive => &COMPREHENSIVE,
        SummaryType::KeyPoints => &KEY_POINTS,
        SummaryType::Methodology => &METHODOLOGY,
        SummaryType::Findings => &FINDINGS,
    }
}

pub fn canonical_query(summary_type: SummaryType, focus_areas: &[String]) -> String {
    let mut query = match summary_type {
        SummaryType::Comprehensive => "Provide a comprehensive summary of this research paper including methodology, findings, and implications.",
        SummaryType::KeyPoints => "Extract and list the key points and main contributions of this research paper.",
        SummaryType::Methodology => "Describe the methodology, experimental design, and technical approach used in this research.",
        SummaryType::Findings => "Summarize the key findings, results, and conclusions of this research with specific metrics and outcomes.",
    }
    .to_string();

    let focus = clean_entries(focus_areas);
    if !focus.is_empty() {
        let _ = write!(
            query,
            " Pay special attention to aspects related to {}.",
            focus.join(", ")
        );
    }
    query
}

pub fn summary_prompt(
    summary_type: SummaryType,
    passages: &[ScoredChunk],
    focus_areas: &[String],
) -> String {
    let template = template(summary_type);
    let focus = clean_entries(focus_areas);
    let focus_detail = (!focus.is_empty())
        .then(|| format!("Pay special attention to: {}", focus.join(", ")));

    let details: Vec<&str> = template
        .details
        .iter()
        .copied()
        .chain(focus_detail.as_deref())
        .collect();

    render(
        template.purpose,
        &details,
        passages,
        None,
        template.output_format,
        template.answer_cue,
    )
}

pub fn question_prompt(question: &str, passages: &[ScoredChunk]) -> String {
    render(
        QUESTION.purpose,
        QUESTION.details,
        passages,
        Some(question.trim()),
        QUESTION.output_format,
        QUESTION.answer_cue,
    )
}

pub fn custom_prompt(
    purpose: &str,
    details: &[String],
    output_format: &str,
    passages: &[ScoredChunk],
) -> String {
    render(
        purpose.trim(),
        &clean_entries(details),
        passages,
        None,
        output_format.trim(),
        "Response:",
    )
}

// Retrieval text for a custom prompt when the caller gives no explicit query.
pub fn custom_query(purpose: &str, details: &[String]) -> String {
    let mut query = purpose.trim().to_string();
    for detail in clean_entries(details) {
        query.push(' ');
        query.push_str(detail);
    }
    query
}

fn clean_entries(entries: &[String]) -> Vec<&str> {
    entries
        .iter()
        .map(|area| area.trim())
        .filter(|area| !area.is_empty())
        .collect()
}

fn render_context(passages: &[ScoredChunk]) -> String {
    passages
        .iter()
        .map(|passage| {
            let label = match passage.chunk.page {
                Some(page) => format!("[Excerpt {}, page {}]", passage.chunk.sequence, page),
                None => format!("[Excerpt {}]", passage.chunk.sequence),
            };
            format!("{label}\n{}", passage.chunk.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render(
    purpose: &str,
    details: &[&str],
    passages: &[ScoredChunk],
    question: Option<&str>,
    output_format: &str,
    answer_cue: &str,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "PURPOSE: {purpose}");
    prompt.push('\n');
    prompt.push_str("DETAILS:\n");
    for detail in details {
        let _ = writeln!(prompt, "- {detail}");
    }
    prompt.push('\n');
    let _ = writeln!(prompt, "CONTEXT:\n{}", render_context(passages));
    if let Some(question) = question {
        prompt.push('\n');
        let _ = writeln!(prompt, "QUESTION: {question}");
    }
    prompt.push('\n');
    let _ = writeln!(prompt, "OUTPUT FORMAT:\n{output_format}");
    prompt.push('\n');
    prompt.push_str(answer_cue);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chunk;

    fn passage(sequence: u64, page: Option<u32>, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: format!("c{sequence}"),
                document_id: "doc".to_string(),
                source: "paper.pdf".to_string(),
                page,
                sequence,
                char_start: 0,
                char_end: text.len(),
                overlap: 0,
                text: text.to_string(),
            },
            score: 0.9,
            distance: 0.1,
        }
    }

    #[test]
    fn summary_prompt_has_the_three_sections_in_order() {
        let prompt = summary_prompt(
            SummaryType::Methodology,
            &[passage(2, Some(4), "We fine-tune BERT on SST-2.")],
            &[],
        );

        let purpose = prompt.find("PURPOSE:").unwrap();
        let details = prompt.find("DETAILS:").unwrap();
        let context = prompt.find("CONTEXT:").unwrap();
        let output = prompt.find("OUTPUT FORMAT:").unwrap();
        assert!(purpose < details && details < context && context < output);
        assert!(prompt.contains("## Methodology Summary"));
        assert!(prompt.contains("[Excerpt 2, page 4]\nWe fine-tune BERT on SST-2."));
        assert!(prompt.ends_with("Methodology:"));
    }

    #[test]
    fn prompts_are_deterministic() {
        let passages = vec![passage(0, None, "alpha"), passage(1, None, "beta")];
        let focus = vec!["datasets".to_string()];

        assert_eq!(
            summary_prompt(SummaryType::Findings, &passages, &focus),
            summary_prompt(SummaryType::Findings, &passages, &focus)
        );
        assert_eq!(
            question_prompt("What is measured?", &passages),
            question_prompt("What is measured?", &passages)
        );
    }

    #[test]
    fn focus_areas_extend_details_and_query() {
        let focus = vec![" evaluation metrics ".to_string(), String::new(), "baselines".to_string()];
        let prompt = summary_prompt(SummaryType::KeyPoints, &[], &focus);
        assert!(prompt.contains("- Pay special attention to: evaluation metrics, baselines\n"));

        let query = canonical_query(SummaryType::KeyPoints, &focus);
        assert!(query.ends_with("aspects related to evaluation metrics, baselines."));
        assert!(!canonical_query(SummaryType::KeyPoints, &[]).contains("special attention"));
    }

    #[test]
    fn question_prompt_carries_the_question() {
        let prompt = question_prompt("  Which dataset is used? ", &[passage(0, None, "IMDB reviews")]);
        assert!(prompt.contains("QUESTION: Which dataset is used?\n"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn every_summary_type_has_its_own_skeleton() {
        let headings: Vec<String> = SummaryType::ALL
            .iter()
            .map(|kind| {
                let prompt = summary_prompt(*kind, &[], &[]);
                let start = prompt.find("## ").unwrap();
                prompt[start..].lines().next().unwrap().to_string()
            })
            .collect();
        let mut unique = headings.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn custom_prompt_uses_the_given_sections() {
        let details = vec![" One dataset per line ".to_string(), "  ".to_string()];
        let prompt = custom_prompt(
            "List every dataset.",
            &details,
            "- [dataset]",
            &[passage(0, None, "We use IMDB and Yelp.")],
        );
        assert!(prompt.starts_with("PURPOSE: List every dataset.\n"));
        assert!(prompt.contains("DETAILS:\n- One dataset per line\n\n"));
        assert!(prompt.contains("OUTPUT FORMAT:\n- [dataset]\n"));
        assert!(prompt.ends_with("Response:"));
    }

    #[test]
    fn custom_query_joins_purpose_and_details() {
        let details = vec!["training data".to_string(), " ".to_string()];
        assert_eq!(
            custom_query(" List every dataset. ", &details),
            "List every dataset. training data"
        );
    }
}
