//! Judge prompts for the hallucination and correctness metrics.
//!
//! Every prompt asks for a single JSON object so the reply can be parsed
//! mechanically by [`crate::pipeline::judge`]. Unit tests inspect the
//! rendered prompts directly, so wording changes that drop a required
//! field are caught without calling a model.

/// System message shared by every judgment.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are a strict evaluator of vision model outputs. You compare what a model claims to see in an image against trusted reference descriptions of that image.

Rules:
- Judge only against the provided context; do not use outside knowledge about the image.
- Answers that are vague, evasive, or an error marker do not agree with the context.
- Respond with a single JSON object and nothing else. No markdown fences, no commentary."#;

/// Per-context agreement verdicts for the hallucination metric.
///
/// `{contexts}` and `{actual_output}` are substituted by [`hallucination_prompt`].
const HALLUCINATION_TEMPLATE: &str = r#"For EACH context in the list below, decide whether the actual output agrees with it.

Produce a JSON object with a "verdicts" key holding a list with exactly one object per context, in the same order. Each object has two keys:
- "verdict": STRICTLY "yes" if the actual output agrees with the context, or "no" if it contradicts it.
- "reason": one sentence explaining the verdict. For "no", state what the context says instead.

Missing detail is not a contradiction; only claims that conflict with the context are.

Example:
{"verdicts": [{"verdict": "no", "reason": "The output reads the word as 'bat' but the context says the image contains 'cat'."}]}

Contexts:
{contexts}

Actual output:
{actual_output}

JSON:"#;

/// Overall agreement score for the correctness metric.
const CORRECTNESS_TEMPLATE: &str = r#"Compare the actual output of a vision model with the expected output for the same image.

Score how completely and accurately the actual output conveys the expected output, from 0.0 (wrong or unrelated) to 1.0 (fully correct). Paraphrases are fine; wrong words, wrong numbers, or invented content lower the score.

Produce a JSON object with two keys:
- "score": a number between 0.0 and 1.0
- "reason": one sentence explaining the score

Expected output:
{expected_output}

Actual output:
{actual_output}

JSON:"#;

/// Render the hallucination prompt, numbering contexts from 1.
pub fn hallucination_prompt(actual_output: &str, contexts: &[String]) -> String {
    let numbered = contexts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");
    HALLUCINATION_TEMPLATE
        .replace("{contexts}", &numbered)
        .replace("{actual_output}", actual_output)
}

/// Render the correctness prompt.
pub fn correctness_prompt(actual_output: &str, expected_output: &str) -> String {
    CORRECTNESS_TEMPLATE
        .replace("{expected_output}", expected_output)
        .replace("{actual_output}", actual_output)
}
