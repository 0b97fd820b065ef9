//! Prompt text sent to the scoring oracle.

/// System instruction given to the analyzer model for every conversation.
pub const ANALYZER_INSTRUCTION: &str = r#"You are an expert career assistant that evaluates how well a candidate's resume matches a job description.

Your goal is to:
- Analyze the resume in detail.
- Compare it with the provided job title and job description.
- Identify relevant experience, skills, and education.
- Point out missing or weak areas.
- Assign an overall match score from 0 to 100.

Return your result as a structured JSON object in this format:

{
  "candidate_email": string,
  "match_score": number,
  "relevant_experiences": [string],
  "relevant_skills": [string],
  "missing_skills": [string],
  "summary": string,
  "recommendation": string
}

Be concise and professional. Base all reasoning only on the provided text.
Do not make up data or assume experience not explicitly mentioned.
Return only valid JSON. Do not include explanations, markdown, or text before or after the JSON.
Your response must be a single JSON object."#;

/// Per-document request: job title, job description, then the resume text.
pub fn scoring_prompt(job_title: &str, job_description: &str, resume: &str) -> String {
    format!("Job Title:\n{job_title}\n\nJob Description:\n{job_description}\n\nResume:\n{resume}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_layout() {
        assert_eq!(
            scoring_prompt("Rust Engineer", "Build workers.", "Ten years of C."),
            "Job Title:\nRust Engineer\n\nJob Description:\nBuild workers.\n\nResume:\nTen years of C."
        );
    }

    #[test]
    fn instruction_names_every_verdict_field() {
        for field in [
            "candidate_email",
            "match_score",
            "relevant_experiences",
            "relevant_skills",
            "missing_skills",
            "summary",
            "recommendation",
        ] {
            assert!(ANALYZER_INSTRUCTION.contains(field), "{field}");
        }
    }
}
