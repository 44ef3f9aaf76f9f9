//! Prompt construction for assessment challenge generation

use std::fmt::Write as _;

use serde_json::json;

use crate::fingerprint::Fingerprint;
use crate::schemas::{ChallengeType, DEFAULT_EVALUATION_CRITERIA, GenerationRequest};

pub const SYSTEM_PROMPT: &str = "You are an expert forensic accounting professional creating unique assessment challenges for job candidates. Respond with a single JSON object and nothing else.";

/// Build the user prompt for one attempt at one slot.
///
/// `exclusion_hints` are fingerprints of challenges that already exist. They
/// only nudge the model; uniqueness is decided afterwards by fingerprint.
pub fn challenge_prompt(
    request: &GenerationRequest,
    challenge_type: ChallengeType,
    exclusion_hints: &[Fingerprint],
) -> String {
    let skills: Vec<&str> = request.skills().iter().map(String::as_str).collect();
    let skills_text = skills.join(", ");
    let difficulty = request.difficulty();
    let mut prompt = String::new();

    if let Some(job) = request.job() {
        let _ = writeln!(
            prompt,
            "You are creating a unique assessment challenge for this specific job posting:\n"
        );
        let _ = writeln!(prompt, "JOB TITLE: {}", job.title);
        let _ = writeln!(prompt, "JOB DESCRIPTION: {}", job.description);
        let _ = writeln!(prompt, "REQUIRED SKILLS: {}", skills_text);
        let _ = writeln!(prompt, "DIFFICULTY LEVEL: {}", difficulty);
        let _ = writeln!(prompt, "CHALLENGE TYPE: {}\n", challenge_type);
        prompt.push_str(
            "The challenge must directly relate to the job requirements, test the exact skills \
             needed for this position and reflect the company's industry and context.\n\n",
        );
    }

    let _ = writeln!(prompt, "CRITICAL REQUIREMENTS:");
    let _ = writeln!(
        prompt,
        "1. Generate completely UNIQUE content - avoid any similarity to existing challenges"
    );
    let _ = writeln!(
        prompt,
        "2. Focus on {} skills at {} difficulty level ({})",
        skills_text,
        difficulty,
        difficulty.describe()
    );
    let _ = writeln!(
        prompt,
        "3. Create a {} challenge ({})",
        challenge_type,
        challenge_type.describe()
    );
    let _ = writeln!(
        prompt,
        "4. The challenge must be substantively different from every other challenge"
    );
    if !exclusion_hints.is_empty() {
        let hints: Vec<&str> = exclusion_hints.iter().map(Fingerprint::as_str).collect();
        let _ = writeln!(
            prompt,
            "5. Avoid these existing content patterns (hashes): {}",
            hints.join(", ")
        );
    }

    prompt.push_str(
        "\nCHALLENGE REQUIREMENTS:\n\
         - Title: concise, professional title (max 100 characters)\n\
         - Description: detailed scenario with specific context, numbers and realistic details (200-500 words)\n\
         - Correct Answer: comprehensive solution with step-by-step reasoning (150-300 words)\n\
         \nFOCUS ON UNIQUE ELEMENTS:\n\
         - Specific industry contexts (healthcare, tech, manufacturing, etc.)\n\
         - Modern schemes (cryptocurrency, digital payments, remote work fraud)\n\
         - Complex multi-jurisdictional cases\n\
         - Emerging forensic technologies\n\
         \nAVOID generic fraud detection, basic ratio analysis, simple embezzlement cases and standard audit procedures.\n\n",
    );

    let example = json!({
        "title": "Specific, unique challenge title",
        "description": "Detailed, realistic scenario with specific context and data",
        "correct_answer": "Comprehensive solution with methodology and reasoning",
        "difficulty": difficulty.as_str(),
        "skills": skills.iter().take(3).collect::<Vec<_>>(),
        "challenge_type": challenge_type.as_str(),
        "estimated_time_minutes": difficulty.estimated_minutes(),
        "evaluation_criteria": DEFAULT_EVALUATION_CRITERIA,
    });
    let _ = write!(
        prompt,
        "Generate a JSON object with this exact structure:\n{}",
        serde_json::to_string_pretty(&example).unwrap_or_else(|_| example.to_string())
    );

    prompt
}
