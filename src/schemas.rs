//! Data model for challenge generation: requests, candidates, accepted items

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::clients::GenerationError;
use crate::error::{ProofAndFitError, Result};
use crate::fingerprint::{self, Fingerprint};

pub const META_DIFFICULTY: &str = "difficulty";
pub const META_SKILLS: &str = "skills";
pub const META_CHALLENGE_TYPE: &str = "challenge_type";
pub const META_ESTIMATED_MINUTES: &str = "estimated_time_minutes";
pub const META_EVALUATION_CRITERIA: &str = "evaluation_criteria";

/// Rubric used when the generator does not supply one
pub const DEFAULT_EVALUATION_CRITERIA: [&str; 4] =
    ["accuracy", "methodology", "reasoning", "completeness"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }

    /// Expected completion time for a challenge at this level
    pub fn estimated_minutes(&self) -> u32 {
        match self {
            Difficulty::Beginner => 20,
            Difficulty::Intermediate => 30,
            Difficulty::Advanced => 45,
            Difficulty::Expert => 60,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "Entry-level, basic concepts",
            Difficulty::Intermediate => "Mid-level, practical application",
            Difficulty::Advanced => "Senior-level, complex scenarios",
            Difficulty::Expert => "Expert-level, cutting-edge techniques",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ProofAndFitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            "expert" => Ok(Difficulty::Expert),
            other => Err(ProofAndFitError::invalid_params(format!(
                "unknown difficulty '{}' (expected beginner, intermediate, advanced or expert)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    Scenario,
    Analytical,
    Technical,
    CaseStudy,
    ProblemSolving,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Scenario => "scenario",
            ChallengeType::Analytical => "analytical",
            ChallengeType::Technical => "technical",
            ChallengeType::CaseStudy => "case_study",
            ChallengeType::ProblemSolving => "problem_solving",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ChallengeType::Scenario => "Real-world case studies and situations",
            ChallengeType::Analytical => "Data analysis and interpretation tasks",
            ChallengeType::Technical => "Technical skills and tool usage",
            ChallengeType::CaseStudy => "Comprehensive investigation scenarios",
            ChallengeType::ProblemSolving => "Critical thinking and solution development",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = ProofAndFitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "scenario" => Ok(ChallengeType::Scenario),
            "analytical" => Ok(ChallengeType::Analytical),
            "technical" => Ok(ChallengeType::Technical),
            "case_study" => Ok(ChallengeType::CaseStudy),
            "problem_solving" => Ok(ChallengeType::ProblemSolving),
            other => Err(ProofAndFitError::invalid_params(format!(
                "unknown challenge type '{}'",
                other
            ))),
        }
    }
}

/// Job posting the challenges are generated for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    pub title: String,
    pub description: String,
}

/// Immutable input to one orchestration run
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    skills: BTreeSet<String>,
    difficulty: Difficulty,
    challenge_type: ChallengeType,
    type_rotation: Vec<ChallengeType>,
    desired_count: usize,
    job: Option<JobContext>,
}

impl GenerationRequest {
    pub fn new<I, S>(
        skills: I,
        difficulty: Difficulty,
        challenge_type: ChallengeType,
        desired_count: usize,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let skills: BTreeSet<String> = skills
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if skills.is_empty() {
            return Err(ProofAndFitError::invalid_params(
                "select at least one skill area",
            ));
        }
        if desired_count == 0 {
            return Err(ProofAndFitError::invalid_params(
                "desired_count must be at least 1",
            ));
        }
        Ok(Self {
            skills,
            difficulty,
            challenge_type,
            type_rotation: Vec::new(),
            desired_count,
            job: None,
        })
    }

    pub fn with_job(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        let description = description.into();
        if !title.trim().is_empty() || !description.trim().is_empty() {
            self.job = Some(JobContext {
                title: title.trim().to_string(),
                description: description.trim().to_string(),
            });
        }
        self
    }

    /// Cycle challenge types across slots instead of using a single type
    pub fn with_type_rotation(mut self, types: Vec<ChallengeType>) -> Self {
        self.type_rotation = types;
        self
    }

    /// Reject batches larger than the configured ceiling
    pub fn ensure_within(&self, max_batch_size: usize) -> Result<()> {
        if self.desired_count > max_batch_size {
            return Err(ProofAndFitError::invalid_params(format!(
                "desired_count {} exceeds the maximum batch size {}",
                self.desired_count, max_batch_size
            )));
        }
        Ok(())
    }

    pub fn skills(&self) -> &BTreeSet<String> {
        &self.skills
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn challenge_type(&self) -> ChallengeType {
        self.challenge_type
    }

    pub fn desired_count(&self) -> usize {
        self.desired_count
    }

    pub fn job(&self) -> Option<&JobContext> {
        self.job.as_ref()
    }

    pub fn type_for_slot(&self, slot: usize) -> ChallengeType {
        if self.type_rotation.is_empty() {
            self.challenge_type
        } else {
            self.type_rotation[slot % self.type_rotation.len()]
        }
    }
}

/// A generated challenge that has not yet passed the uniqueness check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub title: String,
    pub description: String,
    pub correct_answer: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CandidateItem {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        correct_answer: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            correct_answer: correct_answer.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint::fingerprint(&self.title, &self.description, &self.correct_answer)
    }

    /// Comma-joined metadata value split back into its parts
    pub fn metadata_list(&self, key: &str) -> Vec<String> {
        self.metadata
            .get(key)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fill metadata the generator left out from what the request asked for
    fn fill_defaults(&mut self, request: &GenerationRequest, challenge_type: ChallengeType) {
        let difficulty = request.difficulty();
        self.metadata
            .entry(META_DIFFICULTY.to_string())
            .or_insert_with(|| difficulty.as_str().to_string());
        self.metadata
            .entry(META_CHALLENGE_TYPE.to_string())
            .or_insert_with(|| challenge_type.as_str().to_string());
        self.metadata
            .entry(META_SKILLS.to_string())
            .or_insert_with(|| join_list(request.skills().iter()));
        self.metadata
            .entry(META_ESTIMATED_MINUTES.to_string())
            .or_insert_with(|| difficulty.estimated_minutes().to_string());
        self.metadata
            .entry(META_EVALUATION_CRITERIA.to_string())
            .or_insert_with(|| join_list(DEFAULT_EVALUATION_CRITERIA.iter()));
    }
}

/// A candidate that passed the uniqueness check
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedItem {
    pub item: CandidateItem,
    pub fingerprint: Fingerprint,
    pub accepted_at: DateTime<Utc>,
    pub slot: usize,
    pub attempt: u32,
}

impl AcceptedItem {
    pub fn accept(
        mut item: CandidateItem,
        fingerprint: Fingerprint,
        request: &GenerationRequest,
        slot: usize,
        attempt: u32,
    ) -> Self {
        item.fill_defaults(request, request.type_for_slot(slot));
        Self {
            item,
            fingerprint,
            accepted_at: Utc::now(),
            slot,
            attempt,
        }
    }

    pub fn title(&self) -> &str {
        &self.item.title
    }

    pub fn difficulty(&self) -> String {
        self.item
            .metadata
            .get(META_DIFFICULTY)
            .cloned()
            .unwrap_or_else(|| Difficulty::Intermediate.as_str().to_string())
    }

    pub fn challenge_type(&self) -> String {
        self.item
            .metadata
            .get(META_CHALLENGE_TYPE)
            .cloned()
            .unwrap_or_else(|| ChallengeType::Scenario.as_str().to_string())
    }

    pub fn skills(&self) -> Vec<String> {
        self.item.metadata_list(META_SKILLS)
    }

    pub fn evaluation_criteria(&self) -> Vec<String> {
        self.item.metadata_list(META_EVALUATION_CRITERIA)
    }

    pub fn estimated_minutes(&self) -> u32 {
        self.item
            .metadata
            .get(META_ESTIMATED_MINUTES)
            .and_then(|v| v.parse().ok())
            .unwrap_or(30)
    }
}

fn join_list<I, S>(items: I) -> String
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    items
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shape the generation service is asked to return
#[derive(Debug, Deserialize)]
struct GeneratedChallenge {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    correct_answer: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    skills: Option<Value>,
    #[serde(default)]
    challenge_type: Option<String>,
    #[serde(default)]
    estimated_time_minutes: Option<Value>,
    #[serde(default)]
    evaluation_criteria: Option<Value>,
}

fn required(field: &str, value: Option<String>) -> std::result::Result<String, GenerationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(GenerationError::Malformed(format!(
            "missing required field '{}'",
            field
        ))),
    }
}

/// Lists arrive as JSON arrays or as a single comma-separated string
fn value_list(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Locate the JSON object inside raw model output (code fences, prose)
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Structural validation of generated text into a candidate
pub fn parse_candidate(raw: &str) -> std::result::Result<CandidateItem, GenerationError> {
    let body = extract_json_object(raw)
        .ok_or_else(|| GenerationError::Malformed("no JSON object in response".to_string()))?;
    let generated: GeneratedChallenge = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("invalid challenge JSON: {}", e)))?;

    let mut item = CandidateItem::new(
        required("title", generated.title)?,
        required("description", generated.description)?,
        required("correct_answer", generated.correct_answer)?,
    );
    if let Some(difficulty) = generated.difficulty.filter(|d| !d.trim().is_empty()) {
        item.metadata
            .insert(META_DIFFICULTY.to_string(), difficulty.trim().to_lowercase());
    }
    if let Some(kind) = generated.challenge_type.filter(|t| !t.trim().is_empty()) {
        item.metadata
            .insert(META_CHALLENGE_TYPE.to_string(), kind.trim().to_lowercase());
    }
    let skills = value_list(generated.skills);
    if !skills.is_empty() {
        item.metadata
            .insert(META_SKILLS.to_string(), join_list(skills.iter()));
    }
    let criteria = value_list(generated.evaluation_criteria);
    if !criteria.is_empty() {
        item.metadata
            .insert(META_EVALUATION_CRITERIA.to_string(), join_list(criteria.iter()));
    }
    // Models return this as either a number or a numeric string
    let minutes = match generated.estimated_time_minutes {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    if let Some(minutes) = minutes.filter(|m| *m > 0) {
        item.metadata
            .insert(META_ESTIMATED_MINUTES.to_string(), minutes.to_string());
    }
    Ok(item)
}

/// JSON schema for a generated challenge, sent as the structured output format
pub fn challenge_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "correct_answer": {"type": "string"},
            "difficulty": {"type": "string", "enum": ["beginner", "intermediate", "advanced", "expert"]},
            "skills": {"type": "array", "items": {"type": "string"}},
            "challenge_type": {"type": "string", "enum": ["scenario", "analytical", "technical", "case_study", "problem_solving"]},
            "estimated_time_minutes": {"type": "integer"},
            "evaluation_criteria": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["title", "description", "correct_answer"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_skills_and_count() {
        assert!(
            GenerationRequest::new(["  "], Difficulty::Beginner, ChallengeType::Scenario, 1)
                .is_err()
        );
        assert!(
            GenerationRequest::new(["Audit"], Difficulty::Beginner, ChallengeType::Scenario, 0)
                .is_err()
        );
        let req = GenerationRequest::new(
            [" Audit ", "Audit", "Forensics"],
            Difficulty::Beginner,
            ChallengeType::Scenario,
            2,
        )
        .unwrap();
        assert_eq!(req.skills().len(), 2);
        assert!(req.ensure_within(1).is_err());
        assert!(req.ensure_within(2).is_ok());
    }

    #[test]
    fn type_rotation_cycles_by_slot() {
        let req = GenerationRequest::new(["Audit"], Difficulty::Advanced, ChallengeType::Scenario, 4)
            .unwrap()
            .with_type_rotation(vec![ChallengeType::Analytical, ChallengeType::CaseStudy]);
        assert_eq!(req.type_for_slot(0), ChallengeType::Analytical);
        assert_eq!(req.type_for_slot(1), ChallengeType::CaseStudy);
        assert_eq!(req.type_for_slot(2), ChallengeType::Analytical);
    }

    #[test]
    fn enums_parse_loosely() {
        assert_eq!("Case Study".parse::<ChallengeType>().unwrap(), ChallengeType::CaseStudy);
        assert_eq!("problem-solving".parse::<ChallengeType>().unwrap(), ChallengeType::ProblemSolving);
        assert_eq!(" EXPERT".parse::<Difficulty>().unwrap(), Difficulty::Expert);
        assert!("wizard".parse::<Difficulty>().is_err());
    }

    #[test]
    fn parse_candidate_accepts_fenced_json() {
        let raw = "Here you go:\n```json\n{\"title\": \"Ledger gaps\", \"description\": \"D\", \"correct_answer\": \"A\", \"skills\": [\"Audit\", \"Tax\"], \"estimated_time_minutes\": \"45\"}\n```";
        let item = parse_candidate(raw).unwrap();
        assert_eq!(item.title, "Ledger gaps");
        assert_eq!(item.metadata_list(META_SKILLS), vec!["Audit", "Tax"]);
        assert_eq!(item.metadata.get(META_ESTIMATED_MINUTES).unwrap(), "45");
    }

    #[test]
    fn parse_candidate_rejects_missing_fields() {
        let err = parse_candidate(r#"{"title": "T", "description": "  "}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
        assert!(parse_candidate("no json here").is_err());
        assert!(parse_candidate("{ not json }").is_err());
    }

    #[test]
    fn accepted_item_fills_missing_metadata() {
        let req = GenerationRequest::new(
            ["Fraud Detection"],
            Difficulty::Expert,
            ChallengeType::Scenario,
            1,
        )
        .unwrap();
        let candidate = CandidateItem::new("T", "D", "A").with_metadata(META_DIFFICULTY, "advanced");
        let fp = candidate.fingerprint();
        let accepted = AcceptedItem::accept(candidate, fp, &req, 0, 1);
        assert_eq!(accepted.difficulty(), "advanced");
        assert_eq!(accepted.challenge_type(), "scenario");
        assert_eq!(accepted.skills(), vec!["Fraud Detection"]);
        assert_eq!(accepted.estimated_minutes(), 60);
        assert_eq!(accepted.evaluation_criteria().len(), 4);
    }
}
