use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::assignment::{Question, QuestionKind};
use crate::models::grade::{DelegateScore, GradeOutcome};

pub const DEFAULT_NUMERIC_TOLERANCE: f64 = 0.01;
pub const DELEGATE_PASS_THRESHOLD: f64 = 0.7;
pub const GRADING_FUNCTION: &str = "grade-open-response";

/// Seam for the external AI scorer used on open-ended questions.
#[async_trait]
pub trait GradingDelegate: Send + Sync {
    async fn score(&self, question: &Question, answer: &str) -> Result<DelegateScore>;
}

pub struct HttpGradingDelegate {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGradingDelegate {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        // One client for the delegate's lifetime so connections are pooled
        // across questions.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build grading HTTP client")?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl GradingDelegate for HttpGradingDelegate {
    async fn score(&self, question: &Question, answer: &str) -> Result<DelegateScore> {
        let url = format!(
            "{}/functions/v1/{}",
            self.base_url.trim_end_matches('/'),
            GRADING_FUNCTION
        );

        let body = serde_json::json!({
            "question": question.prompt,
            "reference_answer": question.correct_answer,
            "answer": answer,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to call grading function")?;

        if !response.status().is_success() {
            anyhow::bail!("Grading function returned status: {}", response.status());
        }

        let body: serde_json::Value = response.json().await?;
        let score = body["score"]
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("Invalid response format"))?;
        let feedback = body["feedback"].as_str().map(|s| s.to_string());

        Ok(DelegateScore { score, feedback })
    }
}

/// Routes each question to its grading strategy and aggregates scores.
pub struct GradingService {
    delegate: Arc<dyn GradingDelegate>,
    delegate_timeout: Duration,
}

impl GradingService {
    pub fn new(delegate: Arc<dyn GradingDelegate>, delegate_timeout: Duration) -> Self {
        Self {
            delegate,
            delegate_timeout,
        }
    }

    pub async fn grade(&self, question: &Question, answer: &str) -> GradeOutcome {
        match question.kind {
            QuestionKind::Numeric => grade_numeric(question, answer),
            QuestionKind::MultipleChoice => grade_multiple_choice(question, answer),
            QuestionKind::ShortAnswer => self.grade_short_answer(question, answer).await,
        }
    }

    async fn grade_short_answer(&self, question: &Question, answer: &str) -> GradeOutcome {
        match tokio::time::timeout(self.delegate_timeout, self.delegate.score(question, answer))
            .await
        {
            Ok(Ok(result)) => {
                let score = result.score.clamp(0.0, 1.0);
                GradeOutcome {
                    is_correct: score >= DELEGATE_PASS_THRESHOLD,
                    score,
                    feedback: result.feedback,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "Grading delegate failed for question {}: {:#}",
                    question.id,
                    e
                );
                fallback_contains(question, answer)
            }
            Err(_) => {
                tracing::warn!(
                    "Grading delegate timed out after {:?} for question {}",
                    self.delegate_timeout,
                    question.id
                );
                fallback_contains(question, answer)
            }
        }
    }

    /// Grades every question of an attempt. Each question is isolated: a
    /// delegate failure degrades that one question, never the whole set.
    /// Returns (per-question outcomes, aggregate score, max score).
    pub async fn grade_all(
        &self,
        questions: &[Question],
        answers: &BTreeMap<String, String>,
    ) -> (BTreeMap<String, GradeOutcome>, f64, f64) {
        let graded = join_all(questions.iter().map(|question| async {
            match answers.get(&question.id) {
                Some(answer) => self.grade(question, answer).await,
                None => GradeOutcome::incorrect(),
            }
        }))
        .await;

        let mut results = BTreeMap::new();
        let mut score = 0.0;
        let mut max_score = 0.0;
        for (question, outcome) in questions.iter().zip(graded) {
            max_score += question.points;
            score += outcome.score * question.points;
            results.insert(question.id.clone(), outcome);
        }

        (results, score, max_score)
    }
}

fn grade_numeric(question: &Question, answer: &str) -> GradeOutcome {
    let tolerance = question.tolerance.unwrap_or(DEFAULT_NUMERIC_TOLERANCE);

    let reference = match question.correct_answer.trim().parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("Question {} has a non-numeric reference answer", question.id);
            return GradeOutcome::incorrect();
        }
    };

    // Unparseable input behaves like NaN: every comparison fails.
    let value = answer.trim().parse::<f64>().unwrap_or(f64::NAN);
    let is_correct = (value - reference).abs() <= tolerance;

    GradeOutcome {
        is_correct,
        score: if is_correct { 1.0 } else { 0.0 },
        feedback: None,
    }
}

fn grade_multiple_choice(question: &Question, answer: &str) -> GradeOutcome {
    let is_correct = normalize(answer) == normalize(&question.correct_answer);
    GradeOutcome {
        is_correct,
        score: if is_correct { 1.0 } else { 0.0 },
        feedback: None,
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Local approximation used when the delegate is unavailable: substring
/// containment in either direction. Can produce false positives/negatives.
fn fallback_contains(question: &Question, answer: &str) -> GradeOutcome {
    let given = normalize(answer);
    let reference = normalize(&question.correct_answer);
    let is_correct = !given.is_empty()
        && !reference.is_empty()
        && (given.contains(&reference) || reference.contains(&given));

    GradeOutcome {
        is_correct,
        score: if is_correct { 1.0 } else { 0.0 },
        feedback: Some("Scored by keyword match; the scoring service was unavailable.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(kind: QuestionKind, correct_answer: &str, tolerance: Option<f64>) -> Question {
        Question {
            id: "q-test".to_string(),
            assignment_id: "a-test".to_string(),
            position: 1,
            kind,
            prompt: "What is the answer?".to_string(),
            points: 2.0,
            correct_answer: correct_answer.to_string(),
            tolerance,
            explanation: None,
        }
    }

    struct FixedDelegate(f64, Option<String>);

    #[async_trait]
    impl GradingDelegate for FixedDelegate {
        async fn score(&self, _question: &Question, _answer: &str) -> Result<DelegateScore> {
            Ok(DelegateScore {
                score: self.0,
                feedback: self.1.clone(),
            })
        }
    }

    struct FailingDelegate;

    #[async_trait]
    impl GradingDelegate for FailingDelegate {
        async fn score(&self, _question: &Question, _answer: &str) -> Result<DelegateScore> {
            anyhow::bail!("scoring service unavailable")
        }
    }

    struct HangingDelegate;

    #[async_trait]
    impl GradingDelegate for HangingDelegate {
        async fn score(&self, _question: &Question, _answer: &str) -> Result<DelegateScore> {
            futures::future::pending().await
        }
    }

    fn service(delegate: impl GradingDelegate + 'static) -> GradingService {
        GradingService::new(Arc::new(delegate), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn correct_reference_answer_is_correct_for_all_kinds() {
        let svc = service(FixedDelegate(1.0, None));

        let numeric = question(QuestionKind::Numeric, "42", None);
        assert!(svc.grade(&numeric, "42").await.is_correct);

        let choice = question(QuestionKind::MultipleChoice, "Paris", None);
        assert!(svc.grade(&choice, "Paris").await.is_correct);

        let open = question(QuestionKind::ShortAnswer, "photosynthesis", None);
        assert!(svc.grade(&open, "photosynthesis").await.is_correct);
    }

    #[tokio::test]
    async fn numeric_uses_default_tolerance() {
        let svc = service(FixedDelegate(0.0, None));
        let q = question(QuestionKind::Numeric, "3.14", None);

        assert!(svc.grade(&q, "3.145").await.is_correct);
        assert!(!svc.grade(&q, "3.2").await.is_correct);
    }

    #[tokio::test]
    async fn numeric_boundary_is_inclusive() {
        let svc = service(FixedDelegate(0.0, None));
        let q = question(QuestionKind::Numeric, "10", Some(0.5));

        // exactly reference + tolerance is correct; just past it is not
        assert!(svc.grade(&q, "10.5").await.is_correct);
        assert!(!svc.grade(&q, "10.501").await.is_correct);
    }

    #[tokio::test]
    async fn numeric_rejects_non_numeric_input() {
        let svc = service(FixedDelegate(0.0, None));
        let q = question(QuestionKind::Numeric, "10", Some(0.5));

        let outcome = svc.grade(&q, "about ten").await;
        assert!(!outcome.is_correct);
        assert_eq!(outcome.score, 0.0);
    }

    #[tokio::test]
    async fn multiple_choice_ignores_case_and_whitespace() {
        let svc = service(FixedDelegate(0.0, None));
        let q = question(QuestionKind::MultipleChoice, "Paris", None);

        assert!(svc.grade(&q, " Paris ").await.is_correct);
        assert!(svc.grade(&q, "paris").await.is_correct);
        assert!(!svc.grade(&q, "London").await.is_correct);
    }

    #[tokio::test]
    async fn delegate_score_threshold_is_point_seven() {
        let q = question(QuestionKind::ShortAnswer, "a full explanation", None);

        let passing = service(FixedDelegate(0.7, Some("good".to_string())))
            .grade(&q, "some answer")
            .await;
        assert!(passing.is_correct);
        assert_eq!(passing.score, 0.7);
        assert_eq!(passing.feedback.as_deref(), Some("good"));

        let failing = service(FixedDelegate(0.65, None)).grade(&q, "some answer").await;
        assert!(!failing.is_correct);
        assert_eq!(failing.score, 0.65);
    }

    #[tokio::test]
    async fn delegate_failure_falls_back_to_containment() {
        let svc = service(FailingDelegate);
        let q = question(QuestionKind::ShortAnswer, "plants make food from sunlight", None);

        let contained = svc
            .grade(&q, "Plants make food from sunlight using chlorophyll")
            .await;
        assert!(contained.is_correct);

        let unrelated = svc.grade(&q, "the mitochondria").await;
        assert!(!unrelated.is_correct);
    }

    #[tokio::test]
    async fn delegate_timeout_falls_back_instead_of_hanging() {
        let svc = service(HangingDelegate);
        let q = question(QuestionKind::ShortAnswer, "water cycle", None);

        let outcome = svc.grade(&q, "the water cycle has four stages").await;
        assert!(outcome.is_correct);
    }

    #[tokio::test]
    async fn empty_answer_never_passes_fallback() {
        let svc = service(FailingDelegate);
        let q = question(QuestionKind::ShortAnswer, "anything", None);

        assert!(!svc.grade(&q, "").await.is_correct);
        assert!(!svc.grade(&q, "   ").await.is_correct);
    }

    #[tokio::test]
    async fn grade_all_aggregates_points_and_skips_missing_answers() {
        let svc = service(FixedDelegate(1.0, None));

        let mut q1 = question(QuestionKind::Numeric, "5", None);
        q1.id = "q1".to_string();
        q1.points = 3.0;
        let mut q2 = question(QuestionKind::MultipleChoice, "B", None);
        q2.id = "q2".to_string();
        q2.points = 1.0;

        let mut answers = BTreeMap::new();
        answers.insert("q1".to_string(), "5".to_string());
        // q2 left unanswered

        let (results, score, max_score) = svc.grade_all(&[q1, q2], &answers).await;
        assert_eq!(score, 3.0);
        assert_eq!(max_score, 4.0);
        assert!(results["q1"].is_correct);
        assert!(!results["q2"].is_correct);
    }
}
