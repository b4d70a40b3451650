use crate::report::{round_decimals, TestDef, TestResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub const OTHER_SUBJECT: &str = "Other";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub pass: f64,
    pub excellent_min: f64,
    pub good_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pass: 35.0,
            excellent_min: 80.0,
            good_min: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPerformance {
    pub subject_name: String,
    pub total_students: usize,
    pub average_score: f64,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRow {
    pub name: String,
    pub average_score: f64,
    pub pass_rate: f64,
    pub students: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceBand {
    Excellent,
    Good,
    AtRisk,
}

impl PerformanceBand {
    pub fn classify(average: f64, t: &Thresholds) -> Self {
        if average >= t.excellent_min {
            Self::Excellent
        } else if average >= t.good_min {
            Self::Good
        } else {
            Self::AtRisk
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::AtRisk => "At-Risk",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Excellent => "#22c55e",
            Self::Good => "#06b6d4",
            Self::AtRisk => "#ef4444",
        }
    }

    pub fn suggestion(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent performance! Keep up the good work and consider challenging yourself with advanced topics.",
            Self::Good => "Good work! Focus on practicing more problems to improve your understanding.",
            Self::AtRisk => "Needs improvement. Please review the basic concepts and seek help from your teacher.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSlice {
    pub name: &'static str,
    pub value: usize,
    pub color: &'static str,
}

struct SubjectAcc {
    name: String,
    student_ids: HashSet<String>,
    total_score: f64,
    test_count: usize,
    highest: f64,
    lowest: f64,
    passed: usize,
}

pub fn subject_of(test: &TestDef) -> String {
    test.subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(OTHER_SUBJECT)
        .to_string()
}

/// Per-subject performance over the results of the given tests.
///
/// Results whose test is not in `tests` are ignored. Subjects come back in the
/// order their first contributing result was seen.
pub fn aggregate(
    tests: &[TestDef],
    results: &[TestResult],
    pass_threshold: f64,
) -> Vec<SubjectPerformance> {
    let by_id = tests
        .iter()
        .map(|t| (t.id.as_str(), t))
        .collect::<HashMap<_, _>>();

    let mut order: Vec<SubjectAcc> = Vec::new();
    for r in results {
        let Some(test) = by_id.get(r.test_id.as_str()) else {
            continue;
        };
        let subject = subject_of(test);
        let found = order.iter().position(|a| a.name == subject);
        let idx = match found {
            Some(i) => i,
            None => {
                order.push(SubjectAcc {
                    name: subject,
                    student_ids: HashSet::new(),
                    total_score: 0.0,
                    test_count: 0,
                    highest: 0.0,
                    lowest: 101.0,
                    passed: 0,
                });
                order.len() - 1
            }
        };
        let acc = &mut order[idx];
        let score = r.score();
        acc.student_ids.insert(r.student_id.clone());
        acc.total_score += score;
        acc.test_count += 1;
        acc.highest = acc.highest.max(score);
        acc.lowest = acc.lowest.min(score);
        if score >= pass_threshold {
            acc.passed += 1;
        }
    }

    order
        .into_iter()
        .map(|a| {
            let (average, pass_rate) = if a.test_count > 0 {
                (
                    a.total_score / a.test_count as f64,
                    100.0 * a.passed as f64 / a.test_count as f64,
                )
            } else {
                (0.0, 0.0)
            };
            SubjectPerformance {
                subject_name: a.name,
                total_students: a.student_ids.len(),
                average_score: round_decimals(average, 2),
                highest_score: round_decimals(a.highest, 2),
                lowest_score: if a.lowest > 100.0 {
                    0.0
                } else {
                    round_decimals(a.lowest, 2)
                },
                pass_rate: round_decimals(pass_rate, 2),
            }
        })
        .collect()
}

pub fn chart_rows(subjects: &[SubjectPerformance]) -> Vec<ChartRow> {
    subjects
        .iter()
        .map(|s| ChartRow {
            name: s.subject_name.clone(),
            average_score: s.average_score,
            pass_rate: s.pass_rate,
            students: s.total_students,
        })
        .collect()
}

/// Counts subjects per band; empty bands are dropped.
pub fn performance_distribution(
    subjects: &[SubjectPerformance],
    t: &Thresholds,
) -> Vec<DistributionSlice> {
    [
        PerformanceBand::Excellent,
        PerformanceBand::Good,
        PerformanceBand::AtRisk,
    ]
    .into_iter()
    .map(|band| DistributionSlice {
        name: band.label(),
        value: subjects
            .iter()
            .filter(|s| PerformanceBand::classify(s.average_score, t) == band)
            .count(),
        color: band.color(),
    })
    .filter(|slice| slice.value > 0)
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionStatus {
    Completed,
    #[serde(rename = "Not Submitted")]
    NotSubmitted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub score: f64,
    pub status: SubmissionStatus,
    pub percentage: Option<i64>,
}

/// Most recently recorded result of `student_key` on `test_id`.
pub fn latest_result<'a>(
    results: &'a [TestResult],
    test_id: &str,
    student_key: &str,
) -> Option<&'a TestResult> {
    results
        .iter()
        .rev()
        .find(|r| r.test_id == test_id && r.student_id == student_key)
}

/// Raw score is derived from the percentage when the test has a mark total,
/// otherwise it is the number of correct answers.
pub fn submission(test: &TestDef, result: Option<&TestResult>) -> Submission {
    let Some(r) = result else {
        return Submission {
            score: 0.0,
            status: SubmissionStatus::NotSubmitted,
            percentage: None,
        };
    };
    let pct = r.score();
    let score = match test.total_marks {
        Some(total) if total > 0.0 => round_decimals(pct / 100.0 * total, 2),
        _ => f64::from(r.correct_answers),
    };
    Submission {
        score,
        status: SubmissionStatus::Completed,
        percentage: Some(pct.round() as i64),
    }
}

/// Mean percentage over every test of a subject; tests the student never
/// submitted count as 0.
pub fn student_subject_average(
    subject_tests: &[&TestDef],
    results: &[TestResult],
    student_key: &str,
) -> f64 {
    if subject_tests.is_empty() {
        return 0.0;
    }
    let total: f64 = subject_tests
        .iter()
        .map(|t| {
            latest_result(results, &t.id, student_key)
                .map(|r| r.score().round())
                .unwrap_or(0.0)
        })
        .sum();
    total / subject_tests.len() as f64
}
