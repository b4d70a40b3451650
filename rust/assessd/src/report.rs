use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const UNKNOWN_SUBJECT: &str = "Unknown";

/// One student's recorded attempt at one test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub percentage_score: Option<f64>,
    #[serde(default)]
    pub correct_answers: u32,
    #[serde(default)]
    pub incorrect_answers: u32,
    #[serde(default)]
    pub skipped_questions: u32,
    #[serde(default)]
    pub answered_questions: u32,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
}

impl TestResult {
    pub fn score(&self) -> f64 {
        self.percentage_score.unwrap_or(0.0)
    }

    pub fn subject_key(&self) -> String {
        self.subject_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SUBJECT)
            .to_string()
    }

    fn end_millis(&self) -> i64 {
        self.end_time.map(|t| t.timestamp_millis()).unwrap_or(0)
    }
}

/// Classification tags attached to a test definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMeta {
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub bloom: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDef {
    pub id: String,
    pub title: String,
    pub subject: Option<String>,
    pub concept: Option<String>,
    pub difficulty: Option<String>,
    pub bloom: Option<String>,
    pub created_by: Option<String>,
    pub class_id: Option<String>,
    pub total_marks: Option<f64>,
}

/// Label-keyed table that remembers the order labels were first seen in.
///
/// Rankings over a table (best/weakest subject, best/worst difficulty) break
/// ties by that order, so a plain hash map is not enough here.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for LabelTable<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> LabelTable<V> {
    #[cfg(test)]
    pub fn get(&self, label: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(k, _)| k == label)
            .map(|(_, v)| v)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn slot(&mut self, label: &str, init: impl FnOnce() -> V) -> &mut V {
        let found = self.entries.iter().position(|(k, _)| k == label);
        let idx = match found {
            Some(i) => i,
            None => {
                self.entries.push((label.to_string(), init()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    fn map_values<U>(self, mut f: impl FnMut(V) -> U) -> LabelTable<U> {
        LabelTable {
            entries: self.entries.into_iter().map(|(k, v)| (k, f(v))).collect(),
        }
    }

    /// Labels ordered by `key` descending; equal keys keep first-seen order.
    fn ranked_desc(&self, key: impl Fn(&V) -> f64) -> Vec<(&str, &V)> {
        let mut ranked = self.iter().collect::<Vec<_>>();
        ranked.sort_by(|a, b| key(b.1).partial_cmp(&key(a.1)).unwrap_or(Ordering::Equal));
        ranked
    }
}

impl<V: Serialize> Serialize for LabelTable<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub avg: f64,
    pub correct: u64,
    pub incorrect: u64,
    pub skipped: u64,
    pub tests: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelStats {
    pub count: usize,
    pub avg_acc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_tests: usize,
    pub overall_avg: f64,
    pub grade: String,
    pub subjects: LabelTable<SubjectStats>,
    pub best_subject: String,
    pub weakest_subject: String,
    pub concept: LabelTable<LabelStats>,
    pub difficulty: LabelTable<LabelStats>,
    pub bloom: LabelTable<LabelStats>,
    pub avg_time_per_question: f64,
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateStyle {
    #[default]
    Iso,
    Us,
    Eu,
}

impl DateStyle {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iso" => Some(Self::Iso),
            "us" => Some(Self::Us),
            "eu" => Some(Self::Eu),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Us => "us",
            Self::Eu => "eu",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Self::Iso => "%Y-%m-%d",
            Self::Us => "%-m/%-d/%Y",
            Self::Eu => "%d/%m/%Y",
        }
    }

    pub fn format(self, t: &DateTime<Utc>) -> String {
        t.format(self.pattern()).to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions {
    pub date_style: DateStyle,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Half-away-from-zero rounding for display values.
pub fn round_decimals(x: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (x * f).round() / f
}

#[cfg(test)]
pub fn compute_report(results: &[TestResult], meta: &HashMap<String, TestMeta>) -> ReportSummary {
    compute_report_with(results, meta, &ReportOptions::default())
}

pub fn compute_report_with(
    results: &[TestResult],
    meta: &HashMap<String, TestMeta>,
    opts: &ReportOptions,
) -> ReportSummary {
    if results.is_empty() {
        return ReportSummary::default();
    }

    let scores = results.iter().map(TestResult::score).collect::<Vec<_>>();
    let overall_avg = mean(&scores);
    // Last in input order, not latest by endTime.
    let grade = results
        .last()
        .and_then(|r| r.grade.clone())
        .unwrap_or_default();

    let subjects = subject_breakdown(results);
    let ranked = subjects.ranked_desc(|s| s.avg);
    let best_subject = ranked.first().map(|(k, _)| k.to_string()).unwrap_or_default();
    let weakest_subject = ranked.last().map(|(k, _)| k.to_string()).unwrap_or_default();

    let concept = label_breakdown(results, meta, |m| m.concept.as_deref());
    let difficulty = label_breakdown(results, meta, |m| m.difficulty.as_deref());
    let bloom = label_breakdown(results, meta, |m| m.bloom.as_deref());

    let per_question = results
        .iter()
        .filter_map(|r| match r.duration {
            Some(d) if d > 0.0 && r.answered_questions > 0 => {
                Some(d / r.answered_questions as f64)
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    let avg_time_per_question = mean(&per_question);

    let mut ordered = results.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|r| r.end_millis());
    let trend = ordered
        .into_iter()
        .map(|r| TrendPoint {
            date: r
                .end_time
                .as_ref()
                .map(|t| opts.date_style.format(t))
                .unwrap_or_default(),
            percentage: r.score(),
        })
        .collect();

    ReportSummary {
        total_tests: results.len(),
        overall_avg,
        grade,
        subjects,
        best_subject,
        weakest_subject,
        concept,
        difficulty,
        bloom,
        avg_time_per_question,
        trend,
    }
}

#[derive(Default)]
struct SubjectAcc {
    sum_perc: f64,
    correct: u64,
    incorrect: u64,
    skipped: u64,
    tests: usize,
}

fn subject_breakdown(results: &[TestResult]) -> LabelTable<SubjectStats> {
    let mut acc: LabelTable<SubjectAcc> = LabelTable::default();
    for r in results {
        let s = acc.slot(&r.subject_key(), SubjectAcc::default);
        s.sum_perc += r.score();
        s.correct += u64::from(r.correct_answers);
        s.incorrect += u64::from(r.incorrect_answers);
        s.skipped += u64::from(r.skipped_questions);
        s.tests += 1;
    }
    acc.map_values(|s| SubjectStats {
        avg: if s.tests > 0 {
            s.sum_perc / s.tests as f64
        } else {
            0.0
        },
        correct: s.correct,
        incorrect: s.incorrect,
        skipped: s.skipped,
        tests: s.tests,
    })
}

fn label_breakdown<F>(
    results: &[TestResult],
    meta: &HashMap<String, TestMeta>,
    field: F,
) -> LabelTable<LabelStats>
where
    F: Fn(&TestMeta) -> Option<&str>,
{
    let mut acc: LabelTable<Vec<f64>> = LabelTable::default();
    for r in results {
        let Some(label) = meta
            .get(&r.test_id)
            .and_then(|m| field(m))
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            continue;
        };
        acc.slot(label, Vec::new).push(r.score());
    }
    acc.map_values(|scores| LabelStats {
        count: scores.len(),
        avg_acc: mean(&scores),
    })
}

/// Short guidance notes derived from a computed summary.
pub fn recommendations(summary: &ReportSummary) -> Vec<String> {
    let mut recs = Vec::new();
    if summary.total_tests == 0 {
        return recs;
    }
    if !summary.best_subject.is_empty() {
        recs.push(format!(
            "Strength in {}. Continue practicing at higher difficulty.",
            summary.best_subject
        ));
    }
    if !summary.weakest_subject.is_empty() {
        recs.push(format!(
            "Focus on {}. Review foundational concepts and attempt easier practice sets.",
            summary.weakest_subject
        ));
    }

    let ranked = summary.difficulty.ranked_desc(|d| d.avg_acc);
    if let (Some((top, top_stats)), Some((bottom, bottom_stats))) = (ranked.first(), ranked.last())
    {
        recs.push(format!(
            "Performs best on {} difficulty (avg {:.1}%).",
            top,
            round_decimals(top_stats.avg_acc, 1)
        ));
        recs.push(format!(
            "Struggles on {} difficulty (avg {:.1}%).",
            bottom,
            round_decimals(bottom_stats.avg_acc, 1)
        ));
    }

    if summary.avg_time_per_question > 0.0 {
        recs.push(format!(
            "Average {:.1}s per question. Aim for steady pace with accuracy.",
            round_decimals(summary.avg_time_per_question, 1)
        ));
    }
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(id: &str, subject: Option<&str>, score: Option<f64>) -> TestResult {
        TestResult {
            id: id.to_string(),
            test_id: format!("t-{}", id),
            student_id: "stu-1".to_string(),
            subject_name: subject.map(|s| s.to_string()),
            percentage_score: score,
            ..Default::default()
        }
    }

    fn meta(concept: Option<&str>, difficulty: Option<&str>, bloom: Option<&str>) -> TestMeta {
        TestMeta {
            concept: concept.map(|s| s.to_string()),
            difficulty: difficulty.map(|s| s.to_string()),
            bloom: bloom.map(|s| s.to_string()),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().expect("valid date")
    }

    #[test]
    fn empty_input_yields_zeroed_summary() {
        let summary = compute_report(&[], &HashMap::new());
        assert_eq!(summary, ReportSummary::default());
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.overall_avg, 0.0);
        assert_eq!(summary.grade, "");
        assert!(summary.subjects.is_empty());
        assert_eq!(summary.best_subject, "");
        assert_eq!(summary.weakest_subject, "");
        assert!(summary.trend.is_empty());
        assert!(recommendations(&summary).is_empty());

        let v = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(v["subjects"], serde_json::json!({}));
        assert_eq!(v["avgTimePerQuestion"], serde_json::json!(0.0));
    }

    #[test]
    fn math_science_example() {
        let results = vec![
            result("1", Some("Math"), Some(80.0)),
            result("2", Some("Math"), Some(60.0)),
            result("3", Some("Science"), Some(90.0)),
        ];
        let s = compute_report(&results, &HashMap::new());
        assert_eq!(s.total_tests, 3);
        assert_eq!(s.subjects.get("Math").map(|m| m.avg), Some(70.0));
        assert_eq!(s.subjects.get("Science").map(|m| m.avg), Some(90.0));
        assert_eq!(s.subjects.get("Math").map(|m| m.tests), Some(2));
        assert_eq!(s.best_subject, "Science");
        assert_eq!(s.weakest_subject, "Math");
        assert_eq!(round_decimals(s.overall_avg, 2), 76.67);
    }

    #[test]
    fn missing_score_counts_as_zero() {
        let results = vec![result("1", Some("Art"), None), result("2", Some("Art"), Some(50.0))];
        let s = compute_report(&results, &HashMap::new());
        assert!((s.overall_avg - 25.0).abs() < 1e-9);
        assert_eq!(s.trend.iter().map(|p| p.percentage).collect::<Vec<_>>(), vec![0.0, 50.0]);
    }

    #[test]
    fn grade_comes_from_last_result_in_input_order() {
        let mut early = result("1", Some("Math"), Some(70.0));
        early.grade = Some("B".into());
        early.end_time = Some(at(2025, 3, 1));
        let mut late = result("2", Some("Math"), Some(90.0));
        late.grade = Some("A".into());
        late.end_time = Some(at(2025, 6, 1));

        // Time order is late-last, but the input order puts `early` last.
        let s = compute_report(&[late, early], &HashMap::new());
        assert_eq!(s.grade, "B");
    }

    #[test]
    fn blank_subjects_normalize_to_unknown() {
        let results = vec![
            result("1", None, Some(10.0)),
            result("2", Some("   "), Some(20.0)),
            result("3", Some("  Physics "), Some(30.0)),
        ];
        let s = compute_report(&results, &HashMap::new());
        assert_eq!(s.subjects.len(), 2);
        assert_eq!(s.subjects.get(UNKNOWN_SUBJECT).map(|u| u.tests), Some(2));
        assert_eq!(s.subjects.get("Physics").map(|u| u.tests), Some(1));
        let total: usize = s.subjects.iter().map(|(_, v)| v.tests).sum();
        assert_eq!(total, results.len());
    }

    #[test]
    fn subject_counts_are_summed() {
        let mut a = result("1", Some("Math"), Some(50.0));
        a.correct_answers = 5;
        a.incorrect_answers = 3;
        a.skipped_questions = 2;
        let mut b = result("2", Some("Math"), Some(70.0));
        b.correct_answers = 7;
        b.incorrect_answers = 1;
        b.skipped_questions = 0;
        let s = compute_report(&[a, b], &HashMap::new());
        let math = s.subjects.get("Math").copied().expect("math");
        assert_eq!((math.correct, math.incorrect, math.skipped, math.tests), (12, 4, 2, 2));
    }

    #[test]
    fn tied_subjects_rank_by_first_occurrence() {
        let results = vec![
            result("1", Some("History"), Some(60.0)),
            result("2", Some("Art"), Some(60.0)),
            result("3", Some("Music"), Some(60.0)),
        ];
        let s = compute_report(&results, &HashMap::new());
        assert_eq!(s.best_subject, "History");
        assert_eq!(s.weakest_subject, "Music");
    }

    #[test]
    fn single_subject_is_both_best_and_weakest() {
        let s = compute_report(&[result("1", Some("Math"), Some(40.0))], &HashMap::new());
        assert_eq!(s.best_subject, "Math");
        assert_eq!(s.weakest_subject, "Math");
    }

    #[test]
    fn breakdowns_only_use_present_metadata() {
        let results = vec![
            result("1", Some("Math"), Some(80.0)),
            result("2", Some("Math"), Some(40.0)),
            result("3", Some("Math"), Some(100.0)),
            result("4", Some("Math"), Some(20.0)),
        ];
        let mut meta_map = HashMap::new();
        meta_map.insert("t-1".to_string(), meta(Some(" Fractions "), Some("Easy"), None));
        meta_map.insert("t-2".to_string(), meta(Some("Fractions"), Some("Hard"), Some("  ")));
        meta_map.insert("t-3".to_string(), meta(None, None, Some("Apply")));
        // t-4 has no metadata at all.

        let s = compute_report(&results, &meta_map);
        assert_eq!(s.concept.len(), 1);
        let fractions = s.concept.get("Fractions").copied().expect("fractions");
        assert_eq!(fractions.count, 2);
        assert!((fractions.avg_acc - 60.0).abs() < 1e-9);

        assert_eq!(s.difficulty.get("Easy").map(|d| d.count), Some(1));
        assert_eq!(s.difficulty.get("Hard").map(|d| d.avg_acc), Some(40.0));
        assert!(s.difficulty.get("Unknown").is_none());

        assert_eq!(s.bloom.len(), 1);
        assert_eq!(s.bloom.get("Apply").map(|b| b.avg_acc), Some(100.0));
    }

    #[test]
    fn avg_time_skips_results_without_duration_or_answers() {
        let mut a = result("1", Some("Math"), Some(50.0));
        a.duration = Some(60.0);
        a.answered_questions = 10;
        let mut b = result("2", Some("Math"), Some(50.0));
        b.duration = Some(0.0);
        b.answered_questions = 5;
        let mut c = result("3", Some("Math"), Some(50.0));
        c.duration = Some(90.0);
        c.answered_questions = 0;
        let d = result("4", Some("Math"), Some(50.0));

        let s = compute_report(&[a, b, c, d], &HashMap::new());
        assert!((s.avg_time_per_question - 6.0).abs() < 1e-9);
    }

    #[test]
    fn trend_is_time_ordered_with_undated_first() {
        let mut june = result("1", Some("Math"), Some(90.0));
        june.end_time = Some(at(2025, 6, 1));
        let undated = result("2", Some("Math"), Some(10.0));
        let mut march = result("3", Some("Math"), Some(50.0));
        march.end_time = Some(at(2025, 3, 9));
        let undated_too = result("4", Some("Math"), Some(20.0));

        let s = compute_report(&[june, undated, march, undated_too], &HashMap::new());
        let pts = s
            .trend
            .iter()
            .map(|p| (p.date.as_str(), p.percentage))
            .collect::<Vec<_>>();
        assert_eq!(
            pts,
            vec![("", 10.0), ("", 20.0), ("2025-03-09", 50.0), ("2025-06-01", 90.0)]
        );
    }

    #[test]
    fn trend_dates_follow_style() {
        let mut r = result("1", Some("Math"), Some(90.0));
        r.end_time = Some(at(2025, 3, 9));
        let us = compute_report_with(
            &[r.clone()],
            &HashMap::new(),
            &ReportOptions {
                date_style: DateStyle::Us,
            },
        );
        assert_eq!(us.trend[0].date, "3/9/2025");
        let eu = compute_report_with(
            &[r],
            &HashMap::new(),
            &ReportOptions {
                date_style: DateStyle::Eu,
            },
        );
        assert_eq!(eu.trend[0].date, "09/03/2025");
    }

    #[test]
    fn same_inputs_serialize_identically() {
        let results = vec![
            result("1", Some("Math"), Some(80.0)),
            result("2", Some("Science"), Some(65.5)),
        ];
        let mut meta_map = HashMap::new();
        meta_map.insert("t-1".to_string(), meta(Some("Algebra"), Some("Medium"), Some("Apply")));
        meta_map.insert("t-2".to_string(), meta(Some("Cells"), Some("Easy"), Some("Recall")));
        let a = serde_json::to_string(&compute_report(&results, &meta_map)).expect("json");
        let b = serde_json::to_string(&compute_report(&results, &meta_map)).expect("json");
        assert_eq!(a, b);
    }

    #[test]
    fn recommendations_cover_subjects_difficulty_and_pace() {
        let mut a = result("1", Some("Math"), Some(80.0));
        a.duration = Some(125.0);
        a.answered_questions = 10;
        let b = result("2", Some("Science"), Some(40.0));
        let mut meta_map = HashMap::new();
        meta_map.insert("t-1".to_string(), meta(None, Some("Easy"), None));
        meta_map.insert("t-2".to_string(), meta(None, Some("Hard"), None));

        let s = compute_report(&[a, b], &meta_map);
        let recs = recommendations(&s);
        assert_eq!(
            recs,
            vec![
                "Strength in Math. Continue practicing at higher difficulty.".to_string(),
                "Focus on Science. Review foundational concepts and attempt easier practice sets."
                    .to_string(),
                "Performs best on Easy difficulty (avg 80.0%).".to_string(),
                "Struggles on Hard difficulty (avg 40.0%).".to_string(),
                "Average 12.5s per question. Aim for steady pace with accuracy.".to_string(),
            ]
        );
    }

    #[test]
    fn recommendation_figures_round_half_up() {
        let mut a = result("1", Some("Math"), Some(87.5));
        a.duration = Some(49.0);
        a.answered_questions = 4;
        let b = result("2", Some("Math"), Some(87.0));
        let mut meta_map = HashMap::new();
        meta_map.insert("t-1".to_string(), meta(None, Some("Hard"), None));
        meta_map.insert("t-2".to_string(), meta(None, Some("Hard"), None));

        let recs = recommendations(&compute_report(&[a, b], &meta_map));
        assert_eq!(recs[2], "Performs best on Hard difficulty (avg 87.3%).");
        assert_eq!(recs[3], "Struggles on Hard difficulty (avg 87.3%).");
        assert_eq!(
            recs[4],
            "Average 12.3s per question. Aim for steady pace with accuracy."
        );
    }

    #[test]
    fn single_difficulty_level_is_reported_twice() {
        let results = vec![result("1", Some("Math"), Some(75.0))];
        let mut meta_map = HashMap::new();
        meta_map.insert("t-1".to_string(), meta(None, Some("Medium"), None));
        let recs = recommendations(&compute_report(&results, &meta_map));
        assert_eq!(recs.len(), 4);
        assert_eq!(recs[2], "Performs best on Medium difficulty (avg 75.0%).");
        assert_eq!(recs[3], "Struggles on Medium difficulty (avg 75.0%).");
    }

    #[test]
    fn no_difficulty_means_no_difficulty_notes() {
        let recs = recommendations(&compute_report(
            &[result("1", Some("Math"), Some(75.0))],
            &HashMap::new(),
        ));
        assert_eq!(recs.len(), 2);
    }
}
