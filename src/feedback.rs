//! Text for the feedback panel, debug readout and end-of-session report.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::protocol::{FeedbackPayload, ReportPayload};

const GOOD_REP: &str = "GOOD_REP";

const FEEDBACK_MESSAGES: &[(&str, &str)] = &[
    (GOOD_REP, "Great rep!"),
    ("BEND_FORWARD", "Don't lean forward"),
    ("LOWER_YOUR_HIPS", "Squat lower"),
];

const ERROR_DESCRIPTIONS: &[(&str, &str)] = &[
    ("BEND_FORWARD", "Torso leaning forward"),
    ("BEND_BACKWARDS", "Excessive backward lean"),
    ("LOWER_YOUR_HIPS", "Insufficient depth"),
    ("SQUAT_TOO_DEEP", "Squat too deep"),
    ("KNEE_OVER_TOE", "Knees past toes"),
];

fn lookup<'a>(table: &[(&str, &'a str)], code: &'a str) -> &'a str {
    table
        .iter()
        .find(|(key, _)| *key == code)
        .map_or(code, |(_, text)| *text)
}

/// Live feedback message; unknown codes are shown verbatim.
pub fn feedback_message(code: &str) -> &str {
    lookup(FEEDBACK_MESSAGES, code)
}

/// Report description of an error code; unknown codes are shown verbatim.
pub fn error_description(code: &str) -> &str {
    lookup(ERROR_DESCRIPTIONS, code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Bad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackLine {
    pub code: String,
    pub message: String,
    pub tone: Tone,
}

/// Most recent feedback code of the payload, if any.
pub fn latest_feedback(payload: &FeedbackPayload) -> Option<FeedbackLine> {
    let code = payload.latest_code()?;
    Some(FeedbackLine {
        code: code.to_string(),
        message: feedback_message(code).to_string(),
        tone: if code == GOOD_REP { Tone::Good } else { Tone::Bad },
    })
}

fn metric(metrics: Option<&BTreeMap<String, f64>>, key: &str, decimals: usize) -> String {
    match metrics.and_then(|m| m.get(key)) {
        Some(v) => format!("{v:.decimals$}"),
        None => "N/A".to_string(),
    }
}

/// One-line debug readout: phase, joint angles and knee offset.
pub fn debug_readout(payload: &FeedbackPayload) -> String {
    let metrics = payload.debug_metrics.as_ref();
    format!(
        "state={} knee={}° hip={}° knee_offset={} threshold={}",
        if payload.state.is_empty() { "N/A" } else { payload.state.as_str() },
        metric(metrics, "knee_angle", 1),
        metric(metrics, "hip_angle", 1),
        metric(metrics, "knee_foot_diff", 3),
        metric(metrics, "knee_threshold", 3),
    )
}

/// Multi-line workout summary.
pub fn report_summary(report: &ReportPayload) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Workout report");
    let _ = writeln!(out, "  total reps: {}", report.total_reps);
    let _ = writeln!(out, "  good reps:  {}", report.good_reps);
    if !report.error_counts.is_empty() {
        let _ = writeln!(out, "  errors:");
        for (code, count) in &report.error_counts {
            let _ = writeln!(out, "    {:<24} {count}", error_description(code));
        }
    }
    out
}

/// Window title: rep counter plus the latest message.
pub fn status_title(feedback: Option<&FeedbackPayload>, connected: bool) -> String {
    let link = if connected { "online" } else { "offline" };
    let Some(payload) = feedback else {
        return format!("KinetiCoach [{link}]");
    };
    match latest_feedback(payload) {
        Some(line) => format!("KinetiCoach [{link}] reps {} | {}", payload.rep_count, line.message),
        None => format!("KinetiCoach [{link}] reps {}", payload.rep_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(codes: &[&str]) -> FeedbackPayload {
        FeedbackPayload {
            rep_count: 4,
            feedback_codes: codes.iter().map(|c| c.to_string()).collect(),
            state: "UP".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_latest_feedback_classification() {
        let good = latest_feedback(&payload(&["BEND_FORWARD", "GOOD_REP"])).unwrap();
        assert_eq!(good.tone, Tone::Good);
        assert_eq!(good.message, "Great rep!");

        let bad = latest_feedback(&payload(&["LOWER_YOUR_HIPS"])).unwrap();
        assert_eq!(bad.tone, Tone::Bad);
        assert_eq!(bad.message, "Squat lower");

        assert!(latest_feedback(&payload(&[])).is_none());
    }

    #[test]
    fn test_unknown_codes_pass_through() {
        assert_eq!(feedback_message("HEELS_UP"), "HEELS_UP");
        assert_eq!(error_description("HEELS_UP"), "HEELS_UP");
        assert_eq!(error_description("KNEE_OVER_TOE"), "Knees past toes");
    }

    #[test]
    fn test_debug_readout_precision() {
        let mut p = payload(&[]);
        let mut metrics = BTreeMap::new();
        metrics.insert("knee_angle".to_string(), 92.46);
        metrics.insert("knee_foot_diff".to_string(), 0.01234);
        p.debug_metrics = Some(metrics);
        assert_eq!(
            debug_readout(&p),
            "state=UP knee=92.5° hip=N/A° knee_offset=0.012 threshold=N/A"
        );
    }

    #[test]
    fn test_report_summary_lists_errors() {
        let mut report = ReportPayload {
            total_reps: 15,
            good_reps: 10,
            ..Default::default()
        };
        report.error_counts.insert("BEND_FORWARD".into(), 3);
        let text = report_summary(&report);
        assert!(text.contains("total reps: 15"));
        assert!(text.contains("good reps:  10"));
        assert!(text.contains("Torso leaning forward"));
        assert!(text.contains(" 3"));
    }

    #[test]
    fn test_status_title() {
        assert_eq!(status_title(None, false), "KinetiCoach [offline]");
        assert_eq!(
            status_title(Some(&payload(&["GOOD_REP"])), true),
            "KinetiCoach [online] reps 4 | Great rep!"
        );
    }
}
