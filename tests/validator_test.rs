//! Numeric validator scenarios: hallucination detection against real
//! tool output shapes.

use wellness_memory_core::config::ValidatorConfig;
use wellness_memory_core::validation::NumericValidator;

fn validator() -> NumericValidator {
    NumericValidator::new(ValidatorConfig::default())
}

#[test]
fn hallucinated_heart_rate_is_caught() {
    let outputs = vec![serde_json::json!({"average": "72.5 bpm"})];

    let report = validator().validate("Your average heart rate was 150 bpm.", &outputs);

    assert!(!report.valid);
    assert_eq!(report.score, 0.0);
    assert_eq!(report.unverified.len(), 1);
    assert_eq!(report.unverified[0].value, 150.0);
    assert_eq!(report.unverified[0].unit.as_deref(), Some("bpm"));
}

#[test]
fn in_tolerance_answer_is_valid() {
    let outputs = vec![serde_json::json!({"average": "72.5 bpm"})];

    let report = validator().validate("Your average heart rate was 72 bpm.", &outputs);

    assert!(report.valid);
    assert_eq!(report.score, 1.0);
    assert_eq!(report.verified.len(), 1);
}

#[test]
fn multi_tool_response_verifies_across_outputs() {
    let outputs = vec![
        serde_json::json!({"total_workouts": 12, "total_minutes": 540}),
        serde_json::json!({"average_hr": "141 bpm"}),
    ];

    let response = "You completed 12 workouts totalling 540 minutes, \
                    averaging 141 bpm.";
    let report = validator().validate(response, &outputs);

    assert!(report.valid);
    assert_eq!(report.score, 1.0);
    assert_eq!(report.verified.len(), 3);
}

#[test]
fn partially_wrong_response_scores_in_between() {
    let outputs = vec![serde_json::json!({"total_workouts": 12, "calories": "4300 kcal"})];

    // 12 is right, 9000 kcal is invented
    let report = validator().validate(
        "You logged 12 workouts and burned 9000 kcal.",
        &outputs,
    );

    assert!(!report.valid);
    assert_eq!(report.score, 0.5);
    assert_eq!(report.verified.len(), 1);
    assert_eq!(report.unverified.len(), 1);
}

#[test]
fn tolerance_boundary_follows_the_relative_rule() {
    let outputs = vec![serde_json::json!({"weight": 200})];
    let v = validator();

    // 10% of 200 = 20: 220 passes, 221 does not
    assert!(v.validate("you weigh about 220 lbs", &outputs).valid);
    assert!(!v.validate("you weigh about 221 lbs", &outputs).valid);
}
