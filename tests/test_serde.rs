#![cfg(feature = "serde")]

use mads::{
    eval::{BbOutput, Constraints, EvalPoint, StepType},
    options::{MadsOptions, SearchOptions},
    point::Point,
    stop::{IterationStop, Phase, StopReason, StopReasons},
};

#[test]
fn test_options_from_json() {
    let options = MadsOptions::builder()
        .seed(42)
        .max_iterations(12)
        .search(SearchOptions {
            latin_hypercube: Some((10, 2)),
            ..SearchOptions::default()
        })
        .build()
        .unwrap();

    let json = serde_json::to_string(&options).unwrap();
    let back: MadsOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back, options);
    assert_eq!(back.get_search().latin_hypercube, Some((10, 2)));
}

#[test]
fn test_exported_points_restore_evaluation() {
    let mut p = EvalPoint::new(Point::new(vec![1.5, -2.0]), StepType::Poll);
    p.record(Ok(BbOutput::unconstrained(3.25)), &Constraints::default());

    let json = serde_json::to_string(&vec![p.clone()]).unwrap();
    let back: Vec<EvalPoint> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, vec![p]);
    assert_eq!(back[0].f(), Some(3.25));
}

#[test]
fn test_stop_reasons_keep_their_cause() {
    let mut reasons = StopReasons::new();
    reasons.set(IterationStop::MaxIterReached);

    let json = serde_json::to_string(&reasons).unwrap();
    let back: StopReasons = serde_json::from_str(&json).unwrap();
    assert_eq!(back, reasons);
    assert_eq!(back.final_reason(), StopReason::from(IterationStop::MaxIterReached));
}

#[test]
fn test_unknown_stop_cause_is_rejected() {
    let valid: StopReason = serde_json::from_str(r#"{"phase":"Iteration","code":1}"#).unwrap();
    assert_eq!(valid.phase(), Phase::Iteration);

    let invalid = serde_json::from_str::<StopReason>(r#"{"phase":"Iteration","code":200}"#);
    assert!(invalid.is_err());
    let invalid = serde_json::from_str::<StopReasons>(
        &serde_json::to_string(&StopReasons::new())
            .unwrap()
            .replacen("\"code\":0", "\"code\":99", 1),
    );
    assert!(invalid.is_err());
}
