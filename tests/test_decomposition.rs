use mads::{
    algo::{Algorithm, AlgorithmKind, Runnable},
    eval::BbOutput,
    evaluator::{EvaluationError, Evaluator, FnEvaluator},
    options::{DecompositionOptions, EvaluatorOptions, MadsOptions, Problem},
    point::Point,
    stop::{DecompositionStop, EvalGlobalStop, IterationStop, Phase},
};
use std::sync::Arc;

fn separable() -> Arc<dyn Evaluator> {
    Arc::new(FnEvaluator::new(|x: &Point| {
        Ok::<_, EvaluationError>(BbOutput::unconstrained(
            x.coords().iter().map(|c| (c - 1.0).abs()).sum(),
        ))
    }))
}

fn problem(n: usize) -> Problem {
    Problem::builder()
        .x0(Point::new(vec![-2.0; n]))
        .bounds(vec![-4.0; n], vec![4.0; n])
        .build()
        .unwrap()
}

fn build(kind: AlgorithmKind, n: usize, options: MadsOptions) -> Algorithm {
    kind.build(problem(n), options, separable()).unwrap()
}

#[test]
fn test_every_family_improves_on_start() {
    let n = 6;
    let start = 3.0 * n as f64;
    for kind in AlgorithmKind::ALL {
        let options = MadsOptions::builder()
            .seed(11)
            .max_iterations(15)
            .decomposition(DecompositionOptions {
                subproblem_dimension: 2,
                subproblem_max_iterations: Some(5),
                ..Default::default()
            })
            .build()
            .unwrap();
        let mut algorithm = build(kind, n, options);
        assert_eq!(algorithm.kind(), kind);

        let result = algorithm.run().unwrap();
        let best = result.best_feasible.as_ref().unwrap().f().unwrap();
        assert!(best < start, "{}: best = {}", kind, best);
        assert!(!result.is_error(), "{}: {}", kind, result.final_reason);
    }
}

#[test]
fn test_ssd_stops_on_iteration_limit() {
    let options = MadsOptions::builder()
        .seed(3)
        .max_iterations(4)
        .decomposition(DecompositionOptions {
            subproblem_dimension: 3,
            subproblem_max_iterations: Some(2),
            ..Default::default()
        })
        .build()
        .unwrap();
    let result = build(AlgorithmKind::SsdMads, 6, options).run().unwrap();

    assert_eq!(result.iterations, 4);
    assert!(result.final_reason.is(IterationStop::MaxIterReached));
    assert!(result.stop_reasons.get(Phase::Decomposition).is_started());
}

#[test]
fn test_subproblem_budget_bounds_each_subproblem() {
    let options = MadsOptions::builder()
        .seed(8)
        .max_iterations(3)
        .decomposition(DecompositionOptions {
            subproblem_dimension: 2,
            subproblem_max_bb_eval: Some(5),
            subproblem_max_iterations: None,
            opportunistic: false,
            ..Default::default()
        })
        .evaluator(EvaluatorOptions::builder().workers(1).build().unwrap())
        .build()
        .unwrap();
    let result = build(AlgorithmKind::SsdMads, 4, options).run().unwrap();

    // The starting point, then at most 3 iterations of 2 subproblems of 5.
    assert!(result.bb_evals <= 1 + 3 * 2 * 5, "bb_evals = {}", result.bb_evals);
    assert!(result.bb_evals > 1);
}

#[test]
fn test_psd_shares_global_budget() {
    let options = MadsOptions::builder()
        .seed(21)
        .max_iterations(500)
        .decomposition(DecompositionOptions {
            subproblem_dimension: 2,
            subproblems: Some(3),
            ..Default::default()
        })
        .evaluator(
            EvaluatorOptions::builder()
                .workers(3)
                .max_bb_eval(60)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let result = build(AlgorithmKind::PsdMads, 6, options).run().unwrap();

    assert!(result.bb_evals <= 60);
    assert!(result.final_reason.is(EvalGlobalStop::MaxBbEvalReached));
    assert!(!result.stop_reasons.get(Phase::Decomposition).is(DecompositionStop::SubproblemFail));
}

#[test]
fn test_invalid_start_is_reported_by_decomposition() {
    let problem = Problem::builder()
        .x0(Point::new(vec![9.0, 0.0]))
        .bounds(vec![-1.0; 2], vec![1.0; 2])
        .build()
        .unwrap();
    let options = MadsOptions::builder().max_iterations(2).build().unwrap();
    let mut algorithm = AlgorithmKind::SsdMads
        .build(problem, options, separable())
        .unwrap();

    assert!(algorithm.run().is_err());
}
