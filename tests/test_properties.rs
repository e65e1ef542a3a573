use mads::{
    eval::{Barrier, BbOutput, ConstraintKind, Constraints, EvalPoint, HNorm, StepType},
    mesh::Mesh,
    point::{Direction, Point},
};
use proptest::prelude::*;

fn infeasible_point(x: f64, f: f64, h: f64) -> EvalPoint {
    let constraints = Constraints::new(vec![ConstraintKind::Progressive], HNorm::L1);
    let mut p = EvalPoint::new(Point::new(vec![x]), StepType::Poll);
    p.record(Ok(BbOutput::new(f, vec![h])), &constraints);
    p
}

#[derive(Debug, Clone)]
enum MeshUpdate {
    Refine,
    Enlarge(Option<Vec<f64>>),
}

fn mesh_update(n: usize) -> impl Strategy<Value = MeshUpdate> {
    prop_oneof![
        Just(MeshUpdate::Refine),
        Just(MeshUpdate::Enlarge(None)),
        prop::collection::vec(-1.0f64..1.0, n).prop_map(|d| MeshUpdate::Enlarge(Some(d))),
    ]
}

proptest! {
    #[test]
    fn mesh_size_never_exceeds_frame_size(
        initial in prop::collection::vec(0.01f64..50.0, 3),
        updates in prop::collection::vec(mesh_update(3), 0..60),
    ) {
        let mut mesh = Mesh::new(&initial, &[0.0; 3]).unwrap();
        for update in updates {
            match update {
                MeshUpdate::Refine => mesh.refine(),
                MeshUpdate::Enlarge(direction) => {
                    mesh.enlarge(direction.map(Direction::new).as_ref());
                }
            }
            for i in 0..3 {
                prop_assert!(mesh.delta_mesh(i) <= mesh.delta_frame(i));
                prop_assert!(mesh.delta_mesh(i) > 0.0);
            }
        }
    }

    #[test]
    fn projected_points_lie_on_mesh(
        initial in 0.01f64..10.0,
        refines in 0usize..5,
        center in -20.0f64..20.0,
        x in -20.0f64..20.0,
    ) {
        let mut mesh = Mesh::new(&[initial], &[0.0]).unwrap();
        for _ in 0..refines {
            mesh.refine();
        }
        let center = Point::new(vec![center]);
        let projected = mesh.project_on_mesh(&Point::new(vec![x]), &center);
        prop_assert!(mesh.is_on_mesh(&projected, &center));
        prop_assert!((projected[0] - x).abs() <= mesh.delta_mesh(0) / 2.0 + 1e-9);
    }

    #[test]
    fn infeasible_front_has_no_dominated_point(
        points in prop::collection::vec((0.0f64..100.0, 0.01f64..10.0), 1..40),
    ) {
        let mut barrier = Barrier::new(0.0, 1000);
        for (k, (f, h)) in points.into_iter().enumerate() {
            barrier.insert(&infeasible_point(k as f64, f, h));

            let front = barrier.infeasible();
            for a in front {
                for b in front {
                    if std::ptr::eq(a, b) {
                        continue;
                    }
                    let (ha, fa) = (a.h().unwrap(), a.f().unwrap());
                    let (hb, fb) = (b.h().unwrap(), b.f().unwrap());
                    let dominates = ha <= hb && fa <= fb && (ha < hb || fa < fb);
                    prop_assert!(!dominates, "({}, {}) dominates ({}, {})", ha, fa, hb, fb);
                }
            }
            for p in front {
                prop_assert!(p.h().unwrap() <= barrier.h_max());
            }
        }
    }
}
