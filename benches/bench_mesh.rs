use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use mads::{
    mesh::Mesh,
    point::{Bounds, Point},
    poll::{Poll, PollStrategy},
    rng::RandomNumberGenerator,
};

fn bench_mesh_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("mesh_updates");

    for n in [2, 10, 50].iter() {
        let mesh = Mesh::new(&vec![1.0; *n], &vec![0.0; *n]).unwrap();

        group.bench_with_input(BenchmarkId::new("refine_enlarge", n), &mesh, |b, mesh| {
            b.iter(|| {
                let mut mesh = mesh.clone();
                for _ in 0..20 {
                    mesh.refine();
                }
                for _ in 0..20 {
                    mesh.enlarge(None);
                }
                black_box(mesh)
            })
        });

        let center = Point::new(vec![0.3; *n]);
        let x = Point::new((0..*n).map(|i| i as f64 * 0.77).collect());
        group.bench_with_input(BenchmarkId::new("project_on_mesh", n), &mesh, |b, mesh| {
            b.iter(|| mesh.project_on_mesh(black_box(&x), black_box(&center)))
        });
    }

    group.finish();
}

fn bench_poll_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll_generation");
    let mut rng = RandomNumberGenerator::from_seed(0);

    for n in [2, 10, 50].iter() {
        let mut mesh = Mesh::new(&vec![1.0; *n], &vec![0.0; *n]).unwrap();
        mesh.refine();
        let bounds = Bounds::new(vec![-10.0; *n], vec![10.0; *n]).unwrap();
        let center = Point::new(vec![0.0; *n]);

        for strategy in [PollStrategy::Ortho2N, PollStrategy::NPlus1, PollStrategy::Random2N] {
            let mut poll = Poll::new(strategy);
            group.bench_function(BenchmarkId::new(format!("{:?}", strategy), n), |b| {
                b.iter(|| poll.generate_around(black_box(&center), &mesh, &bounds, None, &mut rng))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_mesh_updates, bench_poll_generation);
criterion_main!(benches);
