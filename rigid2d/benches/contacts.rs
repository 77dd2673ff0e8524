use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::dvec2;
use rand::Rng;
use rigid2d::{
    make_ball, make_wall, body::BLOCK_TOP, CollisionAdvance, Gravity, Simulation,
};

fn init_ball_sim(num_balls: usize) -> Simulation {
    let mut sim = Simulation::new();
    sim.add_force_law(Box::new(Gravity::new(9.8)));
    let mut floor = make_wall("floor", 400.0, 1.0, BLOCK_TOP);
    floor.set_position(dvec2(0.0, -0.5), 0.0);
    sim.add_body(floor);
    let mut rng = rand::thread_rng();
    for k in 0..num_balls {
        let mut ball = make_ball(format!("ball{k}"), 0.5);
        ball.set_position(
            dvec2(rng.gen_range(-50.0..50.0), rng.gen_range(1.0..20.0)),
            0.0,
        );
        ball.set_velocity(
            dvec2(rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..0.0)),
            0.0,
        );
        sim.add_body(ball);
    }
    sim
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("falling_balls");
    for num_balls in [8, 16, 32, 64] {
        let initial_sim = init_ball_sim(num_balls);
        group.bench_with_input(
            BenchmarkId::new("advance", num_balls),
            &num_balls,
            |b, _num_balls| {
                b.iter(|| {
                    let mut sim = initial_sim.clone();
                    let mut advance = CollisionAdvance::new(0.01);
                    advance
                        .advance(&mut sim, black_box(0.1))
                        .expect("advance succeeds");
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
