use macroquad::{time::get_frame_time, window::next_frame};
use rigid2d::{
    scenarios::{Pile, Scenario},
    CollisionAdvance, Simulation,
};

mod shared;

pub struct GameState {
    sim: Simulation,
    advance: CollisionAdvance,
}

impl GameState {
    fn new() -> GameState {
        GameState {
            sim: Pile::default().create(),
            advance: CollisionAdvance::new(0.01),
        }
    }

    fn update(&mut self) {
        let dt = (get_frame_time() as f64).min(0.05);
        if let Err(e) = self.advance.advance(&mut self.sim, dt) {
            tracing::error!("advance failed: {e}");
        }
    }

    fn render(&self) {
        use shared::draw::Draw;
        self.sim.draw();
    }
}

#[macroquad::main("rigid2d")]
async fn main() {
    shared::setup(16.0, 9.0);
    let mut state = GameState::new();

    loop {
        state.update();
        state.render();
        next_frame().await;
    }
}
