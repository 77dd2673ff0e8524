use glam::DVec2;
use macroquad::color::{Color, RED, WHITE};

use rigid2d::{Contact, EdgeShape, Polygon, Simulation};

pub fn draw_vec_line(from: DVec2, to: DVec2, thickness: f32, color: Color) {
    use macroquad::shapes::draw_line;
    let from = from.as_vec2();
    let to = to.as_vec2();
    draw_line(from.x, from.y, to.x, to.y, thickness, color)
}

pub trait Draw {
    fn draw(&self);
}

impl Draw for Polygon {
    fn draw(&self) {
        for e in self.edges() {
            match e.shape {
                EdgeShape::Straight { .. } => {
                    draw_vec_line(
                        self.body_to_world(e.p1),
                        self.body_to_world(e.p2),
                        0.03,
                        WHITE,
                    );
                }
                EdgeShape::Circular {
                    center,
                    radius,
                    clockwise,
                    start_angle,
                    span,
                    ..
                } => {
                    let segments = 32;
                    let mut prev = None;
                    for k in 0..=segments {
                        let t = k as f64 / segments as f64;
                        let angle = if clockwise {
                            start_angle - span * t
                        } else {
                            start_angle + span * t
                        };
                        let p = self.body_to_world(
                            center + radius * DVec2::new(angle.cos(), angle.sin()),
                        );
                        if let Some(prev) = prev {
                            draw_vec_line(prev, p, 0.03, WHITE);
                        }
                        prev = Some(p);
                    }
                }
            }
        }
    }
}

impl Draw for Contact {
    fn draw(&self) {
        let inside = self.impact1 + self.distance * self.normal;
        draw_vec_line(self.impact1, inside, 0.05, RED);
    }
}

impl Draw for Simulation {
    fn draw(&self) {
        for (_, body) in self.bodies() {
            body.draw();
        }
        for contact in self.last_contacts() {
            contact.draw();
        }
    }
}
