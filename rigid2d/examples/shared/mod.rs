use macroquad::{
    camera::{set_camera, Camera2D},
    math::Rect,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod draw;

/// Installs logging and a camera showing `width` x `height` world units
/// centered on the origin.
pub fn setup(width: f32, height: f32) {
    let fmt_layer = fmt::layer().compact();
    let filter_layer = EnvFilter::from_default_env();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .init();
    let camera = Camera2D::from_display_rect(Rect::new(
        -width / 2.0,
        -height / 2.0,
        width,
        height,
    ));
    set_camera(&camera);
}
