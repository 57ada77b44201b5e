#![allow(dead_code)]

use annosync_model::{Classification, Color, Geometry, PathObject};
use std::sync::Once;
use std::time::Duration;

static TRACING: Once = Once::new();

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn square(x: f64, y: f64) -> Geometry {
    Geometry::rectangle(x, y, 10.0, 10.0)
}

/// A named, classified annotation with one measurement.
pub fn tumor_annotation(name: &str) -> PathObject {
    let mut object = PathObject::annotation(square(0.0, 0.0))
        .with_name(name)
        .with_classification(Classification::new("Tumor").with_color(Color::rgb(200, 0, 0)));
    object.color = Some(Color::rgb(255, 255, 0));
    object.measurements.insert("Area".to_string(), 100.0);
    object
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
