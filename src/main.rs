//! Headless demo: splash water onto block letters and log what happens.
//!
//! ```text
//! RUST_LOG=debug cargo run --release -- 900
//! ```

use std::env;
use std::error::Error;

use glam::Vec3;
use log::{debug, info};
use textsplash::mesh::box_triangles;
use textsplash::prelude::*;
use textsplash::rng::seeded_rng;

/// Seconds per loop of the spawn cue.
const LOOP_LENGTH: f32 = 4.0;
const DROPS_PER_SPLASH: usize = 5_000;

/// "HI" from axis-aligned boxes, front face at z = +0.15.
fn block_letters() -> Vec<Triangle> {
    let depth = (Vec3::new(0.0, 0.0, -0.15), Vec3::new(0.0, 0.0, 0.15));
    let bar = |x0: f32, y0: f32, x1: f32, y1: f32| {
        box_triangles(Vec3::new(x0, y0, 0.0) + depth.0, Vec3::new(x1, y1, 0.0) + depth.1)
    };
    [
        // H
        bar(-1.0, 0.0, -0.8, 1.0),
        bar(-0.4, 0.0, -0.2, 1.0),
        bar(-0.8, 0.4, -0.4, 0.6),
        // I
        bar(0.2, 0.0, 0.4, 1.0),
        bar(0.0, 0.8, 0.6, 1.0),
        bar(0.0, 0.0, 0.6, 0.2),
    ]
    .concat()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let frames: usize = env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(600);
    let config = SplashConfig::default().with_capacity(50_000);
    let capacity = config.capacity;
    let cache = DirFieldCache::open(env::temp_dir().join("textsplash-cache"))?;

    let mut system = SplashSystem::new(config, FieldGenConfig::new(64))?
        .with_default_gpu()
        .with_cache(cache, 8);

    let progress = |p: GenerationProgress| debug!("{:?} field {:.0}%", p.strategy, p.fraction * 100.0);
    let source = system.load_shape(&block_letters(), &ShapeDescriptor::new("HI", "blocks"), &progress)?;
    info!("{} ({:?})", system.status(), source);

    let emitter = SplashEmitter::default()
        .with_region(Vec3::new(-1.1, 0.3, 0.7), Vec3::new(0.7, 1.3, 0.9))
        .with_velocity(Vec3::new(0.0, 0.4, -3.0), Vec3::new(0.2, 0.2, 0.3));
    let mut window = SpawnWindow::new(0.2, 0.4);
    let mut clock = FrameClock::fixed(1.0 / 60.0);
    let mut rng = seeded_rng(None);

    let mut positions = vec![0.0; capacity * 3];
    let mut states = vec![0.0; capacity * 4];

    for frame in 0..frames {
        let (time, dt) = clock.tick();
        if window.poll(time % LOOP_LENGTH) {
            let admitted = system.spawn(&emitter.emit(DROPS_PER_SPLASH, &mut rng))?;
            info!("Splash at {:.2}s: {} drops admitted", time, admitted);
        }

        let active = system.update(dt, time)?;
        if frame % 60 == 0 {
            let drawn = system.copy_to_render_buffers(&mut positions, &mut states);
            info!(
                "t={:.2}s active={} in contact={} draw range={}",
                time,
                active,
                system.count_in_contact(),
                drawn
            );
        }
    }

    Ok(())
}
