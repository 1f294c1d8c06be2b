// src/main.rs
//
// Demo binary: loads a TOML config, wires a `MotionController` against
// in-memory hardware mocks, drives the ramp generator from a dedicated
// background thread (standing in for a hardware timer interrupt), and
// issues a handful of sample moves from the async task loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;

use multistepper_motion::config::Config;
use multistepper_motion::hardware::{self, MockEndstopSource, MockStepperDriver, SystemClock};
use multistepper_motion::motion::{self, MotionArgs, MotionController};

#[derive(Parser, Debug)]
#[command(name = "motion-demo", about = "Multi-axis stepper motion core demo")]
struct Cli {
    /// Path to a TOML config file (axes, ramp timing, motor-enable policy).
    #[arg(short, long, default_value = "motion.toml")]
    config: PathBuf,

    /// Issue a short scripted sequence of moves after startup.
    #[arg(long, default_value_t = true)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        tracing::info!(path = %cli.config.display(), "loading configuration");
        Config::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };
    config.validate()?;

    let num_axes = config.axes.len();
    tracing::info!(geom = %config.geom, num_axes, "motion core configured");

    let axes_params = motion::AxesParams::new(config.axes.clone());
    let stepper_driver: Arc<dyn hardware::StepperDriver> = Arc::new(MockStepperDriver::new(num_axes));
    let endstops: Arc<dyn hardware::EndstopSource> = Arc::new(MockEndstopSource::new(num_axes));
    let clock: Arc<dyn hardware::Clock> = Arc::new(SystemClock::default());

    let mut controller = MotionController::new(
        axes_params,
        config.ramp.pipeline_len,
        config.ramp.ramp_timer_us,
        config.junction_deviation,
        &config.geom,
        config.allow_out_of_bounds,
        config.home_before_move,
        config.block_dist,
        config.motor_en.step_disable_secs,
        stepper_driver,
        endstops,
        clock,
    )?;

    let ramp_generator = controller.ramp_generator();
    let tick_period = Duration::from_micros(config.ramp.ramp_timer_us as u64);
    let ramp_timer_en = config.ramp.ramp_timer_en;
    std::thread::spawn(move || {
        if !ramp_timer_en {
            return;
        }
        loop {
            ramp_generator.tick();
            std::thread::sleep(tick_period);
        }
    });

    if cli.demo {
        controller.set_cur_position_as_home(true, 0);
        run_demo_sequence(&mut controller).await;
    }

    tracing::info!("motion core running, press Ctrl+C to shut down");
    loop {
        controller.service();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
            _ = signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    Ok(())
}

/// Issues a short scripted move sequence so the demo produces visible
/// activity without an external client.
async fn run_demo_sequence(controller: &mut MotionController) {
    let moves: [(f64, f64, f64); 3] = [(50.0, 0.0, 0.0), (50.0, 50.0, 0.0), (0.0, 0.0, 5.0)];

    for (x, y, z) in moves {
        let mut args = MotionArgs::new();
        args.set_axis_pos(0, x);
        args.set_axis_pos(1, y);
        args.set_axis_pos(2, z);
        match controller.move_to(args) {
            Ok(()) => tracing::info!(x, y, z, "queued move"),
            Err(e) => tracing::warn!(x, y, z, error = %e, "move rejected"),
        }

        while controller.stream_get_queue_slots() == 0 {
            controller.service();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    let stats = controller.get_stats();
    tracing::info!(isr_avg_us = stats.isr_avg_us, isr_max_us = stats.isr_max_us, "ramp generator stats");
}
