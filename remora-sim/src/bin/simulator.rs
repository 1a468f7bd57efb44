use anyhow::Result;
use clap::Parser;
use nalgebra as na;
use remora_controller::{
    arm_config::RobotConfig,
    controller::Controller,
    scene::{ColliderShape, Material, Scene, SceneObject},
    services::VisionIoState,
};
use remora_sim::{
    logging,
    mock::{LoggingMotionExecutor, MockRegistrationService},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Path to a JSON robot configuration
    #[arg(short, long)]
    config: Option<String>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => RobotConfig::load_json(path)?,
        None => RobotConfig::included(),
    };

    let vision_io = Arc::new(VisionIoState::new());
    let (joint_sender, joint_receiver) = mpsc::channel();
    let (velocity_sender, velocity_receiver) = mpsc::channel();

    let controller = Controller::new(
        &config,
        build_scene(),
        Arc::new(MockRegistrationService::identity()),
        Box::new(LoggingMotionExecutor),
        Arc::clone(&vision_io),
        joint_sender,
        velocity_sender,
    );

    let keep_running = Arc::new(AtomicBool::new(true));

    tokio::spawn({
        let keep_running = keep_running.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to wait for Ctrl+c");
            tracing::info!("Detected Ctrl+c");
            keep_running.store(false, Ordering::Relaxed);
        }
    });

    tracing::info!("Capturing reference cloud");
    controller.capture_master()?;
    sleep(Duration::from_millis(100)).await;

    controller.select_joint(1)?;

    while keep_running.load(Ordering::Relaxed) {
        // nudge the arm away from the reference viewpoint
        for _ in 0..10 {
            controller.jog(1.0)?;
            sleep(Duration::from_millis(25)).await;
        }
        let published = joint_receiver.try_iter().count();
        tracing::info!("Published {} committed joint vectors", published);

        controller.capture_scan()?;
        sleep(Duration::from_millis(100)).await;

        tracing::info!("Requesting registration");
        controller.run_guidance()?;
        sleep(Duration::from_millis(300)).await;

        if !keep_running.load(Ordering::Relaxed) {
            continue;
        }

        // stream a short velocity burst, then let the watchdog stop it
        controller.set_velocity(na::Vector3::x(), na::Vector3::zeros())?;
        sleep(Duration::from_millis(200)).await;
        let streamed = velocity_receiver.try_iter().count();
        tracing::info!("Streamed {} velocity commands", streamed);

        sleep(Duration::from_secs(2)).await;
    }

    tracing::info!("Moving to home");
    controller.home()?;
    controller.shutdown()?;

    Ok(())
}

fn build_scene() -> Arc<Scene> {
    let mut scene = Scene::new();
    scene.add_object(SceneObject::new(
        "floor",
        na::Isometry3::translation(0.0, -0.01, 0.0),
        ColliderShape::Box {
            size: na::Vector3::new(4.0, 0.02, 4.0),
        },
        Material::checkered([230, 230, 230], [40, 40, 40], 0.25),
        1,
    ));
    scene.add_object(SceneObject::new(
        "target",
        na::Isometry3::translation(0.0, 0.25, 1.0),
        ColliderShape::Box {
            size: na::Vector3::new(0.3, 0.3, 0.3),
        },
        Material::checkered([220, 60, 40], [240, 200, 40], 0.05),
        1,
    ));
    scene.add_object(SceneObject::new(
        "ball",
        na::Isometry3::translation(-0.5, 0.15, 0.9),
        ColliderShape::Sphere { radius: 0.15 },
        Material::flat([40, 90, 220]),
        1,
    ));
    scene.add_object(SceneObject::new(
        "pillar",
        na::Isometry3::translation(0.6, 0.3, 0.8),
        ColliderShape::Capsule {
            radius: 0.08,
            height: 0.5,
        },
        Material::flat([60, 180, 90]),
        1,
    ));
    Arc::new(scene)
}
