use sensor_cal::calibration::{AccelPosition, CategoryId, GRAVITY, SessionEvent};
use sensor_cal::config::{MonitorConfig, SyncConfig};
use sensor_cal::error::CalibrationError;
use sensor_cal::keychain::Keychain;
use sensor_cal::sim::{SimConfig, SimLink, SimVehicle};
use sensor_cal::util::Vec3D;
use sensor_cal::{cal, error, info, warn};
use std::{env, sync::Arc, time::Duration};
use strum::IntoEnumIterator;
use tokio::{sync::mpsc, time::sleep};

const USER_DELAY: Duration = Duration::from_millis(500);

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let mut sim_cfg = SimConfig::default();
    if env::var("SENSOR_CAL_SIM_LOSSY").is_ok() {
        sim_cfg.lossy_broadcast = (0..24).step_by(3).collect();
        info!("Simulating a lossy parameter stream.");
    }
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let sim = SimVehicle::new(sim_cfg, inbound_tx);
    let beat = sim.start_heartbeat();

    let categories: Vec<CategoryId> = CategoryId::iter().collect();
    let keys = Keychain::new(
        Arc::new(SimLink(Arc::clone(&sim))),
        inbound_rx,
        SyncConfig::from_env(),
        MonitorConfig::from_env(),
        &categories,
    );

    match keys.store().refresh().await.await {
        Ok(Some(outcome)) if outcome.success => {
            info!("Synchronized {} parameters in {} retry rounds.", outcome.received, outcome.retry_rounds);
        }
        Ok(Some(_)) => warn!("No parameters received. Verification will fail."),
        Ok(None) => warn!("Parameter sync superseded."),
        Err(e) => error!("Parameter sync task failed: {e}"),
    }
    if !keys.store().set("SR0_EXTRA1", 10.0).await {
        warn!("Stream rate could not be changed.");
    }

    if let Err(e) = calibrate(&keys).await {
        error!("Calibration stopped: {e}");
    }
    keys.shutdown().await;
    beat.abort();
}

/// Stands in for the IMU reading of a user-held vehicle in `pos`.
fn held_sample(pos: AccelPosition) -> Vec3D<f32> {
    let (axis, positive) = pos.expected_axis();
    Vec3D::unit(axis, positive) * GRAVITY + Vec3D::new(0.12, -0.07, 0.05)
}

async fn calibrate(keys: &Keychain) -> Result<(), CalibrationError> {
    let session = keys.session();
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            match ev {
                SessionEvent::Instruction { text, .. } => cal!("Vehicle says: {text}"),
                SessionEvent::Progress { category, percent } => cal!("{category}: {percent}%"),
                SessionEvent::Aborted(abort) => warn!("{abort}"),
                _ => {}
            }
        }
    });

    let gyro = session.parse_category("gyro")?;
    session.start(gyro).await?;
    sleep(USER_DELAY).await;
    session.advance(gyro).await?;
    session.commit(gyro).await?;

    let accel = CategoryId::Accelerometer;
    session.start(accel).await?;
    for pos in AccelPosition::iter() {
        sleep(USER_DELAY).await;
        session.advance_checked(accel, &held_sample(pos)).await?;
    }
    let report = session.commit(accel).await?;
    if let Some(err) = report.verification.as_error() {
        warn!("{err}");
    }
    if report.reboot_required && session.reboot_vehicle().await {
        info!("Vehicle reboots to apply the new calibration.");
    }
    for cat in session.categories() {
        info!("{:<14} {}", cat.id().to_string(), cat.status());
    }
    Ok(())
}
