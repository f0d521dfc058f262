//! `vigil status`: the dashboard toggles for each camera.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;

use vigil_core::{Hub, StateChannel, Toggle};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Debug, Serialize)]
struct CameraStatus {
    camera: String,
    detect: Option<Toggle>,
    recordings: Option<Toggle>,
    snapshots: Option<Toggle>,
    audio: Option<Toggle>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Camera")]
    camera: String,
    #[tabled(rename = "Detect")]
    detect: String,
    #[tabled(rename = "Recordings")]
    recordings: String,
    #[tabled(rename = "Snapshots")]
    snapshots: String,
    #[tabled(rename = "Audio")]
    audio: String,
}

/// The four dashboard channels of one camera.
struct CameraChannels {
    camera: String,
    detect: StateChannel<Toggle>,
    recordings: StateChannel<Toggle>,
    snapshots: StateChannel<Toggle>,
    audio: StateChannel<Toggle>,
}

impl CameraChannels {
    fn bind(hub: &Hub, camera: &str) -> Result<Self, CliError> {
        Ok(Self {
            camera: camera.to_owned(),
            detect: hub.detect_state(camera)?,
            recordings: hub.recordings_state(camera)?,
            snapshots: hub.snapshots_state(camera)?,
            audio: hub.audio_state(camera)?,
        })
    }

    async fn wait_for_values(&mut self) {
        for channel in [
            &mut self.detect,
            &mut self.recordings,
            &mut self.snapshots,
            &mut self.audio,
        ] {
            channel.wait_for_value().await;
        }
    }

    fn status(&self) -> CameraStatus {
        CameraStatus {
            camera: self.camera.clone(),
            detect: self.detect.current_value(),
            recordings: self.recordings.current_value(),
            snapshots: self.snapshots.current_value(),
            audio: self.audio.current_value(),
        }
    }
}

fn cell(value: Option<Toggle>, color: bool) -> String {
    let text = value.map_or_else(|| "-".to_owned(), |v| v.to_string());
    output::paint_value(&text, color)
}

pub async fn handle(
    hub: &Hub,
    args: StatusArgs,
    profile_cameras: &[String],
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let cameras = util::cameras_or_profile(args.cameras, profile_cameras)?;

    let mut bound = cameras
        .iter()
        .map(|camera| CameraChannels::bind(hub, camera))
        .collect::<Result<Vec<_>, _>>()?;

    util::connect(hub, global).await?;

    // Retained values arrive right after the subscribe; missing ones stay "-".
    let _ = tokio::time::timeout(Duration::from_millis(args.settle_ms), async {
        for camera in &mut bound {
            camera.wait_for_values().await;
        }
    })
    .await;

    let statuses: Vec<CameraStatus> = bound.iter().map(CameraChannels::status).collect();
    let color = output::should_color(&global.color);

    let out = output::render_list(
        &global.output,
        &statuses,
        |s| StatusRow {
            camera: s.camera.clone(),
            detect: cell(s.detect, color),
            recordings: cell(s.recordings, color),
            snapshots: cell(s.snapshots, color),
            audio: cell(s.audio, color),
        },
        |s| {
            format!(
                "{} detect={} recordings={} snapshots={} audio={}",
                s.camera,
                cell(s.detect, false),
                cell(s.recordings, false),
                cell(s.snapshots, false),
                cell(s.audio, false),
            )
        },
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
