//! # Camera perception port
//!
//! Captures MJPG frames from a V4L2 camera. Frames are decoded with `image` and rendered by saving
//! a subset of them into the session directory. The cancel signal comes from a shared
//! [`CancelLatch`], set by the console or the simulation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::path::PathBuf;

use chrono::Utc;
use log::{debug, info, warn};
use rscam::{Camera, Config};

use crate::{
    params::CamParams,
    ports::{CancelLatch, Frame, PerceptionPort, PortError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// V4L2 camera.
pub struct CamPerception {
    /// The camera, `None` once released
    camera: Option<Camera>,

    params: CamParams,
    cancel: CancelLatch,
    frame_dir: Option<PathBuf>,
    seq: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamPerception {
    /// Open and start the camera.
    ///
    /// Failure here is fatal to the run.
    pub fn new(
        params: CamParams,
        cancel: CancelLatch,
        frame_dir: Option<PathBuf>
    ) -> Result<Self, PortError> {
        let device = format!("/dev/video{}", params.camera_index);

        let mut camera = Camera::new(&device)?;
        camera.start(&Config {
            interval: (1, params.fps.max(1)),
            resolution: params.resolution,
            format: b"MJPG",
            ..Default::default()
        }).map_err(|e| PortError::Hardware(format!("Cannot start {}: {}", device, e)))?;

        info!(
            "Camera {} started at {}x{}, {} fps",
            device, params.resolution.0, params.resolution.1, params.fps
        );

        Ok(Self {
            camera: Some(camera),
            params,
            cancel,
            frame_dir,
            seq: 0,
        })
    }
}

impl PerceptionPort for CamPerception {
    fn next_frame(&mut self) -> Result<Option<Frame>, PortError> {
        let camera = self.camera.as_mut().ok_or(PortError::Released)?;

        let raw = camera.capture()?;
        let image = image::load_from_memory_with_format(&raw, image::ImageFormat::Jpeg)
            .map_err(|e| PortError::Hardware(format!("Cannot decode camera frame: {}", e)))?
            .to_rgb8();

        let frame = Frame {
            seq: self.seq,
            timestamp: Utc::now(),
            image,
        };
        self.seq += 1;

        Ok(Some(frame))
    }

    fn render(&mut self, frame: Frame) {
        let every = self.params.save_frame_every;
        if every == 0 || frame.seq % every != 0 {
            return
        }

        if let Some(ref dir) = self.frame_dir {
            let path = dir.join(format!("frame_{:06}.jpg", frame.seq));
            match frame.image.save(&path) {
                Ok(_) => debug!("Saved frame to {:?}", path),
                Err(e) => warn!("Could not save frame to {:?}: {}", path, e),
            }
        }
    }

    fn poll_cancel(&mut self) -> bool {
        self.cancel.is_set()
    }

    fn release(&mut self) -> Result<(), PortError> {
        let mut camera = self.camera.take().ok_or(PortError::Released)?;
        camera.stop()?;
        info!("Camera released after {} frames", self.seq);

        Ok(())
    }
}
