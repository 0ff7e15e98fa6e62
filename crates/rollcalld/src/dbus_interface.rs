use crate::engine::EngineHandle;
use serde::Serialize;
use std::path::PathBuf;
use zbus::interface;

pub const BUS_NAME: &str = "io.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/io/rollcall/Attendance1";

/// D-Bus interface for the attendance daemon.
///
/// Bus name: io.rollcall.Attendance1
/// Object path: /io/rollcall/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn failed(err: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

#[interface(name = "io.rollcall.Attendance1")]
impl AttendanceService {
    /// Take attendance from a face manifest and return the run summary as JSON.
    async fn take_attendance(&self, scene: &str) -> zbus::fdo::Result<String> {
        tracing::info!(scene, "take_attendance requested");
        let summary = self
            .engine
            .take_attendance(PathBuf::from(scene))
            .await
            .map_err(failed)?;
        to_json(&summary)
    }

    /// Rebuild the gallery from the enrollment directory.
    async fn enroll(&self) -> zbus::fdo::Result<String> {
        tracing::info!("enroll requested");
        let summary = self.engine.enroll().await.map_err(failed)?;
        to_json(&summary)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        to_json(&status)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.identities().await.map_err(failed)?;
        to_json(&identities)
    }
}
