//! App health aggregator.
//!
//! One slot per configured app, created at startup and never removed.
//! Apps report over the control socket; only the latest state is kept.

use serde::Serialize;
use tracing::{debug, warn};

use crate::ipc::{AppStateUpdate, StatePair};

/// Latest reported health of one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatus {
    pub name: String,
    pub app: StatePair,
    pub connectivity: StatePair,
}

/// JSON shape of one entry in the `apps` status section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppStatusReport {
    pub name: String,
    pub appstate: u32,
    pub apperror: u32,
    pub connectivitystate: u32,
    pub connectivityerror: u32,
}

impl From<&AppStatus> for AppStatusReport {
    fn from(status: &AppStatus) -> Self {
        Self {
            name: status.name.clone(),
            appstate: status.app.state,
            apperror: status.app.error,
            connectivitystate: status.connectivity.state,
            connectivityerror: status.connectivity.error,
        }
    }
}

#[derive(Debug, Default)]
pub struct AppHealth {
    slots: Vec<AppStatus>,
}

impl AppHealth {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: names
                .into_iter()
                .map(|name| AppStatus {
                    name: name.into(),
                    app: StatePair::default(),
                    connectivity: StatePair::default(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AppStatus> {
        self.slots.get(index)
    }

    /// Fold an update into its slot. Returns `false` if it was dropped.
    ///
    /// Only the pairs present in the update overwrite the slot.
    pub fn on_app_state_update(&mut self, update: &AppStateUpdate) -> bool {
        let Some(index) = update.index else {
            warn!("app state update without an app index");
            return false;
        };
        let Some(slot) = self.slots.get_mut(index as usize) else {
            warn!(index, apps = self.slots.len(), "app index out of range");
            return false;
        };
        if let Some(app) = update.app {
            slot.app = app;
        }
        if let Some(connectivity) = update.connectivity {
            slot.connectivity = connectivity;
        }
        debug!(app = %slot.name, state = slot.app.state, connectivity = slot.connectivity.state, "app state updated");
        true
    }

    pub fn dump_status(&self) -> Vec<AppStatusReport> {
        self.slots.iter().map(AppStatusReport::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::StateCode;
    use pretty_assertions::assert_eq;

    fn update(index: u32) -> AppStateUpdate {
        AppStateUpdate {
            index: Some(index),
            ..AppStateUpdate::default()
        }
    }

    #[test]
    fn test_partial_updates_keep_other_pair() {
        let mut apps = AppHealth::new(["sensor", "uploader"]);
        assert!(apps.on_app_state_update(&AppStateUpdate {
            app: Some(StatePair::new(StateCode::Ok, 0)),
            ..update(1)
        }));
        assert!(apps.on_app_state_update(&AppStateUpdate {
            connectivity: Some(StatePair::new(StateCode::Err, 5)),
            ..update(1)
        }));

        let slot = apps.get(1).unwrap();
        assert!(slot.app.is(StateCode::Ok));
        assert_eq!(slot.connectivity, StatePair::new(StateCode::Err, 5));
        assert_eq!(apps.get(0).unwrap().app, StatePair::default());
    }

    #[test]
    fn test_out_of_range_and_missing_index_dropped() {
        let mut apps = AppHealth::new(["only"]);
        assert!(!apps.on_app_state_update(&AppStateUpdate {
            app: Some(StatePair::new(StateCode::Ok, 0)),
            ..update(1)
        }));
        assert!(!apps.on_app_state_update(&AppStateUpdate {
            app: Some(StatePair::new(StateCode::Ok, 0)),
            ..AppStateUpdate::default()
        }));
        assert_eq!(apps.get(0).unwrap().app, StatePair::default());
    }

    #[test]
    fn test_dump_status_json() {
        let mut apps = AppHealth::new(["sensor"]);
        apps.on_app_state_update(&AppStateUpdate {
            app: Some(StatePair::new(StateCode::Ok, 0)),
            connectivity: Some(StatePair::new(StateCode::Active, 0)),
            ..update(0)
        });
        let json = serde_json::to_value(apps.dump_status()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "name": "sensor",
                "appstate": 1,
                "apperror": 0,
                "connectivitystate": 3,
                "connectivityerror": 0,
            }])
        );
    }
}
