//! What a dev session already did to its component.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::devfile::ImageComponent;
use crate::state::ForwardedPort;

/// State of the component, as last seen by the reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum State {
    /// Nothing reconciled yet.
    #[default]
    Unknown,
    /// Resources exist but the pod is not running yet.
    Waiting,
    /// The component is running and up to date.
    Ready,
    /// The last reconcile failed.
    Error,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::Waiting => "Waiting",
            Self::Ready => "Ready",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Progress of a dev session, owned by its reconcile loop.
///
/// The event and command flags only go from false to true: once the
/// post-start events or the run command ran, they stay done for the rest
/// of the session.
#[derive(Debug, Clone, Default)]
pub struct ComponentStatus {
    state: State,
    post_start_events_done: bool,
    commands_executed: bool,
    run_executed: bool,
    files_synced: bool,
    image_components_auto_applied: BTreeMap<String, ImageComponent>,
    kubernetes_components_applied: BTreeMap<String, String>,
    endpoints_forwarded: Vec<ForwardedPort>,
}

impl ComponentStatus {
    /// Creates the status of a new session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the last pass.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Records the state of a pass.
    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Whether the postStart events already ran.
    #[must_use]
    pub const fn post_start_events_done(&self) -> bool {
        self.post_start_events_done
    }

    /// Records that the postStart events ran. Never reset.
    pub fn mark_post_start_events_done(&mut self) {
        self.post_start_events_done = true;
    }

    /// Whether the build and run phase completed once, with or without a
    /// run command to execute.
    #[must_use]
    pub const fn commands_executed(&self) -> bool {
        self.commands_executed
    }

    /// Records a completed build and run phase. Never reset.
    pub fn mark_commands_executed(&mut self) {
        self.commands_executed = true;
    }

    /// Whether the run or debug command already ran.
    #[must_use]
    pub const fn run_executed(&self) -> bool {
        self.run_executed
    }

    /// Records that the run or debug command ran. Never reset.
    pub fn mark_run_executed(&mut self) {
        self.run_executed = true;
    }

    /// Whether the sources were pushed at least once in this session.
    #[must_use]
    pub const fn files_synced(&self) -> bool {
        self.files_synced
    }

    /// Records a first push of the sources.
    pub fn mark_files_synced(&mut self) {
        self.files_synced = true;
    }

    /// Whether `image` was already built, unchanged, as component `name`.
    #[must_use]
    pub fn image_applied(&self, name: &str, image: &ImageComponent) -> bool {
        self.image_components_auto_applied.get(name) == Some(image)
    }

    /// Records that `image` was built as component `name`.
    pub fn record_image_applied(&mut self, name: &str, image: &ImageComponent) {
        self.image_components_auto_applied
            .insert(name.to_string(), image.clone());
    }

    /// Whether `manifest` was already applied, unchanged, as component `name`.
    #[must_use]
    pub fn kubernetes_applied(&self, name: &str, manifest: &str) -> bool {
        self.kubernetes_components_applied
            .get(name)
            .is_some_and(|m| m == manifest)
    }

    /// Records that `manifest` was applied as component `name`.
    pub fn record_kubernetes_applied(&mut self, name: &str, manifest: &str) {
        self.kubernetes_components_applied
            .insert(name.to_string(), manifest.to_string());
    }

    /// Ports currently forwarded.
    #[must_use]
    pub fn endpoints_forwarded(&self) -> &[ForwardedPort] {
        &self.endpoints_forwarded
    }

    /// Replaces the forwarded ports.
    pub fn set_endpoints_forwarded(&mut self, ports: Vec<ForwardedPort>) {
        self.endpoints_forwarded = ports;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_stay_set() {
        let mut status = ComponentStatus::new();
        assert!(!status.post_start_events_done());
        status.mark_post_start_events_done();
        status.mark_run_executed();
        status.mark_commands_executed();
        status.set_state(State::Error);
        status.set_state(State::Ready);
        assert!(status.post_start_events_done());
        assert!(status.run_executed());
        assert!(status.commands_executed());
        assert_eq!(status.state(), State::Ready);
    }

    #[test]
    fn test_image_cache_tracks_content() {
        let mut status = ComponentStatus::new();
        let image = ImageComponent {
            image_name: String::from("api:1"),
            ..ImageComponent::default()
        };
        status.record_image_applied("api-image", &image);
        assert!(status.image_applied("api-image", &image));

        let changed = ImageComponent {
            image_name: String::from("api:2"),
            ..ImageComponent::default()
        };
        assert!(!status.image_applied("api-image", &changed));
    }
}
