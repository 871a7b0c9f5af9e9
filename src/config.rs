//! Immutable session configuration.
//!
//! Grounded on `TODO/config.rs` / `vision_config.rs`: one `#[derive(Deserialize)]`
//! struct per component, each with `#[serde(default = "...")]` functions and a
//! `Default` impl, loaded from a TOML file overlaid with `VIGILCORE__SECTION__KEY`
//! environment variables via the `config` crate. `start_session` takes a
//! `SessionConfig` value directly; nothing in this module is read implicitly
//! by the scheduler — `SessionConfig::load()` is a convenience constructor for
//! hosts that want it, not a requirement (§9 "Global mutable state").

use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Top-level analysis mode (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Track,
    Diff,
    Full,
    Count,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Track
    }
}

/// Buffer-full behavior (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    DropOldest,
    DropNewest,
    Block,
}

impl Default for DropPolicy {
    fn default() -> Self {
        DropPolicy::DropOldest
    }
}

/// Fixed source-kind tag (§9 "Dynamic dispatch across source kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rtsp,
    Hls,
    Http,
    Screen,
    Webcam,
    File,
}

fn default_mode() -> Mode {
    Mode::Track
}
fn default_focus() -> HashSet<String> {
    let mut s = HashSet::new();
    s.insert("person".to_string());
    s
}
fn default_fps_min() -> f64 {
    0.5
}
fn default_fps_max() -> f64 {
    5.0
}
fn default_motion_threshold() -> f64 {
    0.02
}
fn default_min_region_px() -> u32 {
    500
}
fn default_periodic_interval() -> u32 {
    30
}
fn default_skip_llm_threshold() -> f32 {
    0.7
}
fn default_use_guarder() -> bool {
    true
}
fn default_track_buffer() -> u32 {
    90
}
fn default_track_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_buffer_capacity() -> usize {
    30
}
fn default_drop_policy() -> DropPolicy {
    DropPolicy::DropOldest
}
fn default_vlm_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_guarder_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_det_confidence_floor() -> f32 {
    0.25
}
fn default_track_match_iou() -> f32 {
    0.3
}
fn default_new_track_confirm_frames() -> u32 {
    2
}
fn default_move_epsilon() -> f32 {
    0.02
}
fn default_move_min_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_vlm_fail_threshold() -> u32 {
    3
}
fn default_sink_buffer() -> usize {
    256
}
fn default_bg_alpha() -> f64 {
    0.02
}
fn default_stall_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_hard_stall_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_reconnect_base() -> Duration {
    Duration::from_secs(1)
}
fn default_reconnect_max() -> Duration {
    Duration::from_secs(30)
}
fn default_reconnect_reset_window() -> Duration {
    Duration::from_secs(60)
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_open_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_startup_window() -> Duration {
    Duration::from_secs(5)
}
fn default_pull_timeout() -> Duration {
    Duration::from_millis(500)
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}
fn default_rate_up() -> f64 {
    1.5
}
fn default_rate_down() -> f64 {
    0.75
}
fn default_stable_windows() -> u32 {
    3
}
fn default_decision_window_ms() -> u64 {
    1000
}
fn default_parallel_vlm() -> bool {
    false
}
fn default_guarder_model() -> String {
    "guarder-small".to_string()
}
fn default_vision_model() -> String {
    "vision-default".to_string()
}
fn default_track_history_len() -> usize {
    64
}

/// The single immutable configuration struct passed to `start_session`.
///
/// Every knob named anywhere in the component sections of the specification
/// lands here rather than as a scattered magic constant, mirroring how
/// `TODO/config.rs` groups related fields into one struct per component.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_focus")]
    pub focus: HashSet<String>,

    #[serde(default = "default_fps_min")]
    pub fps_min: f64,
    #[serde(default = "default_fps_max")]
    pub fps_max: f64,

    #[serde(default = "default_motion_threshold")]
    pub motion_threshold: f64,
    #[serde(default = "default_min_region_px")]
    pub min_region_px: u32,
    #[serde(default = "default_bg_alpha")]
    pub bg_alpha: f64,
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval: u32,

    #[serde(default = "default_skip_llm_threshold")]
    pub skip_llm_threshold: f32,
    #[serde(default = "default_use_guarder")]
    pub use_guarder: bool,
    #[serde(default = "default_guarder_model")]
    pub guarder_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_det_confidence_floor")]
    pub det_confidence_floor: f32,
    #[serde(default = "default_track_match_iou")]
    pub track_match_iou: f32,
    #[serde(default = "default_new_track_confirm_frames")]
    pub new_track_confirm_frames: u32,
    #[serde(default = "default_move_epsilon")]
    pub move_epsilon: f32,
    #[serde(default = "default_move_min_interval")]
    pub move_min_interval: Duration,
    #[serde(default = "default_track_buffer")]
    pub track_buffer: u32,
    #[serde(default = "default_track_timeout")]
    pub track_timeout: Duration,
    #[serde(default = "default_track_history_len")]
    pub track_history_len: usize,

    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_drop_policy")]
    pub drop_policy: DropPolicy,

    #[serde(default = "default_vlm_timeout")]
    pub vlm_timeout: Duration,
    #[serde(default = "default_parallel_vlm")]
    pub parallel_vlm: bool,
    #[serde(default = "default_vlm_fail_threshold")]
    pub vlm_fail_threshold: u32,
    #[serde(default = "default_guarder_timeout")]
    pub guarder_timeout: Duration,

    #[serde(default = "default_sink_buffer")]
    pub sink_buffer: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: Duration,
    #[serde(default = "default_hard_stall_timeout")]
    pub hard_stall_timeout: Duration,
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base: Duration,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max: Duration,
    #[serde(default = "default_reconnect_reset_window")]
    pub reconnect_reset_window: Duration,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_open_timeout")]
    pub open_timeout: Duration,
    #[serde(default = "default_startup_window")]
    pub startup_window: Duration,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout: Duration,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    #[serde(default = "default_rate_up")]
    pub rate_up: f64,
    #[serde(default = "default_rate_down")]
    pub rate_down: f64,
    #[serde(default = "default_stable_windows")]
    pub stable_windows: u32,
    #[serde(default = "default_decision_window_ms")]
    pub decision_window_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            focus: default_focus(),
            fps_min: default_fps_min(),
            fps_max: default_fps_max(),
            motion_threshold: default_motion_threshold(),
            min_region_px: default_min_region_px(),
            bg_alpha: default_bg_alpha(),
            periodic_interval: default_periodic_interval(),
            skip_llm_threshold: default_skip_llm_threshold(),
            use_guarder: default_use_guarder(),
            guarder_model: default_guarder_model(),
            vision_model: default_vision_model(),
            det_confidence_floor: default_det_confidence_floor(),
            track_match_iou: default_track_match_iou(),
            new_track_confirm_frames: default_new_track_confirm_frames(),
            move_epsilon: default_move_epsilon(),
            move_min_interval: default_move_min_interval(),
            track_buffer: default_track_buffer(),
            track_timeout: default_track_timeout(),
            track_history_len: default_track_history_len(),
            buffer_capacity: default_buffer_capacity(),
            drop_policy: default_drop_policy(),
            vlm_timeout: default_vlm_timeout(),
            parallel_vlm: default_parallel_vlm(),
            vlm_fail_threshold: default_vlm_fail_threshold(),
            guarder_timeout: default_guarder_timeout(),
            sink_buffer: default_sink_buffer(),
            heartbeat_interval: default_heartbeat_interval(),
            stall_timeout: default_stall_timeout(),
            hard_stall_timeout: default_hard_stall_timeout(),
            reconnect_base: default_reconnect_base(),
            reconnect_max: default_reconnect_max(),
            reconnect_reset_window: default_reconnect_reset_window(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            open_timeout: default_open_timeout(),
            startup_window: default_startup_window(),
            pull_timeout: default_pull_timeout(),
            shutdown_grace: default_shutdown_grace(),
            rate_up: default_rate_up(),
            rate_down: default_rate_down(),
            stable_windows: default_stable_windows(),
            decision_window_ms: default_decision_window_ms(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from `./vigilcore.toml` (if present) overlaid with
    /// `VIGILCORE__SECTION__KEY`-style environment variables, falling back to
    /// defaults for anything unset. Convenience only — `start_session` never
    /// calls this itself.
    pub fn load() -> anyhow::Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::with_name("vigilcore").required(false))
            .add_source(config::Environment::with_prefix("VIGILCORE").separator("__"))
            .build()?;

        match raw.try_deserialize::<SessionConfig>() {
            Ok(cfg) => Ok(cfg),
            Err(_) => Ok(SessionConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.mode, Mode::Track);
        assert!(cfg.focus.contains("person"));
        assert_eq!(cfg.fps_min, 0.5);
        assert_eq!(cfg.fps_max, 5.0);
        assert_eq!(cfg.motion_threshold, 0.02);
        assert_eq!(cfg.min_region_px, 500);
        assert_eq!(cfg.periodic_interval, 30);
        assert_eq!(cfg.skip_llm_threshold, 0.7);
        assert!(cfg.use_guarder);
        assert_eq!(cfg.track_buffer, 90);
        assert_eq!(cfg.track_timeout, Duration::from_secs(10));
        assert_eq!(cfg.buffer_capacity, 30);
        assert_eq!(cfg.drop_policy, DropPolicy::DropOldest);
        assert_eq!(cfg.vlm_timeout, Duration::from_secs(5));
        assert_eq!(cfg.guarder_timeout, Duration::from_secs(1));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn fps_bounds_are_ordered() {
        let cfg = SessionConfig::default();
        assert!(cfg.fps_min <= cfg.fps_max);
    }
}
