use std::path::{Path, PathBuf};
use std::time::Duration;

use engine::ChannelCapacities;
use model::Rect;
use renderer::FrameSettings;
use serde::{Deserialize, Serialize};
use view::{MAX_ZOOM, MIN_ZOOM};

/// Smallest patch window side the document accepts.
pub const MIN_PRESENTATION_SIDE: u32 = 11;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings are not valid TOML")]
    Parse(#[from] toml::de::Error),
    #[error("invalid setting `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    pub commands: usize,
    pub notices: usize,
    pub tasks: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let capacities = ChannelCapacities::default();
        Self {
            commands: capacities.commands,
            notices: capacities.notices,
            tasks: capacities.tasks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Everything the canvas reads at render and reconcile time.
///
/// Built once at startup; later changes go through
/// [`crate::CanvasUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanvasSettings {
    pub grid_size: u32,
    pub default_zoom: f32,
    pub show_origin: bool,
    pub show_border: bool,
    pub edges_behind_nodes: bool,
    pub frame_budget_ms: u64,
    pub show_fps: bool,
    pub cache_nodes: bool,
    pub show_scrollbars: bool,
    pub queues: QueueSettings,
    pub presentation_window: WindowSize,
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            grid_size: 25,
            default_zoom: 1.0,
            show_origin: true,
            show_border: true,
            edges_behind_nodes: false,
            frame_budget_ms: 14,
            show_fps: false,
            cache_nodes: true,
            show_scrollbars: true,
            queues: QueueSettings::default(),
            presentation_window: WindowSize::default(),
        }
    }
}

impl CanvasSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded canvas settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.grid_size == 0 {
            return Err(invalid("grid_size", "must be greater than zero"));
        }
        if !self.default_zoom.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&self.default_zoom) {
            return Err(invalid(
                "default_zoom",
                format!("must be within {MIN_ZOOM}..={MAX_ZOOM}"),
            ));
        }
        if self.frame_budget_ms == 0 {
            return Err(invalid("frame_budget_ms", "must be greater than zero"));
        }
        let queues = [
            ("queues.commands", self.queues.commands),
            ("queues.notices", self.queues.notices),
            ("queues.tasks", self.queues.tasks),
        ];
        for (name, capacity) in queues {
            if capacity == 0 {
                return Err(invalid(name, "must be greater than zero"));
            }
        }
        let window = self.presentation_window;
        if window.width < MIN_PRESENTATION_SIDE || window.height < MIN_PRESENTATION_SIDE {
            return Err(invalid(
                "presentation_window",
                format!("sides must be at least {MIN_PRESENTATION_SIDE}"),
            ));
        }
        Ok(())
    }

    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            budget: self.frame_budget(),
            show_fps: self.show_fps,
            cache_nodes: self.cache_nodes,
        }
    }

    pub fn channel_capacities(&self) -> ChannelCapacities {
        ChannelCapacities {
            commands: self.queues.commands,
            notices: self.queues.notices,
            tasks: self.queues.tasks,
        }
    }

    /// Canvas rectangle of the patch window, anchored at the origin.
    pub fn presentation_rect(&self) -> Rect {
        let side = |value: u32| i32::try_from(value).unwrap_or(i32::MAX);
        Rect::new(
            0,
            0,
            side(self.presentation_window.width),
            side(self.presentation_window.height),
        )
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        name,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = CanvasSettings::from_toml_str("").unwrap();
        assert_eq!(settings, CanvasSettings::default());
        assert_eq!(settings.frame_budget(), Duration::from_millis(14));
        assert_eq!(settings.channel_capacities(), ChannelCapacities::default());
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let settings = CanvasSettings::from_toml_str(
            r#"
            grid_size = 10
            show_fps = true

            [queues]
            notices = 8

            [presentation_window]
            width = 300
            "#,
        )
        .unwrap();
        assert_eq!(settings.grid_size, 10);
        assert!(settings.frame_settings().show_fps);
        assert_eq!(settings.queues.notices, 8);
        assert_eq!(settings.queues.tasks, QueueSettings::default().tasks);
        assert_eq!(settings.presentation_rect(), Rect::new(0, 0, 300, 480));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = CanvasSettings::from_toml_str("grid = 4").unwrap_err();
        assert!(matches!(error, SettingsError::Parse(_)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let error = CanvasSettings::from_toml_str("default_zoom = 9.0").unwrap_err();
        assert!(matches!(
            error,
            SettingsError::Invalid {
                name: "default_zoom",
                ..
            }
        ));

        let error = CanvasSettings::from_toml_str("[queues]\ntasks = 0").unwrap_err();
        assert!(matches!(
            error,
            SettingsError::Invalid {
                name: "queues.tasks",
                ..
            }
        ));

        let error =
            CanvasSettings::from_toml_str("[presentation_window]\nheight = 10").unwrap_err();
        assert!(matches!(
            error,
            SettingsError::Invalid {
                name: "presentation_window",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let path = Path::new("/nonexistent/canvas.toml");
        let error = CanvasSettings::load(path).unwrap_err();
        assert!(matches!(error, SettingsError::Io { path: reported, .. } if reported == path));
    }
}
