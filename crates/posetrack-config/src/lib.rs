mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Returns the config directory: `<user config dir>/posetrack/`
pub fn config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("posetrack");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Returns the config file path: `<user config dir>/posetrack/config.toml`
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load config from the default location, or return defaults if not found.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path()?)
}

/// Load and validate config from `path`, or return defaults if it does not exist.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let config = if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(?path, "Loaded config");
        config
    } else {
        info!(?path, "No config found, using defaults");
        AppConfig::default()
    };

    config.validate()?;
    Ok(config)
}

/// Save config to the default location.
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &config_path()?)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    info!(?path, "Saved config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use posetrack_imu::fusion::{EstimatorConfig, FusionError, OrientationMode};

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("posetrack-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = load_config_from(&scratch_path("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.fusion.acceleration_deadzone, 1.5);
        assert_eq!(config.fusion.rotation_deadzone, 0.05);
        assert_eq!(config.fusion.damping_factor, 0.95);
        assert_eq!(config.fusion.gravity, 9.81);
        assert_eq!(config.timing.physics_interval_ms, 50);
    }

    #[test]
    fn save_then_load() {
        let path = scratch_path("roundtrip.toml");
        let mut config = AppConfig::default();
        config.fusion.damping_factor = 1.0;
        config.fusion.mode = OrientationModeConfig::Leveling;
        config.source.simulation = true;
        config.source.seed = Some(3);

        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let path = scratch_path("partial.toml");
        std::fs::write(
            &path,
            "[fusion]\nacceleration_deadzone = 0.5\nmode = \"leveling\"\n\n[timing]\nphysics_interval_ms = 10\n",
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.fusion.acceleration_deadzone, 0.5);
        assert_eq!(config.fusion.mode, OrientationModeConfig::Leveling);
        assert_eq!(config.fusion.damping_factor, 0.95);
        assert_eq!(config.timing.physics_interval_ms, 10);
        assert_eq!(config.timing.dashboard_interval_ms, 50);
        assert_eq!(config.source, SourceConfig::default());
    }

    #[test]
    fn invalid_values_rejected() {
        let path = scratch_path("invalid.toml");
        std::fs::write(&path, "[fusion]\ndamping_factor = 0.0\n").unwrap();
        assert!(load_config_from(&path).is_err());

        let mut config = AppConfig::default();
        config.fusion.rotation_deadzone = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Fusion(FusionError::InvalidConfig(_)))
        ));

        let mut config = AppConfig::default();
        config.timing.dashboard_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("dashboard_interval_ms"))
        );
    }

    #[test]
    fn fusion_section_maps_onto_estimator() {
        let mut config = AppConfig::default();
        assert_eq!(config.fusion.estimator(), EstimatorConfig::default());

        config.fusion.mode = OrientationModeConfig::Leveling;
        config.fusion.damping_factor = 0.8;
        let estimator = config.fusion.estimator();
        assert_eq!(estimator.mode, OrientationMode::Leveling);
        assert_eq!(estimator.damping_factor, 0.8);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let path = scratch_path("garbage.toml");
        std::fs::write(&path, "fusion = [1, 2").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
