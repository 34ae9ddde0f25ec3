use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub branding: BrandingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Pre-configured layer archives, loaded automatically at startup so the
/// operator does not have to re-upload after a restart. Any of them may be
/// absent; the reload endpoint still works with whatever is configured.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct InputConfig {
    pub zas_archive: Option<PathBuf>,
    pub municipalities_archive: Option<PathBuf>,
    pub meeting_points_archive: Option<PathBuf>,
    /// Alternate tabular source for the meeting points (CSV with name,
    /// latitude and longitude columns). Used when no archive is configured.
    pub meeting_points_table: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrandingConfig {
    #[serde(default = "default_title")]
    pub app_title: String,
    #[serde(default)]
    pub organizer_name: String,
    #[serde(default)]
    pub organizer_logo_url: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub client_logo_url: String,
}

impl Default for BrandingConfig {
    fn default() -> Self {
        BrandingConfig {
            app_title: default_title(),
            organizer_name: String::new(),
            organizer_logo_url: String::new(),
            client_name: String::new(),
            client_logo_url: String::new(),
        }
    }
}

fn default_title() -> String {
    "Painel de Acompanhamento - Simulado PAE".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Where the flat session snapshot is written after each interaction.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("session_state.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served at `/` for the static dashboard front-end.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from(".")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.session.snapshot_path,
            PathBuf::from("session_state.json")
        );
        assert!(config.input.zas_archive.is_none());
        assert!(config.branding.app_title.contains("Simulado"));
    }

    #[test]
    fn input_paths_parse() {
        let config: AppConfig = toml::from_str(
            r#"
            [input]
            zas_archive = "ZAS_Irape.zip"
            municipalities_archive = "Municipios_Irape.zip"
            meeting_points_archive = "PEs_Irape.zip"

            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(
            config.input.zas_archive,
            Some(PathBuf::from("ZAS_Irape.zip"))
        );
        assert_eq!(config.server.port, 9000);
    }
}
