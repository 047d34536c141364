//! The JSON service registry: a flat array of service descriptors.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("failed to access {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("{path} is not a JSON array of services: {source}")]
	Json {
		path: String,
		#[source]
		source: serde_json::Error,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
	pub id: String,
	pub name: String,
	/// Stored as written; `~` is expanded when the service is built.
	#[serde(default)]
	pub start_directory: String,
	pub startup_command: String,
	#[serde(default)]
	pub shutdown_command: String,
	#[serde(default)]
	pub auto_start: bool,
}

/// Parses registry text. Records missing a required field are skipped with
/// a warning; text that is not a JSON array fails as a whole.
pub fn parse_registry(content: &str, origin: &str) -> Result<Vec<ServiceConfig>, RegistryError> {
	let records: Vec<Value> = serde_json::from_str(content).map_err(|source| RegistryError::Json {
		path: origin.to_string(),
		source,
	})?;

	let mut configs = Vec::with_capacity(records.len());
	for record in records {
		match serde_json::from_value::<ServiceConfig>(record.clone()) {
			Ok(config) => configs.push(config),
			Err(e) => tracing::warn!("invalid service configuration {}: {}", record, e),
		}
	}
	Ok(configs)
}

pub fn load_registry(path: &Path) -> Result<Vec<ServiceConfig>, RegistryError> {
	let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
		path: path.display().to_string(),
		source,
	})?;
	parse_registry(&content, &path.display().to_string())
}

pub fn save_registry(path: &Path, configs: &[ServiceConfig]) -> Result<(), RegistryError> {
	let io_err = |source| RegistryError::Io {
		path: path.display().to_string(),
		source,
	};
	let data = serde_json::to_string_pretty(configs).map_err(|source| RegistryError::Json {
		path: path.display().to_string(),
		source,
	})?;
	if let Some(dir) = path.parent() {
		if !dir.as_os_str().is_empty() {
			std::fs::create_dir_all(dir).map_err(io_err)?;
		}
	}
	std::fs::write(path, data).map_err(io_err)
}
