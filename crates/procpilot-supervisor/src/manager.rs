use std::path::Path;
use std::sync::Arc;

use crate::host::ProcessHost;
use crate::registry::{self, RegistryError, ServiceConfig};
use crate::service::{Service, ServiceSettings};

/// Registry of supervised services keyed by id. Iteration follows the order
/// services were loaded in.
pub struct ServiceManager {
	services: Vec<Service>,
	settings: ServiceSettings,
	host: Arc<dyn ProcessHost>,
}

impl ServiceManager {
	pub fn new(settings: ServiceSettings, host: Arc<dyn ProcessHost>) -> Self {
		Self {
			services: Vec::new(),
			settings,
			host,
		}
	}

	pub fn settings(&self) -> &ServiceSettings {
		&self.settings
	}

	pub fn len(&self) -> usize {
		self.services.len()
	}

	pub fn is_empty(&self) -> bool {
		self.services.is_empty()
	}

	pub fn services(&self) -> &[Service] {
		&self.services
	}

	pub fn services_mut(&mut self) -> impl Iterator<Item = &mut Service> {
		self.services.iter_mut()
	}

	/// Adds a service, replacing any existing one with the same id in place.
	pub fn insert(&mut self, config: ServiceConfig) {
		let service = Service::new(config, &self.settings, Arc::clone(&self.host));
		match self.services.iter().position(|s| s.id() == service.id()) {
			Some(i) => {
				tracing::warn!("duplicate service id {}, keeping the later entry", service.id());
				self.services[i] = service;
			}
			None => self.services.push(service),
		}
	}

	/// Replaces every service with `configs`.
	pub fn load_configs(&mut self, configs: Vec<ServiceConfig>) {
		self.services.clear();
		for config in configs {
			self.insert(config);
		}
	}

	/// Reloads from the registry file. On failure the current services are
	/// left untouched.
	pub fn load_registry(&mut self, path: &Path) -> Result<usize, RegistryError> {
		let configs = registry::load_registry(path)?;
		self.load_configs(configs);
		tracing::info!("loaded {} services from {}", self.services.len(), path.display());
		Ok(self.services.len())
	}

	pub fn save_registry(&self, path: &Path) -> Result<(), RegistryError> {
		let configs: Vec<ServiceConfig> = self.services.iter().map(|s| s.config().clone()).collect();
		registry::save_registry(path, &configs)
	}

	pub fn get(&self, id: &str) -> Option<&Service> {
		self.services.iter().find(|s| s.id() == id)
	}

	pub fn get_mut(&mut self, id: &str) -> Option<&mut Service> {
		self.services.iter_mut().find(|s| s.id() == id)
	}

	pub fn get_by_name(&self, name: &str) -> Option<&Service> {
		self.services.iter().find(|s| s.name() == name)
	}

	/// Looks `key` up as an id first, then as a name.
	pub fn find_mut(&mut self, key: &str) -> Option<&mut Service> {
		let index = self
			.services
			.iter()
			.position(|s| s.id() == key)
			.or_else(|| self.services.iter().position(|s| s.name() == key))?;
		self.services.get_mut(index)
	}

	/// Scans every service's log and restarts any auto-start service that is
	/// not running. Returns the ids that were started.
	pub fn tick(&mut self) -> Vec<String> {
		let mut started = Vec::new();
		for service in self.services.iter_mut() {
			if let Err(e) = service.scan_logs() {
				tracing::warn!("{}: log scan failed: {}", service.name(), e);
			}
			if service.auto_start() && !service.is_running(true) && service.start() {
				tracing::info!("auto-started service: {}", service.name());
				started.push(service.id().to_string());
			}
		}
		started
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakeHost;

	fn config(id: &str, name: &str, auto_start: bool) -> ServiceConfig {
		ServiceConfig {
			id: id.into(),
			name: name.into(),
			start_directory: String::new(),
			startup_command: "sleep 60".into(),
			shutdown_command: String::new(),
			auto_start,
		}
	}

	fn manager(dir: &tempfile::TempDir) -> (ServiceManager, Arc<FakeHost>) {
		let host = Arc::new(FakeHost::default());
		let manager = ServiceManager::new(ServiceSettings::new(dir.path()), host.clone());
		(manager, host)
	}

	#[test]
	fn auto_start_converges() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, host) = manager(&dir);
		manager.load_configs(vec![config("a1", "api", true), config("b2", "batch", false)]);

		assert_eq!(manager.tick(), vec!["a1".to_string()]);
		let session = manager.get("a1").unwrap().session_name().to_string();
		assert!(host.is_running(&session));

		assert!(manager.tick().is_empty());
		assert!(manager.tick().is_empty());
		assert_eq!(host.starts(&session), 1);

		let batch = manager.get("b2").unwrap().session_name().to_string();
		assert_eq!(host.starts(&batch), 0);
	}

	#[test]
	fn auto_start_recovers_after_crash() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, host) = manager(&dir);
		manager.load_configs(vec![config("a1", "api", true)]);
		manager.tick();

		let session = manager.get("a1").unwrap().session_name().to_string();
		host.set_running(&session, false);
		assert_eq!(manager.tick(), vec!["a1".to_string()]);
		assert_eq!(host.starts(&session), 2);
	}

	#[test]
	fn tick_absorbs_new_log_lines() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, _host) = manager(&dir);
		manager.load_configs(vec![config("a1", "api", true)]);
		manager.tick();

		// the START marker lands after the scan in the tick that started it
		assert!(manager.get("a1").unwrap().tracker().current_session().is_none());
		manager.tick();
		assert!(manager.get("a1").unwrap().tracker().current_session().is_some());
	}

	#[test]
	fn lookups() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, _host) = manager(&dir);
		manager.load_configs(vec![config("a1", "api", false), config("b2", "batch", false)]);

		assert_eq!(manager.get_by_name("batch").unwrap().id(), "b2");
		assert!(manager.get("zz").is_none());
		assert_eq!(manager.find_mut("a1").unwrap().name(), "api");
		assert_eq!(manager.find_mut("batch").unwrap().id(), "b2");
		assert!(manager.find_mut("nope").is_none());
	}

	#[test]
	fn duplicate_ids_keep_position_and_later_entry() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, _host) = manager(&dir);
		manager.load_configs(vec![
			config("a1", "first", false),
			config("b2", "batch", false),
			config("a1", "second", false),
		]);
		let names: Vec<&str> = manager.services().iter().map(|s| s.name()).collect();
		assert_eq!(names, vec!["second", "batch"]);
	}

	#[test]
	fn failed_reload_keeps_services() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, _host) = manager(&dir);
		manager.load_configs(vec![config("a1", "api", false)]);

		let path = dir.path().join("services.json");
		std::fs::write(&path, "{broken").unwrap();
		assert!(manager.load_registry(&path).is_err());
		assert_eq!(manager.len(), 1);
	}

	#[test]
	fn registry_roundtrip_through_manager() {
		let dir = tempfile::tempdir().unwrap();
		let (mut manager, _host) = manager(&dir);
		manager.load_configs(vec![config("a1", "api", true), config("b2", "batch", false)]);

		let path = dir.path().join("services.json");
		manager.save_registry(&path).unwrap();

		let (mut other, _host) = self::manager(&dir);
		assert_eq!(other.load_registry(&path).unwrap(), 2);
		assert_eq!(other.services()[0].config(), manager.services()[0].config());
	}
}
