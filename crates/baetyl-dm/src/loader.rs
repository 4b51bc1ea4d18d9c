//! Loading the three driver files into typed tables.
//!
//! A load either yields complete [`DriverTables`] or the first error; callers
//! swap the result in only on success.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::access_config::{AccessConfig, DecodeMode};
use crate::error::{DmError, DmResult};
use crate::expression::parse_expression;
use crate::models::{AccessTemplate, DeviceInfo, DeviceProperty, DeviceTopic, MappingType};

pub const SUB_DEVICES_FILE: &str = "sub_devices.yml";
pub const MODELS_FILE: &str = "models.yml";
pub const ACCESS_TEMPLATE_FILE: &str = "access_template.yml";

/// Knobs of a driver config load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Surface malformed `accessConfig` entries instead of dropping them.
    #[serde(rename = "strictAccessConfig", default)]
    pub strict_access_config: bool,
}

impl LoadOptions {
    pub fn strict() -> Self {
        Self {
            strict_access_config: true,
        }
    }

    pub fn decode_mode(&self) -> DecodeMode {
        if self.strict_access_config {
            DecodeMode::Strict
        } else {
            DecodeMode::Permissive
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SubDevicesFile {
    #[serde(default)]
    driver: String,
    #[serde(default)]
    devices: Vec<DeviceInfo>,
}

/// Raw view of `sub_devices.yml` used to re-decode access configs strictly.
#[derive(Debug, Default, Deserialize)]
struct RawSubDevicesFile {
    #[serde(default)]
    devices: Vec<RawDevice>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDevice {
    #[serde(default)]
    name: String,
    #[serde(rename = "accessConfig", default)]
    access_config: Value,
}

/// The tables of one driver.
#[derive(Debug, Clone, Default)]
pub struct DriverTables {
    pub driver: String,
    /// Devices in file order.
    pub devices: Vec<DeviceInfo>,
    device_index: HashMap<String, usize>,
    pub models: HashMap<String, Vec<DeviceProperty>>,
    pub templates: HashMap<String, AccessTemplate>,
}

impl DriverTables {
    pub fn device(&self, name: &str) -> Option<&DeviceInfo> {
        self.device_index.get(name).map(|i| &self.devices[*i])
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.name.as_str())
    }
}

/// Load `sub_devices.yml`, `models.yml` and `access_template.yml` from `dir`.
pub fn load_driver_config(
    dir: &Path,
    driver: &str,
    options: LoadOptions,
) -> DmResult<DriverTables> {
    let (devices_path, devices_text) = read_file(dir, SUB_DEVICES_FILE)?;
    let (models_path, models_text) = read_file(dir, MODELS_FILE)?;
    let (templates_path, templates_text) = read_file(dir, ACCESS_TEMPLATE_FILE)?;

    let sub_devices: SubDevicesFile = parse_file(&devices_path, &devices_text)?;
    let models: HashMap<String, Vec<DeviceProperty>> = parse_file(&models_path, &models_text)?;
    let mut templates: HashMap<String, AccessTemplate> =
        parse_file(&templates_path, &templates_text)?;

    if !sub_devices.driver.is_empty() && sub_devices.driver != driver {
        warn!(
            driver = %driver,
            declared = %sub_devices.driver,
            "Driver name in {} differs, using the requested name",
            SUB_DEVICES_FILE
        );
    }

    for (model, properties) in &models {
        validate_properties(properties).map_err(|e| {
            DmError::malformed(display(&models_path), format!("model '{}': {}", model, e))
        })?;
    }

    for (name, template) in templates.iter_mut() {
        template.name = name.clone();
        validate_properties(&template.properties).map_err(|e| {
            DmError::malformed(display(&templates_path), format!("template '{}': {}", name, e))
        })?;
        for mapping in &template.mappings {
            if mapping.mapping_type == MappingType::Value {
                continue;
            }
            if let Err(e) = parse_expression(&mapping.expression) {
                warn!(
                    template = %name,
                    attribute = %mapping.attribute,
                    error = %e,
                    "Mapping expression does not parse"
                );
            }
        }
    }

    let mut devices = sub_devices.devices;
    if options.strict_access_config {
        apply_strict_access_configs(&devices_path, &devices_text, &mut devices)?;
    }

    let mut device_index = HashMap::with_capacity(devices.len());
    for (i, device) in devices.iter_mut().enumerate() {
        if device_index.insert(device.name.clone(), i).is_some() {
            return Err(DmError::malformed(
                display(&devices_path),
                format!("duplicate device name '{}'", device.name),
            ));
        }
        if !models.contains_key(&device.device_model) {
            return Err(DmError::DeviceModelNotExist(device.device_model.clone()));
        }
        if !templates.contains_key(&device.access_template) {
            return Err(DmError::AccessTemplateNotExist(device.access_template.clone()));
        }
        if device.topics.is_none() {
            device.topics = Some(DeviceTopic::for_device(&device.name));
        }
        if device.access_config.is_none() {
            debug!(device = %device.name, "Device has no access config");
        }
    }

    info!(
        driver = %driver,
        devices = devices.len(),
        models = models.len(),
        templates = templates.len(),
        "Loaded driver config"
    );

    Ok(DriverTables {
        driver: driver.to_string(),
        devices,
        device_index,
        models,
        templates,
    })
}

fn read_file(dir: &Path, name: &str) -> DmResult<(PathBuf, String)> {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok((path, text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(DmError::ConfigNotFound(display(&path)))
        }
        Err(e) => Err(DmError::malformed(display(&path), e)),
    }
}

fn parse_file<T: DeserializeOwned>(path: &Path, text: &str) -> DmResult<T> {
    baetyl_core::config::from_yaml_str(text).map_err(|e| DmError::malformed(display(path), e))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn validate_properties(properties: &[DeviceProperty]) -> Result<(), String> {
    let mut ids = HashSet::new();
    for property in properties {
        property.validate()?;
        if !ids.insert(property.id.as_str()) {
            return Err(format!("duplicate property id '{}'", property.id));
        }
    }
    Ok(())
}

fn apply_strict_access_configs(
    path: &Path,
    text: &str,
    devices: &mut [DeviceInfo],
) -> DmResult<()> {
    let raw: RawSubDevicesFile = parse_file(path, text)?;
    for (device, raw) in devices.iter_mut().zip(raw.devices) {
        let location = format!("{}: device '{}'", display(path), raw.name);
        device.access_config =
            AccessConfig::decode(&raw.access_config, DecodeMode::Strict, &location)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MODELS: &str = r#"
thermometer:
  - id: "1"
    name: temperature
    type: float32
    mode: ro
"#;

    const TEMPLATES: &str = r#"
thermo-modbus:
  version: "1"
  properties:
    - id: "1"
      name: raw-temperature
      type: int16
  mappings:
    - attribute: temperature
      type: calculate
      expression: ratio(x1,10)
"#;

    fn write(dir: &TempDir, name: &str, content: &str) {
        std::fs::write(dir.path().join(name), content).unwrap();
    }

    fn fixture(devices: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        write(&dir, SUB_DEVICES_FILE, devices);
        write(&dir, MODELS_FILE, MODELS);
        write(&dir, ACCESS_TEMPLATE_FILE, TEMPLATES);
        dir
    }

    #[test]
    fn test_load_fills_names_and_topics() {
        let dir = fixture(
            "driver: modbus\ndevices:\n  - name: t1\n    deviceModel: thermometer\n    accessTemplate: thermo-modbus\n",
        );
        let tables = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap();
        assert_eq!(tables.templates["thermo-modbus"].name, "thermo-modbus");
        let device = tables.device("t1").unwrap();
        assert_eq!(device.topics, Some(DeviceTopic::for_device("t1")));
        assert_eq!(tables.device_names().collect::<Vec<_>>(), vec!["t1"]);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, SUB_DEVICES_FILE, "devices: []\n");
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert!(matches!(err, DmError::ConfigNotFound(p) if p.ends_with(MODELS_FILE)));
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = fixture("devices: [\n");
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DmError::ConfigMalformed { path, .. } if path.ends_with(SUB_DEVICES_FILE)
        ));
    }

    #[test]
    fn test_unresolved_references() {
        let dir = fixture(
            "devices:\n  - name: t1\n    deviceModel: missing\n    accessTemplate: thermo-modbus\n",
        );
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert_eq!(err, DmError::DeviceModelNotExist("missing".into()));

        let dir = fixture(
            "devices:\n  - name: t1\n    deviceModel: thermometer\n    accessTemplate: missing\n",
        );
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert_eq!(err, DmError::AccessTemplateNotExist("missing".into()));
    }

    #[test]
    fn test_duplicate_device() {
        let entry = "  - name: t1\n    deviceModel: thermometer\n    accessTemplate: thermo-modbus\n";
        let dir = fixture(&format!("devices:\n{}{}", entry, entry));
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DmError::ConfigMalformed { message, .. } if message.contains("duplicate")
        ));
    }

    #[test]
    fn test_invalid_property_schema() {
        let dir = fixture("devices: []\n");
        write(&dir, MODELS_FILE, "m:\n  - id: \"1\"\n    name: level\n    type: enum\n");
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DmError::ConfigMalformed { message, .. } if message.contains("enumType")
        ));

        write(&dir, MODELS_FILE, "m:\n  - id: \"1\"\n    name: level\n    type: uint8\n");
        let err = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DmError::ConfigMalformed { message, .. } if message.contains("uint8")
        ));
    }

    #[test]
    fn test_access_config_modes() {
        let devices = "devices:\n  - name: t1\n    deviceModel: thermometer\n    accessTemplate: thermo-modbus\n    accessConfig:\n      zigbee: {}\n";
        let dir = fixture(devices);

        let tables = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap();
        assert_eq!(tables.device("t1").unwrap().access_config, None);

        let err = load_driver_config(dir.path(), "modbus", LoadOptions::strict()).unwrap_err();
        assert!(matches!(
            err,
            DmError::ConfigMalformed { message, .. } if message.contains("zigbee")
        ));
    }

    #[test]
    fn test_strict_keeps_valid_access_config() {
        let devices = "devices:\n  - name: t1\n    deviceModel: thermometer\n    accessTemplate: thermo-modbus\n    accessConfig:\n      modbus:\n        id: 1\n";
        let dir = fixture(devices);
        let tables = load_driver_config(dir.path(), "modbus", LoadOptions::strict()).unwrap();
        let config = tables.device("t1").unwrap().access_config.clone().unwrap();
        assert_eq!(config.protocol(), "modbus");
    }

    #[test]
    fn test_empty_files() {
        let dir = TempDir::new().unwrap();
        for name in [SUB_DEVICES_FILE, MODELS_FILE, ACCESS_TEMPLATE_FILE] {
            write(&dir, name, "");
        }
        let tables = load_driver_config(dir.path(), "modbus", LoadOptions::default()).unwrap();
        assert!(tables.devices.is_empty());
        assert!(tables.models.is_empty());
    }
}
