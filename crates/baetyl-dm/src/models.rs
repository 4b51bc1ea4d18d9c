//! Declarative driver configuration: devices, thing models and access templates.
//!
//! These types mirror the three YAML documents a driver ships with. Field
//! names follow the camelCase spelling of those documents.

use std::collections::BTreeMap;
use std::str::FromStr;

use baetyl_core::Qos;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access_config::AccessConfig;
use crate::error::DmError;
use crate::topic::{self, TopicKind};

/// Property value types of a thing model. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PropertyType {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    String,
    Time,
    Date,
    Enum,
    Array,
    Object,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Time => "time",
            Self::Date => "date",
            Self::Enum => "enum",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl FromStr for PropertyType {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "time" => Self::Time,
            "date" => Self::Date,
            "enum" => Self::Enum,
            "array" => Self::Array,
            "object" => Self::Object,
            other => return Err(DmError::TypeNotSupported(other.to_string())),
        })
    }
}

impl TryFrom<String> for PropertyType {
    type Error = DmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropertyType> for String {
    fn from(ty: PropertyType) -> Self {
        ty.as_str().to_string()
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access mode of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyMode {
    #[default]
    Ro,
    Rw,
}

/// One allowed value of an enum property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: Value,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    #[serde(rename = "type")]
    pub value_type: PropertyType,
    #[serde(default)]
    pub values: Vec<EnumValue>,
}

/// Element schema and length bounds of an array property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayType {
    #[serde(rename = "type")]
    pub element_type: PropertyType,
    #[serde(default)]
    pub min: usize,
    #[serde(default = "default_array_max")]
    pub max: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

fn default_array_max() -> usize {
    usize::MAX
}

/// Schema of one key of an object property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    #[serde(rename = "type")]
    pub value_type: PropertyType,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A property of a thing model or an access template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperty {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    #[serde(default)]
    pub mode: PropertyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Layout key for `time`/`date` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "enumType", default, skip_serializing_if = "Option::is_none")]
    pub enum_type: Option<EnumType>,
    #[serde(rename = "arrayType", default, skip_serializing_if = "Option::is_none")]
    pub array_type: Option<ArrayType>,
    #[serde(rename = "objectType", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<BTreeMap<String, ObjectType>>,
    #[serde(rename = "objectRequired", default, skip_serializing_if = "Vec::is_empty")]
    pub object_required: Vec<String>,
    /// Protocol-specific addressing, opaque to the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor: Option<Value>,
}

impl DeviceProperty {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        property_type: PropertyType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            property_type,
            mode: PropertyMode::Ro,
            unit: None,
            format: None,
            enum_type: None,
            array_type: None,
            object_type: None,
            object_required: Vec::new(),
            visitor: None,
        }
    }

    pub fn with_mode(mut self, mode: PropertyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_enum(mut self, enum_type: EnumType) -> Self {
        self.enum_type = Some(enum_type);
        self
    }

    pub fn with_array(mut self, array_type: ArrayType) -> Self {
        self.array_type = Some(array_type);
        self
    }

    pub fn with_object(mut self, object_type: BTreeMap<String, ObjectType>) -> Self {
        self.object_type = Some(object_type);
        self
    }

    /// Check the structural invariants a loaded property must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err(format!("property '{}' has an empty id", self.name));
        }
        let missing = match self.property_type {
            PropertyType::Enum => self.enum_type.is_none().then_some("enumType"),
            PropertyType::Array => self.array_type.is_none().then_some("arrayType"),
            PropertyType::Object => self.object_type.is_none().then_some("objectType"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(format!(
                "property '{}' of type {} requires {}",
                self.id, self.property_type, field
            ));
        }
        if let Some(array) = &self.array_type {
            if array.min > array.max {
                return Err(format!(
                    "property '{}' has arrayType.min {} > max {}",
                    self.id, array.min, array.max
                ));
            }
        }
        Ok(())
    }
}

/// A topic with its qos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttTopic {
    #[serde(default)]
    pub qos: Qos,
    pub topic: String,
}

impl MqttTopic {
    pub fn new(topic: impl Into<String>, qos: Qos) -> Self {
        Self {
            qos,
            topic: topic.into(),
        }
    }
}

/// The eight topics of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTopic {
    pub delta: MqttTopic,
    pub report: MqttTopic,
    pub event: MqttTopic,
    pub get: MqttTopic,
    #[serde(rename = "getResponse")]
    pub get_response: MqttTopic,
    #[serde(rename = "eventReport")]
    pub event_report: MqttTopic,
    #[serde(rename = "propertyGet")]
    pub property_get: MqttTopic,
    #[serde(rename = "lifecycleReport")]
    pub lifecycle_report: MqttTopic,
}

impl DeviceTopic {
    /// Default topic family `$baetyl/device/<device>/<kind>`.
    ///
    /// Inbound kinds use qos 0, outbound kinds qos 1.
    pub fn for_device(device: &str) -> Self {
        let make = |kind: TopicKind| {
            let qos = if kind.is_inbound() {
                Qos::AtMostOnce
            } else {
                Qos::AtLeastOnce
            };
            MqttTopic::new(topic::device_topic(device, kind), qos)
        };
        Self {
            delta: make(TopicKind::Delta),
            report: make(TopicKind::Report),
            event: make(TopicKind::Event),
            get: make(TopicKind::Get),
            get_response: make(TopicKind::GetResponse),
            event_report: make(TopicKind::EventReport),
            property_get: make(TopicKind::PropertyGet),
            lifecycle_report: make(TopicKind::LifecycleReport),
        }
    }

    pub fn topic(&self, kind: TopicKind) -> &MqttTopic {
        match kind {
            TopicKind::Delta => &self.delta,
            TopicKind::Report => &self.report,
            TopicKind::Event => &self.event,
            TopicKind::Get => &self.get,
            TopicKind::GetResponse => &self.get_response,
            TopicKind::EventReport => &self.event_report,
            TopicKind::PropertyGet => &self.property_get,
            TopicKind::LifecycleReport => &self.lifecycle_report,
        }
    }
}

/// A sub-device entry of `sub_devices.yml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "deviceModel")]
    pub device_model: String,
    #[serde(rename = "accessTemplate")]
    pub access_template: String,
    /// Filled with [`DeviceTopic::for_device`] at load time when absent.
    #[serde(
        rename = "deviceTopic",
        alias = "topics",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub topics: Option<DeviceTopic>,
    #[serde(
        rename = "accessConfig",
        default,
        deserialize_with = "crate::access_config::deserialize_permissive",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_config: Option<AccessConfig>,
}

impl DeviceInfo {
    pub fn new(
        name: impl Into<String>,
        device_model: impl Into<String>,
        access_template: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            topics: Some(DeviceTopic::for_device(&name)),
            name,
            version: String::new(),
            device_model: device_model.into(),
            access_template: access_template.into(),
            access_config: None,
        }
    }

    /// Topics of this device, falling back to the default family.
    pub fn device_topic(&self) -> DeviceTopic {
        self.topics
            .clone()
            .unwrap_or_else(|| DeviceTopic::for_device(&self.name))
    }
}

/// How an attribute of the thing model maps onto device properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingType {
    #[default]
    None,
    /// The raw value passes through unchanged.
    Value,
    /// The value is computed by the mapping expression.
    Calculate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMapping {
    pub attribute: String,
    #[serde(rename = "type", default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub expression: String,
    /// Decimal places kept for float results; 0 keeps full precision.
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub deviation: f64,
    #[serde(rename = "silentWin", default)]
    pub silent_win: i64,
}

impl ModelMapping {
    pub fn new(
        attribute: impl Into<String>,
        mapping_type: MappingType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            mapping_type,
            expression: expression.into(),
            precision: 0,
            deviation: 0.0,
            silent_win: 0,
        }
    }
}

/// Binding between raw device properties and model attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccessTemplate {
    /// Set from the map key at load time.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub properties: Vec<DeviceProperty>,
    #[serde(default)]
    pub mappings: Vec<ModelMapping>,
}

impl AccessTemplate {
    pub fn property(&self, id: &str) -> Option<&DeviceProperty> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn mapping(&self, attribute: &str) -> Option<&ModelMapping> {
        self.mappings.iter().find(|m| m.attribute == attribute)
    }
}
