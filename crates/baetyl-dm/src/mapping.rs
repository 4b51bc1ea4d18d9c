//! Lookups between model attributes and raw device properties of an
//! access template.

use crate::error::{DmError, DmResult};
use crate::expression::{exec_mapping, parse_expression, round_decimals};
use crate::models::{AccessTemplate, MappingType};
use crate::value::PropertyValue;

/// Name of the template property with ID `id`.
pub fn get_mapping_name(id: &str, template: &AccessTemplate) -> DmResult<String> {
    template
        .property(id)
        .map(|p| p.name.clone())
        .ok_or_else(|| DmError::UnknownPropertyId(id.to_string()))
}

/// First property ID referenced by the mapping of `attribute`.
pub fn get_config_id_by_model_name(attribute: &str, template: &AccessTemplate) -> DmResult<String> {
    let mapping = template
        .mapping(attribute)
        .ok_or_else(|| DmError::ConfigIdNotExist(attribute.to_string()))?;
    let expression = parse_expression(&mapping.expression)?;
    expression
        .args
        .into_iter()
        .next()
        .ok_or_else(|| DmError::ConfigIdNotExist(attribute.to_string()))
}

/// Apply the mapping of `attribute` to a raw `value`.
///
/// `value` mappings return the input unchanged. Other mappings evaluate the
/// expression with every `x<ID>` bound to `value`; the result takes the type
/// of the first referenced property and float results are rounded to the
/// mapping's precision when one is set.
pub fn get_prop_value_by_model_name(
    attribute: &str,
    value: &PropertyValue,
    template: &AccessTemplate,
) -> DmResult<PropertyValue> {
    let mapping = template
        .mapping(attribute)
        .ok_or_else(|| DmError::PropertyValueNotExist(attribute.to_string()))?;
    if mapping.mapping_type == MappingType::Value {
        return Ok(value.clone());
    }

    let expression = parse_expression(&mapping.expression)?;
    let id = expression
        .args
        .first()
        .ok_or_else(|| DmError::ConfigIdNotExist(attribute.to_string()))?;
    let property = template
        .property(id)
        .ok_or_else(|| DmError::UnknownPropertyId(id.clone()))?;

    let raw = value.to_string();
    let args = expression.bind(|_| raw.clone());
    let result = exec_mapping(expression.method, &args, property.property_type)?;

    if mapping.precision == 0 {
        return Ok(result);
    }
    Ok(match result {
        PropertyValue::Float64(v) => PropertyValue::Float64(round_decimals(v, mapping.precision)),
        PropertyValue::Float32(v) => {
            let rounded = round_decimals(v as f64, mapping.precision);
            PropertyValue::Float32(rounded as f32)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceProperty, ModelMapping, PropertyType};

    fn template() -> AccessTemplate {
        let mut precise = ModelMapping::new("pressure", MappingType::Calculate, "ratio(x2,3)");
        precise.precision = 2;
        AccessTemplate {
            name: "boiler".into(),
            version: "1".into(),
            properties: vec![
                DeviceProperty::new("1", "raw-temperature", PropertyType::Float64),
                DeviceProperty::new("2", "raw-pressure", PropertyType::Float32),
                DeviceProperty::new("3", "raw-count", PropertyType::Int16),
            ],
            mappings: vec![
                ModelMapping::new("temperature", MappingType::Calculate, "product(x1,10)"),
                ModelMapping::new("status", MappingType::Value, "x1"),
                ModelMapping::new("count", MappingType::Calculate, "sum(5,x3)"),
                ModelMapping::new("constant", MappingType::Calculate, "sum(1,2)"),
                precise,
            ],
        }
    }

    #[test]
    fn test_get_mapping_name() {
        let tpl = template();
        assert_eq!(get_mapping_name("2", &tpl).unwrap(), "raw-pressure");
        assert_eq!(get_mapping_name("9", &tpl), Err(DmError::UnknownPropertyId("9".into())));
    }

    #[test]
    fn test_config_id_round_trip() {
        let tpl = template();
        assert_eq!(get_config_id_by_model_name("count", &tpl).unwrap(), "3");
        let id = get_config_id_by_model_name("temperature", &tpl).unwrap();
        assert_eq!(get_mapping_name(&id, &tpl).unwrap(), "raw-temperature");

        assert!(matches!(
            get_config_id_by_model_name("missing", &tpl),
            Err(DmError::ConfigIdNotExist(_))
        ));
        assert!(matches!(
            get_config_id_by_model_name("constant", &tpl),
            Err(DmError::ConfigIdNotExist(_))
        ));
    }

    #[test]
    fn test_value_mapping_passes_through() {
        let tpl = template();
        for value in [
            PropertyValue::Bool(true),
            PropertyValue::String("on".into()),
            PropertyValue::Float32(1.5),
            PropertyValue::Null,
        ] {
            assert_eq!(get_prop_value_by_model_name("status", &value, &tpl).unwrap(), value);
        }
    }

    #[test]
    fn test_calculate_mapping() {
        let tpl = template();
        assert_eq!(
            get_prop_value_by_model_name("temperature", &PropertyValue::Float64(2.5), &tpl)
                .unwrap(),
            PropertyValue::Float64(25.0)
        );
        assert_eq!(
            get_prop_value_by_model_name("count", &PropertyValue::Int64(7), &tpl).unwrap(),
            PropertyValue::Int16(12)
        );
    }

    #[test]
    fn test_precision_rounds_float_results() {
        let tpl = template();
        assert_eq!(
            get_prop_value_by_model_name("pressure", &PropertyValue::Int64(10), &tpl).unwrap(),
            PropertyValue::Float32(3.33)
        );
    }

    #[test]
    fn test_missing_mapping() {
        let tpl = template();
        assert_eq!(
            get_prop_value_by_model_name("humidity", &PropertyValue::Int64(1), &tpl),
            Err(DmError::PropertyValueNotExist("humidity".into()))
        );
    }
}
