use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use wbem::{CimClass, CimInstance, CimInstanceName, CimValue, ConnectionConfig, WbemConnection};

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub namespace: Option<String>,
    pub no_verify: bool,
    pub timeout_s: Option<u64>,
}

pub fn connect(target: &Target) -> Result<WbemConnection> {
    let mut config = ConnectionConfig {
        no_verification: target.no_verify,
        timeout: target.timeout_s.map(Duration::from_secs),
        ..ConnectionConfig::default()
    };
    if let Some(user) = &target.user {
        config.credentials = Some((user.clone(), target.password.clone().unwrap_or_default()));
    }
    if let Some(namespace) = &target.namespace {
        config.default_namespace = namespace.clone();
    }
    WbemConnection::new(&target.url, config)
        .with_context(|| format!("connect to {}", target.url))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialise JSON output")?;
    println!("{text}");
    Ok(())
}

pub fn value_json(value: &CimValue) -> Value {
    match value {
        CimValue::Boolean(b) => Value::Bool(*b),
        CimValue::Uint8(n) => Value::from(*n),
        CimValue::Sint8(n) => Value::from(*n),
        CimValue::Uint16(n) => Value::from(*n),
        CimValue::Sint16(n) => Value::from(*n),
        CimValue::Uint32(n) => Value::from(*n),
        CimValue::Sint32(n) => Value::from(*n),
        CimValue::Uint64(n) => Value::from(*n),
        CimValue::Sint64(n) => Value::from(*n),
        CimValue::Real32(x) => Value::from(f64::from(*x)),
        CimValue::Real64(x) => Value::from(*x),
        CimValue::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| item.as_ref().map(value_json).unwrap_or(Value::Null))
                .collect(),
        ),
        CimValue::Instance(inst) => serde_json::to_value(InstanceOut::from(inst.as_ref()))
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct InstanceOut {
    pub classname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub properties: BTreeMap<String, Value>,
}

impl From<&CimInstance> for InstanceOut {
    fn from(inst: &CimInstance) -> Self {
        Self {
            classname: inst.classname.clone(),
            path: inst.path.as_ref().map(ToString::to_string),
            properties: inst
                .properties
                .iter()
                .map(|(name, prop)| {
                    let value = prop.value.as_ref().map(value_json).unwrap_or(Value::Null);
                    (name.to_string(), value)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClassOut {
    pub classname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superclass: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub methods: Vec<String>,
}

impl From<&CimClass> for ClassOut {
    fn from(class: &CimClass) -> Self {
        Self {
            classname: class.classname.clone(),
            superclass: class.superclass.clone(),
            properties: class
                .properties
                .iter()
                .map(|(name, prop)| {
                    let ty = if prop.is_array {
                        format!("{}[]", prop.cim_type)
                    } else {
                        prop.cim_type.to_string()
                    };
                    (name.to_string(), ty)
                })
                .collect(),
            methods: class.methods.keys().map(str::to_string).collect(),
        }
    }
}

pub fn print_instance(inst: &CimInstance) {
    match &inst.path {
        Some(path) => println!("instance of {} ({path})", inst.classname),
        None => println!("instance of {}", inst.classname),
    }
    for (name, prop) in inst.properties.iter() {
        match &prop.value {
            Some(value) => println!("  {name} = {value}"),
            None => println!("  {name} = NULL"),
        }
    }
}

pub fn path_strings(paths: &[CimInstanceName]) -> Vec<String> {
    paths.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_stay_numbers() {
        assert_eq!(value_json(&CimValue::Uint16(7)), Value::from(7));
        assert_eq!(value_json(&CimValue::Boolean(true)), Value::Bool(true));
        let arr = CimValue::Array(vec![Some(CimValue::Sint8(-1)), None]);
        assert_eq!(value_json(&arr), serde_json::json!([-1, null]));
        assert_eq!(value_json(&CimValue::from("x")), Value::from("x"));
    }

    #[test]
    fn instance_output_lists_properties() {
        let inst = CimInstance::new("CIM_Foo").with_property("Name", "a").unwrap();
        let out = InstanceOut::from(&inst);
        assert_eq!(out.classname, "CIM_Foo");
        assert_eq!(out.properties.get("Name"), Some(&Value::from("a")));
        assert!(out.path.is_none());
    }
}
