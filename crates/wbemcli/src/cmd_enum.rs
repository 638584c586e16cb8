use anyhow::{Context, Result};
use tracing::info;
use wbem::{EnumerateInstancesOptions, IterOptions};

use crate::common::{self, InstanceOut, Target};

pub fn run_instances(
    target: &Target,
    class: String,
    deep: bool,
    properties: Option<Vec<String>>,
    batch: u32,
    json: bool,
) -> Result<()> {
    let mut conn = common::connect(target)?;
    let options = EnumerateInstancesOptions {
        deep_inheritance: Some(deep),
        property_list: properties,
        ..EnumerateInstancesOptions::default()
    };
    let iter = IterOptions {
        max_object_count: batch,
        ..IterOptions::default()
    };
    let cursor = conn
        .iter_enumerate_instances(None, class.as_str(), &options, &iter)
        .with_context(|| format!("enumerate instances of {class}"))?;
    let pulled = cursor.is_pulled();
    let instances = cursor
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("enumerate instances of {class}"))?;
    info!(class = %class, count = instances.len(), pulled, "instances enumerated");

    if json {
        let out: Vec<InstanceOut> = instances.iter().map(InstanceOut::from).collect();
        common::print_json(&out)?;
    } else {
        for inst in &instances {
            common::print_instance(inst);
        }
    }
    Ok(())
}

pub fn run_paths(target: &Target, class: String, batch: u32, json: bool) -> Result<()> {
    let mut conn = common::connect(target)?;
    let iter = IterOptions {
        max_object_count: batch,
        ..IterOptions::default()
    };
    let paths = conn
        .iter_enumerate_instance_paths(None, class.as_str(), &iter)
        .with_context(|| format!("enumerate instance paths of {class}"))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("enumerate instance paths of {class}"))?;

    let lines = common::path_strings(&paths);
    if json {
        common::print_json(&lines)?;
    } else {
        for line in lines {
            println!("{line}");
        }
    }
    Ok(())
}
