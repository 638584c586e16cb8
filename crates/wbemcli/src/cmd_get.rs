use anyhow::{Context, Result};
use wbem::{CimInstanceName, GetInstanceOptions};

use crate::common::{self, InstanceOut, Target};

pub fn run(target: &Target, uri: String, properties: Option<Vec<String>>, json: bool) -> Result<()> {
    let name = CimInstanceName::from_wbem_uri(&uri).with_context(|| format!("parse instance path {uri}"))?;
    let mut conn = common::connect(target)?;
    let options = GetInstanceOptions {
        property_list: properties,
        ..GetInstanceOptions::default()
    };
    let inst = conn
        .get_instance(&name, &options)
        .with_context(|| format!("get instance {name}"))?;

    if json {
        common::print_json(&InstanceOut::from(&inst))?;
    } else {
        common::print_instance(&inst);
    }
    Ok(())
}
