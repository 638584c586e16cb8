use anyhow::{Context, Result};
use serde::Serialize;

use crate::common::{self, Target};

#[derive(Serialize)]
struct QualifierOut {
    name: String,
    #[serde(rename = "type")]
    cim_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
}

pub fn run(target: &Target, json: bool) -> Result<()> {
    let mut conn = common::connect(target)?;
    let mut decls = conn
        .enumerate_qualifiers(None)
        .context("enumerate qualifier declarations")?;
    decls.sort_by_key(|d| d.name.to_ascii_lowercase());

    let out: Vec<QualifierOut> = decls
        .iter()
        .map(|d| QualifierOut {
            name: d.name.clone(),
            cim_type: if d.is_array {
                format!("{}[]", d.cim_type)
            } else {
                d.cim_type.to_string()
            },
            default: d.value.as_ref().map(ToString::to_string),
        })
        .collect();
    if json {
        common::print_json(&out)?;
    } else {
        for q in out {
            match q.default {
                Some(default) => println!("{} {} = {default}", q.cim_type, q.name),
                None => println!("{} {}", q.cim_type, q.name),
            }
        }
    }
    Ok(())
}
