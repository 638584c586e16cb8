use anyhow::{Context, Result};
use serde::Serialize;
use wbem::{CimClassName, GetClassOptions};

use crate::common::{self, ClassOut, Target};

pub fn run_names(target: &Target, class: Option<String>, deep: bool, json: bool) -> Result<()> {
    let mut conn = common::connect(target)?;
    let mut names = conn
        .enumerate_class_names(None, class.map(CimClassName::new), Some(deep))
        .context("enumerate class names")?;
    names.sort_by_key(|n| n.to_ascii_lowercase());

    if json {
        common::print_json(&names)?;
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

pub fn run_get(target: &Target, class: String, local_only: bool, json: bool) -> Result<()> {
    let mut conn = common::connect(target)?;
    let options = GetClassOptions {
        local_only: Some(local_only),
        include_qualifiers: Some(true),
        ..GetClassOptions::default()
    };
    let klass = conn
        .get_class(None, class.as_str(), &options)
        .with_context(|| format!("get class {class}"))?;

    let out = ClassOut::from(&klass);
    if json {
        common::print_json(&out)?;
    } else {
        match &out.superclass {
            Some(sup) => println!("class {} : {sup}", out.classname),
            None => println!("class {}", out.classname),
        }
        for (name, ty) in &out.properties {
            println!("  {ty} {name}");
        }
        for method in &out.methods {
            println!("  {method}()");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct SubclassAnswer<'a> {
    class: &'a str,
    superclass: &'a str,
    is_subclass: bool,
}

pub fn run_is_subclass(target: &Target, class: String, superclass: String, json: bool) -> Result<()> {
    let mut conn = common::connect(target)?;
    let is_subclass = conn
        .is_subclass(None, class.as_str(), &superclass)
        .with_context(|| format!("check whether {class} derives from {superclass}"))?;

    if json {
        common::print_json(&SubclassAnswer {
            class: &class,
            superclass: &superclass,
            is_subclass,
        })?;
    } else {
        println!("{is_subclass}");
    }
    Ok(())
}
