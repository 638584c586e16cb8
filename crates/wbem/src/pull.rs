//! Pull operations (DSP0200 Open/Pull/Close).
//!
//! An Open call returns the first batch together with an
//! [`EnumerationContext`] unless the server already reached the end of the
//! sequence. Pull and Close consume the context, so a context that was
//! exhausted or closed cannot be handed to the server again.

use std::fmt;

use cim_types::{CimClass, CimClassName, CimInstance, CimInstanceName, CimValue};
use cimxml::{Item, MethodResponse, RequestBuilder};
use tracing::trace;

use crate::connection::{arg, collect_items, require_name, stamp_instance_path, WbemConnection};
use crate::error::Error;
use crate::options::{AssociatorsOptions, EnumerateInstancesOptions, OpenOptions, ReferencesOptions};

/// Server-side cursor of an open enumeration session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationContext {
    context: String,
    namespace: String,
}

impl EnumerationContext {
    /// Resume a session whose context string was kept elsewhere.
    pub fn new<C: Into<String>, N: Into<String>>(context: C, namespace: N) -> Self {
        Self {
            context: context.into(),
            namespace: namespace.into(),
        }
    }

    /// Opaque value issued by the server.
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// One batch of a pull session. `context` is present exactly when `eos`
/// is false.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResult<T> {
    pub items: Vec<T>,
    pub eos: bool,
    pub context: Option<EnumerationContext>,
}

/// First batch of OpenQueryInstances.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub result: PullResult<CimInstance>,
    /// Class describing the query result, when it was requested.
    pub query_result_class: Option<CimClass>,
}

fn out_bool(method: &str, response: &MethodResponse, name: &str) -> Result<Option<bool>, Error> {
    let Some(param) = response.out_param(name) else {
        return Ok(None);
    };
    match &param.value {
        Some(CimValue::Boolean(flag)) => Ok(Some(*flag)),
        Some(CimValue::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(Error::cimxml(format!(
                "{method} response has invalid {name} value {text:?}"
            ))),
        },
        other => Err(Error::cimxml(format!(
            "{method} response has invalid {name} value {other:?}"
        ))),
    }
}

fn out_string(method: &str, response: &MethodResponse, name: &str) -> Result<Option<String>, Error> {
    let Some(param) = response.out_param(name) else {
        return Ok(None);
    };
    match &param.value {
        Some(CimValue::String(text)) => Ok(Some(text.clone())),
        None => Ok(None),
        other => Err(Error::cimxml(format!(
            "{method} response has invalid {name} value {other:?}"
        ))),
    }
}

/// End-of-sequence flag and follow-up context of an Open or Pull response.
fn pull_state(
    method: &str,
    response: &MethodResponse,
    namespace: &str,
) -> Result<(bool, Option<EnumerationContext>), Error> {
    let eos = out_bool(method, response, "EndOfSequence")?;
    let context = out_string(method, response, "EnumerationContext")?;
    if eos.is_none() && response.out_param("EnumerationContext").is_none() {
        return Err(Error::cimxml(format!(
            "{method} response has neither EndOfSequence nor EnumerationContext"
        )));
    }
    let eos = eos.unwrap_or(false);
    if eos {
        return Ok((true, None));
    }
    match context {
        Some(context) => Ok((false, Some(EnumerationContext::new(context, namespace)))),
        None => Err(Error::cimxml(format!(
            "{method} response has EndOfSequence false but no EnumerationContext"
        ))),
    }
}

fn with_open_options(req: RequestBuilder, options: &OpenOptions) -> RequestBuilder {
    req.iparam_str("FilterQueryLanguage", options.filter_query_language.as_deref())
        .iparam_str("FilterQuery", options.filter_query.as_deref())
        .iparam_u32("OperationTimeout", options.operation_timeout)
        .iparam_bool("ContinueOnError", options.continue_on_error)
        .iparam_u32("MaxObjectCount", options.max_object_count)
}

fn instances_with_path(method: &str, items: Option<Vec<Item>>, namespace: &str) -> Result<Vec<CimInstance>, Error> {
    collect_items(method, "instance with path", items, |item| match item {
        Item::Instance(mut instance) => match instance.path.as_mut() {
            Some(path) => {
                stamp_instance_path(path, namespace);
                Ok(instance)
            }
            None => Err(Item::Instance(instance)),
        },
        other => Err(other),
    })
}

fn instance_paths(method: &str, items: Option<Vec<Item>>, namespace: &str) -> Result<Vec<CimInstanceName>, Error> {
    collect_items(method, "instance path", items, |item| match item {
        Item::InstanceName(mut path) => {
            stamp_instance_path(&mut path, namespace);
            Ok(path)
        }
        other => Err(other),
    })
}

fn plain_instances(method: &str, items: Option<Vec<Item>>) -> Result<Vec<CimInstance>, Error> {
    collect_items(method, "instance", items, |item| match item {
        Item::Instance(instance) => Ok(instance),
        other => Err(other),
    })
}

impl WbemConnection {
    fn pull_batch<T>(
        &mut self,
        method: &'static str,
        namespace: &str,
        params: impl FnOnce(RequestBuilder) -> RequestBuilder,
        convert: impl FnOnce(&str, Option<Vec<Item>>, &str) -> Result<Vec<T>, Error>,
    ) -> Result<(PullResult<T>, MethodResponse), Error> {
        let mut response = self.imethodcall(method, namespace, params)?;
        let (eos, context) = pull_state(method, &response, namespace)?;
        let items = convert(method, response.items.take(), namespace)?;
        trace!(method, count = items.len(), eos, "pull batch received");
        Ok((PullResult { items, eos, context }, response))
    }

    pub fn open_enumerate_instances(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        options: &EnumerateInstancesOptions,
        open: &OpenOptions,
    ) -> Result<PullResult<CimInstance>, Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let args = vec![
            arg("ClassName", &class),
            arg("namespace", &namespace),
            arg("options", options),
            arg("open", open),
        ];
        self.operation("OpenEnumerateInstances", args, |conn| {
            let (result, _) = conn.pull_batch(
                "OpenEnumerateInstances",
                &namespace,
                |req| {
                    let req = req
                        .iparam_classname("ClassName", Some(&class.classname))
                        .iparam_bool("DeepInheritance", options.deep_inheritance)
                        .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                        .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                        .iparam_strings("PropertyList", options.property_list.as_deref());
                    with_open_options(req, open)
                },
                |method, items, ns| instances_with_path(method, items, ns),
            )?;
            Ok(result)
        })
    }

    pub fn open_enumerate_instance_paths(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        open: &OpenOptions,
    ) -> Result<PullResult<CimInstanceName>, Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let args = vec![arg("ClassName", &class), arg("namespace", &namespace), arg("open", open)];
        self.operation("OpenEnumerateInstancePaths", args, |conn| {
            let (result, _) = conn.pull_batch(
                "OpenEnumerateInstancePaths",
                &namespace,
                |req| with_open_options(req.iparam_classname("ClassName", Some(&class.classname)), open),
                |method, items, ns| instance_paths(method, items, ns),
            )?;
            Ok(result)
        })
    }

    pub fn open_associator_instances(
        &mut self,
        instance_name: &CimInstanceName,
        options: &AssociatorsOptions,
        open: &OpenOptions,
    ) -> Result<PullResult<CimInstance>, Error> {
        let namespace = self.resolve_namespace(None, instance_name.namespace.as_deref());
        let args = vec![arg("InstanceName", instance_name), arg("options", options), arg("open", open)];
        self.operation("OpenAssociatorInstances", args, |conn| {
            let (result, _) = conn.pull_batch(
                "OpenAssociatorInstances",
                &namespace,
                |req| {
                    let req = req
                        .iparam("InstanceName", Some(instance_name.local().to_element()))
                        .iparam_classname("AssocClass", options.assoc_class.as_deref())
                        .iparam_classname("ResultClass", options.result_class.as_deref())
                        .iparam_str("Role", options.role.as_deref())
                        .iparam_str("ResultRole", options.result_role.as_deref())
                        .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                        .iparam_strings("PropertyList", options.property_list.as_deref());
                    with_open_options(req, open)
                },
                |method, items, ns| instances_with_path(method, items, ns),
            )?;
            Ok(result)
        })
    }

    pub fn open_associator_instance_paths(
        &mut self,
        instance_name: &CimInstanceName,
        options: &AssociatorsOptions,
        open: &OpenOptions,
    ) -> Result<PullResult<CimInstanceName>, Error> {
        let namespace = self.resolve_namespace(None, instance_name.namespace.as_deref());
        let args = vec![arg("InstanceName", instance_name), arg("options", options), arg("open", open)];
        self.operation("OpenAssociatorInstancePaths", args, |conn| {
            let (result, _) = conn.pull_batch(
                "OpenAssociatorInstancePaths",
                &namespace,
                |req| {
                    let req = req
                        .iparam("InstanceName", Some(instance_name.local().to_element()))
                        .iparam_classname("AssocClass", options.assoc_class.as_deref())
                        .iparam_classname("ResultClass", options.result_class.as_deref())
                        .iparam_str("Role", options.role.as_deref())
                        .iparam_str("ResultRole", options.result_role.as_deref());
                    with_open_options(req, open)
                },
                |method, items, ns| instance_paths(method, items, ns),
            )?;
            Ok(result)
        })
    }

    pub fn open_reference_instances(
        &mut self,
        instance_name: &CimInstanceName,
        options: &ReferencesOptions,
        open: &OpenOptions,
    ) -> Result<PullResult<CimInstance>, Error> {
        let namespace = self.resolve_namespace(None, instance_name.namespace.as_deref());
        let args = vec![arg("InstanceName", instance_name), arg("options", options), arg("open", open)];
        self.operation("OpenReferenceInstances", args, |conn| {
            let (result, _) = conn.pull_batch(
                "OpenReferenceInstances",
                &namespace,
                |req| {
                    let req = req
                        .iparam("InstanceName", Some(instance_name.local().to_element()))
                        .iparam_classname("ResultClass", options.result_class.as_deref())
                        .iparam_str("Role", options.role.as_deref())
                        .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                        .iparam_strings("PropertyList", options.property_list.as_deref());
                    with_open_options(req, open)
                },
                |method, items, ns| instances_with_path(method, items, ns),
            )?;
            Ok(result)
        })
    }

    pub fn open_reference_instance_paths(
        &mut self,
        instance_name: &CimInstanceName,
        options: &ReferencesOptions,
        open: &OpenOptions,
    ) -> Result<PullResult<CimInstanceName>, Error> {
        let namespace = self.resolve_namespace(None, instance_name.namespace.as_deref());
        let args = vec![arg("InstanceName", instance_name), arg("options", options), arg("open", open)];
        self.operation("OpenReferenceInstancePaths", args, |conn| {
            let (result, _) = conn.pull_batch(
                "OpenReferenceInstancePaths",
                &namespace,
                |req| {
                    let req = req
                        .iparam("InstanceName", Some(instance_name.local().to_element()))
                        .iparam_classname("ResultClass", options.result_class.as_deref())
                        .iparam_str("Role", options.role.as_deref());
                    with_open_options(req, open)
                },
                |method, items, ns| instance_paths(method, items, ns),
            )?;
            Ok(result)
        })
    }

    /// Open a query session. The query travels as FilterQuery, so the
    /// filter fields of `open` are not used.
    pub fn open_query_instances(
        &mut self,
        namespace: Option<&str>,
        query_language: &str,
        query: &str,
        return_query_result_class: Option<bool>,
        open: &OpenOptions,
    ) -> Result<QueryResult, Error> {
        require_name("FilterQueryLanguage", query_language)?;
        let namespace = self.resolve_namespace(namespace, None);
        let args = vec![
            arg("FilterQueryLanguage", query_language),
            arg("FilterQuery", query),
            arg("ReturnQueryResultClass", return_query_result_class),
            arg("namespace", &namespace),
            arg("open", open),
        ];
        self.operation("OpenQueryInstances", args, |conn| {
            let (result, response) = conn.pull_batch(
                "OpenQueryInstances",
                &namespace,
                |req| {
                    req.iparam_str("FilterQueryLanguage", Some(query_language))
                        .iparam_str("FilterQuery", Some(query))
                        .iparam_bool("ReturnQueryResultClass", return_query_result_class)
                        .iparam_u32("OperationTimeout", open.operation_timeout)
                        .iparam_bool("ContinueOnError", open.continue_on_error)
                        .iparam_u32("MaxObjectCount", open.max_object_count)
                },
                |method, items, _| plain_instances(method, items),
            )?;
            let query_result_class = match response.out_param("QueryResultClass").map(|p| &p.value) {
                None | Some(None) => None,
                Some(Some(CimValue::Class(class))) => Some(class.as_ref().clone()),
                Some(Some(other)) => {
                    return Err(Error::cimxml(format!(
                        "OpenQueryInstances response has a QueryResultClass that is not a class: {other:?}"
                    )))
                }
            };
            Ok(QueryResult {
                result,
                query_result_class,
            })
        })
    }

    fn pull<T>(
        &mut self,
        method: &'static str,
        context: EnumerationContext,
        max_object_count: Option<u32>,
        convert: impl FnOnce(&str, Option<Vec<Item>>, &str) -> Result<Vec<T>, Error>,
    ) -> Result<PullResult<T>, Error>
    where
        T: fmt::Debug,
    {
        let args = vec![arg("context", &context), arg("MaxObjectCount", max_object_count)];
        self.operation(method, args, |conn| {
            let (result, _) = conn.pull_batch(
                method,
                &context.namespace,
                |req| {
                    req.iparam_str("EnumerationContext", Some(&context.context))
                        .iparam_u32("MaxObjectCount", max_object_count)
                },
                convert,
            )?;
            Ok(result)
        })
    }

    /// Next batch of an OpenEnumerateInstances, OpenAssociatorInstances or
    /// OpenReferenceInstances session.
    pub fn pull_instances_with_path(
        &mut self,
        context: EnumerationContext,
        max_object_count: Option<u32>,
    ) -> Result<PullResult<CimInstance>, Error> {
        self.pull("PullInstancesWithPath", context, max_object_count, instances_with_path)
    }

    /// Next batch of a session that returns instance paths.
    pub fn pull_instance_paths(
        &mut self,
        context: EnumerationContext,
        max_object_count: Option<u32>,
    ) -> Result<PullResult<CimInstanceName>, Error> {
        self.pull("PullInstancePaths", context, max_object_count, instance_paths)
    }

    /// Next batch of an OpenQueryInstances session.
    pub fn pull_instances(
        &mut self,
        context: EnumerationContext,
        max_object_count: Option<u32>,
    ) -> Result<PullResult<CimInstance>, Error> {
        self.pull("PullInstances", context, max_object_count, |method, items, _| {
            plain_instances(method, items)
        })
    }

    /// End a session before its last batch.
    pub fn close_enumeration(&mut self, context: EnumerationContext) -> Result<(), Error> {
        let args = vec![arg("context", &context)];
        self.operation("CloseEnumeration", args, |conn| {
            conn.imethodcall("CloseEnumeration", &context.namespace, |req| {
                req.iparam_str("EnumerationContext", Some(&context.context))
            })?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cim_types::CimType;
    use cimxml::{MethodKind, ParamValue};

    fn response(params: Vec<(&str, Option<CimValue>)>) -> MethodResponse {
        MethodResponse {
            kind: MethodKind::Intrinsic,
            name: "PullInstancePaths".into(),
            error: None,
            items: None,
            return_value: None,
            out_params: params
                .into_iter()
                .map(|(name, value)| ParamValue {
                    name: name.into(),
                    param_type: Some(CimType::String),
                    embedded_object: None,
                    value,
                })
                .collect(),
        }
    }

    #[test]
    fn end_of_sequence_drops_the_context() {
        let rsp = response(vec![
            ("EndOfSequence", Some(CimValue::String("TRUE".into()))),
            ("EnumerationContext", Some(CimValue::String(String::new()))),
        ]);
        assert_eq!(pull_state("Pull", &rsp, "root/cimv2").unwrap(), (true, None));
    }

    #[test]
    fn open_context_keeps_the_namespace() {
        let rsp = response(vec![
            ("EndOfSequence", Some(CimValue::Boolean(false))),
            ("EnumerationContext", Some(CimValue::String("ctx-1".into()))),
        ]);
        let (eos, ctx) = pull_state("Pull", &rsp, "root/interop").unwrap();
        assert!(!eos);
        let ctx = ctx.unwrap();
        assert_eq!(ctx.context(), "ctx-1");
        assert_eq!(ctx.namespace(), "root/interop");
    }

    #[test]
    fn inconsistent_pull_state_is_rejected() {
        let neither = response(vec![]);
        assert!(pull_state("Pull", &neither, "ns").is_err());

        let no_context = response(vec![("EndOfSequence", Some(CimValue::String("false".into())))]);
        let err = pull_state("Pull", &no_context, "ns").unwrap_err();
        assert!(err.to_string().contains("no EnumerationContext"));

        let garbage = response(vec![("EndOfSequence", Some(CimValue::String("maybe".into())))]);
        assert!(pull_state("Pull", &garbage, "ns").is_err());
    }
}
