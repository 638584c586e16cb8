//! Traditional intrinsic operations, extrinsic method invocation and
//! indication export.

use cim_types::{
    CimClass, CimClassName, CimInstance, CimInstanceName, CimQualifierDeclaration, CimValue,
    Element, NocaseMap, ObjectPath,
};
use cimxml::Item;
use tracing::debug;

use crate::connection::{
    arg, collect_items, require_name, single_item, stamp_instance_path, unexpected_item,
    WbemConnection,
};
use crate::error::Error;
use crate::options::{
    AssociatorsOptions, EnumerateClassesOptions, EnumerateInstancesOptions, GetClassOptions,
    GetInstanceOptions, ModifyInstanceOptions, ReferencesOptions,
};

/// One result of Associators or References.
///
/// The variant follows the source object: an instance source yields
/// instances, a class source yields classes with their paths.
#[derive(Debug, Clone, PartialEq)]
pub enum AssociatedObject {
    Instance(CimInstance),
    Class(CimClassName, CimClass),
}

/// Outcome of an extrinsic method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResult {
    pub return_value: Option<CimValue>,
    pub out_params: NocaseMap<Option<CimValue>>,
}

/// `INSTANCENAME` or `CLASSNAME` for an ObjectName parameter, without host
/// or namespace.
fn object_name_element(object: &ObjectPath) -> Element {
    object.local().to_element()
}

impl WbemConnection {
    /// Stamp the namespace onto a returned instance path, and require one.
    fn named_instance(method: &str, item: Item, namespace: &str) -> Result<CimInstance, Error> {
        match item {
            Item::Instance(mut instance) => {
                let path = instance.path.as_mut().ok_or_else(|| {
                    Error::cimxml(format!(
                        "{method} response contains an instance of {} without a path",
                        instance.classname
                    ))
                })?;
                stamp_instance_path(path, namespace);
                Ok(instance)
            }
            other => Err(unexpected_item(method, "instance with path", &other)),
        }
    }

    /// Shape check and path stamping for Associators/References results.
    fn associated_objects(
        &self,
        method: &str,
        class_level: bool,
        items: Option<Vec<Item>>,
        namespace: &str,
    ) -> Result<Vec<AssociatedObject>, Error> {
        let expected = if class_level {
            "class with path"
        } else {
            "instance with path"
        };
        collect_items(method, expected, items, |item| {
            match item {
                Item::Instance(mut instance) if !class_level && instance.path.is_some() => {
                    if let Some(path) = instance.path.as_mut() {
                        stamp_instance_path(path, namespace);
                    }
                    Ok(AssociatedObject::Instance(instance))
                }
                Item::Class(mut class) if class_level => match class.path.take() {
                    Some(mut path) => {
                        self.stamp_class_path(&mut path, namespace);
                        class.path = Some(path.clone());
                        Ok(AssociatedObject::Class(path, class))
                    }
                    None => Err(Item::Class(class)),
                },
                other => Err(other),
            }
        })
    }

    fn associated_names(
        &self,
        method: &str,
        class_level: bool,
        items: Option<Vec<Item>>,
        namespace: &str,
    ) -> Result<Vec<ObjectPath>, Error> {
        let expected = if class_level {
            "class path"
        } else {
            "instance path"
        };
        collect_items(method, expected, items, |item| {
            match item {
                Item::InstanceName(mut path) if !class_level => {
                    stamp_instance_path(&mut path, namespace);
                    Ok(ObjectPath::Instance(path))
                }
                Item::ClassName(mut path) if class_level => {
                    self.stamp_class_path(&mut path, namespace);
                    Ok(ObjectPath::Class(path))
                }
                other => Err(other),
            }
        })
    }

    pub fn get_instance(
        &mut self,
        instance_name: &CimInstanceName,
        options: &GetInstanceOptions,
    ) -> Result<CimInstance, Error> {
        let namespace = self.resolve_namespace(None, instance_name.namespace.as_deref());
        let args = vec![arg("InstanceName", instance_name), arg("options", options)];
        self.operation("GetInstance", args, |conn| {
            let local = instance_name.local();
            let response = conn.imethodcall("GetInstance", &namespace, |req| {
                req.iparam("InstanceName", Some(local.to_element()))
                    .iparam_bool("LocalOnly", options.local_only)
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                    .iparam_strings("PropertyList", options.property_list.as_deref())
            })?;
            let mut instance = match single_item("GetInstance", response)? {
                Item::Instance(instance) => instance,
                other => return Err(unexpected_item("GetInstance", "instance", &other)),
            };
            let mut path = local;
            path.namespace = Some(namespace.clone());
            instance.path = Some(path);
            Ok(instance)
        })
    }

    pub fn enumerate_instances(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        options: &EnumerateInstancesOptions,
    ) -> Result<Vec<CimInstance>, Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let args = vec![arg("ClassName", &class), arg("namespace", &namespace), arg("options", options)];
        self.operation("EnumerateInstances", args, |conn| {
            let response = conn.imethodcall("EnumerateInstances", &namespace, |req| {
                req.iparam_classname("ClassName", Some(&class.classname))
                    .iparam_bool("LocalOnly", options.local_only)
                    .iparam_bool("DeepInheritance", options.deep_inheritance)
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                    .iparam_strings("PropertyList", options.property_list.as_deref())
            })?;
            response
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|item| Self::named_instance("EnumerateInstances", item, &namespace))
                .collect()
        })
    }

    pub fn enumerate_instance_names(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
    ) -> Result<Vec<CimInstanceName>, Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let args = vec![arg("ClassName", &class), arg("namespace", &namespace)];
        self.operation("EnumerateInstanceNames", args, |conn| {
            let response = conn.imethodcall("EnumerateInstanceNames", &namespace, |req| {
                req.iparam_classname("ClassName", Some(&class.classname))
            })?;
            collect_items("EnumerateInstanceNames", "instance path", response.items, |item| match item {
                Item::InstanceName(mut path) => {
                    stamp_instance_path(&mut path, &namespace);
                    Ok(path)
                }
                other => Err(other),
            })
        })
    }

    /// Create an instance. The namespace is taken from `namespace`, else
    /// from the instance path, else the default namespace.
    pub fn create_instance(
        &mut self,
        namespace: Option<&str>,
        instance: &CimInstance,
    ) -> Result<CimInstanceName, Error> {
        let path_namespace = instance.path.as_ref().and_then(|p| p.namespace.as_deref());
        let namespace = self.resolve_namespace(namespace, path_namespace);
        let args = vec![arg("NewInstance", instance), arg("namespace", &namespace)];
        self.operation("CreateInstance", args, |conn| {
            // The path is not part of the new instance on the wire.
            let response = conn.imethodcall("CreateInstance", &namespace, |req| {
                req.iparam("NewInstance", Some(instance.to_element()))
            })?;
            match single_item("CreateInstance", response)? {
                Item::InstanceName(mut path) => {
                    stamp_instance_path(&mut path, &namespace);
                    Ok(path)
                }
                other => Err(unexpected_item("CreateInstance", "instance path", &other)),
            }
        })
    }

    /// Modify an instance in place. The instance must carry its path.
    pub fn modify_instance(
        &mut self,
        instance: &CimInstance,
        options: &ModifyInstanceOptions,
    ) -> Result<(), Error> {
        let path = instance.path.as_ref().ok_or_else(|| {
            Error::value(format!(
                "ModifiedInstance of class {} must have a path",
                instance.classname
            ))
        })?;
        let namespace = self.resolve_namespace(None, path.namespace.as_deref());
        let args = vec![arg("ModifiedInstance", instance), arg("options", options)];
        self.operation("ModifyInstance", args, |conn| {
            let named = instance.to_named_element()?;
            conn.imethodcall("ModifyInstance", &namespace, |req| {
                req.iparam("ModifiedInstance", Some(named))
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_strings("PropertyList", options.property_list.as_deref())
            })?;
            Ok(())
        })
    }

    pub fn delete_instance(&mut self, instance_name: &CimInstanceName) -> Result<(), Error> {
        let namespace = self.resolve_namespace(None, instance_name.namespace.as_deref());
        let args = vec![arg("InstanceName", instance_name)];
        self.operation("DeleteInstance", args, |conn| {
            conn.imethodcall("DeleteInstance", &namespace, |req| {
                req.iparam("InstanceName", Some(instance_name.local().to_element()))
            })?;
            Ok(())
        })
    }

    pub fn get_class(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        options: &GetClassOptions,
    ) -> Result<CimClass, Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let args = vec![arg("ClassName", &class), arg("namespace", &namespace), arg("options", options)];
        self.operation("GetClass", args, |conn| {
            let response = conn.imethodcall("GetClass", &namespace, |req| {
                req.iparam_classname("ClassName", Some(&class.classname))
                    .iparam_bool("LocalOnly", options.local_only)
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                    .iparam_strings("PropertyList", options.property_list.as_deref())
            })?;
            match single_item("GetClass", response)? {
                Item::Class(mut klass) => {
                    klass.path = Some(conn.class_path(&klass.classname, &namespace));
                    Ok(klass)
                }
                other => Err(unexpected_item("GetClass", "class", &other)),
            }
        })
    }

    pub fn enumerate_classes(
        &mut self,
        namespace: Option<&str>,
        class: Option<CimClassName>,
        options: &EnumerateClassesOptions,
    ) -> Result<Vec<CimClass>, Error> {
        let namespace =
            self.resolve_namespace(namespace, class.as_ref().and_then(|c| c.namespace.as_deref()));
        let args = vec![arg("ClassName", &class), arg("namespace", &namespace), arg("options", options)];
        self.operation("EnumerateClasses", args, |conn| {
            let response = conn.imethodcall("EnumerateClasses", &namespace, |req| {
                req.iparam_classname("ClassName", class.as_ref().map(|c| c.classname.as_str()))
                    .iparam_bool("DeepInheritance", options.deep_inheritance)
                    .iparam_bool("LocalOnly", options.local_only)
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_bool("IncludeClassOrigin", options.include_class_origin)
            })?;
            collect_items("EnumerateClasses", "class", response.items, |item| match item {
                Item::Class(mut klass) => {
                    klass.path = Some(conn.class_path(&klass.classname, &namespace));
                    Ok(klass)
                }
                other => Err(other),
            })
        })
    }

    /// Names of the subclasses of `class`, or of the top-level classes.
    pub fn enumerate_class_names(
        &mut self,
        namespace: Option<&str>,
        class: Option<CimClassName>,
        deep_inheritance: Option<bool>,
    ) -> Result<Vec<String>, Error> {
        let namespace =
            self.resolve_namespace(namespace, class.as_ref().and_then(|c| c.namespace.as_deref()));
        let args = vec![
            arg("ClassName", &class),
            arg("namespace", &namespace),
            arg("DeepInheritance", deep_inheritance),
        ];
        self.operation("EnumerateClassNames", args, |conn| {
            let response = conn.imethodcall("EnumerateClassNames", &namespace, |req| {
                req.iparam_classname("ClassName", class.as_ref().map(|c| c.classname.as_str()))
                    .iparam_bool("DeepInheritance", deep_inheritance)
            })?;
            collect_items("EnumerateClassNames", "class name", response.items, |item| match item {
                Item::ClassName(path) => Ok(path.classname),
                other => Err(other),
            })
        })
    }

    pub fn create_class(&mut self, namespace: Option<&str>, class: &CimClass) -> Result<(), Error> {
        let path_namespace = class.path.as_ref().and_then(|p| p.namespace.as_deref());
        let namespace = self.resolve_namespace(namespace, path_namespace);
        let args = vec![arg("NewClass", &class.classname), arg("namespace", &namespace)];
        self.operation("CreateClass", args, |conn| {
            conn.imethodcall("CreateClass", &namespace, |req| {
                req.iparam("NewClass", Some(class.to_element()))
            })?;
            Ok(())
        })
    }

    pub fn modify_class(&mut self, namespace: Option<&str>, class: &CimClass) -> Result<(), Error> {
        let path_namespace = class.path.as_ref().and_then(|p| p.namespace.as_deref());
        let namespace = self.resolve_namespace(namespace, path_namespace);
        let args = vec![arg("ModifiedClass", &class.classname), arg("namespace", &namespace)];
        self.operation("ModifyClass", args, |conn| {
            conn.imethodcall("ModifyClass", &namespace, |req| {
                req.iparam("ModifiedClass", Some(class.to_element()))
            })?;
            Ok(())
        })
    }

    pub fn delete_class(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
    ) -> Result<(), Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let args = vec![arg("ClassName", &class), arg("namespace", &namespace)];
        self.operation("DeleteClass", args, |conn| {
            conn.imethodcall("DeleteClass", &namespace, |req| {
                req.iparam_classname("ClassName", Some(&class.classname))
            })?;
            Ok(())
        })
    }

    /// Objects associated with `object`: instances for an instance path,
    /// classes for a class path.
    pub fn associators(
        &mut self,
        object: &ObjectPath,
        options: &AssociatorsOptions,
    ) -> Result<Vec<AssociatedObject>, Error> {
        let namespace = self.resolve_namespace(None, object.namespace());
        let class_level = matches!(object, ObjectPath::Class(_));
        let args = vec![arg("ObjectName", object), arg("options", options)];
        self.operation("Associators", args, |conn| {
            let response = conn.imethodcall("Associators", &namespace, |req| {
                req.iparam("ObjectName", Some(object_name_element(object)))
                    .iparam_classname("AssocClass", options.assoc_class.as_deref())
                    .iparam_classname("ResultClass", options.result_class.as_deref())
                    .iparam_str("Role", options.role.as_deref())
                    .iparam_str("ResultRole", options.result_role.as_deref())
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                    .iparam_strings("PropertyList", options.property_list.as_deref())
            })?;
            conn.associated_objects("Associators", class_level, response.items, &namespace)
        })
    }

    pub fn associator_names(
        &mut self,
        object: &ObjectPath,
        options: &AssociatorsOptions,
    ) -> Result<Vec<ObjectPath>, Error> {
        let namespace = self.resolve_namespace(None, object.namespace());
        let class_level = matches!(object, ObjectPath::Class(_));
        let args = vec![arg("ObjectName", object), arg("options", options)];
        self.operation("AssociatorNames", args, |conn| {
            let response = conn.imethodcall("AssociatorNames", &namespace, |req| {
                req.iparam("ObjectName", Some(object_name_element(object)))
                    .iparam_classname("AssocClass", options.assoc_class.as_deref())
                    .iparam_classname("ResultClass", options.result_class.as_deref())
                    .iparam_str("Role", options.role.as_deref())
                    .iparam_str("ResultRole", options.result_role.as_deref())
            })?;
            conn.associated_names("AssociatorNames", class_level, response.items, &namespace)
        })
    }

    pub fn references(
        &mut self,
        object: &ObjectPath,
        options: &ReferencesOptions,
    ) -> Result<Vec<AssociatedObject>, Error> {
        let namespace = self.resolve_namespace(None, object.namespace());
        let class_level = matches!(object, ObjectPath::Class(_));
        let args = vec![arg("ObjectName", object), arg("options", options)];
        self.operation("References", args, |conn| {
            let response = conn.imethodcall("References", &namespace, |req| {
                req.iparam("ObjectName", Some(object_name_element(object)))
                    .iparam_classname("ResultClass", options.result_class.as_deref())
                    .iparam_str("Role", options.role.as_deref())
                    .iparam_bool("IncludeQualifiers", options.include_qualifiers)
                    .iparam_bool("IncludeClassOrigin", options.include_class_origin)
                    .iparam_strings("PropertyList", options.property_list.as_deref())
            })?;
            conn.associated_objects("References", class_level, response.items, &namespace)
        })
    }

    pub fn reference_names(
        &mut self,
        object: &ObjectPath,
        options: &ReferencesOptions,
    ) -> Result<Vec<ObjectPath>, Error> {
        let namespace = self.resolve_namespace(None, object.namespace());
        let class_level = matches!(object, ObjectPath::Class(_));
        let args = vec![arg("ObjectName", object), arg("options", options)];
        self.operation("ReferenceNames", args, |conn| {
            let response = conn.imethodcall("ReferenceNames", &namespace, |req| {
                req.iparam("ObjectName", Some(object_name_element(object)))
                    .iparam_classname("ResultClass", options.result_class.as_deref())
                    .iparam_str("Role", options.role.as_deref())
            })?;
            conn.associated_names("ReferenceNames", class_level, response.items, &namespace)
        })
    }

    /// Run a query. Returned instances keep whatever path the server sent,
    /// with the namespace filled in.
    pub fn exec_query(
        &mut self,
        namespace: Option<&str>,
        query_language: &str,
        query: &str,
    ) -> Result<Vec<CimInstance>, Error> {
        require_name("QueryLanguage", query_language)?;
        let namespace = self.resolve_namespace(namespace, None);
        let args = vec![
            arg("QueryLanguage", query_language),
            arg("Query", query),
            arg("namespace", &namespace),
        ];
        self.operation("ExecQuery", args, |conn| {
            let response = conn.imethodcall("ExecQuery", &namespace, |req| {
                req.iparam_str("QueryLanguage", Some(query_language))
                    .iparam_str("Query", Some(query))
            })?;
            collect_items("ExecQuery", "instance", response.items, |item| match item {
                Item::Instance(mut instance) => {
                    if let Some(path) = instance.path.as_mut() {
                        stamp_instance_path(path, &namespace);
                    }
                    Ok(instance)
                }
                other => Err(other),
            })
        })
    }

    /// Invoke an extrinsic method on an instance or a class. The namespace
    /// comes from `object`, else the default namespace; its host is never
    /// sent.
    pub fn invoke_method(
        &mut self,
        method: &str,
        object: &ObjectPath,
        params: &[(&str, Option<CimValue>)],
    ) -> Result<MethodResult, Error> {
        require_name("MethodName", method)?;
        let namespace = self.resolve_namespace(None, object.namespace());
        let mut target = object.local();
        target.set_namespace(Some(namespace));
        let args = vec![
            arg("MethodName", method),
            arg("ObjectName", &target),
            arg("Params", params),
        ];
        self.operation("InvokeMethod", args, |conn| {
            let response = conn.methodcall(method, &target, params)?;
            let return_value = response.return_value.and_then(|r| r.value);
            let out_params = response
                .out_params
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect();
            debug!(method, target = %target, "method invoked");
            Ok(MethodResult {
                return_value,
                out_params,
            })
        })
    }

    pub fn get_qualifier(
        &mut self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<CimQualifierDeclaration, Error> {
        require_name("QualifierName", name)?;
        let namespace = self.resolve_namespace(namespace, None);
        let args = vec![arg("QualifierName", name), arg("namespace", &namespace)];
        self.operation("GetQualifier", args, |conn| {
            let response = conn.imethodcall("GetQualifier", &namespace, |req| {
                req.iparam_str("QualifierName", Some(name))
            })?;
            match single_item("GetQualifier", response)? {
                Item::QualifierDeclaration(decl) => Ok(decl),
                other => Err(unexpected_item("GetQualifier", "qualifier declaration", &other)),
            }
        })
    }

    pub fn enumerate_qualifiers(
        &mut self,
        namespace: Option<&str>,
    ) -> Result<Vec<CimQualifierDeclaration>, Error> {
        let namespace = self.resolve_namespace(namespace, None);
        let args = vec![arg("namespace", &namespace)];
        self.operation("EnumerateQualifiers", args, |conn| {
            let response = conn.imethodcall("EnumerateQualifiers", &namespace, |req| req)?;
            collect_items("EnumerateQualifiers", "qualifier declaration", response.items, |item| {
                match item {
                    Item::QualifierDeclaration(decl) => Ok(decl),
                    other => Err(other),
                }
            })
        })
    }

    pub fn set_qualifier(
        &mut self,
        namespace: Option<&str>,
        declaration: &CimQualifierDeclaration,
    ) -> Result<(), Error> {
        require_name("QualifierDeclaration", &declaration.name)?;
        let namespace = self.resolve_namespace(namespace, None);
        let args = vec![arg("QualifierDeclaration", declaration), arg("namespace", &namespace)];
        self.operation("SetQualifier", args, |conn| {
            conn.imethodcall("SetQualifier", &namespace, |req| {
                req.iparam("QualifierDeclaration", Some(declaration.to_element()))
            })?;
            Ok(())
        })
    }

    pub fn delete_qualifier(&mut self, namespace: Option<&str>, name: &str) -> Result<(), Error> {
        require_name("QualifierName", name)?;
        let namespace = self.resolve_namespace(namespace, None);
        let args = vec![arg("QualifierName", name), arg("namespace", &namespace)];
        self.operation("DeleteQualifier", args, |conn| {
            conn.imethodcall("DeleteQualifier", &namespace, |req| {
                req.iparam_str("QualifierName", Some(name))
            })?;
            Ok(())
        })
    }

    /// Deliver an indication to a listener at this connection's URL.
    pub fn export_indication(&mut self, indication: &CimInstance) -> Result<(), Error> {
        let args = vec![arg("NewIndication", indication)];
        self.operation("ExportIndication", args, |conn| {
            conn.export_call("ExportIndication", |req| {
                req.iparam("NewIndication", Some(indication.to_element()))
            })?;
            Ok(())
        })
    }
}
