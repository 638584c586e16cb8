use cim_types::CimClassName;
use tracing::trace;

use crate::connection::{require_name, WbemConnection};
use crate::error::Error;
use crate::options::GetClassOptions;

impl WbemConnection {
    /// Whether `class` is `superclass` or derives from it.
    ///
    /// Walks the superclass chain with one GetClass per level, comparing
    /// names case-insensitively.
    pub fn is_subclass(
        &mut self,
        namespace: Option<&str>,
        class: impl Into<CimClassName>,
        superclass: &str,
    ) -> Result<bool, Error> {
        let class = class.into();
        require_name("ClassName", &class.classname)?;
        require_name("SuperClass", superclass)?;
        let namespace = self.resolve_namespace(namespace, class.namespace.as_deref());
        let shape_only = GetClassOptions {
            local_only: Some(true),
            include_qualifiers: Some(false),
            include_class_origin: Some(false),
            property_list: Some(Vec::new()),
        };

        let mut current = Some(class.classname);
        while let Some(name) = current {
            if name.eq_ignore_ascii_case(superclass) {
                return Ok(true);
            }
            let klass = self.get_class(Some(&namespace), name.as_str(), &shape_only)?;
            trace!(class = %name, superclass = ?klass.superclass, "walked one inheritance level");
            current = klass.superclass;
        }
        Ok(false)
    }
}
