//! Optional parameters of the CIM operations.
//!
//! Every field left at `None` is omitted from the request, which lets the
//! server apply the DSP0200 default.

/// Default batch size of the `iter_*` cursors.
pub const DEFAULT_ITER_MAX_OBJECT_COUNT: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetInstanceOptions {
    pub local_only: Option<bool>,
    pub include_qualifiers: Option<bool>,
    pub include_class_origin: Option<bool>,
    /// `Some(vec![])` requests no properties at all.
    pub property_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerateInstancesOptions {
    pub local_only: Option<bool>,
    pub deep_inheritance: Option<bool>,
    pub include_qualifiers: Option<bool>,
    pub include_class_origin: Option<bool>,
    pub property_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyInstanceOptions {
    pub include_qualifiers: Option<bool>,
    pub property_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetClassOptions {
    pub local_only: Option<bool>,
    pub include_qualifiers: Option<bool>,
    pub include_class_origin: Option<bool>,
    pub property_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerateClassesOptions {
    pub deep_inheritance: Option<bool>,
    pub local_only: Option<bool>,
    pub include_qualifiers: Option<bool>,
    pub include_class_origin: Option<bool>,
}

/// Filters and flags of Associators, AssociatorNames and their pull
/// counterparts. Fields that do not apply to an operation are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociatorsOptions {
    pub assoc_class: Option<String>,
    pub result_class: Option<String>,
    pub role: Option<String>,
    pub result_role: Option<String>,
    pub include_qualifiers: Option<bool>,
    pub include_class_origin: Option<bool>,
    pub property_list: Option<Vec<String>>,
}

/// Filters and flags of References, ReferenceNames and their pull
/// counterparts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencesOptions {
    pub result_class: Option<String>,
    pub role: Option<String>,
    pub include_qualifiers: Option<bool>,
    pub include_class_origin: Option<bool>,
    pub property_list: Option<Vec<String>>,
}

/// Parameters shared by all Open operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub filter_query_language: Option<String>,
    pub filter_query: Option<String>,
    /// Seconds the server keeps an idle enumeration open.
    pub operation_timeout: Option<u32>,
    pub continue_on_error: Option<bool>,
    /// Objects in the first batch; `Some(0)` only opens the session.
    pub max_object_count: Option<u32>,
}

/// Parameters of the `iter_*` cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterOptions {
    pub filter_query_language: Option<String>,
    pub filter_query: Option<String>,
    pub operation_timeout: Option<u32>,
    pub continue_on_error: Option<bool>,
    /// Objects per pull batch; must be positive.
    pub max_object_count: u32,
}

impl Default for IterOptions {
    fn default() -> Self {
        Self {
            filter_query_language: None,
            filter_query: None,
            operation_timeout: None,
            continue_on_error: None,
            max_object_count: DEFAULT_ITER_MAX_OBJECT_COUNT,
        }
    }
}

impl IterOptions {
    pub(crate) fn open_options(&self) -> OpenOptions {
        OpenOptions {
            filter_query_language: self.filter_query_language.clone(),
            filter_query: self.filter_query.clone(),
            operation_timeout: self.operation_timeout,
            continue_on_error: self.continue_on_error,
            max_object_count: Some(self.max_object_count),
        }
    }
}
